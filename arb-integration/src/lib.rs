#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # arb-integration
//!
//! Transport-agnostic plumbing shared by every exchange client in the funding-rate arbitrage
//! engine: the [`error::SocketError`] taxonomy, a [`channel::Tx`] fan-out abstraction, WebSocket
//! connect/parse helpers, and a bounded-window [`latency::LatencyTracker`].
//!
//! This crate has no knowledge of funding rates, symbols, or any specific exchange - that
//! knowledge lives in `arb-data`.

/// All [`error::SocketError`]s generated in `arb-integration`.
pub mod error;

/// [`channel::Tx`] abstraction over an unbounded multi-producer-single-consumer channel, used to
/// fan event surfaces (client -> pool -> monitor) out without in-process emitter listener lists.
pub mod channel;

/// WebSocket connect/parse helpers and type aliases.
pub mod protocol;

/// Bounded-window latency sample tracking (avg/P50/P95/P99/min/max/count).
pub mod latency;

/// HMAC-SHA256 signing helper used by private exchange channels (eg/ OKX login).
pub mod signing;
