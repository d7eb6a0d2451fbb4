#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::too_many_arguments)]

//! # arb-instrument
//!
//! Core identifiers shared by every crate in the funding-rate arbitrage engine:
//! [`exchange::ExchangeId`], the closed set of exchanges the engine integrates with, and
//! [`symbol::Symbol`], the canonical `BASEQUOTE` symbol new type every exchange client
//! translates to and from.
//!
//! This crate performs no I/O and has no knowledge of funding rates, order books, or any other
//! domain concept layered on top of these identifiers by `arb-data`.

/// [`exchange::ExchangeId`] closed enum and its funding-interval defaults.
pub mod exchange;

/// [`symbol::Symbol`] canonical symbol new type.
pub mod symbol;
