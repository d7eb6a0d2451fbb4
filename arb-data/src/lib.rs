//! Real-time funding-rate ingestion and arbitrage-signal engine.
//!
//! Exchange WebSocket clients ([`client`]) feed a per-exchange [`pool::ConnectionPool`]; the
//! [`monitor::FundingRateMonitor`] coalesces updates per symbol ([`coalesce`]), builds the best
//! cross-exchange pair ([`pair_builder`]), and writes it to the process-wide [`cache::RatesCache`].
//! The [`tracker::OpportunityTracker`] observes the monitor's `rate-updated` stream and maintains
//! the hysteresis-gated active-opportunity state machine.

pub mod cache;
pub mod client;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod model;
pub mod monitor;
pub mod pair_builder;
pub mod pool;
pub mod tracker;
