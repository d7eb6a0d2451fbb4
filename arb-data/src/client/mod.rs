//! Exchange WebSocket clients (component design §4.1).
//!
//! Each exchange implements [`ExchangeProtocol`] (subscribe/unsubscribe message shapes, native
//! message parsing, symbol translation, private-channel login); [`GenericExchangeClient`] drives
//! the shared reconnect/health-check/latency-tracking machinery generically over that protocol,
//! mirroring the split between an exchange [`Connector`](Self) and its generic stream driver that
//! the wider ecosystem uses for market-data integrations.

pub mod backoff;
pub mod bingx;
pub mod binance;
pub mod gateio;
pub mod generic;
pub mod mexc;
pub mod okx;
pub mod price_lru;
pub mod symbol_translation;

use crate::error::DataError;
use crate::model::FundingRateReceived;
use arb_instrument::exchange::ExchangeId;
use arb_instrument::symbol::Symbol;
use arb_integration::latency::LatencyStats;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Event surface emitted by an [`ExchangeClient`] (component design §4.1).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    FundingRate(FundingRateReceived),
    MarkPrice { symbol: Symbol, price: Decimal },
    Connected,
    Disconnected,
    Error(String),
    Reconnecting { attempt: u32 },
    MaxRetriesReached,
    Resubscribed { count: usize },
    /// A pool-level event (component design §4.2/§6): the number of live connections backing an
    /// exchange changed, e.g. after `shrink()` prunes an idle connection.
    ConnectionCountChanged(usize),
}

/// Point-in-time operational snapshot of an [`ExchangeClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientStats {
    pub exchange: ExchangeId,
    pub subscribed_symbols: usize,
    pub is_ready: bool,
    pub latency: Option<LatencyStats>,
}

/// One physical WebSocket connection to a specific exchange (component design §4.1).
///
/// Implementations own exactly one socket; the [`crate::pool::ConnectionPool`] depends only on
/// this trait, never on a concrete exchange type, so that dynamic dispatch across exchanges is
/// possible (component design §9 "Dynamic dispatch across exchanges").
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn exchange_id(&self) -> ExchangeId;

    /// Dial the exchange. Fails only on the initial dial timeout (10s) - all subsequent
    /// connection errors are absorbed and surfaced as [`ClientEvent::Error`].
    async fn connect(&self) -> Result<(), DataError>;

    /// Gracefully close the socket without tearing down internal state.
    async fn disconnect(&self);

    /// Idempotent synchronous teardown: stops the reconnect loop and any timers, then disconnects.
    fn destroy(&self);

    /// Subscribe to `symbols`. Fails synchronously if the client has been destroyed or is not
    /// ready.
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), DataError>;

    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), DataError>;

    fn subscribed_symbols(&self) -> Vec<Symbol>;

    fn is_ready(&self) -> bool;

    fn stats(&self) -> ClientStats;
}

/// Factory for constructing a fresh [`ExchangeClient`] bound to an event transmitter, used by the
/// [`crate::pool::ConnectionPool`] to create new connections on demand (component design §4.2).
pub trait ClientFactory: Send + Sync {
    fn create(&self, tx: arb_integration::channel::UnboundedTx<ClientEvent>) -> Box<dyn ExchangeClient>;
}
