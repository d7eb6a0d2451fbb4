use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Closed set of exchanges the funding-rate arbitrage engine integrates with.
///
/// Unlike the wider market-data ecosystem this engine was grown from, which distinguishes spot,
/// futures and options venues as separate [`ExchangeId`] variants, the funding-rate engine only
/// ever talks to the perpetual-swap venue of each exchange, so one variant per exchange suffices.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeId {
    Binance,
    Okx,
    Mexc,
    Gateio,
    Bingx,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 5] = [
        ExchangeId::Binance,
        ExchangeId::Okx,
        ExchangeId::Mexc,
        ExchangeId::Gateio,
        ExchangeId::Bingx,
    ];

    /// Return the `&str` representation of this [`ExchangeId`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Okx => "okx",
            ExchangeId::Mexc => "mexc",
            ExchangeId::Gateio => "gateio",
            ExchangeId::Bingx => "bingx",
        }
    }

    /// Maximum symbols a single WebSocket connection may hold subscribed on this exchange.
    ///
    /// See docs: component design §4.2 - exchange-specific per-connection subscription limits.
    pub fn max_symbols_per_connection(&self) -> usize {
        match self {
            ExchangeId::Okx => 100,
            ExchangeId::Gateio => 20,
            ExchangeId::Bingx => 50,
            ExchangeId::Binance | ExchangeId::Mexc => 100,
        }
    }

    /// Native perpetual funding interval, in hours, used as the default `originalFundingInterval`
    /// when an incoming rate omits one.
    pub fn default_funding_interval_hours(&self) -> u8 {
        match self {
            ExchangeId::Binance | ExchangeId::Okx | ExchangeId::Bingx => 8,
            ExchangeId::Mexc => 8,
            ExchangeId::Gateio => 8,
        }
    }

    pub fn from_str_lenient(input: &str) -> Option<Self> {
        match input.to_ascii_lowercase().as_str() {
            "binance" => Some(ExchangeId::Binance),
            "okx" => Some(ExchangeId::Okx),
            "mexc" => Some(ExchangeId::Mexc),
            "gateio" | "gate.io" | "gate_io" => Some(ExchangeId::Gateio),
            "bingx" => Some(ExchangeId::Bingx),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_de_exchange_id() {
        assert_eq!(
            serde_json::from_str::<ExchangeId>(r#""okx""#).unwrap(),
            ExchangeId::Okx
        );
        assert_eq!(
            serde_json::from_str::<ExchangeId>(r#""gateio""#).unwrap(),
            ExchangeId::Gateio
        );
    }

    #[test]
    fn test_from_str_lenient() {
        assert_eq!(
            ExchangeId::from_str_lenient("Gate.IO"),
            Some(ExchangeId::Gateio)
        );
        assert_eq!(ExchangeId::from_str_lenient("deribit"), None);
    }

    #[test]
    fn test_max_symbols_per_connection() {
        assert_eq!(ExchangeId::Okx.max_symbols_per_connection(), 100);
        assert_eq!(ExchangeId::Gateio.max_symbols_per_connection(), 20);
        assert_eq!(ExchangeId::Bingx.max_symbols_per_connection(), 50);
        assert_eq!(ExchangeId::Binance.max_symbols_per_connection(), 100);
    }
}
