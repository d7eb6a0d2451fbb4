use crate::error::DataError;
use arb_instrument::exchange::ExchangeId;
use arb_instrument::symbol::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// A single exchange's funding-rate reading for one symbol, as decoded off its WebSocket feed.
///
/// Immutable after construction; `symbol` and `exchange` are validated at construction time
/// (component design §3). Derived values (annualised rate, percentage string) are computed on
/// demand rather than stored.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FundingRateRecord {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub funding_rate: Decimal,
    pub next_funding_time: DateTime<Utc>,
    pub mark_price: Option<Decimal>,
    pub index_price: Option<Decimal>,
    pub recorded_at: DateTime<Utc>,
}

impl FundingRateRecord {
    pub fn new(
        exchange: ExchangeId,
        symbol: Symbol,
        funding_rate: Decimal,
        next_funding_time: DateTime<Utc>,
        mark_price: Option<Decimal>,
        index_price: Option<Decimal>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange,
            symbol,
            funding_rate,
            next_funding_time,
            mark_price,
            index_price,
            recorded_at,
        }
    }
}

/// Hours between funding settlements for a perp contract. Closed set per component design §3/§4.4.
pub type FundingIntervalHours = u32;

pub const VALID_FUNDING_INTERVALS: [FundingIntervalHours; 4] = [1, 4, 8, 24];

/// Per-exchange rate state held inside a [`FundingRatePair`], optionally carrying a mark price
/// and pre-computed time-basis normalisations.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExchangeRateData {
    pub rate: FundingRateRecord,
    pub price: Option<Decimal>,
    pub original_funding_interval: Option<FundingIntervalHours>,
    pub normalized: BTreeMap<FundingIntervalHours, Decimal>,
}

impl ExchangeRateData {
    pub fn new(rate: FundingRateRecord) -> Self {
        let price = rate.mark_price;
        Self {
            rate,
            price,
            original_funding_interval: None,
            normalized: BTreeMap::new(),
        }
    }

    /// Normalise this exchange's rate onto time basis `basis` per component design §4.4.
    ///
    /// Pre-computed values in `normalized` win whenever the original interval differs from
    /// `basis` - they represent an authoritative upstream conversion rather than this engine's
    /// own linear scaling. Falls back to the raw rate, scaled linearly, when the original
    /// interval is known; returns the raw rate unscaled (with a caller-visible `None` original
    /// interval) otherwise.
    pub fn normalized_rate(&self, basis: FundingIntervalHours) -> Decimal {
        if let Some(original) = self.original_funding_interval {
            if original != basis {
                if let Some(precomputed) = self.normalized.get(&basis) {
                    return *precomputed;
                }
            }

            if original == basis {
                return self.rate.funding_rate;
            }

            return self.rate.funding_rate * Decimal::from(basis) / Decimal::from(original);
        }

        tracing::warn!(
            symbol = %self.rate.symbol,
            exchange = %self.rate.exchange,
            "normalizing rate with unknown original funding interval, using raw value"
        );
        self.rate.funding_rate
    }
}

/// Normalised funding-rate event emitted by an [`crate::client::ExchangeClient`] off its
/// WebSocket feed (component design §4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct FundingRateReceived {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub funding_rate: Option<Decimal>,
    pub next_funding_time: DateTime<Utc>,
    pub next_funding_rate: Option<Decimal>,
    pub mark_price: Option<Decimal>,
    pub source: &'static str,
    pub received_at: DateTime<Utc>,
}

impl FundingRateReceived {
    pub const SOURCE_WEBSOCKET: &'static str = "websocket";
}

/// The selected best arbitrage pair for a symbol: the unordered exchange pair maximising
/// absolute normalised-rate spread (component design §4.4, GLOSSARY "Best pair").
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BestArbitragePair {
    pub long_exchange: ExchangeId,
    pub short_exchange: ExchangeId,
    pub spread_percent: Decimal,
    pub spread_annualized: Decimal,
    pub price_diff_percent: Option<Decimal>,
    pub is_price_direction_correct: Option<bool>,
}

impl BestArbitragePair {
    pub fn new(
        long_exchange: ExchangeId,
        short_exchange: ExchangeId,
        spread_percent: Decimal,
        spread_annualized: Decimal,
        price_diff_percent: Option<Decimal>,
        is_price_direction_correct: Option<bool>,
    ) -> Result<Self, DataError> {
        if long_exchange == short_exchange {
            return Err(DataError::InvalidInput(format!(
                "long and short exchange must differ, got {long_exchange} for both legs"
            )));
        }
        if spread_percent < Decimal::ZERO {
            return Err(DataError::InvalidInput(format!(
                "spreadPercent must be >= 0, got {spread_percent}"
            )));
        }

        Ok(Self {
            long_exchange,
            short_exchange,
            spread_percent,
            spread_annualized,
            price_diff_percent,
            is_price_direction_correct,
        })
    }
}

/// Combined per-symbol view across every exchange currently reporting a rate, with the selected
/// [`BestArbitragePair`] (component design §3/§4.4).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FundingRatePair {
    pub symbol: Symbol,
    pub exchanges: BTreeMap<ExchangeId, ExchangeRateData>,
    pub best_pair: Option<BestArbitragePair>,
    pub recorded_at: DateTime<Utc>,
}

impl FundingRatePair {
    /// Construct a new pair, validating that every exchange's record carries the same symbol
    /// (component design §4.4 "Symbol-mismatch guard").
    pub fn new(
        symbol: Symbol,
        exchanges: BTreeMap<ExchangeId, ExchangeRateData>,
        best_pair: Option<BestArbitragePair>,
        recorded_at: DateTime<Utc>,
    ) -> Result<Self, DataError> {
        for data in exchanges.values() {
            if data.rate.symbol != symbol {
                return Err(DataError::SymbolMismatch {
                    pair_symbol: symbol.as_str().to_owned(),
                    record_symbol: data.rate.symbol.as_str().to_owned(),
                });
            }
        }

        Ok(Self {
            symbol,
            exchanges,
            best_pair,
            recorded_at,
        })
    }
}

/// A [`FundingRatePair`] as held by the [`crate::cache::RatesCache`], carrying its own insertion
/// timestamp for staleness eviction (component design §4.3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CachedRatePair {
    pub pair: FundingRatePair,
    pub cached_at: DateTime<Utc>,
}

impl CachedRatePair {
    pub fn new(pair: FundingRatePair, cached_at: DateTime<Utc>) -> Self {
        Self { pair, cached_at }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_threshold: chrono::Duration) -> bool {
        now - self.cached_at > stale_threshold
    }
}

/// Key identifying an [`ActiveOpportunity`]: a symbol paired with its long/short exchange legs
/// (component design §3/§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpportunityKey {
    pub symbol: Symbol,
    pub long_exchange: ExchangeId,
    pub short_exchange: ExchangeId,
}

/// A currently-live arbitrage opportunity tracked by the [`crate::tracker::OpportunityTracker`]
/// state machine (component design §4.6).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ActiveOpportunity {
    pub symbol: Symbol,
    pub long_exchange: ExchangeId,
    pub short_exchange: ExchangeId,
    pub last_spread: Decimal,
    pub last_apy: Decimal,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn symbol(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn record(exchange: ExchangeId, symbol_str: &str, rate: Decimal) -> FundingRateRecord {
        FundingRateRecord::new(exchange, symbol(symbol_str), rate, Utc::now(), None, None, Utc::now())
    }

    #[test]
    fn test_best_pair_rejects_equal_exchanges() {
        let result = BestArbitragePair::new(
            ExchangeId::Binance,
            ExchangeId::Binance,
            dec!(1.0),
            dec!(10.0),
            None,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_best_pair_rejects_negative_spread() {
        let result = BestArbitragePair::new(
            ExchangeId::Binance,
            ExchangeId::Okx,
            dec!(-1.0),
            dec!(10.0),
            None,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_pair_rejects_symbol_mismatch() {
        let mut exchanges = BTreeMap::new();
        exchanges.insert(
            ExchangeId::Binance,
            ExchangeRateData::new(record(ExchangeId::Binance, "ETHUSDT", dec!(0.001))),
        );

        let result = FundingRatePair::new(symbol("BTCUSDT"), exchanges, None, Utc::now());
        assert!(matches!(result, Err(DataError::SymbolMismatch { .. })));
    }

    #[test]
    fn test_normalized_rate_scales_linearly_when_original_known() {
        let mut data = ExchangeRateData::new(record(ExchangeId::Binance, "BTCUSDT", dec!(0.001)));
        data.original_funding_interval = Some(4);

        assert_eq!(data.normalized_rate(8), dec!(0.002));
        assert_eq!(data.normalized_rate(4), dec!(0.001));
    }

    #[test]
    fn test_normalized_rate_prefers_precomputed_value() {
        let mut data = ExchangeRateData::new(record(ExchangeId::Binance, "BTCUSDT", dec!(0.001)));
        data.original_funding_interval = Some(4);
        data.normalized.insert(1, dec!(0.00025));

        assert_eq!(data.normalized_rate(1), dec!(0.00025));
    }

    #[test]
    fn test_cached_rate_pair_staleness() {
        let pair = FundingRatePair::new(symbol("BTCUSDT"), BTreeMap::new(), None, Utc::now()).unwrap();
        let cached_at = Utc::now() - chrono::Duration::seconds(601);
        let cached = CachedRatePair::new(pair, cached_at);

        assert!(cached.is_stale(Utc::now(), chrono::Duration::seconds(600)));
    }
}
