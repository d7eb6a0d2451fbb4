//! External wire shapes for the broadcast layer (component design §4.7, §6 "Outbound -- event
//! surface"). Kept separate from `arb_data::model` since the internal model and the external
//! JSON contract are allowed to diverge.

use arb_data::cache::RatesCacheStats;
use arb_data::model::{BestArbitragePair, FundingRatePair};
use arb_instrument::exchange::ExchangeId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

pub const STATUS_OPPORTUNITY: &str = "opportunity";
pub const STATUS_APPROACHING: &str = "approaching";
pub const STATUS_NORMAL: &str = "normal";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeRateWire {
    pub funding_rate: Decimal,
    pub mark_price: Option<Decimal>,
    pub original_funding_interval: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BestPairWire {
    pub long_exchange: ExchangeId,
    pub short_exchange: ExchangeId,
    pub spread_percent: Decimal,
    pub spread_annualized: Decimal,
    pub price_diff_percent: Option<Decimal>,
    pub is_price_direction_correct: Option<bool>,
}

impl From<&BestArbitragePair> for BestPairWire {
    fn from(best: &BestArbitragePair) -> Self {
        Self {
            long_exchange: best.long_exchange,
            short_exchange: best.short_exchange,
            spread_percent: best.spread_percent,
            spread_annualized: best.spread_annualized,
            price_diff_percent: best.price_diff_percent,
            is_price_direction_correct: best.is_price_direction_correct,
        }
    }
}

/// The shape sent to subscribers inside a `rates:update` payload (component design §6).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateWireEntry {
    pub symbol: String,
    pub exchanges: BTreeMap<String, ExchangeRateWire>,
    pub best_pair: Option<BestPairWire>,
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Classify a pair's annualised spread against the tracker's entry threshold and its 75% band
/// (mirrors `RatesCache::get_stats`'s own `approaching_count` cutoff, component design §4.3).
pub fn classify_status(spread_annualized: Decimal, entry_threshold: Decimal) -> &'static str {
    if spread_annualized >= entry_threshold {
        STATUS_OPPORTUNITY
    } else if spread_annualized >= entry_threshold * Decimal::new(75, 2) {
        STATUS_APPROACHING
    } else {
        STATUS_NORMAL
    }
}

pub fn build_entry(pair: &FundingRatePair, entry_threshold: Decimal) -> RateWireEntry {
    let status = pair
        .best_pair
        .as_ref()
        .map(|best| classify_status(best.spread_annualized, entry_threshold))
        .unwrap_or(STATUS_NORMAL);

    RateWireEntry {
        symbol: pair.symbol.as_str().to_owned(),
        exchanges: pair
            .exchanges
            .iter()
            .map(|(exchange, data)| {
                (
                    exchange.as_str().to_owned(),
                    ExchangeRateWire {
                        funding_rate: data.rate.funding_rate,
                        mark_price: data.price,
                        original_funding_interval: data.original_funding_interval,
                    },
                )
            })
            .collect(),
        best_pair: pair.best_pair.as_ref().map(BestPairWire::from),
        status,
        timestamp: pair.recorded_at,
    }
}

/// Messages sent to every connected client, internally tagged by `type` (component design §6
/// "Outbound -- event surface"): `rates:update` and `rates:stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "rates:update")]
    RatesUpdate { rates: Vec<RateWireEntry>, timestamp: DateTime<Utc> },
    #[serde(rename = "rates:stats")]
    RatesStats(RatesCacheStats),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_classify_status_bands() {
        let threshold = dec!(800);
        assert_eq!(classify_status(dec!(900), threshold), STATUS_OPPORTUNITY);
        assert_eq!(classify_status(dec!(650), threshold), STATUS_APPROACHING);
        assert_eq!(classify_status(dec!(100), threshold), STATUS_NORMAL);
    }
}
