use crate::error::DataError;
use crate::model::{BestArbitragePair, ExchangeRateData, FundingIntervalHours, FundingRatePair};
use arb_instrument::exchange::ExchangeId;
use arb_instrument::symbol::Symbol;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Adverse price-direction tolerance used by [`is_price_direction_correct`] (component design
/// §4.4, default `0.0005`).
const ADVERSE_PRICE_DIFF_TOLERANCE: Decimal = Decimal::from_parts(5, 0, 0, false, 4);

const HOURS_PER_YEAR: i64 = 365 * 24;

/// Builds a [`FundingRatePair`] (with its selected [`BestArbitragePair`]) from per-exchange rate
/// data, under a configurable time basis (component design §4.4).
pub struct RatePairBuilder {
    pub basis: FundingIntervalHours,
}

impl Default for RatePairBuilder {
    fn default() -> Self {
        Self { basis: 8 }
    }
}

impl RatePairBuilder {
    pub fn new(basis: FundingIntervalHours) -> Self {
        Self { basis }
    }

    pub fn build(
        &self,
        symbol: Symbol,
        exchanges: BTreeMap<ExchangeId, ExchangeRateData>,
        recorded_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<FundingRatePair, DataError> {
        for data in exchanges.values() {
            if data.rate.symbol != symbol {
                return Err(DataError::InvalidInput(format!(
                    "exchange rate for {} does not belong to symbol {symbol}",
                    data.rate.exchange
                )));
            }
        }

        let best_pair = self.select_best_pair(&exchanges);
        FundingRatePair::new(symbol, exchanges, best_pair, recorded_at)
    }

    /// Select the unordered exchange pair maximising absolute normalised-rate spread. Iterates in
    /// [`ExchangeId`]'s canonical declared order (Binance, Okx, Mexc, Gateio, Bingx) for the
    /// tie-break, since `exchanges` is a `BTreeMap` ordered by that same key.
    fn select_best_pair(&self, exchanges: &BTreeMap<ExchangeId, ExchangeRateData>) -> Option<BestArbitragePair> {
        use itertools::Itertools;

        let normalized: Vec<(ExchangeId, Decimal)> = exchanges
            .iter()
            .map(|(id, data)| (*id, data.normalized_rate(self.basis)))
            .collect();

        let best = normalized.into_iter().tuple_combinations().fold(
            None,
            |acc: Option<(ExchangeId, ExchangeId, Decimal)>, ((id_a, rate_a), (id_b, rate_b))| {
                let spread = (rate_a - rate_b).abs();
                let is_better = acc.map(|(_, _, current)| spread > current).unwrap_or(true);
                if !is_better {
                    return acc;
                }
                let (long, short) = if rate_a < rate_b { (id_a, id_b) } else { (id_b, id_a) };
                Some((long, short, spread))
            },
        );

        let (long_exchange, short_exchange, max_spread) = best?;

        let long_data = &exchanges[&long_exchange];
        let short_data = &exchanges[&short_exchange];

        let spread_percent = max_spread * Decimal::ONE_HUNDRED;
        let spread_annualized =
            max_spread * Decimal::from(HOURS_PER_YEAR / self.basis as i64) * Decimal::ONE_HUNDRED;

        let price_diff_percent = match (long_data.price, short_data.price) {
            (Some(long_price), Some(short_price)) => {
                let avg = (long_price + short_price) / Decimal::TWO;
                if avg.is_zero() {
                    None
                } else {
                    Some((short_price - long_price) / avg * Decimal::ONE_HUNDRED)
                }
            }
            _ => None,
        };

        let is_price_direction_correct = match (long_data.price, short_data.price) {
            (Some(long_price), Some(short_price)) if !short_price.is_zero() => {
                let relative_diff = (short_price - long_price) / short_price;
                Some(relative_diff >= Decimal::ZERO || relative_diff.abs() <= ADVERSE_PRICE_DIFF_TOLERANCE)
            }
            _ => None,
        };

        BestArbitragePair::new(
            long_exchange,
            short_exchange,
            spread_percent,
            spread_annualized,
            price_diff_percent,
            is_price_direction_correct,
        )
        .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_instrument::symbol::Symbol;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn symbol(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn rate_data(exchange: ExchangeId, symbol_str: &str, rate: Decimal) -> ExchangeRateData {
        let record = crate::model::FundingRateRecord::new(
            exchange,
            symbol(symbol_str),
            rate,
            Utc::now(),
            None,
            None,
            Utc::now(),
        );
        let mut data = ExchangeRateData::new(record);
        data.original_funding_interval = Some(8);
        data
    }

    #[test]
    fn test_long_short_assignment() {
        let builder = RatePairBuilder::new(8);
        let mut exchanges = BTreeMap::new();
        exchanges.insert(ExchangeId::Binance, rate_data(ExchangeId::Binance, "BTCUSDT", dec!(0.01)));
        exchanges.insert(ExchangeId::Okx, rate_data(ExchangeId::Okx, "BTCUSDT", dec!(-0.02)));

        let pair = builder.build(symbol("BTCUSDT"), exchanges, Utc::now()).unwrap();
        let best = pair.best_pair.unwrap();

        assert_eq!(best.long_exchange, ExchangeId::Okx);
        assert_eq!(best.short_exchange, ExchangeId::Binance);
        assert_eq!(best.spread_percent, dec!(3.0));
    }

    #[test]
    fn test_symbol_mismatch_guard() {
        let builder = RatePairBuilder::new(8);
        let mut exchanges = BTreeMap::new();
        exchanges.insert(ExchangeId::Binance, rate_data(ExchangeId::Binance, "ETHUSDT", dec!(0.01)));

        let result = builder.build(symbol("BTCUSDT"), exchanges, Utc::now());
        assert!(matches!(result, Err(DataError::InvalidInput(_))));
    }

    #[test]
    fn test_no_exchanges_yields_no_best_pair() {
        let builder = RatePairBuilder::new(8);
        let pair = builder.build(symbol("BTCUSDT"), BTreeMap::new(), Utc::now()).unwrap();
        assert!(pair.best_pair.is_none());
    }
}
