//! Per-symbol wire-shape cache (component design §4.7 "Per-symbol format cache"). Rebuilding a
//! [`RateWireEntry`] from a [`FundingRatePair`] is cheap but not free; this bounds the work to
//! symbols whose shape-relevant fields actually changed since the last broadcast tick.

use crate::wire::{RateWireEntry, build_entry};
use arb_data::model::FundingRatePair;
use arb_instrument::symbol::Symbol;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const DEFAULT_CAPACITY: usize = 500;

struct Entry {
    key_hash: u64,
    wire: Arc<RateWireEntry>,
}

/// Bounded insertion-order map, keyed by symbol, storing the last-built wire entry alongside a
/// hash of the fields that determine its shape. On overflow the oldest entry is evicted (same
/// discipline as [`arb_data::client::price_lru::PriceLru`]).
pub struct FormatCache {
    capacity: usize,
    entries: IndexMap<Symbol, Entry>,
}

impl FormatCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, entries: IndexMap::new() }
    }

    /// Return the wire entry for `pair`, reusing the cached `Arc` when its key hash is unchanged,
    /// otherwise rebuilding and replacing it.
    pub fn get_or_build(&mut self, pair: &FundingRatePair, entry_threshold: Decimal) -> Arc<RateWireEntry> {
        let key_hash = Self::key_hash(pair);

        if let Some(existing) = self.entries.get(&pair.symbol) {
            if existing.key_hash == key_hash {
                return existing.wire.clone();
            }
        }

        let wire = Arc::new(build_entry(pair, entry_threshold));
        if !self.entries.contains_key(&pair.symbol) && self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(pair.symbol.clone(), Entry { key_hash, wire: wire.clone() });
        wire
    }

    /// Drop any cached symbol absent from the current snapshot (component design §4.7 "Evict
    /// symbols that no longer appear in the current snapshot").
    pub fn evict_missing(&mut self, present: &BTreeSet<Symbol>) {
        let stale: Vec<Symbol> = self.entries.keys().filter(|symbol| !present.contains(symbol)).cloned().collect();
        for symbol in stale {
            self.entries.shift_remove(&symbol);
        }
    }

    fn key_hash(pair: &FundingRatePair) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        pair.recorded_at.timestamp_nanos_opt().unwrap_or(0).hash(&mut hasher);
        match &pair.best_pair {
            Some(best) => {
                best.spread_percent.hash(&mut hasher);
                best.spread_annualized.hash(&mut hasher);
            }
            None => "none".hash(&mut hasher),
        }
        pair.exchanges.len().hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for FormatCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_data::model::{BestArbitragePair, FundingRateRecord};
    use arb_instrument::exchange::ExchangeId;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn symbol(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn pair_with_spread(symbol_str: &str, spread: Decimal, recorded_at: chrono::DateTime<Utc>) -> FundingRatePair {
        let record = FundingRateRecord::new(ExchangeId::Binance, symbol(symbol_str), dec!(0.0001), Utc::now(), None, None, recorded_at);
        let mut exchanges = BTreeMap::new();
        exchanges.insert(ExchangeId::Binance, arb_data::model::ExchangeRateData::new(record));
        let best = BestArbitragePair::new(ExchangeId::Binance, ExchangeId::Okx, spread, spread, None, None).unwrap();
        FundingRatePair::new(symbol(symbol_str), exchanges, Some(best), recorded_at).unwrap()
    }

    #[test]
    fn test_reuses_arc_when_key_unchanged() {
        let mut cache = FormatCache::new();
        let recorded_at = Utc::now();
        let pair = pair_with_spread("BTCUSDT", dec!(1.0), recorded_at);

        let first = cache.get_or_build(&pair, dec!(800));
        let second = cache.get_or_build(&pair, dec!(800));

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_rebuilds_when_spread_changes() {
        let mut cache = FormatCache::new();
        let recorded_at = Utc::now();
        let pair_a = pair_with_spread("BTCUSDT", dec!(1.0), recorded_at);
        let pair_b = pair_with_spread("BTCUSDT", dec!(2.0), recorded_at);

        let first = cache.get_or_build(&pair_a, dec!(800));
        let second = cache.get_or_build(&pair_b, dec!(800));

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.best_pair.unwrap().spread_percent, dec!(2.0));
    }

    #[test]
    fn test_evict_missing_drops_absent_symbols() {
        let mut cache = FormatCache::new();
        let recorded_at = Utc::now();
        cache.get_or_build(&pair_with_spread("BTCUSDT", dec!(1.0), recorded_at), dec!(800));
        cache.get_or_build(&pair_with_spread("ETHUSDT", dec!(1.0), recorded_at), dec!(800));

        let mut present = BTreeSet::new();
        present.insert(symbol("BTCUSDT"));
        cache.evict_missing(&present);

        assert_eq!(cache.entries.len(), 1);
        assert!(cache.entries.contains_key(&symbol("BTCUSDT")));
    }
}
