use crate::error::DataError;
use crate::model::{CachedRatePair, ExchangeRateData, FundingRatePair, FundingRateReceived};
use arb_instrument::exchange::ExchangeId;
use arb_instrument::symbol::Symbol;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

pub const STALE_THRESHOLD: chrono::Duration = chrono::Duration::seconds(600);
pub const CLEANUP_INTERVAL_SECS: u64 = 60;
const DEFAULT_OPPORTUNITY_THRESHOLD: Decimal = Decimal::from_parts(800, 0, 0, false, 0);

/// Summary statistics over the cache's current contents (component design §4.3 "Stats").
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RatesCacheStats {
    pub total_symbols: usize,
    pub opportunity_count: usize,
    pub approaching_count: usize,
    pub max_spread: Option<(Symbol, Decimal)>,
    pub uptime_secs: i64,
    pub last_update: Option<DateTime<Utc>>,
}

/// A hook invoked fire-and-forget by [`RatesCache::set_all`] (component design §4.3 "Notification
/// hook"). Errors are logged by the caller, never propagated.
pub trait CacheObserver: Send + Sync {
    fn on_set_all(&self, pairs: &[FundingRatePair]);
}

/// Process-wide keyed store of the latest per-symbol pair state, with staleness eviction and
/// update coalescing (component design §4.3).
///
/// Guaranteed at most one instance per process via [`crate::monitor::FundingRateMonitor`]'s
/// ownership of a single cache handle; `destroy()` is the test-teardown escape hatch (component
/// design §9 "Process-wide singletons").
pub struct RatesCache {
    entries: RwLock<BTreeMap<Symbol, CachedRatePair>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    observers: RwLock<Vec<Box<dyn CacheObserver>>>,
    destroyed: AtomicBool,
}

impl RatesCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            started_at: RwLock::new(None),
            observers: RwLock::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn register_observer(&self, observer: Box<dyn CacheObserver>) {
        self.observers.write().push(observer);
    }

    pub fn mark_start(&self) {
        *self.started_at.write() = Some(Utc::now());
    }

    fn ensure_not_destroyed(&self) -> Result<(), DataError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(DataError::CacheDestroyed);
        }
        Ok(())
    }

    pub fn set(&self, symbol: Symbol, pair: FundingRatePair) -> Result<(), DataError> {
        self.ensure_not_destroyed()?;
        self.entries.write().insert(symbol, CachedRatePair::new(pair, Utc::now()));
        Ok(())
    }

    pub fn set_all(&self, pairs: Vec<FundingRatePair>) -> Result<(), DataError> {
        self.ensure_not_destroyed()?;
        let now = Utc::now();
        {
            let mut entries = self.entries.write();
            for pair in &pairs {
                entries.insert(pair.symbol.clone(), CachedRatePair::new(pair.clone(), now));
            }
        }

        for observer in self.observers.read().iter() {
            observer.on_set_all(&pairs);
        }
        Ok(())
    }

    /// Fold a raw exchange event into the cache (component design §4.3 "updateFromWebSocket").
    /// Drops the update if `funding_rate` is absent; otherwise creates or overwrites the entry
    /// for `event.exchange`, preserving a prior `originalFundingInterval` when the event omits
    /// one. Does not recompute `bestPair` - that is the pair builder's responsibility.
    pub fn update_from_websocket(&self, event: FundingRateReceived) -> Result<(), DataError> {
        self.ensure_not_destroyed()?;

        let Some(funding_rate) = event.funding_rate else {
            return Ok(());
        };

        let mut entries = self.entries.write();
        let now = Utc::now();

        match entries.get_mut(&event.symbol) {
            Some(cached) => {
                let prior_interval = cached
                    .pair
                    .exchanges
                    .get(&event.exchange)
                    .and_then(|data| data.original_funding_interval);

                let record = crate::model::FundingRateRecord::new(
                    event.exchange,
                    event.symbol.clone(),
                    funding_rate,
                    event.next_funding_time,
                    event.mark_price,
                    None,
                    now,
                );
                let mut data = ExchangeRateData::new(record);
                data.original_funding_interval = prior_interval.or_else(|| Some(u32::from(event.exchange.default_funding_interval_hours())));

                cached.pair.exchanges.insert(event.exchange, data);
                cached.cached_at = now;
            }
            None => {
                let record = crate::model::FundingRateRecord::new(
                    event.exchange,
                    event.symbol.clone(),
                    funding_rate,
                    event.next_funding_time,
                    event.mark_price,
                    None,
                    now,
                );
                let mut exchanges = BTreeMap::new();
                let mut data = ExchangeRateData::new(record);
                data.original_funding_interval = Some(u32::from(event.exchange.default_funding_interval_hours()));
                exchanges.insert(event.exchange, data);

                let pair = FundingRatePair::new(event.symbol.clone(), exchanges, None, now)?;
                entries.insert(event.symbol, CachedRatePair::new(pair, now));
            }
        }

        Ok(())
    }

    /// Read a single symbol, evicting it first if stale (component design §4.3 "Staleness
    /// policy" - every read path must evict, not merely skip).
    pub fn get(&self, symbol: &Symbol) -> Option<FundingRatePair> {
        self.evict_stale_single(symbol);
        self.entries.read().get(symbol).map(|cached| cached.pair.clone())
    }

    fn evict_stale_single(&self, symbol: &Symbol) {
        let is_stale = self
            .entries
            .read()
            .get(symbol)
            .map(|cached| cached.is_stale(Utc::now(), STALE_THRESHOLD))
            .unwrap_or(false);

        if is_stale {
            self.entries.write().remove(symbol);
        }
    }

    /// Read every cached pair, evicting any stale entries encountered along the way.
    pub fn get_all(&self) -> Vec<FundingRatePair> {
        let evicted = self.sweep_stale();
        if evicted > 0 {
            info!(evicted, "evicted stale cache entries on read");
        }
        self.entries.read().values().map(|cached| cached.pair.clone()).collect()
    }

    /// Periodic sweep (component design §4.3, run every 60s by the caller's timer).
    pub fn sweep_stale(&self) -> usize {
        let now = Utc::now();
        let stale_symbols: Vec<Symbol> = self
            .entries
            .read()
            .iter()
            .filter(|(_, cached)| cached.is_stale(now, STALE_THRESHOLD))
            .map(|(symbol, _)| symbol.clone())
            .collect();

        if stale_symbols.is_empty() {
            return 0;
        }

        let mut entries = self.entries.write();
        for symbol in &stale_symbols {
            entries.remove(symbol);
        }
        stale_symbols.len()
    }

    pub fn get_stats(&self, rates: Option<&[FundingRatePair]>, opportunity_threshold: Option<Decimal>) -> RatesCacheStats {
        let threshold = opportunity_threshold.unwrap_or(DEFAULT_OPPORTUNITY_THRESHOLD);
        let owned;
        let pairs: &[FundingRatePair] = match rates {
            Some(rates) => rates,
            None => {
                owned = self.get_all();
                &owned
            }
        };

        let mut opportunity_count = 0;
        let mut approaching_count = 0;
        let mut max_spread: Option<(Symbol, Decimal)> = None;
        let mut last_update: Option<DateTime<Utc>> = None;

        for pair in pairs {
            if let Some(best) = &pair.best_pair {
                if best.spread_annualized >= threshold {
                    opportunity_count += 1;
                } else if best.spread_annualized >= threshold * Decimal::new(75, 2) {
                    approaching_count += 1;
                }

                let is_new_max = max_spread
                    .as_ref()
                    .map(|(_, spread)| best.spread_percent > *spread)
                    .unwrap_or(true);
                if is_new_max {
                    max_spread = Some((pair.symbol.clone(), best.spread_annualized));
                }
            }

            last_update = match last_update {
                Some(current) if current >= pair.recorded_at => Some(current),
                _ => Some(pair.recorded_at),
            };
        }

        let uptime_secs = self
            .started_at
            .read()
            .map(|start| (Utc::now() - start).num_seconds())
            .unwrap_or(0);

        RatesCacheStats {
            total_symbols: pairs.len(),
            opportunity_count,
            approaching_count,
            max_spread,
            uptime_secs,
            last_update,
        }
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    /// Synchronous teardown escape hatch for tests (component design §4.3 "Singleton
    /// guarantee").
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.clear();
    }
}

impl Default for RatesCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn symbol(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn pair(symbol_str: &str, recorded_at: DateTime<Utc>) -> FundingRatePair {
        FundingRatePair::new(symbol(symbol_str), BTreeMap::new(), None, recorded_at).unwrap()
    }

    #[test]
    fn test_staleness_eviction_on_get_all() {
        let cache = RatesCache::new();
        let stale_time = Utc::now() - chrono::Duration::seconds(601);
        cache.entries.write().insert(
            symbol("BTCUSDT"),
            CachedRatePair::new(pair("BTCUSDT", stale_time), stale_time),
        );

        assert!(cache.get_all().is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_update_from_websocket_creates_new_entry() {
        let cache = RatesCache::new();
        let event = FundingRateReceived {
            exchange: ExchangeId::Binance,
            symbol: symbol("BTCUSDT"),
            funding_rate: Some(dec!(0.0001)),
            next_funding_time: Utc::now(),
            next_funding_rate: None,
            mark_price: Some(dec!(60000)),
            source: FundingRateReceived::SOURCE_WEBSOCKET,
            received_at: Utc::now(),
        };

        cache.update_from_websocket(event).unwrap();

        let cached = cache.get(&symbol("BTCUSDT")).unwrap();
        assert_eq!(cached.exchanges.len(), 1);
        assert_eq!(
            cached.exchanges[&ExchangeId::Binance].rate.funding_rate,
            dec!(0.0001)
        );
    }

    #[test]
    fn test_update_from_websocket_drops_when_rate_absent() {
        let cache = RatesCache::new();
        let event = FundingRateReceived {
            exchange: ExchangeId::Binance,
            symbol: symbol("BTCUSDT"),
            funding_rate: None,
            next_funding_time: Utc::now(),
            next_funding_rate: None,
            mark_price: Some(dec!(60000)),
            source: FundingRateReceived::SOURCE_WEBSOCKET,
            received_at: Utc::now(),
        };

        cache.update_from_websocket(event).unwrap();
        assert!(cache.get(&symbol("BTCUSDT")).is_none());
    }

    #[test]
    fn test_destroyed_cache_rejects_writes() {
        let cache = RatesCache::new();
        cache.destroy();

        let result = cache.set(symbol("BTCUSDT"), pair("BTCUSDT", Utc::now()));
        assert!(matches!(result, Err(DataError::CacheDestroyed)));
    }
}
