use crate::error::DataError;
use crate::model::{ActiveOpportunity, FundingRatePair, OpportunityKey};
use arb_instrument::symbol::Symbol;
use arb_integration::channel::UnboundedRx;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::error;

pub const DEFAULT_ENTRY_THRESHOLD: Decimal = Decimal::from_parts(800, 0, 0, false, 0);
pub const DEFAULT_EXIT_THRESHOLD: Decimal = Decimal::ZERO;

/// Persistence port for opportunity lifecycle events (component design §4.6/§9 "explicit
/// ports"). An in-memory implementation is provided for tests and standalone runs.
#[async_trait]
pub trait OpportunityRepository: Send + Sync {
    async fn upsert(&self, opportunity: &ActiveOpportunity) -> Result<(), DataError>;

    async fn mark_as_ended(&self, key: OpportunityKey, final_spread: Decimal, final_apy: Decimal) -> Result<(), DataError>;
}

/// Reference in-memory [`OpportunityRepository`]. Do not use in production - state is lost on
/// process exit.
#[derive(Default)]
pub struct InMemoryOpportunityRepository {
    upserts: Mutex<Vec<ActiveOpportunity>>,
    ended: Mutex<Vec<(OpportunityKey, Decimal, Decimal)>>,
}

impl InMemoryOpportunityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upserts(&self) -> Vec<ActiveOpportunity> {
        self.upserts.lock().clone()
    }

    pub fn ended(&self) -> Vec<(OpportunityKey, Decimal, Decimal)> {
        self.ended.lock().clone()
    }
}

#[async_trait]
impl OpportunityRepository for InMemoryOpportunityRepository {
    async fn upsert(&self, opportunity: &ActiveOpportunity) -> Result<(), DataError> {
        self.upserts.lock().push(opportunity.clone());
        Ok(())
    }

    async fn mark_as_ended(&self, key: OpportunityKey, final_spread: Decimal, final_apy: Decimal) -> Result<(), DataError> {
        self.ended.lock().push((key, final_spread, final_apy));
        Ok(())
    }
}

/// Running counters exposed by [`OpportunityTracker::stats`] (component design §4.6 "Stats").
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackerStats {
    pub opportunities_recorded: u64,
    pub opportunities_ended: u64,
    pub last_recorded_at: Option<DateTime<Utc>>,
    pub errors: u64,
}

/// Observes a `rate-updated` stream and maintains the hysteresis-gated active-opportunity state
/// machine keyed by `(symbol, longExchange, shortExchange)` (component design §4.6).
pub struct OpportunityTracker {
    entry_threshold: Decimal,
    exit_threshold: Decimal,
    repository: Arc<dyn OpportunityRepository>,
    active: RwLock<BTreeMap<OpportunityKey, ActiveOpportunity>>,
    stats: RwLock<TrackerStats>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OpportunityTracker {
    pub fn new(repository: Arc<dyn OpportunityRepository>) -> Self {
        Self::with_thresholds(repository, DEFAULT_ENTRY_THRESHOLD, DEFAULT_EXIT_THRESHOLD)
    }

    pub fn with_thresholds(repository: Arc<dyn OpportunityRepository>, entry_threshold: Decimal, exit_threshold: Decimal) -> Self {
        Self {
            entry_threshold,
            exit_threshold,
            repository,
            active: RwLock::new(BTreeMap::new()),
            stats: RwLock::new(TrackerStats::default()),
            handle: Mutex::new(None),
        }
    }

    /// Bind a single named handler to `rx`, storing its `JoinHandle` so `detach` can abort it by
    /// identity rather than removing a callback from a list by reference equality (component
    /// design §9).
    pub fn attach(self: &Arc<Self>, mut rx: UnboundedRx<FundingRatePair>) {
        let tracker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(pair) = rx.recv().await {
                tracker.handle_rate_updated(&pair).await;
            }
        });
        *self.handle.lock() = Some(handle);
    }

    pub fn detach(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    pub async fn handle_rate_updated(&self, pair: &FundingRatePair) {
        let Some(best) = &pair.best_pair else {
            return;
        };

        let key = OpportunityKey {
            symbol: pair.symbol.clone(),
            long_exchange: best.long_exchange,
            short_exchange: best.short_exchange,
        };
        let apy = best.spread_annualized;
        let was_active = self.active.read().contains_key(&key);

        if !was_active && apy >= self.entry_threshold {
            let opportunity = ActiveOpportunity {
                symbol: key.symbol.clone(),
                long_exchange: key.long_exchange,
                short_exchange: key.short_exchange,
                last_spread: best.spread_percent,
                last_apy: apy,
                detected_at: Utc::now(),
            };
            if let Err(error) = self.repository.upsert(&opportunity).await {
                self.record_error(&key, &error);
            }
            self.active.write().insert(key, opportunity);
            let mut stats = self.stats.write();
            stats.opportunities_recorded += 1;
            stats.last_recorded_at = Some(Utc::now());
        } else if was_active && apy >= self.exit_threshold {
            let snapshot = {
                let mut active = self.active.write();
                active.get_mut(&key).map(|opportunity| {
                    opportunity.last_spread = best.spread_percent;
                    opportunity.last_apy = apy;
                    opportunity.clone()
                })
            };
            if let Some(opportunity) = snapshot {
                if let Err(error) = self.repository.upsert(&opportunity).await {
                    self.record_error(&key, &error);
                }
            }
            self.stats.write().last_recorded_at = Some(Utc::now());
        } else if was_active {
            if let Some(opportunity) = self.active.write().remove(&key) {
                if let Err(error) = self
                    .repository
                    .mark_as_ended(key.clone(), opportunity.last_spread, opportunity.last_apy)
                    .await
                {
                    self.record_error(&key, &error);
                }
                self.stats.write().opportunities_ended += 1;
            }
        }
        // None -> None: APY sits in the hysteresis band without prior active state, no-op.
    }

    fn record_error(&self, key: &OpportunityKey, error: &DataError) {
        error!(
            symbol = %key.symbol,
            long_exchange = %key.long_exchange,
            short_exchange = %key.short_exchange,
            %error,
            "opportunity repository operation failed"
        );
        self.stats.write().errors += 1;
    }

    pub fn stats(&self) -> TrackerStats {
        *self.stats.read()
    }

    pub fn active_opportunities_count(&self) -> usize {
        self.active.read().len()
    }

    pub fn top_apy(&self) -> Option<Decimal> {
        self.active.read().values().map(|opportunity| opportunity.last_apy).max()
    }

    /// Legacy symbol-wide close, exposed as a separate explicit method rather than wired into the
    /// `rate-updated` path (component design §9 open question).
    pub async fn close_all_for_symbol(&self, symbol: &Symbol) {
        let keys: Vec<OpportunityKey> = self
            .active
            .read()
            .keys()
            .filter(|key| &key.symbol == symbol)
            .cloned()
            .collect();

        for key in keys {
            if let Some(opportunity) = self.active.write().remove(&key) {
                if let Err(error) = self
                    .repository
                    .mark_as_ended(key.clone(), opportunity.last_spread, opportunity.last_apy)
                    .await
                {
                    self.record_error(&key, &error);
                }
                self.stats.write().opportunities_ended += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BestArbitragePair;
    use arb_instrument::exchange::ExchangeId;
    use rust_decimal_macros::dec;

    fn symbol(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn pair_with_apy(apy: Decimal) -> FundingRatePair {
        let best = BestArbitragePair::new(ExchangeId::Binance, ExchangeId::Okx, dec!(1.0), apy, None, None).unwrap();
        FundingRatePair::new(symbol("BTCUSDT"), BTreeMap::new(), Some(best), Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_hysteresis_single_detect_and_end() {
        let repository = Arc::new(InMemoryOpportunityRepository::new());
        let tracker = OpportunityTracker::new(repository.clone());

        for apy in [850, 700, 500, 100, -10, 50] {
            tracker.handle_rate_updated(&pair_with_apy(Decimal::from(apy))).await;
        }

        assert_eq!(repository.upserts().len(), 4);
        assert_eq!(repository.ended().len(), 1);
        assert_eq!(tracker.stats().opportunities_recorded, 1);
        assert_eq!(tracker.stats().opportunities_ended, 1);
        assert_eq!(tracker.active_opportunities_count(), 0);
    }

    #[tokio::test]
    async fn test_detach_stops_further_processing() {
        use arb_integration::channel::{Tx, mpsc_unbounded};

        let repository = Arc::new(InMemoryOpportunityRepository::new());
        let tracker = Arc::new(OpportunityTracker::new(repository.clone()));
        let (tx, rx) = mpsc_unbounded::<FundingRatePair>();

        tracker.attach(rx);
        tracker.detach();

        let _ = tx.send(pair_with_apy(dec!(1000)));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(tracker.stats().opportunities_recorded, 0);
    }

    #[tokio::test]
    async fn test_no_best_pair_is_ignored() {
        let repository = Arc::new(InMemoryOpportunityRepository::new());
        let tracker = OpportunityTracker::new(repository.clone());

        let pair = FundingRatePair::new(symbol("BTCUSDT"), BTreeMap::new(), None, Utc::now()).unwrap();
        tracker.handle_rate_updated(&pair).await;

        assert_eq!(tracker.active_opportunities_count(), 0);
    }
}
