use crate::cache::RatesCache;
use crate::client::{ClientEvent, ClientFactory};
use crate::coalesce::CoalesceQueue;
use crate::config::EngineConfig;
use crate::model::{ExchangeRateData, FundingRatePair, FundingRateRecord};
use crate::pair_builder::RatePairBuilder;
use crate::pool::ConnectionPool;
use arb_instrument::exchange::ExchangeId;
use arb_instrument::symbol::Symbol;
use arb_integration::channel::{Tx, UnboundedRx, UnboundedTx, mpsc_unbounded};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct Inner {
    cache: Arc<RatesCache>,
    builder: RatePairBuilder,
    pools: BTreeMap<ExchangeId, ConnectionPool>,
    symbol_rates: RwLock<BTreeMap<Symbol, BTreeMap<ExchangeId, ExchangeRateData>>>,
    dirty: RwLock<BTreeSet<Symbol>>,
    coalesce: CoalesceQueue<()>,
    rate_updated_tx: UnboundedTx<FundingRatePair>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    destroyed: AtomicBool,
    /// Below this (raw fraction, not annualised) spread a built pair is considered noise and
    /// neither cached nor emitted on `rate-updated` (component design §4.5 "Configuration").
    min_spread_threshold: Decimal,
    /// When false, incoming `MarkPrice` events are dropped: `priceDiffPercent` /
    /// `isPriceDirectionCorrect` then stay `None` for every pair (component design §4.5/§6
    /// `ENABLE_PRICE_MONITOR`).
    enable_price_monitor: bool,
}

impl Inner {
    fn handle_client_event(&self, exchange: ExchangeId, event: ClientEvent) {
        match event {
            ClientEvent::FundingRate(received) => {
                let Some(funding_rate) = received.funding_rate else {
                    return;
                };
                let symbol = received.symbol.clone();
                {
                    let mut rates = self.symbol_rates.write();
                    let per_exchange = rates.entry(symbol.clone()).or_default();
                    let prior_interval = per_exchange.get(&exchange).and_then(|data| data.original_funding_interval);

                    let record = FundingRateRecord::new(
                        exchange,
                        symbol.clone(),
                        funding_rate,
                        received.next_funding_time,
                        received.mark_price,
                        None,
                        received.received_at,
                    );
                    let mut data = ExchangeRateData::new(record);
                    data.original_funding_interval = prior_interval.or_else(|| Some(u32::from(exchange.default_funding_interval_hours())));
                    per_exchange.insert(exchange, data);
                }
                self.mark_dirty_and_coalesce(symbol);
            }
            ClientEvent::MarkPrice { symbol, price } => {
                if !self.enable_price_monitor {
                    return;
                }
                let updated = {
                    let mut rates = self.symbol_rates.write();
                    match rates.get_mut(&symbol).and_then(|per_exchange| per_exchange.get_mut(&exchange)) {
                        Some(data) => {
                            data.price = Some(price);
                            true
                        }
                        None => false,
                    }
                };
                if updated {
                    self.mark_dirty_and_coalesce(symbol);
                }
            }
            ClientEvent::Error(message) => warn!(exchange = %exchange, message, "exchange client reported an error"),
            ClientEvent::Reconnecting { attempt } => info!(exchange = %exchange, attempt, "exchange client reconnecting"),
            ClientEvent::MaxRetriesReached => warn!(exchange = %exchange, "exchange client exhausted reconnection attempts"),
            ClientEvent::Connected => info!(exchange = %exchange, "exchange client connected"),
            ClientEvent::Disconnected => info!(exchange = %exchange, "exchange client disconnected"),
            ClientEvent::Resubscribed { count } => info!(exchange = %exchange, count, "exchange client resubscribed"),
            ClientEvent::ConnectionCountChanged(count) => info!(exchange = %exchange, count, "pool connection count changed"),
        }
    }

    fn mark_dirty_and_coalesce(&self, symbol: Symbol) {
        self.dirty.write().insert(symbol.clone());
        self.coalesce.push(symbol, ());
    }

    /// Build the best pair for `symbol` from its current per-exchange state, apply the validated-
    /// coalescing guard, write the cache and emit `rate-updated` (component design §4.4/§4.5/§9).
    async fn process_symbol(&self, symbol: Symbol) {
        let snapshot = self.symbol_rates.read().get(&symbol).cloned();
        let Some(exchanges) = snapshot else {
            return;
        };
        if exchanges.is_empty() {
            return;
        }

        let now = Utc::now();
        let pair = match self.builder.build(symbol.clone(), exchanges, now) {
            Ok(pair) => pair,
            Err(error) => {
                warn!(%symbol, %error, "failed to build funding rate pair");
                return;
            }
        };

        // Min-spread gate (component design §4.5 "Configuration"): a pair whose spread sits below
        // the configured floor carries no actionable signal and is neither cached nor emitted.
        if let Some(best) = &pair.best_pair {
            if best.spread_percent < self.min_spread_threshold * Decimal::ONE_HUNDRED {
                return;
            }
        }

        // Validated coalescing (component design §9 open question): strictly-newer writes only.
        if let Some(existing) = self.cache.get(&symbol) {
            if pair.recorded_at <= existing.recorded_at {
                return;
            }
        }

        if let Err(error) = self.cache.set(symbol.clone(), pair.clone()) {
            warn!(%symbol, %error, "failed to write funding rate pair to cache");
            return;
        }

        self.dirty.write().remove(&symbol);
        let _ = self.rate_updated_tx.send(pair);
    }

    async fn run_ticker(self: Arc<Self>, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let dirty: Vec<Symbol> = {
                let mut dirty = self.dirty.write();
                std::mem::take(&mut *dirty).into_iter().collect()
            };
            for symbol in dirty {
                self.process_symbol(symbol).await;
            }
        }
    }
}

/// Top-level coordinator: one [`ConnectionPool`] per configured exchange, per-symbol write
/// coalescing, the rate-pair builder, the rates cache and a `rate-updated` fan-out for attached
/// consumers such as the [`crate::tracker::OpportunityTracker`] (component design §4.5).
pub struct FundingRateMonitor {
    inner: Arc<Inner>,
    config: EngineConfig,
}

impl FundingRateMonitor {
    pub fn new(
        config: EngineConfig,
        cache: Arc<RatesCache>,
        mut factories: BTreeMap<ExchangeId, Box<dyn ClientFactory>>,
    ) -> (Self, UnboundedRx<FundingRatePair>) {
        let (rate_updated_tx, rate_updated_rx) = mpsc_unbounded::<FundingRatePair>();
        let (coalesce_tx, coalesce_rx) = tokio::sync::mpsc::unbounded_channel();
        let coalesce = CoalesceQueue::new(coalesce_tx);

        let mut pools = BTreeMap::new();
        let mut pool_rxs = Vec::new();
        for exchange in config.monitored_exchanges.clone() {
            if let Some(factory) = factories.remove(&exchange) {
                let (pool, pool_rx) = ConnectionPool::new(exchange, config.max_subscriptions_per_connection, true, factory);
                pools.insert(exchange, pool);
                pool_rxs.push((exchange, pool_rx));
            }
        }

        let inner = Arc::new(Inner {
            cache,
            builder: RatePairBuilder::default(),
            pools,
            symbol_rates: RwLock::new(BTreeMap::new()),
            dirty: RwLock::new(BTreeSet::new()),
            coalesce,
            rate_updated_tx,
            tasks: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
            min_spread_threshold: config.min_spread_threshold,
            enable_price_monitor: config.enable_price_monitor,
        });

        for (exchange, mut pool_rx) in pool_rxs {
            let task_inner = Arc::clone(&inner);
            let handle = tokio::spawn(async move {
                while let Some(pool_event) = pool_rx.recv().await {
                    task_inner.handle_client_event(exchange, pool_event.event);
                }
            });
            inner.tasks.lock().push(handle);
        }

        let coalesce_inner = Arc::clone(&inner);
        let coalesce_handle = tokio::spawn(async move {
            let mut rx = coalesce_rx;
            while let Some((symbol, ())) = rx.recv().await {
                coalesce_inner.process_symbol(symbol).await;
            }
        });
        inner.tasks.lock().push(coalesce_handle);

        let ticker_inner = Arc::clone(&inner);
        let ticker_interval = config.funding_rate_check_interval;
        let ticker_handle = tokio::spawn(Inner::run_ticker(ticker_inner, ticker_interval));
        inner.tasks.lock().push(ticker_handle);

        (Self { inner, config }, rate_updated_rx)
    }

    /// Subscribe every configured exchange pool to `symbols`. A pool whose dial fails is logged
    /// and skipped; the remaining pools continue (component design §8 scenario S5).
    pub async fn start(&self, symbols: &[Symbol]) {
        self.inner.cache.mark_start();
        for (exchange, pool) in &self.inner.pools {
            if let Err(error) = pool.subscribe_all(symbols).await {
                warn!(exchange = %exchange, %error, "pool failed to subscribe all symbols, continuing with remaining exchanges");
            }
        }
    }

    pub fn is_ready(&self, exchange: ExchangeId) -> bool {
        self.inner.pools.get(&exchange).map(|pool| pool.is_ready()).unwrap_or(false)
    }

    pub fn cache(&self) -> &Arc<RatesCache> {
        &self.inner.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stop the ticker and coalesce/pool consumer tasks, then disconnect and destroy every pool
    /// (component design §4.5 "Shutdown").
    pub async fn shutdown(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        for pool in self.inner.pools.values() {
            pool.disconnect().await;
            pool.destroy();
        }
    }
}
