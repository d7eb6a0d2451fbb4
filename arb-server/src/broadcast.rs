//! Diff-broadcast ticker (component design §4.7 "Two diff streams"). Recomputes the `rates:update`
//! and `rates:stats` payloads on every tick, but only sends a message when the payload's hash has
//! actually changed since the previous tick, and skips all computation when nobody is listening.

use crate::format_cache::FormatCache;
use crate::wire::ServerMessage;
use arb_data::monitor::FundingRateMonitor;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// Drive the periodic snapshot push. Runs until the process exits; the monitor's own shutdown
/// does not stop this loop (the caller is expected to abort the enclosing task).
pub async fn run(monitor: Arc<FundingRateMonitor>, tx: broadcast::Sender<ServerMessage>, interval: Duration, entry_threshold: Decimal) {
    let mut ticker = tokio::time::interval(interval);
    let mut format_cache = FormatCache::new();
    let mut last_update_hash: Option<u64> = None;
    let mut last_stats_hash: Option<u64> = None;

    loop {
        ticker.tick().await;

        if tx.receiver_count() == 0 {
            continue;
        }

        let rates = monitor.cache().get_all();
        let present: BTreeSet<_> = rates.iter().map(|pair| pair.symbol.clone()).collect();
        format_cache.evict_missing(&present);

        let entries: Vec<_> = rates
            .iter()
            .map(|pair| (*format_cache.get_or_build(pair, entry_threshold)).clone())
            .collect();

        if let Ok(bytes) = serde_json::to_vec(&entries) {
            let update_hash = hash_bytes(&bytes);
            if last_update_hash != Some(update_hash) {
                last_update_hash = Some(update_hash);
                let _ = tx.send(ServerMessage::RatesUpdate { rates: entries, timestamp: Utc::now() });
            } else {
                debug!("rates:update unchanged, skipping broadcast");
            }
        }

        let stats = monitor.cache().get_stats(Some(&rates), Some(entry_threshold));
        if let Ok(bytes) = serde_json::to_vec(&stats) {
            let stats_hash = hash_bytes(&bytes);
            if last_stats_hash != Some(stats_hash) {
                last_stats_hash = Some(stats_hash);
                let _ = tx.send(ServerMessage::RatesStats(stats));
            } else {
                debug!("rates:stats unchanged, skipping broadcast");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_data::cache::RatesCache;
    use arb_data::client::ClientFactory;
    use arb_data::config::EngineConfig;
    use arb_instrument::exchange::ExchangeId;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_skips_send_when_no_subscribers() {
        let config = EngineConfig { monitored_exchanges: vec![], ..EngineConfig::default() };
        let cache = Arc::new(RatesCache::new());
        let factories: BTreeMap<ExchangeId, Box<dyn ClientFactory>> = BTreeMap::new();
        let (monitor, _rx) = FundingRateMonitor::new(config, cache.clone(), factories);
        let monitor = Arc::new(monitor);

        let (tx, rx) = broadcast::channel::<ServerMessage>(16);
        drop(rx);
        let handle = tokio::spawn(run(monitor.clone(), tx.clone(), Duration::from_millis(5), dec!(800)));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(tx.receiver_count(), 0);

        handle.abort();
    }
}
