use std::collections::VecDeque;

/// Valid range for a latency sample, in milliseconds. Samples outside this range are discarded
/// rather than skewing the window - a negative value means clocks are not comparable, and
/// anything above a minute is almost certainly a stale/misparsed server timestamp rather than a
/// genuine network delay (see component design §4.1 - latency tracking).
const VALID_RANGE_MS: std::ops::RangeInclusive<i64> = 0..=60_000;

/// Bounded window of exchange-message latency samples (receive time minus server time), with
/// avg/P50/P95/P99/min/max/count summary statistics.
///
/// Not thread-safe by itself - callers that share a tracker across tasks wrap it in a
/// `parking_lot::Mutex` (see `arb_data::client::PriceCache` and its siblings for the pattern).
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    samples: VecDeque<i64>,
    capacity: usize,
}

/// Snapshot of [`LatencyTracker`] summary statistics, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct LatencyStats {
    pub avg_ms: f64,
    pub p50_ms: i64,
    pub p95_ms: i64,
    pub p99_ms: i64,
    pub min_ms: i64,
    pub max_ms: i64,
    pub count: usize,
}

impl LatencyTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a latency sample in milliseconds. Silently discarded if outside [`VALID_RANGE_MS`].
    pub fn record(&mut self, latency_ms: i64) {
        if !VALID_RANGE_MS.contains(&latency_ms) {
            return;
        }

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    pub fn stats(&self) -> Option<LatencyStats> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<i64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: i64 = sorted.iter().sum();

        Some(LatencyStats {
            avg_ms: sum as f64 / count as f64,
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
            min_ms: sorted[0],
            max_ms: sorted[count - 1],
            count,
        })
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[i64], p: f64) -> i64 {
    let rank = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discards_out_of_range_samples() {
        let mut tracker = LatencyTracker::new(10);
        tracker.record(-1);
        tracker.record(60_001);
        tracker.record(100);
        assert_eq!(tracker.stats().unwrap().count, 1);
    }

    #[test]
    fn test_bounded_window_evicts_oldest() {
        let mut tracker = LatencyTracker::new(3);
        tracker.record(10);
        tracker.record(20);
        tracker.record(30);
        tracker.record(40);

        let stats = tracker.stats().unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min_ms, 20);
        assert_eq!(stats.max_ms, 40);
    }

    #[test]
    fn test_percentiles() {
        let mut tracker = LatencyTracker::new(100);
        for ms in 1..=100 {
            tracker.record(ms);
        }

        let stats = tracker.stats().unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min_ms, 1);
        assert_eq!(stats.max_ms, 100);
        assert_eq!(stats.p50_ms, 50);
        assert_eq!(stats.p99_ms, 99);
    }

    #[test]
    fn test_empty_tracker_has_no_stats() {
        let tracker = LatencyTracker::new(10);
        assert!(tracker.stats().is_none());
    }
}
