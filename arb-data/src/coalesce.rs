use arb_instrument::symbol::Symbol;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Per-symbol write-coalescing window (component design §4.5): multiple updates arriving for the
/// same symbol within this window collapse to the single latest value.
pub const COALESCE_WINDOW: Duration = Duration::from_millis(100);

struct Pending<T> {
    value: T,
    generation: u64,
}

/// Debounces per-symbol writes: `push` replaces any pending value for the symbol and (re)starts a
/// [`COALESCE_WINDOW`] timer; only the value standing once the timer elapses with no further
/// pushes is forwarded downstream.
///
/// Mirrors the reference stack's single-writer-per-key discipline for hot paths shared across
/// producer tasks, adapted here to a debounce-and-flush shape rather than a bounded channel.
pub struct CoalesceQueue<T: Clone + Send + 'static> {
    window: Duration,
    pending: Arc<Mutex<HashMap<Symbol, Pending<T>>>>,
    out: UnboundedSender<(Symbol, T)>,
}

impl<T: Clone + Send + 'static> CoalesceQueue<T> {
    pub fn new(out: UnboundedSender<(Symbol, T)>) -> Self {
        Self::with_window(out, COALESCE_WINDOW)
    }

    pub fn with_window(out: UnboundedSender<(Symbol, T)>, window: Duration) -> Self {
        Self {
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
            out,
        }
    }

    /// Record a new value for `symbol`, superseding any value still pending within the window.
    pub fn push(&self, symbol: Symbol, value: T) {
        let generation = {
            let mut pending = self.pending.lock();
            let generation = pending.get(&symbol).map(|entry| entry.generation + 1).unwrap_or(0);
            pending.insert(symbol.clone(), Pending { value, generation });
            generation
        };

        let pending = self.pending.clone();
        let out = self.out.clone();
        let window = self.window;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let flushed = {
                let mut pending = pending.lock();
                match pending.get(&symbol) {
                    Some(entry) if entry.generation == generation => pending.remove(&symbol).map(|entry| entry.value),
                    _ => None,
                }
            };

            if let Some(value) = flushed {
                let _ = out.send((symbol, value));
            }
        });
    }

    pub fn pending_symbols(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn symbol(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_bursts_collapse_to_latest_value() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = CoalesceQueue::new(tx);

        for value in 1..=10 {
            queue.push(symbol("BTCUSDT"), value);
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        tokio::time::advance(COALESCE_WINDOW + Duration::from_millis(10)).await;

        let (flushed_symbol, flushed_value) = rx.recv().await.unwrap();
        assert_eq!(flushed_symbol, symbol("BTCUSDT"));
        assert_eq!(flushed_value, 10);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_symbols_flush_independently() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = CoalesceQueue::new(tx);

        queue.push(symbol("BTCUSDT"), 1);
        queue.push(symbol("ETHUSDT"), 2);

        tokio::time::advance(COALESCE_WINDOW + Duration::from_millis(10)).await;

        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort_by_key(|(symbol, _)| symbol.as_str().to_owned());
        assert_eq!(seen, vec![(symbol("BTCUSDT"), 1), (symbol("ETHUSDT"), 2)]);
    }
}
