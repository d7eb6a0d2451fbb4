use arb_instrument::symbol::Symbol;
use indexmap::IndexMap;
use rust_decimal::Decimal;

/// Bounded insertion-order mark-price cache, keyed by symbol (component design §4.1/§5).
///
/// Price updates are joined onto subsequent funding-rate emissions for the same symbol. On
/// overflow the oldest key is evicted; an update to an existing key removes then re-inserts it so
/// that it moves to the back of the recency order, matching the source's delete-then-set refresh
/// rule.
#[derive(Debug)]
pub struct PriceLru {
    capacity: usize,
    entries: IndexMap<Symbol, Decimal>,
}

impl PriceLru {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: IndexMap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, symbol: Symbol, price: Decimal) {
        if self.entries.shift_remove(&symbol).is_none() && self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(symbol, price);
    }

    pub fn get(&self, symbol: &Symbol) -> Option<Decimal> {
        self.entries.get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn symbol(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    #[test]
    fn test_evicts_oldest_on_overflow() {
        let mut lru = PriceLru::new(2);
        lru.insert(symbol("BTCUSDT"), dec!(60000));
        lru.insert(symbol("ETHUSDT"), dec!(3000));
        lru.insert(symbol("SOLUSDT"), dec!(150));

        assert_eq!(lru.get(&symbol("BTCUSDT")), None);
        assert_eq!(lru.get(&symbol("ETHUSDT")), Some(dec!(3000)));
        assert_eq!(lru.get(&symbol("SOLUSDT")), Some(dec!(150)));
    }

    #[test]
    fn test_update_refreshes_recency() {
        let mut lru = PriceLru::new(2);
        lru.insert(symbol("BTCUSDT"), dec!(60000));
        lru.insert(symbol("ETHUSDT"), dec!(3000));
        lru.insert(symbol("BTCUSDT"), dec!(61000));
        lru.insert(symbol("SOLUSDT"), dec!(150));

        assert_eq!(lru.get(&symbol("ETHUSDT")), None);
        assert_eq!(lru.get(&symbol("BTCUSDT")), Some(dec!(61000)));
    }
}
