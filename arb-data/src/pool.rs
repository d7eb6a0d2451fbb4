use crate::client::{ClientEvent, ClientFactory, ExchangeClient};
use crate::error::DataError;
use arb_instrument::exchange::ExchangeId;
use arb_instrument::symbol::Symbol;
use arb_integration::channel::{Channel, ChannelTxDroppable, Tx, UnboundedRx, UnboundedTx, mpsc_unbounded};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Event republished upward by a [`ConnectionPool`], tagging every underlying [`ClientEvent`]
/// with the connection index it originated from (component design §4.2 "Event fan-out").
#[derive(Debug, Clone, PartialEq)]
pub struct PoolEvent {
    /// `None` for pool-level events (e.g. [`ClientEvent::ConnectionCountChanged`]) that are not
    /// attributable to any single connection.
    pub connection_index: Option<usize>,
    pub event: ClientEvent,
}

/// One pool per exchange. Owns `{index -> client}` and `{symbol -> index}`, partitioning symbol
/// subscriptions across clients under the exchange's per-connection limit (component design
/// §4.2).
pub struct ConnectionPool {
    exchange: ExchangeId,
    max_per_connection: usize,
    auto_scale: bool,
    factory: Box<dyn ClientFactory>,
    clients: RwLock<IndexMap<usize, Arc<dyn ExchangeClient>>>,
    subscriptions: RwLock<IndexMap<Symbol, usize>>,
    next_index: RwLock<usize>,
    destroyed: AtomicBool,
    pool_tx: UnboundedTx<PoolEvent>,
}

impl ConnectionPool {
    pub fn new(
        exchange: ExchangeId,
        max_per_connection: usize,
        auto_scale: bool,
        factory: Box<dyn ClientFactory>,
    ) -> (Self, UnboundedRx<PoolEvent>) {
        let channel = Channel::new();
        let (pool_tx, pool_rx) = (channel.tx, channel.rx);
        (
            Self {
                exchange,
                max_per_connection,
                auto_scale,
                factory,
                clients: RwLock::new(IndexMap::new()),
                subscriptions: RwLock::new(IndexMap::new()),
                next_index: RwLock::new(0),
                destroyed: AtomicBool::new(false),
                pool_tx,
            },
            pool_rx,
        )
    }

    fn ensure_not_destroyed(&self) -> Result<(), DataError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(DataError::PoolDestroyed { exchange: self.exchange });
        }
        Ok(())
    }

    /// Create, connect and register a new client at the next unused index, fanning out its
    /// events to the pool's own stream. On a dial failure, the client is torn down (`destroy()`)
    /// and the error propagated without leaving anything registered (component design §4.2
    /// "Connection creation with failure cleanup").
    async fn spawn_client(&self) -> Result<usize, DataError> {
        let index = {
            let mut next = self.next_index.write();
            let index = *next;
            *next += 1;
            index
        };

        let (client_tx, mut client_rx) = mpsc_unbounded::<ClientEvent>();
        let client: Arc<dyn ExchangeClient> = Arc::from(self.factory.create(client_tx));

        if let Err(error) = client.connect().await {
            client.destroy();
            return Err(error);
        }

        let mut pool_tx = ChannelTxDroppable::new(self.pool_tx.clone());
        tokio::spawn(async move {
            while let Some(event) = client_rx.recv().await {
                pool_tx.send(PoolEvent {
                    connection_index: Some(index),
                    event,
                });
            }
        });

        self.clients.write().insert(index, client);
        Ok(index)
    }

    /// Subscribe a single symbol. No-op if already mapped. Otherwise finds the lowest-index
    /// client under capacity, or creates a new one, and subscribes on it (component design §4.2
    /// "Subscribe algorithm").
    pub async fn subscribe(&self, symbol: Symbol) -> Result<(), DataError> {
        self.ensure_not_destroyed()?;

        if self.subscriptions.read().contains_key(&symbol) {
            return Ok(());
        }

        let index = self.find_or_create_client_with_capacity().await?;

        let client = self
            .clients
            .read()
            .get(&index)
            .cloned()
            .ok_or_else(|| DataError::NotReady(format!("pool lost track of client {index}")))?;

        client.subscribe(std::slice::from_ref(&symbol)).await?;
        self.subscriptions.write().insert(symbol, index);
        Ok(())
    }

    async fn find_or_create_client_with_capacity(&self) -> Result<usize, DataError> {
        let existing = {
            let clients = self.clients.read();
            let subs = self.subscriptions.read();
            clients
                .keys()
                .copied()
                .find(|index| count_for(&subs, *index) < self.max_per_connection)
        };

        match existing {
            Some(index) => Ok(index),
            None => self.spawn_client().await,
        }
    }

    /// Subscribe a batch, greedily filling each connection to capacity before moving to the next
    /// (component design §4.2 "subscribeAll").
    pub async fn subscribe_all(&self, symbols: &[Symbol]) -> Result<(), DataError> {
        self.ensure_not_destroyed()?;

        let pending: Vec<Symbol> = symbols
            .iter()
            .filter(|symbol| !self.subscriptions.read().contains_key(symbol))
            .cloned()
            .collect();

        for (processed, symbol) in pending.into_iter().enumerate() {
            self.subscribe(symbol).await?;
            if processed > 0 && processed % 50 == 0 {
                info!(exchange = %self.exchange, processed, "subscribeAll progress");
            }
        }

        Ok(())
    }

    pub async fn unsubscribe(&self, symbol: &Symbol) -> Result<(), DataError> {
        self.ensure_not_destroyed()?;

        let Some(index) = self.subscriptions.write().shift_remove(symbol) else {
            return Ok(());
        };

        if let Some(client) = self.clients.read().get(&index).cloned() {
            client.unsubscribe(std::slice::from_ref(symbol)).await?;
        }

        if self.auto_scale {
            self.shrink().await;
        }

        Ok(())
    }

    /// Prune clients with zero subscriptions, always keeping at least one alive (component design
    /// §4.2 "Shrink").
    async fn shrink(&self) {
        let subs = self.subscriptions.read();
        let empty_indices: Vec<usize> = {
            let clients = self.clients.read();
            clients
                .keys()
                .copied()
                .filter(|index| count_for(&subs, *index) == 0)
                .collect()
        };
        drop(subs);

        let mut clients = self.clients.write();
        if clients.len() <= 1 {
            return;
        }

        let keep_at_least_one = clients.len() - empty_indices.len() < 1;
        let to_remove = if keep_at_least_one {
            &empty_indices[..empty_indices.len().saturating_sub(1)]
        } else {
            &empty_indices[..]
        };

        for index in to_remove {
            if let Some(client) = clients.shift_remove(index) {
                client.destroy();
            }
        }

        if !to_remove.is_empty() {
            let _ = self.pool_tx.send(PoolEvent {
                connection_index: None,
                event: ClientEvent::ConnectionCountChanged(clients.len()),
            });
        }
    }

    pub fn is_ready(&self) -> bool {
        let clients = self.clients.read();
        !clients.is_empty() && clients.values().all(|client| client.is_ready())
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    pub fn subscribed_symbols(&self) -> Vec<Symbol> {
        self.subscriptions.read().keys().cloned().collect()
    }

    /// Concurrently disconnect every client and clear the maps, leaving the pool usable again.
    pub async fn disconnect(&self) {
        let clients: Vec<Arc<dyn ExchangeClient>> = self.clients.read().values().cloned().collect();
        futures::future::join_all(clients.iter().map(|client| client.disconnect())).await;
        self.clients.write().clear();
        self.subscriptions.write().clear();
    }

    /// Idempotent synchronous teardown: marks the pool destroyed, destroys every client, clears
    /// maps (component design §4.2 "Shutdown").
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for client in self.clients.read().values() {
            client.destroy();
        }
        self.clients.write().clear();
        self.subscriptions.write().clear();
    }
}

fn count_for(subs: &IndexMap<Symbol, usize>, index: usize) -> usize {
    subs.values().filter(|&&i| i == index).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct StubClient {
        exchange: ExchangeId,
        ready: AtomicBool,
        destroyed: AtomicBool,
        connect_fails: bool,
        symbols: RwLock<Vec<Symbol>>,
    }

    #[async_trait]
    impl ExchangeClient for StubClient {
        fn exchange_id(&self) -> ExchangeId {
            self.exchange
        }

        async fn connect(&self) -> Result<(), DataError> {
            if self.connect_fails {
                return Err(DataError::NotReady("dial failed".into()));
            }
            self.ready.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) {
            self.ready.store(false, Ordering::SeqCst);
        }

        fn destroy(&self) {
            self.destroyed.store(true, Ordering::SeqCst);
            self.ready.store(false, Ordering::SeqCst);
        }

        async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), DataError> {
            self.symbols.write().extend(symbols.iter().cloned());
            Ok(())
        }

        async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), DataError> {
            self.symbols.write().retain(|s| !symbols.contains(s));
            Ok(())
        }

        fn subscribed_symbols(&self) -> Vec<Symbol> {
            self.symbols.read().clone()
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn stats(&self) -> crate::client::ClientStats {
            crate::client::ClientStats {
                exchange: self.exchange,
                subscribed_symbols: self.symbols.read().len(),
                is_ready: self.ready.load(Ordering::SeqCst),
                latency: None,
            }
        }
    }

    struct StubFactory {
        exchange: ExchangeId,
        connect_fails: Arc<AtomicBool>,
        created: Arc<AtomicUsize>,
    }

    impl ClientFactory for StubFactory {
        fn create(&self, _tx: UnboundedTx<ClientEvent>) -> Box<dyn ExchangeClient> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(StubClient {
                exchange: self.exchange,
                ready: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                connect_fails: self.connect_fails.load(Ordering::SeqCst),
                symbols: RwLock::new(Vec::new()),
            })
        }
    }

    fn symbol(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_pool_capacity_invariant() {
        let created = Arc::new(AtomicUsize::new(0));
        let factory = StubFactory {
            exchange: ExchangeId::Gateio,
            connect_fails: Arc::new(AtomicBool::new(false)),
            created: created.clone(),
        };
        let (pool, _rx) = ConnectionPool::new(ExchangeId::Gateio, 1, false, Box::new(factory));

        pool.subscribe_all(&[symbol("BTCUSDT"), symbol("ETHUSDT")]).await.unwrap();

        assert_eq!(pool.client_count(), 2);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let factory = StubFactory {
            exchange: ExchangeId::Binance,
            connect_fails: Arc::new(AtomicBool::new(false)),
            created: Arc::new(AtomicUsize::new(0)),
        };
        let (pool, _rx) = ConnectionPool::new(ExchangeId::Binance, 100, false, Box::new(factory));

        pool.subscribe(symbol("BTCUSDT")).await.unwrap();
        pool.subscribe(symbol("BTCUSDT")).await.unwrap();

        assert_eq!(pool.client_count(), 1);
        assert_eq!(pool.subscribed_symbols().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_does_not_register_client() {
        let connect_fails = Arc::new(AtomicBool::new(true));
        let factory = StubFactory {
            exchange: ExchangeId::Okx,
            connect_fails: connect_fails.clone(),
            created: Arc::new(AtomicUsize::new(0)),
        };
        let (pool, _rx) = ConnectionPool::new(ExchangeId::Okx, 100, false, Box::new(factory));

        let result = pool.subscribe(symbol("BTCUSDT")).await;
        assert!(result.is_err());
        assert_eq!(pool.client_count(), 0);
    }

    #[tokio::test]
    async fn test_destroyed_pool_rejects_subscribe() {
        let factory = StubFactory {
            exchange: ExchangeId::Bingx,
            connect_fails: Arc::new(AtomicBool::new(false)),
            created: Arc::new(AtomicUsize::new(0)),
        };
        let (pool, _rx) = ConnectionPool::new(ExchangeId::Bingx, 100, false, Box::new(factory));
        pool.destroy();

        let result = pool.subscribe(symbol("BTCUSDT")).await;
        assert!(matches!(result, Err(DataError::PoolDestroyed { .. })));
    }
}
