use crate::client::backoff::{ReconnectionBackoffPolicy, ReconnectionState};
use crate::client::price_lru::PriceLru;
use crate::client::{ClientEvent, ClientStats, ExchangeClient};
use crate::error::DataError;
use crate::model::FundingRateReceived;
use arb_instrument::exchange::ExchangeId;
use arb_instrument::symbol::Symbol;
use arb_integration::channel::{Tx, UnboundedTx};
use arb_integration::error::SocketError;
use arb_integration::latency::LatencyTracker;
use arb_integration::protocol::websocket::{self, WsMessage, WsSink, WsStream};
use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex as SyncMutex, RwLock};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const LATENCY_WINDOW: usize = 1000;
const PRICE_LRU_CAPACITY: usize = 500;

/// A single parsed item decoded from an exchange-native WebSocket payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    FundingRate(FundingRateReceived),
    MarkPrice { symbol: Symbol, price: Decimal },
    /// A structured exchange error whose code indicates a transient/debug-level condition (eg/
    /// OKX 60018 "symbol does not exist") that should not surface as a client error event.
    Ignored,
}

/// Per-exchange message shapes and parsing, driven generically by [`GenericExchangeClient`]
/// (component design §4.1, §9 "Dynamic dispatch across exchanges").
pub trait ExchangeProtocol: Send + Sync + 'static {
    fn exchange(&self) -> ExchangeId;

    fn ws_url(&self) -> Result<url::Url, SocketError>;

    fn subscribe_messages(&self, symbols: &[Symbol]) -> Vec<WsMessage>;

    fn unsubscribe_messages(&self, symbols: &[Symbol]) -> Vec<WsMessage>;

    /// Private-channel login message (OKX-specific HMAC example, component design §4.1). `None`
    /// for exchanges with no private-channel requirement.
    fn login_message(&self) -> Option<Result<WsMessage, DataError>> {
        None
    }

    fn requires_login(&self) -> bool {
        false
    }

    /// Parse a decoded UTF-8 payload (already gzip-decompressed if applicable) into zero or more
    /// normalised events.
    fn parse_text(&self, text: &str) -> Result<Vec<ParsedEvent>, SocketError>;

    /// Extract a server-reported timestamp (ms) from `text`, if present, for latency tracking.
    /// Not called for gzip-framed payloads (component design §4.1).
    fn server_timestamp_ms(&self, _text: &str) -> Option<i64> {
        None
    }
}

struct Inner<P> {
    protocol: P,
    exchange: ExchangeId,
    tx: UnboundedTx<ClientEvent>,
    subscribed: RwLock<BTreeSet<Symbol>>,
    price_lru: SyncMutex<PriceLru>,
    latency: SyncMutex<LatencyTracker>,
    ready: AtomicBool,
    destroyed: AtomicBool,
    sink: AsyncMutex<Option<WsSink>>,
    task: SyncMutex<Option<JoinHandle<()>>>,
    backoff_policy: ReconnectionBackoffPolicy,
}

/// Drives the shared connect/reconnect/health-check/latency-tracking machinery for any exchange
/// implementing [`ExchangeProtocol`].
pub struct GenericExchangeClient<P> {
    inner: Arc<Inner<P>>,
}

impl<P: ExchangeProtocol> GenericExchangeClient<P> {
    pub fn new(protocol: P, tx: UnboundedTx<ClientEvent>) -> Self {
        let exchange = protocol.exchange();
        Self {
            inner: Arc::new(Inner {
                protocol,
                exchange,
                tx,
                subscribed: RwLock::new(BTreeSet::new()),
                price_lru: SyncMutex::new(PriceLru::new(PRICE_LRU_CAPACITY)),
                latency: SyncMutex::new(LatencyTracker::new(LATENCY_WINDOW)),
                ready: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                sink: AsyncMutex::new(None),
                task: SyncMutex::new(None),
                backoff_policy: ReconnectionBackoffPolicy::default(),
            }),
        }
    }
}

impl<P: ExchangeProtocol> Inner<P> {
    async fn dial(&self) -> Result<WsStream, DataError> {
        let url = self.protocol.ws_url().map_err(DataError::Socket)?;
        let socket = websocket::connect(url.as_str(), DIAL_TIMEOUT)
            .await
            .map_err(DataError::Socket)?;
        let (mut sink, stream) = socket.split();

        if self.protocol.requires_login() {
            if let Some(login) = self.protocol.login_message() {
                let message = login?;
                sink.send(message)
                    .await
                    .map_err(|error| DataError::Socket(SocketError::WebSocket(Box::new(error))))?;
            }
        }

        *self.sink.lock().await = Some(sink);
        Ok(stream)
    }

    async fn resubscribe_all(&self) -> Result<(), DataError> {
        let symbols: Vec<Symbol> = self.subscribed.read().iter().cloned().collect();
        if symbols.is_empty() {
            return Ok(());
        }
        self.send_messages(self.protocol.subscribe_messages(&symbols)).await?;
        let _ = self.tx.send(ClientEvent::Resubscribed { count: symbols.len() });
        Ok(())
    }

    async fn send_messages(&self, messages: Vec<WsMessage>) -> Result<(), DataError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or_else(|| DataError::NotReady(format!("{}", self.exchange)))?;
        for message in messages {
            sink.send(message)
                .await
                .map_err(|error| DataError::Socket(SocketError::WebSocket(Box::new(error))))?;
        }
        Ok(())
    }

    fn handle_payload(&self, is_gzip: bool, text: &str) {
        if !is_gzip {
            if let Some(server_ms) = self.protocol.server_timestamp_ms(text) {
                let latency_ms = Utc::now().timestamp_millis() - server_ms;
                self.latency.lock().record(latency_ms);
            }
        }

        match self.protocol.parse_text(text) {
            Ok(events) => {
                for event in events {
                    self.dispatch(event);
                }
            }
            Err(error) => {
                warn!(exchange = %self.exchange, %error, "failed to parse exchange payload");
                let _ = self.tx.send(ClientEvent::Error(error.to_string()));
            }
        }
    }

    fn dispatch(&self, event: ParsedEvent) {
        match event {
            ParsedEvent::Ignored => {
                debug!(exchange = %self.exchange, "dropped debug-level exchange protocol message");
            }
            ParsedEvent::MarkPrice { symbol, price } => {
                self.price_lru.lock().insert(symbol.clone(), price);
                let _ = self.tx.send(ClientEvent::MarkPrice { symbol, price });
            }
            ParsedEvent::FundingRate(mut received) => {
                if received.mark_price.is_none() {
                    received.mark_price = self.price_lru.lock().get(&received.symbol);
                }
                let _ = self.tx.send(ClientEvent::FundingRate(received));
            }
        }
    }

    /// Reconnect loop: attempt redial with exponential backoff up to the retry cap, resubscribe
    /// the full symbol set on success, stop and emit `MaxRetriesReached` on exhaustion.
    async fn reconnect_loop(&self) -> Option<WsStream> {
        let mut state = ReconnectionState::from(self.backoff_policy);

        loop {
            if self.destroyed.load(Ordering::SeqCst) {
                return None;
            }
            if !state.can_retry() {
                let _ = self.tx.send(ClientEvent::MaxRetriesReached);
                self.ready.store(false, Ordering::SeqCst);
                return None;
            }

            let attempt = state.attempt() + 1;
            let _ = self.tx.send(ClientEvent::Reconnecting { attempt });

            match self.dial().await {
                Ok(stream) => {
                    state.reset();
                    self.ready.store(true, Ordering::SeqCst);
                    let _ = self.tx.send(ClientEvent::Connected);
                    if let Err(error) = self.resubscribe_all().await {
                        warn!(exchange = %self.exchange, %error, "failed to resubscribe after reconnect");
                    }
                    return Some(stream);
                }
                Err(error) => {
                    warn!(exchange = %self.exchange, %error, attempt, "reconnect attempt failed");
                    let sleep_for = state.next_backoff();
                    tokio::time::sleep(sleep_for).await;
                }
            }
        }
    }

    async fn run(self: Arc<Self>, mut stream: WsStream) {
        let mut health_check = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        let mut last_message_at = Utc::now();
        health_check.tick().await;

        loop {
            if self.destroyed.load(Ordering::SeqCst) {
                return;
            }

            tokio::select! {
                message = stream.next() => {
                    match message {
                        Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                            last_message_at = Utc::now();
                            self.handle_payload(false, text.as_str());
                        }
                        Some(Ok(tokio_tungstenite::tungstenite::Message::Binary(data))) => {
                            last_message_at = Utc::now();
                            if websocket::is_gzip(&data) {
                                match websocket::decompress_gzip(&data) {
                                    Ok(text) => self.handle_payload(true, &text),
                                    Err(error) => warn!(exchange = %self.exchange, %error, "gzip decompression failed"),
                                }
                            } else if let Ok(text) = std::str::from_utf8(&data) {
                                self.handle_payload(false, text);
                            }
                        }
                        Some(Ok(_)) => {
                            last_message_at = Utc::now();
                        }
                        Some(Err(error)) => {
                            warn!(exchange = %self.exchange, %error, "websocket error, reconnecting");
                            self.ready.store(false, Ordering::SeqCst);
                            let _ = self.tx.send(ClientEvent::Disconnected);
                            match self.reconnect_loop().await {
                                Some(new_stream) => stream = new_stream,
                                None => return,
                            }
                        }
                        None => {
                            info!(exchange = %self.exchange, "websocket stream ended, reconnecting");
                            self.ready.store(false, Ordering::SeqCst);
                            let _ = self.tx.send(ClientEvent::Disconnected);
                            match self.reconnect_loop().await {
                                Some(new_stream) => stream = new_stream,
                                None => return,
                            }
                        }
                    }
                }
                _ = health_check.tick() => {
                    let elapsed = Utc::now() - last_message_at;
                    if elapsed > chrono::Duration::from_std(HEALTH_CHECK_INTERVAL).unwrap() {
                        warn!(exchange = %self.exchange, "health check timeout, forcing reconnect");
                        self.ready.store(false, Ordering::SeqCst);
                        match self.reconnect_loop().await {
                            Some(new_stream) => {
                                stream = new_stream;
                                last_message_at = Utc::now();
                            }
                            None => return,
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<P: ExchangeProtocol> ExchangeClient for GenericExchangeClient<P> {
    fn exchange_id(&self) -> ExchangeId {
        self.inner.exchange
    }

    async fn connect(&self) -> Result<(), DataError> {
        let inner = self.inner.clone();
        let stream = inner.dial().await?;
        inner.ready.store(true, Ordering::SeqCst);
        let _ = inner.tx.send(ClientEvent::Connected);

        let task_inner = inner.clone();
        let handle = tokio::spawn(async move { task_inner.run(stream).await });
        *self.inner.task.lock() = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) {
        self.inner.ready.store(false, Ordering::SeqCst);
        *self.inner.sink.lock().await = None;
        let _ = self.inner.tx.send(ClientEvent::Disconnected);
    }

    fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::SeqCst);
        self.inner.ready.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.task.lock().take() {
            handle.abort();
        }
    }

    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), DataError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(DataError::NotReady(format!("{} client destroyed", self.inner.exchange)));
        }
        if !self.inner.ready.load(Ordering::SeqCst) {
            return Err(DataError::NotReady(format!("{} client not connected", self.inner.exchange)));
        }

        self.inner
            .send_messages(self.inner.protocol.subscribe_messages(symbols))
            .await?;

        let mut subscribed = self.inner.subscribed.write();
        subscribed.extend(symbols.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), DataError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(DataError::NotReady(format!("{} client destroyed", self.inner.exchange)));
        }

        self.inner
            .send_messages(self.inner.protocol.unsubscribe_messages(symbols))
            .await?;

        let mut subscribed = self.inner.subscribed.write();
        for symbol in symbols {
            subscribed.remove(symbol);
        }
        Ok(())
    }

    fn subscribed_symbols(&self) -> Vec<Symbol> {
        self.inner.subscribed.read().iter().cloned().collect()
    }

    fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    fn stats(&self) -> ClientStats {
        ClientStats {
            exchange: self.inner.exchange,
            subscribed_symbols: self.inner.subscribed.read().len(),
            is_ready: self.inner.ready.load(Ordering::SeqCst),
            latency: self.inner.latency.lock().stats(),
        }
    }
}
