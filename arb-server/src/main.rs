//! Composition root for the funding-rate arbitrage engine's broadcast server (component design
//! §4.7, §9 "Process-wide singletons"): wires one exchange client per monitored venue into a
//! [`FundingRateMonitor`], attaches an [`OpportunityTracker`], and serves the result over a
//! `tokio-tungstenite` WebSocket, adapted from the reference stack's own `barter-data-server`
//! binary.

mod broadcast;
mod format_cache;
mod server;
mod wire;

use arb_data::cache::RatesCache;
use arb_data::client::binance::BinanceProtocol;
use arb_data::client::bingx::BingxProtocol;
use arb_data::client::gateio::GateioProtocol;
use arb_data::client::generic::{ExchangeProtocol, GenericExchangeClient};
use arb_data::client::mexc::MexcProtocol;
use arb_data::client::okx::OkxProtocol;
use arb_data::client::{ClientEvent, ClientFactory, ExchangeClient};
use arb_data::config::EngineConfig;
use arb_data::monitor::FundingRateMonitor;
use arb_data::tracker::{InMemoryOpportunityRepository, OpportunityTracker};
use arb_instrument::exchange::ExchangeId;
use arb_instrument::symbol::Symbol;
use arb_integration::channel::UnboundedTx;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use wire::ServerMessage;

const DEFAULT_SYMBOLS: [&str; 3] = ["BTCUSDT", "ETHUSDT", "SOLUSDT"];
const BROADCAST_CHANNEL_CAPACITY: usize = 1024;

/// Adapts a zero-argument protocol constructor into a [`ClientFactory`], since every concrete
/// [`ExchangeProtocol`] here is a cheap, credential-free value constructed fresh per connection.
struct ProtocolFactory<F> {
    make: F,
}

impl<F, P> ClientFactory for ProtocolFactory<F>
where
    F: Fn() -> P + Send + Sync,
    P: ExchangeProtocol,
{
    fn create(&self, tx: UnboundedTx<ClientEvent>) -> Box<dyn ExchangeClient> {
        Box::new(GenericExchangeClient::new((self.make)(), tx))
    }
}

fn build_factories(monitored: &[ExchangeId]) -> BTreeMap<ExchangeId, Box<dyn ClientFactory>> {
    let mut factories: BTreeMap<ExchangeId, Box<dyn ClientFactory>> = BTreeMap::new();
    for exchange in monitored {
        let factory: Box<dyn ClientFactory> = match exchange {
            ExchangeId::Binance => Box::new(ProtocolFactory { make: || BinanceProtocol }),
            ExchangeId::Okx => Box::new(ProtocolFactory { make: OkxProtocol::public }),
            ExchangeId::Mexc => Box::new(ProtocolFactory { make: || MexcProtocol }),
            ExchangeId::Gateio => Box::new(ProtocolFactory { make: || GateioProtocol }),
            ExchangeId::Bingx => Box::new(ProtocolFactory { make: || BingxProtocol }),
        };
        factories.insert(*exchange, factory);
    }
    factories
}

fn load_symbols() -> Vec<Symbol> {
    match std::env::var("ARB_SYMBOLS") {
        Ok(raw) if !raw.trim().is_empty() => raw.split(',').filter_map(|token| Symbol::new(token.trim()).ok()).collect(),
        _ => DEFAULT_SYMBOLS.iter().filter_map(|token| Symbol::new(*token).ok()).collect(),
    }
}

fn load_bind_addr() -> SocketAddr {
    std::env::var("ARB_SERVER_BIND")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_else(|| "0.0.0.0:9100".parse().expect("default bind address is valid"))
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    info!("starting arb-server");

    let config = EngineConfig::from_env();
    let entry_threshold = config.opportunity_entry_threshold;
    let exit_threshold = config.opportunity_exit_threshold;
    let broadcast_interval = config.broadcast_interval;

    let symbols = load_symbols();
    let bind = load_bind_addr();
    let cache = Arc::new(RatesCache::new());
    let factories = build_factories(&config.monitored_exchanges);

    let (monitor, rate_updated_rx) = FundingRateMonitor::new(config, cache, factories);
    let monitor = Arc::new(monitor);
    monitor.start(&symbols).await;

    let repository = Arc::new(InMemoryOpportunityRepository::new());
    let tracker = Arc::new(OpportunityTracker::with_thresholds(repository, entry_threshold, exit_threshold));
    tracker.attach(rate_updated_rx);

    // No initial receiver is retained: the broadcast loop's "zero subscribers" skip (component
    // design §4.7) must see the true count of connected WebSocket clients, not a phantom one.
    let (tx, rx) = tokio::sync::broadcast::channel::<ServerMessage>(BROADCAST_CHANNEL_CAPACITY);
    drop(rx);

    let broadcast_handle = tokio::spawn(broadcast::run(monitor.clone(), tx.clone(), broadcast_interval, entry_threshold));
    let server_handle = tokio::spawn(server::run(bind, tx));

    tokio::select! {
        _ = broadcast_handle => {}
        _ = server_handle => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    tracker.detach();
    monitor.shutdown().await;
}
