use arb_instrument::exchange::ExchangeId;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::warn;

/// Engine-wide configuration, loaded once at startup from the process environment (component
/// design §6 "Configuration"). Invalid values fall back to documented defaults with a `warn!`
/// log rather than a hard failure - a misconfigured threshold should degrade, not crash, a
/// running feed, mirroring the reference stack's own `WS_BUFFER_SIZE` knob.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub funding_rate_check_interval: Duration,
    pub min_spread_threshold: Decimal,
    pub monitored_exchanges: Vec<ExchangeId>,
    pub enable_price_monitor: bool,
    pub memory_monitor_interval: Duration,
    pub opportunity_entry_threshold: Decimal,
    pub opportunity_exit_threshold: Decimal,
    pub broadcast_interval: Duration,
    pub max_subscriptions_per_connection: usize,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            funding_rate_check_interval: Duration::from_millis(env_parse("FUNDING_RATE_CHECK_INTERVAL_MS", 300_000)),
            min_spread_threshold: env_parse_decimal("MIN_SPREAD_THRESHOLD", Decimal::new(5, 3)),
            monitored_exchanges: env_parse_exchanges("MONITORED_EXCHANGES"),
            enable_price_monitor: env_parse("ENABLE_PRICE_MONITOR", true),
            memory_monitor_interval: Duration::from_millis(env_parse("MEMORY_MONITOR_INTERVAL_MS", 60_000)),
            opportunity_entry_threshold: Decimal::from_parts(800, 0, 0, false, 0),
            opportunity_exit_threshold: Decimal::ZERO,
            broadcast_interval: Duration::from_millis(env_parse("BROADCAST_INTERVAL_MS", 2_000)),
            max_subscriptions_per_connection: env_parse("MAX_SUBSCRIPTIONS_PER_CONNECTION", 50),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            funding_rate_check_interval: Duration::from_millis(300_000),
            min_spread_threshold: Decimal::new(5, 3),
            monitored_exchanges: ExchangeId::ALL.to_vec(),
            enable_price_monitor: true,
            memory_monitor_interval: Duration::from_millis(60_000),
            opportunity_entry_threshold: Decimal::from_parts(800, 0, 0, false, 0),
            opportunity_exit_threshold: Decimal::ZERO,
            broadcast_interval: Duration::from_millis(2_000),
            max_subscriptions_per_connection: 50,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, raw, "invalid environment value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_parse_decimal(key: &str, default: Decimal) -> Decimal {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<Decimal>().unwrap_or_else(|_| {
            warn!(key, raw, "invalid decimal environment value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_parse_exchanges(key: &str) -> Vec<ExchangeId> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .filter_map(|token| match token.trim().to_ascii_lowercase().as_str() {
                "binance" => Some(ExchangeId::Binance),
                "okx" => Some(ExchangeId::Okx),
                "mexc" => Some(ExchangeId::Mexc),
                "gateio" => Some(ExchangeId::Gateio),
                "bingx" => Some(ExchangeId::Bingx),
                other => {
                    warn!(key, token = other, "unrecognised exchange in MONITORED_EXCHANGES, skipping");
                    None
                }
            })
            .collect(),
        _ => ExchangeId::ALL.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_monitors_all_exchanges() {
        let config = EngineConfig::default();
        assert_eq!(config.monitored_exchanges.len(), 5);
        assert_eq!(config.opportunity_entry_threshold, Decimal::from_parts(800, 0, 0, false, 0));
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        assert_eq!(env_parse::<u64>("ARB_DATA_TEST_NONEXISTENT_KEY_XYZ", 42), 42);
    }
}
