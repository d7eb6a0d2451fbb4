use arb_integration::error::SocketError;

/// Errors surfaced by the funding-rate engine.
///
/// Per component design §7, I/O-driven failures are absorbed by the component that owns the
/// resource and surfaced as events (`ClientEvent::Error`, tracker error counters); only
/// programmer errors (subscribe-after-destroy, symbol mismatches) are returned synchronously
/// and are not retried.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("symbol mismatch: pair symbol '{pair_symbol}' does not match record symbol '{record_symbol}'")]
    SymbolMismatch {
        pair_symbol: String,
        record_symbol: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("pool for exchange {exchange} has been destroyed")]
    PoolDestroyed { exchange: arb_instrument::exchange::ExchangeId },

    #[error("cache has been destroyed")]
    CacheDestroyed,

    #[error("client not ready: {0}")]
    NotReady(String),

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error("repository operation failed: {0}")]
    Repository(String),
}

impl DataError {
    /// Whether this error represents a programmer error that should fail loudly and
    /// synchronously, as opposed to a transient condition a caller should expect to retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DataError::PoolDestroyed { .. } | DataError::CacheDestroyed | DataError::SymbolMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        let mismatch = DataError::SymbolMismatch {
            pair_symbol: "BTCUSDT".into(),
            record_symbol: "ETHUSDT".into(),
        };
        assert!(mismatch.is_terminal());

        let not_ready = DataError::NotReady("client0".into());
        assert!(!not_ready.is_terminal());
    }
}
