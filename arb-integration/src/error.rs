use thiserror::Error;

/// All socket/transport level errors generated in `arb-integration`.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Sink error")]
    Sink,

    #[error("deserialising JSON error: {error} for payload: {payload}")]
    Deserialise {
        error: serde_json::Error,
        payload: String,
    },

    #[error("deserialising JSON error: {error} for binary payload: {payload:?}")]
    DeserialiseBinary {
        error: serde_json::Error,
        payload: Vec<u8>,
    },

    #[error("serialising JSON error: {0}")]
    Serialise(serde_json::Error),

    #[error("error parsing Url: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("error subscribing to resources over the socket: {0}")]
    Subscribe(String),

    #[error("WebSocket stream terminated with closing frame: {0}")]
    Terminated(String),

    #[error("{entity} does not support: {item}")]
    Unsupported { entity: &'static str, item: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("dial timed out connecting to {0}")]
    DialTimeout(String),

    #[error("consumed error message from exchange: {0}")]
    Exchange(String),

    #[error("gzip decompression failed: {0}")]
    Gzip(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_error_display() {
        let error = SocketError::Subscribe("BTCUSDT".to_string());
        assert_eq!(
            error.to_string(),
            "error subscribing to resources over the socket: BTCUSDT"
        );
    }
}
