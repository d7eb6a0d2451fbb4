use crate::error::SocketError;
use std::fmt::Debug;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, connect_async,
    tungstenite::{client::IntoClientRequest, error::ProtocolError},
};
use tracing::debug;

/// Convenient type alias for a tungstenite `WebSocketStream`.
pub type WebSocket = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Convenient type alias for the `Sink` half of a tungstenite [`WebSocket`].
pub type WsSink = futures::stream::SplitSink<WebSocket, WsMessage>;

/// Convenient type alias for the `Stream` half of a tungstenite [`WebSocket`].
pub type WsStream = futures::stream::SplitStream<WebSocket>;

/// Communicative type alias for a tungstenite [`WebSocket`] `Message`.
pub type WsMessage = tokio_tungstenite::tungstenite::Message;

/// Communicative type alias for a tungstenite [`WebSocket`] `Error`.
pub type WsError = tokio_tungstenite::tungstenite::Error;

/// Connect asynchronously to a [`WebSocket`] server, wrapping the dial in the exchange-client
/// initial-connect deadline (see component design §4.1/§5 - 10s dial timeout).
pub async fn connect<R>(request: R, dial_timeout: std::time::Duration) -> Result<WebSocket, SocketError>
where
    R: IntoClientRequest + Unpin + Debug,
{
    debug!(?request, "attempting to establish WebSocket connection");

    match tokio::time::timeout(dial_timeout, connect_async(request)).await {
        Ok(Ok((websocket, _))) => Ok(websocket),
        Ok(Err(error)) => Err(SocketError::WebSocket(Box::new(error))),
        Err(_) => Err(SocketError::DialTimeout(format!("{dial_timeout:?}"))),
    }
}

/// Determine whether a [`WsError`] indicates the [`WebSocket`] has disconnected and a reconnect
/// (rather than a retryable send) is required.
pub fn is_websocket_disconnected(error: &WsError) -> bool {
    matches!(
        error,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Io(_)
            | WsError::Protocol(ProtocolError::SendAfterClosing)
    )
}

/// Gzip magic bytes. BingX frames a subset of its WebSocket payloads as gzip - this check must
/// happen before any attempt at UTF-8/JSON decoding (see component design §4.1, §9).
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Whether `payload` begins with the gzip magic number.
pub fn is_gzip(payload: &[u8]) -> bool {
    payload.starts_with(&GZIP_MAGIC)
}

/// Decompress a gzip-framed binary WebSocket payload into its UTF-8 text contents.
pub fn decompress_gzip(payload: &[u8]) -> Result<String, SocketError> {
    use std::io::Read;

    let mut decoder = flate2::read::GzDecoder::new(payload);
    let mut decompressed = String::new();
    decoder
        .read_to_string(&mut decompressed)
        .map_err(|error| SocketError::Gzip(error.to_string()))?;
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_gzip() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x08, 0x00]));
        assert!(!is_gzip(b"{\"op\":\"subscribe\"}"));
        assert!(!is_gzip(&[0x1f]));
    }

    #[test]
    fn test_decompress_gzip_roundtrip() {
        use std::io::Write;

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"{\"hello\":\"world\"}").unwrap();
        let compressed = encoder.finish().unwrap();

        assert!(is_gzip(&compressed));
        assert_eq!(
            decompress_gzip(&compressed).unwrap(),
            "{\"hello\":\"world\"}"
        );
    }
}
