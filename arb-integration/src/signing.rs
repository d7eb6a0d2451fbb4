use crate::error::SocketError;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Sign `message` with HMAC-SHA256 using `secret`, returning the base64-encoded signature.
///
/// Used by private exchange channels that authenticate over the WebSocket itself rather than
/// via a signed REST request (eg/ OKX's `timestamp + "GET" + "/users/self/verify"` login
/// message, see component design §4.1).
pub fn hmac_sha256_base64(secret: &str, message: &str) -> Result<String, SocketError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|error| SocketError::Exchange(format!("invalid HMAC key: {error}")))?;
    mac.update(message.as_bytes());

    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sha256_base64_is_deterministic() {
        let signature_a = hmac_sha256_base64("secret", "1700000000GET/users/self/verify").unwrap();
        let signature_b = hmac_sha256_base64("secret", "1700000000GET/users/self/verify").unwrap();
        assert_eq!(signature_a, signature_b);
    }

    #[test]
    fn test_hmac_sha256_base64_differs_on_message() {
        let signature_a = hmac_sha256_base64("secret", "message-a").unwrap();
        let signature_b = hmac_sha256_base64("secret", "message-b").unwrap();
        assert_ne!(signature_a, signature_b);
    }
}
