//! Webhook signature verification.
//!
//! HMAC-SHA256 with a constant-time comparison, against the
//! `sha256=<hex>` prefix format used by the `X-Hub-Signature-256` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted webhook body size.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Verify a `sha256=<hex>` signature header against the raw request body.
///
/// The caller MUST pass the exact bytes received on the wire — never bytes
/// re-serialized from a parsed object, since that breaks byte equality with
/// what the forge actually signed.
///
/// # Returns
///
/// `true` only if the header is well-formed, the secret is non-empty, and
/// the computed HMAC matches in constant time.
#[must_use]
pub fn verify_webhook_signature(body: &[u8], signature_header: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }

    let Some(hex_sig) = signature_header.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(signature_bytes) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    if computed.len() != signature_bytes.len() {
        return false;
    }

    computed.as_slice().ct_eq(&signature_bytes).into()
}

/// Reject bodies larger than [`MAX_BODY_BYTES`] before signature
/// verification is even attempted.
#[must_use]
pub const fn body_within_limit(body_len: usize) -> bool {
    body_len <= MAX_BODY_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_passes() {
        let body = b"{\"action\":\"opened\"}";
        let secret = "whsec";
        let header = sign(secret, body);
        assert!(verify_webhook_signature(body, &header, secret));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let header = sign("right-secret", body);
        assert!(!verify_webhook_signature(body, &header, "wrong-secret"));
    }

    #[test]
    fn missing_prefix_fails() {
        let body = b"payload";
        let header = hex::encode([0u8; 32]);
        assert!(!verify_webhook_signature(body, &header, "secret"));
    }

    #[test]
    fn non_hex_fails() {
        assert!(!verify_webhook_signature(b"payload", "sha256=not-hex", "secret"));
    }

    #[test]
    fn empty_secret_fails_fast() {
        let header = sign("anything", b"payload");
        assert!(!verify_webhook_signature(b"payload", &header, ""));
    }

    #[test]
    fn tampered_body_fails() {
        let header = sign("secret", b"original");
        assert!(!verify_webhook_signature(b"tampered", &header, "secret"));
    }

    #[test]
    fn body_size_boundary() {
        assert!(body_within_limit(MAX_BODY_BYTES));
        assert!(!body_within_limit(MAX_BODY_BYTES + 1));
    }
}
