//! Field-level AES-256-GCM encryption for sensitive job payloads.
//!
//! The dispatcher encrypts fields such as `clone_url` and `commit_sha`
//! before they travel through the job queue; the executor decrypts them
//! right before use. Keys are derived from the configured webhook secret
//! via scrypt, with a random per-record salt (the spec allows a fixed salt
//! but a random one is preferred and costs nothing extra here).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use scrypt::Params;
use serde::{Deserialize, Serialize};

/// Errors from field encryption/decryption.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Key derivation failed (bad scrypt parameters).
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    /// AEAD encryption failed.
    #[error("encryption failed")]
    EncryptionFailed,
    /// AEAD decryption or authentication tag check failed.
    #[error("decrypt-error")]
    DecryptFailed,
    /// Stored ciphertext/nonce/salt was not valid base64.
    #[error("malformed encrypted field: {0}")]
    Malformed(String),
}

/// A sensitive value, encrypted for transit through the job queue.
///
/// Ciphertext, nonce, and per-record salt travel together; the AES-GCM
/// authentication tag is appended to the ciphertext by the `aes-gcm` crate,
/// so a tampered value fails to decrypt rather than failing a separate tag
/// check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedField {
    /// Base64-encoded ciphertext (including the GCM tag).
    pub ciphertext: String,
    /// Base64-encoded 96-bit nonce.
    pub nonce: String,
    /// Base64-encoded scrypt salt used to derive this field's key.
    pub salt: String,
}

const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

fn derive_key(secret: &str, salt: &[u8]) -> Result<Key<Aes256Gcm>, CryptoError> {
    let params = Params::new(15, 8, 1, 32).map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let mut out = [0u8; 32];
    scrypt::scrypt(secret.as_bytes(), salt, &params, &mut out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(*Key::<Aes256Gcm>::from_slice(&out))
}

/// Encrypt a plaintext field for queue transit.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] or [`CryptoError::EncryptionFailed`]
/// if the underlying primitives reject the inputs (never in practice for
/// well-formed `secret`/`plaintext`).
pub fn encrypt_field(secret: &str, plaintext: &str) -> Result<EncryptedField, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let key = derive_key(secret, &salt)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(&key);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(EncryptedField {
        ciphertext: BASE64.encode(ciphertext),
        nonce: BASE64.encode(nonce_bytes),
        salt: BASE64.encode(salt),
    })
}

/// Decrypt a field encrypted with [`encrypt_field`].
///
/// # Errors
///
/// Returns [`CryptoError::Malformed`] if the stored values are not valid
/// base64, or [`CryptoError::DecryptFailed`] if the authentication tag does
/// not verify (tampered or wrong-key ciphertext). Corresponds to the
/// `decrypt-error` kind in the error taxonomy; callers should treat this as
/// non-retryable.
pub fn decrypt_field(secret: &str, field: &EncryptedField) -> Result<String, CryptoError> {
    let salt = BASE64
        .decode(&field.salt)
        .map_err(|e| CryptoError::Malformed(e.to_string()))?;
    let nonce_bytes = BASE64
        .decode(&field.nonce)
        .map_err(|e| CryptoError::Malformed(e.to_string()))?;
    let ciphertext = BASE64
        .decode(&field.ciphertext)
        .map_err(|e| CryptoError::Malformed(e.to_string()))?;

    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoError::Malformed("nonce has wrong length".into()));
    }

    let key = derive_key(secret, &salt)?;
    let cipher = Aes256Gcm::new(&key);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_slice())
        .map_err(|_| CryptoError::DecryptFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plaintext() {
        let secret = "super-secret-webhook-key";
        let plaintext = "https://example.test/u/r.git";

        let field = encrypt_field(secret, plaintext).unwrap();
        let decrypted = decrypt_field(secret, &field).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn distinct_salts_and_nonces_per_call() {
        let secret = "super-secret-webhook-key";
        let a = encrypt_field(secret, "same-plaintext").unwrap();
        let b = encrypt_field(secret, "same-plaintext").unwrap();

        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let secret = "super-secret-webhook-key";
        let mut field = encrypt_field(secret, "deadbeefcafe").unwrap();

        let mut raw = BASE64.decode(&field.ciphertext).unwrap();
        raw[0] ^= 0xFF;
        field.ciphertext = BASE64.encode(raw);

        let result = decrypt_field(secret, &field);
        assert!(matches!(result, Err(CryptoError::DecryptFailed)));
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let field = encrypt_field("secret-one", "commit-sha-abcdef").unwrap();
        let result = decrypt_field("secret-two", &field);
        assert!(matches!(result, Err(CryptoError::DecryptFailed)));
    }

    #[test]
    fn malformed_base64_is_rejected_without_panicking() {
        let field = EncryptedField {
            ciphertext: "not-base64-!!".to_string(),
            nonce: BASE64.encode([0u8; NONCE_LEN]),
            salt: BASE64.encode([0u8; SALT_LEN]),
        };
        let result = decrypt_field("secret", &field);
        assert!(matches!(result, Err(CryptoError::Malformed(_))));
    }
}
