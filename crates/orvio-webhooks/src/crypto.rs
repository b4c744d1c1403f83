//! Cryptographic operations: secret material at rest and payload signing.
//!
//! - AES-256-GCM for the signing secret and the custom-header blob at rest
//! - HMAC-SHA256 over the exact transmitted body bytes for the
//!   `x-webhook-signature` header
//! - one-time signing secret generation (`whsec_` prefixed)

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine,
};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::WebhookError;

/// Nonce size for AES-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Random bytes behind a generated signing secret.
const SECRET_BYTES: usize = 32;

/// Prefix identifying generated webhook signing secrets.
const SECRET_PREFIX: &str = "whsec_";

type HmacSha256 = Hmac<Sha256>;

fn build_cipher(key: &[u8]) -> Result<Aes256Gcm, WebhookError> {
    if key.len() != 32 {
        return Err(WebhookError::EncryptionFailed(format!(
            "Invalid key length: expected 32 bytes, got {}",
            key.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
}

/// Encrypt a plaintext value for storage.
///
/// Output format: base64(nonce || ciphertext || auth tag). A fresh nonce is
/// drawn from the OS CSPRNG per call, so encrypting the same value twice
/// yields different output.
pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<String, WebhookError> {
    let cipher = build_cipher(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&envelope))
}

/// Decrypt a stored value back to plaintext.
pub fn decrypt(encoded: &str, key: &[u8]) -> Result<String, WebhookError> {
    let cipher = build_cipher(key)?;

    let envelope = BASE64
        .decode(encoded)
        .map_err(|e| WebhookError::EncryptionFailed(format!("Base64 decode failed: {e}")))?;

    if envelope.len() < NONCE_SIZE + 1 {
        return Err(WebhookError::EncryptionFailed(
            "Invalid encrypted data format".to_string(),
        ));
    }

    let nonce = Nonce::from_slice(&envelope[..NONCE_SIZE]);
    let ciphertext = &envelope[NONCE_SIZE..];

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
}

/// Generate a fresh signing secret: 32 CSPRNG bytes, base64url without
/// padding, `whsec_` prefixed. Shown to the caller exactly once; only the
/// encrypted form is persisted.
pub fn generate_signing_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Sign the exact body bytes with HMAC-SHA256.
///
/// The returned value is the lowercase hex digest transmitted as-is in the
/// `x-webhook-signature` header. Subscribers recompute it over the bytes they
/// received; any single-byte difference changes the digest.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a payload signature in constant time.
pub fn verify_signature(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let computed = sign_payload(secret, payload);
    constant_time_eq(signature_hex.as_bytes(), computed.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}
