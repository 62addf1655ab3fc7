//! Symmetric encryption for secrets at rest.
//!
//! AES-256-GCM with a random 96-bit nonce per message. The nonce is prepended
//! to the ciphertext and the whole thing is base64 encoded, so the output is
//! a single opaque string safe to store in a text column.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("cipher text is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("cipher text too short")]
    TooShort,

    #[error("encryption failed")]
    Encrypt,

    /// Wrong key or tampered cipher text; GCM cannot tell them apart.
    #[error("decryption failed")]
    Decrypt,

    #[error("plain text is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
}

pub fn encrypt(plain_text: &str, key: &[u8]) -> Result<String, CryptoError> {
    let cipher = cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher.encrypt(&nonce, plain_text.as_bytes()).map_err(|_| CryptoError::Encrypt)?;

    let mut combined = nonce.to_vec();
    combined.extend_from_slice(&sealed);
    Ok(STANDARD.encode(combined))
}

pub fn decrypt(cipher_text: &str, key: &[u8]) -> Result<String, CryptoError> {
    let cipher = cipher(key)?;
    let combined = STANDARD.decode(cipher_text)?;
    if combined.len() < NONCE_LEN {
        return Err(CryptoError::TooShort);
    }

    let (nonce, sealed) = combined.split_at(NONCE_LEN);
    let plain = cipher.decrypt(Nonce::from_slice(nonce), sealed).map_err(|_| CryptoError::Decrypt)?;
    Ok(String::from_utf8(plain)?)
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}
