use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::Sha512;

use crate::CryptoError;
use crate::keys::random_string;

/// Envelope version tag written by [`encrypt_metadata`].
pub const METADATA_VERSION: &str = "002";

const IV_LEN: usize = 12;

/// PBKDF2-SHA512 with the key as its own salt and a single round.
fn derive_metadata_key(key: &str) -> [u8; 32] {
    let mut derived = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha512>(key.as_bytes(), key.as_bytes(), 1, &mut derived);
    derived
}

fn metadata_cipher(key: &str) -> Result<Aes256Gcm, CryptoError> {
    if key.is_empty() {
        return Err(CryptoError::InvalidKey("empty metadata key".into()));
    }
    Aes256Gcm::new_from_slice(&derive_metadata_key(key))
        .map_err(|_| CryptoError::InvalidKey("derived key length".into()))
}

/// Encrypts a metadata string into the versioned text envelope.
pub fn encrypt_metadata(data: &str, key: &str) -> Result<String, CryptoError> {
    let cipher = metadata_cipher(key)?;
    let iv = random_string(IV_LEN);
    let sealed = cipher
        .encrypt(Nonce::from_slice(iv.as_bytes()), data.as_bytes())
        .map_err(|_| CryptoError::Cipher)?;
    Ok(format!("{METADATA_VERSION}{iv}{}", BASE64.encode(sealed)))
}

/// Decrypts an envelope produced by [`encrypt_metadata`].
pub fn decrypt_metadata(envelope: &str, key: &str) -> Result<String, CryptoError> {
    let prefix_len = METADATA_VERSION.len() + IV_LEN;
    if envelope.len() <= prefix_len
        || !envelope.is_char_boundary(METADATA_VERSION.len())
        || !envelope.is_char_boundary(prefix_len)
    {
        return Err(CryptoError::Malformed("envelope too short".into()));
    }

    let (version, rest) = envelope.split_at(METADATA_VERSION.len());
    if version != METADATA_VERSION {
        return Err(CryptoError::UnsupportedVersion(version.to_string()));
    }

    let (iv, body) = rest.split_at(IV_LEN);
    let sealed = BASE64
        .decode(body)
        .map_err(|e| CryptoError::Malformed(e.to_string()))?;

    let plain = metadata_cipher(key)?
        .decrypt(Nonce::from_slice(iv.as_bytes()), sealed.as_ref())
        .map_err(|_| CryptoError::Cipher)?;

    String::from_utf8(plain).map_err(|e| CryptoError::Malformed(e.to_string()))
}

/// Tries every key, newest first, and returns the first successful decryption.
pub fn decrypt_metadata_any(envelope: &str, keys: &[String]) -> Result<String, CryptoError> {
    let mut last = CryptoError::InvalidKey("no keys supplied".into());
    for key in keys.iter().rev() {
        match decrypt_metadata(envelope, key) {
            Ok(plain) => return Ok(plain),
            Err(e) => last = e,
        }
    }
    Err(last)
}
