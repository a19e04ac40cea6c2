use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;

use crate::CryptoError;

/// AES-GCM nonce length prepended to every sealed chunk.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length appended by the cipher.
pub const TAG_LEN: usize = 16;

/// Size of a sealed chunk for `plain_len` plaintext bytes.
pub fn sealed_len(plain_len: usize) -> usize {
    NONCE_LEN + plain_len + TAG_LEN
}

/// Resolves the raw AES-256 key for a file.
///
/// Version 3 files carry a 64-char hex key; older versions use the 32 UTF-8
/// bytes of the key string directly.
fn chunk_cipher(key: &str, version: u32) -> Result<Aes256Gcm, CryptoError> {
    let raw = if version >= 3 {
        hex::decode(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?
    } else {
        key.as_bytes().to_vec()
    };
    Aes256Gcm::new_from_slice(&raw)
        .map_err(|_| CryptoError::InvalidKey(format!("expected 32 key bytes, got {}", raw.len())))
}

/// Encrypts one plaintext chunk under the per-file key.
pub fn encrypt_chunk(plain: &[u8], key: &str, version: u32) -> Result<Vec<u8>, CryptoError> {
    let cipher = chunk_cipher(key, version)?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plain)
        .map_err(|_| CryptoError::Cipher)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypts one sealed chunk produced by [`encrypt_chunk`].
pub fn decrypt_chunk(sealed: &[u8], key: &str, version: u32) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Malformed(format!(
            "sealed chunk too short: {} bytes",
            sealed.len()
        )));
    }
    let cipher = chunk_cipher(key, version)?;
    let (nonce, body) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), body)
        .map_err(|_| CryptoError::Cipher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_file_key;

    #[test]
    fn seal_and_open() {
        let key = generate_file_key();
        let sealed = encrypt_chunk(b"chunk payload", &key, 2).unwrap();
        assert_eq!(sealed.len(), sealed_len(13));
        assert_eq!(decrypt_chunk(&sealed, &key, 2).unwrap(), b"chunk payload");
    }

    #[test]
    fn nonce_differs_per_call() {
        let key = generate_file_key();
        let a = encrypt_chunk(b"same", &key, 2).unwrap();
        let b = encrypt_chunk(b"same", &key, 2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = encrypt_chunk(b"secret", &generate_file_key(), 2).unwrap();
        let err = decrypt_chunk(&sealed, &generate_file_key(), 2).unwrap_err();
        assert!(matches!(err, CryptoError::Cipher));
    }

    #[test]
    fn tampered_chunk_fails() {
        let key = generate_file_key();
        let mut sealed = encrypt_chunk(b"secret", &key, 2).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(decrypt_chunk(&sealed, &key, 2).is_err());
    }

    #[test]
    fn short_key_rejected() {
        let err = encrypt_chunk(b"x", "too-short", 2).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKey(_)));
    }

    #[test]
    fn hex_key_for_version_three() {
        let key = hex::encode([7u8; 32]);
        let sealed = encrypt_chunk(b"v3 data", &key, 3).unwrap();
        assert_eq!(decrypt_chunk(&sealed, &key, 3).unwrap(), b"v3 data");
    }

    #[test]
    fn truncated_chunk_rejected() {
        let err = decrypt_chunk(&[0u8; 10], &generate_file_key(), 2).unwrap_err();
        assert!(matches!(err, CryptoError::Malformed(_)));
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let key = generate_file_key();
        let sealed = encrypt_chunk(b"", &key, 2).unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + TAG_LEN);
        assert!(decrypt_chunk(&sealed, &key, 2).unwrap().is_empty());
    }
}
