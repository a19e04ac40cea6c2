//! Client-side encryption primitives used by the transfer engine.
//!
//! - **Chunks** are sealed with AES-256-GCM under the per-file key:
//!   `nonce (12 bytes) || ciphertext || tag`.
//! - **Metadata** strings are sealed under a master key (or the per-file key)
//!   in the versioned text envelope `"002" || iv (12 chars) || base64(ct || tag)`.
//! - Key material is generated locally and never leaves the device in the clear.

mod chunk;
mod hash;
mod keys;
mod metadata;

pub use chunk::{NONCE_LEN, TAG_LEN, decrypt_chunk, encrypt_chunk, sealed_len};
pub use hash::{checksum_bytes, file_hash_sha512, hash_name};
pub use keys::{FILE_KEY_LEN, generate_file_key, random_string};
pub use metadata::{METADATA_VERSION, decrypt_metadata, decrypt_metadata_any, encrypt_metadata};

/// Errors produced by the crypto crate.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(String),

    #[error("cipher failure")]
    Cipher,
}
