use std::io::Read;
use std::path::Path;

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::CryptoError;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hashes a file name for server-side lookups without revealing it:
/// `hex(SHA-1(hex(SHA-512(lowercase(name)))))`.
pub fn hash_name(name: &str) -> String {
    let inner = hex::encode(Sha512::digest(name.to_lowercase().as_bytes()));
    hex::encode(Sha1::digest(inner.as_bytes()))
}

/// Computes SHA-512 of an entire file and returns the hex-encoded digest.
///
/// Blocking; call from `spawn_blocking` inside async code.
pub fn file_hash_sha512(path: &Path) -> Result<String, CryptoError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha512::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
