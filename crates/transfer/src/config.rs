//! Engine configuration.
//!
//! Persisted as JSON; every field is optional on disk and falls back to the
//! default below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransferError;

pub const MIB: u64 = 1024 * 1024;

/// Tunables for both pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransferConfig {
    /// Plaintext bytes per chunk.
    pub chunk_size: u64,
    /// Whole-file transfers in flight, per direction.
    pub max_transfers: usize,
    /// Parallel chunk fetch/decrypt workers across all downloads.
    pub download_workers: usize,
    /// Parallel chunk encrypt/send workers across all uploads.
    pub upload_workers: usize,
    /// Fetched chunks allowed to wait for their commit turn.
    pub write_buffers: usize,
    /// Free space kept in reserve on top of the download size.
    pub disk_safety_margin: u64,
    /// Wait after a cache eviction before re-checking free space.
    pub eviction_grace_ms: u64,
    /// Completed downloads below this size are mirrored into the cache.
    pub secondary_cache_max_bytes: u64,
    pub wifi_only_downloads: bool,
    pub wifi_only_uploads: bool,
    /// Remote object format version written by uploads.
    pub upload_version: u32,
    /// Attempts at marking an upload done while the server is still settling.
    pub finalize_attempts: u32,
    pub finalize_retry_ms: u64,
    /// Capacity of the event channel.
    pub event_buffer: usize,
    /// Adds a SHA-512 content hash to upload metadata.
    pub include_file_hash: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: MIB,
            max_transfers: 3,
            download_workers: 16,
            upload_workers: 10,
            write_buffers: 256,
            disk_safety_margin: 256 * MIB,
            eviction_grace_ms: 5000,
            secondary_cache_max_bytes: 64 * MIB,
            wifi_only_downloads: false,
            wifi_only_uploads: false,
            upload_version: 2,
            finalize_attempts: 32,
            finalize_retry_ms: 1000,
            event_buffer: 256,
            include_file_hash: false,
        }
    }
}

impl TransferConfig {
    /// Loads the config at `path`.
    ///
    /// A missing file yields defaults; an unparsable one is logged and also
    /// yields defaults.
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse transfer config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Writes the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), TransferError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "transfer config saved");
        Ok(())
    }

    pub fn eviction_grace(&self) -> Duration {
        Duration::from_millis(self.eviction_grace_ms)
    }

    pub fn finalize_retry(&self) -> Duration {
        Duration::from_millis(self.finalize_retry_ms)
    }
}
