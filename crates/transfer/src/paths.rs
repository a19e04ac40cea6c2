//! On-device storage layout and file-name helpers.

use std::io;
use std::path::{Path, PathBuf};

use sealdrive_crypto::random_string;
use tracing::{debug, warn};

use crate::error::TransferError;

/// Length of the random prefix that keeps concurrent temp paths apart.
const TEMP_PREFIX_LEN: usize = 16;

/// A storage root below the base directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    /// Volatile per-chunk artifacts and in-progress assemblies.
    Temp,
    /// Size-bounded secondary cache, keyed by remote id.
    Cache,
    /// Permanent offline copies.
    Offline,
    /// Plain user downloads.
    Downloads,
    /// Generated preview thumbnails.
    Thumbnails,
}

impl Root {
    pub const ALL: [Root; 5] = [
        Root::Temp,
        Root::Cache,
        Root::Offline,
        Root::Downloads,
        Root::Thumbnails,
    ];

    fn dir_name(self) -> &'static str {
        match self {
            Root::Temp => "temp",
            Root::Cache => "cachedDownloads",
            Root::Offline => "offlineFiles",
            Root::Downloads => "Downloads",
            Root::Thumbnails => "thumbnailCache",
        }
    }
}

/// Directory layout derived from one base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRoots {
    base: PathBuf,
}

impl StorageRoots {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn dir(&self, root: Root) -> PathBuf {
        self.base.join(root.dir_name())
    }

    /// Creates `root` if missing and returns its path. Idempotent.
    pub fn ensure(&self, root: Root) -> io::Result<PathBuf> {
        let dir = self.dir(root);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn ensure_all(&self) -> io::Result<()> {
        for root in Root::ALL {
            self.ensure(root)?;
        }
        Ok(())
    }

    /// `{cachedDownloads}/{uuid}.{ext}`
    pub fn cache_path(&self, uuid: &str, name: &str) -> PathBuf {
        self.dir(Root::Cache).join(keyed_name(uuid, name))
    }

    /// `{offlineFiles}/{uuid}.{ext}`
    pub fn offline_path(&self, uuid: &str, name: &str) -> PathBuf {
        self.dir(Root::Offline).join(keyed_name(uuid, name))
    }

    /// `{Downloads}/{name}` with path separators neutralised.
    pub fn download_path(&self, name: &str) -> PathBuf {
        self.dir(Root::Downloads).join(sanitize_name(name))
    }

    /// `{temp}/{random}.{uuid}.chunk.{index}`
    pub fn chunk_temp_path(&self, uuid: &str, index: u32) -> PathBuf {
        self.dir(Root::Temp).join(format!(
            "{}.{}.chunk.{index}",
            random_string(TEMP_PREFIX_LEN),
            sanitize_name(uuid)
        ))
    }

    /// `{temp}/{random}{uuid}.{ext}`
    pub fn assembly_path(&self, uuid: &str, name: &str) -> PathBuf {
        self.dir(Root::Temp).join(format!(
            "{}{}",
            random_string(TEMP_PREFIX_LEN),
            keyed_name(uuid, name)
        ))
    }

    /// `{thumbnailCache}/{uuid}.jpg`
    pub fn thumbnail_path(&self, uuid: &str) -> PathBuf {
        self.dir(Root::Thumbnails)
            .join(format!("{}.jpg", sanitize_name(uuid)))
    }

    /// Removes every per-chunk temp file belonging to `uuid`.
    ///
    /// Returns the number of files removed. Individual removal failures are
    /// logged and skipped.
    pub fn remove_chunk_artifacts(&self, uuid: &str) -> io::Result<usize> {
        let dir = self.dir(Root::Temp);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let marker = format!(".{}.chunk.", sanitize_name(uuid));
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().contains(&marker) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to remove chunk artifact"),
            }
        }
        if removed > 0 {
            debug!(uuid, removed, "removed chunk artifacts");
        }
        Ok(removed)
    }
}

fn keyed_name(uuid: &str, name: &str) -> String {
    let uuid = sanitize_name(uuid);
    let ext = file_ext(name);
    if ext.is_empty() {
        uuid
    } else {
        format!("{uuid}.{ext}")
    }
}

/// Lower-cased extension after the last dot, or empty.
pub fn file_ext(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_lowercase(),
        _ => String::new(),
    }
}

/// Replaces path separators so a remote name cannot escape its directory.
pub fn sanitize_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

/// Validates a file name before it is used as an upload or placement name.
///
/// Rejects empty names, `.` and `..`, and names containing NUL.
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }
    if trimmed == "." || trimmed == ".." {
        return Err(TransferError::InvalidName(format!(
            "reserved name not allowed: {name}"
        )));
    }
    if name.contains('\0') {
        return Err(TransferError::InvalidName(format!(
            "NUL byte not allowed: {name:?}"
        )));
    }
    Ok(())
}
