//! Transfer error taxonomy.

use std::path::PathBuf;

use crate::events::FailureKind;
use crate::semaphore::SemaphoreError;

/// Errors produced by the transfer engine.
///
/// Variants group into transient failures (`Io`, `Remote`, `Crypto`),
/// capacity (`OutOfStorage`), policy (`WifiOnly`, `Offline`), cooperative
/// cancellation (`Stopped`) and terminal server conditions (`DuplicateName`,
/// `QuotaExceeded`).
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] sealdrive_crypto::CryptoError),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("device out of storage: need {required} bytes, {available} available")]
    OutOfStorage { required: u64, available: u64 },

    #[error("transfers restricted to Wi-Fi")]
    WifiOnly,

    #[error("device is offline")]
    Offline,

    #[error("stopped")]
    Stopped,

    #[error("an item with this name already exists: {0}")]
    DuplicateName(String),

    #[error("not enough remote storage")]
    QuotaExceeded,

    #[error("already transferring {0}")]
    AlreadyTransferring(String),

    #[error("no master keys available")]
    NoMasterKeys,

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("transfer slots purged")]
    Purged,
}

impl TransferError {
    /// Classifies a raw failure message returned by the remote store.
    pub fn from_remote_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("already exists") {
            Self::DuplicateName(message)
        } else if lower.contains("blacklist")
            || lower.contains("not enough storage")
            || lower.contains("storage quota")
        {
            Self::QuotaExceeded
        } else {
            Self::Remote(message)
        }
    }

    /// Re-reads a raw `Remote` message for terminal server conditions.
    pub fn classify(self) -> Self {
        match self {
            Self::Remote(message) => Self::from_remote_message(message),
            other => other,
        }
    }

    /// Category reported to the UI alongside the cause string.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Io(_) | Self::Json(_) | Self::Crypto(_) | Self::Remote(_) => {
                FailureKind::Transient
            }
            Self::OutOfStorage { .. } => FailureKind::OutOfStorage,
            Self::WifiOnly => FailureKind::WifiOnly,
            Self::Offline => FailureKind::Offline,
            Self::Stopped => FailureKind::Stopped,
            Self::DuplicateName(_) => FailureKind::DuplicateName,
            Self::QuotaExceeded => FailureKind::QuotaExceeded,
            Self::AlreadyTransferring(_)
            | Self::NoMasterKeys
            | Self::FileNotFound(_)
            | Self::InvalidName(_)
            | Self::Purged => FailureKind::Other,
        }
    }

    /// Returns `true` for cooperative cancellation.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns `true` if the failure should be surfaced to the user.
    ///
    /// A stop is an intentional user action and never reported as an error.
    pub fn is_user_visible(&self) -> bool {
        !self.is_stopped()
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Io(std::io::Error::other(e))
    }
}

impl From<SemaphoreError> for TransferError {
    fn from(_: SemaphoreError) -> Self {
        Self::Purged
    }
}
