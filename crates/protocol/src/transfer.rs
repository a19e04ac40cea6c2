use serde::{Deserialize, Serialize};

/// Which way a transfer moves bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Queued,
    Running,
    Paused,
    Stopped,
    Done,
    Failed,
}

impl TransferState {
    /// Returns `true` once no further events will follow.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Done | Self::Failed)
    }
}

/// Snapshot of one transfer as reported to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDescriptor {
    /// Stable transfer identifier (the remote uuid of the file).
    pub id: String,
    pub name: String,
    pub direction: Direction,
    pub total_bytes: u64,
    pub chunk_size: u64,
    pub chunk_count: u32,
    pub bytes_transferred: u64,
    /// Milliseconds since the Unix epoch; 0 until the transfer starts.
    #[serde(default)]
    pub started_at: i64,
    pub state: TransferState,
}

impl TransferDescriptor {
    /// Returns the transfer progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / self.total_bytes as f64 * 100.0).min(100.0)
    }
}
