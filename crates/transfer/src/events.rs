//! Lifecycle and progress events emitted to the UI layer.

use std::path::PathBuf;

use sealdrive_protocol::{Direction, TransferDescriptor, UploadedItem};
use tokio::sync::mpsc;
use tracing::trace;

/// Category of a failed transfer, so the UI can pick a dedicated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network or codec failure; the caller may re-queue.
    Transient,
    OutOfStorage,
    WifiOnly,
    Offline,
    Stopped,
    DuplicateName,
    QuotaExceeded,
    Other,
}

/// Result payload of a completed transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutput {
    Downloaded { path: PathBuf },
    Uploaded(UploadedItem),
}

/// Event emitted by the pipelines.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// The transfer passed its preflight checks.
    Start(TransferDescriptor),
    /// Setup is confirmed and chunk work is under way.
    Started(TransferDescriptor),
    /// `bytes` more bytes were committed (download) or acknowledged (upload).
    Progress {
        direction: Direction,
        id: String,
        bytes: u64,
    },
    Done {
        descriptor: TransferDescriptor,
        output: TransferOutput,
    },
    /// Failed for a reason other than a stop.
    Err {
        descriptor: TransferDescriptor,
        kind: FailureKind,
        cause: String,
    },
    /// Ended by a stop signal. Not an error.
    Stopped(TransferDescriptor),
}

impl TransferEvent {
    /// Transfer id the event belongs to.
    pub fn id(&self) -> &str {
        match self {
            Self::Start(d) | Self::Started(d) | Self::Stopped(d) => &d.id,
            Self::Done { descriptor, .. } | Self::Err { descriptor, .. } => &descriptor.id,
            Self::Progress { id, .. } => id,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Self::Start(d) | Self::Started(d) | Self::Stopped(d) => d.direction,
            Self::Done { descriptor, .. } | Self::Err { descriptor, .. } => descriptor.direction,
            Self::Progress { direction, .. } => *direction,
        }
    }

    /// Returns `true` for the last event of a transfer.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Err { .. } | Self::Stopped(_))
    }
}

/// Sending half of the event channel.
///
/// Lifecycle events wait for channel capacity; progress events are dropped
/// when the channel is full so workers never stall on a slow consumer.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<TransferEvent>,
}

impl EventSink {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<TransferEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    pub async fn emit(&self, event: TransferEvent) {
        if self.tx.send(event).await.is_err() {
            trace!("event receiver dropped");
        }
    }

    pub fn progress(&self, direction: Direction, id: &str, bytes: u64) {
        let _ = self.tx.try_send(TransferEvent::Progress {
            direction,
            id: id.to_string(),
            bytes,
        });
    }
}
