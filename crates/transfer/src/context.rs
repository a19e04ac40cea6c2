//! State shared by both pipelines.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sealdrive_protocol::{TransferDescriptor, TransferState};
use tracing::{error, info};

use crate::config::TransferConfig;
use crate::control::ControlBus;
use crate::env::DeviceEnv;
use crate::error::TransferError;
use crate::events::{EventSink, TransferEvent, TransferOutput};
use crate::paths::StorageRoots;

/// Collaborators every pipeline needs.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<TransferConfig>,
    pub roots: StorageRoots,
    pub env: Arc<dyn DeviceEnv>,
    pub bus: ControlBus,
    pub events: EventSink,
    pub active: ActiveTransfers,
}

impl PipelineContext {
    /// Emits the single terminal event for `result` and returns it unchanged.
    ///
    /// A stop is reported as [`TransferEvent::Stopped`], never as an error.
    pub(crate) async fn report<T>(
        &self,
        mut descriptor: TransferDescriptor,
        result: Result<T, TransferError>,
        output: impl FnOnce(&T) -> TransferOutput,
    ) -> Result<T, TransferError> {
        let event = match &result {
            Ok(value) => {
                descriptor.state = TransferState::Done;
                descriptor.bytes_transferred = descriptor.total_bytes;
                info!(
                    id = %descriptor.id,
                    direction = ?descriptor.direction,
                    bytes = descriptor.total_bytes,
                    "transfer done"
                );
                TransferEvent::Done {
                    descriptor,
                    output: output(value),
                }
            }
            Err(e) if e.is_stopped() => {
                descriptor.state = TransferState::Stopped;
                info!(id = %descriptor.id, direction = ?descriptor.direction, "transfer stopped");
                TransferEvent::Stopped(descriptor)
            }
            Err(e) => {
                descriptor.state = TransferState::Failed;
                error!(
                    id = %descriptor.id,
                    direction = ?descriptor.direction,
                    error = %e,
                    "transfer failed"
                );
                TransferEvent::Err {
                    descriptor,
                    kind: e.kind(),
                    cause: e.to_string(),
                }
            }
        };
        self.events.emit(event).await;
        result
    }
}

/// Ids of transfers currently owned by a pipeline.
#[derive(Debug, Clone, Default)]
pub struct ActiveTransfers {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl ActiveTransfers {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `id` as in flight until the returned guard drops.
    ///
    /// The id is reserved on `bus`; a reservation made earlier keeps its state.
    pub fn claim(&self, id: &str, bus: &ControlBus) -> Result<ActiveGuard, TransferError> {
        if !self.lock().insert(id.to_string()) {
            return Err(TransferError::AlreadyTransferring(id.to_string()));
        }
        bus.reserve(id);
        Ok(ActiveGuard {
            id: id.to_string(),
            active: self.clone(),
            bus: bus.clone(),
        })
    }

    /// Drops a bus reservation for `id` unless a transfer holds the id.
    pub fn release(&self, id: &str, bus: &ControlBus) {
        let ids = self.lock();
        if !ids.contains(id) {
            bus.forget(id);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Releases an id from [`ActiveTransfers`] and its control-bus entry on drop.
#[derive(Debug)]
pub struct ActiveGuard {
    id: String,
    active: ActiveTransfers,
    bus: ControlBus,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.id);
        self.bus.forget(&self.id);
    }
}
