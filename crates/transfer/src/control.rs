//! Pause/resume/stop signalling keyed by transfer id.
//!
//! Signals are level-triggered: each transfer id owns a `watch` channel whose
//! current value is the control state, so a worker that subscribes after a
//! stop still observes it.
//!
//! An id has an entry only between [`ControlBus::reserve`] (or the pipeline
//! claiming it) and [`ControlBus::forget`]. Signals for any other id are
//! dropped, so a late signal can never reach a later transfer of the same id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use crate::error::TransferError;

/// Signal published on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Pause,
    Resume,
    Stop,
}

/// Current control state of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlState {
    #[default]
    Running,
    Paused,
    /// Sticky: a stopped transfer never returns to running.
    Stopped,
}

impl ControlState {
    fn apply(self, signal: ControlSignal) -> Self {
        match (self, signal) {
            (Self::Stopped, _) => Self::Stopped,
            (_, ControlSignal::Stop) => Self::Stopped,
            (_, ControlSignal::Pause) => Self::Paused,
            (_, ControlSignal::Resume) => Self::Running,
        }
    }
}

/// Shared control surface. Cloning yields another handle to the same bus.
#[derive(Debug, Clone, Default)]
pub struct ControlBus {
    channels: Arc<Mutex<HashMap<String, watch::Sender<ControlState>>>>,
}

impl ControlBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<ControlState>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `id` so signals sent before its transfer starts are kept.
    ///
    /// Returns `false` if the id already had an entry, whose state is left as is.
    pub fn reserve(&self, id: &str) -> bool {
        let mut channels = self.lock();
        if channels.contains_key(id) {
            return false;
        }
        channels.insert(id.to_string(), watch::channel(ControlState::Running).0);
        true
    }

    /// Returns the state token for `id`, reserving the entry if needed.
    pub fn token(&self, id: &str) -> TransferToken {
        let mut channels = self.lock();
        let tx = channels
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(ControlState::Running).0);
        TransferToken {
            id: id.to_string(),
            rx: tx.subscribe(),
        }
    }

    /// Publishes `signal` for `id`.
    ///
    /// Returns `false` and drops the signal when `id` has no entry.
    pub fn signal(&self, id: &str, signal: ControlSignal) -> bool {
        let channels = self.lock();
        let Some(tx) = channels.get(id) else {
            debug!(transfer = %id, ?signal, "control signal for unknown transfer dropped");
            return false;
        };
        tx.send_if_modified(|state| {
            let next = state.apply(signal);
            let changed = next != *state;
            *state = next;
            changed
        });
        debug!(transfer = %id, ?signal, "control signal");
        true
    }

    pub fn pause(&self, id: &str) -> bool {
        self.signal(id, ControlSignal::Pause)
    }

    pub fn resume(&self, id: &str) -> bool {
        self.signal(id, ControlSignal::Resume)
    }

    pub fn stop(&self, id: &str) -> bool {
        self.signal(id, ControlSignal::Stop)
    }

    /// Current state of `id`, if the bus knows it.
    pub fn state(&self, id: &str) -> Option<ControlState> {
        self.lock().get(id).map(|tx| *tx.borrow())
    }

    /// Ids with a live entry.
    pub fn ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Drops the entry for `id` once its transfer reached a terminal state,
    /// or releases a reservation that will not be queued.
    pub fn forget(&self, id: &str) {
        self.lock().remove(id);
    }
}

/// Per-transfer state token handed to every worker.
#[derive(Debug, Clone)]
pub struct TransferToken {
    id: String,
    rx: watch::Receiver<ControlState>,
}

impl TransferToken {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ControlState {
        *self.rx.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ControlState::Stopped
    }

    pub fn is_paused(&self) -> bool {
        self.state() == ControlState::Paused
    }

    /// Cooperative checkpoint before starting a unit of work.
    ///
    /// Returns immediately while running, fails with
    /// [`TransferError::Stopped`] once stopped, and suspends while paused
    /// until resumed or stopped. A bus entry dropped mid-pause counts as a stop.
    pub async fn checkpoint(&self) -> Result<(), TransferError> {
        let mut rx = self.rx.clone();
        let state = match rx
            .wait_for(|state| *state != ControlState::Paused)
            .await
        {
            Ok(state) => *state,
            Err(_) => ControlState::Stopped,
        };
        match state {
            ControlState::Stopped => Err(TransferError::Stopped),
            _ => Ok(()),
        }
    }

    /// Resolves once the transfer is stopped (or its bus entry is dropped).
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|state| *state == ControlState::Stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_before_subscribe_is_observed() {
        let bus = ControlBus::new();
        assert!(bus.reserve("t1"));
        assert!(bus.stop("t1"));
        let token = bus.token("t1");
        assert!(token.is_stopped());
        assert!(matches!(
            token.checkpoint().await,
            Err(TransferError::Stopped)
        ));
    }

    #[tokio::test]
    async fn running_checkpoint_passes() {
        let bus = ControlBus::new();
        let token = bus.token("t1");
        token.checkpoint().await.unwrap();
        assert_eq!(bus.state("t1"), Some(ControlState::Running));
    }

    #[tokio::test]
    async fn pause_suspends_until_resume() {
        let bus = ControlBus::new();
        let token = bus.token("t1");
        bus.pause("t1");

        let t = token.clone();
        let waiter = tokio::spawn(async move { t.checkpoint().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        bus.resume("t1");
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_wakes_paused_worker() {
        let bus = ControlBus::new();
        let token = bus.token("t1");
        bus.pause("t1");

        let t = token.clone();
        let waiter = tokio::spawn(async move { t.checkpoint().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        bus.stop("t1");
        assert!(matches!(
            waiter.await.unwrap(),
            Err(TransferError::Stopped)
        ));
    }

    #[tokio::test]
    async fn stopped_resolves_on_stop() {
        let bus = ControlBus::new();
        let token = bus.token("t1");
        let t = token.clone();
        let waiter = tokio::spawn(async move { t.stopped().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        bus.stop("t1");
        waiter.await.unwrap();
    }

    #[test]
    fn stop_is_sticky() {
        let bus = ControlBus::new();
        bus.reserve("t1");
        bus.stop("t1");
        bus.resume("t1");
        bus.pause("t1");
        assert_eq!(bus.state("t1"), Some(ControlState::Stopped));
    }

    #[test]
    fn tokens_are_isolated_per_id() {
        let bus = ControlBus::new();
        let a = bus.token("a");
        let b = bus.token("b");
        bus.stop("a");
        assert!(a.is_stopped());
        assert!(!b.is_stopped());
    }

    #[test]
    fn forget_removes_entry() {
        let bus = ControlBus::new();
        bus.reserve("t1");
        bus.pause("t1");
        assert_eq!(bus.ids(), vec!["t1".to_string()]);
        bus.forget("t1");
        assert_eq!(bus.state("t1"), None);
        assert!(bus.ids().is_empty());
    }

    #[test]
    fn signals_for_unknown_ids_are_dropped() {
        let bus = ControlBus::new();
        assert!(!bus.stop("never-queued"));
        assert!(!bus.pause("never-queued"));
        assert_eq!(bus.state("never-queued"), None);
        assert!(bus.ids().is_empty());
    }

    #[tokio::test]
    async fn late_signal_does_not_reach_next_transfer() {
        let bus = ControlBus::new();
        let _first = bus.token("t1");
        bus.forget("t1");
        assert!(!bus.stop("t1"));
        assert!(!bus.pause("t1"));

        let second = bus.token("t1");
        assert_eq!(second.state(), ControlState::Running);
        second.checkpoint().await.unwrap();
    }

    #[test]
    fn reserve_keeps_existing_state() {
        let bus = ControlBus::new();
        assert!(bus.reserve("t1"));
        bus.pause("t1");
        assert!(!bus.reserve("t1"));
        assert_eq!(bus.state("t1"), Some(ControlState::Paused));
    }

    #[tokio::test]
    async fn forgotten_while_paused_counts_as_stop() {
        let bus = ControlBus::new();
        let token = bus.token("t1");
        bus.pause("t1");
        bus.forget("t1");
        assert!(matches!(
            token.checkpoint().await,
            Err(TransferError::Stopped)
        ));
    }
}
