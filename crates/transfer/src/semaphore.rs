//! FIFO counting semaphore with adjustable capacity and purge.
//!
//! One instance exists per concurrency class (whole transfers, chunk
//! workers, pending writes). A released slot is handed directly to the
//! oldest waiter, so a slot is never idle while someone is queued.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

/// Error returned to waiters rejected by [`Semaphore::purge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SemaphoreError {
    #[error("semaphore purged")]
    Purged,
}

/// Cloneable handle to a shared counting semaphore.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<Mutex<State>>,
}

struct State {
    max: usize,
    in_use: usize,
    /// Bumped by `purge`; permits from an older generation release nothing.
    generation: u64,
    waiters: VecDeque<oneshot::Sender<Permit>>,
}

/// A granted slot. Dropping the permit releases the slot.
pub struct Permit {
    sem: Semaphore,
    generation: u64,
    armed: bool,
}

impl Semaphore {
    /// Creates a semaphore admitting `max` concurrent holders (at least 1).
    pub fn new(max: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State {
                max: max.max(1),
                in_use: 0,
                generation: 0,
                waiters: VecDeque::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for a free slot.
    ///
    /// Suspends only the calling task; fails with [`SemaphoreError::Purged`]
    /// if the semaphore is purged while waiting.
    pub async fn acquire(&self) -> Result<Permit, SemaphoreError> {
        let rx = {
            let mut state = self.lock();
            if state.in_use < state.max && state.waiters.is_empty() {
                state.in_use += 1;
                return Ok(Permit::new(self.clone(), state.generation));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        rx.await.map_err(|_| SemaphoreError::Purged)
    }

    /// Takes a slot only if one is free right now and nobody is queued.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut state = self.lock();
        if state.in_use < state.max && state.waiters.is_empty() {
            state.in_use += 1;
            Some(Permit::new(self.clone(), state.generation))
        } else {
            None
        }
    }

    /// Number of granted, unreleased slots.
    pub fn count(&self) -> usize {
        self.lock().in_use
    }

    /// Number of queued acquirers.
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Current capacity.
    pub fn max(&self) -> usize {
        self.lock().max
    }

    /// Changes capacity. Already-granted slots are unaffected; growing the
    /// capacity admits queued waiters immediately.
    pub fn set_max(&self, max: usize) {
        let mut state = self.lock();
        state.max = max.max(1);
        self.grant(&mut state);
    }

    /// Rejects every queued acquirer and resets the in-use count to zero.
    ///
    /// Only for abrupt teardown. Permits granted before the purge become
    /// inert. Returns the number of rejected waiters.
    pub fn purge(&self) -> usize {
        let mut state = self.lock();
        let rejected = state.waiters.len();
        state.waiters.clear();
        state.in_use = 0;
        state.generation += 1;
        rejected
    }

    fn release_slot(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        state.in_use = state.in_use.saturating_sub(1);
        self.grant(&mut state);
    }

    /// Hands free slots to the oldest live waiters.
    fn grant(&self, state: &mut State) {
        while state.in_use < state.max {
            let Some(tx) = state.waiters.pop_front() else {
                break;
            };
            state.in_use += 1;
            if let Err(mut permit) = tx.send(Permit::new(self.clone(), state.generation)) {
                // Waiter went away; reclaim the slot without re-locking.
                permit.armed = false;
                state.in_use -= 1;
            }
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Semaphore")
            .field("max", &state.max)
            .field("in_use", &state.in_use)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

impl Permit {
    fn new(sem: Semaphore, generation: u64) -> Self {
        Self {
            sem,
            generation,
            armed: true,
        }
    }

    /// Releases the slot now. Equivalent to dropping the permit.
    pub fn release(self) {}
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            self.sem.release_slot(self.generation);
        }
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("generation", &self.generation)
            .finish()
    }
}
