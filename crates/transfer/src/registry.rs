//! UI-facing view of in-flight transfers, fed by [`TransferEvent`]s.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use sealdrive_protocol::{Direction, TransferDescriptor, TransferState};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::events::{FailureKind, TransferEvent};

// ---------------------------------------------------------------------------
// Throughput
// ---------------------------------------------------------------------------

/// How far back progress counts toward the throughput estimate.
const RATE_WINDOW: Duration = Duration::from_secs(5);
/// Progress events kept per transfer.
const RATE_SAMPLES: usize = 64;

/// Recent progress of one transfer, as `(arrival, bytes)` pairs.
#[derive(Default)]
struct Throughput {
    samples: VecDeque<(Instant, u64)>,
}

impl Throughput {
    fn record(&mut self, bytes: u64, now: Instant) {
        self.samples.push_back((now, bytes));
        while self.samples.len() > RATE_SAMPLES {
            self.samples.pop_front();
        }
        while let Some(&(at, _)) = self.samples.front() {
            if now.duration_since(at) <= RATE_WINDOW {
                break;
            }
            self.samples.pop_front();
        }
    }

    /// Bytes per second between the oldest and newest retained sample.
    ///
    /// The oldest sample only marks the start of the span, so its bytes are
    /// not counted.
    fn rate(&self) -> f64 {
        let (Some(&(from, _)), Some(&(to, _))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let span = to.duration_since(from);
        if span.is_zero() {
            return 0.0;
        }
        let moved: u64 = self.samples.iter().skip(1).map(|&(_, bytes)| bytes).sum();
        moved as f64 / span.as_secs_f64()
    }
}

// ---------------------------------------------------------------------------
// TransferRegistry
// ---------------------------------------------------------------------------

/// A failure the UI should surface exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: String,
    pub name: String,
    pub direction: Direction,
    pub kind: FailureKind,
    pub cause: String,
}

struct Entry {
    descriptor: TransferDescriptor,
    throughput: Throughput,
}

/// Set of transfers between their `Start` and terminal events.
#[derive(Default)]
pub struct TransferRegistry {
    entries: HashMap<String, Entry>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into the registry.
    ///
    /// Returns a [`Notification`] for failures the user should see. Stops
    /// and successful completions only remove the entry.
    pub fn apply(&mut self, event: &TransferEvent) -> Option<Notification> {
        match event {
            TransferEvent::Start(descriptor) => {
                self.entries.insert(
                    descriptor.id.clone(),
                    Entry {
                        descriptor: descriptor.clone(),
                        throughput: Throughput::default(),
                    },
                );
                None
            }
            TransferEvent::Started(descriptor) => {
                if let Some(entry) = self.entries.get_mut(&descriptor.id) {
                    entry.descriptor.state = TransferState::Running;
                    entry.descriptor.total_bytes = descriptor.total_bytes;
                    entry.descriptor.chunk_count = descriptor.chunk_count;
                }
                None
            }
            TransferEvent::Progress { id, bytes, .. } => {
                match self.entries.get_mut(id) {
                    Some(entry) => {
                        let d = &mut entry.descriptor;
                        d.bytes_transferred = (d.bytes_transferred + bytes).min(d.total_bytes);
                        entry.throughput.record(*bytes, Instant::now());
                    }
                    None => trace!(id = %id, "progress for unknown transfer"),
                }
                None
            }
            TransferEvent::Done { descriptor, .. } | TransferEvent::Stopped(descriptor) => {
                self.entries.remove(&descriptor.id);
                None
            }
            TransferEvent::Err {
                descriptor,
                kind,
                cause,
            } => {
                self.entries.remove(&descriptor.id);
                if *kind == FailureKind::Stopped {
                    return None;
                }
                Some(Notification {
                    id: descriptor.id.clone(),
                    name: descriptor.name.clone(),
                    direction: descriptor.direction,
                    kind: *kind,
                    cause: cause.clone(),
                })
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&TransferDescriptor> {
        self.entries.get(id).map(|e| &e.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of in-flight transfers in `direction`.
    pub fn in_flight(&self, direction: Direction) -> usize {
        self.entries
            .values()
            .filter(|e| e.descriptor.direction == direction)
            .count()
    }

    /// Copies of every tracked descriptor, oldest first.
    pub fn snapshot(&self) -> Vec<TransferDescriptor> {
        let mut all: Vec<_> = self.entries.values().map(|e| e.descriptor.clone()).collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Recent throughput of `id` in bytes per second; 0.0 until measurable.
    pub fn speed(&self, id: &str) -> f64 {
        self.entries.get(id).map_or(0.0, |e| e.throughput.rate())
    }

    /// Time left for `id` at its recent throughput.
    pub fn eta(&self, id: &str) -> Option<Duration> {
        let entry = self.entries.get(id)?;
        let rate = entry.throughput.rate();
        if rate <= 0.0 {
            return None;
        }
        let d = &entry.descriptor;
        let left = d.total_bytes.saturating_sub(d.bytes_transferred);
        Some(Duration::from_secs_f64(left as f64 / rate))
    }
}

/// Feeds `events` into `registry` until the channel closes, forwarding
/// user-visible failures to `notices`.
pub async fn drive(
    registry: Arc<Mutex<TransferRegistry>>,
    mut events: mpsc::Receiver<TransferEvent>,
    notices: mpsc::Sender<Notification>,
) {
    while let Some(event) = events.recv().await {
        let notice = registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(&event);
        let Some(notice) = notice else {
            continue;
        };
        if notices.send(notice).await.is_err() {
            trace!("notification receiver dropped");
        }
    }
    debug!("event channel closed, registry driver exiting");
}
