//! Shared mocks for the pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sealdrive_protocol::{FileItem, FileMetadata, LocalFile};
use sealdrive_transfer::{
    ChunkCodec, ChunkLocator, ChunkPlan, ChunkReceipt, DeviceEnv, DownloadChunk, FinalizeStatus,
    MIB, RemoteStore, SeamFuture, StorageRoots, TransferConfig, TransferEngine, TransferError,
    TransferEvent, UploadChunk, UploadSession,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const REGION: &str = "de-1";
pub const BUCKET: &str = "bucket-1";

// ---------------------------------------------------------------------------
// MemStore
// ---------------------------------------------------------------------------

/// In-memory remote store that records every call.
#[derive(Default)]
pub struct MemStore {
    chunks: Mutex<HashMap<(String, u32), Vec<u8>>>,
    pub gets: AtomicUsize,
    pub puts: Mutex<Vec<u32>>,
    put_failures: Mutex<HashMap<u32, String>>,
    pending_finalizes: AtomicUsize,
    pub finalize_calls: AtomicUsize,
    pub shared: Mutex<Vec<(String, String)>>,
}

impl MemStore {
    pub fn fail_put(&self, index: u32, message: &str) {
        self.put_failures
            .lock()
            .unwrap()
            .insert(index, message.to_string());
    }

    /// Answers the next `n` finalize calls with "not done yet".
    pub fn pending_finalizes(&self, n: usize) {
        self.pending_finalizes.store(n, Ordering::SeqCst);
    }

    pub fn put_indices(&self) -> Vec<u32> {
        let mut puts = self.puts.lock().unwrap().clone();
        puts.sort_unstable();
        puts
    }

    pub fn stored_chunks(&self, uuid: &str) -> usize {
        self.chunks
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, _)| id == uuid)
            .count()
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

impl RemoteStore for MemStore {
    fn get_chunk<'a>(&'a self, locator: &'a ChunkLocator) -> SeamFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.chunks
                .lock()
                .unwrap()
                .get(&(locator.uuid.clone(), locator.index))
                .cloned()
                .ok_or_else(|| TransferError::Remote("chunk not found".into()))
        })
    }

    fn put_chunk<'a>(
        &'a self,
        session: &'a UploadSession,
        index: u32,
        sealed: Vec<u8>,
    ) -> SeamFuture<'a, ChunkReceipt> {
        Box::pin(async move {
            self.puts.lock().unwrap().push(index);
            if let Some(message) = self.put_failures.lock().unwrap().get(&index) {
                return Err(TransferError::Remote(message.clone()));
            }
            self.chunks
                .lock()
                .unwrap()
                .insert((session.uuid.clone(), index), sealed);
            Ok(ChunkReceipt {
                region: REGION.into(),
                bucket: BUCKET.into(),
            })
        })
    }

    fn mark_upload_done<'a>(
        &'a self,
        uuid: &'a str,
        _upload_key: &'a str,
    ) -> SeamFuture<'a, FinalizeStatus> {
        Box::pin(async move {
            self.finalize_calls.fetch_add(1, Ordering::SeqCst);
            let pending = self.pending_finalizes.load(Ordering::SeqCst);
            if pending > 0 {
                self.pending_finalizes.store(pending - 1, Ordering::SeqCst);
                return Ok(FinalizeStatus::Pending("chunks not done yet".into()));
            }
            Ok(FinalizeStatus::Done {
                chunks: self.stored_chunks(uuid) as u32,
            })
        })
    }

    fn propagate_to_shared_parent<'a>(
        &'a self,
        parent: &'a str,
        uuid: &'a str,
        _metadata: &'a FileMetadata,
    ) -> SeamFuture<'a, ()> {
        Box::pin(async move {
            self.shared
                .lock()
                .unwrap()
                .push((parent.to_string(), uuid.to_string()));
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// MockEnv
// ---------------------------------------------------------------------------

/// Device environment with scripted free space.
pub struct MockEnv {
    free: AtomicU64,
    free_after_clear: Option<u64>,
    pub clears: AtomicUsize,
    pub online: AtomicBool,
    pub wifi: AtomicBool,
}

impl MockEnv {
    pub fn with_free(free: u64) -> Self {
        Self {
            free: AtomicU64::new(free),
            free_after_clear: None,
            clears: AtomicUsize::new(0),
            online: AtomicBool::new(true),
            wifi: AtomicBool::new(true),
        }
    }

    pub fn freeing_on_clear(free: u64, after: u64) -> Self {
        Self {
            free_after_clear: Some(after),
            ..Self::with_free(free)
        }
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl DeviceEnv for MockEnv {
    fn free_disk_space(&self) -> SeamFuture<'_, u64> {
        Box::pin(async move { Ok(self.free.load(Ordering::SeqCst)) })
    }

    fn clear_caches(&self) -> SeamFuture<'_, ()> {
        Box::pin(async move {
            self.clears.fetch_add(1, Ordering::SeqCst);
            if let Some(after) = self.free_after_clear {
                self.free.store(after, Ordering::SeqCst);
            }
            Ok(())
        })
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn is_wifi(&self) -> bool {
        self.wifi.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// ScriptedCodec
// ---------------------------------------------------------------------------

/// Download-only codec serving slices of [`pattern`] with scripted delays
/// and failures, tracking fetch order and peak concurrency.
pub struct ScriptedCodec {
    plan: ChunkPlan,
    delays: HashMap<u32, Duration>,
    fail_at: Option<u32>,
    pub finished: Mutex<Vec<u32>>,
    running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl ScriptedCodec {
    pub fn new(plan: ChunkPlan) -> Self {
        Self {
            plan,
            delays: HashMap::new(),
            fail_at: None,
            finished: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn delay(mut self, index: u32, delay: Duration) -> Self {
        self.delays.insert(index, delay);
        self
    }

    pub fn delay_all(mut self, delay: Duration) -> Self {
        for index in 0..self.plan.chunk_count() {
            self.delays.insert(index, delay);
        }
        self
    }

    pub fn fail_at(mut self, index: u32) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.finished.lock().unwrap().len()
    }

    pub fn finish_order(&self) -> Vec<u32> {
        self.finished.lock().unwrap().clone()
    }
}

impl ChunkCodec for ScriptedCodec {
    fn upload_chunk<'a>(&'a self, _chunk: &'a UploadChunk) -> SeamFuture<'a, ChunkReceipt> {
        Box::pin(async { Err(TransferError::Remote("uploads not scripted".into())) })
    }

    fn download_chunk<'a>(&'a self, chunk: &'a DownloadChunk) -> SeamFuture<'a, u64> {
        Box::pin(async move {
            let index = chunk.locator.index;
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(&index) {
                tokio::time::sleep(*delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.finished.lock().unwrap().push(index);

            if self.fail_at == Some(index) {
                return Err(TransferError::Remote(format!("chunk {index} unavailable")));
            }
            let range = self.plan.range(index);
            let data = pattern(self.plan.total_bytes());
            let slice = &data[range.start as usize..range.end as usize];
            tokio::fs::write(&chunk.dest, slice).await?;
            Ok(slice.len() as u64)
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Deterministic, non-repeating-per-chunk byte pattern.
pub fn pattern(len: u64) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Config with short timers and no disk margin.
pub fn test_config() -> TransferConfig {
    TransferConfig {
        chunk_size: MIB,
        disk_safety_margin: 0,
        eviction_grace_ms: 10,
        finalize_retry_ms: 10,
        ..TransferConfig::default()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub roots: StorageRoots,
    pub store: Arc<MemStore>,
    pub env: Arc<MockEnv>,
    pub engine: TransferEngine,
    pub events: mpsc::Receiver<TransferEvent>,
}

impl Harness {
    /// Engine sealing chunks with AES into a [`MemStore`].
    pub fn new(config: TransferConfig) -> Self {
        Self::build(config, MockEnv::with_free(u64::MAX), None)
    }

    /// Engine over a scripted download codec.
    pub fn scripted(config: TransferConfig, env: MockEnv, codec: Arc<ScriptedCodec>) -> Self {
        Self::build(config, env, Some(codec))
    }

    fn build(config: TransferConfig, env: MockEnv, codec: Option<Arc<ScriptedCodec>>) -> Self {
        let dir = TempDir::new().unwrap();
        let roots = StorageRoots::new(dir.path());
        let store = Arc::new(MemStore::default());
        let env = Arc::new(env);
        let mut engine = match codec {
            Some(codec) => TransferEngine::with_codec(
                config,
                roots.clone(),
                store.clone(),
                env.clone(),
                codec,
            ),
            None => TransferEngine::new(config, roots.clone(), store.clone(), env.clone()),
        };
        engine.set_master_keys(vec!["old-master".into(), "master-key".into()]);
        let events = engine.take_events().unwrap();
        Self {
            dir,
            roots,
            store,
            env,
            engine,
            events,
        }
    }

    /// Writes `len` pattern bytes to a scratch file and describes it.
    pub fn local_file(&self, name: &str, len: u64) -> (LocalFile, Vec<u8>) {
        let data = pattern(len);
        let path = self.dir.path().join("src").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, &data).unwrap();
        let file = LocalFile {
            path: path.to_string_lossy().into_owned(),
            name: name.to_string(),
            size: len,
            mime: String::new(),
            last_modified: 0,
        };
        (file, data)
    }

    /// Events emitted so far.
    pub fn drain(&mut self) -> Vec<TransferEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Remote descriptor for a scripted download.
pub fn remote_item(uuid: &str, name: &str, plan: &ChunkPlan) -> FileItem {
    FileItem {
        uuid: uuid.into(),
        name: name.into(),
        size: plan.total_bytes(),
        mime: String::new(),
        parent: "root".into(),
        key: "k".repeat(32),
        region: REGION.into(),
        bucket: BUCKET.into(),
        chunks: plan.chunk_count(),
        version: 2,
        offline: false,
        favorited: false,
    }
}

pub fn terminal_events(events: &[TransferEvent]) -> Vec<&TransferEvent> {
    events.iter().filter(|e| e.is_terminal()).collect()
}

pub fn progress_bytes(events: &[TransferEvent], id: &str) -> u64 {
    events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Progress { id: pid, bytes, .. } if pid == id => Some(*bytes),
            _ => None,
        })
        .sum()
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}
