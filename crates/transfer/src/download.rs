//! Download pipeline.
//!
//! Chunks are fetched and decrypted in parallel into private temp files and
//! committed to one assembly file strictly in index order:
//!
//! 1. Policy checks, then a whole-transfer slot (skipped for previews).
//! 2. Cache lookup keyed by `(uuid, extension)`; a hit fetches nothing.
//! 3. Free-space preflight with one eviction pass and a grace delay.
//! 4. `Start`/`Started`, then dispatch in ascending index order. Each chunk
//!    takes a write slot, then a worker slot; the worker slot is returned as
//!    soon as the fetch finishes.
//! 5. Commit waits on the write cursor: index 0 is renamed into place, later
//!    indices are appended.
//! 6. Optional mirror into the secondary cache, then placement.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sealdrive_protocol::{Direction, FileItem, TransferDescriptor, TransferState};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::SeamFuture;
use crate::codec::{ChunkCodec, DownloadChunk};
use crate::context::PipelineContext;
use crate::control::TransferToken;
use crate::error::TransferError;
use crate::events::{EventSink, TransferEvent, TransferOutput};
use crate::paths::Root;
use crate::plan::ChunkPlan;
use crate::remote::ChunkLocator;
use crate::semaphore::{Permit, Semaphore};

/// Where a finished download ends up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DownloadTarget {
    /// Left in the temp root (or cache); the path is returned.
    #[default]
    Temporary,
    /// Moved into the offline root, replacing an older copy.
    Offline,
    /// Handed to the host's [`GallerySink`].
    Gallery,
    /// Moved into `Downloads/{name}`, replacing an older copy.
    UserDownload,
}

/// Per-request download options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    pub target: DownloadTarget,
    /// Fetch only the first `n` chunks (preview). Previews skip the transfer
    /// slot and the secondary cache, and are always left in place.
    pub max_chunks: Option<u32>,
}

impl DownloadOptions {
    pub fn to(target: DownloadTarget) -> Self {
        Self {
            target,
            max_chunks: None,
        }
    }

    pub fn preview(max_chunks: u32) -> Self {
        Self {
            target: DownloadTarget::Temporary,
            max_chunks: Some(max_chunks),
        }
    }

    pub fn is_preview(&self) -> bool {
        self.max_chunks.is_some()
    }
}

/// Result of a download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    /// `true` when no chunk was fetched (cache or offline copy).
    pub from_cache: bool,
}

/// Host capability that exports a downloaded file to the device gallery.
pub trait GallerySink: Send + Sync {
    fn save<'a>(&'a self, path: &'a Path, item: &'a FileItem) -> SeamFuture<'a, ()>;
}

// ---------------------------------------------------------------------------
// Write cursor
// ---------------------------------------------------------------------------

/// Index of the next chunk allowed to commit.
///
/// Committers park on a `watch` channel until the cursor reaches their index.
#[derive(Debug, Clone)]
struct WriteCursor {
    next: Arc<watch::Sender<u32>>,
}

impl WriteCursor {
    fn new() -> Self {
        Self {
            next: Arc::new(watch::channel(0).0),
        }
    }

    async fn wait_turn(&self, index: u32) {
        let mut rx = self.next.subscribe();
        let _ = rx.wait_for(|next| *next == index).await;
    }

    fn advance(&self) {
        self.next.send_modify(|next| *next += 1);
    }

    #[cfg(test)]
    fn position(&self) -> u32 {
        *self.next.borrow()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Downloads remote files chunk by chunk.
#[derive(Clone)]
pub struct DownloadPipeline {
    ctx: PipelineContext,
    codec: Arc<dyn ChunkCodec>,
    transfers: Semaphore,
    workers: Semaphore,
    writes: Semaphore,
    gallery: Option<Arc<dyn GallerySink>>,
}

impl DownloadPipeline {
    pub fn new(
        ctx: PipelineContext,
        codec: Arc<dyn ChunkCodec>,
        transfers: Semaphore,
        workers: Semaphore,
        writes: Semaphore,
    ) -> Self {
        Self {
            ctx,
            codec,
            transfers,
            workers,
            writes,
            gallery: None,
        }
    }

    pub fn with_gallery(mut self, gallery: Arc<dyn GallerySink>) -> Self {
        self.gallery = Some(gallery);
        self
    }

    /// Downloads `item` and places it according to `options`.
    ///
    /// Emits exactly one terminal event unless the id is already in flight,
    /// in which case [`TransferError::AlreadyTransferring`] is returned
    /// without touching the running transfer.
    pub async fn queue(
        &self,
        item: &FileItem,
        options: DownloadOptions,
    ) -> Result<DownloadOutcome, TransferError> {
        if options.target == DownloadTarget::Gallery && !options.is_preview() {
            match self.gallery_from_offline(item).await {
                Ok(None) => {}
                exported => {
                    self.ctx.active.release(&item.uuid, &self.ctx.bus);
                    if let Some(outcome) = exported? {
                        return Ok(outcome);
                    }
                }
            }
        }

        let _guard = self.ctx.active.claim(&item.uuid, &self.ctx.bus)?;
        let token = self.ctx.bus.token(&item.uuid);
        let plan = ChunkPlan::from_declared(item.size, self.ctx.config.chunk_size, item.chunks);

        let mut descriptor = TransferDescriptor {
            id: item.uuid.clone(),
            name: item.name.clone(),
            direction: Direction::Download,
            total_bytes: plan.bytes_for(options.max_chunks),
            chunk_size: plan.chunk_size(),
            chunk_count: plan.fetch_count(options.max_chunks),
            bytes_transferred: 0,
            started_at: 0,
            state: TransferState::Queued,
        };

        let result = self
            .run(item, options, &plan, &token, &mut descriptor)
            .await;
        self.ctx
            .report(descriptor, result, |outcome| TransferOutput::Downloaded {
                path: outcome.path.clone(),
            })
            .await
    }

    async fn run(
        &self,
        item: &FileItem,
        options: DownloadOptions,
        plan: &ChunkPlan,
        token: &TransferToken,
        descriptor: &mut TransferDescriptor,
    ) -> Result<DownloadOutcome, TransferError> {
        if !self.ctx.env.is_online() {
            return Err(TransferError::Offline);
        }
        if self.ctx.config.wifi_only_downloads && !self.ctx.env.is_wifi() {
            return Err(TransferError::WifiOnly);
        }

        let _slot = if options.is_preview() {
            None
        } else {
            tokio::select! {
                permit = self.transfers.acquire() => Some(permit?),
                () = token.stopped() => return Err(TransferError::Stopped),
            }
        };

        let fetched = self
            .fetch(item, plan, options.max_chunks, token, descriptor)
            .await?;

        let target = if options.is_preview() {
            DownloadTarget::Temporary
        } else {
            options.target
        };
        self.place(item, target, fetched).await
    }

    /// Fetches and assembles the file (or returns its cache entry).
    async fn fetch(
        &self,
        item: &FileItem,
        plan: &ChunkPlan,
        limit: Option<u32>,
        token: &TransferToken,
        descriptor: &mut TransferDescriptor,
    ) -> Result<DownloadOutcome, TransferError> {
        let roots = &self.ctx.roots;
        roots.ensure(Root::Temp)?;
        roots.ensure(Root::Cache)?;

        let cache_path = roots.cache_path(&item.uuid, &item.name);
        if limit.is_none() && tokio::fs::try_exists(&cache_path).await.unwrap_or(false) {
            debug!(uuid = %item.uuid, path = %cache_path.display(), "cache hit");
            return Ok(DownloadOutcome {
                path: cache_path,
                from_cache: true,
            });
        }

        let bytes = plan.bytes_for(limit);
        self.preflight(bytes).await?;

        descriptor.state = TransferState::Running;
        descriptor.started_at = chrono::Utc::now().timestamp_millis();
        self.ctx
            .events
            .emit(TransferEvent::Start(descriptor.clone()))
            .await;

        let count = plan.fetch_count(limit);
        let assembly = roots.assembly_path(&item.uuid, &item.name);
        self.ctx
            .events
            .emit(TransferEvent::Started(descriptor.clone()))
            .await;
        info!(uuid = %item.uuid, chunks = count, bytes, "download started");

        if let Err(e) = self.fetch_chunks(item, count, token, &assembly).await {
            self.discard(&item.uuid, &assembly).await;
            return Err(e);
        }

        let assembled = match tokio::fs::metadata(&assembly).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                self.discard(&item.uuid, &assembly).await;
                return Err(e.into());
            }
        };
        if assembled != bytes {
            self.discard(&item.uuid, &assembly).await;
            return Err(TransferError::Remote(format!(
                "assembled {assembled} bytes, expected {bytes}"
            )));
        }

        if limit.is_none() && item.size < self.ctx.config.secondary_cache_max_bytes {
            self.mirror_to_cache(item, &assembly, &cache_path).await;
        }

        Ok(DownloadOutcome {
            path: assembly,
            from_cache: false,
        })
    }

    /// Checks free space, evicting caches once if needed.
    async fn preflight(&self, bytes: u64) -> Result<(), TransferError> {
        let required = bytes.saturating_add(self.ctx.config.disk_safety_margin);
        let free = self.ctx.env.free_disk_space().await?;
        if free >= required {
            return Ok(());
        }

        warn!(required, free, "low disk space, evicting caches");
        if let Err(e) = self.ctx.env.clear_caches().await {
            warn!(error = %e, "cache eviction failed");
        }
        tokio::time::sleep(self.ctx.config.eviction_grace()).await;

        let available = self.ctx.env.free_disk_space().await?;
        if available >= required {
            Ok(())
        } else {
            Err(TransferError::OutOfStorage {
                required,
                available,
            })
        }
    }

    /// Dispatches chunks `0..count` and waits for every commit.
    ///
    /// Slots are taken here, in index order, so the lowest uncommitted index
    /// always holds a write slot.
    async fn fetch_chunks(
        &self,
        item: &FileItem,
        count: u32,
        token: &TransferToken,
        assembly: &Path,
    ) -> Result<(), TransferError> {
        let cursor = WriteCursor::new();
        let abort = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut failure: Option<TransferError> = None;

        for index in 0..count {
            while let Some(joined) = tasks.try_join_next() {
                note_failure(&mut failure, joined);
            }
            if failure.is_some() || abort.is_cancelled() {
                break;
            }

            if let Err(e) = token.checkpoint().await {
                failure = Some(e);
                break;
            }

            let slots = tokio::select! {
                slots = self.acquire_chunk_slots() => slots,
                () = abort.cancelled() => break,
                () = token.stopped() => {
                    failure = Some(TransferError::Stopped);
                    break;
                }
            };
            let (write, worker) = match slots {
                Ok(slots) => slots,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            if abort.is_cancelled() {
                break;
            }

            let job = ChunkJob {
                codec: Arc::clone(&self.codec),
                chunk: DownloadChunk {
                    locator: ChunkLocator {
                        region: item.region.clone(),
                        bucket: item.bucket.clone(),
                        uuid: item.uuid.clone(),
                        index,
                    },
                    key: item.key.clone(),
                    version: item.version,
                    dest: self.ctx.roots.chunk_temp_path(&item.uuid, index),
                },
                cursor: cursor.clone(),
                abort: abort.clone(),
                assembly: assembly.to_path_buf(),
                events: self.ctx.events.clone(),
            };
            tasks.spawn(job.run(worker, write));
        }

        if failure.is_some() {
            abort.cancel();
        }
        while let Some(joined) = tasks.join_next().await {
            note_failure(&mut failure, joined);
            if failure.is_some() {
                abort.cancel();
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn acquire_chunk_slots(&self) -> Result<(Permit, Permit), TransferError> {
        let write = self.writes.acquire().await?;
        let worker = self.workers.acquire().await?;
        Ok((write, worker))
    }

    /// Removes every artifact of a failed download.
    async fn discard(&self, uuid: &str, assembly: &Path) {
        let roots = self.ctx.roots.clone();
        let id = uuid.to_string();
        match tokio::task::spawn_blocking(move || roots.remove_chunk_artifacts(&id)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(uuid, error = %e, "failed to remove chunk artifacts"),
            Err(e) => warn!(uuid, error = %e, "chunk cleanup task failed"),
        }
        remove_if_exists(assembly).await;
    }

    /// Copies the assembled file into the secondary cache. Best effort.
    async fn mirror_to_cache(&self, item: &FileItem, assembly: &Path, cache_path: &Path) {
        let staging = self.ctx.roots.assembly_path(&item.uuid, &item.name);
        let result = async {
            tokio::fs::copy(assembly, &staging).await?;
            tokio::fs::rename(&staging, cache_path).await
        }
        .await;
        if let Err(e) = result {
            warn!(uuid = %item.uuid, error = %e, "failed to mirror download into cache");
            remove_if_exists(&staging).await;
        }
    }

    async fn place(
        &self,
        item: &FileItem,
        target: DownloadTarget,
        fetched: DownloadOutcome,
    ) -> Result<DownloadOutcome, TransferError> {
        let roots = &self.ctx.roots;
        let dest = match target {
            DownloadTarget::Temporary => return Ok(fetched),
            DownloadTarget::Gallery => {
                match &self.gallery {
                    Some(sink) => sink.save(&fetched.path, item).await?,
                    None => warn!(uuid = %item.uuid, "no gallery sink, leaving file in place"),
                }
                return Ok(fetched);
            }
            DownloadTarget::Offline => {
                roots.ensure(Root::Offline)?;
                roots.offline_path(&item.uuid, &item.name)
            }
            DownloadTarget::UserDownload => {
                roots.ensure(Root::Downloads)?;
                roots.download_path(&item.name)
            }
        };

        move_into(&fetched.path, &dest, fetched.from_cache).await?;
        debug!(uuid = %item.uuid, path = %dest.display(), ?target, "download placed");
        Ok(DownloadOutcome {
            path: dest,
            from_cache: fetched.from_cache,
        })
    }

    /// Serves a gallery export from an existing offline copy.
    async fn gallery_from_offline(
        &self,
        item: &FileItem,
    ) -> Result<Option<DownloadOutcome>, TransferError> {
        let Some(sink) = &self.gallery else {
            return Ok(None);
        };
        let offline = self.ctx.roots.offline_path(&item.uuid, &item.name);
        if !tokio::fs::try_exists(&offline).await.unwrap_or(false) {
            return Ok(None);
        }
        sink.save(&offline, item).await?;
        Ok(Some(DownloadOutcome {
            path: offline,
            from_cache: true,
        }))
    }
}

// ---------------------------------------------------------------------------
// Chunk jobs
// ---------------------------------------------------------------------------

/// Why a chunk job ended without committing.
#[derive(Debug)]
enum ChunkFailure {
    /// This chunk failed; the transfer fails with this error.
    Failed(TransferError),
    /// Another chunk failed first.
    Aborted,
}

struct ChunkJob {
    codec: Arc<dyn ChunkCodec>,
    chunk: DownloadChunk,
    cursor: WriteCursor,
    abort: CancellationToken,
    assembly: PathBuf,
    events: EventSink,
}

impl ChunkJob {
    async fn run(self, worker: Permit, write: Permit) -> Result<(), ChunkFailure> {
        let index = self.chunk.locator.index;

        let fetched = self.codec.download_chunk(&self.chunk).await;
        drop(worker);
        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(e) => {
                self.abort.cancel();
                return Err(ChunkFailure::Failed(e));
            }
        };

        tokio::select! {
            () = self.cursor.wait_turn(index) => {}
            () = self.abort.cancelled() => return Err(ChunkFailure::Aborted),
        }

        if let Err(e) = commit_chunk(&self.chunk.dest, &self.assembly, index).await {
            self.abort.cancel();
            return Err(ChunkFailure::Failed(e));
        }
        self.cursor.advance();
        drop(write);

        debug!(uuid = %self.chunk.locator.uuid, index, bytes, "chunk committed");
        self.events
            .progress(Direction::Download, &self.chunk.locator.uuid, bytes);
        Ok(())
    }
}

/// Moves chunk 0 into place or appends a later chunk to the assembly.
async fn commit_chunk(temp: &Path, assembly: &Path, index: u32) -> Result<(), TransferError> {
    if index == 0 {
        tokio::fs::rename(temp, assembly).await?;
        return Ok(());
    }

    let mut src = tokio::fs::File::open(temp).await?;
    let mut dst = tokio::fs::OpenOptions::new()
        .append(true)
        .open(assembly)
        .await?;
    tokio::io::copy(&mut src, &mut dst).await?;
    dst.flush().await?;
    drop(dst);
    tokio::fs::remove_file(temp).await?;
    Ok(())
}

fn note_failure(
    failure: &mut Option<TransferError>,
    joined: Result<Result<(), ChunkFailure>, JoinError>,
) {
    let err = match joined {
        Ok(Ok(())) | Ok(Err(ChunkFailure::Aborted)) => return,
        Ok(Err(ChunkFailure::Failed(e))) => e,
        Err(e) => e.into(),
    };
    if failure.is_none() {
        *failure = Some(err);
    }
}

/// Replaces `dest` with `src`. Cached sources are copied, others moved.
async fn move_into(src: &Path, dest: &Path, keep_source: bool) -> Result<(), TransferError> {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if keep_source {
        tokio::fs::copy(src, dest).await?;
    } else if tokio::fs::rename(src, dest).await.is_err() {
        tokio::fs::copy(src, dest).await?;
        tokio::fs::remove_file(src).await?;
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}
