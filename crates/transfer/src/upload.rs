//! Upload pipeline.
//!
//! Chunk 0 is sent on its own because its answer carries the routing
//! (region/bucket) needed to address the rest; chunks `1..n` then fan out
//! under the worker semaphore in any order. Once every chunk is acknowledged
//! the upload is finalized, retrying while the server is still settling.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::UNIX_EPOCH;

use sealdrive_crypto::{
    encrypt_metadata, file_hash_sha512, generate_file_key, hash_name, random_string,
};
use sealdrive_protocol::{
    Direction, FileMetadata, LocalFile, TransferDescriptor, TransferState, UploadedItem,
};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::SeamFuture;
use crate::codec::{ChunkCodec, UploadChunk};
use crate::context::PipelineContext;
use crate::control::TransferToken;
use crate::error::TransferError;
use crate::events::{TransferEvent, TransferOutput};
use crate::paths::{Root, file_ext, sanitize_name, validate_file_name};
use crate::plan::ChunkPlan;
use crate::remote::{
    ChunkReceipt, FinalizeStatus, RemoteStore, UploadSession, is_finalize_pending,
};
use crate::semaphore::Semaphore;

/// Length of the random removal and upload secrets.
const SECRET_LEN: usize = 32;

const DEFAULT_MIME: &str = "application/octet-stream";

/// Extensions a preview thumbnail is generated for.
const THUMBNAIL_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "heic", "heif", "bmp", "mp4", "mov", "m4v", "webm",
    "mkv", "avi",
];

/// Returns `true` if a thumbnail can be generated for `name`.
pub fn supports_thumbnail(name: &str) -> bool {
    THUMBNAIL_EXTENSIONS.contains(&file_ext(name).as_str())
}

/// Host capability that renders a JPEG preview of a local file.
pub trait ThumbnailGenerator: Send + Sync {
    fn generate<'a>(&'a self, source: &'a Path, dest: &'a Path) -> SeamFuture<'a, ()>;
}

/// Master keys supplied by the host, oldest first.
#[derive(Debug, Clone, Default)]
pub struct MasterKeys {
    keys: Arc<RwLock<Vec<String>>>,
}

impl MasterKeys {
    pub fn set(&self, keys: Vec<String>) {
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = keys;
    }

    /// The key new metadata is encrypted under.
    pub fn newest(&self) -> Option<String> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn all(&self) -> Vec<String> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Everything generated for one upload before any byte is sent.
struct KeyMaterial {
    key: String,
    metadata: FileMetadata,
    session: Arc<UploadSession>,
}

/// Uploads local files chunk by chunk.
#[derive(Clone)]
pub struct UploadPipeline {
    ctx: PipelineContext,
    codec: Arc<dyn ChunkCodec>,
    store: Arc<dyn RemoteStore>,
    transfers: Semaphore,
    workers: Semaphore,
    master_keys: MasterKeys,
    thumbnails: Option<Arc<dyn ThumbnailGenerator>>,
}

impl UploadPipeline {
    pub fn new(
        ctx: PipelineContext,
        codec: Arc<dyn ChunkCodec>,
        store: Arc<dyn RemoteStore>,
        transfers: Semaphore,
        workers: Semaphore,
    ) -> Self {
        Self {
            ctx,
            codec,
            store,
            transfers,
            workers,
            master_keys: MasterKeys::default(),
            thumbnails: None,
        }
    }

    pub fn with_thumbnails(mut self, generator: Arc<dyn ThumbnailGenerator>) -> Self {
        self.thumbnails = Some(generator);
        self
    }

    pub fn master_keys(&self) -> &MasterKeys {
        &self.master_keys
    }

    /// Uploads `file` into `parent` under a fresh remote uuid.
    pub async fn queue(&self, file: &LocalFile, parent: &str) -> Result<UploadedItem, TransferError> {
        self.queue_as(Uuid::new_v4().to_string(), file, parent).await
    }

    /// Uploads `file` under a caller-chosen uuid, so the caller can address
    /// the transfer on the control bus before it starts.
    pub async fn queue_as(
        &self,
        uuid: String,
        file: &LocalFile,
        parent: &str,
    ) -> Result<UploadedItem, TransferError> {
        let _guard = self.ctx.active.claim(&uuid, &self.ctx.bus)?;
        let token = self.ctx.bus.token(&uuid);
        let plan = ChunkPlan::new(file.size, self.ctx.config.chunk_size);

        let mut descriptor = TransferDescriptor {
            id: uuid,
            name: file.name.clone(),
            direction: Direction::Upload,
            total_bytes: file.size,
            chunk_size: plan.chunk_size(),
            chunk_count: plan.chunk_count(),
            bytes_transferred: 0,
            started_at: 0,
            state: TransferState::Queued,
        };

        let result = self.run(file, parent, &token, &mut descriptor).await;
        self.ctx
            .report(descriptor, result, |item| TransferOutput::Uploaded(item.clone()))
            .await
    }

    async fn run(
        &self,
        file: &LocalFile,
        parent: &str,
        token: &TransferToken,
        descriptor: &mut TransferDescriptor,
    ) -> Result<UploadedItem, TransferError> {
        let config = &self.ctx.config;
        let master_key = self.master_keys.newest().ok_or(TransferError::NoMasterKeys)?;
        if !self.ctx.env.is_online() {
            return Err(TransferError::Offline);
        }
        if config.wifi_only_uploads && !self.ctx.env.is_wifi() {
            return Err(TransferError::WifiOnly);
        }

        let path = PathBuf::from(&file.path);
        let stat = match tokio::fs::metadata(&path).await {
            Ok(stat) if stat.is_file() => stat,
            Ok(_) => return Err(TransferError::FileNotFound(path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransferError::FileNotFound(path));
            }
            Err(e) => return Err(e.into()),
        };
        let size = stat.len();
        let last_modified = if file.last_modified > 0 {
            file.last_modified
        } else {
            stat.modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis())
        };

        let name = sanitize_name(&file.name);
        validate_file_name(&name)?;

        let plan = ChunkPlan::new(size, config.chunk_size);
        descriptor.name = name.clone();
        descriptor.total_bytes = size;
        descriptor.chunk_count = plan.chunk_count();

        let material = self
            .key_material(file, &name, size, last_modified, &master_key, parent, &descriptor.id, &plan)
            .await?;
        let uuid = descriptor.id.clone();

        descriptor.state = TransferState::Running;
        descriptor.started_at = chrono::Utc::now().timestamp_millis();
        self.ctx
            .events
            .emit(TransferEvent::Start(descriptor.clone()))
            .await;

        let _slot = tokio::select! {
            permit = self.transfers.acquire() => permit?,
            () = token.stopped() => return Err(TransferError::Stopped),
        };

        token.checkpoint().await?;
        let first = UploadChunk {
            session: Arc::clone(&material.session),
            path: path.clone(),
            index: 0,
            range: plan.range(0),
            key: material.key.clone(),
            version: config.upload_version,
            route: None,
        };
        let route = self
            .codec
            .upload_chunk(&first)
            .await
            .map_err(TransferError::classify)?;
        self.ctx
            .events
            .progress(Direction::Upload, &uuid, plan.range(0).end);

        self.ctx
            .events
            .emit(TransferEvent::Started(descriptor.clone()))
            .await;
        info!(
            uuid = %uuid,
            chunks = plan.chunk_count(),
            bytes = size,
            region = %route.region,
            "upload started"
        );

        self.send_remaining(&material, &path, &plan, &route, token)
            .await?;

        self.thumbnail(&uuid, &path, &name).await;
        self.finalize(&uuid, &material.session.upload_key).await?;

        if let Err(e) = self
            .store
            .propagate_to_shared_parent(parent, &uuid, &material.metadata)
            .await
        {
            warn!(uuid = %uuid, parent, error = %e, "failed to share upload with parent");
        }

        Ok(UploadedItem {
            uuid,
            name,
            size,
            mime: material.metadata.mime.clone(),
            key: material.key,
            rm: material.session.rm.clone(),
            metadata: material.session.metadata.clone(),
            chunks: plan.chunk_count(),
            parent: parent.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            version: config.upload_version,
            region: route.region,
            bucket: route.bucket,
        })
    }

    /// Generates the per-file key, secrets and encrypted metadata.
    #[allow(clippy::too_many_arguments)]
    async fn key_material(
        &self,
        file: &LocalFile,
        name: &str,
        size: u64,
        last_modified: i64,
        master_key: &str,
        parent: &str,
        uuid: &str,
        plan: &ChunkPlan,
    ) -> Result<KeyMaterial, TransferError> {
        let key = generate_file_key();
        let mime = if file.mime.is_empty() {
            DEFAULT_MIME.to_string()
        } else {
            file.mime.clone()
        };

        let hash = if self.ctx.config.include_file_hash {
            let path = PathBuf::from(&file.path);
            Some(tokio::task::spawn_blocking(move || file_hash_sha512(&path)).await??)
        } else {
            None
        };

        let metadata = FileMetadata {
            name: name.to_string(),
            size,
            mime: mime.clone(),
            key: key.clone(),
            last_modified,
            hash,
        };

        let session = UploadSession {
            uuid: uuid.to_string(),
            name_enc: encrypt_metadata(name, &key)?,
            name_hashed: hash_name(name),
            size_enc: encrypt_metadata(&size.to_string(), &key)?,
            mime_enc: encrypt_metadata(&mime, &key)?,
            chunks: plan.chunk_count(),
            rm: random_string(SECRET_LEN),
            upload_key: random_string(SECRET_LEN),
            metadata: encrypt_metadata(&serde_json::to_string(&metadata)?, master_key)?,
            parent: parent.to_string(),
            version: self.ctx.config.upload_version,
            expire: "never".into(),
        };

        Ok(KeyMaterial {
            key,
            metadata,
            session: Arc::new(session),
        })
    }

    /// Sends chunks `1..n` under the worker semaphore.
    ///
    /// Dispatch stops at the first failure or stop; chunks already in flight
    /// run to completion.
    async fn send_remaining(
        &self,
        material: &KeyMaterial,
        path: &Path,
        plan: &ChunkPlan,
        route: &ChunkReceipt,
        token: &TransferToken,
    ) -> Result<(), TransferError> {
        let abort = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut failure: Option<TransferError> = None;

        for index in 1..plan.chunk_count() {
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

            let worker = tokio::select! {
                biased;
                () = abort.cancelled() => break,
                () = token.stopped() => {
                    failure = Some(TransferError::Stopped);
                    break;
                }
                permit = self.workers.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        failure = Some(e.into());
                        break;
                    }
                },
            };
            // A failing chunk releases its slot before cancelling.
            if abort.is_cancelled() {
                break;
            }

            let range = plan.range(index);
            let bytes = range.end - range.start;
            let chunk = UploadChunk {
                session: Arc::clone(&material.session),
                path: path.to_path_buf(),
                index,
                range,
                key: material.key.clone(),
                version: self.ctx.config.upload_version,
                route: Some(route.clone()),
            };
            let codec = Arc::clone(&self.codec);
            let events = self.ctx.events.clone();
            let abort = abort.clone();
            tasks.spawn(async move {
                let result = codec.upload_chunk(&chunk).await;
                drop(worker);
                match result {
                    Ok(_) => {
                        events.progress(Direction::Upload, &chunk.session.uuid, bytes);
                        Ok(())
                    }
                    Err(e) => {
                        abort.cancel();
                        Err(e.classify())
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            note_failure(&mut failure, joined);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Marks the upload done, retrying while chunks are still settling.
    async fn finalize(&self, uuid: &str, upload_key: &str) -> Result<(), TransferError> {
        let attempts = self.ctx.config.finalize_attempts.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            match self.store.mark_upload_done(uuid, upload_key).await {
                Ok(FinalizeStatus::Done { chunks }) => {
                    debug!(uuid, chunks, attempt, "upload finalized");
                    return Ok(());
                }
                Ok(FinalizeStatus::Pending(message)) => last = message,
                Err(TransferError::Remote(message)) if is_finalize_pending(&message) => {
                    last = message;
                }
                Err(e) => return Err(e.classify()),
            }
            if attempt < attempts {
                debug!(uuid, attempt, reason = %last, "upload not settled, retrying");
                tokio::time::sleep(self.ctx.config.finalize_retry()).await;
            }
        }
        Err(TransferError::Remote(format!(
            "upload not finalized after {attempts} attempts: {last}"
        )))
    }

    /// Renders a preview thumbnail. Best effort.
    async fn thumbnail(&self, uuid: &str, path: &Path, name: &str) {
        let Some(generator) = &self.thumbnails else {
            return;
        };
        if !supports_thumbnail(name) {
            return;
        }
        if let Err(e) = self.ctx.roots.ensure(Root::Thumbnails) {
            warn!(uuid, error = %e, "failed to create thumbnail directory");
            return;
        }
        let dest = self.ctx.roots.thumbnail_path(uuid);
        if let Err(e) = generator.generate(path, &dest).await {
            warn!(uuid, error = %e, "thumbnail generation failed");
        }
    }
}

fn note_failure(
    failure: &mut Option<TransferError>,
    joined: Result<Result<(), TransferError>, JoinError>,
) {
    let err = match joined {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(e) => e.into(),
    };
    if failure.is_none() {
        *failure = Some(err);
    }
}
