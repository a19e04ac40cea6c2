//! Engine facade: owns the shared semaphores, control bus and event channel,
//! and builds both pipelines on top of them.

use std::sync::Arc;

use sealdrive_protocol::{FileItem, LocalFile, UploadedItem};
use tokio::sync::mpsc;
use tracing::info;

use crate::codec::{AesChunkCodec, ChunkCodec};
use crate::config::TransferConfig;
use crate::context::{ActiveTransfers, PipelineContext};
use crate::control::ControlBus;
use crate::download::{DownloadOptions, DownloadOutcome, DownloadPipeline, GallerySink};
use crate::env::DeviceEnv;
use crate::error::TransferError;
use crate::events::{EventSink, TransferEvent};
use crate::paths::StorageRoots;
use crate::remote::RemoteStore;
use crate::semaphore::Semaphore;
use crate::upload::{ThumbnailGenerator, UploadPipeline};

/// Entry point used by the host app.
pub struct TransferEngine {
    ctx: PipelineContext,
    download: DownloadPipeline,
    upload: UploadPipeline,
    semaphores: Vec<Semaphore>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
}

impl TransferEngine {
    /// Builds an engine whose chunks are sealed with [`AesChunkCodec`].
    pub fn new(
        config: TransferConfig,
        roots: StorageRoots,
        store: Arc<dyn RemoteStore>,
        env: Arc<dyn DeviceEnv>,
    ) -> Self {
        let codec: Arc<dyn ChunkCodec> = Arc::new(AesChunkCodec::new(Arc::clone(&store)));
        Self::with_codec(config, roots, store, env, codec)
    }

    /// Builds an engine over a caller-supplied chunk codec.
    pub fn with_codec(
        config: TransferConfig,
        roots: StorageRoots,
        store: Arc<dyn RemoteStore>,
        env: Arc<dyn DeviceEnv>,
        codec: Arc<dyn ChunkCodec>,
    ) -> Self {
        let (events, events_rx) = EventSink::channel(config.event_buffer);
        let ctx = PipelineContext {
            config: Arc::new(config),
            roots,
            env,
            bus: ControlBus::new(),
            events,
            active: ActiveTransfers::default(),
        };

        let config = &ctx.config;
        let download_transfers = Semaphore::new(config.max_transfers);
        let download_workers = Semaphore::new(config.download_workers);
        let writes = Semaphore::new(config.write_buffers);
        let upload_transfers = Semaphore::new(config.max_transfers);
        let upload_workers = Semaphore::new(config.upload_workers);

        let download = DownloadPipeline::new(
            ctx.clone(),
            Arc::clone(&codec),
            download_transfers.clone(),
            download_workers.clone(),
            writes.clone(),
        );
        let upload = UploadPipeline::new(
            ctx.clone(),
            codec,
            store,
            upload_transfers.clone(),
            upload_workers.clone(),
        );

        Self {
            ctx,
            download,
            upload,
            semaphores: vec![
                download_transfers,
                download_workers,
                writes,
                upload_transfers,
                upload_workers,
            ],
            events_rx: Some(events_rx),
        }
    }

    pub fn with_gallery(mut self, gallery: Arc<dyn GallerySink>) -> Self {
        self.download = self.download.with_gallery(gallery);
        self
    }

    pub fn with_thumbnails(mut self, generator: Arc<dyn ThumbnailGenerator>) -> Self {
        self.upload = self.upload.with_thumbnails(generator);
        self
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    pub fn config(&self) -> &TransferConfig {
        &self.ctx.config
    }

    pub fn roots(&self) -> &StorageRoots {
        &self.ctx.roots
    }

    /// Replaces the master keys; the last one encrypts new metadata.
    pub fn set_master_keys(&self, keys: Vec<String>) {
        self.upload.master_keys().set(keys);
    }

    /// Handle to the download pipeline, for spawning transfers.
    pub fn downloads(&self) -> DownloadPipeline {
        self.download.clone()
    }

    /// Handle to the upload pipeline, for spawning transfers.
    pub fn uploads(&self) -> UploadPipeline {
        self.upload.clone()
    }

    pub async fn download(
        &self,
        item: &FileItem,
        options: DownloadOptions,
    ) -> Result<DownloadOutcome, TransferError> {
        self.download.queue(item, options).await
    }

    pub async fn upload(&self, file: &LocalFile, parent: &str) -> Result<UploadedItem, TransferError> {
        self.upload.queue(file, parent).await
    }

    /// Registers `id` on the control bus ahead of its `queue` call, so a
    /// pause or stop sent in between is kept for that transfer.
    ///
    /// The reservation ends with the transfer; [`Self::release`] drops one
    /// that will not be queued.
    pub fn reserve(&self, id: &str) -> bool {
        self.ctx.bus.reserve(id)
    }

    /// Drops a reservation for an id that is not in flight.
    pub fn release(&self, id: &str) {
        self.ctx.active.release(id, &self.ctx.bus);
    }

    /// Pauses `id`. Returns `false` if it is neither reserved nor in flight.
    pub fn pause(&self, id: &str) -> bool {
        self.ctx.bus.pause(id)
    }

    pub fn resume(&self, id: &str) -> bool {
        self.ctx.bus.resume(id)
    }

    /// Stops `id`. Returns `false` if it is neither reserved nor in flight.
    pub fn stop(&self, id: &str) -> bool {
        self.ctx.bus.stop(id)
    }

    /// Ids currently owned by a pipeline.
    pub fn active_ids(&self) -> Vec<String> {
        self.ctx.active.ids()
    }

    /// Stops every known transfer and rejects every queued slot waiter.
    ///
    /// Returns the number of rejected waiters.
    pub fn shutdown(&self) -> usize {
        let mut ids = self.ctx.active.ids();
        ids.extend(self.ctx.bus.ids());
        ids.sort();
        ids.dedup();
        for id in &ids {
            self.ctx.bus.stop(id);
        }
        let rejected = self.semaphores.iter().map(Semaphore::purge).sum();
        info!(transfers = ids.len(), rejected, "transfer engine shut down");
        rejected
    }
}
