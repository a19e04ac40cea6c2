//! Chunked, end-to-end encrypted file transfer engine.
//!
//! Files move between local storage and a remote content store in fixed-size
//! chunks. Each chunk is sealed on upload and opened on download; many chunks
//! travel in parallel but land byte-exact and in order. Bounded concurrency is
//! provided by [`Semaphore`], cooperative pause/resume/stop by [`ControlBus`],
//! and lifecycle/progress reporting by [`TransferEvent`]s.
//!
//! The host app plugs in its network layer through [`RemoteStore`] and its
//! device facilities through [`DeviceEnv`].

use std::future::Future;
use std::pin::Pin;

mod codec;
mod config;
mod context;
mod control;
mod download;
mod engine;
mod env;
mod error;
mod events;
mod paths;
mod plan;
mod registry;
mod remote;
mod semaphore;
mod upload;

pub use codec::{AesChunkCodec, ChunkCodec, ChunkReader, DownloadChunk, UploadChunk};
pub use config::{MIB, TransferConfig};
pub use context::{ActiveGuard, ActiveTransfers, PipelineContext};
pub use control::{ControlBus, ControlSignal, ControlState, TransferToken};
pub use download::{
    DownloadOptions, DownloadOutcome, DownloadPipeline, DownloadTarget, GallerySink,
};
pub use engine::TransferEngine;
pub use env::{DeviceEnv, LocalDeviceEnv, SpaceProbe};
pub use error::TransferError;
pub use events::{EventSink, FailureKind, TransferEvent, TransferOutput};
pub use paths::{Root, StorageRoots, file_ext, sanitize_name, validate_file_name};
pub use plan::ChunkPlan;
pub use registry::{Notification, TransferRegistry, drive};
pub use remote::{
    ChunkLocator, ChunkReceipt, FinalizeStatus, RemoteStore, UploadSession, is_finalize_pending,
};
pub use semaphore::{Permit, Semaphore, SemaphoreError};
pub use upload::{MasterKeys, ThumbnailGenerator, UploadPipeline, supports_thumbnail};

/// Boxed future returned by the seam traits.
pub type SeamFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransferError>> + Send + 'a>>;
