//! Chunk codec seam and its AES-256-GCM implementation.

use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sealdrive_crypto::{decrypt_chunk, encrypt_chunk};
use tracing::trace;

use crate::SeamFuture;
use crate::error::TransferError;
use crate::remote::{ChunkLocator, ChunkReceipt, RemoteStore, UploadSession};

/// One chunk of an upload.
#[derive(Debug, Clone)]
pub struct UploadChunk {
    pub session: Arc<UploadSession>,
    /// Local plaintext file.
    pub path: PathBuf,
    pub index: u32,
    pub range: Range<u64>,
    /// Per-file key.
    pub key: String,
    pub version: u32,
    /// Routing returned for chunk 0; `None` while sending chunk 0 itself.
    pub route: Option<ChunkReceipt>,
}

/// One chunk of a download.
#[derive(Debug, Clone)]
pub struct DownloadChunk {
    pub locator: ChunkLocator,
    pub key: String,
    pub version: u32,
    /// Private temp file receiving the plaintext.
    pub dest: PathBuf,
}

/// Encrypt-and-send / fetch-and-decrypt capability for single chunks.
pub trait ChunkCodec: Send + Sync {
    /// Reads the chunk's plaintext range, seals it and sends it.
    fn upload_chunk<'a>(&'a self, chunk: &'a UploadChunk) -> SeamFuture<'a, ChunkReceipt>;

    /// Fetches and opens a chunk into `chunk.dest`. Returns plaintext bytes written.
    fn download_chunk<'a>(&'a self, chunk: &'a DownloadChunk) -> SeamFuture<'a, u64>;
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Random-access reader for plaintext chunk ranges of a local file.
pub struct ChunkReader {
    file: std::fs::File,
    file_size: u64,
}

impl ChunkReader {
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self { file, file_size })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Reads exactly `range`, which must lie within the file.
    pub fn read_range(&mut self, range: Range<u64>) -> Result<Vec<u8>, TransferError> {
        if range.end > self.file_size || range.start > range.end {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "range {}..{} outside file of {} bytes",
                    range.start, range.end, self.file_size
                ),
            )));
        }
        self.file.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// AesChunkCodec
// ---------------------------------------------------------------------------

/// Seals chunks with AES-256-GCM under the per-file key and moves them
/// through a [`RemoteStore`].
pub struct AesChunkCodec<R: ?Sized> {
    store: Arc<R>,
}

impl<R: RemoteStore + ?Sized> AesChunkCodec<R> {
    pub fn new(store: Arc<R>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<R> {
        &self.store
    }
}

impl<R: RemoteStore + ?Sized> ChunkCodec for AesChunkCodec<R> {
    fn upload_chunk<'a>(&'a self, chunk: &'a UploadChunk) -> SeamFuture<'a, ChunkReceipt> {
        Box::pin(async move {
            let path = chunk.path.clone();
            let range = chunk.range.clone();
            let key = chunk.key.clone();
            let version = chunk.version;
            let sealed = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, TransferError> {
                let plain = ChunkReader::open(&path)?.read_range(range)?;
                Ok(encrypt_chunk(&plain, &key, version)?)
            })
            .await??;

            trace!(
                uuid = %chunk.session.uuid,
                index = chunk.index,
                sealed = sealed.len(),
                "sending chunk"
            );
            self.store
                .put_chunk(&chunk.session, chunk.index, sealed)
                .await
        })
    }

    fn download_chunk<'a>(&'a self, chunk: &'a DownloadChunk) -> SeamFuture<'a, u64> {
        Box::pin(async move {
            let sealed = self.store.get_chunk(&chunk.locator).await?;
            trace!(
                uuid = %chunk.locator.uuid,
                index = chunk.locator.index,
                sealed = sealed.len(),
                "fetched chunk"
            );

            let key = chunk.key.clone();
            let version = chunk.version;
            let dest = chunk.dest.clone();
            tokio::task::spawn_blocking(move || -> Result<u64, TransferError> {
                let plain = decrypt_chunk(&sealed, &key, version)?;
                std::fs::write(&dest, &plain)?;
                Ok(plain.len() as u64)
            })
            .await?
        })
    }
}
