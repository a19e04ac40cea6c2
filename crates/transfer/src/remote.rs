//! Remote content store seam.
//!
//! `RemoteStore` is implemented by the host app on top of its HTTP client
//! and credentials. Keeping it a trait keeps both pipelines independent of
//! transport and testable with in-memory stores.

use sealdrive_protocol::FileMetadata;
use serde::{Deserialize, Serialize};

use crate::SeamFuture;

/// Addresses one stored chunk of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLocator {
    pub region: String,
    pub bucket: String,
    pub uuid: String,
    pub index: u32,
}

/// Routing data returned by the server for an uploaded chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReceipt {
    pub region: String,
    pub bucket: String,
}

/// Per-upload values sent alongside every chunk.
///
/// Name, size and mime are encrypted under the per-file key; `metadata` is
/// the full record encrypted under the newest master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub uuid: String,
    pub name_enc: String,
    pub name_hashed: String,
    pub size_enc: String,
    pub mime_enc: String,
    pub chunks: u32,
    pub rm: String,
    pub upload_key: String,
    pub metadata: String,
    pub parent: String,
    pub version: u32,
    pub expire: String,
}

/// Answer to a "mark upload done" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeStatus {
    /// The server assembled the object from `chunks` chunks.
    Done { chunks: u32 },
    /// The server has not seen every chunk yet; ask again later.
    Pending(String),
}

/// Abstract remote store.
pub trait RemoteStore: Send + Sync {
    /// Fetches the sealed bytes of one chunk.
    fn get_chunk<'a>(&'a self, locator: &'a ChunkLocator) -> SeamFuture<'a, Vec<u8>>;

    /// Sends one sealed chunk of an upload.
    fn put_chunk<'a>(
        &'a self,
        session: &'a UploadSession,
        index: u32,
        sealed: Vec<u8>,
    ) -> SeamFuture<'a, ChunkReceipt>;

    /// Asks the server to finalize an upload once every chunk arrived.
    fn mark_upload_done<'a>(
        &'a self,
        uuid: &'a str,
        upload_key: &'a str,
    ) -> SeamFuture<'a, FinalizeStatus>;

    /// Shares a new file with everyone the parent folder is shared with.
    ///
    /// A no-op for parents that are not shared.
    fn propagate_to_shared_parent<'a>(
        &'a self,
        parent: &'a str,
        uuid: &'a str,
        metadata: &'a FileMetadata,
    ) -> SeamFuture<'a, ()>;
}

/// Returns `true` for server answers meaning "not every chunk arrived yet".
pub fn is_finalize_pending(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["not matching", "done yet", "finished yet", "chunks not found"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_messages_recognised() {
        assert!(is_finalize_pending("Chunks are not matching"));
        assert!(is_finalize_pending("upload not done yet"));
        assert!(is_finalize_pending("Upload not finished yet"));
        assert!(is_finalize_pending("chunks not found"));
        assert!(!is_finalize_pending("internal server error"));
    }

    #[test]
    fn session_field_names() {
        let session = UploadSession {
            uuid: "u".into(),
            name_enc: "n".into(),
            name_hashed: "h".into(),
            size_enc: "s".into(),
            mime_enc: "m".into(),
            chunks: 3,
            rm: "r".into(),
            upload_key: "k".into(),
            metadata: "md".into(),
            parent: "p".into(),
            version: 2,
            expire: "never".into(),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["nameHashed"], "h");
        assert_eq!(json["uploadKey"], "k");
        assert_eq!(json["chunks"], 3);
    }
}
