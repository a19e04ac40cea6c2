use serde::{Deserialize, Serialize};

/// A remote file as listed by the drive, used as the download descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileItem {
    pub uuid: String,
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub parent: String,
    /// Per-file symmetric key (decrypted from the metadata record).
    pub key: String,
    pub region: String,
    pub bucket: String,
    /// Number of chunks declared by the server.
    pub chunks: u32,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub offline: bool,
    #[serde(default)]
    pub favorited: bool,
}

fn default_version() -> u32 {
    2
}

/// A local file queued for upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFile {
    pub path: String,
    pub name: String,
    /// Declared size; the upload pipeline re-stats the file and trusts disk.
    pub size: u64,
    #[serde(default)]
    pub mime: String,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub last_modified: i64,
}

/// Plaintext metadata record, encrypted under the master key before upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub key: String,
    pub last_modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Description of a freshly uploaded file, handed back to the caller for
/// insertion into its item listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedItem {
    pub uuid: String,
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub key: String,
    pub rm: String,
    /// Metadata record encrypted under the newest master key.
    pub metadata: String,
    pub chunks: u32,
    pub parent: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub version: u32,
    pub region: String,
    pub bucket: String,
}

impl UploadedItem {
    /// Converts the upload result into a download descriptor for the same file.
    pub fn to_file_item(&self) -> FileItem {
        FileItem {
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            size: self.size,
            mime: self.mime.clone(),
            parent: self.parent.clone(),
            key: self.key.clone(),
            region: self.region.clone(),
            bucket: self.bucket.clone(),
            chunks: self.chunks,
            version: self.version,
            offline: false,
            favorited: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_item_field_names() {
        let json = r#"{"uuid":"u1","name":"a.txt","size":10,"key":"k","region":"de-1","bucket":"b1","chunks":1}"#;
        let item: FileItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.uuid, "u1");
        assert_eq!(item.version, 2);
        assert!(!item.offline);
        assert!(item.mime.is_empty());
    }

    #[test]
    fn metadata_omits_missing_hash() {
        let meta = FileMetadata {
            name: "a.txt".into(),
            size: 3,
            mime: "text/plain".into(),
            key: "k".into(),
            last_modified: 1,
            hash: None,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("hash"));
        assert!(json.contains("lastModified"));
    }

    #[test]
    fn uploaded_item_converts_to_descriptor() {
        let up = UploadedItem {
            uuid: "u1".into(),
            name: "a.bin".into(),
            size: 42,
            mime: String::new(),
            key: "k".into(),
            rm: "r".into(),
            metadata: "m".into(),
            chunks: 1,
            parent: "p".into(),
            timestamp: 0,
            version: 2,
            region: "de-1".into(),
            bucket: "b".into(),
        };
        let item = up.to_file_item();
        assert_eq!(item.uuid, "u1");
        assert_eq!(item.region, "de-1");
        assert_eq!(item.chunks, 1);
    }
}
