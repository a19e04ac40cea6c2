//! Data types shared between the SealDrive transfer engine and the UI layer.
//!
//! The engine consumes [`FileItem`] (download) and [`LocalFile`] (upload)
//! descriptors and reports back with [`TransferDescriptor`] snapshots and
//! [`UploadedItem`] descriptions.

pub mod transfer;
pub mod types;

pub use transfer::{Direction, TransferDescriptor, TransferState};
pub use types::{FileItem, FileMetadata, LocalFile, UploadedItem};
