//! Upload event metadata
//!
//! One `UploadMetadata` is created by the transport layer per upload event
//! (HTTP multipart, CLI, test harness — the shape is the same) and discarded
//! after the executor returns.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Host-supplied status of the transfer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// The file arrived intact.
    Received,
    /// The transport rejected the file for exceeding its size limit.
    SizeExceeded,
    /// Any other transport fault, with the host's error code.
    Failed(i32),
}

/// Transient per-event upload description.
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    /// Original filename as submitted by the client.
    pub file_name: String,
    /// Temporary staging location owned by the transport layer. The executor
    /// either moves this file or leaves it in place; it never deletes it.
    pub staged_path: PathBuf,
    pub size_bytes: u64,
    /// Content type as reported by the client. Not trusted for storage;
    /// columns mapped to a content type are sniffed from the staged bytes.
    pub reported_content_type: String,
    pub status: TransferStatus,
}

impl UploadMetadata {
    pub fn new(
        file_name: impl Into<String>,
        staged_path: impl Into<PathBuf>,
        size_bytes: u64,
        reported_content_type: impl Into<String>,
    ) -> Self {
        UploadMetadata {
            file_name: file_name.into(),
            staged_path: staged_path.into(),
            size_bytes,
            reported_content_type: reported_content_type.into(),
            status: TransferStatus::Received,
        }
    }

    pub fn with_status(mut self, status: TransferStatus) -> Self {
        self.status = status;
        self
    }

    /// Extension of the original filename: the substring after the last
    /// dot, case preserved. `None` when the name has no dot.
    pub fn extension(&self) -> Option<&str> {
        extension_of(&self.file_name)
    }
}

/// Substring after the last dot of `name`, case preserved.
pub fn extension_of(name: &str) -> Option<&str> {
    name.rsplit_once('.').map(|(_, ext)| ext)
}
