//! Core data model for relay runs.
//!
//! This module defines the values that flow through a run:
//! - SourceLocation: a monitored prefix in the source container
//! - ObjectHandle: one listed object
//! - TransferRecord: the outcome of one attempted transfer
//! - TransferStatus, TransferStep: enums describing that outcome

use serde::Serialize;

use crate::checksums::ChecksumValue;

/// A monitored directory in the source container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Source container name
    pub container: String,

    /// Prefix to list, e.g. `marketing/`
    pub prefix: String,
}

impl SourceLocation {
    pub fn new(container: impl Into<String>, prefix: impl Into<String>) -> Self {
        SourceLocation {
            container: container.into(),
            prefix: prefix.into(),
        }
    }

    /// The prefix without surrounding slashes (`marketing/` -> `marketing`).
    pub fn prefix_name(&self) -> &str {
        self.prefix.trim_matches('/')
    }
}

/// Identifies one object in source or destination storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHandle {
    /// Container or bucket holding the object
    pub container: String,

    /// Full object key within the container
    pub path: String,

    /// Object size in bytes, when the listing reports it
    pub size: Option<u64>,
}

impl ObjectHandle {
    pub fn new(container: impl Into<String>, path: impl Into<String>, size: Option<u64>) -> Self {
        ObjectHandle {
            container: container.into(),
            path: path.into(),
            size,
        }
    }

    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
    }
}

/// Final status of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferStatus {
    /// Uploaded, archived and removed from the source
    Success,
    /// One of the steps failed; see the record's error detail
    Failed,
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferStatus::Success => write!(f, "Success"),
            TransferStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// The ordered steps of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferStep {
    Read,
    Upload,
    Verify,
    ArchiveCopy,
    ArchiveConfirm,
    SourceDelete,
}

impl TransferStep {
    /// True for steps that run after the destination upload succeeded.
    pub fn is_archival(&self) -> bool {
        matches!(
            self,
            TransferStep::ArchiveCopy | TransferStep::ArchiveConfirm | TransferStep::SourceDelete
        )
    }
}

impl std::fmt::Display for TransferStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransferStep::Read => "read",
            TransferStep::Upload => "upload",
            TransferStep::Verify => "verify",
            TransferStep::ArchiveCopy => "archive copy",
            TransferStep::ArchiveConfirm => "archive confirm",
            TransferStep::SourceDelete => "source delete",
        };
        f.write_str(name)
    }
}

/// Outcome of one attempted transfer. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRecord {
    /// Prefix the object was listed under
    pub source_prefix: String,

    /// Base name of the object
    pub file_name: String,

    /// Full source key
    pub source_path: String,

    /// Key written in the destination bucket
    pub destination_path: String,

    /// Key in the archive container
    pub archive_path: String,

    pub status: TransferStatus,

    /// Step that failed, if any
    pub failed_step: Option<TransferStep>,

    /// Human-readable error message
    pub error_detail: Option<String>,

    /// Bytes streamed to the destination
    pub bytes_transferred: u64,

    /// Digest of the transferred content (verify-after-upload only)
    pub checksum: Option<ChecksumValue>,
}

impl TransferRecord {
    pub fn is_failed(&self) -> bool {
        self.status == TransferStatus::Failed
    }
}

/// Destination key for an object: `<base>/<prefix>/<file>`.
pub fn destination_path(base: &str, location: &SourceLocation, file_name: &str) -> String {
    let base = base.trim_matches('/');
    if base.is_empty() {
        format!("{}/{}", location.prefix_name(), file_name)
    } else {
        format!("{}/{}/{}", base, location.prefix_name(), file_name)
    }
}

/// Archive key for an object: its full source key, so nested objects that
/// share a file name never land on the same archive entry.
pub fn archive_path(handle: &ObjectHandle) -> String {
    handle.path.trim_start_matches('/').to_string()
}
