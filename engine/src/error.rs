//! Error types for the relay engine.
//!
//! The primary error type is `EngineError`, which represents run-level errors
//! that end a run. Object-level errors are recorded in the `TransferRecord`
//! (see `TransferError`), and prefix-level listing errors are recorded in the
//! `RunReport`; neither is returned as an `EngineError`.

use thiserror::Error;

use crate::config::ConfigError;
use crate::model::TransferStep;
use crate::report::RunReport;

/// Errors raised by a storage collaborator (source, archive or destination).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist
    #[error("object not found: {path}")]
    NotFound { path: String },

    /// The underlying storage client failed
    #[error("{operation} failed for {path}: {source}")]
    Backend {
        operation: &'static str,
        path: String,
        #[source]
        source: object_store::Error,
    },

    /// Writing the streamed body to the destination failed
    #[error("write failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Catch-all for collaborator errors that carry only a message
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub(crate) fn backend(
        operation: &'static str,
        path: impl Into<String>,
        source: object_store::Error,
    ) -> Self {
        let path = path.into();
        match source {
            object_store::Error::NotFound { .. } => StoreError::NotFound { path },
            source => StoreError::Backend {
                operation,
                path,
                source,
            },
        }
    }
}

/// A failed step of a single object transfer.
///
/// Only its rendered message and step survive into the `TransferRecord`.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("read from source failed: {0}")]
    Read(#[source] StoreError),

    #[error("upload to {path} failed: {source}")]
    Upload {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("verification of {path} failed: {reason}")]
    Verify { path: String, reason: String },

    #[error("archive copy to {path} failed: {source}")]
    ArchiveCopy {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("archive copy at {path} could not be confirmed: {reason}")]
    ArchiveConfirm { path: String, reason: String },

    #[error("delete of archived source failed: {0}")]
    SourceDelete(#[source] StoreError),
}

impl TransferError {
    /// The pipeline step that raised this error.
    pub fn step(&self) -> TransferStep {
        match self {
            Self::Read(_) => TransferStep::Read,
            Self::Upload { .. } => TransferStep::Upload,
            Self::Verify { .. } => TransferStep::Verify,
            Self::ArchiveCopy { .. } => TransferStep::ArchiveCopy,
            Self::ArchiveConfirm { .. } => TransferStep::ArchiveConfirm,
            Self::SourceDelete(_) => TransferStep::SourceDelete,
        }
    }
}

/// Errors raised while delivering the run report.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("token request failed: {0}")]
    Token(#[source] reqwest::Error),

    #[error("token response did not contain an access token: {0}")]
    TokenMissing(String),

    #[error("send mail request failed: {0}")]
    Send(#[source] reqwest::Error),

    #[error("mail transport rejected the message: {0}")]
    Rejected(String),

    #[error("invalid mail endpoint: {0}")]
    Endpoint(String),
}

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A storage client could not be constructed
    #[error("failed to build {store} client: {source}")]
    ClientSetup {
        store: &'static str,
        #[source]
        source: object_store::Error,
    },

    /// The report could not be delivered; transfer work is already committed
    #[error("notification failed after {processed} transfers ({failed} failed): {source}")]
    Notification {
        processed: usize,
        failed: usize,
        report: Box<RunReport>,
        #[source]
        source: NotifyError,
    },
}

impl EngineError {
    pub(crate) fn notification(report: RunReport, source: NotifyError) -> Self {
        EngineError::Notification {
            processed: report.total_processed(),
            failed: report.total_failed(),
            report: Box::new(report),
            source,
        }
    }
}
