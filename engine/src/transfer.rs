//! Per-object transfer.
//!
//! `transfer_object` moves one listed object:
//! 1. stream it from the source container
//! 2. write it to the destination bucket (optionally verifying it by checksum)
//! 3. copy it to the archive container and confirm the copy
//! 4. delete it from the source container
//!
//! Each step runs only if the previous one succeeded, so an object is never
//! archived without a successful upload and never deleted without a confirmed
//! archive copy. Whatever happens, exactly one `TransferRecord` comes back.

use tracing::{debug, info, warn};

use crate::checksums::{self, ChecksumAlgorithm, ChecksumValue};
use crate::error::{StoreError, TransferError};
use crate::model::{self, ObjectHandle, SourceLocation, TransferRecord, TransferStatus};
use crate::store::{DestinationStore, SourceStore};

/// Collaborators and settings shared by every transfer of a run.
#[derive(Clone, Copy)]
pub struct TransferContext<'a> {
    pub source: &'a dyn SourceStore,
    pub destination: &'a dyn DestinationStore,
    /// Destination base path, e.g. `upload`
    pub base_path: &'a str,
    /// Verify-after-upload algorithm
    pub verify: Option<ChecksumAlgorithm>,
}

/// What has been achieved so far; survives a failure in a later step.
#[derive(Default)]
struct Progress {
    bytes_transferred: u64,
    checksum: Option<ChecksumValue>,
}

/// Transfer one object and report the outcome.
pub async fn transfer_object(
    ctx: &TransferContext<'_>,
    location: &SourceLocation,
    handle: &ObjectHandle,
) -> TransferRecord {
    let file_name = handle.file_name().to_string();
    let destination_path = model::destination_path(ctx.base_path, location, &file_name);
    let archive_path = model::archive_path(handle);

    let mut progress = Progress::default();
    let outcome = run_steps(ctx, handle, &destination_path, &archive_path, &mut progress).await;

    let (status, failed_step, error_detail) = match outcome {
        Ok(()) => {
            info!(
                source = %handle.path,
                destination = %destination_path,
                bytes = progress.bytes_transferred,
                "transferred and archived"
            );
            (TransferStatus::Success, None, None)
        }
        Err(e) => {
            let step = e.step();
            warn!(source = %handle.path, %step, error = %e, "transfer failed");
            (TransferStatus::Failed, Some(step), Some(e.to_string()))
        }
    };

    TransferRecord {
        source_prefix: location.prefix.clone(),
        file_name,
        source_path: handle.path.clone(),
        destination_path,
        archive_path,
        status,
        failed_step,
        error_detail,
        bytes_transferred: progress.bytes_transferred,
        checksum: progress.checksum,
    }
}

async fn run_steps(
    ctx: &TransferContext<'_>,
    handle: &ObjectHandle,
    destination_path: &str,
    archive_path: &str,
    progress: &mut Progress,
) -> Result<(), TransferError> {
    let content = ctx.source.read(handle).await.map_err(TransferError::Read)?;

    let (content, digest) = match ctx.verify {
        Some(algorithm) => {
            let (stream, digest) = checksums::digesting(content, algorithm);
            (stream, Some((algorithm, digest)))
        }
        None => (content, None),
    };

    let written = ctx
        .destination
        .write(destination_path, content)
        .await
        .map_err(|source| TransferError::Upload {
            path: destination_path.to_string(),
            source,
        })?;
    progress.bytes_transferred = written;
    debug!(destination = %destination_path, bytes = written, "uploaded");

    if let Some(expected) = handle.size {
        if expected != written {
            return Err(TransferError::Verify {
                path: destination_path.to_string(),
                reason: format!("listed {} bytes but wrote {}", expected, written),
            });
        }
    }

    if let Some((algorithm, digest)) = digest {
        let sent = digest.finish().ok_or_else(|| TransferError::Verify {
            path: destination_path.to_string(),
            reason: "upload digest unavailable".to_string(),
        })?;
        let stored = ctx
            .destination
            .read(destination_path)
            .await
            .map_err(|e| verify_read_error(destination_path, e))?;
        let stored = checksums::compute_stream_checksum(stored, algorithm)
            .await
            .map_err(|e| verify_read_error(destination_path, e))?;
        if stored != sent {
            return Err(TransferError::Verify {
                path: destination_path.to_string(),
                reason: format!(
                    "checksum mismatch: sent {} but stored {}",
                    sent.to_string_with_algo(),
                    stored.to_string_with_algo()
                ),
            });
        }
        progress.checksum = Some(sent);
    }

    ctx.source
        .copy_to_archive(handle, archive_path)
        .await
        .map_err(|source| TransferError::ArchiveCopy {
            path: archive_path.to_string(),
            source,
        })?;

    let archived = ctx
        .source
        .head_archive(archive_path)
        .await
        .map_err(|e| TransferError::ArchiveConfirm {
            path: archive_path.to_string(),
            reason: e.to_string(),
        })?;
    if let Some(size) = archived.size {
        if size != written {
            return Err(TransferError::ArchiveConfirm {
                path: archive_path.to_string(),
                reason: format!("archive holds {} bytes, expected {}", size, written),
            });
        }
    }
    debug!(archive = %archive_path, "archive copy confirmed");

    ctx.source
        .delete(handle)
        .await
        .map_err(TransferError::SourceDelete)?;

    Ok(())
}

fn verify_read_error(path: &str, e: StoreError) -> TransferError {
    TransferError::Verify {
        path: path.to_string(),
        reason: format!("read-back failed: {}", e),
    }
}
