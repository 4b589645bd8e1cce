//! # Outbound Relay Engine
//!
//! Moves files from an Azure Blob Storage container to a Google Cloud Storage
//! bucket, archives what was moved, and emails a report of the run.
//!
//! ## Overview
//!
//! One run sweeps a fixed, ordered list of prefixes in the source container:
//! - Each prefix listing is drained first (directory markers skipped)
//! - Each object is streamed to `<base>/<prefix>/<file>` in the destination
//! - On a successful upload the object is copied to the archive container,
//!   the copy is confirmed, and only then is the source deleted
//! - Every attempt becomes one `TransferRecord`; failures are recorded, not raised
//! - The records are grouped per prefix in a `RunReport` and emailed as HTML
//!
//! Everything is sequential: one prefix, then one object, at a time.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{GraphMailer, Notifier, ObjectStoreDestination, ObjectStoreSource, RelayConfig, RelayJob};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RelayConfig::from_env()?;
//! let source = ObjectStoreSource::azure(&config.source)?;
//! let destination = ObjectStoreDestination::gcs(&config.destination)?;
//!
//! let mailer = config.mail.as_ref().map(GraphMailer::new);
//!
//! let mut job = RelayJob::from_config(&source, &destination, &config);
//! if let (Some(mailer), Some(mail)) = (&mailer, &config.mail) {
//!     job = job.with_notifier(Notifier::new(mailer, mail));
//! }
//!
//! let summary = job.run(None).await?;
//! println!("{} processed, {} failed", summary.report.total_processed(), summary.report.total_failed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core values (SourceLocation, ObjectHandle, TransferRecord)
//! - **error**: Error types and handling
//! - **config**: Run configuration resolved from the environment
//! - **store**: Storage collaborator traits and object_store adapters
//! - **lister**: Prefix enumeration
//! - **transfer**: Per-object upload, archive and delete
//! - **report**: Run report accumulation
//! - **notify**: HTML report rendering and mail delivery
//! - **job**: Run orchestration
//! - **progress**: Progress callback trait
//! - **checksums**: Checksum computation for verify-after-upload

pub mod checksums;
pub mod config;
pub mod error;
pub mod job;
pub mod lister;
pub mod model;
pub mod notify;
pub mod progress;
pub mod report;
pub mod store;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types and functions
pub use checksums::{ChecksumAlgorithm, ChecksumValue};
pub use config::{ConfigError, MailConfig, RelayConfig};
pub use error::{EngineError, NotifyError, StoreError, TransferError};
pub use job::{RelayJob, RunSummary};
pub use model::{ObjectHandle, SourceLocation, TransferRecord, TransferStatus, TransferStep};
pub use notify::{GraphMailer, MailMessage, Mailer, NotificationOutcome, Notifier};
pub use progress::ProgressCallback;
pub use report::{PrefixGroup, RunReport};
pub use store::{DestinationStore, ObjectStoreDestination, ObjectStoreSource, SourceStore};
