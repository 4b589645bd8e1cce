//! Run orchestration.
//!
//! A `RelayJob` is the parameterless unit of work fired by the schedule:
//! - plan each configured prefix (drain its listing)
//! - transfer every planned object, one at a time
//! - aggregate the records into a `RunReport`
//! - hand the report to the notifier
//!
//! Object and prefix failures are recorded and never stop the run. Only a
//! failed notification is returned as an error, carrying the finished report.

use tracing::{error, info, info_span, warn, Instrument};

use crate::checksums::ChecksumAlgorithm;
use crate::config::RelayConfig;
use crate::error::EngineError;
use crate::lister;
use crate::model::SourceLocation;
use crate::notify::{NotificationOutcome, Notifier};
use crate::progress::ProgressCallback;
use crate::report::RunReport;
use crate::store::{DestinationStore, SourceStore};
use crate::transfer::{self, TransferContext};

/// Result of a completed run.
#[derive(Debug)]
pub struct RunSummary {
    pub report: RunReport,
    pub notification: NotificationOutcome,
}

/// One scheduled sweep over the configured prefixes.
pub struct RelayJob<'a> {
    source: &'a dyn SourceStore,
    destination: &'a dyn DestinationStore,
    notifier: Option<Notifier<'a>>,
    locations: Vec<SourceLocation>,
    base_path: String,
    verify: Option<ChecksumAlgorithm>,
}

impl<'a> RelayJob<'a> {
    /// Create a job from explicit settings.
    pub fn new(
        source: &'a dyn SourceStore,
        destination: &'a dyn DestinationStore,
        prefixes: &[String],
        base_path: impl Into<String>,
    ) -> Self {
        let locations = prefixes
            .iter()
            .map(|prefix| SourceLocation::new(source.container(), prefix.clone()))
            .collect();
        RelayJob {
            source,
            destination,
            notifier: None,
            locations,
            base_path: base_path.into(),
            verify: None,
        }
    }

    /// Create a job from the resolved run configuration.
    pub fn from_config(
        source: &'a dyn SourceStore,
        destination: &'a dyn DestinationStore,
        config: &RelayConfig,
    ) -> Self {
        RelayJob {
            source,
            destination,
            notifier: None,
            locations: config.source.locations(),
            base_path: config.destination.base_path.clone(),
            verify: config.verify,
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier<'a>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_verification(mut self, algorithm: Option<ChecksumAlgorithm>) -> Self {
        self.verify = algorithm;
        self
    }

    /// Run every transfer and return the aggregated report. Never fails.
    pub async fn run_transfers(&self, progress: Option<&dyn ProgressCallback>) -> RunReport {
        let mut report = RunReport::new();
        let ctx = TransferContext {
            source: self.source,
            destination: self.destination,
            base_path: &self.base_path,
            verify: self.verify,
        };

        info!(
            run_id = %report.run_id,
            prefixes = self.locations.len(),
            destination = %self.destination.bucket(),
            "relay run started"
        );
        if let Some(callback) = progress {
            callback.on_run_started(&report, &self.locations);
        }

        for location in &self.locations {
            let span = info_span!("prefix", prefix = %location.prefix);
            self.run_location(&ctx, location, &mut report, progress)
                .instrument(span)
                .await;
        }

        report.finish();
        info!(
            run_id = %report.run_id,
            processed = report.total_processed(),
            failed = report.total_failed(),
            "relay run finished"
        );
        if let Some(callback) = progress {
            callback.on_run_completed(&report);
        }
        report
    }

    async fn run_location(
        &self,
        ctx: &TransferContext<'_>,
        location: &SourceLocation,
        report: &mut RunReport,
        progress: Option<&dyn ProgressCallback>,
    ) {
        report.begin_prefix(&location.prefix);

        let handles = match lister::plan_location(self.source, location).await {
            Ok(handles) => handles,
            Err(e) => {
                error!(container = %location.container, error = %e, "listing failed; skipping prefix");
                report.record_listing_failure(&location.prefix, e.to_string());
                if let Some(callback) = progress {
                    callback.on_prefix_failed(location, &e);
                }
                return;
            }
        };

        info!(objects = handles.len(), "checking prefix");
        if let Some(callback) = progress {
            callback.on_prefix_planned(location, handles.len());
        }

        for handle in &handles {
            if let Some(callback) = progress {
                callback.on_object_started(handle);
            }
            let record = transfer::transfer_object(ctx, location, handle).await;
            if let Some(callback) = progress {
                callback.on_object_completed(&record);
            }
            report.record(record);
        }
    }

    /// Run every transfer, then deliver the report.
    ///
    /// # Errors
    /// Returns `EngineError::Notification` if the report could not be sent.
    /// The transfers it describes are already committed.
    pub async fn run(&self, progress: Option<&dyn ProgressCallback>) -> Result<RunSummary, EngineError> {
        let report = self.run_transfers(progress).await;

        let notification = match &self.notifier {
            None => {
                warn!("mail settings are not configured; skipping report email");
                NotificationOutcome::SkippedUnconfigured
            }
            Some(notifier) => match notifier.notify(&report).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, run_id = %report.run_id, "report email could not be sent");
                    return Err(EngineError::notification(report, e));
                }
            },
        };

        Ok(RunSummary {
            report,
            notification,
        })
    }
}
