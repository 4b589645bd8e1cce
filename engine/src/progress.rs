//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which lets front ends
//! (the scheduled CLI, tests) observe a run without the engine knowing how
//! the information is displayed.

use crate::error::StoreError;
use crate::model::{ObjectHandle, SourceLocation, TransferRecord};
use crate::report::RunReport;

/// Trait for receiving progress updates from a relay run.
///
/// All methods are called in order from the single thread driving the run.
pub trait ProgressCallback: Send + Sync {
    /// Called when the run starts, before any prefix is listed.
    fn on_run_started(&self, report: &RunReport, locations: &[SourceLocation]);

    /// Called once a prefix listing has been drained.
    fn on_prefix_planned(&self, location: &SourceLocation, objects: usize);

    /// Called when a prefix could not be listed; the run moves on.
    fn on_prefix_failed(&self, location: &SourceLocation, error: &StoreError);

    /// Called when an object is about to be transferred.
    fn on_object_started(&self, handle: &ObjectHandle);

    /// Called with the record of every attempted object (success or failure).
    fn on_object_completed(&self, record: &TransferRecord);

    /// Called when every prefix has been processed, before notification.
    fn on_run_completed(&self, report: &RunReport);
}
