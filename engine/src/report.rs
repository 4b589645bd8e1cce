//! Run report accumulation.
//!
//! `RunReport` is the single accumulator of a run. Records are appended under
//! their prefix group in attempt order; groups keep the order in which the
//! prefixes were configured. Totals are always current, so a partially built
//! report is still meaningful.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::TransferRecord;

/// Records for one source prefix.
#[derive(Debug, Clone, Serialize)]
pub struct PrefixGroup {
    pub prefix: String,

    /// Set when the prefix could not be listed; such a group has no records
    pub listing_error: Option<String>,

    pub records: Vec<TransferRecord>,
}

impl PrefixGroup {
    pub fn failed_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_failed()).count()
    }
}

/// Aggregated outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    groups: Vec<PrefixGroup>,
}

impl RunReport {
    pub fn new() -> Self {
        RunReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            groups: Vec::new(),
        }
    }

    /// Open the group for `prefix`, or return the existing one.
    pub fn begin_prefix(&mut self, prefix: &str) -> &mut PrefixGroup {
        let index = match self.groups.iter().position(|g| g.prefix == prefix) {
            Some(index) => index,
            None => {
                self.groups.push(PrefixGroup {
                    prefix: prefix.to_string(),
                    listing_error: None,
                    records: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        &mut self.groups[index]
    }

    /// Append a record under its source prefix.
    pub fn record(&mut self, record: TransferRecord) {
        let prefix = record.source_prefix.clone();
        self.begin_prefix(&prefix).records.push(record);
    }

    /// Mark a prefix as unlistable. Any records already held for it are dropped.
    pub fn record_listing_failure(&mut self, prefix: &str, error: impl Into<String>) {
        let group = self.begin_prefix(prefix);
        group.records.clear();
        group.listing_error = Some(error.into());
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn groups(&self) -> &[PrefixGroup] {
        &self.groups
    }

    pub fn records(&self) -> impl Iterator<Item = &TransferRecord> {
        self.groups.iter().flat_map(|g| g.records.iter())
    }

    /// Number of transfer attempts recorded.
    pub fn total_processed(&self) -> usize {
        self.groups.iter().map(|g| g.records.len()).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.groups.iter().map(PrefixGroup::failed_count).sum()
    }

    pub fn total_succeeded(&self) -> usize {
        self.total_processed() - self.total_failed()
    }

    /// Prefixes that failed at listing.
    pub fn failed_prefixes(&self) -> impl Iterator<Item = &PrefixGroup> {
        self.groups.iter().filter(|g| g.listing_error.is_some())
    }

    pub fn has_failures(&self) -> bool {
        self.total_failed() > 0 || self.failed_prefixes().next().is_some()
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
