//! Per-run accounting: what each source listed, synced, skipped, and
//! failed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedSite {
    pub site_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceReport {
    /// Sites stored from the listing phase.
    pub listed: usize,
    pub rejected_sites: usize,
    /// Sites with a completed fetch that committed new rows.
    pub synced: usize,
    /// Sites with a completed fetch and nothing to store.
    pub no_data: usize,
    /// Sites within tolerance, not fetched.
    pub skipped_fresh: usize,
    /// Sites abandoned because shutdown was requested.
    pub cancelled: usize,
    /// Observation rows rejected by validation.
    pub invalid_rows: usize,
    /// Zero-flow rows dropped before validation.
    pub dropped_rows: usize,
    pub failed: Vec<FailedSite>,
    /// The whole source was skipped: credential required, none
    /// configured.
    pub skipped_missing_credential: bool,
    /// The listing call itself failed or could not be committed.
    pub listing_error: Option<String>,
    /// The source could not sync observations at all (for example, no
    /// site listing has ever been stored).
    pub precondition: Option<String>,
}

impl SourceReport {
    /// Fold another phase's report for the same source into this one.
    pub fn merge(&mut self, other: SourceReport) {
        self.listed += other.listed;
        self.rejected_sites += other.rejected_sites;
        self.synced += other.synced;
        self.no_data += other.no_data;
        self.skipped_fresh += other.skipped_fresh;
        self.cancelled += other.cancelled;
        self.invalid_rows += other.invalid_rows;
        self.dropped_rows += other.dropped_rows;
        self.failed.extend(other.failed);
        self.skipped_missing_credential |= other.skipped_missing_credential;
        if self.listing_error.is_none() {
            self.listing_error = other.listing_error;
        }
        if self.precondition.is_none() {
            self.precondition = other.precondition;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: BTreeMap<String, SourceReport>,
}

impl RunSummary {
    pub fn begin() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            sources: BTreeMap::new(),
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    pub fn total_synced(&self) -> usize {
        self.sources.values().map(|report| report.synced).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.sources.values().map(|report| report.failed.len()).sum()
    }

    /// Merge another run's per-source reports into this one, keeping
    /// this run's id and start time.
    pub fn absorb(&mut self, other: RunSummary) {
        for (source, report) in other.sources {
            self.sources.entry(source).or_default().merge(report);
        }
        self.finished_at = Utc::now();
    }
}
