//! Sync engine: staleness planning, validation pipeline, and the
//! two-level bounded-concurrency orchestrator.

use thiserror::Error;

use flowline_core::SiteIdError;
use flowline_storage::StorageError;

pub mod config;
pub mod orchestrator;
pub mod planner;
pub mod report;
pub mod validate;

pub use config::SyncConfig;
pub use orchestrator::SyncEngine;
pub use report::{FailedSite, RunSummary, SourceReport};

pub const CRATE_NAME: &str = "flowline-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unknown source '{0}': no adapter registered")]
    UnknownSource(String),

    #[error(transparent)]
    SiteId(#[from] SiteIdError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("building http client: {0}")]
    Http(#[source] anyhow::Error),
}
