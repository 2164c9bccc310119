//! Source adapter contract + fixture-backed adapter implementation.
//!
//! The sync engine never branches on source identity; everything a
//! source knows how to do goes through [`SourceAdapter`].

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use thiserror::Error;

use flowline_core::{QualityFlag, RawObservation, RawSite};

pub mod fetch;
pub mod fixture;

pub use fetch::{BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig, HttpFetcher};
pub use fixture::{load_fixture_adapters, FixtureAdapter, FixtureBundle};

pub const CRATE_NAME: &str = "flowline-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Capability contract one upstream source implements.
///
/// Implementations own their API shape and pagination; the engine only
/// sees site listings and dated observation rows.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Lowercase source name; also the site-id prefix (upper-cased)
    /// and the data subdirectory name.
    fn source_id(&self) -> &str;

    /// Sources that cannot be queried without a configured credential.
    /// The engine skips them (with a warning) when none is set.
    fn requires_credentials(&self) -> bool {
        false
    }

    /// Map a source-specific raw quality flag into the shared
    /// vocabulary. Anything unmapped is `Unknown`.
    fn map_quality(&self, _raw: Option<&str>) -> QualityFlag {
        QualityFlag::Unknown
    }

    /// List every site this source monitors.
    async fn list_sites(
        &self,
        http: &HttpFetcher,
        credential: Option<&str>,
    ) -> Result<Vec<RawSite>, AdapterError>;

    /// Fetch daily observations for one site from `since` onward.
    /// `aux` is the opaque payload the source attached to the site at
    /// listing time.
    async fn fetch_observations(
        &self,
        http: &HttpFetcher,
        raw_id: &str,
        since: NaiveDate,
        credential: Option<&str>,
        aux: Option<&JsonValue>,
    ) -> Result<Vec<RawObservation>, AdapterError>;
}
