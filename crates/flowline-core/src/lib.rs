//! Core domain model for Flowline gauge mirrors.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod validate;

pub const CRATE_NAME: &str = "flowline-core";

/// Earliest date the system considers meaningful. Full-history fetches
/// start here.
pub fn epoch_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(1950, 1, 1).expect("valid epoch date")
}

/// Normalized reliability annotation for a single measurement.
///
/// Every source maps its own raw flag vocabulary into this closed set;
/// anything unmapped becomes `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityFlag {
    Good,
    Provisional,
    Estimated,
    Suspect,
    Bad,
    #[default]
    Unknown,
}

impl QualityFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityFlag::Good => "good",
            QualityFlag::Provisional => "provisional",
            QualityFlag::Estimated => "estimated",
            QualityFlag::Suspect => "suspect",
            QualityFlag::Bad => "bad",
            QualityFlag::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid site id '{0}': expected '<SOURCE>-<raw-id>'")]
pub struct SiteIdError(pub String);

/// Build the global site id `"<SOURCE>-<raw-id>"` for a source-local id.
pub fn global_site_id(source: &str, raw_id: &str) -> String {
    format!("{}-{}", source.to_ascii_uppercase(), raw_id)
}

/// Split a global site id into (lowercased source name, raw id).
pub fn split_site_id(site_id: &str) -> Result<(String, &str), SiteIdError> {
    match site_id.split_once('-') {
        Some((source, raw_id)) if !source.is_empty() && !raw_id.is_empty() => {
            Ok((source.to_ascii_lowercase(), raw_id))
        }
        _ => Err(SiteIdError(site_id.to_string())),
    }
}

/// Derived aggregate statistics for one site's stored observations.
///
/// Always recomputed from the time-series store, never asserted
/// independently.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteStats {
    pub min_date: NaiveDate,
    pub max_date: NaiveDate,
    pub min_value: f64,
    pub max_value: f64,
    pub mean_value: f64,
    pub count: u64,
}

/// Catalog record for one monitored site.
///
/// Identity and location are set once at creation; only `last_synced`
/// and `stats` are mutated by the sync engine afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub site_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Drainage area in km². Unknown (or nonsensical upstream values)
    /// are stored as `None`, never as zero.
    pub area: Option<f64>,
    /// Source-reported activity flag. "Has recent data" is a separate
    /// derived query, not this field.
    pub active: bool,
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: Option<SiteStats>,
    /// Opaque source-specific payload handed back to the adapter on
    /// every fetch so it can skip redundant identity lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_misc: Option<JsonValue>,
}

/// One dated measurement, keyed by (site, date). Later writes for the
/// same key replace earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub site_id: String,
    pub date: NaiveDate,
    pub value: f64,
    pub quality: QualityFlag,
}

/// Site row as reported by a source's listing endpoint, before
/// screening and prefixing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSite {
    pub raw_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub area: Option<f64>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub aux: Option<JsonValue>,
}

/// Measurement row as returned by a source adapter, before quality
/// mapping and screening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub date: NaiveDate,
    pub value: f64,
    #[serde(default)]
    pub raw_flag: Option<String>,
}
