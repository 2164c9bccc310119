//! Fixture-backed adapter: serves a captured site listing and
//! observation rows from a JSON bundle on disk.
//!
//! This is the reference implementation of the [`SourceAdapter`]
//! contract and the workhorse of the integration tests; real provider
//! clients live outside this workspace.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use flowline_core::{QualityFlag, RawObservation, RawSite};

use crate::{AdapterError, HttpFetcher, SourceAdapter};

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureBundle {
    pub source_id: String,
    #[serde(default)]
    pub requires_credentials: bool,
    /// Raw-flag vocabulary of this source mapped into the shared one.
    #[serde(default)]
    pub quality_map: BTreeMap<String, QualityFlag>,
    #[serde(default)]
    pub sites: Vec<RawSite>,
    /// Observation rows keyed by raw site id.
    #[serde(default)]
    pub observations: BTreeMap<String, Vec<RawObservation>>,
}

#[derive(Debug, Clone)]
pub struct FixtureAdapter {
    bundle: FixtureBundle,
}

impl FixtureAdapter {
    pub fn new(bundle: FixtureBundle) -> Self {
        Self { bundle }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let bundle: FixtureBundle =
            serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self::new(bundle))
    }
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    fn source_id(&self) -> &str {
        &self.bundle.source_id
    }

    fn requires_credentials(&self) -> bool {
        self.bundle.requires_credentials
    }

    fn map_quality(&self, raw: Option<&str>) -> QualityFlag {
        raw.and_then(|flag| self.bundle.quality_map.get(flag).copied())
            .unwrap_or(QualityFlag::Unknown)
    }

    async fn list_sites(
        &self,
        _http: &HttpFetcher,
        credential: Option<&str>,
    ) -> Result<Vec<RawSite>, AdapterError> {
        if self.bundle.requires_credentials && credential.is_none() {
            return Err(AdapterError::Message(format!(
                "source '{}' requires a credential",
                self.bundle.source_id
            )));
        }
        Ok(self.bundle.sites.clone())
    }

    async fn fetch_observations(
        &self,
        _http: &HttpFetcher,
        raw_id: &str,
        since: NaiveDate,
        credential: Option<&str>,
        _aux: Option<&JsonValue>,
    ) -> Result<Vec<RawObservation>, AdapterError> {
        if self.bundle.requires_credentials && credential.is_none() {
            return Err(AdapterError::Message(format!(
                "source '{}' requires a credential",
                self.bundle.source_id
            )));
        }
        let rows = self
            .bundle
            .observations
            .get(raw_id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.date >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }
}

/// Load every `*.json` fixture bundle under `dir` as an adapter.
pub fn load_fixture_adapters(dir: &Path) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    if !dir.is_dir() {
        return Ok(adapters);
    }
    let mut paths: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|ext| ext == "json") == Some(true))
        .collect();
    paths.sort();
    for path in paths {
        adapters.push(Arc::new(FixtureAdapter::from_path(&path)?));
    }
    Ok(adapters)
}
