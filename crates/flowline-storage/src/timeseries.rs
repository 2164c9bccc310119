//! Observation store: one series file per site, keyed by (site, date).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::NaiveDate;
use tracing::debug;

use flowline_core::{Observation, SiteStats};

use crate::{read_json, write_json_atomic, StorageError};

type Series = BTreeMap<NaiveDate, Observation>;

/// Rows written by one upsert call, after intra-batch dedup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub rows: usize,
    pub sites: usize,
}

/// Time-series store partitioned by site: queries are always
/// site-scoped first, so each site's rows live in their own file under
/// `series/`.
#[derive(Debug)]
pub struct TimeSeriesStore {
    series_dir: PathBuf,
    inner: RwLock<BTreeMap<String, Series>>,
}

impl TimeSeriesStore {
    pub fn open(source_dir: &Path) -> Result<Self, StorageError> {
        let series_dir = source_dir.join("series");
        fs::create_dir_all(&series_dir).map_err(|err| StorageError::Io {
            path: series_dir.clone(),
            source: err,
        })?;

        let mut map: BTreeMap<String, Series> = BTreeMap::new();
        let entries = fs::read_dir(&series_dir).map_err(|err| StorageError::Io {
            path: series_dir.clone(),
            source: err,
        })?;
        for entry in entries {
            let entry = entry.map_err(|err| StorageError::Io {
                path: series_dir.clone(),
                source: err,
            })?;
            let path = entry.path();
            if path.extension().map(|ext| ext == "json") != Some(true) {
                continue;
            }
            let rows: Vec<Observation> = read_json(&path)?;
            for row in rows {
                map.entry(row.site_id.clone())
                    .or_default()
                    .insert(row.date, row);
            }
        }

        Ok(Self {
            series_dir,
            inner: RwLock::new(map),
        })
    }

    /// Insert-or-replace keyed write.
    ///
    /// Exact duplicate keys inside the batch collapse to the last
    /// occurrence before the merge, and incoming rows win over stored
    /// ones. Once this returns, `query` reflects the batch.
    pub fn upsert(&self, observations: &[Observation]) -> Result<UpsertReport, StorageError> {
        if observations.is_empty() {
            return Ok(UpsertReport::default());
        }

        // Collapse the batch itself first: last occurrence per key wins.
        let mut batch: BTreeMap<String, Series> = BTreeMap::new();
        for obs in observations {
            batch
                .entry(obs.site_id.clone())
                .or_default()
                .insert(obs.date, obs.clone());
        }

        let mut report = UpsertReport::default();
        let mut map = self.inner.write().expect("series lock poisoned");
        for (site_id, rows) in batch {
            report.sites += 1;
            report.rows += rows.len();
            // Persist the merged series before readers can see it: a
            // failed write leaves memory and disk agreeing.
            let mut merged = map.get(&site_id).cloned().unwrap_or_default();
            merged.extend(rows);
            self.persist_site(&site_id, &merged)?;
            map.insert(site_id, merged);
        }

        debug!(rows = report.rows, sites = report.sites, "series upsert");
        Ok(report)
    }

    /// Range query, ordered by (site, date). `None` site filter means
    /// every site.
    pub fn query(
        &self,
        site_ids: Option<&[String]>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Vec<Observation> {
        let map = self.inner.read().expect("series lock poisoned");

        let selected: Vec<&Series> = match site_ids {
            None => map.values().collect(),
            Some(ids) => {
                let mut ids: Vec<&String> = ids.iter().collect();
                ids.sort();
                ids.dedup();
                ids.into_iter().filter_map(|id| map.get(id)).collect()
            }
        };

        let mut rows = Vec::new();
        for series in selected {
            for obs in series.values() {
                if start.is_some_and(|s| obs.date < s) {
                    continue;
                }
                if end.is_some_and(|e| obs.date > e) {
                    continue;
                }
                rows.push(obs.clone());
            }
        }
        rows
    }

    /// Full recompute over the site's stored rows. Returns `None`, not
    /// a zero-count record, when nothing is stored.
    pub fn recompute_stats(&self, site_id: &str) -> Option<SiteStats> {
        let map = self.inner.read().expect("series lock poisoned");
        let series = map.get(site_id)?;
        if series.is_empty() {
            return None;
        }

        let mut min_value = f64::INFINITY;
        let mut max_value = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for obs in series.values() {
            min_value = min_value.min(obs.value);
            max_value = max_value.max(obs.value);
            sum += obs.value;
        }
        let count = series.len() as u64;

        // BTreeMap keys are ordered, so first/last give the date span.
        let min_date = *series.keys().next()?;
        let max_date = *series.keys().next_back()?;

        Some(SiteStats {
            min_date,
            max_date,
            min_value,
            max_value,
            mean_value: sum / count as f64,
            count,
        })
    }

    fn persist_site(&self, site_id: &str, series: &Series) -> Result<(), StorageError> {
        let path = self.series_dir.join(format!("{site_id}.json"));
        let rows: Vec<&Observation> = series.values().collect();
        write_json_atomic(&path, &rows)
    }
}
