//! Site catalog: durable keyed metadata for one source's sites.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use flowline_core::validate::{self, FieldError};
use flowline_core::{SiteRecord, SiteStats};

use crate::{read_json, write_json_atomic, StorageError};

/// One site that failed catalog screening, with the structured reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRejection {
    pub site_id: String,
    pub error: FieldError,
}

/// Result of a batch upsert: valid records commit even when siblings
/// in the same batch are rejected.
#[derive(Debug, Default)]
pub struct CatalogBatchOutcome {
    pub stored: usize,
    pub rejected: Vec<SiteRejection>,
}

#[derive(Debug)]
pub struct SiteCatalog {
    path: PathBuf,
    inner: RwLock<BTreeMap<String, SiteRecord>>,
}

impl SiteCatalog {
    pub fn open(source_dir: &Path) -> Result<Self, StorageError> {
        let path = source_dir.join("sites.json");
        let records: Vec<SiteRecord> = if path.exists() {
            read_json(&path)?
        } else {
            Vec::new()
        };
        let map = records
            .into_iter()
            .map(|record| (record.site_id.clone(), record))
            .collect();
        Ok(Self {
            path,
            inner: RwLock::new(map),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("catalog lock poisoned").is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("catalog lock poisoned").len()
    }

    /// Replace-by-id upsert. Each record is screened independently;
    /// malformed ones are reported back while the rest commit.
    pub fn upsert_sites(
        &self,
        records: Vec<SiteRecord>,
    ) -> Result<CatalogBatchOutcome, StorageError> {
        let mut outcome = CatalogBatchOutcome::default();
        let mut accepted = Vec::with_capacity(records.len());

        for mut record in records {
            if let Err(error) = screen_record(&record) {
                warn!(
                    site_id = %record.site_id,
                    field = error.field,
                    value = %error.value,
                    reason = error.reason,
                    "rejecting site record",
                );
                outcome.rejected.push(SiteRejection {
                    site_id: record.site_id,
                    error,
                });
                continue;
            }
            record.area = validate::sanitize_area(record.area);
            accepted.push(record);
        }

        if !accepted.is_empty() {
            // Stage the new catalog and swap it in only once the disk
            // write lands; readers never see an unpersisted record.
            let mut map = self.inner.write().expect("catalog lock poisoned");
            let mut next = map.clone();
            for record in accepted {
                next.insert(record.site_id.clone(), record);
                outcome.stored += 1;
            }
            self.persist(&next)?;
            *map = next;
        }

        debug!(
            stored = outcome.stored,
            rejected = outcome.rejected.len(),
            "catalog upsert",
        );
        Ok(outcome)
    }

    /// Snapshot read, ordered by site id. `None` returns every record.
    pub fn sites(&self, ids: Option<&[String]>) -> Vec<SiteRecord> {
        let map = self.inner.read().expect("catalog lock poisoned");
        match ids {
            None => map.values().cloned().collect(),
            Some(ids) => {
                let mut ids: Vec<&String> = ids.iter().collect();
                ids.sort();
                ids.dedup();
                ids.into_iter()
                    .filter_map(|id| map.get(id).cloned())
                    .collect()
            }
        }
    }

    pub fn get(&self, site_id: &str) -> Option<SiteRecord> {
        self.inner
            .read()
            .expect("catalog lock poisoned")
            .get(site_id)
            .cloned()
    }

    /// Write recomputed aggregate statistics for one site.
    pub fn update_stats(
        &self,
        site_id: &str,
        stats: Option<SiteStats>,
    ) -> Result<(), StorageError> {
        let mut map = self.inner.write().expect("catalog lock poisoned");
        let mut next = map.clone();
        let record = next
            .get_mut(site_id)
            .ok_or_else(|| StorageError::UnknownSite(site_id.to_string()))?;
        record.stats = stats;
        self.persist(&next)?;
        *map = next;
        Ok(())
    }

    /// Advance the last-synced marker. Called after every completed
    /// fetch attempt, including ones that returned no rows.
    pub fn touch_synced(&self, site_id: &str, when: DateTime<Utc>) -> Result<(), StorageError> {
        let mut map = self.inner.write().expect("catalog lock poisoned");
        let mut next = map.clone();
        let record = next
            .get_mut(site_id)
            .ok_or_else(|| StorageError::UnknownSite(site_id.to_string()))?;
        record.last_synced = Some(when);
        self.persist(&next)?;
        *map = next;
        Ok(())
    }

    fn persist(&self, map: &BTreeMap<String, SiteRecord>) -> Result<(), StorageError> {
        let records: Vec<&SiteRecord> = map.values().collect();
        write_json_atomic(&self.path, &records)
    }
}

fn screen_record(record: &SiteRecord) -> Result<(), FieldError> {
    validate::check_site_id(&record.site_id)?;
    validate::check_name(&record.name)?;
    validate::check_coordinates(record.latitude, record.longitude)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn site(id: &str, lat: f64, lon: f64) -> SiteRecord {
        SiteRecord {
            site_id: id.to_string(),
            name: format!("station {id}"),
            latitude: lat,
            longitude: lon,
            area: None,
            active: true,
            last_synced: None,
            stats: None,
            provider_misc: None,
        }
    }

    #[test]
    fn valid_records_commit_even_when_siblings_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let catalog = SiteCatalog::open(dir.path()).expect("open");

        let outcome = catalog
            .upsert_sites(vec![
                site("USGS-1", 38.9, -90.4),
                site("USGS-2", 0.0, 0.0), // missing-coordinate sentinel
                site("USGS-3", 41.2, -88.7),
            ])
            .expect("upsert");

        assert_eq!(outcome.stored, 2);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].site_id, "USGS-2");
        assert_eq!(outcome.rejected[0].error.field, "coordinates");
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("USGS-2").is_none());
    }

    #[test]
    fn upsert_replaces_by_id() {
        let dir = tempdir().expect("tempdir");
        let catalog = SiteCatalog::open(dir.path()).expect("open");

        catalog
            .upsert_sites(vec![site("USGS-1", 38.9, -90.4)])
            .expect("first");
        let mut renamed = site("USGS-1", 38.9, -90.4);
        renamed.name = "renamed".to_string();
        catalog.upsert_sites(vec![renamed]).expect("second");

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("USGS-1").unwrap().name, "renamed");
    }

    #[test]
    fn nonsensical_area_is_cleared_on_the_way_in() {
        let dir = tempdir().expect("tempdir");
        let catalog = SiteCatalog::open(dir.path()).expect("open");

        let mut record = site("USGS-1", 38.9, -90.4);
        record.area = Some(-12.0);
        catalog.upsert_sites(vec![record]).expect("upsert");
        assert_eq!(catalog.get("USGS-1").unwrap().area, None);
    }

    #[test]
    fn blank_site_ids_are_rejected_with_the_right_field() {
        let dir = tempdir().expect("tempdir");
        let catalog = SiteCatalog::open(dir.path()).expect("open");

        let outcome = catalog
            .upsert_sites(vec![site("   ", 38.9, -90.4)])
            .expect("upsert");
        assert_eq!(outcome.stored, 0);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].error.field, "site_id");
    }

    #[test]
    fn a_failed_write_keeps_the_previous_catalog_visible() {
        let dir = tempdir().expect("tempdir");
        let catalog = SiteCatalog::open(dir.path()).expect("open");
        catalog
            .upsert_sites(vec![site("USGS-1", 38.9, -90.4)])
            .expect("seed");

        // Occupy the temp path with a non-empty directory so every
        // following write fails before the rename.
        let temp = dir.path().join(".sites.json.tmp");
        std::fs::create_dir(&temp).expect("block temp path");
        std::fs::write(temp.join("occupied"), b"x").expect("fill");

        assert!(catalog
            .upsert_sites(vec![site("USGS-2", 41.2, -88.7)])
            .is_err());
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("USGS-2").is_none());

        assert!(catalog.touch_synced("USGS-1", Utc::now()).is_err());
        assert!(catalog.get("USGS-1").unwrap().last_synced.is_none());
    }

    #[test]
    fn catalog_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        {
            let catalog = SiteCatalog::open(dir.path()).expect("open");
            catalog
                .upsert_sites(vec![site("USGS-1", 38.9, -90.4)])
                .expect("upsert");
            catalog
                .touch_synced("USGS-1", Utc::now())
                .expect("touch");
        }
        let reopened = SiteCatalog::open(dir.path()).expect("reopen");
        assert_eq!(reopened.len(), 1);
        assert!(reopened.get("USGS-1").unwrap().last_synced.is_some());
    }

    #[test]
    fn stats_and_touch_require_a_known_site() {
        let dir = tempdir().expect("tempdir");
        let catalog = SiteCatalog::open(dir.path()).expect("open");
        assert!(matches!(
            catalog.update_stats("USGS-404", None),
            Err(StorageError::UnknownSite(_))
        ));
        assert!(matches!(
            catalog.touch_synced("USGS-404", Utc::now()),
            Err(StorageError::UnknownSite(_))
        ));
    }

    #[test]
    fn filtered_reads_are_ordered_and_skip_unknown_ids() {
        let dir = tempdir().expect("tempdir");
        let catalog = SiteCatalog::open(dir.path()).expect("open");
        catalog
            .upsert_sites(vec![site("USGS-2", 40.0, -89.0), site("USGS-1", 38.9, -90.4)])
            .expect("upsert");

        let got = catalog.sites(Some(&[
            "USGS-2".to_string(),
            "USGS-404".to_string(),
            "USGS-1".to_string(),
        ]));
        let ids: Vec<&str> = got.iter().map(|r| r.site_id.as_str()).collect();
        assert_eq!(ids, vec!["USGS-1", "USGS-2"]);
    }
}
