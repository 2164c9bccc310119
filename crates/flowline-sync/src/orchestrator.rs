//! The sync engine: plans per-source work, runs site pipelines under a
//! global worker cap, and bounds in-flight upstream calls per source.
//!
//! Concurrency is two-level. A global semaphore caps how many sites are
//! being processed at once across every source. Inside a site's
//! pipeline, a per-source gate is held only across the adapter's
//! upstream call; validation and storage run after the slot is
//! released, so a slow store never starves a source's fetch budget.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use flowline_adapters::{HttpClientConfig, HttpFetcher, SourceAdapter};
use flowline_core::{split_site_id, Observation, SiteRecord};
use flowline_storage::{SourceStore, StorageError};

use crate::config::SyncConfig;
use crate::planner::plan_fetches;
use crate::report::{FailedSite, RunSummary, SourceReport};
use crate::validate::{screen_observations, screen_sites, BatchCounts};
use crate::SyncError;

struct SourceHandle {
    adapter: Arc<dyn SourceAdapter>,
    store: Arc<SourceStore>,
    /// Bounds in-flight upstream calls for this source.
    gate: Arc<Semaphore>,
}

/// Outcome of one site's fetch-validate-store pipeline.
enum SiteOutcome {
    Synced { counts: BatchCounts },
    NoData { counts: BatchCounts },
    Cancelled,
    Failed { reason: String },
}

pub struct SyncEngine {
    config: SyncConfig,
    http: Arc<HttpFetcher>,
    sources: BTreeMap<String, SourceHandle>,
    shutdown: Arc<AtomicBool>,
}

impl SyncEngine {
    /// Open (or create) the per-source stores and wire one handle per
    /// registered adapter.
    pub fn new(
        config: SyncConfig,
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> Result<Self, SyncError> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..HttpClientConfig::default()
        })
        .map_err(SyncError::Http)?;

        let mut sources = BTreeMap::new();
        for adapter in adapters {
            let source = adapter.source_id().to_string();
            let store = Arc::new(SourceStore::open(&config.data_dir, &source)?);
            let gate = Arc::new(Semaphore::new(config.per_source_fetch_limit.max(1)));
            sources.insert(
                source,
                SourceHandle {
                    adapter,
                    store,
                    gate,
                },
            );
        }

        Ok(Self {
            config,
            http: Arc::new(http),
            sources,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    /// Flag handed to signal handlers. Once set, queued site pipelines
    /// finish immediately as cancelled; in-flight ones run to
    /// completion so the store stays consistent.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Full run: refresh site catalogs, then sync observations.
    pub async fn sync_all(&self, sites: Option<&[String]>) -> Result<RunSummary, SyncError> {
        let catalog_run = self.sync_site_catalogs().await?;
        let mut run = self.sync_observations(sites).await?;
        run.absorb(catalog_run);
        Ok(run)
    }

    /// Refresh each source's site catalog from its listing endpoint.
    ///
    /// Sources with a stored catalog are left alone unless `force` is
    /// set; listing endpoints are expensive and site populations change
    /// slowly.
    pub async fn sync_site_catalogs(&self) -> Result<RunSummary, SyncError> {
        let mut run = RunSummary::begin();
        info!(run_id = %run.run_id, sources = self.sources.len(), "site catalog sync");

        for (source, handle) in &self.sources {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            let mut report = SourceReport::default();

            let credential = self.config.credential_for(source);
            if handle.adapter.requires_credentials() && credential.is_none() {
                warn!(source, "skipping source: credential required but not configured");
                report.skipped_missing_credential = true;
                run.sources.insert(source.clone(), report);
                continue;
            }

            if !self.config.force && !handle.store.catalog.is_empty() {
                debug!(source, "site catalog already stored; not re-listing");
                run.sources.insert(source.clone(), report);
                continue;
            }

            info!(source, "listing sites");
            let listing = {
                let _slot = handle.gate.acquire().await.expect("source gate not closed");
                handle.adapter.list_sites(&self.http, credential).await
            };

            match listing {
                Ok(raw_sites) => {
                    if let Err(err) = commit_listing(source, handle, raw_sites, &mut report) {
                        error!(source, error = %err, "storing site listing failed");
                        report.listing_error = Some(err.to_string());
                    }
                }
                Err(err) => {
                    warn!(source, error = %err, "site listing failed");
                    report.listing_error = Some(err.to_string());
                }
            }

            run.sources.insert(source.clone(), report);
        }

        Ok(run.finish())
    }

    /// Sync observations for every due site, or for an explicit set of
    /// global site ids.
    ///
    /// An id naming an unregistered source is an error; an id missing
    /// from a registered source's catalog is skipped silently by the
    /// planner. A source with no stored catalog at all is recorded as a
    /// failed precondition and its siblings keep running.
    pub async fn sync_observations(
        &self,
        sites: Option<&[String]>,
    ) -> Result<RunSummary, SyncError> {
        let mut run = RunSummary::begin();

        let mut requested_by_source: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(ids) = sites {
            for id in ids {
                let (source, _) = split_site_id(id)?;
                if !self.sources.contains_key(&source) {
                    return Err(SyncError::UnknownSource(source));
                }
                requested_by_source.entry(source).or_default().push(id.clone());
            }
        }

        let today = Utc::now().date_naive();
        let workers = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks: JoinSet<(String, String, SiteOutcome)> = JoinSet::new();

        info!(
            run_id = %run.run_id,
            workers = self.config.workers,
            tolerance_days = self.config.tolerance_days,
            force = self.config.force,
            "observation sync",
        );

        for (source, handle) in &self.sources {
            let mut report = SourceReport::default();

            let requested = if sites.is_some() {
                match requested_by_source.get(source) {
                    Some(ids) => Some(ids.clone()),
                    None => {
                        run.sources.insert(source.clone(), report);
                        continue;
                    }
                }
            } else {
                None
            };

            let credential = self.config.credential_for(source).map(str::to_string);
            if handle.adapter.requires_credentials() && credential.is_none() {
                warn!(source, "skipping source: credential required but not configured");
                report.skipped_missing_credential = true;
                run.sources.insert(source.clone(), report);
                continue;
            }

            if handle.store.catalog.is_empty() {
                let message =
                    format!("no site listing stored for source '{source}'; list sites first");
                error!(source, "{message}");
                report.precondition = Some(message);
                run.sources.insert(source.clone(), report);
                continue;
            }

            let catalog = handle.store.catalog.sites(None);
            let plan = plan_fetches(
                &catalog,
                requested.as_deref(),
                self.config.tolerance_days,
                self.config.force,
                today,
            );

            let known: usize = match &requested {
                Some(ids) => {
                    let stored: BTreeSet<&str> =
                        catalog.iter().map(|r| r.site_id.as_str()).collect();
                    ids.iter()
                        .collect::<BTreeSet<_>>()
                        .iter()
                        .filter(|id| stored.contains(id.as_str()))
                        .count()
                }
                None => catalog.len(),
            };
            report.skipped_fresh = known.saturating_sub(plan.len());
            debug!(source, due = plan.len(), fresh = report.skipped_fresh, "fetch plan");

            let aux_by_id: BTreeMap<String, Option<JsonValue>> = catalog
                .into_iter()
                .map(|r| (r.site_id, r.provider_misc))
                .collect();

            for (site_id, since) in plan {
                let adapter = Arc::clone(&handle.adapter);
                let store = Arc::clone(&handle.store);
                let gate = Arc::clone(&handle.gate);
                let workers = Arc::clone(&workers);
                let http = Arc::clone(&self.http);
                let shutdown = Arc::clone(&self.shutdown);
                let credential = credential.clone();
                let aux = aux_by_id.get(&site_id).cloned().flatten();
                let source = source.clone();

                tasks.spawn(async move {
                    let _worker = workers.acquire_owned().await.expect("worker pool not closed");
                    if shutdown.load(Ordering::Relaxed) {
                        return (source, site_id, SiteOutcome::Cancelled);
                    }
                    let outcome = sync_one_site(
                        adapter,
                        store,
                        gate,
                        http,
                        &site_id,
                        since,
                        credential.as_deref(),
                        aux,
                    )
                    .await;
                    (source, site_id, outcome)
                });
            }

            run.sources.insert(source.clone(), report);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((source, site_id, outcome)) => {
                    let report = run.sources.entry(source).or_default();
                    match outcome {
                        SiteOutcome::Synced { counts } => {
                            report.synced += 1;
                            report.invalid_rows += counts.invalid;
                            report.dropped_rows += counts.dropped_nonpositive;
                        }
                        SiteOutcome::NoData { counts } => {
                            report.no_data += 1;
                            report.invalid_rows += counts.invalid;
                            report.dropped_rows += counts.dropped_nonpositive;
                        }
                        SiteOutcome::Cancelled => report.cancelled += 1,
                        SiteOutcome::Failed { reason } => {
                            report.failed.push(FailedSite { site_id, reason });
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "site pipeline task panicked");
                }
            }
        }

        Ok(run.finish())
    }

    /// Catalog read across sources, ordered by site id within each
    /// source. `None` reads every registered source.
    pub fn sites(&self, sources: Option<&[String]>) -> Result<Vec<SiteRecord>, SyncError> {
        let mut records = Vec::new();
        match sources {
            None => {
                for handle in self.sources.values() {
                    records.extend(handle.store.catalog.sites(None));
                }
            }
            Some(names) => {
                for name in names {
                    let handle = self
                        .sources
                        .get(&name.to_ascii_lowercase())
                        .ok_or_else(|| SyncError::UnknownSource(name.clone()))?;
                    records.extend(handle.store.catalog.sites(None));
                }
            }
        }
        Ok(records)
    }

    /// Sites the source itself reports as active.
    pub fn active_sites(&self) -> Vec<SiteRecord> {
        self.sources
            .values()
            .flat_map(|handle| handle.store.catalog.sites(None))
            .filter(|record| record.active)
            .collect()
    }

    /// Sites whose newest stored observation is at most `days` old.
    /// Distinct from [`Self::active_sites`]: that is the source's
    /// claim, this is what the store actually holds.
    pub fn sites_with_recent_data(&self, days: i64) -> Vec<SiteRecord> {
        let cutoff = Utc::now().date_naive() - chrono::Duration::days(days);
        self.sources
            .values()
            .flat_map(|handle| handle.store.catalog.sites(None))
            .filter(|record| {
                record
                    .stats
                    .is_some_and(|stats| stats.max_date >= cutoff)
            })
            .collect()
    }

    /// Observation read across sources, ordered by (site, date).
    pub fn observations(
        &self,
        site_ids: Option<&[String]>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Observation>, SyncError> {
        let mut rows = Vec::new();
        match site_ids {
            None => {
                for handle in self.sources.values() {
                    rows.extend(handle.store.series.query(None, start, end));
                }
            }
            Some(ids) => {
                let mut ids_by_source: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for id in ids {
                    let (source, _) = split_site_id(id)?;
                    if !self.sources.contains_key(&source) {
                        return Err(SyncError::UnknownSource(source));
                    }
                    ids_by_source.entry(source).or_default().push(id.clone());
                }
                for (source, ids) in ids_by_source {
                    let handle = &self.sources[&source];
                    rows.extend(handle.store.series.query(Some(&ids), start, end));
                }
            }
        }
        Ok(rows)
    }

    /// Days since each source's most recent site sync. `None` means the
    /// source has never synced anything.
    pub fn freshness(&self) -> BTreeMap<String, Option<i64>> {
        let now = Utc::now();
        self.sources
            .iter()
            .map(|(source, handle)| {
                let newest = handle
                    .store
                    .catalog
                    .sites(None)
                    .into_iter()
                    .filter_map(|record| record.last_synced)
                    .max();
                let age = newest.map(|when| (now - when).num_days());
                (source.clone(), age)
            })
            .collect()
    }
}

fn commit_listing(
    source: &str,
    handle: &SourceHandle,
    raw_sites: Vec<flowline_core::RawSite>,
    report: &mut SourceReport,
) -> Result<(), StorageError> {
    let (records, rejections) = screen_sites(source, raw_sites);
    let site_ids: Vec<String> = records.iter().map(|r| r.site_id.clone()).collect();

    let outcome = handle.store.catalog.upsert_sites(records)?;
    report.listed = outcome.stored;
    report.rejected_sites = rejections.len() + outcome.rejected.len();

    // A re-listing may replace records for sites that already hold
    // observations; refresh their derived stats.
    for site_id in site_ids {
        if let Some(stats) = handle.store.series.recompute_stats(&site_id) {
            handle.store.catalog.update_stats(&site_id, Some(stats))?;
        }
    }

    info!(
        source,
        stored = report.listed,
        rejected = report.rejected_sites,
        "site listing stored",
    );
    Ok(())
}

/// One site's pipeline: fetch (under the source gate), screen, store,
/// refresh stats, and advance the sync marker.
#[allow(clippy::too_many_arguments)]
async fn sync_one_site(
    adapter: Arc<dyn SourceAdapter>,
    store: Arc<SourceStore>,
    gate: Arc<Semaphore>,
    http: Arc<HttpFetcher>,
    site_id: &str,
    since: NaiveDate,
    credential: Option<&str>,
    aux: Option<JsonValue>,
) -> SiteOutcome {
    let raw_id = match split_site_id(site_id) {
        Ok((_, raw_id)) => raw_id,
        Err(err) => {
            return SiteOutcome::Failed {
                reason: err.to_string(),
            }
        }
    };

    // Hold the source gate only across the upstream call; local work
    // below never occupies a fetch slot.
    let fetched = {
        let _slot = gate.acquire().await.expect("source gate not closed");
        adapter
            .fetch_observations(&http, raw_id, since, credential, aux.as_ref())
            .await
    };

    let raw_rows = match fetched {
        Ok(rows) => rows,
        Err(err) => {
            warn!(
                site_id,
                source = adapter.source_id(),
                error = %err,
                "fetch failed; site stays due for the next run",
            );
            return SiteOutcome::Failed {
                reason: err.to_string(),
            };
        }
    };

    let (observations, counts) = screen_observations(site_id, raw_rows, adapter.as_ref());

    match commit_observations(&store, site_id, &observations) {
        Ok(true) => SiteOutcome::Synced { counts },
        Ok(false) => SiteOutcome::NoData { counts },
        Err(err) => {
            error!(site_id, error = %err, "storing observations failed");
            SiteOutcome::Failed {
                reason: err.to_string(),
            }
        }
    }
}

/// Store screened rows and refresh derived state. The sync marker
/// advances even when nothing was stored: the fetch completed, the site
/// is fresh.
fn commit_observations(
    store: &SourceStore,
    site_id: &str,
    observations: &[Observation],
) -> Result<bool, StorageError> {
    if observations.is_empty() {
        store.catalog.touch_synced(site_id, Utc::now())?;
        return Ok(false);
    }

    store.series.upsert(observations)?;
    let stats = store.series.recompute_stats(site_id);
    store.catalog.update_stats(site_id, stats)?;
    store.catalog.touch_synced(site_id, Utc::now())?;
    Ok(true)
}
