//! Batch screening between adapters and the store.
//!
//! Raw rows from a source pass through here exactly once: site rows
//! become prefixed catalog records, observation rows get their quality
//! flag mapped and their value checked. Rejections never abort the
//! batch; valid siblings continue.

use tracing::{debug, warn};

use flowline_adapters::SourceAdapter;
use flowline_core::validate::{check_coordinates, check_name, check_raw_id, check_value, sanitize_area};
use flowline_core::{global_site_id, Observation, RawObservation, RawSite, SiteRecord};
use flowline_storage::SiteRejection;

/// Per-batch observation screening tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub valid: usize,
    /// Rows rejected by validation (negative or non-finite values).
    pub invalid: usize,
    /// Zero-flow rows dropped before validation. These are overwhelming
    /// in some networks and carry no signal for this store.
    pub dropped_nonpositive: usize,
}

/// Screen one source's raw site listing into catalog records.
pub fn screen_sites(source: &str, raw_sites: Vec<RawSite>) -> (Vec<SiteRecord>, Vec<SiteRejection>) {
    let mut records = Vec::with_capacity(raw_sites.len());
    let mut rejections = Vec::new();

    for raw in raw_sites {
        let raw_id = raw.raw_id.trim();
        let site_id = global_site_id(source, raw_id);

        let screened = check_raw_id(raw_id)
            .and_then(|()| check_name(&raw.name))
            .and_then(|()| check_coordinates(raw.latitude, raw.longitude));
        if let Err(error) = screened {
            warn!(
                source,
                site_id = %site_id,
                field = error.field,
                value = %error.value,
                reason = error.reason,
                "rejecting site from listing",
            );
            rejections.push(SiteRejection { site_id, error });
            continue;
        }

        records.push(SiteRecord {
            site_id,
            name: raw.name.trim().to_string(),
            latitude: raw.latitude,
            longitude: raw.longitude,
            area: sanitize_area(raw.area),
            active: raw.active.unwrap_or(false),
            last_synced: None,
            stats: None,
            provider_misc: raw.aux,
        });
    }

    (records, rejections)
}

/// Screen one site's raw observation batch.
///
/// Zero-valued rows are dropped silently (counted, not logged row by
/// row); negative or non-finite values are logged and counted as
/// invalid. The adapter translates its raw flag vocabulary.
pub fn screen_observations(
    site_id: &str,
    raw_rows: Vec<RawObservation>,
    adapter: &dyn SourceAdapter,
) -> (Vec<Observation>, BatchCounts) {
    let mut observations = Vec::with_capacity(raw_rows.len());
    let mut counts = BatchCounts::default();

    for raw in raw_rows {
        if raw.value == 0.0 {
            counts.dropped_nonpositive += 1;
            continue;
        }
        if let Err(error) = check_value(raw.value) {
            warn!(
                site_id,
                date = %raw.date,
                value = %error.value,
                reason = error.reason,
                "rejecting observation",
            );
            counts.invalid += 1;
            continue;
        }
        observations.push(Observation {
            site_id: site_id.to_string(),
            date: raw.date,
            value: raw.value,
            quality: adapter.map_quality(raw.raw_flag.as_deref()),
        });
        counts.valid += 1;
    }

    if counts.invalid > 0 || counts.dropped_nonpositive > 0 {
        debug!(
            site_id,
            valid = counts.valid,
            invalid = counts.invalid,
            dropped = counts.dropped_nonpositive,
            "observation screening",
        );
    }
    (observations, counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_adapters::{FixtureAdapter, FixtureBundle};
    use flowline_core::QualityFlag;
    use serde_json::json;

    fn adapter() -> FixtureAdapter {
        let bundle: FixtureBundle = serde_json::from_value(json!({
            "source_id": "usgs",
            "quality_map": { "A": "good", "P": "provisional" }
        }))
        .expect("bundle");
        FixtureAdapter::new(bundle)
    }

    fn raw_obs(date: &str, value: f64, flag: Option<&str>) -> RawObservation {
        RawObservation {
            date: date.parse().expect("date"),
            value,
            raw_flag: flag.map(str::to_string),
        }
    }

    #[test]
    fn sites_are_prefixed_and_screened() {
        let (records, rejections) = screen_sites(
            "usgs",
            vec![
                RawSite {
                    raw_id: "05587450".to_string(),
                    name: "Mississippi River at Grafton, IL".to_string(),
                    latitude: 38.96,
                    longitude: -90.43,
                    area: Some(-1.0),
                    active: Some(true),
                    aux: Some(json!({"huc": "07"})),
                },
                RawSite {
                    raw_id: "0".to_string(),
                    name: "broken".to_string(),
                    latitude: 0.0,
                    longitude: 0.0,
                    area: None,
                    active: None,
                    aux: None,
                },
            ],
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].site_id, "USGS-05587450");
        assert_eq!(records[0].area, None);
        assert!(records[0].active);
        assert!(records[0].provider_misc.is_some());

        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].site_id, "USGS-0");
        assert_eq!(rejections[0].error.field, "coordinates");
    }

    #[test]
    fn missing_activity_flag_defaults_to_inactive() {
        let (records, _) = screen_sites(
            "usgs",
            vec![RawSite {
                raw_id: "1".to_string(),
                name: "station".to_string(),
                latitude: 40.0,
                longitude: -89.0,
                area: None,
                active: None,
                aux: None,
            }],
        );
        assert!(!records[0].active);
    }

    #[test]
    fn negative_values_are_invalid_and_zero_values_are_dropped() {
        let adapter = adapter();
        let (observations, counts) = screen_observations(
            "USGS-1",
            vec![
                raw_obs("2024-01-01", 5.0, Some("A")),
                raw_obs("2024-01-02", -3.0, Some("A")),
                raw_obs("2024-01-03", 0.0, Some("A")),
                raw_obs("2024-01-04", f64::NAN, None),
            ],
            &adapter,
        );

        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].value, 5.0);
        assert_eq!(
            counts,
            BatchCounts {
                valid: 1,
                invalid: 2,
                dropped_nonpositive: 1,
            }
        );
    }

    #[test]
    fn quality_flags_are_mapped_through_the_adapter() {
        let adapter = adapter();
        let (observations, _) = screen_observations(
            "USGS-1",
            vec![
                raw_obs("2024-01-01", 5.0, Some("P")),
                raw_obs("2024-01-02", 6.0, Some("???")),
                raw_obs("2024-01-03", 7.0, None),
            ],
            &adapter,
        );

        let flags: Vec<QualityFlag> = observations.iter().map(|o| o.quality).collect();
        assert_eq!(
            flags,
            vec![
                QualityFlag::Provisional,
                QualityFlag::Unknown,
                QualityFlag::Unknown,
            ]
        );
    }
}
