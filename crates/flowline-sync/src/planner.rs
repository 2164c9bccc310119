//! Staleness planning: decide which sites to fetch and from what date.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use flowline_core::{epoch_start, SiteRecord};

/// Map of site id to the fetch start date, for every site that is due.
///
/// Rules, per site:
/// - `force` fetches from the epoch regardless of state;
/// - a site never synced fetches from the epoch;
/// - a site last synced strictly more than `tolerance_days` ago fetches
///   from its last-synced date (a small overlap, resolved by the keyed
///   upsert);
/// - a site synced within tolerance (boundary included) is omitted;
/// - a requested id absent from the catalog is omitted silently; it is
///   the caller's job to decide whether that is an error.
pub fn plan_fetches(
    catalog: &[SiteRecord],
    requested: Option<&[String]>,
    tolerance_days: i64,
    force: bool,
    today: NaiveDate,
) -> BTreeMap<String, NaiveDate> {
    let by_id: BTreeMap<&str, &SiteRecord> = catalog
        .iter()
        .map(|record| (record.site_id.as_str(), record))
        .collect();

    let candidates: Vec<&str> = match requested {
        Some(ids) => ids.iter().map(String::as_str).collect(),
        None => by_id.keys().copied().collect(),
    };

    let mut plan = BTreeMap::new();
    for id in candidates {
        let Some(record) = by_id.get(id) else {
            continue;
        };

        if force {
            plan.insert(id.to_string(), epoch_start());
            continue;
        }

        match record.last_synced {
            None => {
                plan.insert(id.to_string(), epoch_start());
            }
            Some(last_synced) => {
                let days_stale = (today - last_synced.date_naive()).num_days();
                if days_stale > tolerance_days {
                    plan.insert(id.to_string(), last_synced.date_naive());
                }
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn site(id: &str, last_synced: Option<DateTime<Utc>>) -> SiteRecord {
        SiteRecord {
            site_id: id.to_string(),
            name: format!("station {id}"),
            latitude: 40.0,
            longitude: -89.0,
            area: None,
            active: true,
            last_synced,
            stats: None,
            provider_misc: None,
        }
    }

    fn utc(date: &str) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &date
                .parse::<NaiveDate>()
                .expect("date")
                .and_hms_opt(6, 30, 0)
                .expect("time"),
        )
    }

    fn today() -> NaiveDate {
        "2024-03-10".parse().expect("date")
    }

    #[test]
    fn never_synced_sites_fetch_from_the_epoch() {
        let catalog = vec![site("USGS-1", None)];
        let plan = plan_fetches(&catalog, None, 1, false, today());
        assert_eq!(plan.get("USGS-1"), Some(&epoch_start()));
    }

    #[test]
    fn staleness_boundary_is_strict() {
        // Exactly at tolerance is fresh; one day past is due.
        let catalog = vec![
            site("USGS-1", Some(utc("2024-03-08"))), // 2 days stale
            site("USGS-2", Some(utc("2024-03-09"))), // 1 day stale
            site("USGS-3", Some(utc("2024-03-10"))), // synced today
        ];
        let plan = plan_fetches(&catalog, None, 1, false, today());

        assert_eq!(
            plan.get("USGS-1").map(ToString::to_string),
            Some("2024-03-08".to_string())
        );
        assert!(!plan.contains_key("USGS-2"));
        assert!(!plan.contains_key("USGS-3"));
    }

    #[test]
    fn force_refetches_everything_from_the_epoch() {
        let catalog = vec![
            site("USGS-1", Some(utc("2024-03-10"))),
            site("USGS-2", None),
        ];
        let plan = plan_fetches(&catalog, None, 1, true, today());
        assert_eq!(plan.len(), 2);
        assert!(plan.values().all(|since| *since == epoch_start()));
    }

    #[test]
    fn requested_ids_narrow_the_plan_and_unknown_ids_are_skipped() {
        let catalog = vec![site("USGS-1", None), site("USGS-2", None)];
        let requested = vec!["USGS-2".to_string(), "USGS-404".to_string()];
        let plan = plan_fetches(&catalog, Some(&requested), 1, false, today());

        assert_eq!(plan.len(), 1);
        assert!(plan.contains_key("USGS-2"));
    }

    #[test]
    fn a_fully_fresh_catalog_yields_an_empty_plan() {
        let catalog = vec![site("USGS-1", Some(utc("2024-03-10")))];
        let plan = plan_fetches(&catalog, None, 1, false, today());
        assert!(plan.is_empty());
    }
}
