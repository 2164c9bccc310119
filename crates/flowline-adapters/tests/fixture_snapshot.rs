//! Contract checks for the fixture-backed adapter.

use flowline_adapters::{load_fixture_adapters, FixtureAdapter, HttpClientConfig, HttpFetcher, SourceAdapter};
use flowline_core::QualityFlag;

const BUNDLE: &str = r#"{
  "source_id": "usgs",
  "quality_map": { "A": "good", "P": "provisional", "Ice": "bad" },
  "sites": [
    {
      "raw_id": "05587450",
      "name": "Mississippi River at Grafton, IL",
      "latitude": 38.96,
      "longitude": -90.43,
      "area": 444183.0,
      "active": true,
      "aux": { "huc": "07" }
    }
  ],
  "observations": {
    "05587450": [
      { "date": "2024-01-01", "value": 5.0, "raw_flag": "A" },
      { "date": "2024-01-02", "value": 6.0, "raw_flag": "P" },
      { "date": "2024-01-03", "value": 7.0, "raw_flag": "???" }
    ]
  }
}"#;

fn adapter() -> FixtureAdapter {
    FixtureAdapter::new(serde_json::from_str(BUNDLE).expect("bundle parses"))
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(HttpClientConfig::default()).expect("fetcher")
}

#[tokio::test]
async fn listing_exposes_raw_sites_with_aux_payload() {
    let adapter = adapter();
    let sites = adapter.list_sites(&fetcher(), None).await.expect("listing");
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].raw_id, "05587450");
    assert_eq!(sites[0].aux.as_ref().unwrap()["huc"], "07");
}

#[tokio::test]
async fn fetch_honors_the_since_date() {
    let adapter = adapter();
    let rows = adapter
        .fetch_observations(
            &fetcher(),
            "05587450",
            "2024-01-02".parse().unwrap(),
            None,
            None,
        )
        .await
        .expect("fetch");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].date.to_string(), "2024-01-02");
}

#[tokio::test]
async fn unknown_sites_yield_no_rows() {
    let adapter = adapter();
    let rows = adapter
        .fetch_observations(
            &fetcher(),
            "no-such-site",
            "2024-01-01".parse().unwrap(),
            None,
            None,
        )
        .await
        .expect("fetch");
    assert!(rows.is_empty());
}

#[test]
fn quality_mapping_defaults_to_unknown() {
    let adapter = adapter();
    assert_eq!(adapter.map_quality(Some("A")), QualityFlag::Good);
    assert_eq!(adapter.map_quality(Some("P")), QualityFlag::Provisional);
    assert_eq!(adapter.map_quality(Some("Ice")), QualityFlag::Bad);
    assert_eq!(adapter.map_quality(Some("???")), QualityFlag::Unknown);
    assert_eq!(adapter.map_quality(None), QualityFlag::Unknown);
}

#[test]
fn bundles_load_from_a_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("usgs.json"), BUNDLE).expect("write bundle");
    std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write noise");

    let adapters = load_fixture_adapters(dir.path()).expect("load");
    assert_eq!(adapters.len(), 1);
    assert_eq!(adapters[0].source_id(), "usgs");
}
