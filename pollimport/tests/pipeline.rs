//! Tests de bout en bout du pipeline sur le store en mémoire
//!
//! Chaque test crée une racine de données temporaire contenant un répertoire
//! `<jurisdiction_id>-<date>` avec ses fichiers sources.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use pollimport::geocode::Geocoder;
use pollimport::locate::DataRoots;
use pollimport::model::{CanonicalStation, Location};
use pollimport::pipeline::PostImportHook;
use pollimport::reconcile::{AddressBase, OverlapOutcome};
use pollimport::report::{JsonFileReporter, QualityReporter, RunReport};
use pollimport::translate::{StationDraft, Translation, Translators};
use pollimport::{
    JurisdictionConfig, MemoryStore, Pipeline, PipelineError, RunStatus, Stage, Store,
};
use pollsource::RawRecord;

fn data_dir(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config(json: &str) -> JurisdictionConfig {
    JurisdictionConfig::from_json(json).unwrap()
}

const STATIONS_CSV: &str = "\
Internal ID, Address, Post Code
PS1,Village Hall,\" ab1  2cd \"
PS2,Church Rooms,AB1 2CE
PS3,Scout Hut,ab12cf
";

const STATIONS_CONFIG: &str = r#"{
    "jurisdiction_id": "E07000223",
    "stations": {
        "format": "csv",
        "name": "stations.csv",
        "mapping": {"id": "Internal ID", "address": ["Address"], "postcode": "Post Code"}
    }
}"#;

#[tokio::test]
async fn test_three_row_delimited_source() {
    let root = tempfile::tempdir().unwrap();
    let dir = data_dir(root.path(), "E07000223-2021-05-06");
    std::fs::write(dir.join("stations.csv"), STATIONS_CSV).unwrap();

    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::builder(config(STATIONS_CONFIG))
        .store(store.clone())
        .roots(DataRoots::new(root.path()))
        .build()
        .unwrap();

    let report = pipeline.run().await.unwrap();
    assert_eq!(report.stage, Stage::Done);
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.counts(), (3, 0, 0));

    let stations = store.stations("E07000223").await.unwrap();
    assert_eq!(stations.len(), 3);
    let ids: Vec<&str> = stations.iter().map(|s| s.internal_id.as_str()).collect();
    assert_eq!(ids, vec!["PS1", "PS2", "PS3"]);
    assert_eq!(stations[0].postcode, "AB12CD");
    assert_eq!(stations[2].postcode, "AB12CF");
    assert!(stations.iter().all(|s| s.jurisdiction_id == "E07000223"));
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let dir = data_dir(root.path(), "E07000223-2021-05-06");
    std::fs::write(dir.join("stations.csv"), STATIONS_CSV).unwrap();

    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::builder(config(STATIONS_CONFIG))
        .store(store.clone())
        .roots(DataRoots::new(root.path()))
        .build()
        .unwrap();

    pipeline.run().await.unwrap();
    let first = store.digest("E07000223").unwrap();

    let report = pipeline.run().await.unwrap();
    let second = store.digest("E07000223").unwrap();

    assert_eq!(first, second);
    // Teardown précède chaque import: tout est réinséré
    assert_eq!(report.stats(pollimport::model::Entity::Station).inserted, 3);
}

#[tokio::test]
async fn test_skip_does_not_affect_siblings() {
    let root = tempfile::tempdir().unwrap();
    let dir = data_dir(root.path(), "X-2021");
    std::fs::write(dir.join("stations.csv"), STATIONS_CSV).unwrap();

    let translators = Translators::new().with_station(
        |raw: &RawRecord| -> Result<Translation<StationDraft>, PipelineError> {
            if raw.text("internal_id") == "PS2" {
                return Ok(Translation::Skip);
            }
            Ok(Translation::Record(StationDraft {
                internal_id: raw.text("internal_id").to_string(),
                address: raw.text("address").to_string(),
                postcode: raw.text("post_code").to_string(),
                ..Default::default()
            }))
        },
    );

    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::builder(config(
        r#"{"jurisdiction_id": "X", "stations": {"format": "csv", "name": "stations.csv"}}"#,
    ))
    .translators(translators)
    .store(store.clone())
    .roots(DataRoots::new(root.path()))
    .build()
    .unwrap();

    let report = pipeline.run().await.unwrap();
    let stats = report.stats(pollimport::model::Entity::Station);
    assert_eq!(stats.read, 3);
    assert_eq!(stats.skipped, 1);

    let ids: Vec<String> = store
        .stations("X")
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.internal_id)
        .collect();
    assert_eq!(ids, vec!["PS1".to_string(), "PS3".to_string()]);
}

#[tokio::test]
async fn test_override_skip_rule() {
    let root = tempfile::tempdir().unwrap();
    let dir = data_dir(root.path(), "X-2021");
    std::fs::write(dir.join("stations.csv"), STATIONS_CSV).unwrap();

    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::builder(config(
        r#"{"jurisdiction_id": "X", "stations": {
            "format": "csv", "name": "stations.csv",
            "mapping": {"id": "Internal ID", "address": ["Address"], "postcode": "Post Code"},
            "overrides": {
                "key_field": "Internal ID",
                "patches": {"PS1": {"Address": "Village Hall Annexe"}},
                "skip": [{"field": "Internal ID", "values": ["PS3"]}]
            }
        }}"#,
    ))
    .store(store.clone())
    .roots(DataRoots::new(root.path()))
    .build()
    .unwrap();

    pipeline.run().await.unwrap();

    let stations = store.stations("X").await.unwrap();
    assert_eq!(stations.len(), 2);
    assert_eq!(stations[0].address, "Village Hall Annexe");
}

const ADDRESSES_CSV: &str = "\
uprn,address,postcode,station
,1 High St,AB1 2CD,PS1
,1 High St,AB1 2CD,PS2
,2 High St,AB1 2CD,PS1
,1/2 Foo Street,AB1 2CD,PS1
,12 Foo Street,AB1 2CD,PS1
100023336956,3 High St,AB1 2CD,PS9
";

const ADDRESSES_CONFIG: &str = r#"{
    "jurisdiction_id": "X",
    "stations": {
        "format": "csv", "name": "stations.csv",
        "mapping": {"id": "Internal ID", "address": ["Address"], "postcode": "Post Code"}
    },
    "addresses": {
        "format": "csv", "name": "addresses.csv",
        "mapping": {"address": ["address"], "postcode": "postcode", "station_ref": "station", "uprn": "uprn"}
    }
}"#;

#[tokio::test]
async fn test_address_reconciliation() {
    let root = tempfile::tempdir().unwrap();
    let dir = data_dir(root.path(), "X-2021");
    std::fs::write(dir.join("stations.csv"), STATIONS_CSV).unwrap();
    std::fs::write(dir.join("addresses.csv"), ADDRESSES_CSV).unwrap();

    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::builder(config(ADDRESSES_CONFIG))
        .store(store.clone())
        .roots(DataRoots::new(root.path()))
        .build()
        .unwrap();

    let report = pipeline.run().await.unwrap();
    assert_eq!(report.duplicates_removed, 2);
    assert_eq!(report.unresolved_station_refs, 1);
    assert_eq!(report.counts(), (3, 0, 4));

    let addresses = store.addresses("X").await.unwrap();
    let texts: Vec<&str> = addresses.iter().map(|a| a.address.as_str()).collect();
    assert!(!texts.contains(&"1 High St"));
    assert!(texts.contains(&"2 High St"));
    assert!(texts.contains(&"1/2 Foo Street"));
    assert!(texts.contains(&"12 Foo Street"));

    let uprn = addresses.iter().find(|a| a.address == "3 High St").unwrap();
    assert_eq!(uprn.slug, "100023336956");
}

#[tokio::test]
async fn test_missing_source_leaves_jurisdiction_empty() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_station(&CanonicalStation {
            jurisdiction_id: "E07000223".into(),
            internal_id: "OLD".into(),
            address: "Stale Hall".into(),
            postcode: "AB12CD".into(),
            location: None,
        })
        .await
        .unwrap();

    let pipeline = Pipeline::builder(config(STATIONS_CONFIG))
        .store(store.clone())
        .roots(DataRoots::new(root.path()))
        .build()
        .unwrap();

    let failure = pipeline.run().await.unwrap_err();
    assert_eq!(failure.stage, Stage::Locate);
    assert!(matches!(failure.error, PipelineError::SourceNotFound { .. }));
    assert_eq!(failure.report.status, RunStatus::Failed);
    assert_eq!(failure.report.stage, Stage::Failed);

    assert!(store.stations("E07000223").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_source_fails_translate() {
    let root = tempfile::tempdir().unwrap();
    let dir = data_dir(root.path(), "E07000223-2021");
    std::fs::write(dir.join("stations.csv"), "id,ID\n1,2\n").unwrap();

    let pipeline = Pipeline::builder(config(STATIONS_CONFIG))
        .store(Arc::new(MemoryStore::new()))
        .roots(DataRoots::new(root.path()))
        .build()
        .unwrap();

    let failure = pipeline.run().await.unwrap_err();
    assert_eq!(failure.stage, Stage::Translate);
    assert!(matches!(failure.error, PipelineError::Source(_)));
}

const DISTRICTS_GEOJSON: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {"type": "Feature", "properties": {"district_code": "AA", "district_name": "Ward A"},
         "geometry": {"type": "Polygon", "coordinates": [[[0, 0, 5], [1, 0, 5], [1, 1, 5], [0, 0, 5]]]}},
        {"type": "Feature", "properties": {"district_code": "AB", "district_name": "Ward B"},
         "geometry": {"type": "MultiPolygon", "coordinates": [[[[2, 2], [3, 2], [3, 3], [2, 2]]]]}}
    ]
}"#;

struct FixedAddressBase {
    calls: AtomicUsize,
}

#[async_trait]
impl AddressBase for FixedAddressBase {
    async fn resolve_overlaps(&self, _jurisdiction_id: &str, _store: &dyn Store) -> Result<OverlapOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OverlapOutcome {
            no_attention_needed: 10,
            addresses_created: 2,
            residual_ambiguous: 1,
        })
    }
}

struct CountingHook {
    calls: AtomicUsize,
}

#[async_trait]
impl PostImportHook for CountingHook {
    async fn run(&self, jurisdiction_id: &str, store: &dyn Store) -> Result<()> {
        assert_eq!(store.districts(jurisdiction_id).await?.len(), 2);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_districts_hook_and_overlap() {
    let root = tempfile::tempdir().unwrap();
    let dir = data_dir(root.path(), "W06000015-2021");
    std::fs::write(dir.join("districts.geojson"), DISTRICTS_GEOJSON).unwrap();
    let reports = tempfile::tempdir().unwrap();

    let address_base = Arc::new(FixedAddressBase {
        calls: AtomicUsize::new(0),
    });
    let hook = Arc::new(CountingHook {
        calls: AtomicUsize::new(0),
    });
    let store = Arc::new(MemoryStore::new());
    let reporter = JsonFileReporter::new(reports.path());

    let pipeline = Pipeline::builder(config(
        r#"{"jurisdiction_id": "W06000015", "preset": "district_boundaries", "districts_srid": 4326,
            "post_import": "check_districts",
            "districts": {"format": "geojson", "name": "districts.geojson"}}"#,
    ))
    .store(store.clone())
    .roots(DataRoots::new(root.path()))
    .address_base(address_base.clone())
    .hook("check_districts", hook.clone())
    .reporter(Arc::new(reporter.clone()))
    .build()
    .unwrap();

    let report = pipeline.run().await.unwrap();
    assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    assert_eq!(address_base.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.overlap.map(|o| o.addresses_created), Some(2));
    assert_eq!(report.status, RunStatus::PartialSuccess);

    let districts = store.districts("W06000015").await.unwrap();
    assert_eq!(districts.len(), 2);
    assert_eq!(districts[0].internal_id, "AA");
    assert_eq!(districts[0].name, "Ward A");
    assert_eq!(districts[0].area.polygon_count(), 1);
    assert_eq!(districts[0].area.srid, 4326);

    let written = std::fs::read_to_string(reporter.path_for("W06000015")).unwrap();
    assert!(written.contains("PartialSuccess"));
}

struct FixedGeocoder;

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn geocode(&self, postcode: &str) -> Option<Location> {
        (postcode == "AB12CD").then(|| Location::new(-0.1, 51.5, 4326))
    }
}

#[tokio::test]
async fn test_station_point_from_postcode() {
    let root = tempfile::tempdir().unwrap();
    let dir = data_dir(root.path(), "X-2021");
    std::fs::write(dir.join("stations.csv"), STATIONS_CSV).unwrap();

    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::builder(config(
        r#"{"jurisdiction_id": "X", "allow_station_point_from_postcode": true,
            "stations": {"format": "csv", "name": "stations.csv",
                "mapping": {"id": "Internal ID", "address": ["Address"], "postcode": "Post Code"}}}"#,
    ))
    .store(store.clone())
    .roots(DataRoots::new(root.path()))
    .geocoder(Arc::new(FixedGeocoder))
    .build()
    .unwrap();

    let report = pipeline.run().await.unwrap();
    assert_eq!(report.status, RunStatus::PartialSuccess);

    let stations = store.stations("X").await.unwrap();
    assert_eq!(stations[0].location, Some(Location::new(-0.1, 51.5, 4326)));
    assert_eq!(stations[1].location, None);
}

#[tokio::test]
async fn test_first_seen_wins_with_fingerprint() {
    let root = tempfile::tempdir().unwrap();
    let dir = data_dir(root.path(), "X-2021");
    std::fs::write(
        dir.join("stations.csv"),
        "Internal ID,Address,Post Code\nPS1,Hall,AB1 2CD\nPS1,Hall,AB1 2CD\nPS1,Other Hall,AB1 2CD\n",
    )
    .unwrap();

    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::builder(config(
        r#"{"jurisdiction_id": "X", "stations": {"format": "csv", "name": "stations.csv",
            "fingerprint": ["Internal ID", "Address"],
            "mapping": {"id": "Internal ID", "address": ["Address"], "postcode": "Post Code"}}}"#,
    ))
    .store(store.clone())
    .roots(DataRoots::new(root.path()))
    .build()
    .unwrap();

    let report = pipeline.run().await.unwrap();
    let stats = report.stats(pollimport::model::Entity::Station);
    assert_eq!(stats.duplicates, 1);
    // Même clé naturelle: le second upsert écrase le premier
    assert_eq!((stats.inserted, stats.updated), (1, 1));

    let stations = store.stations("X").await.unwrap();
    assert_eq!(stations.len(), 1);
    assert_eq!(stations[0].address, "Other Hall");
}

#[tokio::test]
async fn test_rerun_is_idempotent_for_all_entities() {
    let root = tempfile::tempdir().unwrap();
    let dir = data_dir(root.path(), "X-2021");
    std::fs::write(dir.join("stations.csv"), STATIONS_CSV).unwrap();
    std::fs::write(dir.join("addresses.csv"), ADDRESSES_CSV).unwrap();
    std::fs::write(dir.join("districts.geojson"), DISTRICTS_GEOJSON).unwrap();

    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::builder(config(
        r#"{
            "jurisdiction_id": "X",
            "districts_srid": 4326,
            "stations": {
                "format": "csv", "name": "stations.csv",
                "mapping": {"id": "Internal ID", "address": ["Address"], "postcode": "Post Code"}
            },
            "districts": {
                "format": "geojson", "name": "districts.geojson",
                "mapping": {"id": "district_code", "name": "district_name"}
            },
            "addresses": {
                "format": "csv", "name": "addresses.csv",
                "mapping": {"address": ["address"], "postcode": "postcode", "station_ref": "station", "uprn": "uprn"}
            }
        }"#,
    ))
    .store(store.clone())
    .roots(DataRoots::new(root.path()))
    .build()
    .unwrap();

    let first_report = pipeline.run().await.unwrap();
    let first = store.digest("X").unwrap();
    let first_slugs: Vec<String> = store
        .addresses("X")
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.slug)
        .collect();

    let second_report = pipeline.run().await.unwrap();
    let second = store.digest("X").unwrap();
    let second_slugs: Vec<String> = store
        .addresses("X")
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.slug)
        .collect();

    assert_eq!(first, second);
    assert_eq!(first_slugs, second_slugs);
    assert_eq!(first_report.counts(), (3, 2, 4));
    assert_eq!(second_report.counts(), first_report.counts());
    assert_eq!(second_report.duplicates_removed, 2);
    assert_eq!(store.counts().unwrap(), (3, 2, 4));
}

struct FailingReporter;

#[async_trait]
impl QualityReporter for FailingReporter {
    async fn publish(&self, _report: &RunReport) -> Result<()> {
        anyhow::bail!("data_quality table unavailable")
    }
}

#[tokio::test]
async fn test_unpublished_report_is_partial_success() {
    let root = tempfile::tempdir().unwrap();
    let dir = data_dir(root.path(), "E07000223-2021");
    std::fs::write(dir.join("stations.csv"), STATIONS_CSV).unwrap();

    let pipeline = Pipeline::builder(config(STATIONS_CONFIG))
        .store(Arc::new(MemoryStore::new()))
        .roots(DataRoots::new(root.path()))
        .reporter(Arc::new(FailingReporter))
        .build()
        .unwrap();

    let report = pipeline.run().await.unwrap();
    assert_eq!(report.stage, Stage::Done);
    assert_eq!(report.status, RunStatus::PartialSuccess);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("data_quality table unavailable")));
}
