use std::fs;
use std::path::{Path, PathBuf};

use pharmacy_intel::config::{DeactivationPolicy, PipelineConfig, StoragePaths};
use pharmacy_intel::pipeline::{self, Runner};
use pharmacy_intel::score::{self, ScoringConfig, WeightProfile};
use pharmacy_intel::store::{Page, PharmacyFilter, SortField, Store};

const REGISTRY_HEADER: &str = "NPI,Entity Type Code,Provider Organization Name (Legal Business Name),Provider Other Organization Name,Provider First Line Business Practice Location Address,Provider Second Line Business Practice Location Address,Provider Business Practice Location Address City Name,Provider Business Practice Location Address State Name,Provider Business Practice Location Address Postal Code,Provider Business Practice Location Address Telephone Number,Provider Business Practice Location Address Fax Number,Healthcare Provider Taxonomy Code_1,Healthcare Provider Taxonomy Code_2,Healthcare Provider Taxonomy Code_3,Authorized Official First Name,Authorized Official Last Name,Authorized Official Title or Position,Authorized Official Telephone Number,Provider Enumeration Date";

fn write_registry(dir: &Path, rows: &[&str]) -> PathBuf {
    let path = dir.join("npidata_pfile_20050523-20260101.csv");
    let mut content = String::from(REGISTRY_HEADER);
    content.push('\n');
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    fs::write(&path, content).unwrap();
    path
}

fn config_for(data_dir: &Path, registry_csv: PathBuf) -> PipelineConfig {
    PipelineConfig {
        paths: StoragePaths::new(data_dir),
        registry_csv: Some(registry_csv),
        registry_url: "http://localhost/unused.zip".to_string(),
        offline: true,
        batch_size: 100,
        scoring_profile: WeightProfile::VolumeTenure,
        deactivation_policy: DeactivationPolicy::Ignore,
    }
}

const INDEPENDENT_ROW: &str = "1111111111,2,Main Street pharmacy llc,,123 Oak Street,,Springfield,il,62701-4321,15551234567,,3336C0002X,,,JANE,DOE,OWNER,5551112222,01/15/1995";
const NON_PHARMACY_ROW: &str = "2222222222,2,SPRINGFIELD CARDIOLOGY,,9 Elm Avenue,,Springfield,IL,62701,5550000000,,207RC0000X,,,JOHN,ROE,MD,,06/01/2010";
const CVS_ROW: &str = "3333333333,2,CVS PHARMACY #4411,,500 Peach Boulevard,,Atlanta,GA,30301,4045556677,,3336C0002X,,,SAM,SMITH,MANAGER,,03/20/2015";

#[tokio::test]
async fn three_row_extract_loads_two_pharmacies() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = write_registry(tmp.path(), &[INDEPENDENT_ROW, NON_PHARMACY_ROW, CVS_ROW]);
    let config = config_for(tmp.path(), registry);

    let summary = pipeline::run_pipeline(&config).await.unwrap();
    assert_eq!(summary.records_processed, 2);
    assert_eq!(summary.records_added, 2);
    assert_eq!(summary.records_updated, 0);
    // One "new" event per inserted record.
    assert_eq!(summary.changes_detected, 2);

    let store = Store::open(&config.paths.db_path).unwrap();
    let (all, total) = store
        .search_pharmacies(&PharmacyFilter::default(), SortField::default(), Page::default())
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(all.len(), 2);
    assert!(store.get_by_npi("2222222222").unwrap().is_none());

    let independent = store.get_by_npi("1111111111").unwrap().unwrap();
    assert!(independent.is_independent);
    assert!(!independent.is_chain);
    // Normalization applied on the way in.
    assert_eq!(
        independent.organization_name.as_deref(),
        Some("MAIN STREET PHARMACY LLC")
    );
    assert_eq!(independent.address_line1.as_deref(), Some("123 OAK ST"));
    assert_eq!(independent.zip.as_deref(), Some("62701"));
    assert_eq!(independent.state.as_deref(), Some("IL"));
    assert_eq!(independent.phone.as_deref(), Some("(555) 123-4567"));
    assert_eq!(independent.ownership_type.as_deref(), Some("LLC"));
    assert!(independent.dedup_key.is_some());
    assert!(independent.years_in_operation.unwrap() > 20.0);

    let chain = store.get_by_npi("3333333333").unwrap().unwrap();
    assert!(chain.is_chain);
    assert!(!chain.is_independent);
    assert_eq!(chain.chain_parent.as_deref(), Some("CVS"));

    // Scoring ran as part of the pipeline; composite is a 2dp value in range.
    for record in [&independent, &chain] {
        let score = record.acquisition_score.unwrap();
        assert!((0.0..=100.0).contains(&score));
    }
}

#[tokio::test]
async fn second_run_upserts_and_tracks_changes() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = write_registry(tmp.path(), &[INDEPENDENT_ROW, CVS_ROW]);
    let config = config_for(tmp.path(), registry);
    pipeline::run_pipeline(&config).await.unwrap();

    let moved = INDEPENDENT_ROW.replace(",Springfield,", ",Decatur,");
    let registry = write_registry(tmp.path(), &[moved.as_str(), CVS_ROW]);
    let config = config_for(tmp.path(), registry);
    let summary = pipeline::run_pipeline(&config).await.unwrap();

    assert_eq!(summary.records_processed, 2);
    assert_eq!(summary.records_added, 0);
    assert_eq!(summary.records_updated, 2);
    // Only the city actually changed, on one record.
    assert_eq!(summary.changes_detected, 1);

    let store = Store::open(&config.paths.db_path).unwrap();
    let (_, total) = store
        .search_pharmacies(&PharmacyFilter::default(), SortField::default(), Page::default())
        .unwrap();
    assert_eq!(total, 2);

    let updated = store.get_by_npi("1111111111").unwrap().unwrap();
    assert_eq!(updated.city.as_deref(), Some("Decatur"));
    let first_seen = updated.first_seen.unwrap();
    let last_refreshed = updated.last_refreshed.unwrap();
    assert!(last_refreshed > first_seen);

    let events = store.list_changes(None, 50).unwrap();
    let city_events: Vec<_> = events
        .iter()
        .filter(|e| e.field_changed == "city")
        .collect();
    assert_eq!(city_events.len(), 1);
    assert_eq!(city_events[0].npi, "1111111111");
    assert_eq!(city_events[0].old_value.as_deref(), Some("Springfield"));
    assert_eq!(city_events[0].new_value.as_deref(), Some("Decatur"));
}

#[tokio::test]
async fn enrichment_joins_claims_and_geography() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = StoragePaths::new(tmp.path());
    fs::write(
        &paths.claims_csv,
        "Prscrbr_NPI,Tot_Clms,Tot_Benes,Tot_Drug_Cst\n1111111111,40000,900,1200000.50\n",
    )
    .unwrap();
    fs::write(
        &paths.geography_csv,
        "zip,city,state,county,population,median_income,pct_65_plus,pop_growth_pct\n62701,SPRINGFIELD,IL,Sangamon,10000,61000,15.0,1.0\n",
    )
    .unwrap();

    let registry = write_registry(tmp.path(), &[INDEPENDENT_ROW, CVS_ROW]);
    let config = config_for(tmp.path(), registry);
    pipeline::run_pipeline(&config).await.unwrap();

    let store = Store::open(&config.paths.db_path).unwrap();
    let enriched = store.get_by_npi("1111111111").unwrap().unwrap();
    assert_eq!(enriched.medicare_claims_count, Some(40000));
    assert_eq!(enriched.zip_population, Some(10000));
    assert_eq!(enriched.county.as_deref(), Some("Sangamon"));
    assert_eq!(enriched.zip_pharmacy_count, Some(1));
    assert_eq!(enriched.zip_pharmacies_per_10k, Some(1.0));
    assert_eq!(enriched.zip_medicare_claims, Some(40000));

    // volume 50, competition 100, aging 50, tenure (>=25y) 100, income 61,
    // growth 55 under the volume/tenure profile.
    let expected: f64 = 50.0 * 0.30 + 100.0 * 0.20 + 50.0 * 0.20 + 100.0 * 0.15 + 61.0 * 0.08 + 55.0 * 0.07;
    let expected = (expected * 100.0).round() / 100.0;
    assert_eq!(enriched.acquisition_score, Some(expected));

    // The unenriched record still scores, from defaults.
    let other = store.get_by_npi("3333333333").unwrap().unwrap();
    assert!(other.acquisition_score.is_some());
}

#[tokio::test]
async fn rescore_standalone_is_bit_identical_and_profiles_swap() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = write_registry(tmp.path(), &[INDEPENDENT_ROW, CVS_ROW]);
    let config = config_for(tmp.path(), registry);
    pipeline::run_pipeline(&config).await.unwrap();

    let mut store = Store::open(&config.paths.db_path).unwrap();
    let scoring = ScoringConfig::new(WeightProfile::VolumeTenure);
    score::rescore_all(&mut store, &scoring).unwrap();
    let first = store.get_by_npi("1111111111").unwrap().unwrap();
    score::rescore_all(&mut store, &scoring).unwrap();
    let second = store.get_by_npi("1111111111").unwrap().unwrap();
    assert_eq!(first.acquisition_score, second.acquisition_score);
    assert_eq!(first.volume_score, second.volume_score);
    assert_eq!(first.tenure_score, second.tenure_score);

    let alternate = ScoringConfig::new(WeightProfile::MarketDemand);
    score::rescore_all(&mut store, &alternate).unwrap();
    let swapped = store.get_by_npi("1111111111").unwrap().unwrap();
    assert_ne!(swapped.acquisition_score, first.acquisition_score);
}

#[tokio::test]
async fn missing_registry_marks_run_failed() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_for(tmp.path(), tmp.path().join("missing.csv"));

    let err = pipeline::run_pipeline(&config).await.unwrap_err();
    assert!(err.to_string().contains("missing.csv"));

    let store = Store::open(&config.paths.db_path).unwrap();
    let run = store.latest_run().unwrap().unwrap();
    assert_eq!(run.status.as_str(), "failed");
    assert!(run.error_log.unwrap().contains("missing.csv"));
}

#[tokio::test]
async fn malformed_optional_claims_file_is_non_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = StoragePaths::new(tmp.path());
    fs::write(&paths.claims_csv, "wrong,headers\n1,2\n").unwrap();

    let registry = write_registry(tmp.path(), &[INDEPENDENT_ROW]);
    let config = config_for(tmp.path(), registry);
    let summary = pipeline::run_pipeline(&config).await.unwrap();
    assert_eq!(summary.records_processed, 1);

    let store = Store::open(&config.paths.db_path).unwrap();
    let run = store.latest_run().unwrap().unwrap();
    assert_eq!(run.status.as_str(), "completed");
    let record = store.get_by_npi("1111111111").unwrap().unwrap();
    assert_eq!(record.medicare_claims_count, None);
}

#[tokio::test]
async fn trigger_reports_status_through_run_record() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = write_registry(tmp.path(), &[INDEPENDENT_ROW]);
    let config = config_for(tmp.path(), registry);

    {
        let store = Store::open(&config.paths.db_path).unwrap();
        assert!(store.latest_run().unwrap().is_none());
    }

    let runner = Runner::new();
    let handle = runner.trigger(config.clone()).unwrap();
    let summary = handle.await.unwrap().unwrap();
    assert!(!runner.is_active());

    let store = Store::open(&config.paths.db_path).unwrap();
    let run = store.latest_run().unwrap().unwrap();
    assert_eq!(run.status.as_str(), "completed");
    assert_eq!(run.records_processed as u64, summary.records_processed);
    assert!(run.completed_at.unwrap() > run.started_at);
}
