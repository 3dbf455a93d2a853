use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{SecondsFormat, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::changes;
use crate::classify::{self, ClassifierConfig};
use crate::config::PipelineConfig;
use crate::download;
use crate::enrich;
use crate::normalize;
use crate::score::{self, ScoringConfig};
use crate::sources::{claims, geography, registry::RegistryReader};
use crate::store::{ChunkOutcome, Store};

pub fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub records_processed: u64,
    pub records_added: u64,
    pub records_updated: u64,
    pub changes_detected: u64,
}

/// Fire-and-forget trigger. At most one run is active per process; the
/// invoking surface stays responsive and polls the run record for status.
pub struct Runner {
    active: Arc<AtomicBool>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a run in the background and return immediately. Rejects while a
    /// previous run is still active; concurrent runs would race on the
    /// upsert and change-detection snapshot.
    pub fn trigger(
        &self,
        config: PipelineConfig,
    ) -> Result<tokio::task::JoinHandle<Result<RunSummary>>> {
        if self.active.swap(true, Ordering::SeqCst) {
            bail!("A pipeline run is already active");
        }
        let active = Arc::clone(&self.active);
        Ok(tokio::spawn(async move {
            let result = run_pipeline(&config).await;
            active.store(false, Ordering::SeqCst);
            result
        }))
    }
}

/// Execute the full pipeline: snapshot, ingest (normalize + classify
/// inline), load, multi-location re-pass, enrichment, scoring, change
/// detection, search-terms refresh. Ingest/load failures mark the run failed
/// and propagate; enrichment-stage failures are logged and the run still
/// completes.
pub async fn run_pipeline(config: &PipelineConfig) -> Result<RunSummary> {
    config
        .paths
        .ensure_dirs()
        .context("Failed creating data directories")?;
    let mut store = Store::open(&config.paths.db_path)?;

    let started_at = now_utc();
    let run_id = store.create_run(&started_at)?;
    store.mark_run_running(run_id)?;
    tracing::info!("Pipeline run {run_id} started");

    match execute_stages(config, &mut store, &started_at).await {
        Ok((totals, changes_detected)) => {
            store.complete_run(
                run_id,
                &now_utc(),
                totals.processed,
                totals.added,
                totals.updated,
                changes_detected,
            )?;
            tracing::info!(
                "Pipeline run {run_id} complete: processed={} added={} updated={} changes={}",
                totals.processed,
                totals.added,
                totals.updated,
                changes_detected
            );
            Ok(RunSummary {
                run_id,
                records_processed: totals.processed,
                records_added: totals.added,
                records_updated: totals.updated,
                changes_detected,
            })
        }
        Err(err) => {
            let summary = format!("{err:#}");
            tracing::error!("Pipeline run {run_id} failed: {summary}");
            store.fail_run(run_id, &now_utc(), &summary)?;
            Err(err)
        }
    }
}

async fn execute_stages(
    config: &PipelineConfig,
    store: &mut Store,
    started_at: &str,
) -> Result<(ChunkOutcome, u64)> {
    // Stage 0: snapshot current state for change detection.
    let snapshot = store.snapshot_tracked()?;
    tracing::info!("Snapshot captured: {} existing pharmacies", snapshot.len());

    // Stage 1: locate (or fetch) the registry extract. Mandatory input.
    let registry_csv: PathBuf = match &config.registry_csv {
        Some(path) => {
            if !path.exists() {
                bail!("Registry extract not found at {}", path.display());
            }
            path.clone()
        }
        None => {
            download::ensure_registry_extract(&config.paths, &config.registry_url, config.offline)
                .await?
        }
    };

    // Stage 2: stream, normalize, classify, load.
    let classifier = ClassifierConfig::new()?;
    let mut reader = RegistryReader::open(
        &registry_csv,
        config.batch_size,
        Utc::now().date_naive(),
    )?;

    let progress = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}") {
        progress.set_style(style);
    }
    progress.enable_steady_tick(Duration::from_millis(250));

    let mut totals = ChunkOutcome::default();
    while let Some(mut batch) = reader.next_batch()? {
        for record in &mut batch {
            normalize::normalize_record(record);
            classify::classify(&classifier, record);
        }
        store.upsert_batch(&batch, started_at, &mut totals)?;
        progress.set_message(format!(
            "scanned {} rows | pharmacies {} | added {} updated {}",
            reader.scanned(),
            reader.matched(),
            totals.added,
            totals.updated
        ));
    }
    progress.finish_with_message(format!(
        "ingest done: scanned {} rows, {} pharmacies ({} added, {} updated)",
        reader.scanned(),
        reader.matched(),
        totals.added,
        totals.updated
    ));

    // Stage 3: multi-location re-pass over the loaded population.
    let reclassified = store.multi_location_repass(classifier.multi_location_threshold)?;
    tracing::info!("Multi-location re-pass reclassified {reclassified} records");

    // Stage 4: claims enrichment (non-fatal).
    match claims::load_claims(&config.paths.claims_csv)
        .and_then(|map| enrich::apply_claims(store, &map))
    {
        Ok(updated) => tracing::info!("Claims enrichment updated {updated} records"),
        Err(err) => tracing::warn!("Claims enrichment failed (non-fatal): {err:#}"),
    }

    // Stage 5: geography enrichment (non-fatal).
    match geography::load_zip_demographics(&config.paths.geography_csv)
        .and_then(|map| enrich::apply_geography(store, &map))
    {
        Ok(outcome) => tracing::info!(
            "Geography enrichment matched {} ZIPs ({} records)",
            outcome.zips_matched,
            outcome.records_with_demographics
        ),
        Err(err) => tracing::warn!("Geography enrichment failed (non-fatal): {err:#}"),
    }

    // Stage 6: scoring (non-fatal; recomputable standalone at any time).
    let scoring = ScoringConfig::new(config.scoring_profile);
    match score::rescore_all(store, &scoring) {
        Ok(scored) => tracing::info!("Scored {scored} records"),
        Err(err) => tracing::warn!("Scoring failed (non-fatal): {err:#}"),
    }

    // Stage 7: change detection against the pre-run snapshot.
    let changes_detected = changes::detect_changes(
        store,
        &snapshot,
        &totals.new_npis,
        &totals.updated_npis,
        config.deactivation_policy,
        &now_utc(),
    )?;
    tracing::info!("Change detection recorded {changes_detected} events");

    // Stage 8: refresh the search-terms projection for the query surface.
    match store.refresh_search_terms() {
        Ok(rows) => tracing::info!("Search terms refreshed for {rows} records"),
        Err(err) => tracing::warn!("Search refresh failed (non-fatal): {err:#}"),
    }

    Ok((totals, changes_detected))
}
