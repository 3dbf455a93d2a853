use clap::{Parser, Subcommand};

use crate::config::DeactivationPolicy;
use crate::constants::DEFAULT_REGISTRY_URL;
use crate::model::{ChangeKind, DealStatus};
use crate::score::WeightProfile;
use crate::store::SortField;

const DEFAULT_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data");

#[derive(Parser, Debug)]
#[command(name = "pharmacy-intel")]
#[command(about = "Pharmacy acquisition intelligence pipeline (registry ingest + scoring)", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full ingest -> enrich -> score -> diff pipeline.
    Run(RunArgs),
    /// Recompute scores over already-stored records (no re-ingestion).
    Rescore(RescoreArgs),
    /// Show the latest pipeline run record.
    Status(StatusArgs),
    /// List filtered pharmacies as JSON.
    Search(SearchArgs),
    /// Export filtered pharmacies to CSV.
    Export(ExportArgs),
    /// List recent change events.
    Changes(ChangesArgs),
    /// Update deal-tracking fields on one pharmacy.
    Annotate(AnnotateArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Data directory (registry downloads, auxiliary CSVs, SQLite store).
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// Explicit registry extract path. Defaults to the newest extract under
    /// <data-dir>/registry, downloading it first when absent.
    #[arg(long)]
    pub registry_csv: Option<std::path::PathBuf>,

    /// Registry archive URL used when no local extract exists.
    #[arg(long, default_value = DEFAULT_REGISTRY_URL)]
    pub registry_url: String,

    /// Do not download missing inputs; error instead.
    #[arg(long)]
    pub offline: bool,

    /// Rows per ingest batch.
    #[arg(long, default_value_t = 5000)]
    pub batch_size: usize,

    /// Scoring weight profile.
    #[arg(long, value_enum, default_value_t = WeightProfile::VolumeTenure)]
    pub profile: WeightProfile,

    /// What to do when a previously-seen record is absent from the extract.
    #[arg(long, value_enum, default_value_t = DeactivationPolicy::Ignore)]
    pub deactivation: DeactivationPolicy,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RescoreArgs {
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    #[arg(long, value_enum, default_value_t = WeightProfile::VolumeTenure)]
    pub profile: WeightProfile,
}

#[derive(clap::Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SearchArgs {
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// Substring match across name, trade name, city, and NPI.
    #[arg(long)]
    pub search: Option<String>,

    #[arg(long)]
    pub state: Option<String>,

    #[arg(long)]
    pub city: Option<String>,

    /// ZIP code prefix.
    #[arg(long)]
    pub zip: Option<String>,

    #[arg(long)]
    pub independent_only: bool,

    #[arg(long)]
    pub min_score: Option<f64>,

    #[arg(long, value_enum, default_value_t = SortField::OrganizationName)]
    pub sort: SortField,

    #[arg(long, default_value_t = 1)]
    pub page: u32,

    #[arg(long, default_value_t = 50)]
    pub per_page: u32,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ExportArgs {
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// Output CSV path.
    #[arg(long)]
    pub output: std::path::PathBuf,

    #[arg(long)]
    pub search: Option<String>,

    #[arg(long)]
    pub state: Option<String>,

    #[arg(long)]
    pub independent_only: bool,

    #[arg(long)]
    pub min_score: Option<f64>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ChangesArgs {
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// Restrict to one change kind.
    #[arg(long, value_enum)]
    pub kind: Option<ChangeKind>,

    #[arg(long, default_value_t = 200)]
    pub limit: u32,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AnnotateArgs {
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// NPI of the pharmacy to annotate.
    #[arg(long)]
    pub npi: String,

    #[arg(long)]
    pub contact_email: Option<String>,

    #[arg(long)]
    pub notes: Option<String>,

    #[arg(long, value_enum)]
    pub deal_status: Option<DealStatus>,
}
