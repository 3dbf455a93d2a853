use std::path::{Path, PathBuf};

/// Policy for records that existed before a run but were absent from the
/// current extract. The registry never hard-deletes, so absence is a
/// data-quality signal; whether it produces a "deactivated" change event is
/// an explicit operator decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DeactivationPolicy {
    /// Absence is ignored (default): no event, record left untouched.
    #[default]
    Ignore,
    /// Emit one `deactivated` change event per missing record.
    FlagMissing,
}

/// Well-known locations under the data directory.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub registry_dir: PathBuf,
    pub registry_zip: PathBuf,
    pub claims_csv: PathBuf,
    pub geography_csv: PathBuf,
}

impl StoragePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir: PathBuf = data_dir.into();
        let db_path = data_dir.join("pharmacy_intel.db");
        let registry_dir = data_dir.join("registry");
        let registry_zip = registry_dir.join("nppes_full.zip");
        let claims_csv = data_dir.join("cms_partd.csv");
        let geography_csv = data_dir.join("zip_demographics.csv");
        Self {
            data_dir,
            db_path,
            registry_dir,
            registry_zip,
            claims_csv,
            geography_csv,
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.registry_dir)?;
        Ok(())
    }
}

/// Everything one pipeline run needs, assembled by the CLI and passed down.
/// Immutable for the duration of the run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub paths: StoragePaths,
    /// Explicit registry CSV path; when None the newest extract under
    /// `registry_dir` is used (downloaded first if permitted).
    pub registry_csv: Option<PathBuf>,
    pub registry_url: String,
    /// Refuse to download missing inputs; a missing registry file becomes a
    /// fatal ingest error instead.
    pub offline: bool,
    /// Rows pulled from the registry reader per batch.
    pub batch_size: usize,
    pub scoring_profile: crate::score::WeightProfile,
    pub deactivation_policy: DeactivationPolicy,
}

pub fn file_present_nonempty(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(m) => m.is_file() && m.len() > 0,
        Err(_) => false,
    }
}
