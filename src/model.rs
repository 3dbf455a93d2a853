use serde::Serialize;

/// One pharmacy entity as produced by ingest (normalization + classification
/// applied, enrichment and scores not yet attached). The NPI is the natural
/// key for upsert; every other field overwrites the stored value only when
/// non-null.
#[derive(Debug, Clone, Default)]
pub struct PharmacyRecord {
    pub npi: String,
    pub organization_name: Option<String>,
    pub dba_name: Option<String>,
    pub entity_type: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub phone: Option<String>,
    pub fax: Option<String>,
    pub taxonomy_code: Option<String>,
    pub is_chain: bool,
    pub is_independent: bool,
    pub is_institutional: bool,
    pub chain_parent: Option<String>,
    pub authorized_official_name: Option<String>,
    pub authorized_official_title: Option<String>,
    pub authorized_official_phone: Option<String>,
    pub ownership_type: Option<String>,
    pub enumeration_date: Option<String>,
    pub deactivation_date: Option<String>,
    pub deactivation_reason: Option<String>,
    pub years_in_operation: Option<f64>,
    pub dedup_key: Option<String>,
}

/// Full stored row returned by the query surface.
#[derive(Debug, Clone, Serialize)]
pub struct StoredPharmacy {
    pub npi: String,
    pub organization_name: Option<String>,
    pub dba_name: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub county: Option<String>,
    pub phone: Option<String>,
    pub fax: Option<String>,
    pub taxonomy_code: Option<String>,
    pub is_chain: bool,
    pub is_independent: bool,
    pub is_institutional: bool,
    pub chain_parent: Option<String>,
    pub authorized_official_name: Option<String>,
    pub authorized_official_title: Option<String>,
    pub ownership_type: Option<String>,
    pub years_in_operation: Option<f64>,
    pub medicare_claims_count: Option<i64>,
    pub medicare_beneficiary_count: Option<i64>,
    pub medicare_total_cost: Option<f64>,
    pub zip_population: Option<i64>,
    pub zip_median_income: Option<i64>,
    pub zip_pct_65_plus: Option<f64>,
    pub zip_pop_growth_pct: Option<f64>,
    pub zip_medicare_claims: Option<i64>,
    pub zip_pharmacy_count: Option<i64>,
    pub zip_pharmacies_per_10k: Option<f64>,
    pub volume_score: Option<f64>,
    pub competition_score: Option<f64>,
    pub aging_score: Option<f64>,
    pub tenure_score: Option<f64>,
    pub income_score: Option<f64>,
    pub growth_score: Option<f64>,
    pub acquisition_score: Option<f64>,
    pub contact_email: Option<String>,
    pub notes: Option<String>,
    pub deal_status: DealStatus,
    pub dedup_key: Option<String>,
    pub first_seen: Option<String>,
    pub last_refreshed: Option<String>,
}

/// Per-identifier metrics parsed from the optional claims extract.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimsMetrics {
    pub claims_count: i64,
    pub beneficiary_count: i64,
    pub total_cost: f64,
}

/// Per-ZIP demographics from the optional geography reference file.
#[derive(Debug, Clone, Default)]
pub struct ZipDemographics {
    pub city: Option<String>,
    pub state: Option<String>,
    pub county: Option<String>,
    pub population: Option<i64>,
    pub median_income: Option<i64>,
    pub pct_65_plus: Option<f64>,
    pub pop_growth_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    New,
    Updated,
    Deactivated,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::New => "new",
            ChangeKind::Updated => "updated",
            ChangeKind::Deactivated => "deactivated",
        }
    }
}

/// Append-only audit entry; never updated after insert.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub npi: String,
    pub organization_name: Option<String>,
    pub kind: ChangeKind,
    pub field_changed: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub detected_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => RunStatus::Pending,
            "running" => RunStatus::Running,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Completed,
        }
    }
}

/// One pipeline execution, terminal once completed or failed.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: RunStatus,
    pub records_processed: i64,
    pub records_added: i64,
    pub records_updated: i64,
    pub changes_detected: i64,
    pub error_log: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DealStatus {
    None,
    Researching,
    Contacted,
    Negotiating,
    Passed,
    Closed,
}

impl DealStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DealStatus::None => "none",
            DealStatus::Researching => "researching",
            DealStatus::Contacted => "contacted",
            DealStatus::Negotiating => "negotiating",
            DealStatus::Passed => "passed",
            DealStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "researching" => DealStatus::Researching,
            "contacted" => DealStatus::Contacted,
            "negotiating" => DealStatus::Negotiating,
            "passed" => DealStatus::Passed,
            "closed" => DealStatus::Closed,
            _ => DealStatus::None,
        }
    }
}

/// Narrow update issued by external tooling; the pipeline never writes
/// these fields.
#[derive(Debug, Clone, Default)]
pub struct ContactUpdate {
    pub contact_email: Option<String>,
    pub notes: Option<String>,
    pub deal_status: Option<DealStatus>,
}
