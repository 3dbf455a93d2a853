use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;

use crate::model::PharmacyRecord;

/// Pharmacy-related taxonomy codes. A registry row survives only if one of
/// its first three taxonomy columns is in this list.
pub const PHARMACY_TAXONOMIES: &[&str] = &[
    "183500000X", // Pharmacist
    "3336C0002X", // Community/Retail Pharmacy
    "3336C0003X", // Compounding Pharmacy
    "3336C0004X", // Long Term Care Pharmacy
    "3336H0001X", // Home Infusion Therapy Pharmacy
    "3336I0012X", // Institutional Pharmacy
    "3336L0003X", // Mail Order Pharmacy
    "3336M0002X", // Military/U.S. Coast Guard Pharmacy
    "3336M0003X", // Managed Care Organization Pharmacy
    "3336N0007X", // Nuclear Pharmacy
    "3336S0011X", // Specialty Pharmacy
    "333600000X", // Pharmacy
];

/// Organization rows carry entity type code 2; individual providers are 1.
const ORGANIZATION_ENTITY_TYPE: &str = "2";

struct Columns {
    npi: usize,
    entity_type: usize,
    org_name: usize,
    other_org_name: Option<usize>,
    address1: Option<usize>,
    address2: Option<usize>,
    city: Option<usize>,
    state: Option<usize>,
    postal: Option<usize>,
    phone: Option<usize>,
    fax: Option<usize>,
    taxonomy: [Option<usize>; 3],
    official_first: Option<usize>,
    official_last: Option<usize>,
    official_title: Option<usize>,
    official_phone: Option<usize>,
    enumeration_date: Option<usize>,
    deactivation_reason: Option<usize>,
    deactivation_date: Option<usize>,
}

/// Streaming batched reader over the registry extract. Yields fixed-size
/// batches of surviving rows; the full file is never held in memory. Single
/// pass, not restartable without reopening the source.
pub struct RegistryReader {
    reader: csv::Reader<File>,
    columns: Columns,
    batch_size: usize,
    as_of: NaiveDate,
    scanned: u64,
    matched: u64,
}

impl RegistryReader {
    /// Open the extract. The registry is a mandatory input: a missing file or
    /// a file without the expected headers is a fatal error.
    pub fn open(path: &Path, batch_size: usize, as_of: NaiveDate) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed opening registry extract {}", path.display()))?;
        let headers = reader
            .headers()
            .with_context(|| format!("Failed reading registry headers from {}", path.display()))?
            .clone();

        let required = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .with_context(|| format!("Registry extract missing required header '{name}'"))
        };
        let optional =
            |name: &str| -> Option<usize> { headers.iter().position(|h| h.trim() == name) };

        let columns = Columns {
            npi: required("NPI")?,
            entity_type: required("Entity Type Code")?,
            org_name: required("Provider Organization Name (Legal Business Name)")?,
            other_org_name: optional("Provider Other Organization Name"),
            address1: optional("Provider First Line Business Practice Location Address"),
            address2: optional("Provider Second Line Business Practice Location Address"),
            city: optional("Provider Business Practice Location Address City Name"),
            state: optional("Provider Business Practice Location Address State Name"),
            postal: optional("Provider Business Practice Location Address Postal Code"),
            phone: optional("Provider Business Practice Location Address Telephone Number"),
            fax: optional("Provider Business Practice Location Address Fax Number"),
            taxonomy: [
                optional("Healthcare Provider Taxonomy Code_1"),
                optional("Healthcare Provider Taxonomy Code_2"),
                optional("Healthcare Provider Taxonomy Code_3"),
            ],
            official_first: optional("Authorized Official First Name"),
            official_last: optional("Authorized Official Last Name"),
            official_title: optional("Authorized Official Title or Position"),
            official_phone: optional("Authorized Official Telephone Number"),
            enumeration_date: optional("Provider Enumeration Date"),
            deactivation_reason: optional("NPI Deactivation Reason Code"),
            deactivation_date: optional("NPI Deactivation Date"),
        };
        if columns.taxonomy.iter().all(Option::is_none) {
            bail!(
                "Registry extract {} has no taxonomy code columns",
                path.display()
            );
        }

        Ok(Self {
            reader,
            columns,
            batch_size: batch_size.max(1),
            as_of,
            scanned: 0,
            matched: 0,
        })
    }

    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    pub fn matched(&self) -> u64 {
        self.matched
    }

    /// Pull the next batch of pharmacy rows, or None at end of input.
    pub fn next_batch(&mut self) -> Result<Option<Vec<PharmacyRecord>>> {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut row = csv::StringRecord::new();
        while batch.len() < self.batch_size {
            let more = self
                .reader
                .read_record(&mut row)
                .context("Failed reading registry record")?;
            if !more {
                break;
            }
            self.scanned += 1;
            if let Some(record) = self.build_record(&row) {
                self.matched += 1;
                batch.push(record);
            }
        }
        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }

    fn build_record(&self, row: &csv::StringRecord) -> Option<PharmacyRecord> {
        let cols = &self.columns;
        let get = |idx: usize| row.get(idx).map(str::trim).filter(|v| !v.is_empty());
        let get_opt = |idx: Option<usize>| idx.and_then(get);

        let taxonomy_code = cols
            .taxonomy
            .iter()
            .filter_map(|idx| get_opt(*idx))
            .find(|code| PHARMACY_TAXONOMIES.contains(code))?;

        if get(cols.entity_type) != Some(ORGANIZATION_ENTITY_TYPE) {
            return None;
        }
        let npi = get(cols.npi)?;

        let official_first = get_opt(cols.official_first).unwrap_or("");
        let official_last = get_opt(cols.official_last).unwrap_or("");
        let official_name = match (official_first.is_empty(), official_last.is_empty()) {
            (true, true) => None,
            _ => Some(format!("{official_first} {official_last}").trim().to_string()),
        };

        let enumeration_date = get_opt(cols.enumeration_date).and_then(parse_registry_date);
        let years_in_operation = enumeration_date
            .as_deref()
            .and_then(|d| years_in_operation(d, self.as_of));

        Some(PharmacyRecord {
            npi: npi.to_string(),
            organization_name: get(cols.org_name).map(str::to_string),
            dba_name: get_opt(cols.other_org_name).map(str::to_string),
            entity_type: Some("organization".to_string()),
            address_line1: get_opt(cols.address1).map(str::to_string),
            address_line2: get_opt(cols.address2).map(str::to_string),
            city: get_opt(cols.city).map(str::to_string),
            state: get_opt(cols.state).map(str::to_string),
            zip: get_opt(cols.postal).map(str::to_string),
            phone: get_opt(cols.phone).map(str::to_string),
            fax: get_opt(cols.fax).map(str::to_string),
            taxonomy_code: Some(taxonomy_code.to_string()),
            is_chain: false,
            is_independent: true,
            is_institutional: false,
            chain_parent: None,
            authorized_official_name: official_name,
            authorized_official_title: get_opt(cols.official_title).map(str::to_string),
            authorized_official_phone: get_opt(cols.official_phone).map(str::to_string),
            ownership_type: None,
            enumeration_date,
            deactivation_date: get_opt(cols.deactivation_date).and_then(parse_registry_date),
            deactivation_reason: get_opt(cols.deactivation_reason).map(str::to_string),
            years_in_operation,
            dedup_key: None,
        })
    }
}

impl Iterator for RegistryReader {
    type Item = Result<Vec<PharmacyRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

/// Registry dates arrive as MM/DD/YYYY (occasionally already ISO). Stored
/// canonically as YYYY-MM-DD; unparseable values degrade to None.
fn parse_registry_date(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in ["%m/%d/%Y", "%Y-%m-%d", "%m-%d-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}

fn years_in_operation(enumeration_date: &str, as_of: NaiveDate) -> Option<f64> {
    let start = NaiveDate::parse_from_str(enumeration_date, "%Y-%m-%d").ok()?;
    let days = (as_of - start).num_days();
    if days < 0 {
        return None;
    }
    Some((days as f64 / 365.25 * 10.0).round() / 10.0)
}

/// Newest `npidata_pfile_*.csv` under the registry directory, skipping the
/// header-helper companion files the registry ships alongside the data.
pub fn locate_extract(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut candidates = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("Failed reading directory {}", dir.display()))?
    {
        let entry = entry.with_context(|| format!("Failed iterating {}", dir.display()))?;
        let path = entry.path();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if name.starts_with("npidata_pfile_")
            && name.ends_with(".csv")
            && !name.contains("fileheader")
        {
            candidates.push(path);
        }
    }
    candidates.sort_by_key(|path| {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH)
    });
    Ok(candidates.pop())
}
