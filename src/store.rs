use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::changes::TrackedFields;
use crate::classify::MULTI_LOCATION_PARENT;
use crate::model::{
    ChangeEvent, ChangeKind, ContactUpdate, DealStatus, PharmacyRecord, RunRecord, RunStatus,
    StoredPharmacy,
};

/// Persistent store: one pharmacies table keyed by NPI, an append-only
/// change-event log, and a run-history log.
pub struct Store {
    pub(crate) conn: Connection,
}

/// Running totals returned to the orchestrator after each committed chunk.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    pub processed: u64,
    pub added: u64,
    pub updated: u64,
    pub new_npis: HashSet<String>,
    pub updated_npis: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PharmacyFilter {
    /// Substring match across name / trade name / city / NPI.
    pub search: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub zip_prefix: Option<String>,
    pub independent_only: bool,
    pub min_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SortField {
    #[default]
    OrganizationName,
    AcquisitionScore,
    CompetitionScore,
    ZipMedicareClaims,
    ZipPct65Plus,
    ZipMedianIncome,
}

impl SortField {
    fn order_clause(self) -> &'static str {
        match self {
            SortField::OrganizationName => "organization_name ASC",
            SortField::AcquisitionScore => "acquisition_score DESC",
            SortField::CompetitionScore => "competition_score DESC",
            SortField::ZipMedicareClaims => "zip_medicare_claims DESC",
            SortField::ZipPct65Plus => "zip_pct_65_plus DESC",
            SortField::ZipMedianIncome => "zip_median_income DESC",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub independent: u64,
    pub chain: u64,
    pub states: u64,
    pub scored: u64,
    pub avg_score: Option<f64>,
}

const SELECT_COLUMNS: &str = "
    npi, organization_name, dba_name, address_line1, address_line2, city, state, zip,
    county, phone, fax, taxonomy_code, is_chain, is_independent, is_institutional,
    chain_parent, authorized_official_name, authorized_official_title, ownership_type,
    years_in_operation, medicare_claims_count, medicare_beneficiary_count,
    medicare_total_cost, zip_population, zip_median_income, zip_pct_65_plus,
    zip_pop_growth_pct, zip_medicare_claims, zip_pharmacy_count, zip_pharmacies_per_10k,
    volume_score, competition_score, aging_score, tenure_score, income_score,
    growth_score, acquisition_score, contact_email, notes, deal_status, dedup_key,
    first_seen, last_refreshed";

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed creating store dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed opening store DB {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .context("Failed configuring store pragmas")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed opening in-memory store")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS pharmacies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                npi TEXT UNIQUE NOT NULL,
                organization_name TEXT, dba_name TEXT, entity_type TEXT,
                address_line1 TEXT, address_line2 TEXT, city TEXT, state TEXT,
                zip TEXT, county TEXT, phone TEXT, fax TEXT,
                taxonomy_code TEXT,
                is_chain INTEGER NOT NULL DEFAULT 0,
                is_independent INTEGER NOT NULL DEFAULT 1,
                is_institutional INTEGER NOT NULL DEFAULT 0,
                chain_parent TEXT,
                authorized_official_name TEXT, authorized_official_title TEXT,
                authorized_official_phone TEXT, ownership_type TEXT,
                enumeration_date TEXT, deactivation_date TEXT, deactivation_reason TEXT,
                years_in_operation REAL,
                medicare_claims_count INTEGER, medicare_beneficiary_count INTEGER,
                medicare_total_cost REAL,
                zip_population INTEGER, zip_median_income INTEGER,
                zip_pct_65_plus REAL, zip_pop_growth_pct REAL,
                zip_medicare_claims INTEGER, zip_pharmacy_count INTEGER,
                zip_pharmacies_per_10k REAL,
                volume_score REAL, competition_score REAL, aging_score REAL,
                tenure_score REAL, income_score REAL, growth_score REAL,
                acquisition_score REAL,
                contact_email TEXT, notes TEXT,
                deal_status TEXT NOT NULL DEFAULT 'none',
                dedup_key TEXT, search_terms TEXT,
                first_seen TEXT, last_refreshed TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_pharmacies_state ON pharmacies(state);
            CREATE INDEX IF NOT EXISTS idx_pharmacies_zip ON pharmacies(zip);
            CREATE INDEX IF NOT EXISTS idx_pharmacies_name ON pharmacies(organization_name);
            CREATE INDEX IF NOT EXISTS idx_pharmacies_independent ON pharmacies(is_independent);
            CREATE INDEX IF NOT EXISTS idx_pharmacies_dedup ON pharmacies(dedup_key);

            CREATE TABLE IF NOT EXISTS pharmacy_changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                npi TEXT NOT NULL, organization_name TEXT,
                change_type TEXT NOT NULL, field_changed TEXT NOT NULL,
                old_value TEXT, new_value TEXT, detected_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_changes_npi ON pharmacy_changes(npi);
            CREATE INDEX IF NOT EXISTS idx_changes_detected ON pharmacy_changes(detected_at);

            CREATE TABLE IF NOT EXISTS pipeline_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT NOT NULL, completed_at TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                records_processed INTEGER NOT NULL DEFAULT 0,
                records_added INTEGER NOT NULL DEFAULT 0,
                records_updated INTEGER NOT NULL DEFAULT 0,
                changes_detected INTEGER NOT NULL DEFAULT 0,
                error_log TEXT
            );
            ",
        )
        .context("Failed initializing store schema")?;
        Ok(Self { conn })
    }

    /// Upsert one batch inside a single transaction. New NPIs are inserted
    /// with first_seen = last_refreshed = now; existing rows get a field-wise
    /// overwrite where the incoming value is non-null, plus a refreshed
    /// timestamp. A crash mid-batch rolls the whole chunk back.
    pub fn upsert_batch(
        &mut self,
        records: &[PharmacyRecord],
        now: &str,
        totals: &mut ChunkOutcome,
    ) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .context("Failed starting upsert transaction")?;
        {
            let mut probe = tx
                .prepare("SELECT 1 FROM pharmacies WHERE npi = ?1")
                .context("Failed preparing upsert probe")?;
            let mut insert = tx
                .prepare(
                    "
                    INSERT INTO pharmacies (
                        npi, organization_name, dba_name, entity_type,
                        address_line1, address_line2, city, state, zip, phone, fax,
                        taxonomy_code, is_chain, is_independent, is_institutional,
                        chain_parent, authorized_official_name, authorized_official_title,
                        authorized_official_phone, ownership_type,
                        enumeration_date, deactivation_date, deactivation_reason,
                        years_in_operation, dedup_key, first_seen, last_refreshed
                    ) VALUES (
                        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                        ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27
                    )
                    ",
                )
                .context("Failed preparing upsert insert")?;
            let mut update = tx
                .prepare(
                    "
                    UPDATE pharmacies SET
                        organization_name = COALESCE(?2, organization_name),
                        dba_name = COALESCE(?3, dba_name),
                        entity_type = COALESCE(?4, entity_type),
                        address_line1 = COALESCE(?5, address_line1),
                        address_line2 = COALESCE(?6, address_line2),
                        city = COALESCE(?7, city),
                        state = COALESCE(?8, state),
                        zip = COALESCE(?9, zip),
                        phone = COALESCE(?10, phone),
                        fax = COALESCE(?11, fax),
                        taxonomy_code = COALESCE(?12, taxonomy_code),
                        is_chain = ?13,
                        is_independent = ?14,
                        is_institutional = ?15,
                        chain_parent = COALESCE(?16, chain_parent),
                        authorized_official_name = COALESCE(?17, authorized_official_name),
                        authorized_official_title = COALESCE(?18, authorized_official_title),
                        authorized_official_phone = COALESCE(?19, authorized_official_phone),
                        ownership_type = COALESCE(?20, ownership_type),
                        enumeration_date = COALESCE(?21, enumeration_date),
                        deactivation_date = COALESCE(?22, deactivation_date),
                        deactivation_reason = COALESCE(?23, deactivation_reason),
                        years_in_operation = COALESCE(?24, years_in_operation),
                        dedup_key = COALESCE(?25, dedup_key),
                        last_refreshed = ?26
                    WHERE npi = ?1
                    ",
                )
                .context("Failed preparing upsert update")?;

            for record in records {
                totals.processed += 1;
                let exists = probe
                    .query_row([&record.npi], |_| Ok(()))
                    .optional()
                    .with_context(|| format!("Failed probing NPI {}", record.npi))?
                    .is_some();
                if exists {
                    update
                        .execute(params![
                            record.npi,
                            record.organization_name,
                            record.dba_name,
                            record.entity_type,
                            record.address_line1,
                            record.address_line2,
                            record.city,
                            record.state,
                            record.zip,
                            record.phone,
                            record.fax,
                            record.taxonomy_code,
                            record.is_chain,
                            record.is_independent,
                            record.is_institutional,
                            record.chain_parent,
                            record.authorized_official_name,
                            record.authorized_official_title,
                            record.authorized_official_phone,
                            record.ownership_type,
                            record.enumeration_date,
                            record.deactivation_date,
                            record.deactivation_reason,
                            record.years_in_operation,
                            record.dedup_key,
                            now,
                        ])
                        .with_context(|| format!("Failed updating NPI {}", record.npi))?;
                    totals.updated += 1;
                    totals.updated_npis.insert(record.npi.clone());
                } else {
                    insert
                        .execute(params![
                            record.npi,
                            record.organization_name,
                            record.dba_name,
                            record.entity_type,
                            record.address_line1,
                            record.address_line2,
                            record.city,
                            record.state,
                            record.zip,
                            record.phone,
                            record.fax,
                            record.taxonomy_code,
                            record.is_chain,
                            record.is_independent,
                            record.is_institutional,
                            record.chain_parent,
                            record.authorized_official_name,
                            record.authorized_official_title,
                            record.authorized_official_phone,
                            record.ownership_type,
                            record.enumeration_date,
                            record.deactivation_date,
                            record.deactivation_reason,
                            record.years_in_operation,
                            record.dedup_key,
                            now,
                            now,
                        ])
                        .with_context(|| format!("Failed inserting NPI {}", record.npi))?;
                    totals.added += 1;
                    totals.new_npis.insert(record.npi.clone());
                }
            }
        }
        tx.commit().context("Failed committing upsert chunk")?;
        Ok(())
    }

    /// Reclassify currently-independent operators whose exact name occurs at
    /// least `threshold` times. Catches regional chains the pattern tables
    /// miss. Returns the number of reclassified rows.
    pub fn multi_location_repass(&self, threshold: u32) -> Result<usize> {
        let updated = self
            .conn
            .execute(
                "
                UPDATE pharmacies
                SET is_chain = 1, is_independent = 0, chain_parent = ?1
                WHERE is_independent = 1 AND organization_name IN (
                    SELECT organization_name FROM pharmacies
                    WHERE is_independent = 1 AND organization_name IS NOT NULL
                    GROUP BY organization_name
                    HAVING COUNT(*) >= ?2
                )
                ",
                params![MULTI_LOCATION_PARENT, threshold],
            )
            .context("Failed running multi-location repass")?;
        Ok(updated)
    }

    /// Rebuild the concatenated search-terms column used for substring
    /// queries over name / trade name / city / NPI.
    pub fn refresh_search_terms(&self) -> Result<usize> {
        self.conn
            .execute(
                "
                UPDATE pharmacies SET search_terms = UPPER(
                    COALESCE(organization_name, '') || ' ' ||
                    COALESCE(dba_name, '') || ' ' ||
                    COALESCE(city, '') || ' ' ||
                    npi
                )
                ",
                [],
            )
            .context("Failed refreshing search terms")
    }

    pub fn snapshot_tracked(&self) -> Result<HashMap<String, TrackedFields>> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT npi, organization_name, dba_name, address_line1, city, state,
                       zip, phone, is_chain, is_independent, chain_parent,
                       authorized_official_name
                FROM pharmacies
                ",
            )
            .context("Failed preparing snapshot query")?;
        let mut rows = stmt.query([]).context("Failed querying snapshot")?;
        let mut snapshot = HashMap::new();
        while let Some(row) = rows.next().context("Failed iterating snapshot rows")? {
            let npi: String = row.get(0)?;
            snapshot.insert(
                npi,
                TrackedFields {
                    organization_name: row.get(1)?,
                    dba_name: row.get(2)?,
                    address_line1: row.get(3)?,
                    city: row.get(4)?,
                    state: row.get(5)?,
                    zip: row.get(6)?,
                    phone: row.get(7)?,
                    is_chain: row.get(8)?,
                    is_independent: row.get(9)?,
                    chain_parent: row.get(10)?,
                    authorized_official_name: row.get(11)?,
                },
            );
        }
        Ok(snapshot)
    }

    pub fn tracked_for_npi(&self, npi: &str) -> Result<Option<(Option<String>, TrackedFields)>> {
        self.conn
            .query_row(
                "
                SELECT organization_name, dba_name, address_line1, city, state, zip,
                       phone, is_chain, is_independent, chain_parent,
                       authorized_official_name
                FROM pharmacies WHERE npi = ?1
                ",
                [npi],
                |row| {
                    let fields = TrackedFields {
                        organization_name: row.get(0)?,
                        dba_name: row.get(1)?,
                        address_line1: row.get(2)?,
                        city: row.get(3)?,
                        state: row.get(4)?,
                        zip: row.get(5)?,
                        phone: row.get(6)?,
                        is_chain: row.get(7)?,
                        is_independent: row.get(8)?,
                        chain_parent: row.get(9)?,
                        authorized_official_name: row.get(10)?,
                    };
                    Ok((fields.organization_name.clone(), fields))
                },
            )
            .optional()
            .with_context(|| format!("Failed loading tracked fields for {npi}"))
    }

    pub fn insert_change_events(&mut self, events: &[ChangeEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let tx = self
            .conn
            .transaction()
            .context("Failed starting change-event transaction")?;
        {
            let mut stmt = tx
                .prepare(
                    "
                    INSERT INTO pharmacy_changes
                        (npi, organization_name, change_type, field_changed,
                         old_value, new_value, detected_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ",
                )
                .context("Failed preparing change-event insert")?;
            for event in events {
                stmt.execute(params![
                    event.npi,
                    event.organization_name,
                    event.kind.as_str(),
                    event.field_changed,
                    event.old_value,
                    event.new_value,
                    event.detected_at,
                ])
                .with_context(|| format!("Failed inserting change event for {}", event.npi))?;
            }
        }
        tx.commit().context("Failed committing change events")?;
        Ok(())
    }

    pub fn list_changes(&self, kind: Option<ChangeKind>, limit: u32) -> Result<Vec<ChangeEvent>> {
        let (sql, params_vec): (String, Vec<Value>) = match kind {
            Some(kind) => (
                "SELECT npi, organization_name, change_type, field_changed, old_value,
                        new_value, detected_at
                 FROM pharmacy_changes WHERE change_type = ?1
                 ORDER BY detected_at DESC, id DESC LIMIT ?2"
                    .to_string(),
                vec![
                    Value::Text(kind.as_str().to_string()),
                    Value::Integer(i64::from(limit)),
                ],
            ),
            None => (
                "SELECT npi, organization_name, change_type, field_changed, old_value,
                        new_value, detected_at
                 FROM pharmacy_changes ORDER BY detected_at DESC, id DESC LIMIT ?1"
                    .to_string(),
                vec![Value::Integer(i64::from(limit))],
            ),
        };
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed preparing change list query")?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params_vec), |row| {
                let kind: String = row.get(2)?;
                Ok(ChangeEvent {
                    npi: row.get(0)?,
                    organization_name: row.get(1)?,
                    kind: match kind.as_str() {
                        "new" => ChangeKind::New,
                        "deactivated" => ChangeKind::Deactivated,
                        _ => ChangeKind::Updated,
                    },
                    field_changed: row.get(3)?,
                    old_value: row.get(4)?,
                    new_value: row.get(5)?,
                    detected_at: row.get(6)?,
                })
            })
            .context("Failed querying change events")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed reading change event row")?);
        }
        Ok(out)
    }

    // --- run history ---------------------------------------------------

    pub fn create_run(&self, started_at: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO pipeline_runs (started_at, status) VALUES (?1, 'pending')",
                [started_at],
            )
            .context("Failed inserting run record")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn mark_run_running(&self, run_id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE pipeline_runs SET status = 'running' WHERE id = ?1",
                [run_id],
            )
            .context("Failed marking run as running")?;
        Ok(())
    }

    pub fn complete_run(
        &self,
        run_id: i64,
        completed_at: &str,
        processed: u64,
        added: u64,
        updated: u64,
        changes: u64,
    ) -> Result<()> {
        self.conn
            .execute(
                "
                UPDATE pipeline_runs
                SET status = 'completed', completed_at = ?2, records_processed = ?3,
                    records_added = ?4, records_updated = ?5, changes_detected = ?6
                WHERE id = ?1
                ",
                params![
                    run_id,
                    completed_at,
                    processed as i64,
                    added as i64,
                    updated as i64,
                    changes as i64
                ],
            )
            .context("Failed completing run record")?;
        Ok(())
    }

    pub fn fail_run(&self, run_id: i64, completed_at: &str, error: &str) -> Result<()> {
        self.conn
            .execute(
                "
                UPDATE pipeline_runs
                SET status = 'failed', completed_at = ?2, error_log = ?3
                WHERE id = ?1
                ",
                params![run_id, completed_at, error],
            )
            .context("Failed failing run record")?;
        Ok(())
    }

    pub fn latest_run(&self) -> Result<Option<RunRecord>> {
        self.conn
            .query_row(
                "
                SELECT id, started_at, completed_at, status, records_processed,
                       records_added, records_updated, changes_detected, error_log
                FROM pipeline_runs ORDER BY id DESC LIMIT 1
                ",
                [],
                |row| {
                    let status: String = row.get(3)?;
                    Ok(RunRecord {
                        id: row.get(0)?,
                        started_at: row.get(1)?,
                        completed_at: row.get(2)?,
                        status: RunStatus::parse(&status),
                        records_processed: row.get(4)?,
                        records_added: row.get(5)?,
                        records_updated: row.get(6)?,
                        changes_detected: row.get(7)?,
                        error_log: row.get(8)?,
                    })
                },
            )
            .optional()
            .context("Failed reading latest run")
    }

    // --- query surface -------------------------------------------------

    pub fn get_by_npi(&self, npi: &str) -> Result<Option<StoredPharmacy>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM pharmacies WHERE npi = ?1");
        self.conn
            .query_row(&sql, [npi], row_to_pharmacy)
            .optional()
            .with_context(|| format!("Failed loading pharmacy {npi}"))
    }

    /// Filtered, sorted, paginated listing plus the total match count.
    pub fn search_pharmacies(
        &self,
        filter: &PharmacyFilter,
        sort: SortField,
        page: Page,
    ) -> Result<(Vec<StoredPharmacy>, u64)> {
        let (where_clause, params_vec) = build_filter(filter);

        let count_sql = format!("SELECT COUNT(*) FROM pharmacies {where_clause}");
        let total: i64 = self
            .conn
            .query_row(
                &count_sql,
                rusqlite::params_from_iter(params_vec.clone()),
                |row| row.get(0),
            )
            .context("Failed counting matches")?;

        let per_page = page.per_page.max(1);
        let offset = u64::from(page.page.max(1) - 1) * u64::from(per_page);
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM pharmacies {where_clause} ORDER BY {} LIMIT {} OFFSET {}",
            sort.order_clause(),
            per_page,
            offset
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed preparing search query")?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params_vec), row_to_pharmacy)
            .context("Failed querying pharmacies")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed reading pharmacy row")?);
        }
        Ok((out, total.max(0) as u64))
    }

    /// Narrow mutation for externally-owned fields. The pipeline never
    /// touches contact_email / notes / deal_status. Returns false when the
    /// NPI is unknown.
    pub fn update_contact(&self, npi: &str, update: &ContactUpdate) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "
                UPDATE pharmacies SET
                    contact_email = COALESCE(?2, contact_email),
                    notes = COALESCE(?3, notes),
                    deal_status = COALESCE(?4, deal_status)
                WHERE npi = ?1
                ",
                params![
                    npi,
                    update.contact_email,
                    update.notes,
                    update.deal_status.map(DealStatus::as_str),
                ],
            )
            .with_context(|| format!("Failed updating contact fields for {npi}"))?;
        Ok(changed > 0)
    }

    /// Full-fidelity CSV dump of filtered records, fixed column list.
    pub fn export_csv(&self, filter: &PharmacyFilter, output_path: &Path) -> Result<u64> {
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed creating export dir {}", parent.display()))?;
        }
        let file_name = output_path
            .file_name()
            .and_then(|x| x.to_str())
            .unwrap_or("pharmacies_export.csv");
        let tmp_path = output_path.with_file_name(format!("{file_name}.tmp"));

        let mut writer = csv::Writer::from_path(&tmp_path)
            .with_context(|| format!("Failed creating export CSV {}", tmp_path.display()))?;
        writer
            .write_record([
                "NPI",
                "Organization Name",
                "DBA Name",
                "Address",
                "City",
                "State",
                "ZIP",
                "Phone",
                "Type",
                "Chain Parent",
                "Medicare Claims",
                "Medicare Cost",
                "Acquisition Score",
            ])
            .context("Failed writing export header")?;

        let (where_clause, params_vec) = build_filter(filter);
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM pharmacies {where_clause} ORDER BY organization_name ASC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed preparing export query")?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params_vec), row_to_pharmacy)
            .context("Failed querying export rows")?;

        let mut exported = 0u64;
        for row in rows {
            let p = row.context("Failed reading export row")?;
            let claims = p
                .medicare_claims_count
                .map(|v| v.to_string())
                .unwrap_or_default();
            let cost = p
                .medicare_total_cost
                .map(|v| v.to_string())
                .unwrap_or_default();
            let score = p
                .acquisition_score
                .map(|v| v.to_string())
                .unwrap_or_default();
            writer
                .write_record([
                    p.npi.as_str(),
                    p.organization_name.as_deref().unwrap_or(""),
                    p.dba_name.as_deref().unwrap_or(""),
                    p.address_line1.as_deref().unwrap_or(""),
                    p.city.as_deref().unwrap_or(""),
                    p.state.as_deref().unwrap_or(""),
                    p.zip.as_deref().unwrap_or(""),
                    p.phone.as_deref().unwrap_or(""),
                    if p.is_independent { "Independent" } else { "Chain" },
                    p.chain_parent.as_deref().unwrap_or(""),
                    claims.as_str(),
                    cost.as_str(),
                    score.as_str(),
                ])
                .context("Failed writing export row")?;
            exported += 1;
        }
        writer.flush().context("Failed flushing export writer")?;
        fs::rename(&tmp_path, output_path).with_context(|| {
            format!(
                "Failed moving export {} to {}",
                tmp_path.display(),
                output_path.display()
            )
        })?;
        Ok(exported)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let one = |sql: &str| -> Result<i64> {
            self.conn
                .query_row(sql, [], |row| row.get(0))
                .with_context(|| format!("Failed stats query: {sql}"))
        };
        let total = one("SELECT COUNT(*) FROM pharmacies")?;
        let independent = one("SELECT COUNT(*) FROM pharmacies WHERE is_independent = 1")?;
        let chain = one("SELECT COUNT(*) FROM pharmacies WHERE is_chain = 1")?;
        let states =
            one("SELECT COUNT(DISTINCT state) FROM pharmacies WHERE state IS NOT NULL")?;
        let scored = one("SELECT COUNT(*) FROM pharmacies WHERE acquisition_score IS NOT NULL")?;
        let avg_score: Option<f64> = self
            .conn
            .query_row(
                "SELECT AVG(acquisition_score) FROM pharmacies WHERE acquisition_score IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .context("Failed averaging scores")?;
        Ok(StoreStats {
            total: total.max(0) as u64,
            independent: independent.max(0) as u64,
            chain: chain.max(0) as u64,
            states: states.max(0) as u64,
            scored: scored.max(0) as u64,
            avg_score,
        })
    }
}

fn build_filter(filter: &PharmacyFilter) -> (String, Vec<Value>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push("search_terms LIKE ?".to_string());
        values.push(Value::Text(format!("%{}%", search.to_uppercase())));
    }
    if let Some(state) = filter.state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push("state = ?".to_string());
        values.push(Value::Text(state.to_uppercase()));
    }
    if let Some(city) = filter.city.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push("city LIKE ?".to_string());
        values.push(Value::Text(format!("%{city}%")));
    }
    if let Some(zip) = filter.zip_prefix.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push("zip LIKE ?".to_string());
        values.push(Value::Text(format!("{zip}%")));
    }
    if filter.independent_only {
        conditions.push("is_independent = 1".to_string());
    }
    if let Some(min_score) = filter.min_score {
        conditions.push("acquisition_score >= ?".to_string());
        values.push(Value::Real(min_score));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (where_clause, values)
}

fn row_to_pharmacy(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredPharmacy> {
    let deal_status: String = row.get(39)?;
    Ok(StoredPharmacy {
        npi: row.get(0)?,
        organization_name: row.get(1)?,
        dba_name: row.get(2)?,
        address_line1: row.get(3)?,
        address_line2: row.get(4)?,
        city: row.get(5)?,
        state: row.get(6)?,
        zip: row.get(7)?,
        county: row.get(8)?,
        phone: row.get(9)?,
        fax: row.get(10)?,
        taxonomy_code: row.get(11)?,
        is_chain: row.get(12)?,
        is_independent: row.get(13)?,
        is_institutional: row.get(14)?,
        chain_parent: row.get(15)?,
        authorized_official_name: row.get(16)?,
        authorized_official_title: row.get(17)?,
        ownership_type: row.get(18)?,
        years_in_operation: row.get(19)?,
        medicare_claims_count: row.get(20)?,
        medicare_beneficiary_count: row.get(21)?,
        medicare_total_cost: row.get(22)?,
        zip_population: row.get(23)?,
        zip_median_income: row.get(24)?,
        zip_pct_65_plus: row.get(25)?,
        zip_pop_growth_pct: row.get(26)?,
        zip_medicare_claims: row.get(27)?,
        zip_pharmacy_count: row.get(28)?,
        zip_pharmacies_per_10k: row.get(29)?,
        volume_score: row.get(30)?,
        competition_score: row.get(31)?,
        aging_score: row.get(32)?,
        tenure_score: row.get(33)?,
        income_score: row.get(34)?,
        growth_score: row.get(35)?,
        acquisition_score: row.get(36)?,
        contact_email: row.get(37)?,
        notes: row.get(38)?,
        deal_status: DealStatus::parse(&deal_status),
        dedup_key: row.get(40)?,
        first_seen: row.get(41)?,
        last_refreshed: row.get(42)?,
    })
}
