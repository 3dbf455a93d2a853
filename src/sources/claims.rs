use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::model::ClaimsMetrics;

/// Parse the optional claims extract into an NPI -> metrics map. A missing
/// file is not an error; enrichment is simply skipped. Malformed numeric
/// fields degrade to zero rather than dropping the row.
pub fn load_claims(path: &Path) -> Result<HashMap<String, ClaimsMetrics>> {
    if !path.exists() {
        tracing::info!(
            "No claims extract at {}; skipping claims enrichment",
            path.display()
        );
        return Ok(HashMap::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed opening claims extract {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("Failed reading claims headers from {}", path.display()))?
        .clone();

    let col = |name: &str| headers.iter().position(|h| h.trim() == name);
    let npi_idx = col("Prscrbr_NPI")
        .with_context(|| format!("Claims extract {} missing Prscrbr_NPI", path.display()))?;
    let claims_idx = col("Tot_Clms");
    let benes_idx = col("Tot_Benes");
    let cost_idx = col("Tot_Drug_Cst");

    let mut out = HashMap::new();
    for row in reader.records() {
        let row = row.with_context(|| format!("Failed reading record in {}", path.display()))?;
        let npi = row.get(npi_idx).map(str::trim).unwrap_or("");
        if npi.is_empty() {
            continue;
        }
        out.insert(
            npi.to_string(),
            ClaimsMetrics {
                claims_count: numeric_or_zero(claims_idx.and_then(|i| row.get(i))) as i64,
                beneficiary_count: numeric_or_zero(benes_idx.and_then(|i| row.get(i))) as i64,
                total_cost: numeric_or_zero(cost_idx.and_then(|i| row.get(i))),
            },
        );
    }
    tracing::info!("Loaded claims metrics for {} identifiers", out.len());
    Ok(out)
}

fn numeric_or_zero(value: Option<&str>) -> f64 {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0)
}
