use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::model::ZipDemographics;
use crate::normalize;

/// Load the optional per-ZIP demographics reference into a ZIP5 -> record
/// map. Absent file yields an empty map (non-fatal).
pub fn load_zip_demographics(path: &Path) -> Result<HashMap<String, ZipDemographics>> {
    if !path.exists() {
        tracing::info!(
            "No geography reference at {}; skipping geography enrichment",
            path.display()
        );
        return Ok(HashMap::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed opening geography reference {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("Failed reading geography headers from {}", path.display()))?
        .clone();

    let col = |name: &str| headers.iter().position(|h| h.trim() == name);
    let zip_idx = col("zip")
        .with_context(|| format!("Geography reference {} missing zip column", path.display()))?;
    let city_idx = col("city");
    let state_idx = col("state");
    let county_idx = col("county");
    let population_idx = col("population");
    let income_idx = col("median_income");
    let pct65_idx = col("pct_65_plus");
    let growth_idx = col("pop_growth_pct");

    let mut out = HashMap::new();
    for row in reader.records() {
        let row = row.with_context(|| format!("Failed reading record in {}", path.display()))?;
        let get = |idx: Option<usize>| {
            idx.and_then(|i| row.get(i))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        let Some(zip) = row.get(zip_idx).and_then(|z| normalize::normalize_zip(z)) else {
            continue;
        };
        out.insert(
            zip,
            ZipDemographics {
                city: get(city_idx).map(str::to_string),
                state: get(state_idx).map(str::to_string),
                county: get(county_idx).map(str::to_string),
                population: get(population_idx).and_then(|v| v.parse().ok()),
                median_income: get(income_idx).and_then(|v| v.parse().ok()),
                pct_65_plus: get(pct65_idx).and_then(|v| v.parse().ok()),
                pop_growth_pct: get(growth_idx).and_then(|v| v.parse().ok()),
            },
        );
    }
    tracing::info!("Loaded demographics for {} ZIP codes", out.len());
    Ok(out)
}
