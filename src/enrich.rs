use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::params;

use crate::model::{ClaimsMetrics, ZipDemographics};
use crate::store::Store;

/// Write claims metrics onto matching stored records. Identifiers with no
/// stored match are silently skipped; a join never inserts. Returns the
/// number of records updated.
pub fn apply_claims(store: &mut Store, claims: &HashMap<String, ClaimsMetrics>) -> Result<usize> {
    if claims.is_empty() {
        return Ok(0);
    }
    let tx = store
        .conn
        .transaction()
        .context("Failed starting claims enrichment transaction")?;
    let mut updated = 0usize;
    {
        let mut stmt = tx
            .prepare(
                "
                UPDATE pharmacies SET
                    medicare_claims_count = ?2,
                    medicare_beneficiary_count = ?3,
                    medicare_total_cost = ?4
                WHERE npi = ?1
                ",
            )
            .context("Failed preparing claims update")?;
        for (npi, metrics) in claims {
            let changed = stmt
                .execute(params![
                    npi,
                    metrics.claims_count,
                    metrics.beneficiary_count,
                    metrics.total_cost
                ])
                .with_context(|| format!("Failed applying claims metrics for {npi}"))?;
            if changed > 0 {
                updated += 1;
            }
        }
    }
    tx.commit().context("Failed committing claims enrichment")?;
    Ok(updated)
}

#[derive(Debug, Default)]
pub struct GeographyOutcome {
    pub zips_matched: usize,
    pub records_with_demographics: usize,
}

/// Attach per-ZIP demographics, then derive the per-ZIP competition and
/// demand aggregates (pharmacy count, density per 10k population, area claim
/// volume) onto every record sharing the ZIP. Repeated runs with unchanged
/// inputs produce unchanged outputs.
pub fn apply_geography(
    store: &mut Store,
    demographics: &HashMap<String, ZipDemographics>,
) -> Result<GeographyOutcome> {
    let tx = store
        .conn
        .transaction()
        .context("Failed starting geography enrichment transaction")?;
    let mut outcome = GeographyOutcome::default();
    {
        let mut stmt = tx
            .prepare(
                "
                UPDATE pharmacies SET
                    county = COALESCE(?2, county),
                    zip_population = ?3,
                    zip_median_income = ?4,
                    zip_pct_65_plus = ?5,
                    zip_pop_growth_pct = ?6
                WHERE zip = ?1
                ",
            )
            .context("Failed preparing demographics update")?;
        for (zip, demo) in demographics {
            let changed = stmt
                .execute(params![
                    zip,
                    demo.county,
                    demo.population,
                    demo.median_income,
                    demo.pct_65_plus,
                    demo.pop_growth_pct
                ])
                .with_context(|| format!("Failed applying demographics for ZIP {zip}"))?;
            if changed > 0 {
                outcome.zips_matched += 1;
                outcome.records_with_demographics += changed;
            }
        }
    }

    // Competition and demand aggregates come from the loaded store itself,
    // so they stay correct however the reference file overlaps the extract.
    tx.execute(
        "
        UPDATE pharmacies SET zip_pharmacy_count = (
            SELECT COUNT(*) FROM pharmacies p2 WHERE p2.zip = pharmacies.zip
        )
        WHERE zip IS NOT NULL
        ",
        [],
    )
    .context("Failed computing ZIP pharmacy counts")?;

    tx.execute(
        "
        UPDATE pharmacies SET zip_pharmacies_per_10k = ROUND(
            zip_pharmacy_count * 10000.0 / zip_population, 2
        )
        WHERE zip_population IS NOT NULL AND zip_population > 0
        ",
        [],
    )
    .context("Failed computing ZIP pharmacy density")?;

    tx.execute(
        "
        UPDATE pharmacies SET zip_medicare_claims = (
            SELECT SUM(p2.medicare_claims_count) FROM pharmacies p2
            WHERE p2.zip = pharmacies.zip AND p2.medicare_claims_count IS NOT NULL
        )
        WHERE zip IS NOT NULL
        ",
        [],
    )
    .context("Failed computing ZIP claim volume")?;

    tx.commit().context("Failed committing geography enrichment")?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PharmacyRecord;
    use crate::store::ChunkOutcome;

    fn seed(store: &mut Store, rows: &[(&str, &str, &str)]) {
        let mut totals = ChunkOutcome::default();
        let batch: Vec<PharmacyRecord> = rows
            .iter()
            .map(|(npi, name, zip)| PharmacyRecord {
                npi: npi.to_string(),
                organization_name: Some(name.to_string()),
                zip: Some(zip.to_string()),
                is_independent: true,
                ..Default::default()
            })
            .collect();
        store
            .upsert_batch(&batch, "2026-01-01T00:00:00Z", &mut totals)
            .unwrap();
    }

    #[test]
    fn claims_join_skips_unknown_identifiers() {
        let mut store = Store::open_in_memory().unwrap();
        seed(&mut store, &[("1111111111", "ALPHA PHARMACY", "30301")]);

        let mut claims = HashMap::new();
        claims.insert(
            "1111111111".to_string(),
            ClaimsMetrics {
                claims_count: 1200,
                beneficiary_count: 300,
                total_cost: 45000.0,
            },
        );
        claims.insert("9999999999".to_string(), ClaimsMetrics::default());

        let updated = apply_claims(&mut store, &claims).unwrap();
        assert_eq!(updated, 1);
        let stored = store.get_by_npi("1111111111").unwrap().unwrap();
        assert_eq!(stored.medicare_claims_count, Some(1200));
        assert!(store.get_by_npi("9999999999").unwrap().is_none());
    }

    #[test]
    fn geography_join_attaches_demographics_and_density() {
        let mut store = Store::open_in_memory().unwrap();
        seed(
            &mut store,
            &[
                ("1111111111", "ALPHA PHARMACY", "30301"),
                ("2222222222", "BETA PHARMACY", "30301"),
                ("3333333333", "GAMMA PHARMACY", "62701"),
            ],
        );
        let mut claims = HashMap::new();
        claims.insert(
            "1111111111".to_string(),
            ClaimsMetrics {
                claims_count: 1000,
                ..Default::default()
            },
        );
        claims.insert(
            "2222222222".to_string(),
            ClaimsMetrics {
                claims_count: 500,
                ..Default::default()
            },
        );
        apply_claims(&mut store, &claims).unwrap();

        let mut demographics = HashMap::new();
        demographics.insert(
            "30301".to_string(),
            ZipDemographics {
                county: Some("Fulton".to_string()),
                population: Some(10_000),
                median_income: Some(61_000),
                pct_65_plus: Some(14.5),
                pop_growth_pct: Some(2.0),
                ..Default::default()
            },
        );
        demographics.insert("99999".to_string(), ZipDemographics::default());

        let outcome = apply_geography(&mut store, &demographics).unwrap();
        assert_eq!(outcome.zips_matched, 1);
        assert_eq!(outcome.records_with_demographics, 2);

        let stored = store.get_by_npi("1111111111").unwrap().unwrap();
        assert_eq!(stored.zip_population, Some(10_000));
        assert_eq!(stored.county.as_deref(), Some("Fulton"));
        assert_eq!(stored.zip_pharmacy_count, Some(2));
        assert_eq!(stored.zip_pharmacies_per_10k, Some(2.0));
        assert_eq!(stored.zip_medicare_claims, Some(1500));

        // No demographics for this ZIP, but counts still derive from the store.
        let other = store.get_by_npi("3333333333").unwrap().unwrap();
        assert_eq!(other.zip_population, None);
        assert_eq!(other.zip_pharmacy_count, Some(1));
        assert_eq!(other.zip_pharmacies_per_10k, None);
    }

    #[test]
    fn geography_join_is_idempotent() {
        let mut store = Store::open_in_memory().unwrap();
        seed(
            &mut store,
            &[
                ("1111111111", "ALPHA PHARMACY", "30301"),
                ("2222222222", "BETA PHARMACY", "30301"),
            ],
        );
        let mut demographics = HashMap::new();
        demographics.insert(
            "30301".to_string(),
            ZipDemographics {
                population: Some(20_000),
                ..Default::default()
            },
        );
        apply_geography(&mut store, &demographics).unwrap();
        let first = store.get_by_npi("1111111111").unwrap().unwrap();
        apply_geography(&mut store, &demographics).unwrap();
        let second = store.get_by_npi("1111111111").unwrap().unwrap();
        assert_eq!(first.zip_pharmacy_count, second.zip_pharmacy_count);
        assert_eq!(first.zip_pharmacies_per_10k, second.zip_pharmacies_per_10k);
        assert_eq!(first.zip_population, second.zip_population);
    }
}
