use anyhow::{Context, Result};
use rusqlite::params;

use crate::store::Store;

/// Fixed weight profiles. Selected by use case, not by the data: the default
/// favors prescription volume and owner tenure; the alternate favors market
/// structure (competition + demand) for tuck-in screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WeightProfile {
    #[default]
    VolumeTenure,
    MarketDemand,
}

#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub volume: f64,
    pub competition: f64,
    pub aging: f64,
    pub tenure: f64,
    pub income: f64,
    pub growth: f64,
}

impl WeightProfile {
    pub fn weights(self) -> Weights {
        match self {
            WeightProfile::VolumeTenure => Weights {
                volume: 0.30,
                competition: 0.20,
                aging: 0.20,
                tenure: 0.15,
                income: 0.08,
                growth: 0.07,
            },
            WeightProfile::MarketDemand => Weights {
                volume: 0.25,
                competition: 0.25,
                aging: 0.20,
                tenure: 0.0,
                income: 0.15,
                growth: 0.15,
            },
        }
    }
}

/// Reference constants and band tables. Immutable; passed into the engine so
/// alternate references can be substituted without touching the formulas.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub weights: Weights,
    pub volume_ceiling: f64,
    pub volume_default: f64,
    /// (upper bound on pharmacies-per-10k, score); evaluated in order.
    pub competition_bands: Vec<(f64, f64)>,
    pub competition_floor: f64,
    pub competition_default: f64,
    pub aging_ceiling_pct: f64,
    pub aging_default: f64,
    /// (lower bound on years in operation, score); evaluated in order.
    pub tenure_bands: Vec<(f64, f64)>,
    pub tenure_floor: f64,
    pub tenure_default: f64,
    pub income_ceiling: f64,
    pub income_default: f64,
    pub growth_midpoint: f64,
    pub growth_slope: f64,
    pub growth_default: f64,
}

impl ScoringConfig {
    pub fn new(profile: WeightProfile) -> Self {
        Self {
            weights: profile.weights(),
            volume_ceiling: 80_000.0,
            volume_default: 20.0,
            competition_bands: vec![
                (1.0, 100.0),
                (3.0, 80.0),
                (5.0, 60.0),
                (8.0, 40.0),
                (12.0, 20.0),
            ],
            competition_floor: 10.0,
            competition_default: 50.0,
            aging_ceiling_pct: 30.0,
            aging_default: 50.0,
            tenure_bands: vec![(25.0, 100.0), (20.0, 80.0), (15.0, 50.0), (10.0, 30.0)],
            tenure_floor: 10.0,
            tenure_default: 30.0,
            income_ceiling: 100_000.0,
            income_default: 50.0,
            growth_midpoint: 50.0,
            growth_slope: 5.0,
            growth_default: 50.0,
        }
    }
}

/// Metric fields a composite score is derived from; all optional, each
/// sub-score has a fixed default for absent input.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreInputs {
    pub claims_count: Option<i64>,
    pub pharmacies_per_10k: Option<f64>,
    pub pct_65_plus: Option<f64>,
    pub years_in_operation: Option<f64>,
    pub median_income: Option<i64>,
    pub pop_growth_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubScores {
    pub volume: f64,
    pub competition: f64,
    pub aging: f64,
    pub tenure: f64,
    pub income: f64,
    pub growth: f64,
}

impl ScoringConfig {
    /// Volume ramp against the reference ceiling, capped at 100. Unknown
    /// volume is penalized less than zero volume would be.
    pub fn volume_score(&self, claims_count: Option<i64>) -> f64 {
        match claims_count {
            Some(count) => ((count as f64 / self.volume_ceiling) * 100.0).min(100.0),
            None => self.volume_default,
        }
    }

    /// Step function of density per population unit; lower density scores
    /// strictly higher.
    pub fn competition_score(&self, per_10k: Option<f64>) -> f64 {
        match per_10k {
            Some(density) => self
                .competition_bands
                .iter()
                .find(|(bound, _)| density <= *bound)
                .map(|(_, score)| *score)
                .unwrap_or(self.competition_floor),
            None => self.competition_default,
        }
    }

    pub fn aging_score(&self, pct_65_plus: Option<f64>) -> f64 {
        match pct_65_plus {
            Some(pct) => ((pct / self.aging_ceiling_pct) * 100.0).min(100.0),
            None => self.aging_default,
        }
    }

    /// Longer tenure scores higher: an older owner-operator is a stronger
    /// acquisition prospect.
    pub fn tenure_score(&self, years: Option<f64>) -> f64 {
        match years {
            Some(years) => self
                .tenure_bands
                .iter()
                .find(|(bound, _)| years >= *bound)
                .map(|(_, score)| *score)
                .unwrap_or(self.tenure_floor),
            None => self.tenure_default,
        }
    }

    pub fn income_score(&self, median_income: Option<i64>) -> f64 {
        match median_income {
            Some(income) if income > 0 => {
                ((income as f64 / self.income_ceiling) * 100.0).min(100.0)
            }
            _ => self.income_default,
        }
    }

    /// Centered linear function of population growth around the neutral
    /// midpoint, clamped to [0, 100].
    pub fn growth_score(&self, pop_growth_pct: Option<f64>) -> f64 {
        match pop_growth_pct {
            Some(pct) => (self.growth_midpoint + pct * self.growth_slope).clamp(0.0, 100.0),
            None => self.growth_default,
        }
    }

    pub fn sub_scores(&self, inputs: &ScoreInputs) -> SubScores {
        SubScores {
            volume: self.volume_score(inputs.claims_count),
            competition: self.competition_score(inputs.pharmacies_per_10k),
            aging: self.aging_score(inputs.pct_65_plus),
            tenure: self.tenure_score(inputs.years_in_operation),
            income: self.income_score(inputs.median_income),
            growth: self.growth_score(inputs.pop_growth_pct),
        }
    }

    /// Weighted composite in [0, 100], rounded to 2 decimal places. A pure
    /// function of the stored metric fields, recomputable at any time.
    pub fn composite(&self, sub: &SubScores) -> f64 {
        let w = &self.weights;
        let total = sub.volume * w.volume
            + sub.competition * w.competition
            + sub.aging * w.aging
            + sub.tenure * w.tenure
            + sub.income * w.income
            + sub.growth * w.growth;
        round2(total)
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Recompute sub-scores and composite for every stored record. Runs
/// standalone over the store; no re-ingestion required.
pub fn rescore_all(store: &mut Store, config: &ScoringConfig) -> Result<usize> {
    let mut inputs_by_npi: Vec<(String, ScoreInputs)> = Vec::new();
    {
        let mut select = store
            .conn
            .prepare(
                "
                SELECT npi, medicare_claims_count, zip_pharmacies_per_10k,
                       zip_pct_65_plus, years_in_operation, zip_median_income,
                       zip_pop_growth_pct
                FROM pharmacies
                ",
            )
            .context("Failed preparing rescore select")?;
        let mut rows = select.query([]).context("Failed querying rescore rows")?;
        while let Some(row) = rows.next().context("Failed iterating rescore rows")? {
            let npi: String = row.get(0)?;
            let inputs = ScoreInputs {
                claims_count: row.get(1)?,
                pharmacies_per_10k: row.get(2)?,
                pct_65_plus: row.get(3)?,
                years_in_operation: row.get(4)?,
                median_income: row.get(5)?,
                pop_growth_pct: row.get(6)?,
            };
            inputs_by_npi.push((npi, inputs));
        }
    }

    let tx = store
        .conn
        .transaction()
        .context("Failed starting rescore transaction")?;
    {
        let mut update = tx
            .prepare(
                "
                UPDATE pharmacies SET
                    volume_score = ?2, competition_score = ?3, aging_score = ?4,
                    tenure_score = ?5, income_score = ?6, growth_score = ?7,
                    acquisition_score = ?8
                WHERE npi = ?1
                ",
            )
            .context("Failed preparing rescore update")?;
        for (npi, inputs) in &inputs_by_npi {
            let sub = config.sub_scores(inputs);
            let composite = config.composite(&sub);
            update
                .execute(params![
                    npi,
                    round2(sub.volume),
                    round2(sub.competition),
                    round2(sub.aging),
                    round2(sub.tenure),
                    round2(sub.income),
                    round2(sub.growth),
                    composite,
                ])
                .with_context(|| format!("Failed writing scores for {npi}"))?;
        }
    }
    tx.commit().context("Failed committing rescore")?;
    Ok(inputs_by_npi.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PharmacyRecord;
    use crate::store::ChunkOutcome;

    fn config() -> ScoringConfig {
        ScoringConfig::new(WeightProfile::VolumeTenure)
    }

    #[test]
    fn volume_at_ceiling_is_exactly_capped() {
        let c = config();
        assert_eq!(c.volume_score(Some(80_000)), 100.0);
        assert_eq!(c.volume_score(Some(160_000)), 100.0);
        assert_eq!(c.volume_score(Some(40_000)), 50.0);
        assert_eq!(c.volume_score(Some(0)), 0.0);
        assert_eq!(c.volume_score(None), 20.0);
    }

    #[test]
    fn competition_bands_step_down_with_density() {
        let c = config();
        assert_eq!(c.competition_score(Some(0.5)), 100.0);
        assert_eq!(c.competition_score(Some(1.0)), 100.0);
        assert_eq!(c.competition_score(Some(2.9)), 80.0);
        assert_eq!(c.competition_score(Some(4.0)), 60.0);
        assert_eq!(c.competition_score(Some(7.9)), 40.0);
        assert_eq!(c.competition_score(Some(11.0)), 20.0);
        assert_eq!(c.competition_score(Some(25.0)), 10.0);
        assert_eq!(c.competition_score(None), 50.0);
    }

    #[test]
    fn tenure_bands_reward_longevity() {
        let c = config();
        assert_eq!(c.tenure_score(Some(30.0)), 100.0);
        assert_eq!(c.tenure_score(Some(25.0)), 100.0);
        assert_eq!(c.tenure_score(Some(22.0)), 80.0);
        assert_eq!(c.tenure_score(Some(16.0)), 50.0);
        assert_eq!(c.tenure_score(Some(11.0)), 30.0);
        assert_eq!(c.tenure_score(Some(3.0)), 10.0);
        assert_eq!(c.tenure_score(None), 30.0);
    }

    #[test]
    fn growth_is_centered_and_clamped() {
        let c = config();
        assert_eq!(c.growth_score(Some(0.0)), 50.0);
        assert_eq!(c.growth_score(Some(4.0)), 70.0);
        assert_eq!(c.growth_score(Some(-20.0)), 0.0);
        assert_eq!(c.growth_score(Some(20.0)), 100.0);
        assert_eq!(c.growth_score(None), 50.0);
    }

    #[test]
    fn income_zero_is_neutral() {
        let c = config();
        assert_eq!(c.income_score(Some(0)), 50.0);
        assert_eq!(c.income_score(Some(50_000)), 50.0);
        assert_eq!(c.income_score(Some(250_000)), 100.0);
        assert_eq!(c.income_score(None), 50.0);
    }

    #[test]
    fn composite_is_weighted_and_rounded() {
        let c = config();
        let sub = SubScores {
            volume: 100.0,
            competition: 100.0,
            aging: 100.0,
            tenure: 100.0,
            income: 100.0,
            growth: 100.0,
        };
        assert_eq!(c.composite(&sub), 100.0);

        let inputs = ScoreInputs {
            claims_count: Some(40_000),
            pharmacies_per_10k: Some(2.0),
            pct_65_plus: Some(15.0),
            years_in_operation: Some(21.0),
            median_income: Some(75_000),
            pop_growth_pct: Some(1.0),
        };
        let sub = c.sub_scores(&inputs);
        // 50*0.30 + 80*0.20 + 50*0.20 + 80*0.15 + 75*0.08 + 55*0.07 = 62.85
        assert_eq!(c.composite(&sub), 62.85);
    }

    #[test]
    fn profiles_differ() {
        let inputs = ScoreInputs {
            claims_count: Some(40_000),
            pharmacies_per_10k: Some(2.0),
            years_in_operation: Some(30.0),
            ..Default::default()
        };
        let a = ScoringConfig::new(WeightProfile::VolumeTenure);
        let b = ScoringConfig::new(WeightProfile::MarketDemand);
        let score_a = a.composite(&a.sub_scores(&inputs));
        let score_b = b.composite(&b.sub_scores(&inputs));
        assert_ne!(score_a, score_b);
    }

    #[test]
    fn rescore_is_idempotent() {
        let mut store = Store::open_in_memory().unwrap();
        let mut totals = ChunkOutcome::default();
        let mut record = PharmacyRecord {
            npi: "1111111111".to_string(),
            organization_name: Some("ALPHA PHARMACY".to_string()),
            is_independent: true,
            years_in_operation: Some(22.0),
            ..Default::default()
        };
        record.zip = Some("30301".to_string());
        store
            .upsert_batch(&[record], "2026-01-01T00:00:00Z", &mut totals)
            .unwrap();

        let config = config();
        let scored = rescore_all(&mut store, &config).unwrap();
        assert_eq!(scored, 1);
        let first = store.get_by_npi("1111111111").unwrap().unwrap();
        rescore_all(&mut store, &config).unwrap();
        let second = store.get_by_npi("1111111111").unwrap().unwrap();
        assert_eq!(first.acquisition_score, second.acquisition_score);
        assert_eq!(first.volume_score, second.volume_score);
        assert!(first.acquisition_score.is_some());
    }
}
