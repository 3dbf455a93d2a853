use anyhow::{Context, Result};
use regex::Regex;

use crate::model::PharmacyRecord;

/// Named chains in specificity order; first match wins and assigns the
/// canonical parent label.
const NAMED_CHAINS: &[(&str, &str)] = &[
    ("CVS", r"\bCVS\b"),
    ("WALGREENS", r"\bWALGREEN"),
    ("WALMART", r"\bWALMART\b"),
    ("RITE AID", r"\bRITE\s*AID\b"),
    ("KROGER", r"\bKROGER\b"),
    ("COSTCO", r"\bCOSTCO\b"),
    ("SAM'S CLUB", r"\bSAM'?S\s+CLUB\b"),
    ("TARGET", r"\bTARGET\b"),
    ("PUBLIX", r"\bPUBLIX\b"),
    ("H-E-B", r"\bH[\-\s]?E[\-\s]?B\b"),
    ("ALBERTSONS", r"\bALBERTSON"),
    ("SAFEWAY", r"\bSAFEWAY\b"),
    ("MEIJER", r"\bMEIJER\b"),
    ("WINN-DIXIE", r"\bWINN[\-\s]?DIXIE\b"),
    ("OMNICARE", r"\bOMNICARE\b"),
    ("PHARMERICA", r"\bPHARMERICA\b"),
    ("GENOA", r"\bGENOA\b"),
    ("EXPRESS SCRIPTS", r"\bEXPRESS\s+SCRIPTS\b"),
    ("OPTUM RX", r"\bOPTUM\s+RX\b"),
    ("AMAZON PHARMACY", r"\bAMAZON\s+PHARMACY\b"),
];

/// Generic retail / PBM / LTC operator keywords. A match marks the record as
/// chain without a named parent.
const CHAIN_INDICATORS: &[&str] = &[
    r"\bGIANT\b",
    r"\bSHOPRITE\b",
    r"\bWEGMAN",
    r"\bHY[\-\s]?VEE\b",
    r"\bFRED\s+MEYER\b",
    r"\bHARRIS\s+TEETER\b",
    r"\bKINDRED\b",
    r"\bBRIGHTSPRING\b",
    r"\bCARDINAL\s+HEALTH\b",
    r"\bMCKESSON\b",
    r"\bAMERISOURCE\b",
    r"\bCIGNA\b",
    r"\bCAPSULE\b",
    r"\bALTO\s+PHARMACY\b",
    r"\bPHARMHOUSE\b",
];

const INSTITUTIONAL_INDICATORS: &[&str] = &[
    r"\bHOSPITAL\b",
    r"\bMEDICAL\s+CENTER\b",
    r"\bNURSING\b",
    r"\bLONG[\-\s]?TERM\s+CARE\b",
    r"\bLTC\b",
    r"\bSKILLED\s+NURSING\b",
    r"\bREHAB\b",
    r"\bASS?ISTED\s+LIVING\b",
    r"\bINFUSION\b",
    r"\bCORRECTIONAL\b",
    r"\bPRISON\b",
    r"\bVETERANS?\b",
];

pub const MULTI_LOCATION_PARENT: &str = "Multi-Location Operator";

/// Compiled pattern tables. Built once per run and passed in, so alternate
/// tables can be substituted in tests without touching control flow.
#[derive(Debug)]
pub struct ClassifierConfig {
    named_chains: Vec<(String, Regex)>,
    chain_indicators: Vec<Regex>,
    institutional_indicators: Vec<Regex>,
    /// Independent records sharing a name at least this many times are
    /// reclassified as a chain by the post-load pass.
    pub multi_location_threshold: u32,
}

impl ClassifierConfig {
    pub fn new() -> Result<Self> {
        let mut named_chains = Vec::with_capacity(NAMED_CHAINS.len());
        for (parent, pattern) in NAMED_CHAINS {
            let re = Regex::new(pattern)
                .with_context(|| format!("invalid chain pattern for {parent}"))?;
            named_chains.push((parent.to_string(), re));
        }
        Ok(Self {
            named_chains,
            chain_indicators: compile_all(CHAIN_INDICATORS).context("chain indicator patterns")?,
            institutional_indicators: compile_all(INSTITUTIONAL_INDICATORS)
                .context("institutional indicator patterns")?,
            multi_location_threshold: 10,
        })
    }
}

fn compile_all(patterns: &[&str]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).with_context(|| format!("invalid pattern {p}")))
        .collect()
}

/// Set chain/independent/institutional flags, the chain parent label, and the
/// ownership type on a normalized record. Exactly one of chain/independent is
/// true afterwards; institutional may co-occur with either.
pub fn classify(config: &ClassifierConfig, record: &mut PharmacyRecord) {
    let combined = format!(
        "{} {}",
        record.organization_name.as_deref().unwrap_or("").to_uppercase(),
        record.dba_name.as_deref().unwrap_or("").to_uppercase()
    );

    record.is_chain = false;
    record.is_independent = true;
    record.is_institutional = false;
    record.chain_parent = None;

    for (parent, pattern) in &config.named_chains {
        if pattern.is_match(&combined) {
            record.is_chain = true;
            record.is_independent = false;
            record.chain_parent = Some(parent.clone());
            break;
        }
    }

    if !record.is_chain {
        for pattern in &config.chain_indicators {
            if pattern.is_match(&combined) {
                record.is_chain = true;
                record.is_independent = false;
                break;
            }
        }
    }

    for pattern in &config.institutional_indicators {
        if pattern.is_match(&combined) {
            record.is_institutional = true;
            break;
        }
    }

    record.ownership_type = Some(ownership_type(record.organization_name.as_deref()).to_string());
}

/// Entity-structure label inferred from name tokens.
pub fn ownership_type(organization_name: Option<&str>) -> &'static str {
    let name = organization_name.unwrap_or("").to_uppercase();
    if name.contains("PLLC") {
        "Professional Corporation"
    } else if name.contains("LLC") {
        "LLC"
    } else if name.contains("INC") || name.contains("INCORPORATED") {
        "Corporation"
    } else if name.contains("LLP") || name.contains("PARTNERSHIP") {
        "Partnership"
    } else if name.contains("PC") {
        "Professional Corporation"
    } else {
        "Unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, dba: Option<&str>) -> PharmacyRecord {
        PharmacyRecord {
            npi: "1234567890".to_string(),
            organization_name: Some(name.to_string()),
            dba_name: dba.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn cvs_matches_regardless_of_casing_and_context() {
        let config = ClassifierConfig::new().unwrap();
        for name in ["cvs pharmacy #1234", "CVS", "Downtown cVs Store"] {
            let mut r = record(name, None);
            classify(&config, &mut r);
            assert!(r.is_chain, "{name}");
            assert!(!r.is_independent);
            assert_eq!(r.chain_parent.as_deref(), Some("CVS"));
        }
    }

    #[test]
    fn named_match_wins_over_generic_indicator() {
        let config = ClassifierConfig::new().unwrap();
        let mut r = record("OMNICARE LTC SERVICES", None);
        classify(&config, &mut r);
        assert_eq!(r.chain_parent.as_deref(), Some("OMNICARE"));
        assert!(r.is_institutional);
    }

    #[test]
    fn generic_indicator_sets_chain_without_parent() {
        let config = ClassifierConfig::new().unwrap();
        let mut r = record("MCKESSON SPECIALTY", None);
        classify(&config, &mut r);
        assert!(r.is_chain);
        assert!(r.chain_parent.is_none());
    }

    #[test]
    fn dba_name_participates_in_matching() {
        let config = ClassifierConfig::new().unwrap();
        let mut r = record("ACME HOLDINGS LLC", Some("Walgreens #551"));
        classify(&config, &mut r);
        assert_eq!(r.chain_parent.as_deref(), Some("WALGREENS"));
    }

    #[test]
    fn independent_with_institutional_overlay() {
        let config = ClassifierConfig::new().unwrap();
        let mut r = record("COUNTY HOSPITAL OUTPATIENT PHARMACY", None);
        classify(&config, &mut r);
        assert!(r.is_independent);
        assert!(!r.is_chain);
        assert!(r.is_institutional);
    }

    #[test]
    fn exactly_one_of_chain_independent() {
        let config = ClassifierConfig::new().unwrap();
        for name in ["CVS", "MAIN ST PHARMACY", "VETERANS INFUSION CENTER"] {
            let mut r = record(name, None);
            classify(&config, &mut r);
            assert!(r.is_chain ^ r.is_independent, "{name}");
        }
    }

    #[test]
    fn ownership_labels() {
        assert_eq!(ownership_type(Some("MAIN ST PHARMACY LLC")), "LLC");
        assert_eq!(ownership_type(Some("ACME DRUG INC")), "Corporation");
        assert_eq!(ownership_type(Some("SMITH & JONES PARTNERSHIP")), "Partnership");
        assert_eq!(ownership_type(Some("JONES PHARMACY PLLC")), "Professional Corporation");
        assert_eq!(ownership_type(Some("CORNER DRUGS")), "Unknown");
        assert_eq!(ownership_type(None), "Unknown");
    }
}
