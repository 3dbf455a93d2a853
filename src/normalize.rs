use sha2::{Digest, Sha256};

use crate::model::PharmacyRecord;

const ADDRESS_SUBSTITUTIONS: &[(&str, &str)] = &[
    (" STREET", " ST"),
    (" AVENUE", " AVE"),
    (" BOULEVARD", " BLVD"),
    (" DRIVE", " DR"),
    (" ROAD", " RD"),
    (" SUITE", " STE"),
    (" HIGHWAY", " HWY"),
];

const NAME_SUBSTITUTIONS: &[(&str, &str)] = &[(" PHARM ", " PHARMACY "), (" RX ", " PHARMACY ")];

/// Uppercase, trim, collapse internal whitespace, and apply business-token
/// substitutions. Returns None for empty input.
pub fn normalize_name(name: &str) -> Option<String> {
    let mut out = collapse_whitespace(&name.trim().to_uppercase());
    if out.is_empty() {
        return None;
    }
    // Token substitutions match on interior padding; wrap so a leading or
    // trailing token still matches, then trim the padding back off.
    out = format!(" {out} ");
    for (from, to) in NAME_SUBSTITUTIONS {
        out = out.replace(from, to);
    }
    Some(collapse_whitespace(out.trim()))
}

/// Uppercase and standardize street-type suffixes.
pub fn normalize_address(address: &str) -> Option<String> {
    let mut out = collapse_whitespace(&address.trim().to_uppercase());
    if out.is_empty() {
        return None;
    }
    for (from, to) in ADDRESS_SUBSTITUTIONS {
        out = out.replace(from, to);
    }
    Some(collapse_whitespace(&out))
}

/// Format a phone number as `(AAA) BBB-CCCC` when it carries exactly ten
/// digits (after dropping a leading country code 1 from eleven digits).
/// Anything else passes through unchanged; this never fails.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let trimmed = phone.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits.remove(0);
    }
    if digits.len() == 10 {
        Some(format!(
            "({}) {}-{}",
            &digits[0..3],
            &digits[3..6],
            &digits[6..10]
        ))
    } else {
        Some(trimmed.to_string())
    }
}

/// Truncate a postal code to its 5-digit prefix.
pub fn normalize_zip(zip: &str) -> Option<String> {
    let trimmed = zip.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(5).collect())
}

pub fn normalize_state(state: &str) -> Option<String> {
    let out = state.trim().to_uppercase();
    if out.is_empty() { None } else { Some(out) }
}

/// Stable fingerprint over normalized name + address line 1 + ZIP5, for
/// cross-NPI duplicate analysis. Not the upsert key.
pub fn dedup_key(
    organization_name: Option<&str>,
    address_line1: Option<&str>,
    zip: Option<&str>,
) -> String {
    let name = organization_name.unwrap_or("").trim().to_uppercase();
    let addr = address_line1.unwrap_or("").trim().to_uppercase();
    let zip5: String = zip.unwrap_or("").trim().chars().take(5).collect();
    let raw = format!("{name}|{addr}|{zip5}");
    let digest = Sha256::digest(raw.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonicalize every free-text field on a record and stamp its dedup key.
/// Pure transform: unparseable values degrade to None, never to an error.
pub fn normalize_record(record: &mut PharmacyRecord) {
    record.organization_name = record
        .organization_name
        .take()
        .and_then(|v| normalize_name(&v));
    record.dba_name = record.dba_name.take().and_then(|v| normalize_name(&v));
    record.address_line1 = record
        .address_line1
        .take()
        .and_then(|v| normalize_address(&v));
    record.phone = record.phone.take().and_then(|v| normalize_phone(&v));
    record.fax = record.fax.take().and_then(|v| normalize_phone(&v));
    record.authorized_official_phone = record
        .authorized_official_phone
        .take()
        .and_then(|v| normalize_phone(&v));
    record.zip = record.zip.take().and_then(|v| normalize_zip(&v));
    record.state = record.state.take().and_then(|v| normalize_state(&v));
    record.dedup_key = Some(dedup_key(
        record.organization_name.as_deref(),
        record.address_line1.as_deref(),
        record.zip.as_deref(),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_ten_digits_formats() {
        assert_eq!(
            normalize_phone("5551234567").as_deref(),
            Some("(555) 123-4567")
        );
        assert_eq!(
            normalize_phone("555-123-4567").as_deref(),
            Some("(555) 123-4567")
        );
        assert_eq!(
            normalize_phone("(555) 123.4567").as_deref(),
            Some("(555) 123-4567")
        );
    }

    #[test]
    fn phone_eleven_digits_drops_leading_one() {
        assert_eq!(
            normalize_phone("15551234567").as_deref(),
            Some("(555) 123-4567")
        );
    }

    #[test]
    fn phone_other_lengths_pass_through() {
        assert_eq!(normalize_phone("12345").as_deref(), Some("12345"));
        assert_eq!(
            normalize_phone("555123456789").as_deref(),
            Some("555123456789")
        );
        assert_eq!(normalize_phone("   "), None);
    }

    #[test]
    fn name_uppercases_and_substitutes() {
        assert_eq!(
            normalize_name("main  st pharm ").as_deref(),
            Some("MAIN ST PHARMACY")
        );
        assert_eq!(
            normalize_name("corner rx inc").as_deref(),
            Some("CORNER PHARMACY INC")
        );
        assert_eq!(normalize_name(""), None);
    }

    #[test]
    fn address_standardizes_street_types() {
        assert_eq!(
            normalize_address("123 Oak Street Suite 4").as_deref(),
            Some("123 OAK ST STE 4")
        );
        assert_eq!(
            normalize_address("9 county highway").as_deref(),
            Some("9 COUNTY HWY")
        );
    }

    #[test]
    fn zip_truncates_to_five() {
        assert_eq!(normalize_zip("30301-1234").as_deref(), Some("30301"));
        assert_eq!(normalize_zip("303").as_deref(), Some("303"));
    }

    #[test]
    fn dedup_key_is_stable_and_case_insensitive() {
        let a = dedup_key(Some("Main St Pharmacy"), Some("123 Oak St"), Some("30301"));
        let b = dedup_key(Some("MAIN ST PHARMACY"), Some("123 OAK ST"), Some("30301-1234"));
        assert_eq!(a, b);
        let c = dedup_key(Some("Other Pharmacy"), Some("123 Oak St"), Some("30301"));
        assert_ne!(a, c);
    }
}
