use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::config::DeactivationPolicy;
use crate::model::{ChangeEvent, ChangeKind};
use crate::store::Store;

/// The fixed subset of fields compared between the pre-run snapshot and the
/// post-run state. One `updated` event is emitted per differing field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedFields {
    pub organization_name: Option<String>,
    pub dba_name: Option<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub phone: Option<String>,
    pub is_chain: bool,
    pub is_independent: bool,
    pub chain_parent: Option<String>,
    pub authorized_official_name: Option<String>,
}

impl TrackedFields {
    /// String representation per tracked field. Nulls render as the empty
    /// string so a populated->null transition is a visible change.
    fn rendered(&self) -> Vec<(&'static str, String)> {
        fn text(value: &Option<String>) -> String {
            value.clone().unwrap_or_default()
        }
        vec![
            ("organization_name", text(&self.organization_name)),
            ("dba_name", text(&self.dba_name)),
            ("address_line1", text(&self.address_line1)),
            ("city", text(&self.city)),
            ("state", text(&self.state)),
            ("zip", text(&self.zip)),
            ("phone", text(&self.phone)),
            ("is_chain", self.is_chain.to_string()),
            ("is_independent", self.is_independent.to_string()),
            ("chain_parent", text(&self.chain_parent)),
            (
                "authorized_official_name",
                text(&self.authorized_official_name),
            ),
        ]
    }
}

/// Field-level diff between two tracked snapshots.
pub fn diff_tracked(before: &TrackedFields, after: &TrackedFields) -> Vec<(&'static str, String, String)> {
    before
        .rendered()
        .into_iter()
        .zip(after.rendered())
        .filter(|((_, old), (_, new))| old != new)
        .map(|((field, old), (_, new))| (field, old, new))
        .collect()
}

/// Compare the pre-run snapshot against the post-run store and append change
/// events: one `new` event per inserted NPI, one `updated` event per changed
/// tracked field, and (policy permitting) one `deactivated` event per
/// snapshot NPI absent from the current extract. Returns the event count.
pub fn detect_changes(
    store: &mut Store,
    snapshot: &HashMap<String, TrackedFields>,
    new_npis: &HashSet<String>,
    updated_npis: &HashSet<String>,
    policy: DeactivationPolicy,
    detected_at: &str,
) -> Result<u64> {
    let mut events = Vec::new();

    let mut sorted_new: Vec<&String> = new_npis.iter().collect();
    sorted_new.sort();
    for npi in sorted_new {
        let Some((org_name, _)) = store.tracked_for_npi(npi)? else {
            continue;
        };
        events.push(ChangeEvent {
            npi: npi.clone(),
            organization_name: org_name.clone(),
            kind: ChangeKind::New,
            field_changed: "all".to_string(),
            old_value: None,
            new_value: Some(format!(
                "New pharmacy: {}",
                org_name.as_deref().unwrap_or("(unnamed)")
            )),
            detected_at: detected_at.to_string(),
        });
    }

    let mut sorted_updated: Vec<&String> = updated_npis.iter().collect();
    sorted_updated.sort();
    for npi in sorted_updated {
        let Some(before) = snapshot.get(npi.as_str()) else {
            continue;
        };
        let Some((org_name, after)) = store.tracked_for_npi(npi)? else {
            continue;
        };
        for (field, old, new) in diff_tracked(before, &after) {
            events.push(ChangeEvent {
                npi: npi.clone(),
                organization_name: org_name.clone(),
                kind: ChangeKind::Updated,
                field_changed: field.to_string(),
                old_value: Some(old),
                new_value: Some(new),
                detected_at: detected_at.to_string(),
            });
        }
    }

    if policy == DeactivationPolicy::FlagMissing {
        let mut missing: Vec<&String> = snapshot
            .keys()
            .filter(|npi| !new_npis.contains(*npi) && !updated_npis.contains(*npi))
            .collect();
        missing.sort();
        for npi in missing {
            let before = &snapshot[npi];
            events.push(ChangeEvent {
                npi: npi.clone(),
                organization_name: before.organization_name.clone(),
                kind: ChangeKind::Deactivated,
                field_changed: "all".to_string(),
                old_value: before.organization_name.clone(),
                new_value: None,
                detected_at: detected_at.to_string(),
            });
        }
    }

    let count = events.len() as u64;
    store.insert_change_events(&events)?;
    Ok(count)
}
