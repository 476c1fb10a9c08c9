use std::collections::BTreeMap;

use provenant_core::{AuditError, AuditResult, CorrelationToken};
use provenant_domain::{ChangeSnapshot, EntityIdentity, MutationKind};

use crate::save_ports::MutationEntry;

/// Selects auditable mutations and captures their pre-save scalar state.
///
/// Updates scope to the properties the persistence layer flagged as
/// modified; inserts scope to every scalar property, since everything
/// changed relative to non-existence. Entities with an empty scope produce
/// no snapshot.
pub(crate) fn extract_snapshots(entries: &[MutationEntry]) -> AuditResult<Vec<ChangeSnapshot>> {
    let mut snapshots = Vec::new();

    for entry in entries.iter().filter(|entry| entry.is_auditable) {
        let identity = entry_identity(entry)?;

        let mut old_values = BTreeMap::new();
        for state in &entry.properties {
            if !state.descriptor.is_audit_scoped() {
                continue;
            }

            if entry.kind == MutationKind::Update && !state.is_modified {
                continue;
            }

            old_values.insert(state.descriptor.name().to_owned(), state.original.clone());
        }

        if old_values.is_empty() {
            continue;
        }

        snapshots.push(ChangeSnapshot::new(
            entry.entity_type.as_str(),
            entry.handle,
            entry.kind,
            identity,
            old_values,
        )?);
    }

    Ok(snapshots)
}

fn entry_identity(entry: &MutationEntry) -> AuditResult<EntityIdentity> {
    let identity_state = entry
        .properties
        .iter()
        .find(|state| state.descriptor.is_identity())
        .ok_or_else(|| {
            AuditError::Contract(format!(
                "auditable entity type '{}' exposes no identity property",
                entry.entity_type
            ))
        })?;

    match entry.kind {
        // the real key does not exist until the store issues it
        MutationKind::Insert => Ok(EntityIdentity::Pending(CorrelationToken::new())),
        MutationKind::Update => identity_state
            .original
            .as_i64()
            .map(EntityIdentity::Known)
            .ok_or_else(|| {
                AuditError::Contract(format!(
                    "entity type '{}' carries a non-integer identity value",
                    entry.entity_type
                ))
            }),
    }
}
