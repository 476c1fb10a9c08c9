use std::collections::BTreeMap;

use chrono::Utc;
use provenant_core::{AuditError, AuditResult, SaveChangesKey};
use provenant_domain::{AuditEntry, ChangeSnapshot, serialize_scalar_map};
use serde_json::Value;

use crate::save_ports::SaveSession;

/// Joins pre-save snapshots with post-save entity state into audit entries.
///
/// Matching goes through the mutation handle, never through the real key:
/// insert snapshots were captured before the store issued one. The key read
/// back here is the resolved identity written into the entry. A scoped
/// property missing from the post-save state is recorded as null so the
/// old and new maps always cover the same keys.
pub(crate) async fn build_audit_entries(
    session: &dyn SaveSession,
    snapshots: &[ChangeSnapshot],
    save_changes_key: SaveChangesKey,
) -> AuditResult<Vec<AuditEntry>> {
    let mut entries = Vec::with_capacity(snapshots.len());

    for snapshot in snapshots {
        let current = session
            .current_state(snapshot.handle())
            .await?
            .ok_or_else(|| {
                AuditError::Contract(format!(
                    "no live entity of type '{}' matches snapshot '{}'",
                    snapshot.entity_type(),
                    snapshot.identity()
                ))
            })?;

        let mut new_values = BTreeMap::new();
        for name in snapshot.changed_properties() {
            let value = current
                .properties
                .get(name)
                .cloned()
                .unwrap_or(Value::Null);
            new_values.insert(name.clone(), value);
        }

        entries.push(AuditEntry {
            entity_type: snapshot.entity_type().to_owned(),
            entity_id: current.key,
            old_serialized_properties: serialize_scalar_map(snapshot.old_values())?,
            new_serialized_properties: serialize_scalar_map(&new_values)?,
            save_changes_key,
            recorded_at: Utc::now(),
        });
    }

    Ok(entries)
}
