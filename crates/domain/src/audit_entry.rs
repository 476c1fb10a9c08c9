use chrono::{DateTime, Utc};
use provenant_core::SaveChangesKey;
use serde::{Deserialize, Serialize};

/// One persisted audit row: the serialized before/after state of a single
/// audited entity within one save operation.
///
/// Reference properties are never serialized into either map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Logical entity type name.
    pub entity_type: String,
    /// Store-issued entity key, resolved after the underlying save.
    pub entity_id: i64,
    /// Canonical serialization of the scoped properties before the save.
    pub old_serialized_properties: String,
    /// Canonical serialization of the same properties after the save.
    pub new_serialized_properties: String,
    /// Entries with the same key were written by the same save operation.
    pub save_changes_key: SaveChangesKey,
    /// When the entry was built.
    pub recorded_at: DateTime<Utc>,
}
