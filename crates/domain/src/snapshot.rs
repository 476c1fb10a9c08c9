use std::collections::{BTreeMap, BTreeSet};

use provenant_core::{AuditError, AuditResult, MutationHandle, NonEmptyString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::{EntityIdentity, MutationKind};

/// Immutable pre-save snapshot of one audited entity's scalar properties.
///
/// Captured strictly before the underlying save mutates state. The changed
/// property set and the old-value map always cover the same keys, so the
/// diff built from this snapshot is symmetric by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSnapshot {
    entity_type: NonEmptyString,
    handle: MutationHandle,
    kind: MutationKind,
    identity: EntityIdentity,
    changed_properties: BTreeSet<String>,
    old_values: BTreeMap<String, Value>,
}

impl ChangeSnapshot {
    /// Creates a validated snapshot.
    ///
    /// The old-value keys must match the changed property set exactly, and
    /// the scope must be non-empty: an entity with nothing in scope
    /// produces no snapshot at all.
    pub fn new(
        entity_type: impl Into<String>,
        handle: MutationHandle,
        kind: MutationKind,
        identity: EntityIdentity,
        old_values: BTreeMap<String, Value>,
    ) -> AuditResult<Self> {
        let entity_type = NonEmptyString::new(entity_type)?;

        if old_values.is_empty() {
            return Err(AuditError::Validation(format!(
                "snapshot for entity type '{entity_type}' has an empty property scope"
            )));
        }

        let changed_properties: BTreeSet<String> = old_values.keys().cloned().collect();

        Ok(Self {
            entity_type,
            handle,
            kind,
            identity,
            changed_properties,
            old_values,
        })
    }

    /// Returns the logical entity type name.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        self.entity_type.as_str()
    }

    /// Returns the handle of the tracked mutation this snapshot was taken
    /// from.
    #[must_use]
    pub fn handle(&self) -> MutationHandle {
        self.handle
    }

    /// Returns the mutation kind at capture time.
    #[must_use]
    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    /// Returns the entity identity as known at capture time.
    #[must_use]
    pub fn identity(&self) -> EntityIdentity {
        self.identity
    }

    /// Returns the names of the properties in audit scope.
    #[must_use]
    pub fn changed_properties(&self) -> &BTreeSet<String> {
        &self.changed_properties
    }

    /// Returns the pre-save values of the scoped properties.
    #[must_use]
    pub fn old_values(&self) -> &BTreeMap<String, Value> {
        &self.old_values
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use provenant_core::{CorrelationToken, MutationHandle};
    use serde_json::json;

    use super::{ChangeSnapshot, EntityIdentity, MutationKind};

    #[test]
    fn snapshot_scope_mirrors_old_value_keys() {
        let old_values =
            BTreeMap::from([("name".to_owned(), json!("test")), ("age".to_owned(), json!(3))]);
        let snapshot = ChangeSnapshot::new(
            "test_entity",
            MutationHandle::new(),
            MutationKind::Update,
            EntityIdentity::Known(7),
            old_values,
        );
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(error) => panic!("snapshot construction failed: {error}"),
        };
        assert_eq!(snapshot.changed_properties().len(), 2);
        assert!(snapshot.changed_properties().contains("name"));
        assert!(snapshot.changed_properties().contains("age"));
    }

    #[test]
    fn empty_scope_is_rejected() {
        let snapshot = ChangeSnapshot::new(
            "test_entity",
            MutationHandle::new(),
            MutationKind::Insert,
            EntityIdentity::Pending(CorrelationToken::new()),
            BTreeMap::new(),
        );
        assert!(snapshot.is_err());
    }
}
