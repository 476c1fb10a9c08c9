use std::collections::HashSet;

use provenant_core::{AuditError, AuditResult, NonEmptyString};
use serde::{Deserialize, Serialize};

use crate::property::PropertyDescriptor;

/// Metadata for one persisted entity type: its property descriptors and
/// whether the type opted into auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    entity_type: NonEmptyString,
    is_auditable: bool,
    properties: Vec<PropertyDescriptor>,
}

impl EntityMetadata {
    /// Creates validated entity metadata.
    ///
    /// Property names must be unique and exactly one descriptor must be the
    /// identity, since every persisted row is keyed by it.
    pub fn new(
        entity_type: impl Into<String>,
        is_auditable: bool,
        properties: Vec<PropertyDescriptor>,
    ) -> AuditResult<Self> {
        let entity_type = NonEmptyString::new(entity_type)?;

        let mut seen = HashSet::new();
        for descriptor in &properties {
            if !seen.insert(descriptor.name().to_owned()) {
                return Err(AuditError::Validation(format!(
                    "duplicate property '{}' on entity type '{entity_type}'",
                    descriptor.name()
                )));
            }
        }

        let identity_count = properties
            .iter()
            .filter(|descriptor| descriptor.is_identity())
            .count();
        if identity_count != 1 {
            return Err(AuditError::Validation(format!(
                "entity type '{entity_type}' declares {identity_count} identity properties, expected exactly one"
            )));
        }

        Ok(Self {
            entity_type,
            is_auditable,
            properties,
        })
    }

    /// Returns the logical entity type name.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        self.entity_type.as_str()
    }

    /// Returns whether entities of this type are audited on save.
    #[must_use]
    pub fn is_auditable(&self) -> bool {
        self.is_auditable
    }

    /// Returns all property descriptors.
    #[must_use]
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    /// Looks up a descriptor by property name.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|descriptor| descriptor.name() == name)
    }

    /// Returns the identity property descriptor.
    pub fn identity(&self) -> AuditResult<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|descriptor| descriptor.is_identity())
            .ok_or_else(|| {
                AuditError::Contract(format!(
                    "entity type '{}' has no identity property",
                    self.entity_type
                ))
            })
    }
}
