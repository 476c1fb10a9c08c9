use std::str::FromStr;

use provenant_core::{AuditError, AuditResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value categories for persisted entity properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// UTF-8 string property.
    Text,
    /// Whole-number property.
    Integer,
    /// Floating-point property.
    Float,
    /// Boolean property.
    Boolean,
    /// RFC 3339 date-time string property.
    DateTime,
    /// Key of a related entity; never part of an audited diff.
    Reference,
}

impl PropertyKind {
    /// Returns a stable storage value for the property kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
            Self::Reference => "reference",
        }
    }

    /// Returns whether values of this kind enter audit scope.
    ///
    /// Every kind except `Reference` is scalar; text is scalar
    /// unconditionally.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Reference)
    }

    /// Checks that a JSON value matches this kind. Null is accepted for
    /// every kind.
    pub fn validate_value(self, value: &Value) -> AuditResult<()> {
        if value.is_null() {
            return Ok(());
        }

        let is_valid = match self {
            Self::Text | Self::DateTime => value.is_string(),
            Self::Integer | Self::Reference => value.as_i64().is_some(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
        };

        if !is_valid {
            return Err(AuditError::Validation(format!(
                "value does not match property kind '{}'",
                self.as_str()
            )));
        }

        Ok(())
    }
}

impl FromStr for PropertyKind {
    type Err = AuditError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(Self::Text),
            "integer" => Ok(Self::Integer),
            "float" => Ok(Self::Float),
            "boolean" => Ok(Self::Boolean),
            "datetime" => Ok(Self::DateTime),
            "reference" => Ok(Self::Reference),
            _ => Err(AuditError::Validation(format!(
                "unknown property kind '{value}'"
            ))),
        }
    }
}

/// Declared shape of a single entity property, supplied by the persistence
/// layer's metadata rather than discovered by reflection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    name: NonEmptyString,
    kind: PropertyKind,
    is_identity: bool,
}

impl PropertyDescriptor {
    /// Creates a validated property descriptor.
    ///
    /// Identity properties must be integer-kinded because persisted audit
    /// rows record the entity key as an integer value.
    pub fn new(
        name: impl Into<String>,
        kind: PropertyKind,
        is_identity: bool,
    ) -> AuditResult<Self> {
        if is_identity && kind != PropertyKind::Integer {
            return Err(AuditError::Validation(format!(
                "identity properties must be integer-kinded, got '{}'",
                kind.as_str()
            )));
        }

        Ok(Self {
            name: NonEmptyString::new(name)?,
            kind,
            is_identity,
        })
    }

    /// Returns the property name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the property kind.
    #[must_use]
    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// Returns whether this property is the entity key.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.is_identity
    }

    /// Returns whether this property enters audit scope: scalar-kinded and
    /// not the entity key itself.
    #[must_use]
    pub fn is_audit_scoped(&self) -> bool {
        self.kind.is_scalar() && !self.is_identity
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::json;

    use super::{PropertyDescriptor, PropertyKind};

    #[test]
    fn kind_roundtrip_storage_value() {
        let kind = PropertyKind::DateTime;
        let restored = PropertyKind::from_str(kind.as_str());
        assert!(restored.is_ok());
        assert_eq!(restored.unwrap_or(PropertyKind::Text), kind);
    }

    #[test]
    fn references_are_not_scalar() {
        assert!(!PropertyKind::Reference.is_scalar());
        assert!(PropertyKind::Text.is_scalar());
        assert!(PropertyKind::DateTime.is_scalar());
    }

    #[test]
    fn null_matches_every_kind() {
        for kind in [
            PropertyKind::Text,
            PropertyKind::Integer,
            PropertyKind::Float,
            PropertyKind::Boolean,
            PropertyKind::DateTime,
            PropertyKind::Reference,
        ] {
            assert!(kind.validate_value(&json!(null)).is_ok());
        }
    }

    #[test]
    fn mismatched_value_is_rejected() {
        assert!(PropertyKind::Integer.validate_value(&json!("five")).is_err());
        assert!(PropertyKind::Boolean.validate_value(&json!(1)).is_err());
    }

    #[test]
    fn identity_must_be_integer_kinded() {
        let descriptor = PropertyDescriptor::new("id", PropertyKind::Text, true);
        assert!(descriptor.is_err());
    }

    #[test]
    fn identity_is_never_audit_scoped() {
        let descriptor = PropertyDescriptor::new("id", PropertyKind::Integer, true);
        assert!(descriptor.is_ok_and(|descriptor| !descriptor.is_audit_scoped()));
    }
}
