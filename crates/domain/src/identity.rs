use std::fmt::{Display, Formatter};

use provenant_core::CorrelationToken;
use serde::{Deserialize, Serialize};

/// Kind of pending mutation reported by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// A newly added entity without a store-issued key yet.
    Insert,
    /// A change to an entity that already exists in the store.
    Update,
}

impl MutationKind {
    /// Returns a stable storage value for the mutation kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
        }
    }
}

/// Identity of an entity as known at snapshot time.
///
/// Updates carry the real store key. Inserts carry a synthetic token until
/// the underlying save has issued a key; audit correlation never relies on
/// the real key before then.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityIdentity {
    /// The store-issued entity key.
    Known(i64),
    /// A synthetic identity for an entity that is not persisted yet.
    Pending(CorrelationToken),
}

impl EntityIdentity {
    /// Returns the real key if the store has issued one.
    #[must_use]
    pub fn known_key(&self) -> Option<i64> {
        match self {
            Self::Known(key) => Some(*key),
            Self::Pending(_) => None,
        }
    }

    /// Returns whether this identity is still synthetic.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl Display for EntityIdentity {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(key) => write!(formatter, "{key}"),
            Self::Pending(token) => write!(formatter, "pending:{token}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use provenant_core::CorrelationToken;

    use super::EntityIdentity;

    #[test]
    fn known_identity_exposes_key() {
        let identity = EntityIdentity::Known(42);
        assert_eq!(identity.known_key(), Some(42));
        assert!(!identity.is_pending());
    }

    #[test]
    fn pending_identity_has_no_key() {
        let identity = EntityIdentity::Pending(CorrelationToken::new());
        assert_eq!(identity.known_key(), None);
        assert!(identity.is_pending());
        assert!(identity.to_string().starts_with("pending:"));
    }
}
