//! Audit data model and invariants.

#![forbid(unsafe_code)]

mod audit_entry;
mod identity;
mod metadata;
mod property;
mod serialize;
mod snapshot;

pub use audit_entry::AuditEntry;
pub use identity::{EntityIdentity, MutationKind};
pub use metadata::EntityMetadata;
pub use property::{PropertyDescriptor, PropertyKind};
pub use serialize::serialize_scalar_map;
pub use snapshot::ChangeSnapshot;
