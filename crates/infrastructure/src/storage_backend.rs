use async_trait::async_trait;
use provenant_core::{AuditResult, TransactionId};
use provenant_domain::AuditEntry;
use serde_json::Value;

/// One entity row write: the full property document persisted under the
/// store key.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpsert {
    /// Logical entity type name.
    pub entity_type: String,
    /// Store key of the row.
    pub key: i64,
    /// JSON object holding every property value.
    pub document: Value,
}

/// Batch handed to the store by one physical save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    /// Entity rows to insert or replace.
    pub entity_upserts: Vec<EntityUpsert>,
    /// Audit rows to append.
    pub audit_entries: Vec<AuditEntry>,
}

impl WriteBatch {
    /// Returns whether the batch writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entity_upserts.is_empty() && self.audit_entries.is_empty()
    }
}

/// Durable store behind the unit of work.
///
/// At most one transaction is open per backend at a time. Writes issued
/// while it is open become visible only on commit; writes issued outside a
/// transaction are applied atomically on their own.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Opens a transaction and returns its handle.
    async fn begin(&self) -> AuditResult<TransactionId>;

    /// Commits the identified transaction.
    async fn commit(&self, transaction_id: TransactionId) -> AuditResult<()>;

    /// Rolls back the identified transaction, discarding its writes.
    async fn rollback(&self, transaction_id: TransactionId) -> AuditResult<()>;

    /// Returns whether a transaction is currently open.
    async fn has_open_transaction(&self) -> bool;

    /// Issues the next store key for an entity type.
    async fn allocate_key(&self, entity_type: &str) -> AuditResult<i64>;

    /// Writes a batch of entity rows and audit rows and returns the number
    /// of rows written.
    async fn persist(&self, batch: &WriteBatch) -> AuditResult<u64>;

    /// Reads one committed entity document.
    async fn fetch_entity(&self, entity_type: &str, key: i64) -> AuditResult<Option<Value>>;

    /// Lists committed audit entries in insertion order.
    async fn list_audit_entries(&self) -> AuditResult<Vec<AuditEntry>>;
}
