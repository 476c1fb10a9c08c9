use std::collections::HashMap;

use async_trait::async_trait;
use provenant_core::{AuditError, AuditResult, TransactionId};
use provenant_domain::AuditEntry;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::storage_backend::{StorageBackend, WriteBatch};

/// In-memory storage backend.
///
/// Writes issued inside an open transaction land in a journal that is
/// applied on commit and discarded on rollback, so an aborted save leaves
/// neither entity rows nor audit rows behind.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: RwLock<BackendState>,
}

#[derive(Debug, Default)]
struct BackendState {
    entities: HashMap<(String, i64), Value>,
    audit_entries: Vec<AuditEntry>,
    key_sequences: HashMap<String, i64>,
    open_transaction: Option<OpenTransaction>,
}

#[derive(Debug)]
struct OpenTransaction {
    id: TransactionId,
    journal: WriteBatch,
}

impl InMemoryBackend {
    /// Creates an empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply(state: &mut BackendState, batch: &WriteBatch) -> u64 {
    let mut written = 0;

    for upsert in &batch.entity_upserts {
        state
            .entities
            .insert((upsert.entity_type.clone(), upsert.key), upsert.document.clone());
        written += 1;
    }

    for entry in &batch.audit_entries {
        state.audit_entries.push(entry.clone());
        written += 1;
    }

    written
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn begin(&self) -> AuditResult<TransactionId> {
        let mut state = self.state.write().await;
        if state.open_transaction.is_some() {
            return Err(AuditError::Contract(
                "a transaction is already open".to_owned(),
            ));
        }

        let id = TransactionId::new();
        state.open_transaction = Some(OpenTransaction {
            id,
            journal: WriteBatch::default(),
        });
        debug!(transaction = %id, "opened in-memory transaction");
        Ok(id)
    }

    async fn commit(&self, transaction_id: TransactionId) -> AuditResult<()> {
        let mut state = self.state.write().await;
        let transaction = state.open_transaction.take().ok_or_else(|| {
            AuditError::Contract("commit without an open transaction".to_owned())
        })?;

        if transaction.id != transaction_id {
            state.open_transaction = Some(transaction);
            return Err(AuditError::Contract(format!(
                "commit of unknown transaction '{transaction_id}'"
            )));
        }

        let written = apply(&mut state, &transaction.journal);
        debug!(transaction = %transaction_id, rows = written, "committed in-memory transaction");
        Ok(())
    }

    async fn rollback(&self, transaction_id: TransactionId) -> AuditResult<()> {
        let mut state = self.state.write().await;
        let transaction = state.open_transaction.take().ok_or_else(|| {
            AuditError::Contract("rollback without an open transaction".to_owned())
        })?;

        if transaction.id != transaction_id {
            state.open_transaction = Some(transaction);
            return Err(AuditError::Contract(format!(
                "rollback of unknown transaction '{transaction_id}'"
            )));
        }

        debug!(transaction = %transaction_id, "rolled back in-memory transaction");
        Ok(())
    }

    async fn has_open_transaction(&self) -> bool {
        self.state.read().await.open_transaction.is_some()
    }

    async fn allocate_key(&self, entity_type: &str) -> AuditResult<i64> {
        let mut state = self.state.write().await;
        let next = state.key_sequences.entry(entity_type.to_owned()).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    async fn persist(&self, batch: &WriteBatch) -> AuditResult<u64> {
        let mut state = self.state.write().await;

        match state.open_transaction.as_mut() {
            Some(transaction) => {
                transaction
                    .journal
                    .entity_upserts
                    .extend(batch.entity_upserts.iter().cloned());
                transaction
                    .journal
                    .audit_entries
                    .extend(batch.audit_entries.iter().cloned());
                Ok((batch.entity_upserts.len() + batch.audit_entries.len()) as u64)
            }
            None => Ok(apply(&mut state, batch)),
        }
    }

    async fn fetch_entity(&self, entity_type: &str, key: i64) -> AuditResult<Option<Value>> {
        let state = self.state.read().await;
        Ok(state
            .entities
            .get(&(entity_type.to_owned(), key))
            .cloned())
    }

    async fn list_audit_entries(&self) -> AuditResult<Vec<AuditEntry>> {
        Ok(self.state.read().await.audit_entries.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::InMemoryBackend;
    use crate::storage_backend::{EntityUpsert, StorageBackend, WriteBatch};

    fn batch(key: i64) -> WriteBatch {
        WriteBatch {
            entity_upserts: vec![EntityUpsert {
                entity_type: "test_entity".to_owned(),
                key,
                document: json!({ "id": key }),
            }],
            audit_entries: Vec::new(),
        }
    }

    #[tokio::test]
    async fn writes_outside_a_transaction_are_immediately_visible() {
        let backend = InMemoryBackend::new();
        let written = backend.persist(&batch(1)).await;
        assert_eq!(written.ok(), Some(1));

        let fetched = backend.fetch_entity("test_entity", 1).await;
        assert!(fetched.is_ok_and(|document| document.is_some()));
    }

    #[tokio::test]
    async fn journaled_writes_become_visible_on_commit() {
        let backend = InMemoryBackend::new();
        let transaction_id = match backend.begin().await {
            Ok(transaction_id) => transaction_id,
            Err(error) => panic!("begin failed: {error}"),
        };

        assert!(backend.persist(&batch(1)).await.is_ok());
        assert!(backend
            .fetch_entity("test_entity", 1)
            .await
            .is_ok_and(|document| document.is_none()));

        assert!(backend.commit(transaction_id).await.is_ok());
        assert!(backend
            .fetch_entity("test_entity", 1)
            .await
            .is_ok_and(|document| document.is_some()));
    }

    #[tokio::test]
    async fn rollback_discards_the_journal() {
        let backend = InMemoryBackend::new();
        let transaction_id = match backend.begin().await {
            Ok(transaction_id) => transaction_id,
            Err(error) => panic!("begin failed: {error}"),
        };

        assert!(backend.persist(&batch(1)).await.is_ok());
        assert!(backend.rollback(transaction_id).await.is_ok());
        assert!(backend
            .fetch_entity("test_entity", 1)
            .await
            .is_ok_and(|document| document.is_none()));
    }

    #[tokio::test]
    async fn key_allocation_is_monotonic_per_entity_type() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.allocate_key("test_entity").await.ok(), Some(1));
        assert_eq!(backend.allocate_key("test_entity").await.ok(), Some(2));
        assert_eq!(backend.allocate_key("child_entity").await.ok(), Some(1));
    }

    #[tokio::test]
    async fn only_one_transaction_may_be_open() {
        let backend = InMemoryBackend::new();
        assert!(backend.begin().await.is_ok());
        assert!(backend.begin().await.is_err());
    }
}
