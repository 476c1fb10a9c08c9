use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provenant_core::{AuditError, AuditResult, SaveChangesKey, TransactionId};
use provenant_domain::AuditEntry;
use serde_json::Value;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::storage_backend::{StorageBackend, WriteBatch};

#[cfg(test)]
mod tests;

/// Embedded schema migrations for the Postgres backend.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// PostgreSQL-backed storage backend.
///
/// Entity rows are stored as `jsonb` documents keyed by entity type and
/// store key; audit rows land in `audit_entries`. While a transaction is
/// open every write goes through its connection, and dropping the backend
/// with an uncommitted transaction rolls it back.
pub struct PostgresBackend {
    pool: PgPool,
    open_transaction: Mutex<Option<OpenTransaction>>,
}

struct OpenTransaction {
    id: TransactionId,
    transaction: Transaction<'static, Postgres>,
}

impl PostgresBackend {
    /// Creates a backend over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            open_transaction: Mutex::new(None),
        }
    }

    /// Connects to the database and applies pending migrations.
    pub async fn connect(database_url: &str) -> AuditResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .map_err(|error| {
                AuditError::Persistence(format!("failed to connect to database: {error}"))
            })?;

        MIGRATOR.run(&pool).await.map_err(|error| {
            AuditError::Persistence(format!("failed to run migrations: {error}"))
        })?;

        Ok(Self::new(pool))
    }
}

#[derive(Debug, FromRow)]
struct AuditEntryRow {
    entity_type: String,
    entity_id: i64,
    old_serialized_properties: String,
    new_serialized_properties: String,
    save_changes_key: Uuid,
    recorded_at: DateTime<Utc>,
}

impl From<AuditEntryRow> for AuditEntry {
    fn from(row: AuditEntryRow) -> Self {
        Self {
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            old_serialized_properties: row.old_serialized_properties,
            new_serialized_properties: row.new_serialized_properties,
            save_changes_key: SaveChangesKey::from_uuid(row.save_changes_key),
            recorded_at: row.recorded_at,
        }
    }
}

async fn write_batch(
    transaction: &mut Transaction<'static, Postgres>,
    batch: &WriteBatch,
) -> AuditResult<u64> {
    let mut written = 0;

    for upsert in &batch.entity_upserts {
        sqlx::query(
            r#"
            INSERT INTO entity_documents (entity_type, id, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (entity_type, id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(upsert.entity_type.as_str())
        .bind(upsert.key)
        .bind(&upsert.document)
        .execute(&mut **transaction)
        .await
        .map_err(|error| {
            AuditError::Persistence(format!(
                "failed to write entity document '{}/{}': {error}",
                upsert.entity_type, upsert.key
            ))
        })?;
        written += 1;
    }

    for entry in &batch.audit_entries {
        sqlx::query(
            r#"
            INSERT INTO audit_entries (
                entity_type,
                entity_id,
                old_serialized_properties,
                new_serialized_properties,
                save_changes_key,
                recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.entity_type.as_str())
        .bind(entry.entity_id)
        .bind(entry.old_serialized_properties.as_str())
        .bind(entry.new_serialized_properties.as_str())
        .bind(entry.save_changes_key.as_uuid())
        .bind(entry.recorded_at)
        .execute(&mut **transaction)
        .await
        .map_err(|error| {
            AuditError::Persistence(format!(
                "failed to append audit entry for '{}/{}': {error}",
                entry.entity_type, entry.entity_id
            ))
        })?;
        written += 1;
    }

    Ok(written)
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    async fn begin(&self) -> AuditResult<TransactionId> {
        let mut open = self.open_transaction.lock().await;
        if open.is_some() {
            return Err(AuditError::Contract(
                "a transaction is already open".to_owned(),
            ));
        }

        let transaction = self.pool.begin().await.map_err(|error| {
            AuditError::Persistence(format!("failed to start transaction: {error}"))
        })?;

        let id = TransactionId::new();
        *open = Some(OpenTransaction { id, transaction });
        debug!(transaction = %id, "opened postgres transaction");
        Ok(id)
    }

    async fn commit(&self, transaction_id: TransactionId) -> AuditResult<()> {
        let mut open = self.open_transaction.lock().await;
        let entry = open.take().ok_or_else(|| {
            AuditError::Contract("commit without an open transaction".to_owned())
        })?;

        if entry.id != transaction_id {
            *open = Some(entry);
            return Err(AuditError::Contract(format!(
                "commit of unknown transaction '{transaction_id}'"
            )));
        }

        entry.transaction.commit().await.map_err(|error| {
            AuditError::Persistence(format!("failed to commit transaction: {error}"))
        })?;
        debug!(transaction = %transaction_id, "committed postgres transaction");
        Ok(())
    }

    async fn rollback(&self, transaction_id: TransactionId) -> AuditResult<()> {
        let mut open = self.open_transaction.lock().await;
        let entry = open.take().ok_or_else(|| {
            AuditError::Contract("rollback without an open transaction".to_owned())
        })?;

        if entry.id != transaction_id {
            *open = Some(entry);
            return Err(AuditError::Contract(format!(
                "rollback of unknown transaction '{transaction_id}'"
            )));
        }

        entry.transaction.rollback().await.map_err(|error| {
            AuditError::Persistence(format!("failed to roll back transaction: {error}"))
        })?;
        debug!(transaction = %transaction_id, "rolled back postgres transaction");
        Ok(())
    }

    async fn has_open_transaction(&self) -> bool {
        self.open_transaction.lock().await.is_some()
    }

    async fn allocate_key(&self, entity_type: &str) -> AuditResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT nextval('entity_document_keys')")
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                AuditError::Persistence(format!(
                    "failed to allocate key for entity type '{entity_type}': {error}"
                ))
            })
    }

    async fn persist(&self, batch: &WriteBatch) -> AuditResult<u64> {
        let mut open = self.open_transaction.lock().await;

        match open.as_mut() {
            Some(entry) => write_batch(&mut entry.transaction, batch).await,
            None => {
                // autonomous write, atomic on its own
                let mut transaction = self.pool.begin().await.map_err(|error| {
                    AuditError::Persistence(format!("failed to start transaction: {error}"))
                })?;
                let written = write_batch(&mut transaction, batch).await?;
                transaction.commit().await.map_err(|error| {
                    AuditError::Persistence(format!("failed to commit transaction: {error}"))
                })?;
                Ok(written)
            }
        }
    }

    async fn fetch_entity(&self, entity_type: &str, key: i64) -> AuditResult<Option<Value>> {
        sqlx::query_scalar::<_, Value>(
            r#"
            SELECT data
            FROM entity_documents
            WHERE entity_type = $1 AND id = $2
            "#,
        )
        .bind(entity_type)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AuditError::Persistence(format!(
                "failed to fetch entity document '{entity_type}/{key}': {error}"
            ))
        })
    }

    async fn list_audit_entries(&self) -> AuditResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditEntryRow>(
            r#"
            SELECT
                entity_type,
                entity_id,
                old_serialized_properties,
                new_serialized_properties,
                save_changes_key,
                recorded_at
            FROM audit_entries
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AuditError::Persistence(format!("failed to list audit entries: {error}"))
        })?;

        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }
}
