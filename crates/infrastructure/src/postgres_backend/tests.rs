use chrono::Utc;
use provenant_core::SaveChangesKey;
use provenant_domain::AuditEntry;
use serde_json::json;
use uuid::Uuid;

use super::PostgresBackend;
use crate::storage_backend::{EntityUpsert, StorageBackend, WriteBatch};

async fn test_backend() -> Option<PostgresBackend> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    match PostgresBackend::connect(database_url.as_str()).await {
        Ok(backend) => Some(backend),
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    }
}

fn unique_entity_type() -> String {
    format!("test_entity_{}", Uuid::new_v4().simple())
}

fn batch_for(entity_type: &str, key: i64) -> WriteBatch {
    WriteBatch {
        entity_upserts: vec![EntityUpsert {
            entity_type: entity_type.to_owned(),
            key,
            document: json!({ "id": key, "name": "test" }),
        }],
        audit_entries: vec![AuditEntry {
            entity_type: entity_type.to_owned(),
            entity_id: key,
            old_serialized_properties: r#"{"name":null}"#.to_owned(),
            new_serialized_properties: r#"{"name":"test"}"#.to_owned(),
            save_changes_key: SaveChangesKey::new(),
            recorded_at: Utc::now(),
        }],
    }
}

async fn audit_rows_for(backend: &PostgresBackend, entity_type: &str) -> Vec<AuditEntry> {
    let entries = backend.list_audit_entries().await;
    assert!(entries.is_ok());
    entries
        .unwrap_or_default()
        .into_iter()
        .filter(|entry| entry.entity_type == entity_type)
        .collect()
}

#[tokio::test]
async fn autonomous_persist_writes_both_row_kinds() {
    let Some(backend) = test_backend().await else {
        return;
    };
    let entity_type = unique_entity_type();

    let key = match backend.allocate_key(entity_type.as_str()).await {
        Ok(key) => key,
        Err(error) => panic!("key allocation failed: {error}"),
    };

    let written = backend.persist(&batch_for(entity_type.as_str(), key)).await;
    assert_eq!(written.ok(), Some(2));

    let fetched = backend.fetch_entity(entity_type.as_str(), key).await;
    assert!(fetched.is_ok_and(|document| document.is_some()));
    assert_eq!(audit_rows_for(&backend, entity_type.as_str()).await.len(), 1);
}

#[tokio::test]
async fn rolled_back_transaction_leaves_no_rows() {
    let Some(backend) = test_backend().await else {
        return;
    };
    let entity_type = unique_entity_type();

    let transaction_id = match backend.begin().await {
        Ok(transaction_id) => transaction_id,
        Err(error) => panic!("begin failed: {error}"),
    };
    assert!(backend.persist(&batch_for(entity_type.as_str(), 1)).await.is_ok());
    assert!(backend.rollback(transaction_id).await.is_ok());

    let fetched = backend.fetch_entity(entity_type.as_str(), 1).await;
    assert!(fetched.is_ok_and(|document| document.is_none()));
    assert!(audit_rows_for(&backend, entity_type.as_str()).await.is_empty());
}

#[tokio::test]
async fn committed_transaction_makes_rows_visible_together() {
    let Some(backend) = test_backend().await else {
        return;
    };
    let entity_type = unique_entity_type();

    let transaction_id = match backend.begin().await {
        Ok(transaction_id) => transaction_id,
        Err(error) => panic!("begin failed: {error}"),
    };
    assert!(backend.persist(&batch_for(entity_type.as_str(), 1)).await.is_ok());

    let fetched = backend.fetch_entity(entity_type.as_str(), 1).await;
    assert!(fetched.is_ok_and(|document| document.is_none()));

    assert!(backend.commit(transaction_id).await.is_ok());

    let fetched = backend.fetch_entity(entity_type.as_str(), 1).await;
    assert!(fetched.is_ok_and(|document| document.is_some()));
    assert_eq!(audit_rows_for(&backend, entity_type.as_str()).await.len(), 1);
}
