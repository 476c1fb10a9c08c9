//! End-to-end walkthrough of audited saves.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;

use provenant_application::AuditInterceptor;
use provenant_core::{AuditError, AuditResult};
use provenant_domain::{EntityMetadata, PropertyDescriptor, PropertyKind};
use provenant_infrastructure::{InMemoryBackend, PostgresBackend, StorageBackend, Workspace};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> AuditResult<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let backend: Arc<dyn StorageBackend> = match env::var("DATABASE_URL") {
        Ok(database_url) => {
            info!("using the postgres backend");
            Arc::new(PostgresBackend::connect(database_url.as_str()).await?)
        }
        Err(_) => {
            info!("DATABASE_URL is not set, using the in-memory backend");
            Arc::new(InMemoryBackend::new())
        }
    };

    let workspace = Workspace::with_interceptor(backend, Arc::new(AuditInterceptor::new()));
    register_metadata(&workspace).await?;

    // insert an auditable entity
    let entity = workspace
        .insert(
            "test_entity",
            BTreeMap::from([("name".to_owned(), json!("test"))]),
        )
        .await?;
    let written = workspace.save_changes().await?;
    info!(rows = written, "saved the new entity");

    let Some(key) = workspace.entity_key(entity).await? else {
        return Err(AuditError::Internal(
            "no key was issued for the inserted entity".to_owned(),
        ));
    };

    // a relation target that is not audited
    let child = workspace
        .insert(
            "child_entity",
            BTreeMap::from([("label".to_owned(), json!("optional child"))]),
        )
        .await?;
    let written = workspace.save_changes().await?;
    info!(rows = written, "saved the relation target, no audit rows");

    // update one property and attach the relation
    let loaded = workspace.load("test_entity", key).await?;
    workspace
        .update_property(loaded, "name", json!("novo ime"))
        .await?;
    if let Some(child_key) = workspace.entity_key(child).await? {
        workspace
            .update_property(loaded, "child_id", json!(child_key))
            .await?;
    }
    let written = workspace.save_changes().await?;
    info!(rows = written, "saved the updated entity");

    // a batch under a caller-owned transaction
    let transaction_id = workspace.begin_transaction().await?;
    workspace
        .insert(
            "test_entity",
            BTreeMap::from([("name".to_owned(), json!("batched"))]),
        )
        .await?;
    workspace.save_changes().await?;
    workspace.commit_transaction(transaction_id).await?;
    info!("committed the caller-owned transaction");

    for entry in workspace.audit_entries().await? {
        info!(
            entity_type = %entry.entity_type,
            entity_id = entry.entity_id,
            save_changes_key = %entry.save_changes_key,
            old = %entry.old_serialized_properties,
            new = %entry.new_serialized_properties,
            "audit entry"
        );
    }

    Ok(())
}

async fn register_metadata(workspace: &Workspace) -> AuditResult<()> {
    workspace
        .register_entity(EntityMetadata::new(
            "test_entity",
            true,
            vec![
                PropertyDescriptor::new("id", PropertyKind::Integer, true)?,
                PropertyDescriptor::new("name", PropertyKind::Text, false)?,
                PropertyDescriptor::new("update_time", PropertyKind::DateTime, false)?,
                PropertyDescriptor::new("child_id", PropertyKind::Reference, false)?,
            ],
        )?)
        .await?;

    workspace
        .register_entity(EntityMetadata::new(
            "child_entity",
            false,
            vec![
                PropertyDescriptor::new("id", PropertyKind::Integer, true)?,
                PropertyDescriptor::new("label", PropertyKind::Text, false)?,
            ],
        )?)
        .await?;

    Ok(())
}
