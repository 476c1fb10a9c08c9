use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use provenant_application::{
    CurrentEntityState, MutationEntry, PropertyState, SaveInterceptor, SaveOperationState,
    SaveSession,
};
use provenant_core::{AuditError, AuditResult, MutationHandle, TransactionId};
use provenant_domain::{AuditEntry, EntityMetadata, MutationKind};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::storage_backend::{EntityUpsert, StorageBackend, WriteBatch};


/// Unit of work over a storage backend: registers entity metadata, tracks
/// pending mutations, assigns store keys on insert, and drives the
/// registered save interceptor.
///
/// One workspace serves one logical save call tree at a time, like a
/// request-scoped persistence context. Concurrent call trees each use their
/// own workspace over a shared backend; the per-tree bookkeeping lives in a
/// session object created at the outermost save entry, so parallel trees
/// can never observe each other's flags.
pub struct Workspace {
    backend: Arc<dyn StorageBackend>,
    interceptor: Option<Arc<dyn SaveInterceptor>>,
    metadata: RwLock<HashMap<String, EntityMetadata>>,
    tracker: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    entries: Vec<TrackedMutation>,
    staged_audit: Vec<AuditEntry>,
    applied: HashMap<MutationHandle, CurrentEntityState>,
}

struct TrackedMutation {
    handle: MutationHandle,
    entity_type: String,
    kind: MutationKind,
    key: Option<i64>,
    original: BTreeMap<String, Value>,
    current: BTreeMap<String, Value>,
    modified: BTreeSet<String>,
}

impl Workspace {
    /// Creates a workspace that saves without interception.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            interceptor: None,
            metadata: RwLock::new(HashMap::new()),
            tracker: Mutex::new(TrackerState::default()),
        }
    }

    /// Creates a workspace whose saves run through the provided hook.
    #[must_use]
    pub fn with_interceptor(
        backend: Arc<dyn StorageBackend>,
        interceptor: Arc<dyn SaveInterceptor>,
    ) -> Self {
        Self {
            backend,
            interceptor: Some(interceptor),
            metadata: RwLock::new(HashMap::new()),
            tracker: Mutex::new(TrackerState::default()),
        }
    }

    /// Registers metadata for one entity type.
    pub async fn register_entity(&self, metadata: EntityMetadata) -> AuditResult<()> {
        let mut registry = self.metadata.write().await;
        let entity_type = metadata.entity_type().to_owned();
        if registry.contains_key(entity_type.as_str()) {
            return Err(AuditError::Validation(format!(
                "entity type '{entity_type}' is already registered"
            )));
        }

        registry.insert(entity_type, metadata);
        Ok(())
    }

    /// Starts tracking a new entity; the store issues its key on save.
    pub async fn insert(
        &self,
        entity_type: &str,
        values: BTreeMap<String, Value>,
    ) -> AuditResult<MutationHandle> {
        let registry = self.metadata.read().await;
        let metadata = registry.get(entity_type).ok_or_else(|| {
            AuditError::NotFound(format!("entity type '{entity_type}' is not registered"))
        })?;

        for (name, value) in &values {
            let descriptor = metadata.descriptor(name).ok_or_else(|| {
                AuditError::Validation(format!(
                    "unknown property '{name}' on entity type '{entity_type}'"
                ))
            })?;

            if descriptor.is_identity() {
                return Err(AuditError::Validation(format!(
                    "the store issues '{name}' for entity type '{entity_type}'"
                )));
            }

            descriptor.kind().validate_value(value)?;
        }

        let mut original = BTreeMap::new();
        let mut current = BTreeMap::new();
        for descriptor in metadata.properties() {
            original.insert(descriptor.name().to_owned(), Value::Null);
            let value = values.get(descriptor.name()).cloned().unwrap_or(Value::Null);
            current.insert(descriptor.name().to_owned(), value);
        }

        let handle = MutationHandle::new();
        self.tracker.lock().await.entries.push(TrackedMutation {
            handle,
            entity_type: entity_type.to_owned(),
            kind: MutationKind::Insert,
            key: None,
            original,
            current,
            modified: values.into_keys().collect(),
        });

        Ok(handle)
    }

    /// Loads a committed entity into the tracker for updating.
    pub async fn load(&self, entity_type: &str, key: i64) -> AuditResult<MutationHandle> {
        let registry = self.metadata.read().await;
        let metadata = registry.get(entity_type).ok_or_else(|| {
            AuditError::NotFound(format!("entity type '{entity_type}' is not registered"))
        })?;

        let document = self
            .backend
            .fetch_entity(entity_type, key)
            .await?
            .ok_or_else(|| {
                AuditError::NotFound(format!("no entity '{entity_type}/{key}' in the store"))
            })?;

        let stored = match document {
            Value::Object(map) => map,
            other => {
                return Err(AuditError::Internal(format!(
                    "entity document '{entity_type}/{key}' is not an object: {other}"
                )));
            }
        };

        let mut values = BTreeMap::new();
        for descriptor in metadata.properties() {
            let value = stored.get(descriptor.name()).cloned().unwrap_or(Value::Null);
            values.insert(descriptor.name().to_owned(), value);
        }

        let handle = MutationHandle::new();
        self.tracker.lock().await.entries.push(TrackedMutation {
            handle,
            entity_type: entity_type.to_owned(),
            kind: MutationKind::Update,
            key: Some(key),
            original: values.clone(),
            current: values,
            modified: BTreeSet::new(),
        });

        Ok(handle)
    }

    /// Changes one property of a tracked entity and flags it as modified.
    pub async fn update_property(
        &self,
        handle: MutationHandle,
        name: &str,
        value: Value,
    ) -> AuditResult<()> {
        let registry = self.metadata.read().await;
        let mut tracker = self.tracker.lock().await;
        let entry = tracker
            .entries
            .iter_mut()
            .find(|entry| entry.handle == handle)
            .ok_or_else(|| {
                AuditError::NotFound(format!("no tracked mutation for handle '{handle}'"))
            })?;

        let metadata = registry.get(entry.entity_type.as_str()).ok_or_else(|| {
            AuditError::Internal(format!(
                "tracked entity type '{}' lost its metadata",
                entry.entity_type
            ))
        })?;

        let descriptor = metadata.descriptor(name).ok_or_else(|| {
            AuditError::Validation(format!(
                "unknown property '{name}' on entity type '{}'",
                entry.entity_type
            ))
        })?;

        if descriptor.is_identity() {
            return Err(AuditError::Validation(format!(
                "identity property '{name}' cannot be modified"
            )));
        }

        descriptor.kind().validate_value(&value)?;
        entry.current.insert(name.to_owned(), value);
        entry.modified.insert(name.to_owned());
        Ok(())
    }

    /// Returns the store key issued to a tracked mutation by the last save.
    pub async fn entity_key(&self, handle: MutationHandle) -> AuditResult<Option<i64>> {
        Ok(self
            .tracker
            .lock()
            .await
            .applied
            .get(&handle)
            .map(|state| state.key))
    }

    /// Opens a caller-owned transaction; later saves join it and leave the
    /// commit to the caller.
    pub async fn begin_transaction(&self) -> AuditResult<TransactionId> {
        self.backend.begin().await
    }

    /// Commits a caller-owned transaction.
    pub async fn commit_transaction(&self, transaction_id: TransactionId) -> AuditResult<()> {
        self.backend.commit(transaction_id).await
    }

    /// Rolls back a caller-owned transaction.
    pub async fn rollback_transaction(&self, transaction_id: TransactionId) -> AuditResult<()> {
        self.backend.rollback(transaction_id).await
    }

    /// Saves every pending mutation and returns the number of rows written
    /// across the whole call tree, audit rows included.
    pub async fn save_changes(&self) -> AuditResult<u64> {
        self.tracker.lock().await.applied.clear();

        let session = WorkspaceSession::new(self);
        session.run().await?;
        Ok(session.rows_written.load(Ordering::SeqCst))
    }

    /// Reads one committed entity document.
    pub async fn find_entity(&self, entity_type: &str, key: i64) -> AuditResult<Option<Value>> {
        self.backend.fetch_entity(entity_type, key).await
    }

    /// Lists committed audit entries in insertion order.
    pub async fn audit_entries(&self) -> AuditResult<Vec<AuditEntry>> {
        self.backend.list_audit_entries().await
    }

    async fn identity_name(&self, entity_type: &str) -> AuditResult<String> {
        let registry = self.metadata.read().await;
        let metadata = registry.get(entity_type).ok_or_else(|| {
            AuditError::Internal(format!(
                "tracked entity type '{entity_type}' lost its metadata"
            ))
        })?;

        Ok(metadata.identity()?.name().to_owned())
    }
}

/// One save call tree: shared by the outermost save and every nested save
/// the hook triggers, and dropped on every exit path together with its
/// bookkeeping flags.
struct WorkspaceSession<'a> {
    workspace: &'a Workspace,
    state: SaveOperationState,
    rows_written: AtomicU64,
}

impl<'a> WorkspaceSession<'a> {
    fn new(workspace: &'a Workspace) -> Self {
        Self {
            workspace,
            state: SaveOperationState::new(),
            rows_written: AtomicU64::new(0),
        }
    }

    async fn run(&self) -> AuditResult<u64> {
        if let Some(interceptor) = self.workspace.interceptor.as_ref() {
            interceptor.saving_changes(self).await?;
        }

        let written = self.apply_pending().await?;
        self.rows_written.fetch_add(written, Ordering::SeqCst);
        Ok(written)
    }

    async fn apply_pending(&self) -> AuditResult<u64> {
        let (entries, staged) = {
            let mut tracker = self.workspace.tracker.lock().await;
            (
                std::mem::take(&mut tracker.entries),
                std::mem::take(&mut tracker.staged_audit),
            )
        };

        if entries.is_empty() && staged.is_empty() {
            return Ok(0);
        }

        let mut upserts = Vec::with_capacity(entries.len());
        let mut applied = Vec::with_capacity(entries.len());
        for mut entry in entries {
            let key = match (entry.kind, entry.key) {
                (MutationKind::Insert, _) => {
                    self.workspace
                        .backend
                        .allocate_key(entry.entity_type.as_str())
                        .await?
                }
                (MutationKind::Update, Some(key)) => key,
                (MutationKind::Update, None) => {
                    return Err(AuditError::Internal(format!(
                        "tracked update of '{}' has no store key",
                        entry.entity_type
                    )));
                }
            };

            let identity_name = self
                .workspace
                .identity_name(entry.entity_type.as_str())
                .await?;
            entry.current.insert(identity_name, Value::from(key));

            let document: Map<String, Value> = entry
                .current
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            upserts.push(EntityUpsert {
                entity_type: entry.entity_type.clone(),
                key,
                document: Value::Object(document),
            });
            applied.push((
                entry.handle,
                CurrentEntityState {
                    key,
                    properties: entry.current,
                },
            ));
        }

        let batch = WriteBatch {
            entity_upserts: upserts,
            audit_entries: staged,
        };
        let written = self.workspace.backend.persist(&batch).await?;

        let mut tracker = self.workspace.tracker.lock().await;
        for (handle, state) in applied {
            tracker.applied.insert(handle, state);
        }

        debug!(rows = written, "applied pending mutations");
        Ok(written)
    }
}

#[async_trait]
impl SaveSession for WorkspaceSession<'_> {
    async fn pending_mutations(&self) -> AuditResult<Vec<MutationEntry>> {
        let registry = self.workspace.metadata.read().await;
        let tracker = self.workspace.tracker.lock().await;

        let mut mutations = Vec::with_capacity(tracker.entries.len());
        for entry in &tracker.entries {
            let metadata = registry.get(entry.entity_type.as_str()).ok_or_else(|| {
                AuditError::Internal(format!(
                    "tracked entity type '{}' lost its metadata",
                    entry.entity_type
                ))
            })?;

            let properties = metadata
                .properties()
                .iter()
                .map(|descriptor| PropertyState {
                    descriptor: descriptor.clone(),
                    original: entry
                        .original
                        .get(descriptor.name())
                        .cloned()
                        .unwrap_or(Value::Null),
                    is_modified: entry.modified.contains(descriptor.name()),
                })
                .collect();

            mutations.push(MutationEntry {
                handle: entry.handle,
                entity_type: entry.entity_type.clone(),
                kind: entry.kind,
                is_auditable: metadata.is_auditable(),
                properties,
            });
        }

        Ok(mutations)
    }

    async fn has_ambient_transaction(&self) -> bool {
        self.workspace.backend.has_open_transaction().await
    }

    async fn begin_transaction(&self) -> AuditResult<TransactionId> {
        self.workspace.backend.begin().await
    }

    async fn commit_transaction(&self, transaction_id: TransactionId) -> AuditResult<()> {
        self.workspace.backend.commit(transaction_id).await
    }

    async fn rollback_transaction(&self, transaction_id: TransactionId) -> AuditResult<()> {
        self.workspace.backend.rollback(transaction_id).await
    }

    async fn save_underlying(&self) -> AuditResult<u64> {
        self.run().await
    }

    async fn stage_audit_entries(&self, entries: Vec<AuditEntry>) -> AuditResult<()> {
        self.workspace
            .tracker
            .lock()
            .await
            .staged_audit
            .extend(entries);
        Ok(())
    }

    async fn current_state(
        &self,
        handle: MutationHandle,
    ) -> AuditResult<Option<CurrentEntityState>> {
        Ok(self
            .workspace
            .tracker
            .lock()
            .await
            .applied
            .get(&handle)
            .cloned())
    }

    fn operation_state(&self) -> &SaveOperationState {
        &self.state
    }
}
