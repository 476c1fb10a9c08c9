use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use provenant_core::{AuditResult, MutationHandle, TransactionId};
use provenant_domain::{AuditEntry, MutationKind, PropertyDescriptor};
use serde_json::Value;

/// Pre-save state of one tracked property, as reported by the persistence
/// layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyState {
    /// Declared shape of the property.
    pub descriptor: PropertyDescriptor,
    /// Last-known persisted value; null for inserts, which have no prior
    /// state.
    pub original: Value,
    /// Whether the persistence layer flagged the property as changed.
    pub is_modified: bool,
}

/// One pending entity mutation reported by the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEntry {
    /// Stable handle for this mutation within the current unit of work.
    pub handle: MutationHandle,
    /// Logical entity type name.
    pub entity_type: String,
    /// Whether the mutation inserts a new entity or updates an existing one.
    pub kind: MutationKind,
    /// Whether the entity type opted into auditing.
    pub is_auditable: bool,
    /// Pre-save state of every declared property.
    pub properties: Vec<PropertyState>,
}

/// Post-save state of one entity, read back through its mutation handle.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentEntityState {
    /// Store-issued entity key.
    pub key: i64,
    /// Current value of every declared property.
    pub properties: BTreeMap<String, Value>,
}

/// Per-call-tree bookkeeping that keeps the save hook idempotent under
/// reentrant invocation.
///
/// One instance lives in the session created at the outermost save entry and
/// is dropped on every exit path, so the flags can never leak into an
/// unrelated save operation.
#[derive(Debug, Default)]
pub struct SaveOperationState {
    audit_emitted: AtomicBool,
    transaction_self_opened: AtomicBool,
}

impl SaveOperationState {
    /// Creates cleared bookkeeping for a new save call tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the audit sequence already ran in this call tree.
    #[must_use]
    pub fn audit_emitted(&self) -> bool {
        self.audit_emitted.load(Ordering::SeqCst)
    }

    /// Records that the audit sequence ran; later reentrant invocations
    /// short-circuit on this flag.
    pub fn mark_audit_emitted(&self) {
        self.audit_emitted.store(true, Ordering::SeqCst);
    }

    /// Returns whether the interceptor opened the transaction itself.
    #[must_use]
    pub fn transaction_self_opened(&self) -> bool {
        self.transaction_self_opened.load(Ordering::SeqCst)
    }

    /// Records that the interceptor opened the transaction and therefore
    /// owns its commit or rollback.
    pub fn mark_transaction_self_opened(&self) {
        self.transaction_self_opened.store(true, Ordering::SeqCst);
    }
}

/// The persistence-layer surface one save call tree runs against.
///
/// A session is created per outermost save and shared by every nested save
/// the hook triggers; `save_underlying` re-enters the registered hook
/// exactly like the caller-facing save does.
#[async_trait]
pub trait SaveSession: Send + Sync {
    /// Returns the pending entity mutations of the current unit of work.
    async fn pending_mutations(&self) -> AuditResult<Vec<MutationEntry>>;

    /// Returns whether a transaction is already open for this session,
    /// whoever opened it.
    async fn has_ambient_transaction(&self) -> bool;

    /// Opens a transaction and returns its handle.
    async fn begin_transaction(&self) -> AuditResult<TransactionId>;

    /// Commits the identified transaction.
    async fn commit_transaction(&self, transaction_id: TransactionId) -> AuditResult<()>;

    /// Rolls back the identified transaction.
    async fn rollback_transaction(&self, transaction_id: TransactionId) -> AuditResult<()>;

    /// Runs the underlying save pipeline for whatever is currently pending.
    async fn save_underlying(&self) -> AuditResult<u64>;

    /// Adds audit entries to the pending set; the next save writes them.
    async fn stage_audit_entries(&self, entries: Vec<AuditEntry>) -> AuditResult<()>;

    /// Reads the post-save state of the mutation identified by `handle`, or
    /// `None` when no such mutation was applied in this session.
    async fn current_state(
        &self,
        handle: MutationHandle,
    ) -> AuditResult<Option<CurrentEntityState>>;

    /// Returns the call tree's bookkeeping flags.
    fn operation_state(&self) -> &SaveOperationState;
}

/// Hook invoked immediately before a save physically executes.
#[async_trait]
pub trait SaveInterceptor: Send + Sync {
    /// Observes (and may augment) the save represented by `session`.
    ///
    /// Returning an error aborts the save. Implementations must tolerate
    /// reentrant invocation: the hook runs again for every nested save they
    /// trigger through the session.
    async fn saving_changes(&self, session: &dyn SaveSession) -> AuditResult<()>;
}
