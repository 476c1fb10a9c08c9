use async_trait::async_trait;
use provenant_core::{AuditResult, SaveChangesKey, TransactionId};
use provenant_domain::ChangeSnapshot;

use crate::save_ports::{SaveInterceptor, SaveSession};

mod build;
mod extract;

/// Save interceptor that records before/after property snapshots of
/// auditable entities atomically with the save that mutates them.
///
/// The interceptor decides transaction ownership per call tree: with no
/// ambient transaction it opens one and commits it after both the data save
/// and the audit save succeeded; under a caller-owned transaction it runs
/// the same sequence and leaves commit to the caller. Nested saves re-enter
/// the hook and short-circuit on the session's bookkeeping, so each call
/// tree emits its audit rows exactly once.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditInterceptor;

impl AuditInterceptor {
    /// Creates the interceptor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn run_audited_saves(
        &self,
        session: &dyn SaveSession,
        snapshots: Vec<ChangeSnapshot>,
    ) -> AuditResult<()> {
        session.save_underlying().await?;

        if snapshots.is_empty() {
            return Ok(());
        }

        let save_changes_key = SaveChangesKey::new();
        let entries = build::build_audit_entries(session, &snapshots, save_changes_key).await?;
        session.stage_audit_entries(entries).await?;
        session.save_underlying().await?;

        Ok(())
    }
}

#[async_trait]
impl SaveInterceptor for AuditInterceptor {
    async fn saving_changes(&self, session: &dyn SaveSession) -> AuditResult<()> {
        let state = session.operation_state();
        if state.audit_emitted() {
            // reentrant invocation from one of the nested saves below
            return Ok(());
        }

        let snapshots = extract::extract_snapshots(&session.pending_mutations().await?)?;
        state.mark_audit_emitted();

        let self_opened: Option<TransactionId> = if session.has_ambient_transaction().await {
            None
        } else {
            let transaction_id = session.begin_transaction().await?;
            state.mark_transaction_self_opened();
            Some(transaction_id)
        };

        match self.run_audited_saves(session, snapshots).await {
            Ok(()) => {
                if let Some(transaction_id) = self_opened {
                    session.commit_transaction(transaction_id).await?;
                }

                Ok(())
            }
            Err(error) => {
                if let Some(transaction_id) = self_opened {
                    // the save error wins over any rollback failure
                    let _ = session.rollback_transaction(transaction_id).await;
                }

                Err(error)
            }
        }
    }
}
