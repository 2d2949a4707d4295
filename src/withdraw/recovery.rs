//! Recovery Runner.
//!
//! On process start — before any new work is accepted — every cached
//! withdrawal request left without a correlation id by a prior crash is
//! re-driven through the engine's resolution path, reusing its original
//! idempotency key. The partner collapses repeated deliveries under the same
//! key, so re-driving can never double-spend.
//!
//! Runs sequentially; one entry failing is logged and never aborts recovery
//! of the rest.

use tracing::{error, info};

use super::{WithdrawError, WithdrawStatus, WithdrawalEngine};

/// Tally of one recovery pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Partner accepted; entry now carries a correlation id.
    pub confirmed: usize,
    /// Partner definitively rejected; user credited back.
    pub refunded: usize,
    /// Still indeterminate; entry stays queued for the next run.
    pub still_pending: usize,
    /// Local error while settling an outcome (entry untouched).
    pub failed: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.confirmed + self.refunded + self.still_pending + self.failed
    }
}

pub async fn run_recovery(engine: &WithdrawalEngine) -> RecoveryReport {
    let pending = engine.store().pending_requests();
    if pending.is_empty() {
        info!("No unresolved withdrawal requests to recover");
        return RecoveryReport::default();
    }

    info!(count = pending.len(), "Recovering unresolved withdrawal requests");
    let mut report = RecoveryReport::default();

    for request in pending {
        info!(key = %request.key, user_id = %request.user_id, "Re-driving withdrawal request");
        match engine.resolve(&request).await {
            Ok(WithdrawStatus::Accepted { .. }) => report.confirmed += 1,
            Ok(WithdrawStatus::Pending { .. }) => report.still_pending += 1,
            Err(WithdrawError::PartnerRejected { .. }) => report.refunded += 1,
            Err(e) => {
                error!(key = %request.key, error = %e, "Failed to recover withdrawal request");
                report.failed += 1;
            }
        }
    }

    info!(
        confirmed = report.confirmed,
        refunded = report.refunded,
        still_pending = report.still_pending,
        failed = report.failed,
        "Recovery pass complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserAccount;
    use crate::money::Amount;
    use crate::partner::CallOutcome;
    use crate::partner::mock::MockGateway;
    use crate::store::{EventEffect, LedgerStore};
    use crate::withdraw::WithdrawTo;
    use chrono::Utc;
    use std::sync::Arc;

    fn seeded_store(dir: &tempfile::TempDir) -> Arc<LedgerStore> {
        let store = Arc::new(LedgerStore::open(dir.path()).unwrap());
        store
            .provision_user(UserAccount::new("u1", "player"))
            .unwrap();
        store
            .apply_event(
                0,
                EventEffect::Deposit {
                    user_id: "u1".into(),
                    wallet_account: "wallet-u1".into(),
                    amount: Amount::tether(10_000),
                    at: Utc::now(),
                },
            )
            .unwrap();
        store
    }

    /// Leave one indeterminate request behind, "crash", and reopen.
    async fn crash_with_pending(dir: &tempfile::TempDir) -> uuid::Uuid {
        let store = seeded_store(dir);
        let partner = Arc::new(MockGateway::new());
        partner.script_outcome(CallOutcome::Indeterminate);
        let engine = WithdrawalEngine::new(store, partner);

        let status = engine
            .request_withdrawal("u1", WithdrawTo::LinkedWallet, Amount::tether(3000))
            .await
            .unwrap();
        match status {
            WithdrawStatus::Pending { key } => key,
            other => panic!("expected Pending, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recovery_confirms_with_original_key() {
        // Scenario C, confirmed branch: after restart the entry resolves to
        // Accepted, balance stays debited, and the partner saw the SAME
        // idempotency key both times.
        let dir = tempfile::tempdir().unwrap();
        let key = crash_with_pending(&dir).await;

        let store = Arc::new(LedgerStore::open(dir.path()).unwrap());
        assert_eq!(store.balance("u1").unwrap(), 7000);
        let partner = Arc::new(MockGateway::new());
        partner.script_outcome(CallOutcome::Accepted {
            correlation_id: "proc-9".into(),
        });
        let engine = WithdrawalEngine::new(store.clone(), partner.clone());

        let report = run_recovery(&engine).await;
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.total(), 1);

        assert_eq!(store.balance("u1").unwrap(), 7000);
        let entry = store.request(&key).unwrap();
        assert_eq!(entry.correlation_id.as_deref(), Some("proc-9"));
        assert_eq!(partner.submissions(), vec![key]);

        // Resolved exactly once: a second pass finds nothing to do.
        let report = run_recovery(&engine).await;
        assert_eq!(report.total(), 0);
        assert_eq!(partner.submissions(), vec![key]);
    }

    #[tokio::test]
    async fn test_recovery_refunds_on_rejection() {
        // Scenario C, rejected branch: balance returns to 100 and the entry
        // is gone.
        let dir = tempfile::tempdir().unwrap();
        let key = crash_with_pending(&dir).await;

        let store = Arc::new(LedgerStore::open(dir.path()).unwrap());
        let partner = Arc::new(MockGateway::new());
        partner.script_outcome(CallOutcome::Rejected {
            reason: "partner returned 400: expired".into(),
        });
        let engine = WithdrawalEngine::new(store.clone(), partner);

        let report = run_recovery(&engine).await;
        assert_eq!(report.refunded, 1);
        assert_eq!(store.balance("u1").unwrap(), 10_000);
        assert!(store.request(&key).is_none());
    }

    #[tokio::test]
    async fn test_recovery_leaves_indeterminate_pending() {
        let dir = tempfile::tempdir().unwrap();
        let key = crash_with_pending(&dir).await;

        let store = Arc::new(LedgerStore::open(dir.path()).unwrap());
        let partner = Arc::new(MockGateway::new());
        partner.script_outcome(CallOutcome::Indeterminate);
        let engine = WithdrawalEngine::new(store.clone(), partner);

        let report = run_recovery(&engine).await;
        assert_eq!(report.still_pending, 1);
        assert_eq!(store.balance("u1").unwrap(), 7000);
        assert_eq!(store.pending_requests()[0].key, key);
    }

    #[tokio::test]
    async fn test_entries_resolve_independently() {
        // Two pending entries with opposite outcomes; the first one's
        // rejection must not stop the second from confirming.
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);
        let partner = Arc::new(MockGateway::new());
        partner.script_outcome(CallOutcome::Indeterminate);
        partner.script_outcome(CallOutcome::Indeterminate);
        let engine = WithdrawalEngine::new(store.clone(), partner);
        for _ in 0..2 {
            engine
                .request_withdrawal("u1", WithdrawTo::LinkedWallet, Amount::tether(1000))
                .await
                .unwrap();
        }
        assert_eq!(store.pending_requests().len(), 2);

        let partner = Arc::new(MockGateway::new());
        partner.script_outcome(CallOutcome::Rejected {
            reason: "partner returned 400".into(),
        });
        partner.script_outcome(CallOutcome::Accepted {
            correlation_id: "proc-2".into(),
        });
        let engine = WithdrawalEngine::new(store.clone(), partner);

        let report = run_recovery(&engine).await;
        assert_eq!(report.refunded, 1);
        assert_eq!(report.confirmed, 1);
        assert_eq!(store.balance("u1").unwrap(), 9000);
        assert!(store.pending_requests().is_empty());
    }
}
