//! Withdrawal Engine — turns a withdrawal intent into an idempotent,
//! retryable partner call with local debit/credit compensation.
//!
//! The sequence is rigid: validate, then debit + cache-insert as one atomic
//! store op, then (and only then) talk to the partner. The three-way outcome
//! classification drives what happens to the debit:
//!
//! - confirmed: correlation id recorded, entry kept forever;
//! - definitively rejected: compensating credit, entry removed;
//! - indeterminate: debit and entry left exactly as-is for the recovery
//!   runner. Never credited back — the partner may still complete the
//!   transfer.

pub mod error;
pub mod recovery;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{UserId, WithdrawalRequest, WithdrawalTarget};
use crate::money::Amount;
use crate::partner::{CallOutcome, PartnerGateway};
use crate::store::LedgerStore;

pub use error::WithdrawError;
pub use recovery::{RecoveryReport, run_recovery};

/// Non-failure outcomes of a withdrawal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawStatus {
    /// Partner accepted; the cache entry now carries the correlation id.
    Accepted {
        key: Uuid,
        correlation_id: String,
    },
    /// Outcome unknown: the debit stands and the cached request is the
    /// recovery runner's problem. The caller must NOT be told the money is
    /// safe — it is pending.
    Pending {
        key: Uuid,
    },
}

/// Caller-facing destination. `LinkedWallet` resolves to the wallet account
/// the reconciliation loop linked on first deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawTo {
    LinkedWallet,
    Address(String),
}

pub struct WithdrawalEngine {
    store: Arc<LedgerStore>,
    partner: Arc<dyn PartnerGateway>,
    /// Per-user serialization of the check-then-debit step, so two
    /// concurrent requests cannot both pass the balance check on a stale
    /// read.
    user_locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl WithdrawalEngine {
    pub fn new(store: Arc<LedgerStore>, partner: Arc<dyn PartnerGateway>) -> Self {
        Self {
            store,
            partner,
            user_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    /// Request a withdrawal of `amount` from `user_id` to `to`.
    ///
    /// On return, exactly one of the following holds:
    /// - an error was returned and the balance is untouched (validation) or
    ///   restored (partner rejection);
    /// - `Accepted`: balance debited, confirmed entry retained as audit;
    /// - `Pending`: balance debited, pending entry awaiting recovery.
    pub async fn request_withdrawal(
        &self,
        user_id: &str,
        to: WithdrawTo,
        amount: Amount,
    ) -> Result<WithdrawStatus, WithdrawError> {
        if amount.units <= 0 {
            return Err(WithdrawError::InvalidAmount);
        }

        let request = {
            // Serialize same-user debits; the partner call below happens
            // outside the lock.
            let lock = self.user_lock(user_id);
            let _guard = lock.lock().await;

            let user = self
                .store
                .user(user_id)
                .ok_or_else(|| WithdrawError::UnknownUser(user_id.to_string()))?;

            let target = match to {
                WithdrawTo::LinkedWallet => WithdrawalTarget::Wallet(
                    user.wallet_account.clone().ok_or(WithdrawError::NoLinkedWallet)?,
                ),
                WithdrawTo::Address(addr) => WithdrawalTarget::Address(addr),
            };

            if user.balance < amount.units {
                return Err(WithdrawError::InsufficientFunds);
            }

            let request = WithdrawalRequest::new(user_id, target, amount);
            // Debit + cache-insert as one durable unit. From here on the
            // entry must reach a terminal outcome, in this run or a later one.
            self.store.debit_and_cache(request.clone())?;
            info!(
                key = %request.key,
                user_id,
                amount = %amount,
                "Withdrawal debited and cached"
            );
            request
        };

        self.resolve(&request).await
    }

    /// Drive a cached request to an outcome: submit under its idempotency
    /// key and settle the ledger accordingly. Shared by the request path and
    /// the recovery runner — the key is reused verbatim, which is what makes
    /// re-driving safe against partner-side duplicate suppression.
    pub async fn resolve(
        &self,
        request: &WithdrawalRequest,
    ) -> Result<WithdrawStatus, WithdrawError> {
        match self.partner.submit_withdrawal(request).await {
            CallOutcome::Accepted { correlation_id } => {
                self.store.confirm_request(&request.key, &correlation_id)?;
                info!(
                    key = %request.key,
                    correlation_id = %correlation_id,
                    "Withdrawal accepted by partner"
                );
                Ok(WithdrawStatus::Accepted {
                    key: request.key,
                    correlation_id,
                })
            }
            CallOutcome::Rejected { reason } => {
                // Definitive: the partner did nothing, so the compensating
                // credit and entry removal are safe (and atomic).
                self.store.credit_and_remove(&request.key)?;
                warn!(key = %request.key, reason = %reason, "Withdrawal rejected, user refunded");
                Err(WithdrawError::PartnerRejected { reason })
            }
            CallOutcome::Indeterminate => {
                warn!(
                    key = %request.key,
                    "Withdrawal outcome indeterminate; left pending for recovery"
                );
                Ok(WithdrawStatus::Pending { key: request.key })
            }
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserAccount;
    use crate::partner::mock::MockGateway;
    use crate::store::EventEffect;
    use chrono::Utc;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<LedgerStore>,
        partner: Arc<MockGateway>,
        engine: WithdrawalEngine,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LedgerStore::open(dir.path()).unwrap());
        let partner = Arc::new(MockGateway::new());
        let engine = WithdrawalEngine::new(store.clone(), partner.clone());
        Fixture {
            _dir: dir,
            store,
            partner,
            engine,
        }
    }

    /// Provision a user with a linked wallet and the given balance (cents).
    fn seed(store: &LedgerStore, user_id: &str, balance: i64) {
        store
            .provision_user(UserAccount::new(user_id, "player"))
            .unwrap();
        store
            .apply_event(
                store.checkpoint(),
                EventEffect::Deposit {
                    user_id: user_id.to_string(),
                    wallet_account: format!("wallet-{user_id}"),
                    amount: Amount::tether(balance),
                    at: Utc::now(),
                },
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_confirmed_withdrawal_debits_once() {
        // Scenario A: balance 100, withdraw 30 confirmed -> balance 70,
        // cache entry retained with the correlation id as the audit record.
        let f = fixture();
        seed(&f.store, "u1", 10_000);
        f.partner.script_outcome(CallOutcome::Accepted {
            correlation_id: "proc-1".into(),
        });

        let status = f
            .engine
            .request_withdrawal("u1", WithdrawTo::LinkedWallet, Amount::tether(3000))
            .await
            .unwrap();

        let WithdrawStatus::Accepted { key, correlation_id } = status else {
            panic!("expected Accepted, got {status:?}");
        };
        assert_eq!(correlation_id, "proc-1");
        assert_eq!(f.store.balance("u1").unwrap(), 7000);

        let entry = f.store.request(&key).unwrap();
        assert_eq!(entry.correlation_id.as_deref(), Some("proc-1"));
        assert!(f.store.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_funds_mutates_nothing() {
        // Scenario B: balance 100, withdraw 150 -> synchronous rejection,
        // balance unchanged, no cache entry, no partner call.
        let f = fixture();
        seed(&f.store, "u1", 10_000);

        let result = f
            .engine
            .request_withdrawal("u1", WithdrawTo::LinkedWallet, Amount::tether(15_000))
            .await;

        assert!(matches!(result, Err(WithdrawError::InsufficientFunds)));
        assert_eq!(f.store.balance("u1").unwrap(), 10_000);
        assert!(f.store.pending_requests().is_empty());
        assert!(f.partner.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let f = fixture();
        let result = f
            .engine
            .request_withdrawal("ghost", WithdrawTo::LinkedWallet, Amount::tether(100))
            .await;
        assert!(matches!(result, Err(WithdrawError::UnknownUser(_))));
        assert!(f.partner.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_wallet_target_requires_linked_account() {
        let f = fixture();
        // User exists but never deposited, so no wallet account is linked.
        f.store
            .provision_user(UserAccount::new("u1", "player"))
            .unwrap();

        let result = f
            .engine
            .request_withdrawal("u1", WithdrawTo::LinkedWallet, Amount::tether(100))
            .await;
        assert!(matches!(result, Err(WithdrawError::NoLinkedWallet)));
        assert!(f.partner.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_amount_rejected() {
        let f = fixture();
        seed(&f.store, "u1", 10_000);
        let result = f
            .engine
            .request_withdrawal("u1", WithdrawTo::LinkedWallet, Amount::tether(0))
            .await;
        assert!(matches!(result, Err(WithdrawError::InvalidAmount)));
    }

    #[tokio::test]
    async fn test_partner_rejection_is_net_zero() {
        let f = fixture();
        seed(&f.store, "u1", 10_000);
        f.partner.script_outcome(CallOutcome::Rejected {
            reason: "partner returned 400: bad address".into(),
        });

        let result = f
            .engine
            .request_withdrawal(
                "u1",
                WithdrawTo::Address("0xbad".into()),
                Amount::tether(3000),
            )
            .await;

        assert!(matches!(result, Err(WithdrawError::PartnerRejected { .. })));
        assert_eq!(f.store.balance("u1").unwrap(), 10_000);
        assert!(f.store.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn test_indeterminate_leaves_debit_pending() {
        // Scenario C, first half: timeout after retries -> balance stays
        // debited, entry pending, caller sees Pending.
        let f = fixture();
        seed(&f.store, "u1", 10_000);
        f.partner.script_outcome(CallOutcome::Indeterminate);

        let status = f
            .engine
            .request_withdrawal("u1", WithdrawTo::LinkedWallet, Amount::tether(3000))
            .await
            .unwrap();

        let WithdrawStatus::Pending { key } = status else {
            panic!("expected Pending, got {status:?}");
        };
        assert_eq!(f.store.balance("u1").unwrap(), 7000);
        let pending = f.store.pending_requests();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, key);
    }

    #[tokio::test]
    async fn test_concurrent_requests_serialize_per_user() {
        // Two 60-unit withdrawals against a 100-unit balance: exactly one
        // may pass the sufficiency check.
        let f = fixture();
        seed(&f.store, "u1", 10_000);
        f.partner.script_outcome(CallOutcome::Accepted {
            correlation_id: "proc-a".into(),
        });
        f.partner.script_outcome(CallOutcome::Accepted {
            correlation_id: "proc-b".into(),
        });

        let engine = Arc::new(WithdrawalEngine::new(f.store.clone(), f.partner.clone()));
        let (a, b) = tokio::join!(
            engine.request_withdrawal("u1", WithdrawTo::LinkedWallet, Amount::tether(6000)),
            engine.request_withdrawal("u1", WithdrawTo::LinkedWallet, Amount::tether(6000)),
        );

        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(
            matches!(a, Err(WithdrawError::InsufficientFunds))
                || matches!(b, Err(WithdrawError::InsufficientFunds))
        );
        assert_eq!(f.store.balance("u1").unwrap(), 4000);
    }
}
