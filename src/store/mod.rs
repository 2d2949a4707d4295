//! Ledger Store — durable, crash-consistent state for balances, the
//! transaction log, the withdrawal-request cache, and the reconciliation
//! checkpoint.
//!
//! The load-bearing invariant of the whole system lives here: every mutation
//! that touches more than one entity (debit + cache-insert, credit +
//! cache-remove, event effect + cursor advance) is one [`LedgerOp`], appended
//! to the WAL and fsynced before memory is touched and before the caller
//! sees success. All writes funnel through a single writer lock, so there is
//! no window in which two entities disagree on disk.
//!
//! Reopen = load snapshot (if any) + replay WAL. [`LedgerStore::compact`]
//! folds the WAL into a snapshot.

pub mod op;
pub mod snapshot;
pub mod wal;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{TxKind, TxRecord, UserAccount, UserId, WithdrawalRequest};
use crate::money::Amount;

pub use op::{EventEffect, LedgerOp};
pub use snapshot::LedgerState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Ledger corrupt: {0}")]
    Corrupt(String),

    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    #[error("User already exists: {0}")]
    UserExists(UserId),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Duplicate withdrawal request: {0}")]
    DuplicateRequest(Uuid),

    #[error("Unknown withdrawal request: {0}")]
    UnknownRequest(Uuid),

    #[error("Withdrawal request already resolved: {0}")]
    RequestResolved(Uuid),

    #[error("Checkpoint mismatch: expected {expected}, store is at {actual}")]
    CheckpointMismatch { expected: u64, actual: u64 },
}

struct Inner {
    state: LedgerState,
    wal: wal::WalWriter,
}

/// The single-writer durable store.
pub struct LedgerStore {
    snapshot_path: PathBuf,
    inner: Mutex<Inner>,
}

const WAL_FILE: &str = "ledger.wal";
const SNAPSHOT_FILE: &str = "ledger.snapshot";

impl LedgerStore {
    /// Open (or create) the store under `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let snapshot_path = data_dir.join(SNAPSHOT_FILE);
        let wal_path = data_dir.join(WAL_FILE);

        let mut state = snapshot::load(&snapshot_path)?.unwrap_or_default();
        let ops = wal::replay(&wal_path)?;
        let replayed = ops.len();
        for op in ops {
            apply_to_state(&mut state, op)?;
        }

        info!(
            users = state.users.len(),
            pending = state
                .request_cache
                .values()
                .filter(|r| r.is_pending())
                .count(),
            checkpoint = state.checkpoint,
            replayed,
            "Ledger store opened"
        );

        let wal = wal::WalWriter::open(&wal_path)?;
        Ok(Self {
            snapshot_path,
            inner: Mutex::new(Inner { state, wal }),
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn user(&self, id: &str) -> Option<UserAccount> {
        self.lock().state.users.get(id).cloned()
    }

    pub fn users(&self) -> Vec<UserAccount> {
        self.lock().state.users.values().cloned().collect()
    }

    pub fn balance(&self, id: &str) -> Result<i64, StoreError> {
        self.lock()
            .state
            .users
            .get(id)
            .map(|u| u.balance)
            .ok_or_else(|| StoreError::UnknownUser(id.to_string()))
    }

    pub fn transactions(&self, user_id: &str) -> Vec<TxRecord> {
        self.lock()
            .state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn request(&self, key: &Uuid) -> Option<WithdrawalRequest> {
        self.lock().state.request_cache.get(key).cloned()
    }

    /// Cached requests with no correlation id, oldest first. This is the
    /// recovery runner's work queue.
    pub fn pending_requests(&self) -> Vec<WithdrawalRequest> {
        let mut pending: Vec<_> = self
            .lock()
            .state
            .request_cache
            .values()
            .filter(|r| r.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    pub fn checkpoint(&self) -> u64 {
        self.lock().state.checkpoint
    }

    pub fn has_users(&self) -> bool {
        !self.lock().state.users.is_empty()
    }

    // ------------------------------------------------------------------
    // Compound mutations
    // ------------------------------------------------------------------

    pub fn provision_user(&self, account: UserAccount) -> Result<(), StoreError> {
        self.apply(LedgerOp::ProvisionUser { account })
    }

    /// Debit the user and insert the pending cache entry, atomically.
    pub fn debit_and_cache(&self, request: WithdrawalRequest) -> Result<(), StoreError> {
        self.apply(LedgerOp::DebitAndCache { request })
    }

    /// Compensating credit plus cache removal, atomically. Only legal while
    /// the request is still pending.
    pub fn credit_and_remove(&self, key: &Uuid) -> Result<(), StoreError> {
        self.apply(LedgerOp::CreditAndRemove { key: *key })
    }

    /// Record the partner-assigned correlation id on a pending entry.
    pub fn confirm_request(&self, key: &Uuid, correlation_id: &str) -> Result<(), StoreError> {
        self.apply(LedgerOp::ConfirmRequest {
            key: *key,
            correlation_id: correlation_id.to_string(),
        })
    }

    /// Apply one reconciled partner event and advance the checkpoint by
    /// exactly one, atomically. `expected_cursor` guards against applying
    /// an event at the wrong position.
    pub fn apply_event(&self, expected_cursor: u64, effect: EventEffect) -> Result<(), StoreError> {
        self.apply(LedgerOp::ApplyEvent {
            cursor: expected_cursor,
            effect,
        })
    }

    /// Settle a game round: balance adjust plus audit record, atomically.
    pub fn settle_wager(
        &self,
        user_id: &str,
        won: bool,
        amount: Amount,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.apply(LedgerOp::SettleWager {
            user_id: user_id.to_string(),
            won,
            amount,
            at,
        })
    }

    /// Fold the WAL into a snapshot. State is unchanged; a crash anywhere in
    /// here leaves either the old snapshot + full WAL or the new snapshot +
    /// empty WAL.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        snapshot::save(&self.snapshot_path, &inner.state)?;
        inner.wal.reset()?;
        debug!("Ledger compacted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-mutation; continuing would risk
        // writing from inconsistent memory state.
        self.inner
            .lock()
            .unwrap_or_else(|_| panic!("ledger store writer lock poisoned"))
    }

    /// The single write path: validate against current state, append the op
    /// durably, then mutate memory.
    fn apply(&self, op: LedgerOp) -> Result<(), StoreError> {
        let mut inner = self.lock();
        check(&inner.state, &op)?;
        inner.wal.append(&op)?;
        apply_to_state(&mut inner.state, op)
    }
}

/// Precondition checks, run before anything is written. A rejected op leaves
/// no trace on disk.
fn check(state: &LedgerState, op: &LedgerOp) -> Result<(), StoreError> {
    match op {
        LedgerOp::ProvisionUser { account } => {
            if state.users.contains_key(&account.id) {
                return Err(StoreError::UserExists(account.id.clone()));
            }
        }
        LedgerOp::DebitAndCache { request } => {
            let user = state
                .users
                .get(&request.user_id)
                .ok_or_else(|| StoreError::UnknownUser(request.user_id.clone()))?;
            if user.balance < request.amount.units {
                return Err(StoreError::InsufficientFunds);
            }
            if state.request_cache.contains_key(&request.key) {
                return Err(StoreError::DuplicateRequest(request.key));
            }
        }
        LedgerOp::CreditAndRemove { key } | LedgerOp::ConfirmRequest { key, .. } => {
            let entry = state
                .request_cache
                .get(key)
                .ok_or(StoreError::UnknownRequest(*key))?;
            if !entry.is_pending() {
                return Err(StoreError::RequestResolved(*key));
            }
        }
        LedgerOp::ApplyEvent { cursor, effect } => {
            if *cursor != state.checkpoint {
                return Err(StoreError::CheckpointMismatch {
                    expected: *cursor,
                    actual: state.checkpoint,
                });
            }
            match effect {
                EventEffect::Deposit { user_id, .. }
                | EventEffect::WithdrawConfirmed { user_id, .. } => {
                    if !state.users.contains_key(user_id) {
                        return Err(StoreError::UnknownUser(user_id.clone()));
                    }
                }
                EventEffect::Skip => {}
            }
        }
        LedgerOp::SettleWager {
            user_id,
            won,
            amount,
            ..
        } => {
            let user = state
                .users
                .get(user_id)
                .ok_or_else(|| StoreError::UnknownUser(user_id.clone()))?;
            if !won && user.balance < amount.units {
                return Err(StoreError::InsufficientFunds);
            }
        }
    }
    Ok(())
}

/// Mutate materialized state. Shared between the live write path and WAL
/// replay; an error here during replay means the log itself is inconsistent.
fn apply_to_state(state: &mut LedgerState, op: LedgerOp) -> Result<(), StoreError> {
    match op {
        LedgerOp::ProvisionUser { account } => {
            state.users.insert(account.id.clone(), account);
        }
        LedgerOp::DebitAndCache { request } => {
            let user = state
                .users
                .get_mut(&request.user_id)
                .ok_or_else(|| corrupt("debit for unknown user"))?;
            user.balance -= request.amount.units;
            state.request_cache.insert(request.key, request);
        }
        LedgerOp::CreditAndRemove { key } => {
            let request = state
                .request_cache
                .remove(&key)
                .ok_or_else(|| corrupt("credit for unknown request"))?;
            let user = state
                .users
                .get_mut(&request.user_id)
                .ok_or_else(|| corrupt("credit for unknown user"))?;
            user.balance += request.amount.units;
        }
        LedgerOp::ConfirmRequest {
            key,
            correlation_id,
        } => {
            let request = state
                .request_cache
                .get_mut(&key)
                .ok_or_else(|| corrupt("confirm for unknown request"))?;
            request.correlation_id = Some(correlation_id);
        }
        LedgerOp::ApplyEvent { cursor: _, effect } => {
            match effect {
                EventEffect::Deposit {
                    user_id,
                    wallet_account,
                    amount,
                    at,
                } => {
                    let user = state
                        .users
                        .get_mut(&user_id)
                        .ok_or_else(|| corrupt("deposit for unknown user"))?;
                    user.balance += amount.units;
                    user.wallet_account = Some(wallet_account);
                    state.transactions.push(TxRecord {
                        user_id,
                        kind: TxKind::Deposit,
                        amount,
                        at,
                    });
                }
                EventEffect::WithdrawConfirmed {
                    user_id,
                    correlation_id,
                    amount,
                    at,
                } => {
                    // Finalize the audit entry for this transfer, if we still
                    // hold one. The balance moved at debit time.
                    if let Some(request) = state
                        .request_cache
                        .values_mut()
                        .find(|r| r.correlation_id.as_deref() == Some(correlation_id.as_str()))
                    {
                        request.settled_at = Some(at);
                    }
                    state.transactions.push(TxRecord {
                        user_id,
                        kind: TxKind::Withdraw,
                        amount,
                        at,
                    });
                }
                EventEffect::Skip => {}
            }
            state.checkpoint += 1;
        }
        LedgerOp::SettleWager {
            user_id,
            won,
            amount,
            at,
        } => {
            let user = state
                .users
                .get_mut(&user_id)
                .ok_or_else(|| corrupt("wager for unknown user"))?;
            let kind = if won {
                user.balance += amount.units;
                TxKind::GameWin
            } else {
                user.balance -= amount.units;
                TxKind::GameLoss
            };
            state.transactions.push(TxRecord {
                user_id,
                kind,
                amount,
                at,
            });
        }
    }
    Ok(())
}

fn corrupt(msg: &str) -> StoreError {
    StoreError::Corrupt(msg.to_string())
}
