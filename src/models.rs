//! Domain entities held by the ledger store.
//!
//! Everything here is persisted through the store's WAL, so all types derive
//! `Serialize`/`Deserialize` for bincode framing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::money::Amount;

/// Opaque, stable user identifier (UUID-shaped but never interpreted).
pub type UserId = String;

/// A custodial user account.
///
/// `balance` is only mutated by the withdrawal engine (debit/credit) and the
/// reconciliation loop (deposit credit). `wallet_account` is the partner-side
/// account linked by the first confirmed deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub username: String,
    /// Signed minor units. Never floating point.
    pub balance: i64,
    pub wallet_account: Option<String>,
}

impl UserAccount {
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            balance: 0,
            wallet_account: None,
        }
    }
}

/// Where a withdrawal is headed: a partner wallet account or an on-chain
/// address. Tagged variant, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalTarget {
    Wallet(String),
    Address(String),
}

impl fmt::Display for WithdrawalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WithdrawalTarget::Wallet(account) => write!(f, "wallet:{account}"),
            WithdrawalTarget::Address(addr) => write!(f, "address:{addr}"),
        }
    }
}

/// A cached outbound withdrawal request.
///
/// Persisted atomically with the debit it represents, and retained until the
/// request reaches a terminal outcome. Entries with no `correlation_id` are
/// the recovery runner's work queue; entries with one are permanent audit
/// records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    /// Caller-generated idempotency key. The partner collapses repeated
    /// deliveries under the same key to one effect (24h window), so recovery
    /// must reuse it verbatim.
    pub key: Uuid,
    pub user_id: UserId,
    pub target: WithdrawalTarget,
    pub amount: Amount,
    /// Partner-assigned process id, absent until the partner accepts.
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when the partner's `Transferred` event confirms the transfer
    /// actually settled on their side.
    pub settled_at: Option<DateTime<Utc>>,
}

impl WithdrawalRequest {
    pub fn new(user_id: impl Into<UserId>, target: WithdrawalTarget, amount: Amount) -> Self {
        Self {
            key: Uuid::new_v4(),
            user_id: user_id.into(),
            target,
            amount,
            correlation_id: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    /// Still waiting for a definitive partner outcome.
    pub fn is_pending(&self) -> bool {
        self.correlation_id.is_none()
    }
}

/// Transaction log entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    Deposit,
    Withdraw,
    GameWin,
    GameLoss,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Deposit => "Deposit",
            TxKind::Withdraw => "Withdraw",
            TxKind::GameWin => "Win(Janken)",
            TxKind::GameLoss => "Loss(Janken)",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only audit record. Write-only, never mutated, not load-bearing
/// for correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub user_id: UserId,
    pub kind: TxKind,
    pub amount: Amount,
    pub at: DateTime<Utc>,
}
