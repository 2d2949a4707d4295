//! Compound ledger operations.
//!
//! Every mutation of the store — including multi-entity ones like
//! debit-plus-cache-insert — is expressed as exactly one `LedgerOp`. The op
//! is the WAL record, so whatever it touches becomes durable together or not
//! at all. Callers never get to "mutate in memory, write later".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{UserAccount, UserId, WithdrawalRequest};
use crate::money::Amount;

/// The ledger effect of one partner event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventEffect {
    /// Partner-side deposit: credit the balance, link the partner wallet
    /// account, append a Deposit record.
    Deposit {
        user_id: UserId,
        wallet_account: String,
        amount: Amount,
        at: DateTime<Utc>,
    },
    /// Partner confirmed one of our withdrawals settled: append a Withdraw
    /// record and mark the cached request (matched by correlation id)
    /// settled. The balance was already debited when the request was made.
    WithdrawConfirmed {
        user_id: UserId,
        correlation_id: String,
        amount: Amount,
        at: DateTime<Utc>,
    },
    /// Unknown event kind: no ledger effect, but the cursor still advances
    /// so the event is never re-requested.
    Skip,
}

/// One atomic unit of ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerOp {
    ProvisionUser {
        account: UserAccount,
    },
    /// Withdrawal intent: debit `request.amount` from the user and insert
    /// the pending cache entry, as one durable unit.
    DebitAndCache {
        request: WithdrawalRequest,
    },
    /// Definitive partner rejection: compensating credit plus cache-entry
    /// removal, as one durable unit.
    CreditAndRemove {
        key: Uuid,
    },
    /// Partner accepted: attach the correlation id. The entry stays forever
    /// as the audit record for the debit.
    ConfirmRequest {
        key: Uuid,
        correlation_id: String,
    },
    /// One reconciled partner event: its ledger effect plus a cursor advance
    /// of exactly one, as one durable unit. `cursor` is the index being
    /// applied, i.e. the checkpoint value before the advance.
    ApplyEvent {
        cursor: u64,
        effect: EventEffect,
    },
    /// Custody side of a settled game round: balance adjust plus audit
    /// record.
    SettleWager {
        user_id: UserId,
        won: bool,
        amount: Amount,
        at: DateTime<Utc>,
    },
}

impl LedgerOp {
    /// WAL entry-type discriminant.
    pub fn entry_type(&self) -> u8 {
        match self {
            LedgerOp::ProvisionUser { .. } => 1,
            LedgerOp::DebitAndCache { .. } => 2,
            LedgerOp::CreditAndRemove { .. } => 3,
            LedgerOp::ConfirmRequest { .. } => 4,
            LedgerOp::ApplyEvent { .. } => 5,
            LedgerOp::SettleWager { .. } => 6,
        }
    }
}
