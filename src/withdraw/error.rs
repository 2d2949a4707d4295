use thiserror::Error;

use crate::store::StoreError;

/// Withdrawal failure taxonomy.
///
/// Validation variants reject before any mutation; `PartnerRejected` means
/// the debit was compensated and the cache entry removed. An indeterminate
/// outcome is deliberately NOT an error — see
/// [`WithdrawStatus::Pending`](super::WithdrawStatus).
#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("No withdrawal account available")]
    NoLinkedWallet,

    #[error("Partner rejected withdrawal: {reason}")]
    PartnerRejected { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
