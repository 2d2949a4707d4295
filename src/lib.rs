//! janken-ledger - Custodial wager ledger with partner custody
//!
//! The house holds player balances locally and settles real money movement
//! through an external custody partner over signed HTTP.
//!
//! # Modules
//!
//! - [`money`] - Currency and minor-unit amounts
//! - [`models`] - User accounts, withdrawal requests, transaction records
//! - [`store`] - Durable ledger store (WAL + snapshot, atomic compound ops)
//! - [`signer`] - Hash-then-sign request signing (Ed25519 over SHA-512)
//! - [`partner`] - Partner gateway trait, wire types, HTTP client
//! - [`withdraw`] - Idempotent withdrawal engine and crash recovery
//! - [`reconcile`] - Checkpointed partner event reconciliation loop
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing setup

pub mod config;
pub mod logging;
pub mod models;
pub mod money;
pub mod partner;
pub mod reconcile;
pub mod signer;
pub mod store;
pub mod withdraw;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use models::{TxKind, TxRecord, UserAccount, UserId, WithdrawalRequest, WithdrawalTarget};
pub use money::{Amount, Currency};
pub use partner::{CallOutcome, PartnerClient, PartnerGateway};
pub use reconcile::Reconciler;
pub use signer::RequestSigner;
pub use store::{LedgerStore, StoreError};
pub use withdraw::{WithdrawStatus, WithdrawTo, WithdrawalEngine};
