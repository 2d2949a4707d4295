//! Partner gateway — the seam between the ledger and the partner API.
//!
//! The withdrawal engine and the reconciliation loop talk to the partner
//! only through [`PartnerGateway`], so tests script outcomes instead of
//! standing up an HTTP server. [`client::PartnerClient`] is the production
//! implementation.

pub mod client;
pub mod types;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::config::PartnerConfig;
use crate::models::WithdrawalRequest;
use crate::money::Currency;
use crate::signer::SignerError;

pub use client::PartnerClient;
pub use types::PartnerEvent;

#[derive(Debug, Error)]
pub enum PartnerError {
    /// The partner answered and said no. Definitive.
    #[error("Partner rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// No definitive answer was obtained. Retryable, never terminal.
    #[error("Partner transport failure: {0}")]
    Transport(String),

    #[error("Malformed partner response: {0}")]
    Malformed(String),

    #[error("Invalid partner URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Signer(#[from] SignerError),
}

/// Three-way outcome of one withdrawal submission, retry budget included.
///
/// The asymmetry between `Rejected` and `Indeterminate` is the whole point:
/// a rejection proves the partner did nothing, an indeterminate outcome
/// proves nothing at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// Partner accepted (202) and assigned a correlation id.
    Accepted { correlation_id: String },
    /// Partner (or a local, non-network failure) definitively declined.
    Rejected { reason: String },
    /// Transport exhausted the retry budget with no definitive response.
    /// The transfer may still complete partner-side.
    Indeterminate,
}

#[async_trait]
pub trait PartnerGateway: Send + Sync {
    /// Submit one withdrawal attempt under its idempotency key.
    ///
    /// Implementations own the retry budget; by the time this returns, the
    /// outcome classification is final for this process run.
    async fn submit_withdrawal(&self, request: &WithdrawalRequest) -> CallOutcome;

    /// Fetch the ordered events strictly after checkpoint `after`, scoped to
    /// `currency`.
    async fn fetch_events(
        &self,
        currency: Currency,
        after: u64,
    ) -> Result<Vec<PartnerEvent>, PartnerError>;
}

/// Build the partner-hosted deposit link for a user.
///
/// Server-side so the URL shape can change without a front-end release.
pub fn deposit_link(
    cfg: &PartnerConfig,
    user_id: &str,
    currency: Currency,
) -> Result<String, PartnerError> {
    let mut url = reqwest::Url::parse(&cfg.payments_url)
        .map_err(|e| PartnerError::InvalidUrl(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("currency", currency.as_str())
        .append_pair("partner", &cfg.partner_id)
        .append_pair("userId", user_id)
        .append_pair("gameType", "janken")
        .append_pair("platform", &cfg.platform)
        .append_pair("time", &Utc::now().timestamp_millis().to_string());
    Ok(url.into())
}

/// Scripted gateway for unit tests.
#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::money::Amount;
    use chrono::{DateTime, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use uuid::Uuid;

    use types::{EventMetadata, WireAmount};

    #[derive(Default)]
    pub struct MockGateway {
        outcomes: Mutex<VecDeque<CallOutcome>>,
        batches: Mutex<VecDeque<Result<Vec<PartnerEvent>, PartnerError>>>,
        /// Idempotency keys seen, in submission order.
        pub submitted_keys: Mutex<Vec<Uuid>>,
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script_outcome(&self, outcome: CallOutcome) {
            self.outcomes.lock().unwrap().push_back(outcome);
        }

        pub fn script_events(&self, batch: Result<Vec<PartnerEvent>, PartnerError>) {
            self.batches.lock().unwrap().push_back(batch);
        }

        pub fn submissions(&self) -> Vec<Uuid> {
            self.submitted_keys.lock().unwrap().clone()
        }

        pub fn event(
            kind: &str,
            units: i64,
            correlation_id: &str,
            user_id: &str,
            when: DateTime<Utc>,
        ) -> PartnerEvent {
            PartnerEvent {
                kind: kind.to_string(),
                amount: WireAmount::from(Amount::tether(units)),
                correlation_id: correlation_id.to_string(),
                metadata: EventMetadata {
                    user_id: user_id.to_string(),
                },
                when,
            }
        }
    }

    #[async_trait]
    impl PartnerGateway for MockGateway {
        async fn submit_withdrawal(&self, request: &WithdrawalRequest) -> CallOutcome {
            self.submitted_keys.lock().unwrap().push(request.key);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(CallOutcome::Indeterminate)
        }

        async fn fetch_events(
            &self,
            _currency: Currency,
            _after: u64,
        ) -> Result<Vec<PartnerEvent>, PartnerError> {
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }
}
