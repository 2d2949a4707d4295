//! Production partner client over HTTP.
//!
//! Submission retry policy: a fixed budget of attempts with a fixed delay in
//! between, no backoff growth. A response body is only trusted after a
//! complete transport round trip; any transport failure is retried and, once
//! the budget is spent, classified indeterminate — never as a rejection.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, warn};

use super::types::{
    AcceptedBody, CallMetadata, EventsQuery, PartnerEvent, WireAmount, WithdrawalCall,
};
use super::{CallOutcome, PartnerError, PartnerGateway};
use crate::config::PartnerConfig;
use crate::models::{WithdrawalRequest, WithdrawalTarget};
use crate::money::Currency;
use crate::signer::RequestSigner;

pub const HEADER_IDEMPOTENCY_KEY: &str = "Idempotency-Key";
pub const HEADER_PARTNER_ID: &str = "X-Partner-Id";
pub const HEADER_SIGNATURE: &str = "X-Signature";
pub const HEADER_SIGNATURE_ALGORITHM: &str = "X-Signature-Algorithm";

pub struct PartnerClient {
    http: reqwest::Client,
    cfg: PartnerConfig,
    signer: RequestSigner,
}

impl PartnerClient {
    pub fn new(cfg: PartnerConfig, signer: RequestSigner) -> Result<Self, PartnerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| PartnerError::Transport(e.to_string()))?;
        Ok(Self { http, cfg, signer })
    }

    fn withdrawal_url(&self, target: &WithdrawalTarget) -> String {
        let path = match target {
            WithdrawalTarget::Wallet(_) => "/partners/userWithdrawal",
            WithdrawalTarget::Address(_) => "/partners/userDirectWithdrawal",
        };
        format!("{}{}", self.cfg.api_url, path)
    }

    fn withdrawal_call(&self, request: &WithdrawalRequest) -> WithdrawalCall {
        let (user, address) = match &request.target {
            WithdrawalTarget::Wallet(account) => (Some(account.clone()), None),
            WithdrawalTarget::Address(addr) => (None, Some(addr.clone())),
        };
        WithdrawalCall {
            user,
            address,
            amount: WireAmount::from(request.amount),
            idempotency_key: request.key.to_string(),
            metadata: CallMetadata {
                user_id: request.user_id.clone(),
                game_type: "janken".to_string(),
                platform: self.cfg.platform.clone(),
                time: Utc::now().timestamp_millis(),
            },
        }
    }

    /// One signed POST. `Ok` means a complete round trip happened, whatever
    /// the status; `Err` means the outcome is unknown.
    async fn signed_post(&self, url: &str, body: Vec<u8>, idempotency_key: Option<&str>) ->
        Result<reqwest::Response, reqwest::Error>
    {
        let meta = self.signer.sign_bytes(&body);
        let mut builder = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(HEADER_PARTNER_ID, &meta.partner_id)
            .header(HEADER_SIGNATURE, &meta.signature)
            .header(HEADER_SIGNATURE_ALGORITHM, meta.algorithm)
            .body(body);
        if let Some(key) = idempotency_key {
            builder = builder.header(HEADER_IDEMPOTENCY_KEY, key);
        }
        builder.send().await
    }
}

#[async_trait]
impl PartnerGateway for PartnerClient {
    async fn submit_withdrawal(&self, request: &WithdrawalRequest) -> CallOutcome {
        let url = self.withdrawal_url(&request.target);
        let call = self.withdrawal_call(request);

        // A local serialization failure happens before anything leaves this
        // process: definitive rejection, safe to compensate.
        let body = match serde_json::to_vec(&call) {
            Ok(b) => b,
            Err(e) => {
                return CallOutcome::Rejected {
                    reason: format!("failed to encode withdrawal call: {e}"),
                };
            }
        };

        let key = request.key.to_string();
        for attempt in 1..=self.cfg.retry_attempts {
            debug!(
                key = %key,
                attempt,
                url = %url,
                "Submitting idempotent withdrawal"
            );

            match self.signed_post(&url, body.clone(), Some(&key)).await {
                Ok(resp) if resp.status() == StatusCode::ACCEPTED => {
                    match resp.json::<AcceptedBody>().await {
                        Ok(accepted) => {
                            return CallOutcome::Accepted {
                                correlation_id: accepted.process_id,
                            };
                        }
                        Err(e) => {
                            // The partner said 202; we just failed to read the
                            // correlation id. The transfer may be in flight, so
                            // this must stay indeterminate.
                            warn!(key = %key, error = %e, "Unreadable 202 body");
                            return CallOutcome::Indeterminate;
                        }
                    }
                }
                Ok(resp) => {
                    // Any complete non-202 response is terminal: the partner
                    // saw the request and declined it.
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(key = %key, status, "Partner declined withdrawal");
                    return CallOutcome::Rejected {
                        reason: format!("partner returned {status}: {body}"),
                    };
                }
                Err(e) => {
                    warn!(
                        key = %key,
                        attempt,
                        error = %e,
                        "Withdrawal submission transport failure"
                    );
                    if attempt < self.cfg.retry_attempts {
                        // Be friendly to the remote API between attempts.
                        tokio::time::sleep(Duration::from_millis(self.cfg.retry_delay_ms)).await;
                    }
                }
            }
        }

        CallOutcome::Indeterminate
    }

    async fn fetch_events(
        &self,
        currency: Currency,
        after: u64,
    ) -> Result<Vec<PartnerEvent>, PartnerError> {
        let query = EventsQuery {
            currency_kind: currency.as_str().to_string(),
            version: after.to_string(),
        };
        let body = serde_json::to_vec(&query)
            .map_err(|e| PartnerError::Malformed(e.to_string()))?;
        let url = format!("{}/partners/events", self.cfg.api_url);

        let resp = self
            .signed_post(&url, body, None)
            .await
            .map_err(|e| PartnerError::Transport(e.to_string()))?;

        if resp.status() != StatusCode::OK {
            return Err(PartnerError::Rejected {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        resp.json::<Vec<PartnerEvent>>()
            .await
            .map_err(|e| PartnerError::Malformed(e.to_string()))
    }
}
