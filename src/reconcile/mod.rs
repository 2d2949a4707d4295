//! Reconciliation Loop.
//!
//! Polls the partner's ordered event stream from the ledger checkpoint on a
//! fixed interval and folds each event into local state exactly once. Every
//! event is applied together with a cursor advance of exactly one, in a
//! single durable store op, so a crash mid-batch re-requests only the
//! unapplied remainder.
//!
//! Error discipline: anything external (transport, partner non-success) skips
//! the tick and waits for the next interval — the fixed interval is the only
//! throttle. Anything internal (unknown user, malformed event, store failure)
//! is a logic error: the loop stops scheduling ticks and surfaces it as
//! fatal, leaving the already-applied checkpoint intact.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::money::Currency;
use crate::partner::types::{EVENT_KIND_RECEIVED, EVENT_KIND_TRANSFERRED};
use crate::partner::{PartnerError, PartnerEvent, PartnerGateway};
use crate::store::{EventEffect, LedgerStore, StoreError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// External failure querying the partner. Retryable next tick.
    #[error("Partner events query failed: {0}")]
    Partner(#[from] PartnerError),

    /// An event references a user this ledger has never provisioned.
    #[error("Event at cursor {cursor} references unknown user {user_id}")]
    UnknownUser { cursor: u64, user_id: String },

    /// An event violates the wire contract (bad amount, bad kind payload).
    #[error("Malformed event at cursor {cursor}: {reason}")]
    BadEvent { cursor: u64, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// External errors are retried by waiting for the next tick; everything
    /// else stops the loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::Partner(_))
    }
}

pub struct Reconciler {
    store: Arc<LedgerStore>,
    partner: Arc<dyn PartnerGateway>,
    currency: Currency,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<LedgerStore>,
        partner: Arc<dyn PartnerGateway>,
        currency: Currency,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            partner,
            currency,
            interval,
        }
    }

    /// Run until `shutdown` fires or an internal logic error occurs.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ReconcileError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, currency = %self.currency, "Reconciliation loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(0) => {}
                        Ok(applied) => {
                            debug!(
                                applied,
                                checkpoint = self.store.checkpoint(),
                                "Applied partner events"
                            );
                        }
                        Err(e) if e.is_retryable() => {
                            debug!(error = %e, "Events query failed, retrying next tick");
                        }
                        Err(e) => {
                            error!(error = %e, "Reconciliation loop stopping on internal error");
                            return Err(e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Reconciliation loop stopping");
                    return Ok(());
                }
            }
        }
    }

    /// One poll: fetch events strictly after the checkpoint and apply each,
    /// advancing the cursor one event at a time.
    pub async fn tick(&self) -> Result<usize, ReconcileError> {
        let cursor = self.store.checkpoint();
        debug!(cursor, "Requesting partner events");
        let events = self.partner.fetch_events(self.currency, cursor).await?;

        let mut applied = 0;
        for event in events {
            let cursor = self.store.checkpoint();
            let effect = self.effect_for(cursor, &event)?;
            self.store.apply_event(cursor, effect)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Translate one wire event into its ledger effect.
    fn effect_for(
        &self,
        cursor: u64,
        event: &PartnerEvent,
    ) -> Result<EventEffect, ReconcileError> {
        let user_id = event.metadata.user_id.clone();

        match event.kind.as_str() {
            EVENT_KIND_RECEIVED => {
                if self.store.user(&user_id).is_none() {
                    return Err(ReconcileError::UnknownUser { cursor, user_id });
                }
                let amount = event
                    .amount
                    .to_amount()
                    .map_err(|e| ReconcileError::BadEvent {
                        cursor,
                        reason: e.to_string(),
                    })?;
                Ok(EventEffect::Deposit {
                    user_id,
                    // The partner-side account that sent the deposit becomes
                    // the user's linked withdrawal account.
                    wallet_account: event.correlation_id.clone(),
                    amount,
                    at: event.when,
                })
            }
            EVENT_KIND_TRANSFERRED => {
                if self.store.user(&user_id).is_none() {
                    return Err(ReconcileError::UnknownUser { cursor, user_id });
                }
                let amount = event
                    .amount
                    .to_amount()
                    .map_err(|e| ReconcileError::BadEvent {
                        cursor,
                        reason: e.to_string(),
                    })?;
                Ok(EventEffect::WithdrawConfirmed {
                    user_id,
                    correlation_id: event.correlation_id.clone(),
                    amount,
                    at: event.when,
                })
            }
            other => {
                debug!(kind = other, cursor, "Ignoring unknown partner event kind");
                Ok(EventEffect::Skip)
            }
        }
    }
}
