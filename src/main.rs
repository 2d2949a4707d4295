//! janken-ledger service entry point.
//!
//! Boot order matters:
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌───────────┐
//! │  Config  │───▶│  Store   │───▶│ Recovery │───▶│ Reconcile │
//! │  (YAML)  │    │(WAL+Snap)│    │ (re-drive)│   │  (loop)   │
//! └──────────┘    └──────────┘    └──────────┘    └───────────┘
//! ```
//!
//! Recovery runs to completion before the reconciliation loop starts, so no
//! withdrawal request left unresolved by a crash is still unresolved once
//! the service is live.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use janken_ledger::config::AppConfig;
use janken_ledger::logging::init_logging;
use janken_ledger::models::UserAccount;
use janken_ledger::money::Currency;
use janken_ledger::partner::PartnerClient;
use janken_ledger::reconcile::Reconciler;
use janken_ledger::signer::RequestSigner;
use janken_ledger::store::LedgerStore;
use janken_ledger::withdraw::{WithdrawalEngine, run_recovery};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).with_context(|| format!("loading config for {env}"))?;
    let _log_guard = init_logging(&config);

    info!("Starting janken-ledger in {} mode", env);

    let store = Arc::new(
        LedgerStore::open(&config.store.data_dir)
            .with_context(|| format!("opening ledger store at {}", config.store.data_dir))?,
    );

    // First boot only: provision the configured demo accounts.
    if !store.has_users() {
        for seed in &config.seed_users {
            store.provision_user(UserAccount::new(&seed.id, &seed.username))?;
            info!(user_id = %seed.id, "Provisioned seed user");
        }
    }

    let signer = RequestSigner::from_hex(&config.partner.partner_id, &config.partner.signing_key_hex)
        .context("loading partner signing key")?;
    let partner = Arc::new(
        PartnerClient::new(config.partner.clone(), signer).context("building partner client")?,
    );

    let engine = WithdrawalEngine::new(store.clone(), partner.clone());
    let report = run_recovery(&engine).await;
    if report.total() > 0 {
        info!(
            confirmed = report.confirmed,
            refunded = report.refunded,
            still_pending = report.still_pending,
            failed = report.failed,
            "Startup recovery finished"
        );
    }

    let reconciler = Reconciler::new(
        store.clone(),
        partner,
        Currency::Tether,
        Duration::from_millis(config.partner.events_interval_ms),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconcile_handle = tokio::spawn(reconciler.run(shutdown_rx));

    info!("Service ready, press Ctrl+C to shut down");
    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("Shutdown signal received");

    // An already-finished loop means it died on an internal error; the send
    // failing is fine either way.
    let _ = shutdown_tx.send(true);
    match reconcile_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Reconciliation loop exited with error"),
        Err(e) => error!(error = %e, "Reconciliation task panicked"),
    }

    // Fold the WAL into a fresh snapshot so the next boot replays nothing.
    store.compact().context("compacting ledger store")?;
    info!("Shutdown complete");
    Ok(())
}
