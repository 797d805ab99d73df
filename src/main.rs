//! chipvault service entry point.
//!
//! Wires the JSON stores, price oracle, processor client, and notifier
//! into the reconciliation pipeline, then serves the processor callback
//! listener. Interactive flows (withdrawal approvals, games) are driven
//! by the chat gateway through the library API.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use chipvault::config::AppConfig;
use chipvault::logging;
use chipvault::notify::RestNotifier;
use chipvault::price::{HttpRateSource, PriceOracle};
use chipvault::reconcile::Reconciler;
use chipvault::store::{self, AddressDirectory, DepositStore, LedgerStore, WithdrawalStore};
use chipvault::webhook::{self, AppState};

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
    let config = AppConfig::load(&env);
    let _guard = logging::init_logging(&config);
    info!(env, "starting chipvault");

    let data_dir = store::prepare_data_dir(Path::new(&config.data_dir))
        .context("failed to prepare data directory")?;

    let ledger = Arc::new(LedgerStore::open(&data_dir));
    let wallets = Arc::new(AddressDirectory::open(&data_dir));
    let deposits = Arc::new(DepositStore::open(&data_dir));
    let withdrawals = Arc::new(WithdrawalStore::open(&data_dir));

    let oracle = Arc::new(PriceOracle::new(Arc::new(HttpRateSource::new(&config.price))));
    let notifier = Arc::new(RestNotifier::new(&config.chat));

    let reconciler = Arc::new(Reconciler::new(
        ledger,
        wallets,
        deposits,
        withdrawals,
        oracle,
        notifier,
        config.chat.deposit_channel_id,
    ));

    let addr = format!("{}:{}", config.listener.host, config.listener.port);
    webhook::serve(&addr, Arc::new(AppState { reconciler }))
        .await
        .context("webhook listener failed")?;
    Ok(())
}
