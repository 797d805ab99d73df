//! chipvault - custodial deposit, wager, and withdrawal service.
//!
//! Users deposit crypto to processor-generated addresses; the processor
//! posts callbacks as confirmations arrive; the reconciliation pipeline
//! credits USD balances exactly once per transaction and notifies the
//! user and the operations channel. Withdrawals run through a two-stage
//! human approval flow. All durable state lives in flat JSON files.
//!
//! # Modules
//!
//! - [`config`] - YAML application config
//! - [`currency`] - supported currencies and smallest-unit math
//! - [`store`] - JSON-file stores (balances, wallets, histories, counters)
//! - [`price`] - bucketed USD spot-rate oracle
//! - [`processor`] - payment-processor client (addresses, liquidity, transfers)
//! - [`notify`] - notification dispatcher trait + chat-gateway REST impl
//! - [`reconcile`] - the deposit-confirmation reconciliation pipeline
//! - [`webhook`] - axum callback receiver
//! - [`withdrawal`] - two-stage withdrawal approval flow
//! - [`games`] - wager games (coinflip)

pub mod config;
pub mod currency;
pub mod games;
pub mod logging;
pub mod notify;
pub mod price;
pub mod processor;
pub mod reconcile;
pub mod store;
pub mod webhook;
pub mod withdrawal;

// Convenient re-exports at crate root
pub use config::{AppConfig, OddsPolicy};
pub use currency::Currency;
pub use notify::{DepositNotice, Notifier, RestNotifier};
pub use price::{HttpRateSource, PriceOracle, RateSource};
pub use processor::{HttpProcessor, PaymentProcessor};
pub use reconcile::{CallbackEvent, CallbackPayload, Reconciler};
pub use store::{
    AddressDirectory, CounterStore, DepositRecord, DepositStore, LedgerStore, StoreError,
    WithdrawalRecord, WithdrawalStore,
};
pub use withdrawal::{ApprovalFlow, Stage, WithdrawError};
