//! Deposit-confirmation reconciliation pipeline.
//!
//! One run per processor callback. Stages:
//!
//! 1. validate the payload shape (done by the webhook layer)
//! 2. resolve the depositing user from the address directory
//! 3. notify at confirmation 0 (pending) and 1 (confirmed)
//! 4. at confirmation 1 exactly: convert, credit once per
//!    (tx hash, currency), append the deposit record, broadcast
//! 5. patch any withdrawal "processing" message bound to the address
//!
//! Stages are independent effects: each catches and logs its own failure
//! and never aborts a sibling. An address owned by nobody is a no-op, not
//! an error.

use crate::currency::Currency;
use crate::notify::{DepositNotice, Notifier, NotifyError};
use crate::price::{PriceError, PriceOracle};
use crate::store::{
    AddressDirectory, DepositRecord, DepositStore, LedgerStore, StoreError, WithdrawalStore,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required fields")]
    MissingFields,
    #[error("unknown currency: {0}")]
    UnknownCurrency(String),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Price(#[from] PriceError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// Raw processor callback body; every field optional so validation can
/// report rather than the decoder reject.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackPayload {
    pub input_transaction_hash: Option<String>,
    #[serde(default)]
    pub confirmations: u32,
    pub input_address: Option<String>,
    pub value: Option<Decimal>,
    pub currency: Option<String>,
}

/// A validated callback, consumed once per pipeline run.
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub tx_hash: String,
    pub confirmations: u32,
    pub address: String,
    /// Amount in the currency's smallest units.
    pub value: Decimal,
    pub currency: Currency,
}

impl CallbackPayload {
    pub fn validate(self) -> Result<CallbackEvent, ValidationError> {
        let tx_hash = self
            .input_transaction_hash
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingFields)?;
        let address = self
            .input_address
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingFields)?;
        let value = self
            .value
            .filter(|v| *v > Decimal::ZERO)
            .ok_or(ValidationError::MissingFields)?;
        let code = self
            .currency
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingFields)?;
        let currency =
            Currency::from_str(&code).map_err(|_| ValidationError::UnknownCurrency(code))?;

        Ok(CallbackEvent {
            tx_hash,
            confirmations: self.confirmations,
            address,
            value,
            currency,
        })
    }
}

pub struct Reconciler {
    ledger: Arc<LedgerStore>,
    wallets: Arc<AddressDirectory>,
    deposits: Arc<DepositStore>,
    withdrawals: Arc<WithdrawalStore>,
    oracle: Arc<PriceOracle>,
    notifier: Arc<dyn Notifier>,
    /// Operations channel receiving confirmed-deposit broadcasts.
    deposit_channel: u64,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<LedgerStore>,
        wallets: Arc<AddressDirectory>,
        deposits: Arc<DepositStore>,
        withdrawals: Arc<WithdrawalStore>,
        oracle: Arc<PriceOracle>,
        notifier: Arc<dyn Notifier>,
        deposit_channel: u64,
    ) -> Self {
        Self {
            ledger,
            wallets,
            deposits,
            withdrawals,
            oracle,
            notifier,
            deposit_channel,
        }
    }

    /// Run the pipeline for one callback. Never fails: every stage's error
    /// is caught and logged here so siblings still run.
    pub async fn process(&self, event: CallbackEvent) {
        info!(
            tx = %event.tx_hash,
            confirmations = event.confirmations,
            address = %event.address,
            %event.currency,
            "processing callback"
        );

        let owner = match self.wallets.owner_of(&event.address).await {
            Ok(owner) => owner,
            Err(e) => {
                error!(error = %e, address = %event.address, "owner lookup failed");
                None
            }
        };

        match owner {
            Some((user, _)) => {
                if event.confirmations <= 1 {
                    if let Err(e) = self.notify_user(&user, &event).await {
                        error!(error = %e, user, tx = %event.tx_hash, "deposit notice failed");
                    }
                }
                if event.confirmations == 1 {
                    if let Err(e) = self.credit_deposit(&user, &event).await {
                        error!(error = %e, user, tx = %event.tx_hash, "deposit credit failed");
                    }
                }
            }
            None => {
                debug!(address = %event.address, "callback address not bound to any user");
            }
        }

        if let Err(e) = self.patch_payment_message(&event).await {
            error!(error = %e, tx = %event.tx_hash, "payment message patch failed");
        }
    }

    async fn notify_user(&self, user: &str, event: &CallbackEvent) -> Result<(), ReconcileError> {
        let amount_usd = self.oracle.to_usd(event.currency, event.value).await?;
        let notice = DepositNotice {
            currency: event.currency,
            tx_hash: event.tx_hash.clone(),
            amount_usd,
            confirmations: event.confirmations,
        };
        self.notifier.direct_message(user, &notice).await?;
        Ok(())
    }

    /// Credit exactly once per (tx hash, currency).
    ///
    /// The conversion runs before the credited-set claim so a rate outage
    /// leaves the pair unclaimed and a later redelivery can still credit.
    async fn credit_deposit(&self, user: &str, event: &CallbackEvent) -> Result<(), ReconcileError> {
        let amount_usd = self.oracle.to_usd(event.currency, event.value).await?;

        if !self
            .deposits
            .mark_credited(&event.tx_hash, event.currency)
            .await?
        {
            info!(tx = %event.tx_hash, %event.currency, "deposit already credited, skipping");
            return Ok(());
        }

        let new_balance = self.ledger.credit(user, amount_usd).await?;
        info!(user, amount = %amount_usd, balance = %new_balance, "deposit credited");

        self.deposits
            .record(user, DepositRecord::new(event.currency, amount_usd, &event.tx_hash))
            .await?;

        self.notifier
            .channel_post(
                self.deposit_channel,
                &format!(
                    "New deposit confirmed for {}: ${:.2} ({})",
                    user,
                    amount_usd,
                    event.currency.code().to_uppercase()
                ),
            )
            .await?;
        Ok(())
    }

    /// Outbound payments reuse the same callback shape as deposits; they
    /// are recognized by a withdrawal record bound to the address.
    async fn patch_payment_message(&self, event: &CallbackEvent) -> Result<(), ReconcileError> {
        let Some((channel_id, message_id)) = self
            .withdrawals
            .find_message_binding(&event.address, event.currency)
            .await?
        else {
            return Ok(());
        };

        let content = format!(
            "Your {} payment has been sent successfully. TXID: {}",
            event.currency.display_name(),
            event.currency.explorer_url(&event.tx_hash)
        );
        self.notifier
            .patch_message(channel_id, message_id, &content)
            .await?;
        Ok(())
    }
}
