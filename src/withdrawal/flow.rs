//! Two-stage withdrawal approval flow.
//!
//! The requester's balance is debited optimistically when the request is
//! made. The request then needs the requester's confirmation and an
//! operator's, in that order, before the processor transfer goes out.
//! Requests live in memory only: a crash between pre-debit and settlement
//! leaves the funds debited with no automatic recovery.

use super::state::Stage;
use crate::currency::Currency;
use crate::notify::{Notifier, NotifyError};
use crate::price::{PriceError, PriceOracle};
use crate::processor::{PaymentProcessor, ProcessorError};
use crate::store::{LedgerStore, PENDING_TX, StoreError, WithdrawalRecord, WithdrawalStore};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("not enough operator liquidity: available {available}, requested {requested}")]
    InsufficientLiquidity { available: u64, requested: u64 },
    #[error("unknown withdrawal request")]
    UnknownRequest,
    #[error("request is not awaiting this action")]
    InvalidStage,
    #[error("only the requester may act on this request")]
    NotRequester,
    #[error("operator privileges required")]
    NotOperator,
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Price(#[from] PriceError),
    #[error("transfer failed: {0}")]
    Processor(#[from] ProcessorError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl From<StoreError> for WithdrawError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientFunds => WithdrawError::InsufficientFunds,
            other => WithdrawError::Store(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    pub id: Uuid,
    pub requester: String,
    pub currency: Currency,
    /// USD amount, already debited from the requester.
    pub amount: Decimal,
    pub address: String,
    /// Requester-facing channel the flow posts into.
    pub channel_id: u64,
    /// The "processing" message, posted at user-confirm time.
    pub message_id: Option<u64>,
    pub stage: Stage,
    pub requested_at: i64,
}

pub struct ApprovalFlow {
    ledger: Arc<LedgerStore>,
    withdrawals: Arc<WithdrawalStore>,
    oracle: Arc<PriceOracle>,
    processor: Arc<dyn PaymentProcessor>,
    notifier: Arc<dyn Notifier>,
    operators: Vec<String>,
    operator_channel: u64,
    pending: DashMap<Uuid, WithdrawalRequest>,
}

impl ApprovalFlow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<LedgerStore>,
        withdrawals: Arc<WithdrawalStore>,
        oracle: Arc<PriceOracle>,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Arc<dyn Notifier>,
        operators: Vec<String>,
        operator_channel: u64,
    ) -> Self {
        Self {
            ledger,
            withdrawals,
            oracle,
            processor,
            notifier,
            operators,
            operator_channel,
            pending: DashMap::new(),
        }
    }

    fn is_operator(&self, user: &str) -> bool {
        self.operators.iter().any(|op| op == user)
    }

    /// Snapshot of a pending request, if it exists.
    pub fn get(&self, id: Uuid) -> Option<WithdrawalRequest> {
        self.pending.get(&id).map(|r| r.clone())
    }

    /// Open a request: pre-debit the requester and wait for their confirm.
    pub async fn request(
        &self,
        requester: &str,
        currency: Currency,
        amount: Decimal,
        address: &str,
        channel_id: u64,
    ) -> Result<Uuid, WithdrawError> {
        self.ledger.debit(requester, amount).await?;

        let id = Uuid::new_v4();
        let request = WithdrawalRequest {
            id,
            requester: requester.to_string(),
            currency,
            amount,
            address: address.to_string(),
            channel_id,
            message_id: None,
            stage: Stage::Requested,
            requested_at: Utc::now().timestamp(),
        };
        self.pending.insert(id, request);
        info!(%id, requester, %currency, %amount, "withdrawal requested, balance pre-debited");
        Ok(id)
    }

    /// Requester backs out: refund the pre-debit. Terminal.
    pub async fn user_deny(&self, id: Uuid, caller: &str) -> Result<(), WithdrawError> {
        self.check(id, caller, Actor::Requester, Stage::Requested)?;
        let Some((_, request)) = self
            .pending
            .remove_if(&id, |_, r| r.stage == Stage::Requested)
        else {
            return Err(WithdrawError::InvalidStage);
        };

        self.ledger.credit(&request.requester, request.amount).await?;
        info!(%id, requester = %request.requester, amount = %request.amount, "withdrawal denied by requester, refunded");

        if let Err(e) = self
            .notifier
            .channel_post(
                request.channel_id,
                "Withdrawal request canceled. Your balance has been refunded.",
            )
            .await
        {
            warn!(error = %e, %id, "cancel notice failed");
        }
        Ok(())
    }

    /// Requester confirms: post the processing message and hand the
    /// request to the operators.
    pub async fn user_confirm(&self, id: Uuid, caller: &str) -> Result<(), WithdrawError> {
        self.check(id, caller, Actor::Requester, Stage::Requested)?;
        let Some((_, mut request)) = self
            .pending
            .remove_if(&id, |_, r| r.stage == Stage::Requested)
        else {
            return Err(WithdrawError::InvalidStage);
        };

        let result = self.post_approval_messages(&mut request).await;
        match result {
            Ok(()) => {
                request.stage = Stage::UserConfirmed;
                self.pending.insert(id, request);
                Ok(())
            }
            Err(e) => {
                // Leave the request open so the confirm can be retried.
                self.pending.insert(id, request);
                Err(e)
            }
        }
    }

    async fn post_approval_messages(
        &self,
        request: &mut WithdrawalRequest,
    ) -> Result<(), WithdrawError> {
        let processing = self
            .notifier
            .channel_post(request.channel_id, "Withdrawal is processing...")
            .await?;
        request.message_id = Some(processing);

        self.notifier
            .channel_post(
                self.operator_channel,
                &format!(
                    "New withdrawal request {}: user {} | {} | ${:.2} | address {}. Operator confirmation required.",
                    request.id,
                    request.requester,
                    request.currency.code().to_uppercase(),
                    request.amount,
                    request.address
                ),
            )
            .await?;
        Ok(())
    }

    /// Operator settles the request: convert at the current spot rate,
    /// check processor liquidity, submit the transfer, record it, and
    /// patch the requester's processing message. Returns the tx hash (or
    /// the pending sentinel when the processor response omits it).
    ///
    /// A liquidity failure leaves the pre-debit in place and the request
    /// awaiting operator action; remediation is manual.
    pub async fn operator_confirm(&self, id: Uuid, caller: &str) -> Result<String, WithdrawError> {
        self.check(id, caller, Actor::Operator, Stage::UserConfirmed)?;
        let Some((_, mut request)) = self
            .pending
            .remove_if(&id, |_, r| r.stage == Stage::UserConfirmed)
        else {
            return Err(WithdrawError::InvalidStage);
        };

        match self.settle(&request).await {
            Ok(tx_hash) => {
                request.stage = Stage::Settled;
                info!(%id, tx = %tx_hash, "withdrawal settled");
                Ok(tx_hash)
            }
            Err(e) => {
                error!(error = %e, %id, "withdrawal settlement failed");
                // Funds stay debited; the request goes back to the
                // operator queue.
                self.pending.insert(id, request);
                Err(e)
            }
        }
    }

    async fn settle(&self, request: &WithdrawalRequest) -> Result<String, WithdrawError> {
        let requested_units = self
            .oracle
            .to_smallest_units(request.currency, request.amount)
            .await?;

        let available = self.processor.available_liquidity(request.currency).await?;
        if available < requested_units {
            return Err(WithdrawError::InsufficientLiquidity {
                available,
                requested: requested_units,
            });
        }

        let tx = self
            .processor
            .transfer(request.currency, &request.address, requested_units)
            .await?;
        let tx_hash = tx.unwrap_or_else(|| PENDING_TX.to_string());

        let mut record = WithdrawalRecord::new(
            request.currency,
            request.amount,
            &tx_hash,
            &request.address,
        );
        if let Some(message_id) = request.message_id {
            record = record.with_message(request.channel_id, message_id);
        }
        self.withdrawals.record(&request.requester, record).await?;

        if let Some(message_id) = request.message_id {
            let content = format!(
                "Withdrawal confirmed! Your {} payment of ${:.2} has been sent. Transaction: {}",
                request.currency.display_name(),
                request.amount,
                request.currency.explorer_url(&tx_hash)
            );
            if let Err(e) = self
                .notifier
                .patch_message(request.channel_id, message_id, &content)
                .await
            {
                warn!(error = %e, id = %request.id, "settled-message patch failed");
            }
        }
        Ok(tx_hash)
    }

    /// Operator rejects the request. The pre-debit is NOT refunded.
    pub async fn operator_deny(&self, id: Uuid, caller: &str) -> Result<(), WithdrawError> {
        self.check(id, caller, Actor::Operator, Stage::UserConfirmed)?;
        let Some((_, request)) = self
            .pending
            .remove_if(&id, |_, r| r.stage == Stage::UserConfirmed)
        else {
            return Err(WithdrawError::InvalidStage);
        };

        info!(%id, requester = %request.requester, "withdrawal denied by operator");
        if let Some(message_id) = request.message_id {
            if let Err(e) = self
                .notifier
                .patch_message(
                    request.channel_id,
                    message_id,
                    "Withdrawal canceled by the operator.",
                )
                .await
            {
                warn!(error = %e, %id, "denial patch failed");
            }
        }
        Ok(())
    }

    fn check(
        &self,
        id: Uuid,
        caller: &str,
        actor: Actor,
        expected: Stage,
    ) -> Result<(), WithdrawError> {
        let request = self.pending.get(&id).ok_or(WithdrawError::UnknownRequest)?;
        match actor {
            Actor::Requester if request.requester != caller => {
                return Err(WithdrawError::NotRequester);
            }
            Actor::Operator if !self.is_operator(caller) => {
                return Err(WithdrawError::NotOperator);
            }
            _ => {}
        }
        if request.stage != expected {
            return Err(WithdrawError::InvalidStage);
        }
        Ok(())
    }
}

enum Actor {
    Requester,
    Operator,
}
