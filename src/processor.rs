//! Payment-processor client.
//!
//! Outbound surface to the custodial processor: deposit-address generation,
//! operator-account liquidity, and on-chain transfers. Amounts cross this
//! boundary in smallest units only. Every call carries an explicit timeout.

use crate::config::ProcessorConfig;
use crate::currency::Currency;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("processor returned status {0}")]
    Status(u16),
    #[error("unexpected processor response: {0}")]
    BadResponse(String),
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Generate a fresh deposit address for the given currency.
    async fn generate_address(&self, currency: Currency) -> Result<String, ProcessorError>;

    /// Operator-held funds available for payouts, in smallest units.
    async fn available_liquidity(&self, currency: Currency) -> Result<u64, ProcessorError>;

    /// Send `amount` smallest units to `address`. Returns the resulting
    /// transaction id, or `None` when the processor response omits it.
    async fn transfer(
        &self,
        currency: Currency,
        address: &str,
        amount: u64,
    ) -> Result<Option<String>, ProcessorError>;
}

pub struct HttpProcessor {
    client: reqwest::Client,
    base_url: String,
    account: String,
    transfer_key: String,
}

#[derive(Serialize)]
struct AddressRequest {
    currency: String,
}

#[derive(Deserialize)]
struct AddressResponse {
    address: Option<String>,
}

#[derive(Deserialize)]
struct BalanceResponse {
    #[serde(default)]
    balance: Vec<BalanceItem>,
}

#[derive(Deserialize)]
struct BalanceItem {
    currency: String,
    available: u64,
}

#[derive(Serialize)]
struct TransferRequest<'a> {
    currency: &'a str,
    #[serde(rename = "transfer-key")]
    transfer_key: &'a str,
    destinations: Vec<TransferDestination<'a>>,
    fee: &'a str,
    #[serde(rename = "subtract-fee-from-amount")]
    subtract_fee_from_amount: bool,
}

#[derive(Serialize)]
struct TransferDestination<'a> {
    address: &'a str,
    amount: u64,
}

#[derive(Deserialize)]
struct TransferResponse {
    #[serde(default)]
    txs: Vec<String>,
}

impl HttpProcessor {
    pub fn new(config: &ProcessorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build processor http client");
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            account: config.account.clone(),
            transfer_key: config.transfer_key.clone(),
        }
    }
}

#[async_trait]
impl PaymentProcessor for HttpProcessor {
    async fn generate_address(&self, currency: Currency) -> Result<String, ProcessorError> {
        let url = format!("{}/accounts/{}/addresses", self.base_url, self.account);
        let resp = self
            .client
            .post(&url)
            .json(&AddressRequest {
                currency: currency.code().to_string(),
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ProcessorError::Status(resp.status().as_u16()));
        }

        let body: AddressResponse = resp.json().await?;
        let address = body
            .address
            .ok_or_else(|| ProcessorError::BadResponse("missing address field".to_string()))?;
        info!(%currency, address = %address, "generated deposit address");
        Ok(address)
    }

    async fn available_liquidity(&self, currency: Currency) -> Result<u64, ProcessorError> {
        let url = format!("{}/accounts/{}/balance", self.base_url, self.account);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(ProcessorError::Status(resp.status().as_u16()));
        }

        let body: BalanceResponse = resp.json().await?;
        Ok(body
            .balance
            .iter()
            .find(|item| item.currency == currency.code())
            .map(|item| item.available)
            .unwrap_or(0))
    }

    async fn transfer(
        &self,
        currency: Currency,
        address: &str,
        amount: u64,
    ) -> Result<Option<String>, ProcessorError> {
        let url = format!("{}/accounts/{}/transfer", self.base_url, self.account);
        let resp = self
            .client
            .post(&url)
            .json(&TransferRequest {
                currency: currency.code(),
                transfer_key: &self.transfer_key,
                destinations: vec![TransferDestination { address, amount }],
                fee: "normal",
                subtract_fee_from_amount: true,
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ProcessorError::Status(resp.status().as_u16()));
        }

        let body: TransferResponse = resp.json().await?;
        let tx = body.txs.into_iter().next();
        info!(%currency, amount, tx = tx.as_deref().unwrap_or("n/a"), "transfer submitted");
        Ok(tx)
    }
}
