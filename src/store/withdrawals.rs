//! Withdrawal history, unbounded per user.
//!
//! Records double as the message-patch index: an outbound payment callback
//! is matched to its originating "processing" message by (destination
//! address, currency).

use super::{FileMap, StoreError};
use crate::currency::Currency;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Placeholder hash recorded when the processor response omits the tx id.
pub const PENDING_TX: &str = "pending";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub currency: String,
    /// USD value debited from the requester.
    pub amount: Decimal,
    pub tx_hash: String,
    pub timestamp: i64,
    /// Destination address on the source chain.
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<u64>,
}

impl WithdrawalRecord {
    pub fn new(currency: Currency, amount: Decimal, tx_hash: &str, address: &str) -> Self {
        Self {
            currency: currency.code().to_string(),
            amount,
            tx_hash: tx_hash.to_string(),
            timestamp: Utc::now().timestamp(),
            address: address.to_string(),
            channel_id: None,
            message_id: None,
        }
    }

    pub fn with_message(mut self, channel_id: u64, message_id: u64) -> Self {
        self.channel_id = Some(channel_id);
        self.message_id = Some(message_id);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.tx_hash == PENDING_TX || self.tx_hash.is_empty()
    }

    pub fn currency(&self) -> Option<Currency> {
        Currency::from_str(&self.currency).ok()
    }
}

pub struct WithdrawalStore {
    file: FileMap<Vec<WithdrawalRecord>>,
}

impl WithdrawalStore {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            file: FileMap::new(data_dir.join("withdrawals.json")),
        }
    }

    pub async fn record(&self, id: &str, record: WithdrawalRecord) -> Result<(), StoreError> {
        self.file
            .mutate(|m| {
                m.entry(id.to_string()).or_default().push(record.clone());
                Ok(())
            })
            .await
    }

    pub async fn history(&self, id: &str) -> Result<Vec<WithdrawalRecord>, StoreError> {
        self.file
            .read(|m| m.get(id).cloned().unwrap_or_default())
            .await
    }

    /// First message binding matching (address, currency), for patching a
    /// "processing" message once the payment's tx hash is known.
    pub async fn find_message_binding(
        &self,
        address: &str,
        currency: Currency,
    ) -> Result<Option<(u64, u64)>, StoreError> {
        self.file
            .read(|m| {
                for records in m.values() {
                    for record in records {
                        if record.address == address && record.currency == currency.code() {
                            if let (Some(channel), Some(message)) =
                                (record.channel_id, record.message_id)
                            {
                                return Some((channel, message));
                            }
                        }
                    }
                }
                None
            })
            .await
    }
}
