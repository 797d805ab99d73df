//! Deposit history plus the credited-transaction set.
//!
//! Histories keep the 20 most recent records per user. The credited set is
//! the idempotency gate for confirmation credits: a (tx hash, currency)
//! pair enters it exactly once, and only the inserting caller is allowed
//! to credit.

use super::{FileMap, StoreError};
use crate::currency::Currency;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Recent-history window per user; oldest records are evicted.
pub const RECENT_DEPOSITS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRecord {
    pub currency: String,
    /// USD value at credit time.
    pub amount: Decimal,
    pub tx_hash: String,
    pub timestamp: i64,
}

impl DepositRecord {
    pub fn new(currency: Currency, amount: Decimal, tx_hash: &str) -> Self {
        Self {
            currency: currency.code().to_string(),
            amount,
            tx_hash: tx_hash.to_string(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

pub struct DepositStore {
    history: FileMap<Vec<DepositRecord>>,
    credited: FileMap<i64>,
}

impl DepositStore {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            history: FileMap::new(data_dir.join("deposits.json")),
            credited: FileMap::new(data_dir.join("credited_txs.json")),
        }
    }

    /// Claim the credit for (tx hash, currency). Returns `true` for the
    /// first claim and `false` for every redelivery.
    pub async fn mark_credited(
        &self,
        tx_hash: &str,
        currency: Currency,
    ) -> Result<bool, StoreError> {
        let key = format!("{}:{}", tx_hash, currency.code());
        self.credited
            .mutate(|m| {
                if m.contains_key(&key) {
                    return Ok(false);
                }
                m.insert(key.clone(), Utc::now().timestamp());
                Ok(true)
            })
            .await
    }

    pub async fn record(&self, id: &str, record: DepositRecord) -> Result<(), StoreError> {
        self.history
            .mutate(|m| {
                let records = m.entry(id.to_string()).or_default();
                records.push(record.clone());
                if records.len() > RECENT_DEPOSITS {
                    let excess = records.len() - RECENT_DEPOSITS;
                    records.drain(..excess);
                }
                Ok(())
            })
            .await
    }

    pub async fn history(&self, id: &str) -> Result<Vec<DepositRecord>, StoreError> {
        self.history
            .read(|m| m.get(id).cloned().unwrap_or_default())
            .await
    }
}
