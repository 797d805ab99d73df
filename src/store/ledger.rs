//! Ledger store: user id -> USD balance.
//!
//! The only mutation path for balances. Credits and debits run inside the
//! store's critical section; a debit never leaves a negative balance.

use super::{FileMap, StoreError};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

pub struct LedgerStore {
    file: FileMap<Decimal>,
    audit_path: PathBuf,
}

/// One line of `admin_audit.jsonl`, written for every balance override.
#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    timestamp: i64,
    admin: &'a str,
    target: &'a str,
    old_balance: Decimal,
    new_balance: Decimal,
}

impl LedgerStore {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            file: FileMap::new(data_dir.join("balances.json")),
            audit_path: data_dir.join("admin_audit.jsonl"),
        }
    }

    /// Current balance, zero for unknown accounts.
    pub async fn balance(&self, id: &str) -> Result<Decimal, StoreError> {
        self.file
            .read(|m| m.get(id).copied().unwrap_or(Decimal::ZERO))
            .await
    }

    /// Add `amount` to the account, creating it at zero first. Returns the
    /// new balance.
    pub async fn credit(&self, id: &str, amount: Decimal) -> Result<Decimal, StoreError> {
        if amount <= Decimal::ZERO {
            return Err(StoreError::InvalidAmount);
        }
        self.file
            .mutate(|m| {
                let entry = m.entry(id.to_string()).or_insert(Decimal::ZERO);
                *entry += amount;
                Ok(*entry)
            })
            .await
    }

    /// Subtract `amount`; fails with `InsufficientFunds` (no mutation) when
    /// the balance is short. Returns the new balance.
    pub async fn debit(&self, id: &str, amount: Decimal) -> Result<Decimal, StoreError> {
        if amount <= Decimal::ZERO {
            return Err(StoreError::InvalidAmount);
        }
        self.file
            .mutate(|m| {
                let balance = m.get(id).copied().unwrap_or(Decimal::ZERO);
                if balance < amount {
                    return Err(StoreError::InsufficientFunds);
                }
                m.insert(id.to_string(), balance - amount);
                Ok(balance - amount)
            })
            .await
    }

    /// Move `amount` between two accounts in a single critical section
    /// (the tip primitive). Returns (sender, recipient) balances.
    pub async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<(Decimal, Decimal), StoreError> {
        if amount <= Decimal::ZERO {
            return Err(StoreError::InvalidAmount);
        }
        self.file
            .mutate(|m| {
                let sender = m.get(from).copied().unwrap_or(Decimal::ZERO);
                if sender < amount {
                    return Err(StoreError::InsufficientFunds);
                }
                let recipient = m.get(to).copied().unwrap_or(Decimal::ZERO);
                m.insert(from.to_string(), sender - amount);
                m.insert(to.to_string(), recipient + amount);
                Ok((sender - amount, recipient + amount))
            })
            .await
    }

    /// Operator override: set an absolute balance and append an audit line.
    pub async fn set_balance(
        &self,
        admin: &str,
        id: &str,
        amount: Decimal,
    ) -> Result<Decimal, StoreError> {
        if amount < Decimal::ZERO {
            return Err(StoreError::InvalidAmount);
        }
        let old = self
            .file
            .mutate(|m| {
                let old = m.get(id).copied().unwrap_or(Decimal::ZERO);
                m.insert(id.to_string(), amount);
                Ok(old)
            })
            .await?;

        if let Err(e) = self.append_audit(admin, id, old, amount).await {
            // The override already happened; a lost audit line is logged,
            // not rolled back.
            warn!(error = %e, admin, target = id, "failed to append audit entry");
        }
        info!(admin, target = id, %old, new = %amount, "balance override");
        Ok(amount)
    }

    async fn append_audit(
        &self,
        admin: &str,
        target: &str,
        old_balance: Decimal,
        new_balance: Decimal,
    ) -> Result<(), StoreError> {
        let entry = AuditEntry {
            timestamp: Utc::now().timestamp(),
            admin,
            target,
            old_balance,
            new_balance,
        };
        let mut line = serde_json::to_vec(&entry).map_err(|e| StoreError::Decode {
            path: self.audit_path.clone(),
            source: e,
        })?;
        line.push(b'\n');

        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_path)
            .await
            .map_err(|e| StoreError::Io {
                path: self.audit_path.clone(),
                source: e,
            })?;
        f.write_all(&line).await.map_err(|e| StoreError::Io {
            path: self.audit_path.clone(),
            source: e,
        })
    }
}
