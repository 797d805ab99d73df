//! Address directory: (user, currency) -> deposit address.
//!
//! Bindings are allocated on demand through the payment processor and never
//! reassigned afterwards. Concurrent allocations for the same pair coalesce
//! on one in-flight processor call.

use super::{FileMap, StoreError};
use crate::currency::Currency;
use crate::processor::{PaymentProcessor, ProcessorError};
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("address generation failed: {0}")]
    Processor(#[from] ProcessorError),
}

pub struct AddressDirectory {
    file: FileMap<HashMap<String, String>>,
    /// One slot per (user, currency) pair with an allocation in flight.
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl AddressDirectory {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            file: FileMap::new(data_dir.join("wallets.json")),
            inflight: DashMap::new(),
        }
    }

    /// Existing binding for (user, currency), if any.
    pub async fn address(&self, id: &str, currency: Currency) -> Result<Option<String>, StoreError> {
        self.file
            .read(|m| {
                m.get(id)
                    .and_then(|wallets| wallets.get(currency.code()))
                    .cloned()
            })
            .await
    }

    /// Return the existing binding or allocate one through the processor.
    ///
    /// A second caller arriving while the first allocation is in flight
    /// waits on the same slot and observes the first caller's address; the
    /// processor is called exactly once per never-before-seen pair.
    pub async fn allocate(
        &self,
        processor: &dyn PaymentProcessor,
        id: &str,
        currency: Currency,
    ) -> Result<String, AllocationError> {
        if let Some(address) = self.address(id, currency).await? {
            return Ok(address);
        }

        let key = format!("{}:{}", id, currency.code());
        let slot = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = slot.lock().await;

        // The in-flight winner has persisted by the time a waiter gets here.
        if let Some(address) = self.address(id, currency).await? {
            return Ok(address);
        }

        let address = processor.generate_address(currency).await?;
        self.file
            .mutate::<_, StoreError>(|m| {
                m.entry(id.to_string())
                    .or_default()
                    .insert(currency.code().to_string(), address.clone());
                Ok(())
            })
            .await?;
        info!(user = id, %currency, address = %address, "bound new deposit address");

        drop(_guard);
        self.inflight.remove(&key);
        Ok(address)
    }

    /// Reverse lookup used by the reconciliation pipeline: which user owns
    /// this deposit address, and in which currency?
    pub async fn owner_of(&self, address: &str) -> Result<Option<(String, Currency)>, StoreError> {
        self.file
            .read(|m| {
                for (user, wallets) in m {
                    for (code, bound) in wallets {
                        if bound == address {
                            match Currency::from_str(code) {
                                Ok(currency) => return Some((user.clone(), currency)),
                                Err(_) => {
                                    warn!(user, code, "unparseable currency code in wallets file");
                                    return None;
                                }
                            }
                        }
                    }
                }
                None
            })
            .await
    }
}
