//! JSON-file backed state stores.
//!
//! Every durable mapping (balances, wallets, deposit/withdrawal history,
//! counters) is one JSON object keyed by user id, rewritten in full on each
//! mutation. Reads go through a 30 s TTL cache; writes are a
//! read-modify-write cycle executed inside a per-store critical section so
//! interleaved mutators cannot lose updates, then flushed back to disk with
//! the cache timestamp refreshed.

pub mod counters;
pub mod deposits;
pub mod ledger;
pub mod wallets;
pub mod withdrawals;

pub use counters::CounterStore;
pub use deposits::{DepositRecord, DepositStore, RECENT_DEPOSITS};
pub use ledger::LedgerStore;
pub use wallets::AddressDirectory;
pub use withdrawals::{PENDING_TX, WithdrawalRecord, WithdrawalStore};

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Freshness window for cached store contents.
pub const CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed store file {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("invalid amount: must be positive")]
    InvalidAmount,
}

struct CacheState<V> {
    map: HashMap<String, V>,
    loaded_at: Option<Instant>,
}

/// A cached JSON object file: `{ "<key>": <value>, ... }`.
///
/// The mutex covers the whole load-modify-flush cycle; callers pass
/// synchronous closures so no await point can interleave another writer.
pub(crate) struct FileMap<V> {
    path: PathBuf,
    ttl: Duration,
    state: Mutex<CacheState<V>>,
}

impl<V> FileMap<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            ttl: CACHE_TTL,
            state: Mutex::new(CacheState {
                map: HashMap::new(),
                loaded_at: None,
            }),
        }
    }

    /// Read access against cache-fresh contents.
    pub(crate) async fn read<R>(
        &self,
        f: impl FnOnce(&HashMap<String, V>) -> R,
    ) -> Result<R, StoreError> {
        let mut state = self.state.lock().await;
        self.refresh_if_stale(&mut state).await?;
        Ok(f(&state.map))
    }

    /// Read-modify-write as one non-preemptible unit, flushed in full.
    ///
    /// An `Err` from the closure aborts the cycle without touching disk.
    pub(crate) async fn mutate<R, E>(
        &self,
        f: impl FnOnce(&mut HashMap<String, V>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let mut state = self.state.lock().await;
        self.refresh_if_stale(&mut state).await.map_err(E::from)?;
        let out = f(&mut state.map)?;
        self.flush(&state.map).await.map_err(E::from)?;
        state.loaded_at = Some(Instant::now());
        Ok(out)
    }

    async fn refresh_if_stale(&self, state: &mut CacheState<V>) -> Result<(), StoreError> {
        let fresh = state
            .loaded_at
            .map(|at| at.elapsed() < self.ttl)
            .unwrap_or(false);
        if fresh {
            return Ok(());
        }

        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                state.map = serde_json::from_slice(&bytes).map_err(|e| StoreError::Decode {
                    path: self.path.clone(),
                    source: e,
                })?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "store file missing, starting empty");
                state.map = HashMap::new();
            }
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source: e,
                });
            }
        }
        state.loaded_at = Some(Instant::now());
        Ok(())
    }

    async fn flush(&self, map: &HashMap<String, V>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(map).map_err(|e| StoreError::Decode {
            path: self.path.clone(),
            source: e,
        })?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| StoreError::Io {
                path: self.path.clone(),
                source: e,
            })
    }
}

/// Create the data directory if needed and return it as an owned path.
pub fn prepare_data_dir(dir: &Path) -> Result<PathBuf, StoreError> {
    std::fs::create_dir_all(dir).map_err(|e| StoreError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    Ok(dir.to_path_buf())
}
