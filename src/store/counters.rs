//! Named monotonic sequence counters (game numbers and the like).
//!
//! Backed by one flat JSON object: `{ "coinflip": 42 }`.

use super::{FileMap, StoreError};
use std::path::Path;

pub struct CounterStore {
    file: FileMap<u64>,
}

impl CounterStore {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            file: FileMap::new(data_dir.join("counters.json")),
        }
    }

    /// Return the current value for `name` (starting at 1) and advance it.
    pub async fn next(&self, name: &str) -> Result<u64, StoreError> {
        self.file
            .mutate(|m| {
                let entry = m.entry(name.to_string()).or_insert(1);
                let current = *entry;
                *entry = current + 1;
                Ok(current)
            })
            .await
    }
}
