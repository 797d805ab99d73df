//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use chipvault::currency::Currency;
use chipvault::notify::{DepositNotice, Notifier, NotifyError};
use chipvault::price::{PriceError, PriceOracle, RateSource};
use chipvault::processor::{PaymentProcessor, ProcessorError};
use chipvault::reconcile::Reconciler;
use chipvault::store::{
    AddressDirectory, CounterStore, DepositStore, LedgerStore, WithdrawalStore,
};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub const OPS_CHANNEL: u64 = 500;
pub const OPERATOR_CHANNEL: u64 = 900;

pub fn temp_data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("chipvault-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Rate source pinned to one USD rate for every currency.
pub struct FixedRateSource {
    pub rate: Decimal,
    pub calls: AtomicUsize,
}

impl FixedRateSource {
    pub fn new(rate: i64) -> Self {
        Self {
            rate: Decimal::from(rate),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RateSource for FixedRateSource {
    async fn usd_rate(&self, _currency: Currency) -> Result<Decimal, PriceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rate)
    }
}

/// Processor stub with configurable liquidity and deterministic addresses.
pub struct StubProcessor {
    pub liquidity: AtomicU64,
    pub transfers: Mutex<Vec<(Currency, String, u64)>>,
    pub generated: AtomicUsize,
    pub tx: Option<String>,
}

impl StubProcessor {
    pub fn new() -> Self {
        Self {
            liquidity: AtomicU64::new(u64::MAX),
            transfers: Mutex::new(Vec::new()),
            generated: AtomicUsize::new(0),
            tx: Some("tx-out-1".to_string()),
        }
    }

    pub fn with_liquidity(liquidity: u64) -> Self {
        let p = Self::new();
        p.liquidity.store(liquidity, Ordering::SeqCst);
        p
    }
}

#[async_trait]
impl PaymentProcessor for StubProcessor {
    async fn generate_address(&self, currency: Currency) -> Result<String, ProcessorError> {
        let n = self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}-generated-{}", currency.code(), n))
    }

    async fn available_liquidity(&self, _currency: Currency) -> Result<u64, ProcessorError> {
        Ok(self.liquidity.load(Ordering::SeqCst))
    }

    async fn transfer(
        &self,
        currency: Currency,
        address: &str,
        amount: u64,
    ) -> Result<Option<String>, ProcessorError> {
        self.transfers
            .lock()
            .unwrap()
            .push((currency, address.to_string(), amount));
        Ok(self.tx.clone())
    }
}

/// Notifier that records everything it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    pub dms: Mutex<Vec<(String, DepositNotice)>>,
    pub posts: Mutex<Vec<(u64, String)>>,
    pub patches: Mutex<Vec<(u64, u64, String)>>,
    next_message_id: AtomicU64,
}

impl RecordingNotifier {
    pub fn dm_count(&self) -> usize {
        self.dms.lock().unwrap().len()
    }

    pub fn posts_to(&self, channel: u64) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, content)| content.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn direct_message(&self, user: &str, notice: &DepositNotice) -> Result<(), NotifyError> {
        self.dms
            .lock()
            .unwrap()
            .push((user.to_string(), notice.clone()));
        Ok(())
    }

    async fn channel_post(&self, channel_id: u64, content: &str) -> Result<u64, NotifyError> {
        self.posts
            .lock()
            .unwrap()
            .push((channel_id, content.to_string()));
        Ok(self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1000)
    }

    async fn patch_message(
        &self,
        channel_id: u64,
        message_id: u64,
        content: &str,
    ) -> Result<(), NotifyError> {
        self.patches
            .lock()
            .unwrap()
            .push((channel_id, message_id, content.to_string()));
        Ok(())
    }
}

/// Fully wired service graph over a throwaway data directory.
pub struct Harness {
    pub data_dir: PathBuf,
    pub ledger: Arc<LedgerStore>,
    pub wallets: Arc<AddressDirectory>,
    pub deposits: Arc<DepositStore>,
    pub withdrawals: Arc<WithdrawalStore>,
    pub counters: Arc<CounterStore>,
    pub oracle: Arc<PriceOracle>,
    pub rate_source: Arc<FixedRateSource>,
    pub processor: Arc<StubProcessor>,
    pub notifier: Arc<RecordingNotifier>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new(rate: i64) -> Self {
        let data_dir = temp_data_dir();
        let ledger = Arc::new(LedgerStore::open(&data_dir));
        let wallets = Arc::new(AddressDirectory::open(&data_dir));
        let deposits = Arc::new(DepositStore::open(&data_dir));
        let withdrawals = Arc::new(WithdrawalStore::open(&data_dir));
        let counters = Arc::new(CounterStore::open(&data_dir));
        let rate_source = Arc::new(FixedRateSource::new(rate));
        let oracle = Arc::new(PriceOracle::new(rate_source.clone()));
        let processor = Arc::new(StubProcessor::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            wallets.clone(),
            deposits.clone(),
            withdrawals.clone(),
            oracle.clone(),
            notifier.clone(),
            OPS_CHANNEL,
        ));
        Self {
            data_dir,
            ledger,
            wallets,
            deposits,
            withdrawals,
            counters,
            oracle,
            rate_source,
            processor,
            notifier,
            reconciler,
        }
    }

    /// Bind a deposit address for (user, currency) through the directory.
    pub async fn bind_address(&self, user: &str, currency: Currency) -> String {
        self.wallets
            .allocate(self.processor.as_ref(), user, currency)
            .await
            .unwrap()
    }
}
