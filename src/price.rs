//! Price oracle: crypto amounts (smallest units) -> USD.
//!
//! The spot rate is fetched at most once per 60 s window; every conversion
//! inside a window reuses the same rate, so two credits landing together
//! reconcile to the same USD value. A failed fetch is never cached and
//! never converts to zero: callers get `RateUnavailable` and abandon the
//! operation.

use crate::config::PriceConfig;
use crate::currency::Currency;
use async_trait::async_trait;
use cached::{Cached, TimedCache};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Spot-rate reuse window.
pub const RATE_WINDOW_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("price service unavailable: {0}")]
    RateUnavailable(String),
    #[error("price service returned no usd rate for {0}")]
    MissingRate(Currency),
    #[error("unusable spot rate for {0}")]
    InvalidRate(Currency),
}

#[async_trait]
pub trait RateSource: Send + Sync {
    /// Current USD rate for one whole unit of `currency`.
    async fn usd_rate(&self, currency: Currency) -> Result<Decimal, PriceError>;
}

pub struct HttpRateSource {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct RatePoint {
    usd: Option<Decimal>,
}

impl HttpRateSource {
    pub fn new(config: &PriceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build price http client");
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn usd_rate(&self, currency: Currency) -> Result<Decimal, PriceError> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url,
            currency.asset_name()
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PriceError::RateUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PriceError::RateUnavailable(format!(
                "status {}",
                resp.status().as_u16()
            )));
        }

        let body: HashMap<String, RatePoint> = resp
            .json()
            .await
            .map_err(|e| PriceError::RateUnavailable(e.to_string()))?;
        body.get(currency.asset_name())
            .and_then(|point| point.usd)
            .ok_or(PriceError::MissingRate(currency))
    }
}

pub struct PriceOracle {
    source: Arc<dyn RateSource>,
    cache: Mutex<TimedCache<Currency, Decimal>>,
}

impl PriceOracle {
    pub fn new(source: Arc<dyn RateSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(TimedCache::with_lifespan(RATE_WINDOW_SECS)),
        }
    }

    /// Spot rate for `currency`, at most one upstream fetch per window.
    ///
    /// The lock is held across the fetch so concurrent misses coalesce
    /// instead of hammering the price service.
    pub async fn rate(&self, currency: Currency) -> Result<Decimal, PriceError> {
        let mut cache = self.cache.lock().await;
        if let Some(rate) = cache.cache_get(&currency) {
            return Ok(*rate);
        }
        let rate = self.source.usd_rate(currency).await?;
        debug!(%currency, %rate, "fetched spot rate");
        cache.cache_set(currency, rate);
        Ok(rate)
    }

    /// Convert an amount in smallest units to USD.
    pub async fn to_usd(&self, currency: Currency, raw: Decimal) -> Result<Decimal, PriceError> {
        let rate = self.rate(currency).await?;
        Ok(raw / currency.smallest_unit_divisor() * rate)
    }

    /// Convert a USD amount to smallest units at the current spot rate.
    pub async fn to_smallest_units(
        &self,
        currency: Currency,
        usd: Decimal,
    ) -> Result<u64, PriceError> {
        use rust_decimal::prelude::ToPrimitive;

        let rate = self.rate(currency).await?;
        if rate <= Decimal::ZERO {
            return Err(PriceError::InvalidRate(currency));
        }
        (usd / rate * currency.smallest_unit_divisor())
            .trunc()
            .to_u64()
            .ok_or(PriceError::InvalidRate(currency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        rate: Decimal,
        calls: AtomicUsize,
        fail: bool,
    }

    impl FixedSource {
        fn new(rate: i64) -> Self {
            Self {
                rate: Decimal::from(rate),
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                rate: Decimal::ZERO,
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl RateSource for FixedSource {
        async fn usd_rate(&self, currency: Currency) -> Result<Decimal, PriceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PriceError::RateUnavailable("down".to_string()));
            }
            let _ = currency;
            Ok(self.rate)
        }
    }

    #[tokio::test]
    async fn test_rate_fetched_once_per_window() {
        let source = Arc::new(FixedSource::new(60_000));
        let oracle = PriceOracle::new(source.clone());

        oracle.rate(Currency::Btc).await.unwrap();
        oracle.rate(Currency::Btc).await.unwrap();
        oracle.to_usd(Currency::Btc, Decimal::from(1)).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_half_btc_at_sixty_thousand() {
        let oracle = PriceOracle::new(Arc::new(FixedSource::new(60_000)));
        let usd = oracle
            .to_usd(Currency::Btc, Decimal::from(50_000_000u64))
            .await
            .unwrap();
        assert_eq!(usd, Decimal::from(30_000));
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates_and_is_not_cached() {
        let source = Arc::new(FixedSource::failing());
        let oracle = PriceOracle::new(source.clone());

        assert!(oracle.rate(Currency::Ltc).await.is_err());
        assert!(oracle.rate(Currency::Ltc).await.is_err());
        // Each failed call retried upstream; nothing poisoned the cache.
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_usd_to_smallest_units() {
        let oracle = PriceOracle::new(Arc::new(FixedSource::new(100)));
        // $50 at $100/LTC = 0.5 LTC = 50_000_000 litoshi.
        let units = oracle
            .to_smallest_units(Currency::Ltc, Decimal::from(50))
            .await
            .unwrap();
        assert_eq!(units, 50_000_000);
    }
}
