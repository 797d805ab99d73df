//! Supported deposit/withdrawal currencies.
//!
//! Every amount crossing the processor boundary is expressed in the
//! currency's smallest unit (satoshi, wei, ...); everything inside the
//! ledger is USD. This module owns the mapping between the two worlds.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currency codes accepted by the payment processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "btc")]
    Btc,
    #[serde(rename = "ltc")]
    Ltc,
    #[serde(rename = "eth")]
    Eth,
    #[serde(rename = "usdt@trx")]
    UsdtTrx,
}

impl Currency {
    pub const ALL: [Currency; 4] = [
        Currency::Btc,
        Currency::Ltc,
        Currency::Eth,
        Currency::UsdtTrx,
    ];

    /// Wire code used by the processor and in store files.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Btc => "btc",
            Currency::Ltc => "ltc",
            Currency::Eth => "eth",
            Currency::UsdtTrx => "usdt@trx",
        }
    }

    /// Canonical asset name used by the price service and block explorer.
    pub fn asset_name(&self) -> &'static str {
        match self {
            Currency::Btc => "bitcoin",
            Currency::Ltc => "litecoin",
            Currency::Eth => "ethereum",
            Currency::UsdtTrx => "tether",
        }
    }

    /// Human-readable display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Currency::Btc => "Bitcoin",
            Currency::Ltc => "Litecoin",
            Currency::Eth => "Ethereum",
            Currency::UsdtTrx => "Tether (TRC-20)",
        }
    }

    /// Smallest units per whole coin (satoshi for BTC, wei for ETH, ...).
    pub fn smallest_unit_divisor(&self) -> Decimal {
        match self {
            Currency::Btc | Currency::Ltc => Decimal::from(100_000_000u64),
            Currency::Eth => Decimal::from(1_000_000_000_000_000_000u64),
            Currency::UsdtTrx => Decimal::from(1_000_000u64),
        }
    }

    /// Block-explorer link for a transaction hash.
    pub fn explorer_url(&self, tx_hash: &str) -> String {
        format!(
            "https://blockchair.com/{}/transaction/{}",
            self.asset_name(),
            tx_hash
        )
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "btc" => Ok(Currency::Btc),
            "ltc" => Ok(Currency::Ltc),
            "eth" => Ok(Currency::Eth),
            "usdt@trx" => Ok(Currency::UsdtTrx),
            _ => Err(format!("Unknown currency code: {}", s)),
        }
    }
}
