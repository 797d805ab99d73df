use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Directory holding the JSON state files (balances, wallets, ...).
    pub data_dir: String,
    pub listener: ListenerConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub price: PriceConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    /// User ids allowed to settle withdrawals and override balances.
    #[serde(default)]
    pub operators: Vec<String>,
    #[serde(default)]
    pub coinflip: CoinflipConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Payment processor credentials and endpoints.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessorConfig {
    pub base_url: String,
    pub account: String,
    pub transfer_key: String,
    pub timeout_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://apirone.com/api/v2".to_string(),
            account: String::new(),
            transfer_key: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PriceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Chat-gateway REST endpoint used by the notification dispatcher.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatConfig {
    pub base_url: String,
    pub token: String,
    /// Operations channel receiving confirmed-deposit broadcasts.
    pub deposit_channel_id: u64,
    /// Channel where operator approval requests are posted.
    pub operator_channel_id: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8800".to_string(),
            token: String::new(),
            deposit_channel_id: 0,
            operator_channel_id: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CoinflipConfig {
    #[serde(default)]
    pub odds: OddsPolicy,
}

/// Outcome policy for the coinflip game.
///
/// `HouseEdge` reproduces the legacy behavior: the player's win
/// probability decays after each win and a stake above
/// `forced_loss_ratio` of their balance always loses.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OddsPolicy {
    #[default]
    Fair,
    HouseEdge {
        win_decay: f64,
        min_win_probability: f64,
        forced_loss_ratio: f64,
    },
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "chipvault.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            data_dir: "./data".to_string(),
            listener: ListenerConfig::default(),
            processor: ProcessorConfig::default(),
            price: PriceConfig::default(),
            chat: ChatConfig::default(),
            operators: Vec::new(),
            coinflip: CoinflipConfig::default(),
        }
    }
}
