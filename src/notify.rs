//! Notification dispatcher.
//!
//! The chat client itself is an external collaborator; this module only
//! knows how to push content at it: direct messages to a user, posts to a
//! channel, and patches of previously-sent messages. `RestNotifier` talks
//! to the chat gateway's REST surface.

use crate::config::ChatConfig;
use crate::currency::Currency;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("chat gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat gateway returned status {0}")]
    Status(u16),
    #[error("unexpected chat gateway response: {0}")]
    BadResponse(String),
}

/// Deposit progress notice sent as a direct message.
#[derive(Debug, Clone)]
pub struct DepositNotice {
    pub currency: Currency,
    pub tx_hash: String,
    pub amount_usd: Decimal,
    pub confirmations: u32,
}

impl DepositNotice {
    pub fn is_pending(&self) -> bool {
        self.confirmations == 0
    }

    pub fn render(&self) -> String {
        let explorer = self.currency.explorer_url(&self.tx_hash);
        if self.is_pending() {
            format!(
                "Pending deposit detected from your {} address. Amount: ${:.2} | {} | Confirmations: 0/1. \
                 It will be credited automatically once confirmed.",
                self.currency.code().to_uppercase(),
                self.amount_usd,
                explorer
            )
        } else {
            format!(
                "Your {} deposit has been confirmed. Amount: ${:.2} | {} | Confirmations: 1/1.",
                self.currency.code().to_uppercase(),
                self.amount_usd,
                explorer
            )
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Direct-message a deposit notice to a user.
    async fn direct_message(&self, user: &str, notice: &DepositNotice) -> Result<(), NotifyError>;

    /// Post to a channel; returns the new message id so it can be patched
    /// later.
    async fn channel_post(&self, channel_id: u64, content: &str) -> Result<u64, NotifyError>;

    /// Replace the content of a previously-posted message.
    async fn patch_message(
        &self,
        channel_id: u64,
        message_id: u64,
        content: &str,
    ) -> Result<(), NotifyError>;
}

pub struct RestNotifier {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct PostedMessage {
    id: u64,
}

impl RestNotifier {
    pub fn new(config: &ChatConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("failed to build chat gateway http client");
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    async fn post_json(
        &self,
        url: String,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, NotifyError> {
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status().as_u16()));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Notifier for RestNotifier {
    async fn direct_message(&self, user: &str, notice: &DepositNotice) -> Result<(), NotifyError> {
        let url = format!("{}/users/{}/messages", self.base_url, user);
        self.post_json(url, json!({ "content": notice.render() }))
            .await?;
        Ok(())
    }

    async fn channel_post(&self, channel_id: u64, content: &str) -> Result<u64, NotifyError> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel_id);
        let resp = self.post_json(url, json!({ "content": content })).await?;
        let posted: PostedMessage = resp
            .json()
            .await
            .map_err(|e| NotifyError::BadResponse(e.to_string()))?;
        Ok(posted.id)
    }

    async fn patch_message(
        &self,
        channel_id: u64,
        message_id: u64,
        content: &str,
    ) -> Result<(), NotifyError> {
        let url = format!(
            "{}/channels/{}/messages/{}",
            self.base_url, channel_id, message_id
        );
        let resp = self
            .client
            .patch(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "content": content }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}
