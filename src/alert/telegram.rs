//! Telegram Bot API transport.

use super::{AlertError, AlertTransport};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Sends alerts to a single Telegram chat via `sendMessage`.
pub struct TelegramTransport {
    client: reqwest::Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramTransport {
    /// Both token and chat id must be set. Every request is bounded by
    /// `timeout` so an unresponsive API cannot stall the delivery queue.
    pub fn from_config(
        api_url: &str,
        bot_token: &str,
        chat_id: &str,
        timeout: Duration,
    ) -> Result<Self, AlertError> {
        if bot_token.is_empty() || chat_id.is_empty() {
            return Err(AlertError::NotConfigured);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.bot_token)
    }
}

#[async_trait]
impl AlertTransport for TelegramTransport {
    async fn send_alert(&self, text: &str) -> Result<(), AlertError> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            disable_web_page_preview: true,
        };

        let resp = self.client.post(self.endpoint()).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AlertError::Api {
                status: status.as_u16(),
                body,
            });
        }

        debug!(chat_id = %self.chat_id, "alert delivered to Telegram");
        Ok(())
    }
}
