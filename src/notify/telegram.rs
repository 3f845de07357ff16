use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::notify::{Notifier, NotifyError};

const API_BASE: &str = "https://api.telegram.org";
/// Long-poll window for getUpdates, in seconds.
pub const POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Telegram Bot API client bound to one chat.
pub struct TelegramClient {
    client: Client,
    token: String,
    chat_id: String,
}

impl TelegramClient {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .build()?;
        Ok(Self {
            client,
            token: cfg.telegram_token.clone(),
            chat_id: cfg.telegram_chat_id.clone(),
        })
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    async fn send_message(&self, text: &str, parse_mode: Option<&str>) -> Result<(), NotifyError> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode,
            disable_web_page_preview: true,
        };
        let resp = self.client.post(self.url("sendMessage")).json(&body).send().await?;
        let status = resp.status();
        let parsed: ApiResponse<serde_json::Value> = resp.json().await?;
        if status.is_success() && parsed.ok {
            return Ok(());
        }
        let reason = parsed
            .description
            .unwrap_or_else(|| format!("HTTP {status}"));
        if status == StatusCode::BAD_REQUEST {
            Err(NotifyError::Rejected(reason))
        } else {
            Err(NotifyError::Http(reason))
        }
    }

    /// Updates after `offset`, waiting up to the long-poll window for new ones.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, NotifyError> {
        let timeout = POLL_TIMEOUT_SECS.to_string();
        let offset = offset.to_string();
        let resp = self
            .client
            .get(self.url("getUpdates"))
            .query(&[
                ("offset", offset.as_str()),
                ("timeout", timeout.as_str()),
                ("allowed_updates", "[\"message\"]"),
            ])
            .send()
            .await?;
        let status = resp.status();
        let parsed: ApiResponse<Vec<Update>> = resp.json().await?;
        if !parsed.ok {
            return Err(NotifyError::Http(
                parsed.description.unwrap_or_else(|| format!("HTTP {status}")),
            ));
        }
        Ok(parsed.result.unwrap_or_default())
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    fn name(&self) -> &str {
        "telegram"
    }

    /// Sends as Markdown; text Telegram cannot parse as Markdown (stray
    /// underscores in sheet names, tickers like BRK_B) is re-sent as plain text.
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        match self.send_message(text, Some("Markdown")).await {
            Err(NotifyError::Rejected(reason)) => {
                debug!("Markdown rejected ({}), sending plain", reason);
                self.send_message(text, None).await.inspect_err(|e| {
                    warn!("Telegram delivery failed: {}", e);
                })
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_updates_payload() {
        let raw = r#"{"ok":true,"result":[
            {"update_id":101,"message":{"message_id":5,"chat":{"id":42,"type":"private"},"text":"/check nvda"}},
            {"update_id":102,"edited_message":{"message_id":5,"chat":{"id":42}}}
        ]}"#;
        let parsed: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        let updates = parsed.result.unwrap();
        assert_eq!(updates.len(), 2);
        let msg = updates[0].message.as_ref().unwrap();
        assert_eq!(msg.chat.id, 42);
        assert_eq!(msg.text.as_deref(), Some("/check nvda"));
        assert!(updates[1].message.is_none());
    }

    #[test]
    fn plain_send_omits_parse_mode() {
        let body = SendMessage {
            chat_id: "42",
            text: "hi",
            parse_mode: None,
            disable_web_page_preview: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("parse_mode").is_none());
        assert_eq!(json["chat_id"], "42");
    }

    #[test]
    fn error_payload_keeps_description() {
        let raw = r#"{"ok":false,"error_code":400,"description":"Bad Request: can't parse entities"}"#;
        let parsed: ApiResponse<serde_json::Value> = serde_json::from_str(raw).unwrap();
        assert!(!parsed.ok);
        assert!(parsed.description.unwrap().contains("parse entities"));
    }
}
