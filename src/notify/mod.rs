pub mod format;
pub mod telegram;

pub use telegram::TelegramClient;

use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http: {0}")]
    Http(String),

    #[error("telegram rejected message: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Http(e.to_string())
    }
}

/// Delivery of fully formatted text to the configured destination.
///
/// Delivery is fire-and-forget from the agent's point of view: callers log a
/// failure and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Writes messages to the log instead of delivering them. Used when no bot
/// token is configured.
#[derive(Default)]
pub struct LogNotifier {
    sent: Mutex<Vec<String>>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        info!("[notify] {}", text.replace('\n', " | "));
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        Ok(())
    }
}
