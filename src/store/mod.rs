pub mod json;
pub mod sheets;

pub use json::JsonStore;
pub use sheets::SheetsStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ExitRecord, Ledger, Position};
use crate::trading::PerformanceSummary;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("http: {0}")]
    Http(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("malformed row in {sheet}: {reason}")]
    Row { sheet: String, reason: String },

    #[error("{0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Http(e.to_string())
    }
}

/// Durable record of both position ledgers and their daily performance rows.
///
/// Rows are append-mostly: the only in-place change to a position is the
/// single OPEN -> CLOSED transition made by `update_exit`.
#[async_trait]
pub trait PositionStore: Send + Sync {
    fn name(&self) -> &str;

    async fn append(&self, position: &Position) -> Result<(), StoreError>;

    /// Oldest open position for `ticker` in `ledger`.
    async fn find_open_by_ticker(
        &self,
        ledger: Ledger,
        ticker: &str,
    ) -> Result<Option<Position>, StoreError>;

    async fn find_by_id(&self, ledger: Ledger, id: &str) -> Result<Option<Position>, StoreError>;

    /// Writes the exit fields and terminal status. Returns `false` without
    /// writing when the row is missing or already closed.
    async fn update_exit(
        &self,
        ledger: Ledger,
        id: &str,
        exit: &ExitRecord,
    ) -> Result<bool, StoreError>;

    async fn list_open(&self, ledger: Ledger) -> Result<Vec<Position>, StoreError>;

    async fn list_all(&self, ledger: Ledger) -> Result<Vec<Position>, StoreError>;

    /// Replaces the row for `summary.date`, or appends one.
    async fn upsert_performance(
        &self,
        ledger: Ledger,
        summary: &PerformanceSummary,
    ) -> Result<(), StoreError>;

    async fn latest_performance(
        &self,
        ledger: Ledger,
    ) -> Result<Option<PerformanceSummary>, StoreError>;
}
