pub mod replay;
pub mod yahoo;

pub use replay::ReplayMarket;
pub use yahoo::YahooClient;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{OptionChain, PriceBand, PriceSeries};

/// Range used when only the latest bar is needed.
pub const BAND_RANGE: &str = "5d";

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("unknown ticker: {0}")]
    NotFound(String),

    #[error("no bars returned for {0}")]
    Empty(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response format: {0}")]
    Format(String),
}

impl MarketDataError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, MarketDataError::RateLimited { .. })
    }
}

/// Daily bars, option chains and the most-active list for equity tickers.
#[async_trait]
pub trait MarketData: Send + Sync {
    fn name(&self) -> &str;

    /// Daily bars, ascending by date. `range` uses the provider's lookback
    /// spelling ("5d", "6mo", "2y").
    async fn get_history(&self, ticker: &str, range: &str) -> Result<PriceSeries, MarketDataError>;

    async fn get_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>, MarketDataError>;

    async fn get_option_chain(
        &self,
        ticker: &str,
        expiry: NaiveDate,
    ) -> Result<OptionChain, MarketDataError>;

    /// Today's most active symbols, most active first.
    async fn get_top_movers(&self, count: usize) -> Result<Vec<String>, MarketDataError>;

    /// Last/high/low of the most recent session.
    async fn get_band(&self, ticker: &str) -> Result<PriceBand, MarketDataError> {
        let series = self.get_history(ticker, BAND_RANGE).await?;
        series
            .last()
            .map(PriceBand::from)
            .ok_or_else(|| MarketDataError::Empty(ticker.to_string()))
    }
}
