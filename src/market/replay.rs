use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::market::{MarketData, MarketDataError};
use crate::models::{OptionChain, PriceBar, PriceSeries};

#[derive(Default)]
struct ReplayState {
    cursor: Option<NaiveDate>,
    rate_limited: HashSet<String>,
    calls: Vec<String>,
    chain_overrides: HashMap<(String, NaiveDate), OptionChain>,
}

/// A provider that replays pre-loaded daily bars and option chains.
/// A cursor date controls which bars are visible: only bars dated on or
/// before it are returned, simulating a forward walk through history.
#[derive(Default)]
pub struct ReplayMarket {
    bars: HashMap<String, Vec<PriceBar>>,
    expirations: HashMap<String, Vec<NaiveDate>>,
    chains: HashMap<(String, NaiveDate), OptionChain>,
    movers: Vec<String>,
    state: Mutex<ReplayState>,
}

impl ReplayMarket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bars must be sorted oldest-first.
    pub fn load(&mut self, ticker: &str, series: PriceSeries) {
        self.bars.insert(ticker.to_string(), series.as_slice().to_vec());
    }

    pub fn load_chain(&mut self, ticker: &str, expiry: NaiveDate, chain: OptionChain) {
        let exps = self.expirations.entry(ticker.to_string()).or_default();
        if !exps.contains(&expiry) {
            exps.push(expiry);
            exps.sort();
        }
        self.chains.insert((ticker.to_string(), expiry), chain);
    }

    pub fn load_movers(&mut self, tickers: &[&str]) {
        self.movers = tickers.iter().map(|t| t.to_string()).collect();
    }

    /// Replaces a loaded chain, e.g. to move premiums between exit passes.
    pub fn update_chain(&self, ticker: &str, expiry: NaiveDate, chain: OptionChain) {
        self.with_state(|s| {
            s.chain_overrides.insert((ticker.to_string(), expiry), chain);
        });
    }

    /// Moves the visibility cursor; `None` shows everything.
    pub fn set_date(&self, date: Option<NaiveDate>) {
        self.with_state(|s| s.cursor = date);
    }

    /// The next history request for `ticker` fails with a rate limit.
    pub fn rate_limit_once(&self, ticker: &str) {
        self.with_state(|s| {
            s.rate_limited.insert(ticker.to_string());
        });
    }

    /// Tickers requested through `get_history`, in call order.
    pub fn history_calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ReplayState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn visible(&self, ticker: &str) -> Vec<PriceBar> {
        let cursor = self.with_state(|s| s.cursor);
        let Some(all) = self.bars.get(ticker) else {
            return Vec::new();
        };
        let end = match cursor {
            Some(c) => all.partition_point(|b| b.date <= c),
            None => all.len(),
        };
        all[..end].to_vec()
    }
}

#[async_trait]
impl MarketData for ReplayMarket {
    fn name(&self) -> &str {
        "replay"
    }

    async fn get_history(&self, ticker: &str, _range: &str) -> Result<PriceSeries, MarketDataError> {
        let limited = self.with_state(|s| {
            s.calls.push(ticker.to_string());
            s.rate_limited.remove(ticker)
        });
        if limited {
            return Err(MarketDataError::RateLimited { retry_after_secs: 0 });
        }
        if !self.bars.contains_key(ticker) {
            return Err(MarketDataError::NotFound(ticker.to_string()));
        }
        let bars = self.visible(ticker);
        if bars.is_empty() {
            return Err(MarketDataError::Empty(ticker.to_string()));
        }
        Ok(PriceSeries::new(bars))
    }

    async fn get_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>, MarketDataError> {
        Ok(self.expirations.get(ticker).cloned().unwrap_or_default())
    }

    async fn get_option_chain(
        &self,
        ticker: &str,
        expiry: NaiveDate,
    ) -> Result<OptionChain, MarketDataError> {
        let key = (ticker.to_string(), expiry);
        if let Some(chain) = self.with_state(|s| s.chain_overrides.get(&key).cloned()) {
            return Ok(chain);
        }
        self.chains
            .get(&key)
            .cloned()
            .ok_or_else(|| MarketDataError::NotFound(format!("{ticker} {expiry}")))
    }

    async fn get_top_movers(&self, count: usize) -> Result<Vec<String>, MarketDataError> {
        Ok(self.movers.iter().take(count).cloned().collect())
    }
}
