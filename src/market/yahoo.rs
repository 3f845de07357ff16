use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::market::{MarketData, MarketDataError};
use crate::models::{OptionChain, OptionQuote, PriceBar, PriceSeries};

const CHART_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";
const OPTIONS_URL: &str = "https://query2.finance.yahoo.com/v7/finance/options";
const SCREENER_URL: &str = "https://query1.finance.yahoo.com/v1/finance/screener/predefined/saved";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const DEFAULT_RETRY_AFTER: u64 = 60;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsResponse {
    option_chain: OptionsResult,
}

#[derive(Debug, Deserialize)]
struct OptionsResult {
    result: Option<Vec<OptionsData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsData {
    #[serde(default)]
    expiration_dates: Vec<i64>,
    #[serde(default)]
    options: Vec<RawChain>,
}

#[derive(Debug, Deserialize)]
struct RawChain {
    #[serde(default)]
    calls: Vec<RawContract>,
    #[serde(default)]
    puts: Vec<RawContract>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContract {
    strike: f64,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
    #[serde(default)]
    last_price: Option<f64>,
    #[serde(default)]
    volume: Option<u64>,
    #[serde(default)]
    open_interest: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ScreenerResponse {
    finance: ScreenerResult,
}

#[derive(Debug, Deserialize)]
struct ScreenerResult {
    result: Option<Vec<ScreenerData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ScreenerData {
    #[serde(default)]
    quotes: Vec<ScreenerQuote>,
}

#[derive(Debug, Deserialize)]
struct ScreenerQuote {
    symbol: String,
}

impl From<RawContract> for OptionQuote {
    fn from(c: RawContract) -> Self {
        OptionQuote {
            strike: c.strike,
            bid: c.bid.unwrap_or(0.0),
            ask: c.ask.unwrap_or(0.0),
            last_price: c.last_price.unwrap_or(0.0),
            volume: c.volume.unwrap_or(0),
            open_interest: c.open_interest.unwrap_or(0),
        }
    }
}

/// Yahoo Finance chart and options endpoints.
pub struct YahooClient {
    client: Client,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl YahooClient {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            min_interval: Duration::from_millis(cfg.request_spacing_ms),
            last_request: Mutex::new(None),
        })
    }

    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        ticker: &str,
    ) -> Result<T, MarketDataError> {
        self.rate_limit().await;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MarketDataError::Network(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(MarketDataError::RateLimited { retry_after_secs });
        }
        if status == StatusCode::NOT_FOUND {
            return Err(MarketDataError::NotFound(ticker.to_string()));
        }
        if !status.is_success() {
            return Err(MarketDataError::Network(format!("HTTP {status} for {ticker}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| MarketDataError::Format(format!("{ticker}: {e}")))
    }
}

fn api_error(ticker: &str, err: Option<ApiError>) -> MarketDataError {
    match err {
        Some(e) if e.code == "Not Found" => MarketDataError::NotFound(ticker.to_string()),
        Some(e) => MarketDataError::Format(format!("{}: {}", e.code, e.description)),
        None => MarketDataError::Empty(ticker.to_string()),
    }
}

/// Bars with any missing OHLC field are dropped (holidays, halted sessions).
fn parse_chart(ticker: &str, resp: ChartResponse) -> Result<PriceSeries, MarketDataError> {
    let data = resp
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| api_error(ticker, resp.chart.error))?;

    let timestamps = data
        .timestamp
        .ok_or_else(|| MarketDataError::Empty(ticker.to_string()))?;
    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| MarketDataError::Format("no quote data".into()))?;

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let Some(date) = DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive()) else {
            return Err(MarketDataError::Format(format!("invalid timestamp: {ts}")));
        };
        let field = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
        let (Some(open), Some(high), Some(low), Some(close)) = (
            field(&quote.open),
            field(&quote.high),
            field(&quote.low),
            field(&quote.close),
        ) else {
            continue;
        };
        let volume = quote.volume.get(i).copied().flatten().unwrap_or(0);
        bars.push(PriceBar {
            date,
            open,
            high,
            low,
            close,
            volume: volume as f64,
        });
    }

    if bars.is_empty() {
        return Err(MarketDataError::Empty(ticker.to_string()));
    }
    Ok(PriceSeries::new(bars))
}

fn first_options_result(
    ticker: &str,
    resp: OptionsResponse,
) -> Result<OptionsData, MarketDataError> {
    resp.option_chain
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| api_error(ticker, resp.option_chain.error))
}

fn parse_expirations(data: &OptionsData) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = data
        .expiration_dates
        .iter()
        .filter_map(|&ts| DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive()))
        .collect();
    dates.sort();
    dates.dedup();
    dates
}

/// Plain equity symbols only: share classes and crypto pairs ("BRK-B",
/// "BTC-USD") and long symbols are dropped.
fn parse_movers(resp: ScreenerResponse, count: usize) -> Result<Vec<String>, MarketDataError> {
    let data = resp
        .finance
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| api_error("most_actives", resp.finance.error))?;
    let mut out: Vec<String> = Vec::new();
    for q in data.quotes {
        let symbol = q.symbol.trim().to_uppercase();
        if symbol.is_empty() || symbol.contains('-') || symbol.len() >= 6 || out.contains(&symbol) {
            continue;
        }
        out.push(symbol);
        if out.len() == count {
            break;
        }
    }
    Ok(out)
}

#[async_trait]
impl MarketData for YahooClient {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn get_history(&self, ticker: &str, range: &str) -> Result<PriceSeries, MarketDataError> {
        let url = format!("{CHART_URL}/{ticker}?range={range}&interval=1d&includePrePost=false");
        let resp: ChartResponse = self.get_json(&url, ticker).await?;
        let series = parse_chart(ticker, resp)?;
        debug!("{}: {} daily bars ({})", ticker, series.len(), range);
        Ok(series)
    }

    async fn get_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>, MarketDataError> {
        let url = format!("{OPTIONS_URL}/{ticker}");
        let resp: OptionsResponse = self.get_json(&url, ticker).await?;
        let data = first_options_result(ticker, resp)?;
        Ok(parse_expirations(&data))
    }

    async fn get_option_chain(
        &self,
        ticker: &str,
        expiry: NaiveDate,
    ) -> Result<OptionChain, MarketDataError> {
        let ts = expiry
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .ok_or_else(|| MarketDataError::Format(format!("invalid expiry {expiry}")))?;
        let url = format!("{OPTIONS_URL}/{ticker}?date={ts}");
        let resp: OptionsResponse = self.get_json(&url, ticker).await?;
        let data = first_options_result(ticker, resp)?;

        let chain = data.options.into_iter().next().map_or_else(OptionChain::default, |c| {
            OptionChain {
                calls: c.calls.into_iter().map(OptionQuote::from).collect(),
                puts: c.puts.into_iter().map(OptionQuote::from).collect(),
            }
        });
        Ok(chain)
    }

    async fn get_top_movers(&self, count: usize) -> Result<Vec<String>, MarketDataError> {
        let url = format!("{SCREENER_URL}?scrIds=most_actives&count={}", count.max(1) * 2);
        let resp: ScreenerResponse = self.get_json(&url, "most_actives").await?;
        let movers = parse_movers(resp, count)?;
        debug!("{} most active symbols", movers.len());
        Ok(movers)
    }
}
