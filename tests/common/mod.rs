#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use stock_alert_bot::config::{Config, StoreBackend};
use stock_alert_bot::models::{ExitRecord, Ledger, Position, PriceBar, PriceSeries};
use stock_alert_bot::notify::{Notifier, NotifyError};
use stock_alert_bot::store::{PositionStore, StoreError};
use stock_alert_bot::trading::PerformanceSummary;

/// Daily bars from (open, high, low, close) tuples starting 2023-01-02.
pub fn make_bars(data: &[(f64, f64, f64, f64)]) -> PriceSeries {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let bars = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| PriceBar {
            date: start + Duration::days(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 1_000_000.0,
        })
        .collect();
    PriceSeries::new(bars)
}

/// Closes start at 100 and alternate +3 / -1.
pub fn make_zigzag_uptrend(n: usize) -> PriceSeries {
    let mut close = 100.0;
    let data: Vec<(f64, f64, f64, f64)> = (0..n)
        .map(|i| {
            if i > 0 {
                close += if i % 2 == 1 { 3.0 } else { -1.0 };
            }
            (close, close + 1.0, close - 1.0, close)
        })
        .collect();
    make_bars(&data)
}

pub fn test_config() -> Config {
    Config {
        telegram_token: String::new(),
        telegram_chat_id: String::new(),
        store_backend: StoreBackend::Json,
        data_dir: String::new(),
        sheet_id: String::new(),
        google_creds_json: String::new(),
        google_creds_file: String::new(),
        tickers: vec!["ZIG".into(), "FLAT".into(), "GONE".into()],
        scan_movers: false,
        movers_count: 30,
        history_range: "2y".into(),
        position_capital: 2500.0,
        trade_fee: 2.0,
        timezone: chrono_tz::US::Eastern,
        active_start_hour: 6,
        active_end_hour: 17,
        exit_check_interval: 900,
        request_spacing_ms: 0,
        alert_pause_ms: 0,
        rate_limit_cooldown: 0,
        log_level: "debug".into(),
    }
}

/// Captures every message instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Wraps a store and fails the next `n` exit writes.
pub struct FlakyStore {
    inner: Arc<dyn PositionStore>,
    failing_exits: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn PositionStore>) -> Self {
        Self {
            inner,
            failing_exits: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_exits(&self, n: usize) {
        self.failing_exits.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl PositionStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn append(&self, position: &Position) -> Result<(), StoreError> {
        self.inner.append(position).await
    }

    async fn find_open_by_ticker(
        &self,
        ledger: Ledger,
        ticker: &str,
    ) -> Result<Option<Position>, StoreError> {
        self.inner.find_open_by_ticker(ledger, ticker).await
    }

    async fn find_by_id(&self, ledger: Ledger, id: &str) -> Result<Option<Position>, StoreError> {
        self.inner.find_by_id(ledger, id).await
    }

    async fn update_exit(
        &self,
        ledger: Ledger,
        id: &str,
        exit: &ExitRecord,
    ) -> Result<bool, StoreError> {
        let remaining = self.failing_exits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_exits.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("sheet quota exceeded".into()));
        }
        self.inner.update_exit(ledger, id, exit).await
    }

    async fn list_open(&self, ledger: Ledger) -> Result<Vec<Position>, StoreError> {
        self.inner.list_open(ledger).await
    }

    async fn list_all(&self, ledger: Ledger) -> Result<Vec<Position>, StoreError> {
        self.inner.list_all(ledger).await
    }

    async fn upsert_performance(
        &self,
        ledger: Ledger,
        summary: &PerformanceSummary,
    ) -> Result<(), StoreError> {
        self.inner.upsert_performance(ledger, summary).await
    }

    async fn latest_performance(
        &self,
        ledger: Ledger,
    ) -> Result<Option<PerformanceSummary>, StoreError> {
        self.inner.latest_performance(ledger).await
    }
}
