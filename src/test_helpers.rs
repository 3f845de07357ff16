use chrono::{Duration, NaiveDate, TimeZone, Utc};

use crate::config::{Config, StoreBackend};
use crate::core::indicators::{IndicatorSnapshot, ReadySnapshot};
use crate::models::{
    Instrument, Ledger, Position, PositionStatus, PriceBar, PriceSeries, TradeDirection,
};

fn day(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + Duration::days(i as i64)
}

/// Daily bars from (open, high, low, close) tuples starting 2023-01-02.
pub fn make_bars(data: &[(f64, f64, f64, f64)]) -> PriceSeries {
    let bars = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| PriceBar {
            date: day(i),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 1_000_000.0,
        })
        .collect();
    PriceSeries::new(bars)
}

/// Closes start at 100 and alternate +3 / -1, highs and lows one point away.
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

pub fn make_flat_series(n: usize, price: f64) -> PriceSeries {
    make_bars(&vec![(price, price, price, price); n])
}

pub fn ready(snapshot: IndicatorSnapshot) -> ReadySnapshot {
    ReadySnapshot {
        rsi: snapshot.rsi.unwrap_or(0.0),
        adx: snapshot.adx.unwrap_or(0.0),
        atr: snapshot.atr.unwrap_or(0.0),
        snapshot,
    }
}

/// An OPEN 10-share position entered 2024-03-01 15:00 UTC.
pub fn make_position(
    ledger: Ledger,
    ticker: &str,
    direction: TradeDirection,
    entry: f64,
    stop: f64,
    target: f64,
) -> Position {
    Position {
        id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
        ledger,
        entry_date: Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap(),
        ticker: ticker.to_string(),
        direction,
        instrument: Instrument::Shares,
        entry_price: entry,
        stop,
        target,
        quantity: 10,
        score: None,
        reasons: String::new(),
        status: PositionStatus::Open,
        exit: None,
    }
}

/// In-memory JSON store, no Telegram, $2,500 per position and a $2 fee.
pub fn default_test_config() -> Config {
    Config {
        telegram_token: String::new(),
        telegram_chat_id: String::new(),
        store_backend: StoreBackend::Json,
        data_dir: std::env::temp_dir()
            .join("stock-alert-test")
            .to_string_lossy()
            .to_string(),
        sheet_id: String::new(),
        google_creds_json: String::new(),
        google_creds_file: String::new(),
        tickers: vec!["AAPL".into(), "MSFT".into(), "NVDA".into()],
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
