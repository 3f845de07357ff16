use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedConfig = Arc<RwLock<Config>>;

const DEFAULT_TICKERS: &str = "AAPL,MSFT,NVDA,GOOGL,AMZN,META,TSLA,AMD,NFLX,AVGO,JPM,V,MA,UNH,XOM,LLY,COST,HD,CRM,ORCL,ADBE,PEP,KO,WMT,BAC,SPY,QQQ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Json,
    Sheets,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Notifications
    pub telegram_token: String,
    pub telegram_chat_id: String,

    // Position store
    pub store_backend: StoreBackend,
    pub data_dir: String,
    pub sheet_id: String,
    pub google_creds_json: String,
    pub google_creds_file: String,

    // Universe
    pub tickers: Vec<String>,
    /// Merge the provider's most-active list into the scan universe.
    pub scan_movers: bool,
    pub movers_count: usize,
    pub history_range: String,

    // Sizing (10% of a $25k reference account)
    pub position_capital: f64,
    pub trade_fee: f64,

    // Schedule (hours in the reference timezone)
    pub timezone: Tz,
    pub active_start_hour: u32,
    pub active_end_hour: u32,
    pub exit_check_interval: u64,

    // Provider throttling
    pub request_spacing_ms: u64,
    pub alert_pause_ms: u64,
    pub rate_limit_cooldown: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let store_backend = match env("STORE_BACKEND", "json").to_lowercase().as_str() {
            "sheets" => StoreBackend::Sheets,
            _ => StoreBackend::Json,
        };

        Config {
            telegram_token: env("TELEGRAM_TOKEN", ""),
            telegram_chat_id: env("TELEGRAM_CHAT_ID", ""),
            store_backend,
            data_dir: env("DATA_DIR", "data"),
            sheet_id: env("SHEET_ID", ""),
            google_creds_json: env("GOOGLE_SHEETS_CREDS", ""),
            google_creds_file: env("GOOGLE_CREDS_FILE", "credentials.json"),
            tickers: parse_tickers(&env("TICKERS", DEFAULT_TICKERS)),
            scan_movers: parse_flag(&env("SCAN_MOVERS", "true")),
            movers_count: env("MOVERS_COUNT", "30").parse().unwrap_or(30),
            history_range: env("HISTORY_RANGE", "2y"),
            position_capital: env("POSITION_CAPITAL", "2500").parse().unwrap_or(2500.0),
            trade_fee: env("TRADE_FEE", "2").parse().unwrap_or(2.0),
            timezone: env("TIMEZONE", "US/Eastern")
                .parse()
                .unwrap_or(chrono_tz::US::Eastern),
            active_start_hour: env("ACTIVE_START_HOUR", "6").parse().unwrap_or(6),
            active_end_hour: env("ACTIVE_END_HOUR", "17").parse().unwrap_or(17),
            exit_check_interval: env("EXIT_CHECK_INTERVAL_SECS", "900").parse().unwrap_or(900),
            request_spacing_ms: env("REQUEST_SPACING_MS", "500").parse().unwrap_or(500),
            alert_pause_ms: env("ALERT_PAUSE_MS", "2000").parse().unwrap_or(2000),
            rate_limit_cooldown: env("RATE_LIMIT_COOLDOWN_SECS", "60").parse().unwrap_or(60),
            log_level: env("LOG_LEVEL", "INFO"),
        }
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    pub fn has_telegram(&self) -> bool {
        !self.telegram_token.is_empty() && !self.telegram_chat_id.is_empty()
    }

    pub fn store_file(&self) -> String {
        format!("{}/positions.json", self.data_dir)
    }
}

fn parse_flag(raw: &str) -> bool {
    !matches!(raw.trim().to_lowercase().as_str(), "0" | "false" | "no" | "off")
}

/// Upper-cases, trims and de-duplicates a comma separated ticker list, keeping first-seen order.
pub fn parse_tickers(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for t in raw.split(',') {
        let t = t.trim().to_uppercase();
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}
