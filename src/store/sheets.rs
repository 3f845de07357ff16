//! Google Sheets backend: one worksheet per ledger plus one per performance table.
//!
//! Authentication uses a service-account key: an RS256 JWT assertion is
//! exchanged for a short-lived OAuth access token, cached until shortly
//! before it expires.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::{
    ExitReason, ExitRecord, Instrument, InstrumentType, Ledger, OptionTerms, Position,
    PositionStatus, TradeDirection,
};
use crate::store::{PositionStore, StoreError};
use crate::trading::PerformanceSummary;

const SHEETS_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_LIFETIME_SECS: u64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

pub const POSITION_HEADERS: [&str; 21] = [
    "ID",
    "Entry_Date",
    "Ticker",
    "Direction",
    "Type",
    "Entry_Price",
    "Stop",
    "Target",
    "Quantity",
    "Strike",
    "Expiry",
    "Premium",
    "Score",
    "Status",
    "Exit_Price",
    "Exit_Date",
    "Exit_Reason",
    "PnL_Dollar",
    "PnL_Percent",
    "Days_Held",
    "Reasons",
];

pub const PERFORMANCE_HEADERS: [&str; 8] = [
    "Date",
    "Total_Trades",
    "Wins",
    "Losses",
    "Win_Rate%",
    "Gross_Profit",
    "Gross_Loss",
    "Net_PnL",
];

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

pub struct SheetsStore {
    client: Client,
    sheet_id: String,
    account: ServiceAccount,
    token: Mutex<Option<(String, Instant)>>,
}

impl SheetsStore {
    /// Parses the service-account key (inline JSON first, then the key file)
    /// and makes sure all four worksheets exist with their header rows.
    pub async fn connect(
        sheet_id: &str,
        creds_json: &str,
        creds_file: &str,
    ) -> Result<Self, StoreError> {
        let raw = if !creds_json.trim().is_empty() {
            creds_json.to_string()
        } else {
            tokio::fs::read_to_string(creds_file).await?
        };
        let account: ServiceAccount = serde_json::from_str(&raw)?;

        let store = Self {
            client: Client::builder().timeout(Duration::from_secs(30)).build()?,
            sheet_id: sheet_id.to_string(),
            account,
            token: Mutex::new(None),
        };
        store.ensure_layout().await?;
        info!("Connected to spreadsheet {}", sheet_id);
        Ok(store)
    }

    fn generate_jwt(&self) -> Result<String, StoreError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| StoreError::Auth(e.to_string()))?
            .as_secs();

        let claims = JwtClaims {
            iss: self.account.client_email.clone(),
            scope: SCOPE.to_string(),
            aud: self.token_uri().to_string(),
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };

        let key = EncodingKey::from_rsa_pem(self.account.private_key.as_bytes())
            .map_err(|e| StoreError::Auth(format!("bad service-account key: {e}")))?;
        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| StoreError::Auth(format!("failed to sign JWT: {e}")))
    }

    fn token_uri(&self) -> &str {
        self.account.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }

    async fn access_token(&self) -> Result<String, StoreError> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires)) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < *expires {
                return Ok(token.clone());
            }
        }

        let assertion = self.generate_jwt()?;
        let resp = self
            .client
            .post(self.token_uri())
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!("token exchange {status}: {body}")));
        }
        let token: TokenResponse = resp.json().await?;
        let ttl = Duration::from_secs(token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS));
        *cached = Some((token.access_token.clone(), Instant::now() + ttl));
        debug!("Refreshed Sheets access token");
        Ok(token.access_token)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let token = self.access_token().await?;
        let resp = req.bearer_auth(token).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Http(format!("{status}: {body}")));
        }
        Ok(resp)
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let url = format!("{SHEETS_URL}/{}/values/{range}", self.sheet_id);
        let resp = self.send(self.client.get(url)).await?;
        let vr: ValueRange = resp.json().await?;
        Ok(vr
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn append_values(&self, sheet: &str, row: Vec<Value>) -> Result<(), StoreError> {
        let url = format!(
            "{SHEETS_URL}/{}/values/{sheet}!A1:append?valueInputOption=RAW&insertDataOption=INSERT_ROWS",
            self.sheet_id
        );
        self.send(self.client.post(url).json(&json!({ "values": [row] })))
            .await?;
        Ok(())
    }

    async fn update_values(&self, range: &str, row: Vec<Value>) -> Result<(), StoreError> {
        let url = format!(
            "{SHEETS_URL}/{}/values/{range}?valueInputOption=RAW",
            self.sheet_id
        );
        self.send(self.client.put(url).json(&json!({ "values": [row] })))
            .await?;
        Ok(())
    }

    async fn ensure_layout(&self) -> Result<(), StoreError> {
        let url = format!("{SHEETS_URL}/{}?fields=sheets.properties.title", self.sheet_id);
        let meta: SpreadsheetMeta = self.send(self.client.get(url)).await?.json().await?;
        let existing: Vec<String> = meta.sheets.into_iter().map(|s| s.properties.title).collect();

        for ledger in Ledger::ALL {
            for (title, headers) in [
                (ledger.sheet_name(), &POSITION_HEADERS[..]),
                (ledger.performance_sheet_name(), &PERFORMANCE_HEADERS[..]),
            ] {
                if existing.iter().any(|t| t == title) {
                    continue;
                }
                info!("Creating worksheet {}", title);
                let url = format!("{SHEETS_URL}/{}:batchUpdate", self.sheet_id);
                let body = json!({
                    "requests": [{ "addSheet": { "properties": { "title": title } } }]
                });
                self.send(self.client.post(url).json(&body)).await?;
                let header: Vec<Value> = headers.iter().map(|h| json!(h)).collect();
                self.append_values(title, header).await?;
            }
        }
        Ok(())
    }

    async fn located_rows(&self, ledger: Ledger) -> Result<Vec<(usize, Position)>, StoreError> {
        let sheet = ledger.sheet_name();
        let values = self.get_values(&format!("{sheet}!A2:U")).await?;
        locate_rows(ledger, &values)
    }

    async fn rows(&self, ledger: Ledger) -> Result<Vec<Position>, StoreError> {
        Ok(self
            .located_rows(ledger)
            .await?
            .into_iter()
            .map(|(_, p)| p)
            .collect())
    }

    async fn performance_rows(&self, ledger: Ledger) -> Result<Vec<PerformanceSummary>, StoreError> {
        let sheet = ledger.performance_sheet_name();
        let values = self.get_values(&format!("{sheet}!A2:H")).await?;
        values.iter().map(|r| row_to_summary(sheet, r)).collect()
    }
}

#[async_trait]
impl PositionStore for SheetsStore {
    fn name(&self) -> &str {
        "sheets"
    }

    async fn append(&self, position: &Position) -> Result<(), StoreError> {
        self.append_values(position.ledger.sheet_name(), position_to_row(position))
            .await?;
        debug!("Tracked {} {} in {}", position.ticker, position.direction, position.ledger);
        Ok(())
    }

    async fn find_open_by_ticker(
        &self,
        ledger: Ledger,
        ticker: &str,
    ) -> Result<Option<Position>, StoreError> {
        Ok(self
            .rows(ledger)
            .await?
            .into_iter()
            .find(|p| p.is_open() && p.ticker == ticker))
    }

    async fn find_by_id(&self, ledger: Ledger, id: &str) -> Result<Option<Position>, StoreError> {
        Ok(self.rows(ledger).await?.into_iter().find(|p| p.id == id))
    }

    async fn update_exit(
        &self,
        ledger: Ledger,
        id: &str,
        exit: &ExitRecord,
    ) -> Result<bool, StoreError> {
        let rows = self.located_rows(ledger).await?;
        let Some(row_num) = open_row_number(&rows, id) else {
            return Ok(false);
        };
        let status = PositionStatus::from_pnl(exit.pnl_dollar);
        let range = format!("{}!N{row_num}:T{row_num}", ledger.sheet_name());
        self.update_values(
            &range,
            vec![
                json!(status.as_str()),
                json!(exit.exit_price),
                json!(format_ts(exit.exit_date)),
                json!(exit.reason.as_str()),
                json!(exit.pnl_dollar),
                json!(exit.pnl_percent),
                json!(exit.days_held),
            ],
        )
        .await?;
        Ok(true)
    }

    async fn list_open(&self, ledger: Ledger) -> Result<Vec<Position>, StoreError> {
        Ok(self.rows(ledger).await?.into_iter().filter(|p| p.is_open()).collect())
    }

    async fn list_all(&self, ledger: Ledger) -> Result<Vec<Position>, StoreError> {
        self.rows(ledger).await
    }

    async fn upsert_performance(
        &self,
        ledger: Ledger,
        summary: &PerformanceSummary,
    ) -> Result<(), StoreError> {
        let sheet = ledger.performance_sheet_name();
        let dates = self.get_values(&format!("{sheet}!A:A")).await?;
        let row = summary_to_row(summary);
        let key = summary.date.to_string();
        match dates.iter().position(|r| r.first().is_some_and(|d| *d == key)) {
            Some(i) => {
                let n = i + 1;
                self.update_values(&format!("{sheet}!A{n}:H{n}"), row).await
            }
            None => self.append_values(sheet, row).await,
        }
    }

    async fn latest_performance(
        &self,
        ledger: Ledger,
    ) -> Result<Option<PerformanceSummary>, StoreError> {
        Ok(self
            .performance_rows(ledger)
            .await?
            .into_iter()
            .max_by_key(|r| r.date))
    }
}

fn cell_text(v: Value) -> String {
    match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// RFC 3339, or the older minute-resolution `%Y-%m-%d %H:%M` read as UTC.
fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
                .ok()
                .map(|n| n.and_utc())
        })
}

fn opt_num(v: Option<f64>) -> Value {
    v.map_or_else(|| json!(""), |x| json!(x))
}

fn position_to_row(p: &Position) -> Vec<Value> {
    let terms = p.instrument.option_terms().cloned().unwrap_or_default();
    let exit = p.exit.as_ref();
    vec![
        json!(p.id),
        json!(format_ts(p.entry_date)),
        json!(p.ticker),
        json!(p.direction.as_str()),
        json!(p.instrument_type().as_str()),
        json!(p.entry_price),
        json!(p.stop),
        json!(p.target),
        json!(p.quantity),
        opt_num(terms.strike),
        json!(terms.expiry.map(|d| d.to_string()).unwrap_or_default()),
        opt_num(terms.premium),
        p.score.map_or_else(|| json!(""), |s| json!(s)),
        json!(p.status.as_str()),
        opt_num(exit.map(|e| e.exit_price)),
        json!(exit.map(|e| format_ts(e.exit_date)).unwrap_or_default()),
        json!(exit.map(|e| e.reason.as_str()).unwrap_or_default()),
        opt_num(exit.map(|e| e.pnl_dollar)),
        opt_num(exit.map(|e| e.pnl_percent)),
        exit.map_or_else(|| json!(""), |e| json!(e.days_held)),
        json!(p.reasons),
    ]
}

fn parse_num(s: &str) -> Option<f64> {
    let cleaned: String = s.chars().filter(|c| !matches!(c, '$' | '%' | ',')).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        cleaned.parse().ok()
    }
}

fn row_to_position(ledger: Ledger, row: &[String]) -> Result<Position, StoreError> {
    let sheet = ledger.sheet_name();
    let col = |i: usize| row.get(i).map(|s| s.trim()).unwrap_or("");
    let bad = |reason: String| StoreError::Row {
        sheet: sheet.to_string(),
        reason,
    };
    let num = |i: usize| {
        parse_num(col(i)).ok_or_else(|| bad(format!("{} not numeric: {:?}", POSITION_HEADERS[i], col(i))))
    };

    let id = col(0).to_string();
    let entry_date = parse_ts(col(1)).ok_or_else(|| bad(format!("{id}: bad Entry_Date")))?;
    let direction =
        TradeDirection::parse(col(3)).ok_or_else(|| bad(format!("{id}: bad Direction")))?;
    let kind = InstrumentType::parse(col(4)).ok_or_else(|| bad(format!("{id}: bad Type")))?;
    let status = PositionStatus::parse(col(13)).ok_or_else(|| bad(format!("{id}: bad Status")))?;

    let terms = OptionTerms {
        strike: parse_num(col(9)),
        expiry: NaiveDate::parse_from_str(col(10), "%Y-%m-%d").ok(),
        premium: parse_num(col(11)),
    };

    let exit = if status == PositionStatus::Open {
        None
    } else {
        Some(ExitRecord {
            exit_price: num(14)?,
            exit_date: parse_ts(col(15)).ok_or_else(|| bad(format!("{id}: bad Exit_Date")))?,
            reason: ExitReason::parse(col(16)).unwrap_or(ExitReason::Manual),
            pnl_dollar: num(17)?,
            pnl_percent: parse_num(col(18)).unwrap_or(0.0),
            days_held: parse_num(col(19)).map_or(0, |d| d as i64),
        })
    };

    Ok(Position {
        id,
        ledger,
        entry_date,
        ticker: col(2).to_string(),
        direction,
        instrument: Instrument::from_parts(kind, terms),
        entry_price: num(5)?,
        stop: num(6)?,
        target: num(7)?,
        quantity: num(8)? as u32,
        score: parse_num(col(12)).map(|s| s as u32),
        reasons: col(20).to_string(),
        status,
        exit,
    })
}

/// Positions paired with their sheet row number. `values` starts at row 2,
/// below the header; blank rows are skipped but still counted.
fn locate_rows(ledger: Ledger, values: &[Vec<String>]) -> Result<Vec<(usize, Position)>, StoreError> {
    values
        .iter()
        .enumerate()
        .filter(|(_, r)| r.first().is_some_and(|id| !id.is_empty()))
        .map(|(i, r)| row_to_position(ledger, r).map(|p| (i + 2, p)))
        .collect()
}

/// Sheet row of the OPEN position `id`; `None` when missing or already closed.
fn open_row_number(rows: &[(usize, Position)], id: &str) -> Option<usize> {
    rows.iter()
        .find(|(_, p)| p.id == id)
        .filter(|(_, p)| p.is_open())
        .map(|(n, _)| *n)
}

fn summary_to_row(s: &PerformanceSummary) -> Vec<Value> {
    vec![
        json!(s.date.to_string()),
        json!(s.total_trades),
        json!(s.wins),
        json!(s.losses),
        json!(s.win_rate_pct),
        json!(s.gross_profit),
        json!(s.gross_loss),
        json!(s.net_pnl),
    ]
}

fn row_to_summary(sheet: &str, row: &[String]) -> Result<PerformanceSummary, StoreError> {
    let col = |i: usize| row.get(i).map(|s| s.as_str()).unwrap_or("");
    let num = |i: usize| parse_num(col(i)).unwrap_or(0.0);
    let date = NaiveDate::parse_from_str(col(0).trim(), "%Y-%m-%d").map_err(|e| StoreError::Row {
        sheet: sheet.to_string(),
        reason: format!("bad Date {:?}: {e}", col(0)),
    })?;
    Ok(PerformanceSummary {
        date,
        total_trades: num(1) as u32,
        wins: num(2) as u32,
        losses: num(3) as u32,
        win_rate_pct: num(4),
        gross_profit: num(5),
        gross_loss: num(6),
        net_pnl: num(7),
    })
}
