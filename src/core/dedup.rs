use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::info;

use crate::models::SignalDirection;

pub const SCORE_MOVE_THRESHOLD: u32 = 10;
pub const STALE_AFTER_HOURS: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlertRecord {
    pub direction: SignalDirection,
    pub score: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertReason {
    New,
    DirectionChange { from: SignalDirection, to: SignalDirection },
    ScoreMove { from: u32, to: u32 },
    Stale,
    Duplicate,
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertReason::New => write!(f, "NEW"),
            AlertReason::DirectionChange { from, to } => write!(f, "{from}->{to}"),
            AlertReason::ScoreMove { from, to } => write!(f, "score {from}->{to}"),
            AlertReason::Stale => write!(f, "stale (>{STALE_AFTER_HOURS}h)"),
            AlertReason::Duplicate => write!(f, "duplicate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlertDecision {
    pub alert: bool,
    pub reason: AlertReason,
}

impl AlertDecision {
    fn alert(reason: AlertReason) -> Self {
        Self { alert: true, reason }
    }

    fn suppress() -> Self {
        Self {
            alert: false,
            reason: AlertReason::Duplicate,
        }
    }
}

/// Per-ticker record of the last alert sent today.
///
/// Owned by the scan worker; callers wrap it in a single lock so each
/// `check_and_record` is one atomic read-decide-write.
#[derive(Debug, Clone)]
pub struct AlertMemory {
    records: HashMap<String, AlertRecord>,
    trading_day: NaiveDate,
    tz: Tz,
}

impl AlertMemory {
    pub fn new(tz: Tz, now: DateTime<Utc>) -> Self {
        Self {
            records: HashMap::new(),
            trading_day: now.with_timezone(&tz).date_naive(),
            tz,
        }
    }

    pub fn trading_day(&self) -> NaiveDate {
        self.trading_day
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, ticker: &str) -> Option<&AlertRecord> {
        self.records.get(ticker)
    }

    /// Forgets everything once the local date moves past the tracked trading day.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.with_timezone(&self.tz).date_naive();
        if today == self.trading_day {
            return false;
        }
        info!(
            "New trading day {}: resetting alert memory ({} tickers tracked)",
            today,
            self.records.len()
        );
        self.records.clear();
        self.trading_day = today;
        true
    }

    /// Decision only; memory is not touched.
    pub fn decide(
        &self,
        ticker: &str,
        direction: SignalDirection,
        score: u32,
        now: DateTime<Utc>,
    ) -> AlertDecision {
        let Some(last) = self.records.get(ticker) else {
            return AlertDecision::alert(AlertReason::New);
        };
        if last.direction != direction {
            return AlertDecision::alert(AlertReason::DirectionChange {
                from: last.direction,
                to: direction,
            });
        }
        if last.score.abs_diff(score) >= SCORE_MOVE_THRESHOLD {
            return AlertDecision::alert(AlertReason::ScoreMove {
                from: last.score,
                to: score,
            });
        }
        if now - last.at > Duration::hours(STALE_AFTER_HOURS) {
            return AlertDecision::alert(AlertReason::Stale);
        }
        AlertDecision::suppress()
    }

    /// Rolls the day if needed, decides, and on ALERT overwrites the ticker's record.
    pub fn check_and_record(
        &mut self,
        ticker: &str,
        direction: SignalDirection,
        score: u32,
        now: DateTime<Utc>,
    ) -> AlertDecision {
        self.roll_day(now);
        let decision = self.decide(ticker, direction, score, now);
        if decision.alert {
            self.records.insert(
                ticker.to_string(),
                AlertRecord {
                    direction,
                    score,
                    at: now,
                },
            );
        }
        decision
    }
}
