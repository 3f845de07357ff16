use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::time::Duration;

use crate::config::Config;

/// Sleep while outside the active window.
pub const IDLE_POLL: Duration = Duration::from_secs(600);

/// Weekday scan window in the reference timezone.
#[derive(Debug, Clone, Copy)]
pub struct ScanSchedule {
    pub tz: Tz,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl ScanSchedule {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            tz: cfg.timezone,
            start_hour: cfg.active_start_hour,
            end_hour: cfg.active_end_hour,
        }
    }

    pub fn is_active(&self, utc_now: DateTime<Utc>) -> bool {
        let local = utc_now.with_timezone(&self.tz);
        let weekday = !matches!(local.weekday(), Weekday::Sat | Weekday::Sun);
        weekday && local.hour() >= self.start_hour && local.hour() < self.end_hour
    }

    /// Pause after a scan: hourly pre-market, half-hourly in session, 45 min after the close.
    pub fn interval(&self, utc_now: DateTime<Utc>) -> Duration {
        let hour = utc_now.with_timezone(&self.tz).hour();
        let minutes = match hour {
            h if h < 9 => 60,
            h if h < 16 => 30,
            _ => 45,
        };
        Duration::from_secs(minutes * 60)
    }

    /// How long the loop should wait before its next tick.
    pub fn next_wait(&self, utc_now: DateTime<Utc>) -> Duration {
        if self.is_active(utc_now) {
            self.interval(utc_now)
        } else {
            IDLE_POLL
        }
    }
}
