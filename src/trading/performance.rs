use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::models::Position;
use crate::trading::pnl::round2;

/// One ledger's results for one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub date: NaiveDate,
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate_pct: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub net_pnl: f64,
}

impl PerformanceSummary {
    /// Recomputes the day from every position in `positions` that closed on
    /// `date` in `tz`. `None` when nothing closed that day.
    pub fn for_day(date: NaiveDate, tz: Tz, positions: &[Position]) -> Option<Self> {
        let pnls: Vec<f64> = positions
            .iter()
            .filter(|p| !p.is_open())
            .filter_map(|p| p.exit.as_ref())
            .filter(|e| e.exit_date.with_timezone(&tz).date_naive() == date)
            .map(|e| e.pnl_dollar)
            .collect();

        if pnls.is_empty() {
            return None;
        }

        let total = pnls.len() as u32;
        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = pnls.iter().copied().filter(|p| *p <= 0.0).sum();
        let win_count = wins.len() as u32;

        Some(Self {
            date,
            total_trades: total,
            wins: win_count,
            losses: total - win_count,
            win_rate_pct: (win_count as f64 / total as f64 * 1000.0).round() / 10.0,
            gross_profit: round2(gross_profit),
            gross_loss: round2(gross_loss),
            net_pnl: round2(gross_profit + gross_loss),
        })
    }
}
