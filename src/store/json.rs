use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::{ExitRecord, Ledger, Position};
use crate::store::{PositionStore, StoreError};
use crate::trading::PerformanceSummary;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    bot_alerts: Vec<Position>,
    #[serde(default)]
    my_trades: Vec<Position>,
    #[serde(default)]
    bot_performance: Vec<PerformanceSummary>,
    #[serde(default)]
    my_performance: Vec<PerformanceSummary>,
}

impl StoreState {
    fn ledger(&self, ledger: Ledger) -> &Vec<Position> {
        match ledger {
            Ledger::BotAlerts => &self.bot_alerts,
            Ledger::MyTrades => &self.my_trades,
        }
    }

    fn ledger_mut(&mut self, ledger: Ledger) -> &mut Vec<Position> {
        match ledger {
            Ledger::BotAlerts => &mut self.bot_alerts,
            Ledger::MyTrades => &mut self.my_trades,
        }
    }

    fn performance(&self, ledger: Ledger) -> &Vec<PerformanceSummary> {
        match ledger {
            Ledger::BotAlerts => &self.bot_performance,
            Ledger::MyTrades => &self.my_performance,
        }
    }

    fn performance_mut(&mut self, ledger: Ledger) -> &mut Vec<PerformanceSummary> {
        match ledger {
            Ledger::BotAlerts => &mut self.bot_performance,
            Ledger::MyTrades => &mut self.my_performance,
        }
    }
}

/// Both ledgers in one JSON document, rewritten after every mutation.
/// Without a path the store lives in memory only.
pub struct JsonStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl JsonStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Loads `path` if it exists, otherwise starts empty and creates it on first write.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let state: StoreState = serde_json::from_str(&content)?;
                info!(
                    "Loaded {} bot / {} manual positions from {}",
                    state.bot_alerts.len(),
                    state.my_trades.len(),
                    path.display()
                );
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("Store written to {}", path.display());
        Ok(())
    }

    /// Applies `f` to a copy of the state and commits it only once written.
    async fn mutate<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> Result<R, StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let out = f(&mut next);
        self.persist(&next).await?;
        *state = next;
        Ok(out)
    }
}

#[async_trait]
impl PositionStore for JsonStore {
    fn name(&self) -> &str {
        "json"
    }

    async fn append(&self, position: &Position) -> Result<(), StoreError> {
        let position = position.clone();
        self.mutate(|s| s.ledger_mut(position.ledger).push(position))
            .await
    }

    async fn find_open_by_ticker(
        &self,
        ledger: Ledger,
        ticker: &str,
    ) -> Result<Option<Position>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .ledger(ledger)
            .iter()
            .find(|p| p.is_open() && p.ticker == ticker)
            .cloned())
    }

    async fn find_by_id(&self, ledger: Ledger, id: &str) -> Result<Option<Position>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.ledger(ledger).iter().find(|p| p.id == id).cloned())
    }

    async fn update_exit(
        &self,
        ledger: Ledger,
        id: &str,
        exit: &ExitRecord,
    ) -> Result<bool, StoreError> {
        {
            let state = self.state.lock().await;
            let open = state.ledger(ledger).iter().any(|p| p.id == id && p.is_open());
            if !open {
                return Ok(false);
            }
        }
        let exit = exit.clone();
        self.mutate(|s| {
            s.ledger_mut(ledger)
                .iter_mut()
                .find(|p| p.id == id)
                .is_some_and(|p| p.close(exit))
        })
        .await
    }

    async fn list_open(&self, ledger: Ledger) -> Result<Vec<Position>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.ledger(ledger).iter().filter(|p| p.is_open()).cloned().collect())
    }

    async fn list_all(&self, ledger: Ledger) -> Result<Vec<Position>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.ledger(ledger).clone())
    }

    async fn upsert_performance(
        &self,
        ledger: Ledger,
        summary: &PerformanceSummary,
    ) -> Result<(), StoreError> {
        let summary = summary.clone();
        self.mutate(|s| {
            let rows = s.performance_mut(ledger);
            match rows.iter_mut().find(|r| r.date == summary.date) {
                Some(row) => *row = summary,
                None => rows.push(summary),
            }
        })
        .await
    }

    async fn latest_performance(
        &self,
        ledger: Ledger,
    ) -> Result<Option<PerformanceSummary>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.performance(ledger).iter().max_by_key(|r| r.date).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, PositionStatus, TradeDirection};
    use crate::test_helpers::make_position;
    use chrono::NaiveDate;

    fn exit_at(pnl: f64) -> ExitRecord {
        ExitRecord {
            exit_price: 110.0,
            exit_date: chrono::Utc::now(),
            reason: ExitReason::Target,
            pnl_dollar: pnl,
            pnl_percent: 10.0,
            days_held: 1,
        }
    }

    #[tokio::test]
    async fn ledgers_are_separate() {
        let store = JsonStore::in_memory();
        let bot = make_position(Ledger::BotAlerts, "AAPL", TradeDirection::Bull, 100.0, 95.0, 110.0);
        store.append(&bot).await.unwrap();

        assert!(store.find_open_by_ticker(Ledger::MyTrades, "AAPL").await.unwrap().is_none());
        let found = store.find_open_by_ticker(Ledger::BotAlerts, "AAPL").await.unwrap().unwrap();
        assert_eq!(found.id, bot.id);
    }

    #[tokio::test]
    async fn second_exit_is_a_noop() {
        let store = JsonStore::in_memory();
        let pos = make_position(Ledger::MyTrades, "AAPL", TradeDirection::Bull, 100.0, 95.0, 110.0);
        store.append(&pos).await.unwrap();

        assert!(store.update_exit(Ledger::MyTrades, &pos.id, &exit_at(98.0)).await.unwrap());
        assert!(!store.update_exit(Ledger::MyTrades, &pos.id, &exit_at(-10.0)).await.unwrap());
        assert!(!store.update_exit(Ledger::MyTrades, "missing", &exit_at(1.0)).await.unwrap());

        let stored = store.find_by_id(Ledger::MyTrades, &pos.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::ClosedProfit);
        assert_eq!(stored.pnl_dollar(), 98.0);
        assert!(store.list_open(Ledger::MyTrades).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn performance_upsert_replaces_same_day() {
        let store = JsonStore::in_memory();
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let mut row = PerformanceSummary {
            date: day,
            total_trades: 1,
            wins: 1,
            losses: 0,
            win_rate_pct: 100.0,
            gross_profit: 98.0,
            gross_loss: 0.0,
            net_pnl: 98.0,
        };
        store.upsert_performance(Ledger::BotAlerts, &row).await.unwrap();
        row.total_trades = 2;
        store.upsert_performance(Ledger::BotAlerts, &row).await.unwrap();

        let latest = store.latest_performance(Ledger::BotAlerts).await.unwrap().unwrap();
        assert_eq!(latest.total_trades, 2);
        assert!(store.latest_performance(Ledger::MyTrades).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = std::env::temp_dir().join(format!("stock-alert-store-{}", uuid::Uuid::new_v4()));
        let path = dir.join("positions.json");

        let pos = make_position(Ledger::BotAlerts, "NVDA", TradeDirection::Bear, 100.0, 105.0, 90.0);
        {
            let store = JsonStore::open(&path).await.unwrap();
            store.append(&pos).await.unwrap();
        }
        let reopened = JsonStore::open(&path).await.unwrap();
        let found = reopened.find_by_id(Ledger::BotAlerts, &pos.id).await.unwrap().unwrap();
        assert_eq!(found, pos);

        let _ = std::fs::remove_dir_all(dir);
    }
}
