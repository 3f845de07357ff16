//! Position lifecycle across the bot and manual ledgers.
//!
//! Positions are created OPEN and closed exactly once. Closing goes through
//! the store's conditional `update_exit`, so a second close of the same row
//! (from the exit pass racing a manual close, or a retried write) is a no-op.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::classifier::Signal;
use crate::error::{AgentError, Result};
use crate::models::{
    ExitReason, ExitRecord, Instrument, Ledger, OptionTerms, Position, PositionStatus, PriceBand,
    TradeDirection,
};
use crate::store::PositionStore;
use crate::trading::performance::PerformanceSummary;
use crate::trading::pnl::{compute_pnl, round2, Pnl};

const BOT_REASONS_KEPT: usize = 3;
/// Alert targets sit 3.5 ATR from the alert price.
const ALERT_TARGET_ATR: f64 = 3.5;
const OPTION_STOP_FRACTION: f64 = 0.7;
const OPTION_TARGET_FRACTION: f64 = 1.5;

/// What a human needs from an alert to declare a fill against it.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertLink {
    pub ticker: String,
    pub direction: TradeDirection,
    pub price: f64,
    pub stop: f64,
    pub target: f64,
    pub quantity: u32,
    /// Suggested contract (strike, expiry) when the alert carried one.
    pub contract: Option<OptionTerms>,
}

impl From<&Position> for AlertLink {
    fn from(p: &Position) -> Self {
        Self {
            ticker: p.ticker.clone(),
            direction: p.direction,
            price: p.entry_price,
            stop: p.stop,
            target: p.target,
            quantity: p.quantity,
            contract: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryFill {
    Shares { price: f64 },
    Options { contracts: u32, premium: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManualEntry {
    pub ticker: String,
    pub price: f64,
    pub stop: f64,
    pub target: f64,
    pub quantity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitCandidate {
    pub position: Position,
    pub reason: ExitReason,
    pub exit_price: f64,
}

/// A position after its terminal transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub position: Position,
    pub pnl: Pnl,
}

impl ClosedPosition {
    pub fn reason(&self) -> Option<ExitReason> {
        self.position.exit.as_ref().map(|e| e.reason)
    }
}

#[derive(Debug, Clone)]
struct PendingExit {
    position: Position,
    exit: ExitRecord,
}

type RowKey = (Ledger, String);

/// Marks a row as being closed; released on drop.
struct CloseGuard<'a> {
    closing: &'a Mutex<HashSet<RowKey>>,
    key: RowKey,
}

impl Drop for CloseGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.closing.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}

/// Stop is tested before target; the first match wins even when one bar spans both.
///
/// Option levels are premiums of a held contract, so puts and calls alike
/// stop out below entry and take profit above it.
pub fn detect_exit(position: &Position, band: &PriceBand) -> Option<(ExitReason, f64)> {
    let side = match position.instrument {
        Instrument::Shares => position.direction,
        Instrument::Call(_) | Instrument::Put(_) => TradeDirection::Bull,
    };
    match side {
        TradeDirection::Bull => {
            if band.low <= position.stop {
                Some((ExitReason::Stop, position.stop))
            } else if band.high >= position.target {
                Some((ExitReason::Target, position.target))
            } else {
                None
            }
        }
        TradeDirection::Bear => {
            if band.high >= position.stop {
                Some((ExitReason::Stop, position.stop))
            } else if band.low <= position.target {
                Some((ExitReason::Target, position.target))
            } else {
                None
            }
        }
    }
}

pub fn new_position_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

pub struct PositionTracker {
    store: Arc<dyn PositionStore>,
    tz: Tz,
    position_capital: f64,
    trade_fee: f64,
    alert_links: RwLock<HashMap<String, AlertLink>>,
    closing: Mutex<HashSet<RowKey>>,
    pending_exits: Mutex<HashMap<RowKey, PendingExit>>,
    sim_time: Mutex<Option<DateTime<Utc>>>,
}

impl PositionTracker {
    pub fn new(cfg: &Config, store: Arc<dyn PositionStore>) -> Self {
        Self {
            store,
            tz: cfg.timezone,
            position_capital: cfg.position_capital,
            trade_fee: cfg.trade_fee,
            alert_links: RwLock::new(HashMap::new()),
            closing: Mutex::new(HashSet::new()),
            pending_exits: Mutex::new(HashMap::new()),
            sim_time: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn PositionStore> {
        &self.store
    }

    /// Pins the clock, for replay and tests.
    pub fn set_time(&self, t: Option<DateTime<Utc>>) {
        *self.sim_time.lock().unwrap_or_else(|e| e.into_inner()) = t;
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.sim_time
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unwrap_or_else(Utc::now)
    }

    pub fn pending_exit_count(&self) -> usize {
        self.pending_exits.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    // ── Open ────────────────────────────────────────────────────────────

    /// Records a directional signal in the bot ledger. The returned position's
    /// id doubles as the alert id a human quotes when confirming a fill.
    pub async fn open_from_signal(&self, signal: &Signal) -> Result<Position> {
        let direction = signal.direction.to_trade().ok_or_else(|| {
            AgentError::MalformedCommand(format!("{} has no direction to track", signal.ticker))
        })?;
        let plan = signal.plan.as_ref().ok_or_else(|| {
            AgentError::MalformedCommand(format!("{} signal carries no trade plan", signal.ticker))
        })?;

        let reasons: Vec<&str> = signal
            .reasons
            .iter()
            .take(BOT_REASONS_KEPT)
            .map(String::as_str)
            .collect();

        let position = Position {
            id: new_position_id(),
            ledger: Ledger::BotAlerts,
            entry_date: self.now(),
            ticker: signal.ticker.clone(),
            direction,
            instrument: Instrument::Shares,
            entry_price: signal.price,
            stop: plan.stop,
            target: plan.target,
            quantity: plan.quantity,
            score: Some(signal.score),
            reasons: reasons.join("; "),
            status: PositionStatus::Open,
            exit: None,
        };

        let mut link = AlertLink::from(&position);
        link.contract = signal
            .options_insight
            .as_ref()
            .filter(|i| i.kind == direction.option_type())
            .map(|i| OptionTerms {
                strike: Some(i.strike),
                expiry: Some(i.expiry),
                premium: None,
            });

        self.store.append(&position).await?;
        self.alert_links
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(position.id.clone(), link);
        info!(
            "Tracked bot alert {} {} {} @ {:.2}",
            position.id, position.ticker, position.direction, position.entry_price
        );
        Ok(position)
    }

    async fn resolve_alert(&self, alert_id: &str) -> Result<AlertLink> {
        let cached = self
            .alert_links
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(alert_id)
            .cloned();
        if let Some(link) = cached {
            return Ok(link);
        }
        // The alert id is the bot-ledger row id, so the link outlives a restart.
        match self.store.find_by_id(Ledger::BotAlerts, alert_id).await? {
            Some(row) => {
                debug!("Alert {} resolved from the bot ledger", alert_id);
                Ok(AlertLink::from(&row))
            }
            None => Err(AgentError::UnknownReference(format!(
                "Alert {alert_id} not found; declare the trade manually instead"
            ))),
        }
    }

    /// Records a human fill against an earlier alert in the manual ledger.
    pub async fn declare_entry_from_alert(&self, alert_id: &str, fill: EntryFill) -> Result<Position> {
        let link = self.resolve_alert(alert_id).await?;

        let (instrument, entry_price, stop, target, quantity) = match fill {
            EntryFill::Shares { price } => {
                if !(price > 0.0) {
                    return Err(AgentError::MalformedCommand(format!("invalid price {price}")));
                }
                // Same estimate for both directions, even though bear targets sit 4 ATR away.
                let atr = (link.target - link.price).abs() / ALERT_TARGET_ATR;
                let (stop, target) = match link.direction {
                    TradeDirection::Bull => (price - atr * 2.5, price + atr * 3.5),
                    TradeDirection::Bear => (price + atr * 2.0, price - atr * 4.0),
                };
                (Instrument::Shares, price, stop, target, link.quantity)
            }
            EntryFill::Options { contracts, premium } => {
                if !(premium > 0.0) || contracts == 0 {
                    return Err(AgentError::MalformedCommand(format!(
                        "invalid contracts {contracts} / premium {premium}"
                    )));
                }
                // without the alert's contract (e.g. after a restart) the
                // position can only be closed by hand
                let terms = OptionTerms {
                    premium: Some(premium),
                    ..link.contract.clone().unwrap_or_default()
                };
                let instrument = Instrument::from_parts(link.direction.option_type(), terms);
                (
                    instrument,
                    premium,
                    premium * OPTION_STOP_FRACTION,
                    premium * OPTION_TARGET_FRACTION,
                    contracts,
                )
            }
        };

        let position = Position {
            id: new_position_id(),
            ledger: Ledger::MyTrades,
            entry_date: self.now(),
            ticker: link.ticker.clone(),
            direction: link.direction,
            instrument,
            entry_price: round2(entry_price),
            stop: round2(stop),
            target: round2(target),
            quantity,
            score: None,
            reasons: format!("From alert {alert_id}"),
            status: PositionStatus::Open,
            exit: None,
        };
        self.store.append(&position).await?;
        info!(
            "Tracked entry {} from alert {}: {} {} {} @ {:.2}",
            position.id,
            alert_id,
            position.ticker,
            position.direction,
            position.instrument_type(),
            position.entry_price
        );
        Ok(position)
    }

    /// A trade the human found on their own. BULL iff the target is above entry.
    pub async fn declare_manual_entry(&self, entry: ManualEntry) -> Result<Position> {
        let ticker = entry.ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(AgentError::MalformedCommand("missing ticker".into()));
        }
        for (name, v) in [("price", entry.price), ("stop", entry.stop), ("target", entry.target)] {
            if !(v > 0.0) {
                return Err(AgentError::MalformedCommand(format!("invalid {name} {v}")));
            }
        }
        let direction = if entry.target > entry.price {
            TradeDirection::Bull
        } else {
            TradeDirection::Bear
        };
        let quantity = entry
            .quantity
            .unwrap_or_else(|| (self.position_capital / entry.price).floor() as u32);

        let position = Position {
            id: new_position_id(),
            ledger: Ledger::MyTrades,
            entry_date: self.now(),
            ticker,
            direction,
            instrument: Instrument::Shares,
            entry_price: entry.price,
            stop: entry.stop,
            target: entry.target,
            quantity,
            score: None,
            reasons: "Manual trade (not from bot)".to_string(),
            status: PositionStatus::Open,
            exit: None,
        };
        self.store.append(&position).await?;
        info!(
            "Tracked manual trade {} {} {} x{} @ {:.2}",
            position.id, position.ticker, position.direction, position.quantity, position.entry_price
        );
        Ok(position)
    }

    // ── Exit detection ──────────────────────────────────────────────────

    /// Positions whose stop or target lies inside their band. Bands are keyed
    /// by `Position::band_key`: the ticker for shares, the contract for
    /// options. Nothing is mutated.
    pub async fn check_exits(&self, bands: &HashMap<String, PriceBand>) -> Result<Vec<ExitCandidate>> {
        let open = self.list_open().await?;
        let candidates: Vec<ExitCandidate> = open
            .into_iter()
            .filter_map(|position| {
                let Some(key) = position.band_key() else {
                    debug!("{} {} has no contract on record", position.id, position.ticker);
                    return None;
                };
                let band = bands.get(&key)?;
                let (reason, exit_price) = detect_exit(&position, band)?;
                Some(ExitCandidate {
                    position,
                    reason,
                    exit_price,
                })
            })
            .collect();
        if candidates.is_empty() {
            debug!("All positions in range");
        }
        Ok(candidates)
    }

    // ── Close ───────────────────────────────────────────────────────────

    fn exit_record(&self, position: &Position, exit_price: f64, reason: ExitReason) -> (ExitRecord, Pnl) {
        let now = self.now();
        let pnl = compute_pnl(
            position.direction,
            position.instrument_type(),
            position.entry_price,
            exit_price,
            position.quantity,
            self.trade_fee,
        );
        let exit = ExitRecord {
            exit_price: round2(exit_price),
            exit_date: now,
            reason,
            pnl_dollar: pnl.dollar,
            pnl_percent: pnl.percent,
            days_held: (now - position.entry_date).num_days().max(0),
        };
        (exit, pnl)
    }

    fn begin_close(&self, key: &RowKey) -> Option<CloseGuard<'_>> {
        let mut set = self.closing.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(key.clone()) {
            return None;
        }
        Some(CloseGuard {
            closing: &self.closing,
            key: key.clone(),
        })
    }

    /// Writes a prepared exit. `Ok(None)` when the row was already closed or
    /// another close of it is in flight. A failed write is parked for retry.
    async fn commit_exit(&self, position: &Position, exit: ExitRecord) -> Result<Option<ClosedPosition>> {
        let key: RowKey = (position.ledger, position.id.clone());
        let Some(_guard) = self.begin_close(&key) else {
            debug!("Close of {} already in flight", position.id);
            return Ok(None);
        };

        match self.store.update_exit(position.ledger, &position.id, &exit).await {
            Ok(true) => {
                self.pending_exits
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&key);
                let exit_day = exit.exit_date.with_timezone(&self.tz).date_naive();
                let pnl = Pnl {
                    dollar: exit.pnl_dollar,
                    percent: exit.pnl_percent,
                };
                let mut closed = position.clone();
                closed.close(exit);
                info!(
                    "Closed {} {} in {}: {} ${:.2} ({:.2}%)",
                    closed.id,
                    closed.ticker,
                    closed.ledger,
                    closed.status,
                    pnl.dollar,
                    pnl.percent
                );
                if let Err(e) = self.refresh_performance(position.ledger, exit_day).await {
                    error!("Performance update for {} failed: {}", position.ledger, e);
                }
                Ok(Some(ClosedPosition {
                    position: closed,
                    pnl,
                }))
            }
            Ok(false) => {
                self.pending_exits
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&key);
                debug!("{} in {} was already closed", position.id, position.ledger);
                Ok(None)
            }
            Err(e) => {
                warn!("Exit write for {} failed, will retry: {}", position.id, e);
                self.pending_exits
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .entry(key)
                    .or_insert(PendingExit {
                        position: position.clone(),
                        exit,
                    });
                Err(e.into())
            }
        }
    }

    /// Closes a detected exit at its trigger level.
    pub async fn close_exit(&self, candidate: &ExitCandidate) -> Result<Option<ClosedPosition>> {
        let (exit, _) = self.exit_record(&candidate.position, candidate.exit_price, candidate.reason);
        self.commit_exit(&candidate.position, exit).await
    }

    /// Human-instructed close by position id or ticker within one ledger.
    pub async fn close_manual(&self, reference: &str, exit_price: f64, ledger: Ledger) -> Result<ClosedPosition> {
        if !(exit_price > 0.0) {
            return Err(AgentError::MalformedCommand(format!("invalid price {exit_price}")));
        }
        let reference = reference.trim();
        let by_id = self
            .store
            .find_by_id(ledger, reference)
            .await?
            .filter(|p| p.is_open());
        let position = match by_id {
            Some(p) => p,
            None => self
                .store
                .find_open_by_ticker(ledger, &reference.to_uppercase())
                .await?
                .ok_or_else(|| {
                    AgentError::UnknownReference(format!(
                        "No open {ledger} position found for {}",
                        reference.to_uppercase()
                    ))
                })?,
        };

        let (exit, _) = self.exit_record(&position, exit_price, ExitReason::Manual);
        self.commit_exit(&position, exit).await?.ok_or_else(|| {
            AgentError::UnknownReference(format!(
                "{} {} is already closed",
                position.ticker, position.id
            ))
        })
    }

    /// Re-attempts exit writes that failed earlier, with their original exit records.
    pub async fn retry_pending(&self) -> Vec<ClosedPosition> {
        let pending: Vec<PendingExit> = self
            .pending_exits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        let mut closed = Vec::new();
        for p in pending {
            match self.commit_exit(&p.position, p.exit).await {
                Ok(Some(c)) => closed.push(c),
                Ok(None) => {}
                Err(e) => debug!("Retry for {} still failing: {}", p.position.id, e),
            }
        }
        closed
    }

    /// Pending retries, then detection and closing against `bands`.
    pub async fn process_exits(&self, bands: &HashMap<String, PriceBand>) -> Result<Vec<ClosedPosition>> {
        let mut closed = self.retry_pending().await;
        for candidate in self.check_exits(bands).await? {
            match self.close_exit(&candidate).await {
                Ok(Some(c)) => closed.push(c),
                Ok(None) => {}
                Err(e) => error!("Failed to close {}: {}", candidate.position.id, e),
            }
        }
        Ok(closed)
    }

    // ── Reporting ───────────────────────────────────────────────────────

    async fn refresh_performance(&self, ledger: Ledger, day: chrono::NaiveDate) -> Result<()> {
        let all = self.store.list_all(ledger).await?;
        if let Some(summary) = PerformanceSummary::for_day(day, self.tz, &all) {
            self.store.upsert_performance(ledger, &summary).await?;
            debug!(
                "{} {}: {} trades, net ${:.2}",
                ledger.performance_sheet_name(),
                day,
                summary.total_trades,
                summary.net_pnl
            );
        }
        Ok(())
    }

    /// Open positions of both ledgers, bot ledger first.
    pub async fn list_open(&self) -> Result<Vec<Position>> {
        let mut out = Vec::new();
        for ledger in Ledger::ALL {
            out.extend(self.store.list_open(ledger).await?);
        }
        Ok(out)
    }

    pub async fn performance(&self) -> Result<Vec<(Ledger, Option<PerformanceSummary>)>> {
        let mut out = Vec::new();
        for ledger in Ledger::ALL {
            out.push((ledger, self.store.latest_performance(ledger).await?));
        }
        Ok(out)
    }
}
