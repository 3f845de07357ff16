//! Informational option-contract suggestion attached to directional signals.
//! Nothing here is ever executed.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AgentError;
use crate::market::MarketData;
use crate::models::{InstrumentType, OptionChain, OptionQuote, TradeDirection};

pub const MIN_DTE: i64 = 30;
pub const MAX_DTE: i64 = 60;
pub const TARGET_DTE: i64 = 45;
pub const STRIKE_ATR_OFFSET: f64 = 1.5;
pub const MIN_OPEN_INTEREST: u64 = 50;
pub const MIN_VOLUME: u64 = 10;
pub const MAX_SPREAD_PCT: f64 = 25.0;
pub const SMALL_BUDGET: f64 = 1000.0;
pub const LARGE_BUDGET: f64 = 2500.0;
const CONTRACT_MULTIPLIER: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsInsight {
    pub kind: InstrumentType,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub dte: i64,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: u64,
    pub open_interest: u64,
    pub spread_pct: f64,
    pub contracts_small: u32,
    pub contracts_large: u32,
}

/// Expiry within 30..=60 days closest to 45 days out. Ties go to the earlier date.
///
/// DTE is whole days from `now` (local) to the expiry's midnight, so past
/// midnight an expiry counts one day less than the calendar difference.
pub fn pick_expiry(expirations: &[NaiveDate], now: NaiveDateTime) -> Option<(NaiveDate, i64)> {
    expirations
        .iter()
        .filter_map(|&e| e.and_hms_opt(0, 0, 0).map(|midnight| (e, (midnight - now).num_days())))
        .filter(|(_, dte)| (MIN_DTE..=MAX_DTE).contains(dte))
        .min_by_key(|&(e, dte)| ((dte - TARGET_DTE).abs(), e))
}

pub fn target_strike(direction: TradeDirection, close: f64, atr: f64) -> f64 {
    let offset = atr * STRIKE_ATR_OFFSET;
    match direction {
        TradeDirection::Bull => close + offset,
        TradeDirection::Bear => close - offset,
    }
}

fn is_liquid(q: &OptionQuote) -> bool {
    q.open_interest > MIN_OPEN_INTEREST || q.volume > MIN_VOLUME
}

fn contracts_for(budget: f64, premium: f64) -> u32 {
    if premium <= 0.0 {
        return 0;
    }
    (budget / (premium * CONTRACT_MULTIPLIER)).floor() as u32
}

/// Nearest liquid strike to the ATR-scaled target. Only the nearest strike is
/// considered; if its spread is too wide there is no suggestion.
pub fn select_contract(
    ticker: &str,
    direction: TradeDirection,
    close: f64,
    atr: f64,
    expiry: NaiveDate,
    dte: i64,
    chain: &OptionChain,
) -> Result<OptionsInsight, AgentError> {
    let kind = direction.option_type();
    let quotes = match kind {
        InstrumentType::Put => &chain.puts,
        _ => &chain.calls,
    };
    let strike_target = target_strike(direction, close, atr);

    let best = quotes
        .iter()
        .filter(|q| is_liquid(q))
        .min_by(|a, b| {
            let da = (a.strike - strike_target).abs();
            let db = (b.strike - strike_target).abs();
            da.total_cmp(&db)
        })
        .ok_or_else(|| AgentError::NoQualifyingContract {
            ticker: ticker.to_string(),
        })?;

    let spread_pct = best.spread_pct();
    if spread_pct > MAX_SPREAD_PCT {
        debug!("{} {} {:.2} spread {:.1}% too wide", ticker, kind, best.strike, spread_pct);
        return Err(AgentError::NoQualifyingContract {
            ticker: ticker.to_string(),
        });
    }

    Ok(OptionsInsight {
        kind,
        strike: best.strike,
        expiry,
        dte,
        last: best.last_price,
        bid: best.bid,
        ask: best.ask,
        volume: best.volume,
        open_interest: best.open_interest,
        spread_pct,
        contracts_small: contracts_for(SMALL_BUDGET, best.last_price),
        contracts_large: contracts_for(LARGE_BUDGET, best.last_price),
    })
}

/// Fetches expirations and the chosen chain, then selects a contract.
/// Provider failures collapse into `NoQualifyingContract`.
pub async fn suggest(
    market: &dyn MarketData,
    ticker: &str,
    direction: TradeDirection,
    close: f64,
    atr: f64,
    now: NaiveDateTime,
) -> Result<OptionsInsight, AgentError> {
    let none = || AgentError::NoQualifyingContract {
        ticker: ticker.to_string(),
    };

    let expirations = market.get_expirations(ticker).await.map_err(|e| {
        debug!("{}: expirations unavailable: {}", ticker, e);
        none()
    })?;
    let (expiry, dte) = pick_expiry(&expirations, now).ok_or_else(none)?;
    let chain = market.get_option_chain(ticker, expiry).await.map_err(|e| {
        debug!("{}: option chain {} unavailable: {}", ticker, expiry, e);
        none()
    })?;

    select_contract(ticker, direction, close, atr, expiry, dte, &chain)
}
