use serde::{Deserialize, Serialize};

use crate::core::indicators::{self, NotReady, ReadySnapshot};
use crate::core::options::OptionsInsight;
use crate::core::scoring::{self, ScoreResult};
use crate::models::{PriceSeries, SignalDirection};

pub const BULL_MIN_SCORE: u32 = 65;
pub const BULL_MIN_ADX: f64 = 20.0;
pub const BEAR_MAX_SCORE: u32 = 40;
pub const BEAR_MIN_CONFIRMS: u32 = 3;

pub const BULL_STOP_ATR: f64 = 2.5;
pub const BULL_TARGET_ATR: f64 = 3.5;
pub const BEAR_STOP_ATR: f64 = 2.0;
pub const BEAR_TARGET_ATR: f64 = 4.0;

/// Price levels and fixed-fractional size for a directional signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub stop: f64,
    pub target: f64,
    pub quantity: u32,
    pub capital: f64,
    pub risk_pct: f64,
    pub reward_pct: f64,
}

impl TradePlan {
    fn new(close: f64, stop: f64, target: f64, position_capital: f64) -> Self {
        let quantity = if close > 0.0 {
            (position_capital / close).floor().max(0.0) as u32
        } else {
            0
        };
        Self {
            stop: round2(stop),
            target: round2(target),
            quantity,
            capital: round2(quantity as f64 * close),
            risk_pct: (stop - close).abs() / close * 100.0,
            reward_pct: (target - close).abs() / close * 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub ticker: String,
    pub price: f64,
    pub direction: SignalDirection,
    pub score: u32,
    pub reasons: Vec<String>,
    pub atr: f64,
    pub adx: f64,
    pub rsi: f64,
    /// Absent for NEUTRAL.
    pub plan: Option<TradePlan>,
    #[serde(default)]
    pub options_insight: Option<OptionsInsight>,
}

impl Signal {
    pub fn is_directional(&self) -> bool {
        self.direction != SignalDirection::Neutral
    }
}

/// Applies the thresholds. Strict evaluation returns `None` where lenient
/// evaluation returns a NEUTRAL signal.
pub fn classify(
    ticker: &str,
    ready: &ReadySnapshot,
    scores: &ScoreResult,
    position_capital: f64,
    strict: bool,
) -> Option<Signal> {
    let close = ready.snapshot.close;
    let atr = ready.atr;

    let (direction, score, reasons, plan) =
        if scores.bull_score >= BULL_MIN_SCORE && ready.adx > BULL_MIN_ADX {
            let plan = TradePlan::new(
                close,
                close - BULL_STOP_ATR * atr,
                close + BULL_TARGET_ATR * atr,
                position_capital,
            );
            (
                SignalDirection::Bull,
                scores.bull_score,
                scores.bull_reasons.clone(),
                Some(plan),
            )
        } else if scores.bear_score <= BEAR_MAX_SCORE && scores.bear_confirms >= BEAR_MIN_CONFIRMS {
            let plan = TradePlan::new(
                close,
                close + BEAR_STOP_ATR * atr,
                close - BEAR_TARGET_ATR * atr,
                position_capital,
            );
            (
                SignalDirection::Bear,
                100 - scores.bear_score,
                scores.bear_reasons.clone(),
                Some(plan),
            )
        } else if strict {
            return None;
        } else {
            (
                SignalDirection::Neutral,
                scores.bull_score,
                vec!["No setup found".to_string()],
                None,
            )
        };

    Some(Signal {
        ticker: ticker.to_string(),
        price: round2(close),
        direction,
        score,
        reasons,
        atr: round2(atr),
        adx: ready.adx,
        rsi: ready.rsi,
        plan,
        options_insight: None,
    })
}

/// Indicators, scoring and classification for one ticker's history.
pub fn evaluate(
    ticker: &str,
    series: &PriceSeries,
    position_capital: f64,
    strict: bool,
) -> Result<Option<Signal>, NotReady> {
    let ready = indicators::latest_ready(series)?;
    let scores = scoring::score(&ready);
    Ok(classify(ticker, &ready, &scores, position_capital, strict))
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
