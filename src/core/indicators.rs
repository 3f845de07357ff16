//! Daily technical indicators for the most recent bar of a series.
//!
//! Every rolling window looks only at past and current bars. A value that
//! needs N bars is `None` for the first N-1 bars, and a division by zero
//! propagates as `None` rather than being clamped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::PriceSeries;

/// 200-day warm-up plus margin.
pub const MIN_HISTORY_BARS: usize = 250;

const SMA_FAST: usize = 50;
const SMA_SLOW: usize = 200;
const EMA_SPAN: usize = 20;
const RSI_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const DI_PERIOD: usize = 14;
const BB_PERIOD: usize = 20;
const BB_WIDTH: f64 = 2.0;
const VOLUME_PERIOD: usize = 20;
const ROC_PERIOD: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    pub ema20: Option<f64>,
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub adx: Option<f64>,
    pub plus_di: Option<f64>,
    pub minus_di: Option<f64>,
    pub bb_mid: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_position: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub roc5: Option<f64>,
}

impl IndicatorSnapshot {
    /// Scoring needs RSI, ADX and ATR on the bar.
    pub fn is_ready(&self) -> bool {
        self.rsi.is_some() && self.adx.is_some() && self.atr.is_some()
    }
}

/// A snapshot that passed the readiness gate; RSI, ADX and ATR are unwrapped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadySnapshot {
    pub snapshot: IndicatorSnapshot,
    pub rsi: f64,
    pub adx: f64,
    pub atr: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum NotReady {
    #[error("only {bars} bars of history (need {MIN_HISTORY_BARS})")]
    ShortHistory { bars: usize },
    #[error("{0} undefined on latest bar")]
    Undefined(&'static str),
}

/// Snapshot for every bar of the series.
pub fn compute(series: &PriceSeries) -> Vec<IndicatorSnapshot> {
    let bars = series.as_slice();
    let n = bars.len();
    if n == 0 {
        return Vec::new();
    }

    let closes = series.closes();
    let volumes = series.volumes();

    let sma50 = sma(&closes, SMA_FAST);
    let sma200 = sma(&closes, SMA_SLOW);
    let ema20 = ema(&closes, EMA_SPAN);
    let rsi = rsi(&closes, RSI_PERIOD);

    // True range; the first bar has no previous close
    let tr: Vec<Option<f64>> = (0..n)
        .map(|i| {
            let prev = if i > 0 { Some(bars[i - 1].close) } else { None };
            Some(bars[i].true_range(prev))
        })
        .collect();
    let atr = rolling_mean(&tr, ATR_PERIOD);

    // Directional movement. -DM is compared against the already-filtered +DM,
    // so an exact tie between the two moves is booked as downside.
    let mut plus_dm = vec![Some(0.0); n];
    let mut minus_dm = vec![Some(0.0); n];
    for i in 1..n {
        let up = bars[i].high - bars[i - 1].high;
        let down = bars[i - 1].low - bars[i].low;
        let plus = if up > down && up > 0.0 { up } else { 0.0 };
        let minus = if down > plus && down > 0.0 { down } else { 0.0 };
        plus_dm[i] = Some(plus);
        minus_dm[i] = Some(minus);
    }
    let plus_dm_avg = rolling_mean(&plus_dm, DI_PERIOD);
    let minus_dm_avg = rolling_mean(&minus_dm, DI_PERIOD);

    let plus_di: Vec<Option<f64>> = (0..n)
        .map(|i| directional_index(plus_dm_avg[i], atr[i]))
        .collect();
    let minus_di: Vec<Option<f64>> = (0..n)
        .map(|i| directional_index(minus_dm_avg[i], atr[i]))
        .collect();
    let dx: Vec<Option<f64>> = (0..n)
        .map(|i| match (plus_di[i], minus_di[i]) {
            (Some(p), Some(m)) if p + m != 0.0 => Some((p - m).abs() / (p + m) * 100.0),
            _ => None,
        })
        .collect();
    let adx = rolling_mean(&dx, DI_PERIOD);

    // Bollinger bands
    let bb_mid = sma(&closes, BB_PERIOD);
    let bb_std = rolling_std(&closes, BB_PERIOD);

    let vol_avg = sma(&volumes, VOLUME_PERIOD);

    (0..n)
        .map(|i| {
            let close = closes[i];
            let (bb_upper, bb_lower) = match (bb_mid[i], bb_std[i]) {
                (Some(m), Some(s)) => (Some(m + s * BB_WIDTH), Some(m - s * BB_WIDTH)),
                _ => (None, None),
            };
            let bb_position = match (bb_upper, bb_lower) {
                (Some(u), Some(l)) if u - l != 0.0 => Some((close - l) / (u - l)),
                _ => None,
            };
            let volume_ratio = match vol_avg[i] {
                Some(avg) if avg != 0.0 => Some(volumes[i] / avg),
                _ => None,
            };
            let roc5 = if i >= ROC_PERIOD && closes[i - ROC_PERIOD] != 0.0 {
                let prev = closes[i - ROC_PERIOD];
                Some((close - prev) / prev * 100.0)
            } else {
                None
            };

            IndicatorSnapshot {
                close,
                sma50: sma50[i],
                sma200: sma200[i],
                ema20: ema20[i],
                rsi: rsi[i],
                atr: atr[i],
                adx: adx[i],
                plus_di: plus_di[i],
                minus_di: minus_di[i],
                bb_mid: bb_mid[i],
                bb_upper,
                bb_lower,
                bb_position,
                volume_ratio,
                roc5,
            }
        })
        .collect()
}

/// Latest snapshot, gated on history length and indicator readiness.
pub fn latest_ready(series: &PriceSeries) -> Result<ReadySnapshot, NotReady> {
    if series.len() < MIN_HISTORY_BARS {
        return Err(NotReady::ShortHistory {
            bars: series.len(),
        });
    }
    let snapshot = compute(series)
        .pop()
        .ok_or(NotReady::ShortHistory { bars: 0 })?;

    let rsi = snapshot.rsi.ok_or(NotReady::Undefined("RSI"))?;
    let adx = snapshot.adx.ok_or(NotReady::Undefined("ADX"))?;
    let atr = snapshot.atr.ok_or(NotReady::Undefined("ATR"))?;

    Ok(ReadySnapshot {
        snapshot,
        rsi,
        adx,
        atr,
    })
}

fn directional_index(dm_avg: Option<f64>, atr: Option<f64>) -> Option<f64> {
    match (dm_avg, atr) {
        (Some(dm), Some(a)) if a != 0.0 => Some(100.0 * dm / a),
        _ => None,
    }
}

/// Simple mean over a trailing window; `None` if the window is short or holds a gap.
fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            let mut sum = 0.0;
            for v in slice {
                sum += (*v)?;
            }
            Some(sum / window as f64)
        })
        .collect()
}

pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let wrapped: Vec<Option<f64>> = values.iter().map(|&v| Some(v)).collect();
    rolling_mean(&wrapped, window)
}

/// Population standard deviation over a trailing window.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            let mean = slice.iter().sum::<f64>() / window as f64;
            let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / window as f64;
            Some(var.sqrt())
        })
        .collect()
}

/// Span-based exponential mean with bias-adjusted weights, defined from the first bar.
pub fn ema(values: &[f64], span: usize) -> Vec<Option<f64>> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let decay = 1.0 - alpha;
    let mut num = 0.0;
    let mut den = 0.0;
    values
        .iter()
        .map(|&v| {
            num = v + decay * num;
            den = 1.0 + decay * den;
            Some(num / den)
        })
        .collect()
}

/// Simple-mean RSI. An average loss of zero leaves RSI undefined.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = closes.len();
    let mut gains = vec![Some(0.0); n];
    let mut losses = vec![Some(0.0); n];
    for i in 1..n {
        let delta = closes[i] - closes[i - 1];
        gains[i] = Some(delta.max(0.0));
        losses[i] = Some((-delta).max(0.0));
    }
    let avg_gain = rolling_mean(&gains, period);
    let avg_loss = rolling_mean(&losses, period);

    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(g, l)| match (g, l) {
            (Some(g), Some(l)) if *l != 0.0 => Some(100.0 - 100.0 / (1.0 + g / l)),
            _ => None,
        })
        .collect()
}
