use serde::{Deserialize, Serialize};

use crate::core::indicators::ReadySnapshot;

const BASE_SCORE: i32 = 50;
const WEAK_BEAR_CONFIRMS: u32 = 3;
const WEAK_BEAR_REVERSAL: i32 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub bull_score: u32,
    pub bear_score: u32,
    pub bear_confirms: u32,
    pub bull_reasons: Vec<String>,
    pub bear_reasons: Vec<String>,
}

/// Bull and bear scores for one snapshot. Each side starts at 50 and is
/// clamped to [0, 100]; reasons keep the order they fired in.
pub fn score(ready: &ReadySnapshot) -> ScoreResult {
    let (bull_score, bull_reasons) = score_bull(ready);
    let (bear_score, bear_confirms, bear_reasons) = score_bear(ready);
    ScoreResult {
        bull_score,
        bear_score,
        bear_confirms,
        bull_reasons,
        bear_reasons,
    }
}

// An undefined operand makes every comparison false, so a missing
// indicator simply never fires its branch.
fn gt(a: Option<f64>, b: Option<f64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a > b)
}

fn above(a: Option<f64>, threshold: f64) -> bool {
    matches!(a, Some(v) if v > threshold)
}

fn below(a: Option<f64>, threshold: f64) -> bool {
    matches!(a, Some(v) if v < threshold)
}

fn clamp(score: i32) -> u32 {
    score.clamp(0, 100) as u32
}

fn score_bull(r: &ReadySnapshot) -> (u32, Vec<String>) {
    let s = &r.snapshot;
    let close = Some(s.close);
    let mut score = BASE_SCORE;
    let mut reasons = Vec::new();

    // Trend
    if gt(close, s.sma50) && gt(s.sma50, s.sma200) {
        score += 15;
        reasons.push("Strong Uptrend".to_string());
    } else if gt(close, s.sma50) {
        score += 10;
        reasons.push("Above SMA50".to_string());
    } else if gt(close, s.ema20) {
        score += 5;
    }

    // Trend strength
    if r.adx > 25.0 {
        score += 10;
        reasons.push(format!("ADX Strong ({:.0})", r.adx));
    } else if r.adx > 20.0 {
        score += 5;
    }

    if let (Some(p), Some(m)) = (s.plus_di, s.minus_di) {
        if p > m + 5.0 {
            score += 5;
            reasons.push("Bullish Momentum".to_string());
        }
    }

    if r.rsi < 30.0 {
        score += 20;
        reasons.push(format!("Oversold (RSI {:.0})", r.rsi));
    } else if r.rsi < 40.0 {
        score += 12;
        reasons.push(format!("RSI Favorable ({:.0})", r.rsi));
    } else if r.rsi > 60.0 {
        score -= 8;
    }

    if above(s.roc5, 2.0) {
        score += 5;
        reasons.push("Positive Momentum".to_string());
    }

    if below(s.bb_position, 0.2) {
        score += 10;
        reasons.push("BB Oversold".to_string());
    } else if below(s.bb_position, 0.4) {
        score += 5;
    }

    if let Some(ratio) = s.volume_ratio {
        if ratio > 1.5 {
            score += 8;
            reasons.push(format!("High Volume ({ratio:.1}x)"));
        } else if ratio > 1.2 {
            score += 4;
        }
    }

    (clamp(score), reasons)
}

fn score_bear(r: &ReadySnapshot) -> (u32, u32, Vec<String>) {
    let s = &r.snapshot;
    let mut score = BASE_SCORE;
    let mut confirms = 0u32;
    let mut reasons = Vec::new();

    if gt(s.sma50, Some(s.close)) {
        score -= 12;
        confirms += 1;
        reasons.push("Below SMA50".to_string());
    }

    if r.adx > 25.0 {
        score -= 8;
        confirms += 1;
        reasons.push(format!("Strong Trend (ADX {:.0})", r.adx));
    }

    if let (Some(p), Some(m)) = (s.plus_di, s.minus_di) {
        if m > p + 10.0 {
            score -= 10;
            confirms += 1;
            reasons.push("Bearish Momentum".to_string());
        }
    }

    if r.rsi > 70.0 {
        score -= 15;
        confirms += 1;
        reasons.push(format!("Overbought (RSI {:.0})", r.rsi));
    }

    if above(s.bb_position, 0.9) {
        score -= 10;
        confirms += 1;
        reasons.push("BB Overbought".to_string());
    }

    if let Some(ratio) = s.volume_ratio {
        if ratio > 2.0 {
            score -= 12;
            confirms += 1;
            reasons.push(format!("High Volume ({ratio:.1}x)"));
        }
    }

    if confirms < WEAK_BEAR_CONFIRMS {
        score += WEAK_BEAR_REVERSAL;
    }

    (clamp(score), confirms, reasons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::indicators::{latest_ready, IndicatorSnapshot};
    use crate::test_helpers::{make_zigzag_uptrend, ready};

    fn neutral() -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: 100.0,
            sma50: Some(100.0),
            sma200: Some(100.0),
            ema20: Some(100.0),
            rsi: Some(50.0),
            atr: Some(2.0),
            adx: Some(15.0),
            plus_di: Some(20.0),
            minus_di: Some(20.0),
            bb_position: Some(0.5),
            volume_ratio: Some(1.0),
            roc5: Some(0.0),
            ..Default::default()
        }
    }

    #[test]
    fn flat_market_scores_base_with_bear_reversal() {
        let r = score(&ready(neutral()));
        assert_eq!(r.bull_score, 50);
        assert_eq!(r.bear_score, 65);
        assert_eq!(r.bear_confirms, 0);
        assert!(r.bull_reasons.is_empty());
        assert!(r.bear_reasons.is_empty());
    }

    #[test]
    fn bull_reasons_keep_evaluation_order() {
        let snap = IndicatorSnapshot {
            close: 110.0,
            sma50: Some(105.0),
            sma200: Some(100.0),
            rsi: Some(28.0),
            adx: Some(31.4),
            plus_di: Some(30.0),
            minus_di: Some(10.0),
            roc5: Some(3.0),
            bb_position: Some(0.1),
            volume_ratio: Some(1.83),
            ..neutral()
        };
        let r = score(&ready(snap));
        // 50 + 15 + 10 + 5 + 20 + 5 + 10 + 8 clamps at 100
        assert_eq!(r.bull_score, 100);
        assert_eq!(
            r.bull_reasons,
            vec![
                "Strong Uptrend",
                "ADX Strong (31)",
                "Bullish Momentum",
                "Oversold (RSI 28)",
                "Positive Momentum",
                "BB Oversold",
                "High Volume (1.8x)",
            ]
        );
    }

    #[test]
    fn partial_branches() {
        let snap = IndicatorSnapshot {
            close: 101.0,
            sma50: Some(100.0),
            sma200: Some(102.0),
            rsi: Some(35.0),
            adx: Some(22.0),
            bb_position: Some(0.3),
            volume_ratio: Some(1.3),
            ..neutral()
        };
        let r = score(&ready(snap));
        // 50 + 10 (above SMA50) + 5 (ADX) + 12 (RSI) + 5 (BB) + 4 (volume)
        assert_eq!(r.bull_score, 86);
        assert_eq!(r.bull_reasons, vec!["Above SMA50", "RSI Favorable (35)"]);
    }

    #[test]
    fn ema_fallback_adds_without_tag() {
        let snap = IndicatorSnapshot {
            close: 99.0,
            ema20: Some(98.0),
            sma200: None,
            ..neutral()
        };
        let r = score(&ready(snap));
        assert_eq!(r.bull_score, 55);
        assert!(r.bull_reasons.is_empty());
        // below SMA50 confirms once; weak bear gets the reversal
        assert_eq!(r.bear_confirms, 1);
        assert_eq!(r.bear_score, 53);
    }

    #[test]
    fn strong_bear_confirms() {
        let snap = IndicatorSnapshot {
            close: 90.0,
            sma50: Some(100.0),
            rsi: Some(75.0),
            adx: Some(30.0),
            plus_di: Some(10.0),
            minus_di: Some(25.0),
            bb_position: Some(0.95),
            volume_ratio: Some(2.5),
            ..neutral()
        };
        let r = score(&ready(snap));
        assert_eq!(r.bear_confirms, 6);
        // 50 - 12 - 8 - 10 - 15 - 10 - 12 clamps at 0
        assert_eq!(r.bear_score, 0);
        assert_eq!(r.bear_reasons[0], "Below SMA50");
        assert_eq!(r.bear_reasons[1], "Strong Trend (ADX 30)");
        assert_eq!(r.bear_reasons.last().unwrap(), "High Volume (2.5x)");
    }

    #[test]
    fn missing_optional_indicators_never_fire() {
        let snap = IndicatorSnapshot {
            close: 100.0,
            rsi: Some(50.0),
            adx: Some(10.0),
            atr: Some(1.0),
            ..Default::default()
        };
        let r = score(&ready(snap));
        assert_eq!(r.bull_score, 50);
        assert_eq!(r.bear_confirms, 0);
    }

    #[test]
    fn scoring_is_pure() {
        let snap = latest_ready(&make_zigzag_uptrend(300)).unwrap();
        assert_eq!(score(&snap), score(&snap));
    }

    #[test]
    fn zigzag_uptrend_scores() {
        let snap = latest_ready(&make_zigzag_uptrend(300)).unwrap();
        let r = score(&snap);
        // +15 trend, +10 ADX, +5 DI spread, -8 hot RSI
        assert_eq!(r.bull_score, 72);
        assert_eq!(
            r.bull_reasons,
            vec!["Strong Uptrend", "ADX Strong (50)", "Bullish Momentum"]
        );
        // ADX, RSI above 70 and a close near the upper band confirm
        assert_eq!(r.bear_confirms, 3);
        assert_eq!(r.bear_score, 17);
    }
}
