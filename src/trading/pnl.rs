use crate::models::{InstrumentType, TradeDirection};

const CONTRACT_MULTIPLIER: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pnl {
    pub dollar: f64,
    pub percent: f64,
}

/// Realized P&L after a flat per-trade fee, both figures rounded to cents.
///
/// Option dollar P&L scales by the contract multiplier and follows direction;
/// option percent is always (exit - entry) / entry.
pub fn compute_pnl(
    direction: TradeDirection,
    instrument: InstrumentType,
    entry: f64,
    exit: f64,
    quantity: u32,
    fee: f64,
) -> Pnl {
    let per_unit = match direction {
        TradeDirection::Bull => exit - entry,
        TradeDirection::Bear => entry - exit,
    };
    let qty = quantity as f64;

    let (dollar, percent) = if instrument.is_option() {
        (
            per_unit * CONTRACT_MULTIPLIER * qty - fee,
            pct(exit - entry, entry),
        )
    } else {
        (per_unit * qty - fee, pct(per_unit, entry))
    };

    Pnl {
        dollar: round2(dollar),
        percent: round2(percent),
    }
}

fn pct(delta: f64, entry: f64) -> f64 {
    if entry == 0.0 {
        0.0
    } else {
        delta / entry * 100.0
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_bull_profit() {
        let p = compute_pnl(TradeDirection::Bull, InstrumentType::Shares, 100.0, 110.0, 10, 2.0);
        assert_eq!(p.dollar, 98.0);
        assert_eq!(p.percent, 10.0);
    }

    #[test]
    fn shares_bear_profit_on_drop() {
        let p = compute_pnl(TradeDirection::Bear, InstrumentType::Shares, 50.0, 45.0, 20, 2.0);
        assert_eq!(p.dollar, 98.0);
        assert_eq!(p.percent, 10.0);
    }

    #[test]
    fn flat_exit_loses_the_fee() {
        let p = compute_pnl(TradeDirection::Bull, InstrumentType::Shares, 100.0, 100.0, 10, 2.0);
        assert_eq!(p.dollar, -2.0);
        assert_eq!(p.percent, 0.0);
    }

    #[test]
    fn options_scale_dollar_but_not_percent() {
        let p = compute_pnl(TradeDirection::Bull, InstrumentType::Call, 2.0, 3.0, 2, 2.0);
        assert_eq!(p.dollar, 198.0);
        assert_eq!(p.percent, 50.0);
    }

    #[test]
    fn bear_option_percent_ignores_direction() {
        // premium rose on a bear put: dollar loss, percent still positive
        let p = compute_pnl(TradeDirection::Bear, InstrumentType::Put, 2.0, 3.0, 1, 2.0);
        assert_eq!(p.dollar, -102.0);
        assert_eq!(p.percent, 50.0);
    }

    #[test]
    fn rounds_to_cents() {
        let p = compute_pnl(TradeDirection::Bull, InstrumentType::Shares, 3.0, 3.333, 3, 0.0);
        assert_eq!(p.dollar, 1.0);
        assert_eq!(p.percent, 11.1);
    }
}
