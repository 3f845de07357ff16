use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of classifying a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Bull,
    Bear,
    Neutral,
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl SignalDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDirection::Bull => "BULL",
            SignalDirection::Bear => "BEAR",
            SignalDirection::Neutral => "NEUTRAL",
        }
    }

    pub fn to_trade(self) -> Option<TradeDirection> {
        match self {
            SignalDirection::Bull => Some(TradeDirection::Bull),
            SignalDirection::Bear => Some(TradeDirection::Bear),
            SignalDirection::Neutral => None,
        }
    }
}

/// Direction of a tracked position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeDirection {
    Bull,
    Bear,
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Bull => "BULL",
            TradeDirection::Bear => "BEAR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BULL" => Some(TradeDirection::Bull),
            "BEAR" => Some(TradeDirection::Bear),
            _ => None,
        }
    }

    pub fn option_type(&self) -> InstrumentType {
        match self {
            TradeDirection::Bull => InstrumentType::Call,
            TradeDirection::Bear => InstrumentType::Put,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentType {
    Shares,
    Call,
    Put,
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl InstrumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Shares => "SHARES",
            InstrumentType::Call => "CALL",
            InstrumentType::Put => "PUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SHARES" => Some(InstrumentType::Shares),
            "CALL" => Some(InstrumentType::Call),
            "PUT" => Some(InstrumentType::Put),
            _ => None,
        }
    }

    pub fn is_option(&self) -> bool {
        !matches!(self, InstrumentType::Shares)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    ClosedProfit,
    ClosedLoss,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::ClosedProfit => "CLOSED_PROFIT",
            PositionStatus::ClosedLoss => "CLOSED_LOSS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "OPEN" => Some(PositionStatus::Open),
            "CLOSED_PROFIT" => Some(PositionStatus::ClosedProfit),
            "CLOSED_LOSS" => Some(PositionStatus::ClosedLoss),
            _ => None,
        }
    }

    /// Terminal status is decided by realized P&L alone, never by the exit trigger.
    pub fn from_pnl(pnl_dollar: f64) -> Self {
        if pnl_dollar > 0.0 {
            PositionStatus::ClosedProfit
        } else {
            PositionStatus::ClosedLoss
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitReason {
    Stop,
    Target,
    Manual,
    Stale,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Stop => "STOP",
            ExitReason::Target => "TARGET",
            ExitReason::Manual => "MANUAL",
            ExitReason::Stale => "STALE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "STOP" => Some(ExitReason::Stop),
            "TARGET" => Some(ExitReason::Target),
            "MANUAL" => Some(ExitReason::Manual),
            "STALE" => Some(ExitReason::Stale),
            _ => None,
        }
    }
}

/// The two position record-keeping destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ledger {
    /// Every automatically generated signal.
    BotAlerts,
    /// Only positions a human declared as entered.
    MyTrades,
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sheet_name())
    }
}

impl Ledger {
    pub const ALL: [Ledger; 2] = [Ledger::BotAlerts, Ledger::MyTrades];

    pub fn sheet_name(&self) -> &'static str {
        match self {
            Ledger::BotAlerts => "Bot_Alerts",
            Ledger::MyTrades => "My_Trades",
        }
    }

    pub fn performance_sheet_name(&self) -> &'static str {
        match self {
            Ledger::BotAlerts => "Bot_Performance",
            Ledger::MyTrades => "My_Performance",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_pnl_sign() {
        assert_eq!(PositionStatus::from_pnl(0.01), PositionStatus::ClosedProfit);
        assert_eq!(PositionStatus::from_pnl(0.0), PositionStatus::ClosedLoss);
        assert_eq!(PositionStatus::from_pnl(-5.0), PositionStatus::ClosedLoss);
    }

    #[test]
    fn serde_uses_row_spelling() {
        let s = serde_json::to_string(&PositionStatus::ClosedProfit).unwrap();
        assert_eq!(s, "\"CLOSED_PROFIT\"");
        let d: TradeDirection = serde_json::from_str("\"BEAR\"").unwrap();
        assert_eq!(d, TradeDirection::Bear);
    }

    #[test]
    fn parse_round_trips_display() {
        for t in [InstrumentType::Shares, InstrumentType::Call, InstrumentType::Put] {
            assert_eq!(InstrumentType::parse(t.as_str()), Some(t));
        }
        for r in [ExitReason::Stop, ExitReason::Target, ExitReason::Manual, ExitReason::Stale] {
            assert_eq!(ExitReason::parse(&r.to_string()), Some(r));
        }
        assert_eq!(TradeDirection::parse("bull"), Some(TradeDirection::Bull));
        assert_eq!(TradeDirection::parse("sideways"), None);
    }

    #[test]
    fn bear_trades_use_puts() {
        assert_eq!(TradeDirection::Bear.option_type(), InstrumentType::Put);
    }
}
