use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ExitReason, InstrumentType, Ledger, PositionStatus, TradeDirection};

/// Contract details; only meaningful for option instruments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionTerms {
    #[serde(default)]
    pub strike: Option<f64>,
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    #[serde(default)]
    pub premium: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Instrument {
    Shares,
    Call(OptionTerms),
    Put(OptionTerms),
}

impl Instrument {
    pub fn kind(&self) -> InstrumentType {
        match self {
            Instrument::Shares => InstrumentType::Shares,
            Instrument::Call(_) => InstrumentType::Call,
            Instrument::Put(_) => InstrumentType::Put,
        }
    }

    pub fn option_terms(&self) -> Option<&OptionTerms> {
        match self {
            Instrument::Shares => None,
            Instrument::Call(t) | Instrument::Put(t) => Some(t),
        }
    }

    pub fn from_parts(kind: InstrumentType, terms: OptionTerms) -> Self {
        match kind {
            InstrumentType::Shares => Instrument::Shares,
            InstrumentType::Call => Instrument::Call(terms),
            InstrumentType::Put => Instrument::Put(terms),
        }
    }
}

/// Band key of an option contract, e.g. `NVDA 2024-04-19 CALL 950.00`.
pub fn contract_key(ticker: &str, kind: InstrumentType, expiry: NaiveDate, strike: f64) -> String {
    format!("{ticker} {expiry} {} {strike:.2}", kind.as_str())
}

/// Terminal fields written once, when the position closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitRecord {
    pub exit_price: f64,
    pub exit_date: DateTime<Utc>,
    pub reason: ExitReason,
    pub pnl_dollar: f64,
    pub pnl_percent: f64,
    pub days_held: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub ledger: Ledger,
    pub entry_date: DateTime<Utc>,
    pub ticker: String,
    pub direction: TradeDirection,
    pub instrument: Instrument,
    pub entry_price: f64,
    pub stop: f64,
    pub target: f64,
    pub quantity: u32,
    #[serde(default)]
    pub score: Option<u32>,
    #[serde(default)]
    pub reasons: String,
    pub status: PositionStatus,
    #[serde(default)]
    pub exit: Option<ExitRecord>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn instrument_type(&self) -> InstrumentType {
        self.instrument.kind()
    }

    /// Contract the position holds, when strike and expiry are on record.
    pub fn contract(&self) -> Option<(InstrumentType, NaiveDate, f64)> {
        let terms = self.instrument.option_terms()?;
        Some((self.instrument_type(), terms.expiry?, terms.strike?))
    }

    /// Key of the price band exits are checked against: the ticker for
    /// shares, the contract for options.
    pub fn band_key(&self) -> Option<String> {
        match self.instrument {
            Instrument::Shares => Some(self.ticker.clone()),
            Instrument::Call(_) | Instrument::Put(_) => {
                let (kind, expiry, strike) = self.contract()?;
                Some(contract_key(&self.ticker, kind, expiry, strike))
            }
        }
    }

    pub fn pnl_dollar(&self) -> f64 {
        self.exit.as_ref().map_or(0.0, |e| e.pnl_dollar)
    }

    /// Applies the terminal transition. Closed positions are never reopened or re-closed.
    pub fn close(&mut self, exit: ExitRecord) -> bool {
        if !self.is_open() {
            return false;
        }
        self.status = PositionStatus::from_pnl(exit.pnl_dollar);
        self.exit = Some(exit);
        true
    }
}
