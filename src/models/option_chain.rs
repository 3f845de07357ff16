use serde::{Deserialize, Serialize};

use crate::models::{InstrumentType, PriceBand};

/// One row of a provider option chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub strike: f64,
    #[serde(default)]
    pub bid: f64,
    #[serde(default)]
    pub ask: f64,
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub volume: u64,
    #[serde(default)]
    pub open_interest: u64,
}

impl OptionQuote {
    /// The last traded premium as a band; `None` before the first trade.
    pub fn premium_band(&self) -> Option<PriceBand> {
        (self.last_price > 0.0).then_some(PriceBand {
            last: self.last_price,
            high: self.last_price,
            low: self.last_price,
        })
    }

    /// Bid/ask width as a percentage of the last trade; 999 when there is no last trade.
    pub fn spread_pct(&self) -> f64 {
        if self.last_price > 0.0 {
            (self.ask - self.bid) / self.last_price * 100.0
        } else {
            999.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionChain {
    pub calls: Vec<OptionQuote>,
    pub puts: Vec<OptionQuote>,
}

impl OptionChain {
    pub fn quote(&self, kind: InstrumentType, strike: f64) -> Option<&OptionQuote> {
        let side = match kind {
            InstrumentType::Call => &self.calls,
            InstrumentType::Put => &self.puts,
            InstrumentType::Shares => return None,
        };
        side.iter().find(|q| (q.strike - strike).abs() < 1e-6)
    }
}
