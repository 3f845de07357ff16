use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    pub fn total_range(&self) -> f64 {
        self.high - self.low
    }

    /// True range against the previous close; the first bar of a series only has its own range.
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        match prev_close {
            Some(pc) => self
                .total_range()
                .max((self.high - pc).abs())
                .max((self.low - pc).abs()),
            None => self.total_range(),
        }
    }
}

/// Daily bars for one ticker, ascending by date with no duplicate dates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PriceSeries {
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    /// Sorts by date and drops repeated dates (the later bar wins).
    pub fn new(mut bars: Vec<PriceBar>) -> Self {
        bars.sort_by_key(|b| b.date);
        let mut deduped: Vec<PriceBar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => deduped.push(bar),
            }
        }
        Self { bars: deduped }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&PriceBar> {
        self.bars.last()
    }

    pub fn as_slice(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }
}

impl std::ops::Index<usize> for PriceSeries {
    type Output = PriceBar;
    fn index(&self, index: usize) -> &Self::Output {
        &self.bars[index]
    }
}

/// High/low band of a scan interval plus the last trade, used for exit detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBand {
    pub last: f64,
    pub high: f64,
    pub low: f64,
}

impl From<&PriceBar> for PriceBand {
    fn from(bar: &PriceBar) -> Self {
        Self {
            last: bar.close,
            high: bar.high,
            low: bar.low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: u32, o: f64, h: f64, l: f64, c: f64) -> PriceBar {
        PriceBar {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 1000.0,
        }
    }

    #[test]
    fn true_range_uses_previous_close() {
        let b = bar(1, 100.0, 105.0, 98.0, 104.0);
        assert!((b.true_range(None) - 7.0).abs() < 1e-9);
        // gap up: |high - prev close| dominates
        assert!((b.true_range(Some(90.0)) - 15.0).abs() < 1e-9);
        // gap down: |low - prev close| dominates
        assert!((b.true_range(Some(110.0)) - 12.0).abs() < 1e-9);
    }

    #[test]
    fn series_sorts_and_drops_duplicate_dates() {
        let s = PriceSeries::new(vec![
            bar(3, 1.0, 1.0, 1.0, 3.0),
            bar(1, 1.0, 1.0, 1.0, 1.0),
            bar(3, 1.0, 1.0, 1.0, 33.0),
            bar(2, 1.0, 1.0, 1.0, 2.0),
        ]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.closes(), vec![1.0, 2.0, 33.0]);
    }

    #[test]
    fn band_from_bar() {
        let b = bar(1, 100.0, 105.0, 98.0, 104.0);
        let band = PriceBand::from(&b);
        assert_eq!(band.last, 104.0);
        assert_eq!(band.high, 105.0);
        assert_eq!(band.low, 98.0);
    }
}
