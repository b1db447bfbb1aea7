//! Core data types for the regime engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV bar representing a single trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Create a new bar.
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate that bar data is consistent.
    pub fn validate(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
            && self.volume >= 0.0
    }
}

/// One usable trading day after feature extraction.
///
/// Every field is finite: rows that cannot fill the volatility window are
/// dropped by the feature pipeline rather than carried with placeholder values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub close: f64,
    /// Simple return from the prior close.
    pub returns: f64,
    /// Annualized rolling volatility of returns.
    pub volatility: f64,
    /// Decline of the growth index from its running peak, always <= 0.
    pub drawdown: f64,
}

impl Observation {
    /// Number of features handed to the HMM.
    pub const NUM_FEATURES: usize = 3;

    /// Feature vector `[returns, volatility, drawdown]`.
    pub fn features(&self) -> [f64; Self::NUM_FEATURES] {
        [self.returns, self.volatility, self.drawdown]
    }

    /// Check that all numeric fields are finite.
    pub fn is_finite(&self) -> bool {
        self.close.is_finite()
            && self.returns.is_finite()
            && self.volatility.is_finite()
            && self.drawdown.is_finite()
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} close={:.2} ret={:.4} vol={:.4} dd={:.4}",
            self.date, self.close, self.returns, self.volatility, self.drawdown
        )
    }
}
