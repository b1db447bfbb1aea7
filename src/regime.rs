//! Rule-based risk regime classification.
//!
//! Each observation is labelled independently from two inputs:
//!
//! - **Volatility state**: Low / Medium / High, split at the 33rd and 66th
//!   percentiles of volatility over the *whole* series
//! - **Drawdown**: shallow drawdowns confirm Low Risk, deep ones confirm High Risk
//!
//! The volatility state and drawdown combine into a [`RiskRegime`], which maps
//! to a tradable [`RiskSignal`].
//!
//! The percentile thresholds are computed once over the full series, so early
//! observations are classified with information from later ones. This
//! look-ahead is reproduced as-is; switching to rolling thresholds would
//! change the meaning of every label.
//!
//! # Example
//!
//! ```ignore
//! use regime_engine::regime::{RuleClassifier, RuleConfig};
//!
//! let classification = RuleClassifier::new(RuleConfig::default()).classify(&series)?;
//! for record in &classification.records {
//!     println!("{} {}", record.date, record.risk_signal);
//! }
//! ```

use crate::error::{RegimeError, Result};
use crate::features::ObservationSeries;
use crate::metrics::quantile;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Volatility state relative to the series' own distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VolState {
    #[serde(rename = "Low Volatility")]
    Low,
    #[serde(rename = "Medium Volatility")]
    Medium,
    #[serde(rename = "High Volatility")]
    High,
}

impl VolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolState::Low => "Low Volatility",
            VolState::Medium => "Medium Volatility",
            VolState::High => "High Volatility",
        }
    }
}

impl fmt::Display for VolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combined volatility and drawdown risk level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskRegime {
    #[serde(rename = "Low Risk")]
    LowRisk,
    #[serde(rename = "Medium Risk")]
    MediumRisk,
    #[serde(rename = "High Risk")]
    HighRisk,
}

impl RiskRegime {
    /// Trading signal for this risk level.
    pub fn signal(&self) -> RiskSignal {
        match self {
            RiskRegime::LowRisk => RiskSignal::RiskOn,
            RiskRegime::MediumRisk => RiskSignal::Neutral,
            RiskRegime::HighRisk => RiskSignal::RiskOff,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskRegime::LowRisk => "Low Risk",
            RiskRegime::MediumRisk => "Medium Risk",
            RiskRegime::HighRisk => "High Risk",
        }
    }
}

impl fmt::Display for RiskRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trading signal derived from the risk regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskSignal {
    #[serde(rename = "RISK-ON")]
    RiskOn,
    #[serde(rename = "NEUTRAL")]
    Neutral,
    #[serde(rename = "RISK-OFF")]
    RiskOff,
}

impl RiskSignal {
    /// All signals in risk order.
    pub const ALL: [RiskSignal; 3] = [RiskSignal::RiskOn, RiskSignal::Neutral, RiskSignal::RiskOff];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskSignal::RiskOn => "RISK-ON",
            RiskSignal::Neutral => "NEUTRAL",
            RiskSignal::RiskOff => "RISK-OFF",
        }
    }

    /// Parse the display form, e.g. `"RISK-ON"`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "RISK-ON" | "RISK_ON" => Some(RiskSignal::RiskOn),
            "NEUTRAL" => Some(RiskSignal::Neutral),
            "RISK-OFF" | "RISK_OFF" => Some(RiskSignal::RiskOff),
            _ => None,
        }
    }
}

impl fmt::Display for RiskSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the rule classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Quantile separating Low from Medium volatility.
    pub low_vol_quantile: f64,
    /// Quantile separating Medium from High volatility.
    pub high_vol_quantile: f64,
    /// Low volatility only counts as Low Risk with drawdown above this level.
    pub low_risk_drawdown: f64,
    /// High volatility counts as High Risk with drawdown below this level.
    pub high_risk_drawdown: f64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            low_vol_quantile: 0.33,
            high_vol_quantile: 0.66,
            low_risk_drawdown: -0.05,
            high_risk_drawdown: -0.15,
        }
    }
}

impl RuleConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        let in_unit = |q: f64| (0.0..=1.0).contains(&q);
        if !in_unit(self.low_vol_quantile) || !in_unit(self.high_vol_quantile) {
            return Err(RegimeError::ConfigError(
                "volatility quantiles must lie in [0, 1]".to_string(),
            ));
        }
        if self.low_vol_quantile > self.high_vol_quantile {
            return Err(RegimeError::ConfigError(format!(
                "low_vol_quantile ({}) must not exceed high_vol_quantile ({})",
                self.low_vol_quantile, self.high_vol_quantile
            )));
        }
        if self.low_risk_drawdown > 0.0 || self.high_risk_drawdown > 0.0 {
            return Err(RegimeError::ConfigError(
                "drawdown limits must be <= 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Volatility thresholds computed once over the full series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityThresholds {
    pub low: f64,
    pub high: f64,
}

impl VolatilityThresholds {
    /// Compute thresholds from every volatility value in the series.
    pub fn from_series(series: &ObservationSeries, config: &RuleConfig) -> Result<Self> {
        let vols = series.volatilities();
        let low = quantile(&vols, config.low_vol_quantile).ok_or(RegimeError::NoData)?;
        let high = quantile(&vols, config.high_vol_quantile).ok_or(RegimeError::NoData)?;
        Ok(Self { low, high })
    }

    /// Bucket a volatility value; a value equal to a threshold falls in the upper bucket.
    pub fn vol_state(&self, volatility: f64) -> VolState {
        if volatility < self.low {
            VolState::Low
        } else if volatility < self.high {
            VolState::Medium
        } else {
            VolState::High
        }
    }
}

/// Risk regime for one observation.
pub fn risk_regime(vol_state: VolState, drawdown: f64, config: &RuleConfig) -> RiskRegime {
    match vol_state {
        VolState::Low if drawdown > config.low_risk_drawdown => RiskRegime::LowRisk,
        VolState::High if drawdown < config.high_risk_drawdown => RiskRegime::HighRisk,
        _ => RiskRegime::MediumRisk,
    }
}

/// Classified observation, one row of the risk regimes table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeRecord {
    pub date: NaiveDate,
    pub close: f64,
    pub returns: f64,
    pub volatility: f64,
    pub drawdown: f64,
    pub vol_state: VolState,
    pub risk_regime: RiskRegime,
    pub risk_signal: RiskSignal,
}

/// Output of the rule classifier.
#[derive(Debug, Clone, Serialize)]
pub struct RuleClassification {
    pub thresholds: VolatilityThresholds,
    pub records: Vec<RegimeRecord>,
}

impl RuleClassification {
    /// Signal sequence aligned with the observation series.
    pub fn signals(&self) -> Vec<RiskSignal> {
        self.records.iter().map(|r| r.risk_signal).collect()
    }

    /// Count of observations per signal.
    pub fn signal_counts(&self) -> [(RiskSignal, usize); 3] {
        RiskSignal::ALL.map(|s| (s, self.records.iter().filter(|r| r.risk_signal == s).count()))
    }
}

/// Memoryless threshold classifier.
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    config: RuleConfig,
}

impl RuleClassifier {
    /// Create a new classifier.
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// Classify every observation of the series.
    pub fn classify(&self, series: &ObservationSeries) -> Result<RuleClassification> {
        self.config.validate()?;
        let thresholds = VolatilityThresholds::from_series(series, &self.config)?;

        info!(
            "Volatility thresholds: low={:.4} high={:.4} (full-sample quantiles {}/{})",
            thresholds.low,
            thresholds.high,
            self.config.low_vol_quantile,
            self.config.high_vol_quantile
        );

        let records = series
            .iter()
            .map(|obs| {
                let vol_state = thresholds.vol_state(obs.volatility);
                let risk_regime = risk_regime(vol_state, obs.drawdown, &self.config);
                RegimeRecord {
                    date: obs.date,
                    close: obs.close,
                    returns: obs.returns,
                    volatility: obs.volatility,
                    drawdown: obs.drawdown,
                    vol_state,
                    risk_regime,
                    risk_signal: risk_regime.signal(),
                }
            })
            .collect();

        Ok(RuleClassification {
            thresholds,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Observation;

    fn series_from(values: &[(f64, f64)]) -> ObservationSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let obs = values
            .iter()
            .enumerate()
            .map(|(i, &(volatility, drawdown))| Observation {
                date: start + chrono::Duration::days(i as i64),
                close: 100.0,
                returns: 0.0,
                volatility,
                drawdown,
            })
            .collect();
        ObservationSeries::new(obs).unwrap()
    }

    #[test]
    fn test_signal_mapping_is_total() {
        assert_eq!(RiskRegime::LowRisk.signal(), RiskSignal::RiskOn);
        assert_eq!(RiskRegime::MediumRisk.signal(), RiskSignal::Neutral);
        assert_eq!(RiskRegime::HighRisk.signal(), RiskSignal::RiskOff);
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(RiskSignal::RiskOn.to_string(), "RISK-ON");
        assert_eq!(RiskSignal::RiskOff.to_string(), "RISK-OFF");
        assert_eq!(VolState::Medium.to_string(), "Medium Volatility");
        assert_eq!(RiskRegime::HighRisk.to_string(), "High Risk");
        assert_eq!(RiskSignal::parse("risk-off"), Some(RiskSignal::RiskOff));
        assert_eq!(RiskSignal::parse("maybe"), None);
    }

    #[test]
    fn test_threshold_boundaries() {
        let thresholds = VolatilityThresholds { low: 0.1, high: 0.2 };
        assert_eq!(thresholds.vol_state(0.0999), VolState::Low);
        assert_eq!(thresholds.vol_state(0.1), VolState::Medium);
        assert_eq!(thresholds.vol_state(0.1999), VolState::Medium);
        assert_eq!(thresholds.vol_state(0.2), VolState::High);
    }

    #[test]
    fn test_risk_regime_rules() {
        let config = RuleConfig::default();
        assert_eq!(risk_regime(VolState::Low, -0.01, &config), RiskRegime::LowRisk);
        assert_eq!(risk_regime(VolState::Low, -0.05, &config), RiskRegime::MediumRisk);
        assert_eq!(risk_regime(VolState::Medium, 0.0, &config), RiskRegime::MediumRisk);
        assert_eq!(risk_regime(VolState::High, -0.15, &config), RiskRegime::MediumRisk);
        assert_eq!(risk_regime(VolState::High, -0.2, &config), RiskRegime::HighRisk);
        assert_eq!(risk_regime(VolState::Medium, -0.5, &config), RiskRegime::MediumRisk);
    }

    #[test]
    fn test_classify_uses_full_sample_thresholds() {
        let series = series_from(&[
            (0.10, 0.0),
            (0.20, -0.02),
            (0.30, -0.10),
            (0.40, -0.20),
            (0.50, -0.30),
            (0.60, -0.01),
        ]);

        let result = RuleClassifier::new(RuleConfig::default())
            .classify(&series)
            .unwrap();

        // sorted vols, positions 0.33*5 = 1.65 and 0.66*5 = 3.3
        assert!((result.thresholds.low - 0.265).abs() < 1e-12);
        assert!((result.thresholds.high - 0.43).abs() < 1e-12);
        assert!(result.thresholds.low <= result.thresholds.high);

        let signals = result.signals();
        assert_eq!(
            signals,
            vec![
                RiskSignal::RiskOn,
                RiskSignal::RiskOn,
                RiskSignal::Neutral,
                RiskSignal::Neutral,
                RiskSignal::RiskOff,
                RiskSignal::Neutral,
            ]
        );
        assert_eq!(result.records[4].vol_state, VolState::High);
        assert_eq!(result.records[4].risk_regime, RiskRegime::HighRisk);

        let counts = result.signal_counts();
        assert_eq!(counts[0], (RiskSignal::RiskOn, 2));
        assert_eq!(counts[1], (RiskSignal::Neutral, 3));
        assert_eq!(counts[2], (RiskSignal::RiskOff, 1));
    }

    #[test]
    fn test_constant_volatility_is_all_high() {
        let series = series_from(&[(0.2, 0.0), (0.2, -0.01), (0.2, -0.3)]);
        let result = RuleClassifier::new(RuleConfig::default())
            .classify(&series)
            .unwrap();
        assert!(result.records.iter().all(|r| r.vol_state == VolState::High));
        assert_eq!(result.records[2].risk_signal, RiskSignal::RiskOff);
    }

    #[test]
    fn test_invalid_config() {
        let config = RuleConfig {
            low_vol_quantile: 0.8,
            high_vol_quantile: 0.2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
