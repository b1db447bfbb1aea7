//! Feature pipeline: daily closes to returns, rolling volatility and drawdown.
//!
//! # Features
//!
//! - **returns**: simple percentage change from the prior close
//! - **volatility**: sample standard deviation of the trailing `volatility_window`
//!   returns, annualized by `sqrt(periods_per_year)`
//! - **drawdown**: decline of the growth index `prod(1 + r)` from its running
//!   maximum; the growth index starts at the first return, not at 1.0
//!
//! Rows without a full volatility window (and the first row, which has no
//! return) are dropped, so the usable series starts at index `volatility_window`.
//!
//! # Example
//!
//! ```ignore
//! use regime_engine::features::{FeatureConfig, FeaturePipeline};
//!
//! let series = FeaturePipeline::new(FeatureConfig::default()).extract(&bars)?;
//! println!("{} usable observations", series.len());
//! ```

use crate::data::validate_series;
use crate::error::{RegimeError, Result};
use crate::metrics::{drawdown_series, sample_std, TRADING_DAYS_PER_YEAR};
use crate::types::{Bar, Observation};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Configuration for feature extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Number of trailing returns in the volatility window.
    pub volatility_window: usize,
    /// Periods per year used to annualize volatility.
    pub periods_per_year: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            volatility_window: 20,
            periods_per_year: TRADING_DAYS_PER_YEAR,
        }
    }
}

impl FeatureConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if self.volatility_window < 2 {
            return Err(RegimeError::ConfigError(format!(
                "volatility_window must be at least 2, got {}",
                self.volatility_window
            )));
        }
        if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
            return Err(RegimeError::ConfigError(format!(
                "periods_per_year must be positive, got {}",
                self.periods_per_year
            )));
        }
        Ok(())
    }

    /// Minimum number of bars needed to produce one observation.
    pub fn warmup_period(&self) -> usize {
        self.volatility_window + 1
    }
}

/// Ordered, gap-free sequence of observations with strictly increasing dates.
///
/// Only the feature pipeline constructs it, so every consumer can rely on
/// ordering and finiteness without re-checking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationSeries {
    observations: Vec<Observation>,
}

impl ObservationSeries {
    pub(crate) fn new(observations: Vec<Observation>) -> Result<Self> {
        if observations.is_empty() {
            return Err(RegimeError::NoData);
        }
        for pair in observations.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(RegimeError::InvalidInput(format!(
                    "Observation dates must be strictly increasing: {} follows {}",
                    pair[1].date, pair[0].date
                )));
            }
        }
        if let Some(bad) = observations.iter().find(|o| !o.is_finite()) {
            return Err(RegimeError::InvalidInput(format!(
                "Non-finite feature values at {}",
                bad.date
            )));
        }
        Ok(Self { observations })
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn as_slice(&self) -> &[Observation] {
        &self.observations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.observations.iter()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.observations.iter().map(|o| o.date).collect()
    }

    pub fn returns(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.returns).collect()
    }

    pub fn volatilities(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.volatility).collect()
    }

    /// Row-major feature matrix `[returns, volatility, drawdown]` for the HMM.
    pub fn feature_rows(&self) -> Vec<[f64; Observation::NUM_FEATURES]> {
        self.observations.iter().map(|o| o.features()).collect()
    }
}

impl<'a> IntoIterator for &'a ObservationSeries {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.observations.iter()
    }
}

/// Feature pipeline turning bars into an [`ObservationSeries`].
#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    config: FeatureConfig,
}

impl FeaturePipeline {
    /// Create a new pipeline.
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Compute observations from a validated bar series.
    pub fn extract(&self, bars: &[Bar]) -> Result<ObservationSeries> {
        self.config.validate()?;
        validate_series(bars)?;

        let warmup = self.config.warmup_period();
        if bars.len() < warmup {
            return Err(RegimeError::InsufficientData {
                required: warmup,
                available: bars.len(),
            });
        }

        // returns[i] belongs to bars[i + 1]
        let returns: Vec<f64> = bars
            .windows(2)
            .map(|w| w[1].close / w[0].close - 1.0)
            .collect();

        let growth: Vec<f64> = returns
            .iter()
            .scan(1.0, |g, r| {
                *g *= 1.0 + r;
                Some(*g)
            })
            .collect();
        let drawdowns = drawdown_series(&growth);

        let window = self.config.volatility_window;
        let annualizer = self.config.periods_per_year.sqrt();

        let mut observations = Vec::with_capacity(returns.len() + 1 - window);
        let mut dropped = 0;

        for end in (window - 1)..returns.len() {
            let volatility = match sample_std(&returns[end + 1 - window..=end]) {
                Some(std) => std * annualizer,
                None => continue,
            };

            let obs = Observation {
                date: bars[end + 1].date,
                close: bars[end + 1].close,
                returns: returns[end],
                volatility,
                drawdown: drawdowns[end],
            };

            if obs.is_finite() {
                observations.push(obs);
            } else {
                debug!("Dropping non-finite observation: {}", obs);
                dropped += 1;
            }
        }

        if dropped > 0 {
            warn!("Dropped {} observations with non-finite features", dropped);
        }

        info!(
            "Extracted {} observations from {} bars (window {})",
            observations.len(),
            bars.len(),
            window
        );

        ObservationSeries::new(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bars(closes: &[f64]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Bar::new(
                    start + chrono::Duration::days(i as i64),
                    c,
                    c * 1.01,
                    c * 0.99,
                    c,
                    1_000.0,
                )
            })
            .collect()
    }

    fn zigzag(n: usize) -> Vec<f64> {
        let mut price = 100.0;
        (0..n)
            .map(|i| {
                let step = if i % 3 == 0 { -0.012 } else { 0.008 };
                price *= 1.0 + step + (i as f64 * 0.37).sin() * 0.004;
                price
            })
            .collect()
    }

    #[test]
    fn test_usable_series_starts_at_window() {
        let bars = make_bars(&zigzag(60));
        let series = FeaturePipeline::new(FeatureConfig::default())
            .extract(&bars)
            .unwrap();

        assert_eq!(series.len(), 60 - 20);
        assert_eq!(series.as_slice()[0].date, bars[20].date);
        assert_eq!(series.as_slice()[0].close, bars[20].close);
    }

    #[test]
    fn test_returns_and_volatility_values() {
        let closes = zigzag(30);
        let bars = make_bars(&closes);
        let series = FeaturePipeline::new(FeatureConfig::default())
            .extract(&bars)
            .unwrap();

        let first = series.as_slice()[0];
        assert!((first.returns - (closes[20] / closes[19] - 1.0)).abs() < 1e-12);

        let window: Vec<f64> = (1..=20).map(|i| closes[i] / closes[i - 1] - 1.0).collect();
        let expected_vol = sample_std(&window).unwrap() * 252.0_f64.sqrt();
        assert!((first.volatility - expected_vol).abs() < 1e-12);
    }

    #[test]
    fn test_drawdown_non_positive_and_zero_at_peaks() {
        let bars = make_bars(&zigzag(120));
        let series = FeaturePipeline::new(FeatureConfig::default())
            .extract(&bars)
            .unwrap();

        let growth: Vec<f64> = bars
            .windows(2)
            .scan(1.0, |g, w| {
                *g *= 1.0 + (w[1].close / w[0].close - 1.0);
                Some(*g)
            })
            .collect();

        let mut running_max = growth[..19].iter().copied().fold(f64::NEG_INFINITY, f64::max);
        for (i, obs) in series.iter().enumerate() {
            assert!(obs.drawdown <= 0.0);
            let g = growth[i + 19];
            if g >= running_max {
                running_max = g;
                assert_eq!(obs.drawdown, 0.0);
            } else {
                assert!(obs.drawdown < 0.0);
            }
        }
    }

    #[test]
    fn test_rising_prices_have_zero_drawdown() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let series = FeaturePipeline::new(FeatureConfig::default())
            .extract(&make_bars(&closes))
            .unwrap();
        assert!(series.iter().all(|o| o.drawdown == 0.0));
    }

    #[test]
    fn test_insufficient_data() {
        let bars = make_bars(&zigzag(20));
        let err = FeaturePipeline::new(FeatureConfig::default())
            .extract(&bars)
            .unwrap_err();
        assert!(matches!(
            err,
            RegimeError::InsufficientData {
                required: 21,
                available: 20
            }
        ));
    }

    #[test]
    fn test_empty_input_is_no_data() {
        let err = FeaturePipeline::new(FeatureConfig::default())
            .extract(&[])
            .unwrap_err();
        assert!(matches!(err, RegimeError::NoData));
    }

    #[test]
    fn test_feature_rows() {
        let bars = make_bars(&zigzag(25));
        let series = FeaturePipeline::new(FeatureConfig::default())
            .extract(&bars)
            .unwrap();
        let rows = series.feature_rows();
        assert_eq!(rows.len(), series.len());
        assert_eq!(rows[0][0], series.as_slice()[0].returns);
        assert_eq!(rows[0][2], series.as_slice()[0].drawdown);
    }

    #[test]
    fn test_invalid_window_rejected() {
        let config = FeatureConfig {
            volatility_window: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
