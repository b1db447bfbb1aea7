//! Regime-conditional performance summaries.
//!
//! One implementation serves both rule signals (with hit ratio) and HMM
//! states (without). Each group's drawdown is measured on the equity curve
//! of its own returns taken in original time order, as if the group's days
//! were traded back to back.

use crate::error::{RegimeError, Result};
use crate::metrics::{
    annualized_return, annualized_volatility, hit_ratio, max_drawdown, mean, ratio_or_undefined,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Performance of all observations sharing one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord<L> {
    pub label: L,
    pub avg_daily_return: f64,
    pub annualized_return: f64,
    /// `None` with fewer than two observations.
    pub annualized_volatility: Option<f64>,
    /// `None` when volatility is zero or undefined.
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown: f64,
    /// Only present for signal summaries.
    pub hit_ratio: Option<f64>,
    pub num_days: usize,
}

/// Summarize `returns` grouped by the aligned `labels`, ordered by label.
pub fn summarize_by_label<L: Copy + Ord>(
    labels: &[L],
    returns: &[f64],
    include_hit_ratio: bool,
    periods_per_year: f64,
) -> Result<Vec<PerformanceRecord<L>>> {
    if labels.len() != returns.len() {
        return Err(RegimeError::InvalidInput(format!(
            "{} labels but {} returns",
            labels.len(),
            returns.len()
        )));
    }

    let mut groups: BTreeMap<L, Vec<f64>> = BTreeMap::new();
    for (&label, &r) in labels.iter().zip(returns) {
        groups.entry(label).or_default().push(r);
    }

    let records = groups
        .into_iter()
        .map(|(label, group)| summarize_group(label, &group, include_hit_ratio, periods_per_year))
        .collect::<Vec<_>>();

    debug!("Summarized {} label groups", records.len());
    Ok(records)
}

fn summarize_group<L>(
    label: L,
    returns: &[f64],
    include_hit_ratio: bool,
    periods_per_year: f64,
) -> PerformanceRecord<L> {
    let avg_daily_return = mean(returns).unwrap_or(0.0);
    let ann_return = annualized_return(returns, periods_per_year).unwrap_or(0.0);
    let ann_vol = annualized_volatility(returns, periods_per_year);

    PerformanceRecord {
        label,
        avg_daily_return,
        annualized_return: ann_return,
        annualized_volatility: ann_vol,
        sharpe_ratio: ann_vol.and_then(|v| ratio_or_undefined(ann_return, v)),
        max_drawdown: max_drawdown(returns),
        hit_ratio: if include_hit_ratio {
            hit_ratio(returns)
        } else {
            None
        },
        num_days: returns.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::sharpe_ratio;

    #[test]
    fn test_groups_in_time_order() {
        let labels = [1, 2, 1, 1, 2];
        let returns = [0.01, -0.02, -0.03, 0.02, 0.01];
        let summary = summarize_by_label(&labels, &returns, true, 252.0).unwrap();

        assert_eq!(summary.len(), 2);
        let first = &summary[0];
        assert_eq!(first.label, 1);
        assert_eq!(first.num_days, 3);
        assert!((first.avg_daily_return - 0.0).abs() < 1e-12);
        // equity 1.01, 0.9797 -> drawdown -0.03 from the first point
        assert!((first.max_drawdown - (-0.03)).abs() < 1e-12);
        assert!((first.hit_ratio.unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(
            first.sharpe_ratio,
            sharpe_ratio(&[0.01, -0.03, 0.02], 252.0)
        );

        let total_days: usize = summary.iter().map(|r| r.num_days).sum();
        assert_eq!(total_days, labels.len());
    }

    #[test]
    fn test_hit_ratio_omitted_for_states() {
        let summary = summarize_by_label(&[0, 0, 1], &[0.01, 0.02, -0.01], false, 252.0).unwrap();
        assert!(summary.iter().all(|r| r.hit_ratio.is_none()));
    }

    #[test]
    fn test_zero_volatility_sharpe_is_undefined() {
        let summary = summarize_by_label(&["x"; 4], &[0.25; 4], true, 252.0).unwrap();
        assert_eq!(summary[0].annualized_volatility, Some(0.0));
        assert_eq!(summary[0].sharpe_ratio, None);
        assert!((summary[0].annualized_return - 63.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_day_group() {
        let summary = summarize_by_label(&['a', 'b'], &[0.01, 0.02], true, 252.0).unwrap();
        assert_eq!(summary[0].annualized_volatility, None);
        assert_eq!(summary[0].sharpe_ratio, None);
        assert_eq!(summary[0].max_drawdown, 0.0);
    }

    #[test]
    fn test_length_mismatch() {
        let err = summarize_by_label(&[1, 2], &[0.01], true, 252.0).unwrap_err();
        assert!(matches!(err, RegimeError::InvalidInput(_)));
    }
}
