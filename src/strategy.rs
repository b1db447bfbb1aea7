//! Exposure overlays and the strategy comparison backtest.
//!
//! Each strategy holds a fraction of the underlying on every day, chosen
//! from that day's label: `strategy_return_t = exposure(label_t) * return_t`.
//! Exposure is applied on the same day the label is observed, matching how
//! the regimes were computed (the label already uses that day's close).
//!
//! - Buy & Hold: always fully invested
//! - Rule-Based Regime: fixed map from [`RiskSignal`]
//! - HMM Regime: states ranked by Sharpe ratio onto [`ExposureTiers`]

use crate::error::{RegimeError, Result};
use crate::hmm::StateId;
use crate::metrics::{annualized_return, max_drawdown, sharpe_ratio, total_return};
use crate::performance::PerformanceRecord;
use crate::regime::RiskSignal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// Fraction of capital invested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureLevel {
    Full,
    Half,
    Flat,
}

impl ExposureLevel {
    pub fn weight(&self) -> f64 {
        match self {
            ExposureLevel::Full => 1.0,
            ExposureLevel::Half => 0.5,
            ExposureLevel::Flat => 0.0,
        }
    }
}

impl fmt::Display for ExposureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.weight())
    }
}

/// Exposure for a rule signal.
pub fn rule_exposure(signal: RiskSignal) -> ExposureLevel {
    match signal {
        RiskSignal::RiskOn => ExposureLevel::Full,
        RiskSignal::Neutral => ExposureLevel::Half,
        RiskSignal::RiskOff => ExposureLevel::Flat,
    }
}

/// Exposure levels assigned by rank, best Sharpe first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExposureTiers(Vec<ExposureLevel>);

impl Default for ExposureTiers {
    fn default() -> Self {
        Self(vec![
            ExposureLevel::Full,
            ExposureLevel::Half,
            ExposureLevel::Flat,
        ])
    }
}

impl ExposureTiers {
    pub fn new(levels: Vec<ExposureLevel>) -> Result<Self> {
        if levels.is_empty() {
            return Err(RegimeError::ConfigError(
                "at least one exposure tier is required".to_string(),
            ));
        }
        Ok(Self(levels))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn levels(&self) -> &[ExposureLevel] {
        &self.0
    }
}

/// Order states by Sharpe ratio descending; undefined Sharpe ranks last and
/// ties keep ascending state order.
pub fn rank_states_by_sharpe(summary: &[PerformanceRecord<StateId>]) -> Vec<StateId> {
    let mut ranked: Vec<&PerformanceRecord<StateId>> = summary.iter().collect();
    ranked.sort_by(|a, b| {
        let by_sharpe = match (a.sharpe_ratio, b.sharpe_ratio) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_sharpe.then(a.label.cmp(&b.label))
    });
    ranked.into_iter().map(|r| r.label).collect()
}

/// State to exposure map derived from a state summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateExposureMap {
    /// States best first.
    pub ranking: Vec<StateId>,
    pub exposures: BTreeMap<StateId, ExposureLevel>,
}

impl StateExposureMap {
    /// Rank the summarized states and assign tiers by rank position.
    ///
    /// Fails unless there are exactly as many states as tiers.
    pub fn from_summary(
        summary: &[PerformanceRecord<StateId>],
        tiers: &ExposureTiers,
    ) -> Result<Self> {
        if summary.len() != tiers.len() {
            return Err(RegimeError::StateCountMismatch {
                expected: tiers.len(),
                found: summary.len(),
            });
        }

        let ranking = rank_states_by_sharpe(summary);
        let exposures: BTreeMap<StateId, ExposureLevel> = ranking
            .iter()
            .copied()
            .zip(tiers.levels().iter().copied())
            .collect();

        for (state, level) in &exposures {
            info!("HMM state {} -> exposure {}", state, level);
        }

        Ok(Self { ranking, exposures })
    }

    pub fn exposure(&self, state: StateId) -> Result<ExposureLevel> {
        self.exposures.get(&state).copied().ok_or_else(|| {
            RegimeError::ModelError(format!("state {} has no exposure assigned", state))
        })
    }
}

/// Daily returns of every strategy, one row per observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyReturnRow {
    pub date: NaiveDate,
    pub returns: f64,
    pub bh_returns: f64,
    pub rule_strategy_returns: f64,
    pub hmm_strategy_returns: f64,
}

/// Headline statistics for one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub strategy: String,
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown: f64,
    pub total_return: f64,
    pub annualized_return: f64,
}

impl StrategyPerformance {
    pub fn from_returns(strategy: &str, returns: &[f64], periods_per_year: f64) -> Self {
        Self {
            strategy: strategy.to_string(),
            sharpe_ratio: sharpe_ratio(returns, periods_per_year),
            max_drawdown: max_drawdown(returns),
            total_return: total_return(returns),
            annualized_return: annualized_return(returns, periods_per_year).unwrap_or(0.0),
        }
    }
}

pub const BUY_AND_HOLD: &str = "Buy & Hold";
pub const RULE_STRATEGY: &str = "Rule-Based Regime";
pub const HMM_STRATEGY: &str = "HMM Regime";

/// Per-day returns and summary statistics for all strategies.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub rows: Vec<StrategyReturnRow>,
    pub performance: Vec<StrategyPerformance>,
}

impl BacktestReport {
    pub fn strategy(&self, name: &str) -> Option<&StrategyPerformance> {
        self.performance.iter().find(|p| p.strategy == name)
    }

    /// Growth of one unit for each strategy: (buy & hold, rule, hmm).
    pub fn equity_curves(&self) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let curve = |f: fn(&StrategyReturnRow) -> f64| {
            crate::metrics::equity_curve(&self.rows.iter().map(f).collect::<Vec<_>>())
        };
        (
            curve(|r| r.bh_returns),
            curve(|r| r.rule_strategy_returns),
            curve(|r| r.hmm_strategy_returns),
        )
    }
}

/// Apply both overlays to the aligned return series.
pub fn run_backtest(
    dates: &[NaiveDate],
    returns: &[f64],
    signals: &[RiskSignal],
    states: &[StateId],
    state_exposure: &StateExposureMap,
    periods_per_year: f64,
) -> Result<BacktestReport> {
    let n = returns.len();
    if dates.len() != n || signals.len() != n || states.len() != n {
        return Err(RegimeError::InvalidInput(format!(
            "misaligned backtest inputs: {} dates, {} returns, {} signals, {} states",
            dates.len(),
            n,
            signals.len(),
            states.len()
        )));
    }

    let rows = (0..n)
        .map(|t| {
            let hmm_weight = state_exposure.exposure(states[t])?.weight();
            Ok(StrategyReturnRow {
                date: dates[t],
                returns: returns[t],
                bh_returns: returns[t],
                rule_strategy_returns: rule_exposure(signals[t]).weight() * returns[t],
                hmm_strategy_returns: hmm_weight * returns[t],
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let column = |f: fn(&StrategyReturnRow) -> f64| rows.iter().map(f).collect::<Vec<_>>();
    let performance = vec![
        StrategyPerformance::from_returns(
            BUY_AND_HOLD,
            &column(|r| r.bh_returns),
            periods_per_year,
        ),
        StrategyPerformance::from_returns(
            RULE_STRATEGY,
            &column(|r| r.rule_strategy_returns),
            periods_per_year,
        ),
        StrategyPerformance::from_returns(
            HMM_STRATEGY,
            &column(|r| r.hmm_strategy_returns),
            periods_per_year,
        ),
    ];

    for p in &performance {
        info!(
            "{}: sharpe={} max_dd={:.2}% total={:.2}%",
            p.strategy,
            p.sharpe_ratio
                .map_or_else(|| "undefined".to_string(), |s| format!("{:.3}", s)),
            p.max_drawdown * 100.0,
            p.total_return * 100.0
        );
    }

    Ok(BacktestReport { rows, performance })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(state: usize, sharpe: Option<f64>) -> PerformanceRecord<StateId> {
        PerformanceRecord {
            label: StateId::new(state),
            avg_daily_return: 0.0,
            annualized_return: 0.0,
            annualized_volatility: Some(0.1),
            sharpe_ratio: sharpe,
            max_drawdown: 0.0,
            hit_ratio: None,
            num_days: 10,
        }
    }

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect()
    }

    #[test]
    fn test_rule_exposure_values() {
        assert_eq!(rule_exposure(RiskSignal::RiskOn).weight(), 1.0);
        assert_eq!(rule_exposure(RiskSignal::Neutral).weight(), 0.5);
        assert_eq!(rule_exposure(RiskSignal::RiskOff).weight(), 0.0);
    }

    #[test]
    fn test_ranking_by_sharpe() {
        let summary = vec![
            record(0, Some(0.2)),
            record(1, Some(-0.5)),
            record(2, Some(1.4)),
        ];
        let map = StateExposureMap::from_summary(&summary, &ExposureTiers::default()).unwrap();
        assert_eq!(
            map.ranking,
            vec![StateId::new(2), StateId::new(0), StateId::new(1)]
        );
        assert_eq!(map.exposure(StateId::new(2)).unwrap(), ExposureLevel::Full);
        assert_eq!(map.exposure(StateId::new(0)).unwrap(), ExposureLevel::Half);
        assert_eq!(map.exposure(StateId::new(1)).unwrap(), ExposureLevel::Flat);
    }

    #[test]
    fn test_undefined_sharpe_ranks_last() {
        let summary = vec![record(0, None), record(1, Some(-3.0)), record(2, Some(-3.0))];
        let ranking = rank_states_by_sharpe(&summary);
        assert_eq!(
            ranking,
            vec![StateId::new(1), StateId::new(2), StateId::new(0)]
        );
    }

    #[test]
    fn test_state_count_mismatch() {
        let summary = vec![record(0, Some(1.0)), record(1, Some(0.5))];
        let err = StateExposureMap::from_summary(&summary, &ExposureTiers::default()).unwrap_err();
        assert!(matches!(
            err,
            RegimeError::StateCountMismatch {
                expected: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn test_backtest_applies_exposures() {
        let summary = vec![
            record(0, Some(1.0)),
            record(1, Some(0.0)),
            record(2, Some(-1.0)),
        ];
        let map = StateExposureMap::from_summary(&summary, &ExposureTiers::default()).unwrap();

        let returns = [0.02, -0.01, 0.03, -0.04];
        let signals = [
            RiskSignal::RiskOn,
            RiskSignal::Neutral,
            RiskSignal::RiskOff,
            RiskSignal::RiskOn,
        ];
        let states = [
            StateId::new(2),
            StateId::new(0),
            StateId::new(1),
            StateId::new(0),
        ];

        let report = run_backtest(&dates(4), &returns, &signals, &states, &map, 252.0).unwrap();
        let rule: Vec<f64> = report.rows.iter().map(|r| r.rule_strategy_returns).collect();
        let hmm: Vec<f64> = report.rows.iter().map(|r| r.hmm_strategy_returns).collect();
        assert_eq!(rule, vec![0.02, -0.005, 0.0, -0.04]);
        assert_eq!(hmm, vec![0.0, -0.01, 0.015, -0.04]);

        let bh = report.strategy(BUY_AND_HOLD).unwrap();
        assert!((bh.total_return - (1.02 * 0.99 * 1.03 * 0.96 - 1.0)).abs() < 1e-12);
        assert_eq!(bh.max_drawdown, max_drawdown(&returns));
        assert_eq!(report.performance.len(), 3);

        let (bh_curve, _, _) = report.equity_curves();
        assert_eq!(bh_curve.len(), 4);
    }

    #[test]
    fn test_misaligned_inputs() {
        let tiers = ExposureTiers::new(vec![ExposureLevel::Full]).unwrap();
        let map = StateExposureMap::from_summary(&[record(0, Some(1.0))], &tiers).unwrap();
        let err = run_backtest(
            &dates(2),
            &[0.01],
            &[RiskSignal::RiskOn],
            &[StateId::new(0)],
            &map,
            252.0,
        )
        .unwrap_err();
        assert!(matches!(err, RegimeError::InvalidInput(_)));
    }
}
