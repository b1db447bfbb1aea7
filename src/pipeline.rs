//! End-to-end regime pipeline.
//!
//! ```text
//! bars -> features -> rule classifier ---> persistence / transitions / performance --+
//!                  \-> Gaussian HMM -----> persistence / transitions / state summary -+-> backtest
//! ```
//!
//! Every stage is a pure transform of the previous stage's output; the
//! result is an immutable [`EngineReport`].

use crate::analysis::{
    compute_persistence, compute_transition_matrix, regime_changes, summarize_persistence,
    PersistenceRecord, PersistenceSummary, TransitionMatrix,
};
use crate::error::{RegimeError, Result};
use crate::features::{FeatureConfig, FeaturePipeline, ObservationSeries};
use crate::hmm::{GaussianHmm, HmmConfig, HmmFit, StateDiagnostics, StateId};
use crate::performance::{summarize_by_label, PerformanceRecord};
use crate::regime::{RiskSignal, RuleClassification, RuleClassifier, RuleConfig};
use crate::strategy::{run_backtest, BacktestReport, ExposureTiers, StateExposureMap};
use crate::types::Bar;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Configuration of every pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub features: FeatureConfig,
    pub rules: RuleConfig,
    pub hmm: HmmConfig,
    pub tiers: ExposureTiers,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.features.validate()?;
        self.rules.validate()?;
        self.hmm.validate()?;
        if self.hmm.n_states != self.tiers.len() {
            return Err(RegimeError::ConfigError(format!(
                "HMM has {} states but {} exposure tiers are configured",
                self.hmm.n_states,
                self.tiers.len()
            )));
        }
        Ok(())
    }
}

/// Rule classifier output with its analyses.
#[derive(Debug, Clone, Serialize)]
pub struct RuleAnalysis {
    pub classification: RuleClassification,
    pub persistence: Vec<PersistenceRecord<RiskSignal>>,
    pub persistence_summary: Vec<PersistenceSummary<RiskSignal>>,
    pub transitions: TransitionMatrix<RiskSignal>,
    pub performance: Vec<PerformanceRecord<RiskSignal>>,
    pub changes: Vec<usize>,
}

/// HMM fit with its analyses.
#[derive(Debug, Clone)]
pub struct HmmAnalysis {
    pub fit: HmmFit,
    pub persistence: Vec<PersistenceRecord<StateId>>,
    pub persistence_summary: Vec<PersistenceSummary<StateId>>,
    pub transitions: TransitionMatrix<StateId>,
    pub state_summary: Vec<PerformanceRecord<StateId>>,
    pub exposure: StateExposureMap,
}

/// Everything a pipeline run produced.
#[derive(Debug, Clone)]
pub struct EngineReport {
    pub series: ObservationSeries,
    pub rules: RuleAnalysis,
    pub hmm: HmmAnalysis,
    pub backtest: BacktestReport,
}

impl EngineReport {
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_report(self)
    }
}

/// Serializable digest of a run, written as `report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub num_observations: usize,
    pub vol_thresholds: (f64, f64),
    pub rule_performance: Vec<PerformanceRecord<RiskSignal>>,
    pub rule_persistence: Vec<PersistenceSummary<RiskSignal>>,
    pub rule_transitions: TransitionMatrix<RiskSignal>,
    pub hmm: HmmDiagnostics,
    pub strategies: Vec<crate::strategy::StrategyPerformance>,
}

/// Fit diagnostics of the HMM.
#[derive(Debug, Clone, Serialize)]
pub struct HmmDiagnostics {
    pub converged: bool,
    pub n_iter: usize,
    pub log_likelihood: f64,
    pub seed: u64,
    pub restart: usize,
    pub states: Vec<StateDiagnostics>,
    pub fitted_transition: Vec<Vec<f64>>,
    pub empirical_transitions: TransitionMatrix<StateId>,
    pub state_summary: Vec<PerformanceRecord<StateId>>,
    pub persistence: Vec<PersistenceSummary<StateId>>,
    pub exposure_ranking: Vec<StateId>,
}

impl RunSummary {
    fn from_report(report: &EngineReport) -> Self {
        let obs = report.series.as_slice();
        let fit = &report.hmm.fit;
        let thresholds = report.rules.classification.thresholds;

        Self {
            start_date: obs.first().map(|o| o.date).unwrap_or_default(),
            end_date: obs.last().map(|o| o.date).unwrap_or_default(),
            num_observations: obs.len(),
            vol_thresholds: (thresholds.low, thresholds.high),
            rule_performance: report.rules.performance.clone(),
            rule_persistence: report.rules.persistence_summary.clone(),
            rule_transitions: report.rules.transitions.clone(),
            hmm: HmmDiagnostics {
                converged: fit.converged,
                n_iter: fit.n_iter,
                log_likelihood: fit.log_likelihood,
                seed: fit.seed,
                restart: fit.restart,
                states: fit.state_diagnostics(),
                fitted_transition: fit.transition_matrix(),
                empirical_transitions: report.hmm.transitions.clone(),
                state_summary: report.hmm.state_summary.clone(),
                persistence: report.hmm.persistence_summary.clone(),
                exposure_ranking: report.hmm.exposure.ranking.clone(),
            },
            strategies: report.backtest.performance.clone(),
        }
    }
}

/// Runs the full regime detection and backtest pipeline.
#[derive(Debug, Clone)]
pub struct RegimeEngine {
    config: EngineConfig,
}

impl RegimeEngine {
    /// Create an engine; fails if any stage configuration is invalid.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run every stage over `bars`.
    pub fn run(&self, bars: &[Bar]) -> Result<EngineReport> {
        if bars.is_empty() {
            return Err(RegimeError::NoData);
        }

        let periods_per_year = self.config.features.periods_per_year;
        let series = FeaturePipeline::new(self.config.features.clone()).extract(bars)?;
        let dates = series.dates();
        let returns = series.returns();

        let rules = self.analyze_rules(&series, &returns, periods_per_year)?;
        let hmm = self.analyze_hmm(&series, &returns, periods_per_year)?;

        let backtest = run_backtest(
            &dates,
            &returns,
            &rules.classification.signals(),
            &hmm.fit.states,
            &hmm.exposure,
            periods_per_year,
        )?;

        info!(
            "Pipeline complete: {} observations from {} to {}",
            series.len(),
            dates.first().copied().unwrap_or_default(),
            dates.last().copied().unwrap_or_default()
        );

        Ok(EngineReport {
            series,
            rules,
            hmm,
            backtest,
        })
    }

    fn analyze_rules(
        &self,
        series: &ObservationSeries,
        returns: &[f64],
        periods_per_year: f64,
    ) -> Result<RuleAnalysis> {
        let classification = RuleClassifier::new(self.config.rules.clone()).classify(series)?;
        let signals = classification.signals();

        let persistence = compute_persistence(&signals);
        let persistence_summary = summarize_persistence(&persistence);
        let transitions = compute_transition_matrix(&signals);
        let performance = summarize_by_label(&signals, returns, true, periods_per_year)?;
        let changes = regime_changes(&signals);

        info!(
            "Rule classifier: {} regime blocks, {} changes",
            persistence.len(),
            changes.len()
        );

        Ok(RuleAnalysis {
            classification,
            persistence,
            persistence_summary,
            transitions,
            performance,
            changes,
        })
    }

    fn analyze_hmm(
        &self,
        series: &ObservationSeries,
        returns: &[f64],
        periods_per_year: f64,
    ) -> Result<HmmAnalysis> {
        let fit = GaussianHmm::new(self.config.hmm.clone())?.fit(series)?;
        if !fit.converged {
            warn!(
                "Proceeding with unconverged HMM after {} iterations",
                fit.n_iter
            );
        }

        let persistence = compute_persistence(&fit.states);
        let persistence_summary = summarize_persistence(&persistence);
        let transitions = compute_transition_matrix(&fit.states);
        let state_summary = summarize_by_label(&fit.states, returns, false, periods_per_year)?;

        // a state the Viterbi path never visits has no summary row
        let exposure = StateExposureMap::from_summary(&state_summary, &self.config.tiers)?;

        Ok(HmmAnalysis {
            fit,
            persistence,
            persistence_summary,
            transitions,
            state_summary,
            exposure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_count_must_match_states() {
        let config = EngineConfig {
            hmm: HmmConfig {
                n_states: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            RegimeEngine::new(config),
            Err(RegimeError::ConfigError(_))
        ));
    }

    #[test]
    fn test_empty_input_fails_fast() {
        let engine = RegimeEngine::new(EngineConfig::default()).unwrap();
        assert!(matches!(engine.run(&[]), Err(RegimeError::NoData)));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }
}
