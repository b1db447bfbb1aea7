//! Gaussian HMM fitted with Baum-Welch EM and decoded with Viterbi.

use super::algorithms::{
    backward, emission_log_likelihoods, expected_transitions, forward, log_matrix, log_vector,
    posteriors, viterbi,
};
use super::gaussian::{empirical_covariance, MultivariateGaussian};
use crate::error::{RegimeError, Result};
use crate::features::ObservationSeries;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Lloyd iterations used to place the initial means.
const KMEANS_MAX_ITER: usize = 100;

/// EM progress is logged every this many iterations.
const LOG_EVERY: usize = 50;

/// Configuration for the Gaussian HMM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HmmConfig {
    /// Number of hidden states.
    pub n_states: usize,
    /// Maximum EM iterations per restart.
    pub max_iter: usize,
    /// Stop when the log-likelihood improves by less than this.
    pub tol: f64,
    /// Floor for every covariance eigenvalue.
    pub min_covar: f64,
    /// Base seed; restart `r` uses `seed + r`.
    pub seed: u64,
    /// Independent random restarts.
    pub n_restarts: usize,
}

impl Default for HmmConfig {
    fn default() -> Self {
        Self {
            n_states: 3,
            max_iter: 1000,
            tol: 1e-2,
            min_covar: 1e-3,
            seed: 42,
            n_restarts: 1,
        }
    }
}

impl HmmConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if self.n_states == 0 {
            return Err(RegimeError::ConfigError(
                "n_states must be at least 1".to_string(),
            ));
        }
        if self.max_iter == 0 {
            return Err(RegimeError::ConfigError(
                "max_iter must be at least 1".to_string(),
            ));
        }
        if !self.tol.is_finite() || self.tol < 0.0 {
            return Err(RegimeError::ConfigError(format!(
                "tol must be non-negative, got {}",
                self.tol
            )));
        }
        if !self.min_covar.is_finite() || self.min_covar <= 0.0 {
            return Err(RegimeError::ConfigError(format!(
                "min_covar must be positive, got {}",
                self.min_covar
            )));
        }
        if self.n_restarts == 0 {
            return Err(RegimeError::ConfigError(
                "n_restarts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Seed used by restart `restart`.
    pub fn restart_seed(&self, restart: usize) -> u64 {
        self.seed.wrapping_add(restart as u64)
    }
}

/// Opaque hidden state index.
///
/// States carry no meaning until ranked by the performance of the
/// observations assigned to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(usize);

impl StateId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fitted HMM parameters.
#[derive(Debug, Clone)]
pub struct HmmParams {
    pub start_probs: DVector<f64>,
    /// Row-stochastic, indexed `(from, to)`.
    pub transition: DMatrix<f64>,
    pub emissions: Vec<MultivariateGaussian>,
}

impl HmmParams {
    pub fn n_states(&self) -> usize {
        self.emissions.len()
    }

    pub fn n_features(&self) -> usize {
        self.emissions.first().map_or(0, |e| e.dim())
    }

    fn log_emissions(&self, rows: &[DVector<f64>]) -> DMatrix<f64> {
        emission_log_likelihoods(rows, &self.emissions)
    }

    fn log_likelihood(&self, rows: &[DVector<f64>]) -> f64 {
        let (_, ll) = forward(
            &log_vector(&self.start_probs),
            &log_matrix(&self.transition),
            &self.log_emissions(rows),
        );
        ll
    }
}

/// Per-state emission parameters for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateDiagnostics {
    pub state: StateId,
    pub start_prob: f64,
    pub mean: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
}

/// Result of fitting and decoding.
#[derive(Debug, Clone)]
pub struct HmmFit {
    pub params: HmmParams,
    /// Viterbi path over the training sequence.
    pub states: Vec<StateId>,
    pub converged: bool,
    /// EM iterations run by the winning restart.
    pub n_iter: usize,
    /// Log-likelihood of the training sequence under `params`.
    pub log_likelihood: f64,
    /// Log-likelihood per EM iteration of the winning restart.
    pub history: Vec<f64>,
    pub restart: usize,
    pub seed: u64,
}

impl HmmFit {
    pub fn n_states(&self) -> usize {
        self.params.n_states()
    }

    /// Viterbi decoding of another series.
    pub fn decode(&self, series: &ObservationSeries) -> Vec<StateId> {
        decode_rows(&self.params, &feature_vectors(series))
    }

    /// Log-likelihood of a series under the fitted model.
    pub fn score(&self, series: &ObservationSeries) -> f64 {
        self.params.log_likelihood(&feature_vectors(series))
    }

    /// Posterior state probabilities, one row per observation.
    pub fn predict_proba(&self, series: &ObservationSeries) -> Vec<Vec<f64>> {
        let rows = feature_vectors(series);
        let log_start = log_vector(&self.params.start_probs);
        let log_trans = log_matrix(&self.params.transition);
        let log_emission = self.params.log_emissions(&rows);

        let (log_alpha, _) = forward(&log_start, &log_trans, &log_emission);
        let log_beta = backward(&log_trans, &log_emission);
        let gamma = posteriors(&log_alpha, &log_beta);

        gamma
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect()
    }

    /// Fitted transition matrix as nested rows.
    pub fn transition_matrix(&self) -> Vec<Vec<f64>> {
        self.params
            .transition
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect()
    }

    pub fn state_diagnostics(&self) -> Vec<StateDiagnostics> {
        self.params
            .emissions
            .iter()
            .enumerate()
            .map(|(k, e)| StateDiagnostics {
                state: StateId(k),
                start_prob: self.params.start_probs[k],
                mean: e.mean().iter().copied().collect(),
                covariance: e
                    .covariance()
                    .row_iter()
                    .map(|row| row.iter().copied().collect())
                    .collect(),
            })
            .collect()
    }

    /// Number of observations decoded into each state.
    pub fn state_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_states()];
        for s in &self.states {
            counts[s.0] += 1;
        }
        counts
    }
}

/// Feature vectors `[returns, volatility, drawdown]` of a series.
pub fn feature_vectors(series: &ObservationSeries) -> Vec<DVector<f64>> {
    series
        .feature_rows()
        .iter()
        .map(|row| DVector::from_iterator(row.len(), row.iter().copied()))
        .collect()
}

fn decode_rows(params: &HmmParams, rows: &[DVector<f64>]) -> Vec<StateId> {
    viterbi(
        &log_vector(&params.start_probs),
        &log_matrix(&params.transition),
        &params.log_emissions(rows),
    )
    .into_iter()
    .map(StateId)
    .collect()
}

/// One EM run before decoding.
struct EmRun {
    params: HmmParams,
    converged: bool,
    n_iter: usize,
    log_likelihood: f64,
    history: Vec<f64>,
}

/// Gaussian hidden Markov model with full covariance emissions.
#[derive(Debug, Clone)]
pub struct GaussianHmm {
    config: HmmConfig,
}

impl GaussianHmm {
    /// Create a new model.
    pub fn new(config: HmmConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &HmmConfig {
        &self.config
    }

    /// Fit on the series' features and decode the most likely state path.
    pub fn fit(&self, series: &ObservationSeries) -> Result<HmmFit> {
        self.fit_rows(&feature_vectors(series))
    }

    /// Fit on arbitrary feature vectors of equal dimension.
    pub fn fit_rows(&self, rows: &[DVector<f64>]) -> Result<HmmFit> {
        let k = self.config.n_states;
        if rows.is_empty() {
            return Err(RegimeError::NoData);
        }
        if rows.len() < k {
            return Err(RegimeError::InsufficientData {
                required: k,
                available: rows.len(),
            });
        }
        let dim = rows[0].len();
        if rows.iter().any(|r| r.len() != dim || r.iter().any(|v| !v.is_finite())) {
            return Err(RegimeError::InvalidInput(
                "HMM features must be finite vectors of equal dimension".to_string(),
            ));
        }

        info!(
            "Fitting Gaussian HMM: {} states, {} observations, {} features, {} restart(s)",
            k,
            rows.len(),
            dim,
            self.config.n_restarts
        );

        let runs: Vec<EmRun> = (0..self.config.n_restarts)
            .into_par_iter()
            .map(|r| self.fit_once(rows, self.config.restart_seed(r)))
            .collect::<Result<Vec<_>>>()?;

        let mut best = 0;
        for (r, run) in runs.iter().enumerate().skip(1) {
            debug!("Restart {} log-likelihood {:.4}", r, run.log_likelihood);
            if run.log_likelihood > runs[best].log_likelihood {
                best = r;
            }
        }

        let seed = self.config.restart_seed(best);
        let run = runs.into_iter().nth(best).ok_or_else(|| {
            RegimeError::ModelError("no EM restart produced a model".to_string())
        })?;

        if run.converged {
            info!(
                "HMM converged after {} iterations (log-likelihood {:.4}, restart {})",
                run.n_iter, run.log_likelihood, best
            );
        } else {
            warn!(
                "HMM did not converge within {} iterations (log-likelihood {:.4}); using best parameters",
                self.config.max_iter, run.log_likelihood
            );
        }

        let states = decode_rows(&run.params, rows);

        Ok(HmmFit {
            params: run.params,
            states,
            converged: run.converged,
            n_iter: run.n_iter,
            log_likelihood: run.log_likelihood,
            history: run.history,
            restart: best,
            seed,
        })
    }

    fn fit_once(&self, rows: &[DVector<f64>], seed: u64) -> Result<EmRun> {
        let k = self.config.n_states;
        let min_covar = self.config.min_covar;
        let mut rng = StdRng::seed_from_u64(seed);

        let means = kmeans(rows, k, &mut rng);
        let covariance = empirical_covariance(rows);
        let emissions = means
            .into_iter()
            .map(|m| MultivariateGaussian::new(m, covariance.clone(), min_covar))
            .collect::<Result<Vec<_>>>()?;

        let mut params = HmmParams {
            start_probs: DVector::from_element(k, 1.0 / k as f64),
            transition: DMatrix::from_element(k, k, 1.0 / k as f64),
            emissions,
        };

        let mut best: Option<(HmmParams, f64)> = None;
        let mut history = Vec::with_capacity(self.config.max_iter.min(1024));
        let mut converged = false;

        for iter in 0..self.config.max_iter {
            let log_start = log_vector(&params.start_probs);
            let log_trans = log_matrix(&params.transition);
            let log_emission = params.log_emissions(rows);

            let (log_alpha, ll) = forward(&log_start, &log_trans, &log_emission);
            if !usable_log_likelihood(ll, iter, best.is_some())? {
                break;
            }

            let improvement = history.last().map(|prev| ll - prev);
            history.push(ll);

            if best.as_ref().map_or(true, |(_, best_ll)| ll > *best_ll) {
                best = Some((params.clone(), ll));
            }

            if (iter + 1) % LOG_EVERY == 0 {
                debug!("EM iteration {}: log-likelihood = {:.4}", iter + 1, ll);
            }

            if improvement.is_some_and(|delta| delta < self.config.tol) {
                converged = true;
                break;
            }

            let log_beta = backward(&log_trans, &log_emission);
            let gamma = posteriors(&log_alpha, &log_beta);
            let xi = expected_transitions(&log_alpha, &log_beta, &log_trans, &log_emission, ll);

            match m_step(&params, rows, &gamma, &xi, min_covar) {
                Ok(next) => params = next,
                Err(e) => {
                    warn!("EM update failed at iteration {}: {}", iter + 1, e);
                    break;
                }
            }
        }

        let n_iter = history.len();
        let (params, log_likelihood) = best.ok_or_else(|| {
            RegimeError::ModelError("EM produced no evaluated parameters".to_string())
        })?;

        debug!(
            "EM seed {}: {} iterations, log-likelihood {:.4}, converged={}",
            seed, n_iter, log_likelihood, converged
        );

        Ok(EmRun {
            params,
            converged,
            n_iter,
            log_likelihood,
            history,
        })
    }
}

/// Whether EM can continue from a freshly evaluated log-likelihood.
///
/// A non-finite value ends EM with the best parameters seen so far; it is an
/// error only when no parameters have been evaluated yet.
fn usable_log_likelihood(ll: f64, iter: usize, have_best: bool) -> Result<bool> {
    if ll.is_finite() {
        return Ok(true);
    }
    if !have_best {
        return Err(RegimeError::ModelError(format!(
            "log-likelihood is non-finite at iteration {}",
            iter + 1
        )));
    }
    warn!(
        "Log-likelihood became non-finite at iteration {}; keeping best parameters",
        iter + 1
    );
    Ok(false)
}

/// Re-estimate parameters from posteriors. States with no posterior mass
/// keep their previous emission and transition row.
fn m_step(
    current: &HmmParams,
    rows: &[DVector<f64>],
    gamma: &DMatrix<f64>,
    xi: &DMatrix<f64>,
    min_covar: f64,
) -> Result<HmmParams> {
    let k = current.n_states();

    let start_probs = DVector::from_iterator(k, gamma.row(0).iter().copied());

    let mut transition = current.transition.clone();
    for i in 0..k {
        let row_sum = xi.row(i).sum();
        if row_sum > 0.0 {
            for j in 0..k {
                transition[(i, j)] = xi[(i, j)] / row_sum;
            }
        }
    }

    let mut emissions = Vec::with_capacity(k);
    for state in 0..k {
        let weights: Vec<f64> = gamma.column(state).iter().copied().collect();
        match MultivariateGaussian::from_weighted(rows, &weights, min_covar) {
            Some(fitted) => emissions.push(fitted?),
            None => emissions.push(current.emissions[state].clone()),
        }
    }

    Ok(HmmParams {
        start_probs,
        transition,
        emissions,
    })
}

/// Seeded k-means: `k` distinct rows as initial centers, then Lloyd iterations.
fn kmeans(rows: &[DVector<f64>], k: usize, rng: &mut StdRng) -> Vec<DVector<f64>> {
    let mut centers: Vec<DVector<f64>> = rand::seq::index::sample(rng, rows.len(), k)
        .into_iter()
        .map(|i| rows[i].clone())
        .collect();

    let mut assignment = vec![usize::MAX; rows.len()];

    for _ in 0..KMEANS_MAX_ITER {
        let mut changed = false;
        for (t, row) in rows.iter().enumerate() {
            let mut nearest = 0;
            let mut nearest_dist = f64::INFINITY;
            for (c, center) in centers.iter().enumerate() {
                let dist = (row - center).norm_squared();
                if dist < nearest_dist {
                    nearest_dist = dist;
                    nearest = c;
                }
            }
            if assignment[t] != nearest {
                assignment[t] = nearest;
                changed = true;
            }
        }

        if !changed {
            break;
        }

        for (c, center) in centers.iter_mut().enumerate() {
            let members: Vec<&DVector<f64>> = rows
                .iter()
                .zip(&assignment)
                .filter(|(_, a)| **a == c)
                .map(|(row, _)| row)
                .collect();
            if members.is_empty() {
                continue;
            }
            let mut sum = DVector::zeros(center.len());
            for row in &members {
                sum += *row;
            }
            *center = sum / members.len() as f64;
        }
    }

    centers
}
