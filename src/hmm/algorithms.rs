//! Log-space HMM recursions: forward, backward, posteriors, Viterbi.
//!
//! All matrices are indexed `(time, state)` except the transition matrix,
//! which is `(from, to)`. Inputs are log-probabilities; zero probabilities
//! are `-inf` and propagate without producing NaN.

use super::gaussian::MultivariateGaussian;
use nalgebra::{DMatrix, DVector};

/// `ln(sum(exp(values)))`, `-inf` when every value is `-inf`.
pub fn log_sum_exp<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64> + Clone,
{
    let max = values.clone().into_iter().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = values.into_iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Element-wise natural log, mapping 0 to `-inf`.
pub fn log_matrix(m: &DMatrix<f64>) -> DMatrix<f64> {
    m.map(|v| if v > 0.0 { v.ln() } else { f64::NEG_INFINITY })
}

pub fn log_vector(v: &DVector<f64>) -> DVector<f64> {
    v.map(|p| if p > 0.0 { p.ln() } else { f64::NEG_INFINITY })
}

/// Emission log-likelihood of every row under every state, `T x K`.
pub fn emission_log_likelihoods(
    rows: &[DVector<f64>],
    emissions: &[MultivariateGaussian],
) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), emissions.len(), |t, k| {
        emissions[k].log_pdf(&rows[t])
    })
}

/// Forward pass. Returns `log alpha` and the sequence log-likelihood.
pub fn forward(
    log_start: &DVector<f64>,
    log_trans: &DMatrix<f64>,
    log_emission: &DMatrix<f64>,
) -> (DMatrix<f64>, f64) {
    let (n_obs, n_states) = log_emission.shape();
    let mut log_alpha = DMatrix::from_element(n_obs, n_states, f64::NEG_INFINITY);
    if n_obs == 0 {
        return (log_alpha, f64::NEG_INFINITY);
    }

    for j in 0..n_states {
        log_alpha[(0, j)] = log_start[j] + log_emission[(0, j)];
    }

    for t in 1..n_obs {
        for j in 0..n_states {
            let incoming =
                log_sum_exp((0..n_states).map(|i| log_alpha[(t - 1, i)] + log_trans[(i, j)]));
            log_alpha[(t, j)] = incoming + log_emission[(t, j)];
        }
    }

    let log_likelihood = log_sum_exp((0..n_states).map(|j| log_alpha[(n_obs - 1, j)]));
    (log_alpha, log_likelihood)
}

/// Backward pass, `log beta` with the last row equal to 0.
pub fn backward(log_trans: &DMatrix<f64>, log_emission: &DMatrix<f64>) -> DMatrix<f64> {
    let (n_obs, n_states) = log_emission.shape();
    let mut log_beta = DMatrix::zeros(n_obs, n_states);

    for t in (0..n_obs.saturating_sub(1)).rev() {
        for i in 0..n_states {
            log_beta[(t, i)] = log_sum_exp(
                (0..n_states)
                    .map(|j| log_trans[(i, j)] + log_emission[(t + 1, j)] + log_beta[(t + 1, j)]),
            );
        }
    }

    log_beta
}

/// State posteriors `gamma[t, k] = P(state_t = k | observations)`.
pub fn posteriors(log_alpha: &DMatrix<f64>, log_beta: &DMatrix<f64>) -> DMatrix<f64> {
    let (n_obs, n_states) = log_alpha.shape();
    let mut gamma = DMatrix::zeros(n_obs, n_states);

    for t in 0..n_obs {
        let norm = log_sum_exp((0..n_states).map(|k| log_alpha[(t, k)] + log_beta[(t, k)]));
        for k in 0..n_states {
            let v = log_alpha[(t, k)] + log_beta[(t, k)] - norm;
            gamma[(t, k)] = if v.is_finite() { v.exp() } else { 0.0 };
        }
    }

    gamma
}

/// Expected transition counts summed over time, `K x K`.
pub fn expected_transitions(
    log_alpha: &DMatrix<f64>,
    log_beta: &DMatrix<f64>,
    log_trans: &DMatrix<f64>,
    log_emission: &DMatrix<f64>,
    log_likelihood: f64,
) -> DMatrix<f64> {
    let (n_obs, n_states) = log_emission.shape();
    let mut xi_sum = DMatrix::zeros(n_states, n_states);

    for t in 0..n_obs.saturating_sub(1) {
        for i in 0..n_states {
            for j in 0..n_states {
                let v = log_alpha[(t, i)]
                    + log_trans[(i, j)]
                    + log_emission[(t + 1, j)]
                    + log_beta[(t + 1, j)]
                    - log_likelihood;
                if v.is_finite() {
                    xi_sum[(i, j)] += v.exp();
                }
            }
        }
    }

    xi_sum
}

/// Most likely state path. Ties go to the lowest state index.
pub fn viterbi(
    log_start: &DVector<f64>,
    log_trans: &DMatrix<f64>,
    log_emission: &DMatrix<f64>,
) -> Vec<usize> {
    let (n_obs, n_states) = log_emission.shape();
    if n_obs == 0 || n_states == 0 {
        return Vec::new();
    }

    let mut delta = DMatrix::from_element(n_obs, n_states, f64::NEG_INFINITY);
    let mut backpointer = vec![vec![0usize; n_states]; n_obs];

    for j in 0..n_states {
        delta[(0, j)] = log_start[j] + log_emission[(0, j)];
    }

    for t in 1..n_obs {
        for j in 0..n_states {
            let mut best_score = delta[(t - 1, 0)] + log_trans[(0, j)];
            let mut best_state = 0;
            for i in 1..n_states {
                let score = delta[(t - 1, i)] + log_trans[(i, j)];
                if score > best_score {
                    best_score = score;
                    best_state = i;
                }
            }
            delta[(t, j)] = best_score + log_emission[(t, j)];
            backpointer[t][j] = best_state;
        }
    }

    let mut last = 0;
    for j in 1..n_states {
        if delta[(n_obs - 1, j)] > delta[(n_obs - 1, last)] {
            last = j;
        }
    }

    let mut path = vec![0; n_obs];
    path[n_obs - 1] = last;
    for t in (0..n_obs - 1).rev() {
        path[t] = backpointer[t + 1][path[t + 1]];
    }

    path
}
