//! Gaussian hidden Markov model for unsupervised regime detection.
//!
//! Fits multivariate Gaussian emissions with full covariance by Baum-Welch
//! EM from a seeded k-means initialization, then decodes the most likely
//! state path with Viterbi. Covariances are kept positive definite by
//! flooring their eigenvalues at `min_covar`.
//!
//! Hidden states are opaque [`StateId`]s; their meaning comes only from the
//! performance of the observations assigned to them.

mod algorithms;
mod gaussian;
mod model;

pub use algorithms::{backward, forward, log_sum_exp, posteriors, viterbi};
pub use gaussian::{regularize_covariance, MultivariateGaussian};
pub use model::{
    feature_vectors, GaussianHmm, HmmConfig, HmmFit, HmmParams, StateDiagnostics, StateId,
};
