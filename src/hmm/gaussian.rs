//! Multivariate Gaussian emission density with full covariance.

use crate::error::{RegimeError, Result};
use nalgebra::{Cholesky, DMatrix, DVector, SymmetricEigen};
use std::f64::consts::PI;

/// Multivariate Gaussian with a cached Cholesky factor.
#[derive(Debug, Clone)]
pub struct MultivariateGaussian {
    mean: DVector<f64>,
    covariance: DMatrix<f64>,
    /// Lower Cholesky factor of `covariance`.
    chol_lower: DMatrix<f64>,
    /// `-0.5 * (d * ln(2pi) + ln|covariance|)`
    log_norm: f64,
}

impl MultivariateGaussian {
    /// Create a density; the covariance is regularized before factorization.
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>, min_covar: f64) -> Result<Self> {
        let d = mean.len();
        if covariance.nrows() != d || covariance.ncols() != d {
            return Err(RegimeError::ModelError(format!(
                "covariance shape {}x{} does not match mean dimension {}",
                covariance.nrows(),
                covariance.ncols(),
                d
            )));
        }
        if mean.iter().any(|v| !v.is_finite()) {
            return Err(RegimeError::ModelError("non-finite emission mean".to_string()));
        }

        let covariance = regularize_covariance(&covariance, min_covar)?;
        let chol_lower = Cholesky::new(covariance.clone())
            .ok_or_else(|| {
                RegimeError::ModelError("covariance is not positive definite".to_string())
            })?
            .l();

        let log_det: f64 = 2.0 * chol_lower.diagonal().iter().map(|v| v.ln()).sum::<f64>();
        let log_norm = -0.5 * (d as f64 * (2.0 * PI).ln() + log_det);

        Ok(Self {
            mean,
            covariance,
            chol_lower,
            log_norm,
        })
    }

    /// Weighted maximum-likelihood estimate from `rows`.
    ///
    /// Returns `None` when the total weight is too small to define a mean.
    pub fn from_weighted(
        rows: &[DVector<f64>],
        weights: &[f64],
        min_covar: f64,
    ) -> Option<Result<Self>> {
        let d = rows.first()?.len();
        let total: f64 = weights.iter().sum();
        if !(total > f64::MIN_POSITIVE) {
            return None;
        }

        let mut mean = DVector::zeros(d);
        for (row, &w) in rows.iter().zip(weights) {
            mean += row * w;
        }
        mean /= total;

        let mut covariance = DMatrix::zeros(d, d);
        for (row, &w) in rows.iter().zip(weights) {
            let diff = row - &mean;
            covariance += (&diff * diff.transpose()) * w;
        }
        covariance /= total;

        Some(Self::new(mean, covariance, min_covar))
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Log density at `x`.
    pub fn log_pdf(&self, x: &DVector<f64>) -> f64 {
        let diff = x - &self.mean;
        match self.chol_lower.solve_lower_triangular(&diff) {
            Some(z) => self.log_norm - 0.5 * z.norm_squared(),
            None => f64::NEG_INFINITY,
        }
    }
}

/// Symmetrize and floor every eigenvalue at `min_covar`.
pub fn regularize_covariance(covariance: &DMatrix<f64>, min_covar: f64) -> Result<DMatrix<f64>> {
    if covariance.iter().any(|v| !v.is_finite()) {
        return Err(RegimeError::ModelError(
            "non-finite covariance entries".to_string(),
        ));
    }

    let symmetric = (covariance + covariance.transpose()) * 0.5;
    let mut eigen = SymmetricEigen::new(symmetric);
    eigen.eigenvalues = eigen.eigenvalues.map(|v| v.max(min_covar));
    let floored = eigen.recompose();

    Ok((&floored + floored.transpose()) * 0.5)
}

/// Sample covariance (n - 1 denominator) of all rows, used to seed every state.
pub fn empirical_covariance(rows: &[DVector<f64>]) -> DMatrix<f64> {
    let d = rows.first().map_or(0, |r| r.len());
    let n = rows.len();
    if n < 2 {
        return DMatrix::zeros(d, d);
    }

    let mut mean = DVector::zeros(d);
    for row in rows {
        mean += row;
    }
    mean /= n as f64;

    let mut covariance = DMatrix::zeros(d, d);
    for row in rows {
        let diff = row - &mean;
        covariance += &diff * diff.transpose();
    }
    covariance / (n - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_normal_log_pdf() {
        let g = MultivariateGaussian::new(
            DVector::from_vec(vec![0.0, 0.0]),
            DMatrix::identity(2, 2),
            1e-6,
        )
        .unwrap();

        let at_mean = g.log_pdf(&DVector::from_vec(vec![0.0, 0.0]));
        assert!((at_mean + (2.0 * PI).ln()).abs() < 1e-12);

        let off = g.log_pdf(&DVector::from_vec(vec![1.0, 0.0]));
        assert!((at_mean - off - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_correlated_log_pdf_matches_closed_form() {
        let cov = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        let g = MultivariateGaussian::new(DVector::zeros(2), cov.clone(), 1e-6).unwrap();

        let x = DVector::from_vec(vec![0.3, -0.7]);
        let inv = cov.clone().try_inverse().unwrap();
        let mahalanobis = (x.transpose() * &inv * &x)[(0, 0)];
        let expected = -0.5 * (2.0 * (2.0 * PI).ln() + cov.determinant().ln() + mahalanobis);
        assert!((g.log_pdf(&x) - expected).abs() < 1e-10);
    }

    #[test]
    fn test_regularization_floors_eigenvalues() {
        let singular = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let fixed = regularize_covariance(&singular, 1e-3).unwrap();
        let eigen = SymmetricEigen::new(fixed.clone());
        assert!(eigen.eigenvalues.iter().all(|&v| v >= 1e-3 - 1e-12));
        assert!((fixed[(0, 1)] - fixed[(1, 0)]).abs() < 1e-15);

        let g = MultivariateGaussian::new(DVector::zeros(2), singular, 1e-3).unwrap();
        assert!(g.log_pdf(&DVector::from_vec(vec![0.1, -0.1])).is_finite());
    }

    #[test]
    fn test_weighted_estimate() {
        let rows = vec![
            DVector::from_vec(vec![1.0]),
            DVector::from_vec(vec![3.0]),
            DVector::from_vec(vec![100.0]),
        ];
        let g = MultivariateGaussian::from_weighted(&rows, &[1.0, 1.0, 0.0], 1e-6)
            .unwrap()
            .unwrap();
        assert!((g.mean()[0] - 2.0).abs() < 1e-12);
        assert!((g.covariance()[(0, 0)] - 1.0).abs() < 1e-12);

        assert!(MultivariateGaussian::from_weighted(&rows, &[0.0, 0.0, 0.0], 1e-6).is_none());
    }

    #[test]
    fn test_empirical_covariance() {
        let rows = vec![
            DVector::from_vec(vec![1.0, 2.0]),
            DVector::from_vec(vec![2.0, 4.0]),
            DVector::from_vec(vec![3.0, 6.0]),
        ];
        let cov = empirical_covariance(&rows);
        assert!((cov[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((cov[(0, 1)] - 2.0).abs() < 1e-12);
        assert!((cov[(1, 1)] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_mean_rejected() {
        let err = MultivariateGaussian::new(
            DVector::from_vec(vec![f64::NAN]),
            DMatrix::identity(1, 1),
            1e-3,
        );
        assert!(err.is_err());
    }
}
