//! Return and risk formulas shared by the feature pipeline, the regime
//! summaries and the strategy comparison.
//!
//! All functions work on plain slices of simple (not log) returns.

/// Trading days per year used for annualization.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator), `None` with fewer than two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Empirical quantile with linear interpolation between order statistics.
///
/// `q` is clamped to `[0, 1]`. Returns `None` for an empty slice.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Cumulative growth of one unit of capital: running product of `1 + r`.
pub fn equity_curve(returns: &[f64]) -> Vec<f64> {
    returns
        .iter()
        .scan(1.0, |equity, r| {
            *equity *= 1.0 + r;
            Some(*equity)
        })
        .collect()
}

/// Drawdown of each point from the running maximum of the series so far.
///
/// The running maximum starts at the first point, so the first drawdown is 0.
pub fn drawdown_series(curve: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    curve
        .iter()
        .map(|&value| {
            peak = peak.max(value);
            (value - peak) / peak
        })
        .collect()
}

/// Worst drawdown of the equity curve built from `returns`; 0 for an empty slice.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    drawdown_series(&equity_curve(returns))
        .into_iter()
        .fold(0.0, f64::min)
}

/// Annualized mean return (`mean * periods_per_year`).
pub fn annualized_return(returns: &[f64], periods_per_year: f64) -> Option<f64> {
    mean(returns).map(|m| m * periods_per_year)
}

/// Annualized volatility (`sample std * sqrt(periods_per_year)`).
pub fn annualized_volatility(returns: &[f64], periods_per_year: f64) -> Option<f64> {
    sample_std(returns).map(|s| s * periods_per_year.sqrt())
}

/// Annualized Sharpe ratio with a zero risk-free rate.
///
/// `None` marks an undefined ratio: volatility is exactly zero or cannot be
/// computed from fewer than two returns.
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> Option<f64> {
    let ann_return = annualized_return(returns, periods_per_year)?;
    let ann_vol = annualized_volatility(returns, periods_per_year)?;
    ratio_or_undefined(ann_return, ann_vol)
}

/// `numerator / volatility`, undefined when the volatility is zero or not finite.
pub(crate) fn ratio_or_undefined(numerator: f64, volatility: f64) -> Option<f64> {
    if volatility == 0.0 || !volatility.is_finite() {
        None
    } else {
        Some(numerator / volatility)
    }
}

/// Fraction of strictly positive returns.
pub fn hit_ratio(returns: &[f64]) -> Option<f64> {
    if returns.is_empty() {
        return None;
    }
    let hits = returns.iter().filter(|&&r| r > 0.0).count();
    Some(hits as f64 / returns.len() as f64)
}

/// Total compounded return of the series.
pub fn total_return(returns: &[f64]) -> f64 {
    equity_curve(returns).last().map(|e| e - 1.0).unwrap_or(0.0)
}
