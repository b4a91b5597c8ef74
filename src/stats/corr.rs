//! Sample variance/stddev, Pearson correlation, Sharpe ratio and t-stat of
//! the mean. Sharpe generalizes `backtest::BacktestEngine::calculate_sharpe`.

/// Sample variance given a precomputed mean (Bessel-corrected, n-1 divisor).
/// Returns 0.0 for samples of length < 2.
pub fn sample_variance(samples: &[f64], mean: f64) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|v| (v - mean).powi(2)).sum();
    sum_sq / (samples.len() - 1) as f64
}

/// Sample standard deviation. Returns 0.0 for degenerate input.
pub fn sample_stddev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    sample_variance(samples, mean).sqrt()
}

/// Pearson correlation coefficient. Returns 0.0 when either series has zero
/// variance or the inputs are mismatched/degenerate, rather than producing
/// NaN from a zero denominator.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.len() < 2 {
        return 0.0;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..a.len() {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Annualized Sharpe ratio of a return series. `annualization` is the number
/// of periods per year (default 252 for both daily and weekly horizons, per
/// the source system this pipeline reimplements). Returns 0.0 when the
/// series has fewer than two points or zero variance.
pub fn sharpe(returns: &[f64], annualization: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let std_dev = sample_stddev(returns);
    if std_dev == 0.0 {
        return 0.0;
    }
    (mean / std_dev) * annualization.sqrt()
}

/// One-sample t-statistic of the mean against zero: `mean / (stddev/sqrt(n))`.
pub fn t_stat_of_mean(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let std_dev = sample_stddev(samples);
    if std_dev == 0.0 {
        return 0.0;
    }
    mean / (std_dev / (samples.len() as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stddev_of_single_point_is_zero() {
        assert_eq!(sample_stddev(&[1.0]), 0.0);
    }

    #[test]
    fn pearson_perfect_positive_correlation() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pearson_zero_variance_is_zero() {
        let a = [1.0, 1.0, 1.0];
        let b = [1.0, 2.0, 3.0];
        assert_eq!(pearson(&a, &b), 0.0);
    }

    #[test]
    fn sharpe_of_zero_variance_series_is_zero() {
        assert_eq!(sharpe(&[0.01, 0.01, 0.01], 252.0), 0.0);
    }

    #[test]
    fn sharpe_is_positive_for_consistently_positive_returns() {
        let returns = [0.01, 0.015, 0.008, 0.012, 0.02, 0.005];
        assert!(sharpe(&returns, 252.0) > 0.0);
    }

    #[test]
    fn t_stat_of_mean_scales_with_sample_size() {
        let small: Vec<f64> = vec![1.0, 1.1, 0.9, 1.05, 0.95];
        let large: Vec<f64> = small.iter().cloned().cycle().take(50).collect();
        assert!(t_stat_of_mean(&large) > t_stat_of_mean(&small));
    }
}
