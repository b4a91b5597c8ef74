//! Quantiles and robust outlier thresholds (MAD, IQR).

/// Linear-interpolation quantile over `samples` at `q` in `[0, 1]`.
///
/// `samples` need not be sorted; this function clones and sorts internally.
/// Returns 0.0 for an empty slice.
pub fn quantile(samples: &[f64], q: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    quantile_sorted(&sorted, q)
}

/// Same as [`quantile`] but assumes `sorted` is already sorted ascending.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 || q <= 0.0 {
        return sorted[0];
    }
    if q >= 1.0 {
        return sorted[sorted.len() - 1];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Median absolute deviation from the median.
pub fn mad(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let med = quantile(samples, 0.5);
    let deviations: Vec<f64> = samples.iter().map(|v| (v - med).abs()).collect();
    quantile(&deviations, 0.5)
}

/// Robust z-score of `x` against `history` via the MAD estimator.
///
/// Returns 0.0 when the MAD is 0 (degenerate / constant history) rather than
/// dividing by zero.
pub fn robust_z_score(x: f64, history: &[f64]) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let med = quantile(history, 0.5);
    let m = mad(history);
    if m == 0.0 {
        return 0.0;
    }
    0.6745 * (x - med) / m
}

/// Tukey IQR fence `[Q1 - k*IQR, Q3 + k*IQR]`.
pub fn iqr_bounds(samples: &[f64], k: f64) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let q1 = quantile(samples, 0.25);
    let q3 = quantile(samples, 0.75);
    let iqr = q3 - q1;
    (q1 - k * iqr, q3 + k * iqr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_of_empty_is_zero() {
        assert_eq!(quantile(&[], 0.5), 0.0);
    }

    #[test]
    fn median_of_odd_sample() {
        assert_eq!(quantile(&[1.0, 3.0, 2.0], 0.5), 2.0);
    }

    #[test]
    fn median_interpolates_even_sample() {
        assert_eq!(quantile(&[1.0, 2.0, 3.0, 4.0], 0.5), 2.5);
    }

    #[test]
    fn quantile_clamps_at_extremes() {
        let xs = [5.0, 1.0, 3.0];
        assert_eq!(quantile(&xs, 0.0), 1.0);
        assert_eq!(quantile(&xs, 1.0), 5.0);
    }

    #[test]
    fn mad_of_constant_sample_is_zero() {
        assert_eq!(mad(&[4.0, 4.0, 4.0]), 0.0);
    }

    #[test]
    fn robust_z_score_is_zero_when_mad_is_zero() {
        assert_eq!(robust_z_score(100.0, &[4.0, 4.0, 4.0]), 0.0);
    }

    #[test]
    fn robust_z_score_flags_outlier() {
        let history: Vec<f64> = (0..20).map(|i| 10.0 + (i % 3) as f64 * 0.1).collect();
        let z = robust_z_score(50.0, &history);
        assert!(z.abs() > 3.5, "expected a large z-score, got {z}");
    }

    #[test]
    fn iqr_bounds_widen_with_larger_k() {
        let xs: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let (lo1, hi1) = iqr_bounds(&xs, 1.5);
        let (lo2, hi2) = iqr_bounds(&xs, 3.0);
        assert!(lo2 < lo1 && hi2 > hi1);
    }
}
