//! Population Stability Index and 1D Wasserstein distance for distributional
//! drift detection between a baseline and a current population.

use super::quantile::quantile;

const PSI_EPS: f64 = 1e-6;

/// Population Stability Index between `baseline` and `current`, using bin
/// edges derived from `baseline`'s quantiles. `n_bins` controls resolution.
///
/// Bin assignment: for a value `x`, the bin index is the largest `i` such
/// that `edge[i] <= x`, with the final bin closed on both sides (values
/// above the last edge fall into the last bin, not dropped).
pub fn population_stability_index(baseline: &[f64], current: &[f64], n_bins: usize) -> f64 {
    if baseline.is_empty() || current.is_empty() || n_bins == 0 {
        return 0.0;
    }

    let mut edges: Vec<f64> = (0..=n_bins)
        .map(|i| quantile(baseline, i as f64 / n_bins as f64))
        .collect();
    edges.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);

    if edges.len() < 2 {
        return 0.0;
    }

    let n_real_bins = edges.len() - 1;
    let base_counts = bin_counts(baseline, &edges, n_real_bins);
    let cur_counts = bin_counts(current, &edges, n_real_bins);

    let base_total = baseline.len() as f64;
    let cur_total = current.len() as f64;

    let mut psi = 0.0;
    for i in 0..n_real_bins {
        let p_b = (base_counts[i] as f64 / base_total).max(PSI_EPS);
        let p_c = (cur_counts[i] as f64 / cur_total).max(PSI_EPS);
        psi += (p_c - p_b) * (p_c / p_b).ln();
    }
    psi
}

fn bin_counts(values: &[f64], edges: &[f64], n_bins: usize) -> Vec<usize> {
    let mut counts = vec![0usize; n_bins];
    for &v in values {
        let mut idx = 0usize;
        for (i, &e) in edges.iter().enumerate() {
            if e <= v {
                idx = i;
            } else {
                break;
            }
        }
        let bin = idx.min(n_bins - 1);
        counts[bin] += 1;
    }
    counts
}

/// Qualitative severity band for a PSI value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftSeverity {
    None,
    Moderate,
    Severe,
}

impl DriftSeverity {
    pub fn from_psi(psi: f64) -> Self {
        if psi >= 0.35 {
            DriftSeverity::Severe
        } else if psi >= 0.2 {
            DriftSeverity::Moderate
        } else {
            DriftSeverity::None
        }
    }
}

/// 1D Wasserstein (earth mover's) distance between two samples of possibly
/// unequal size, approximated by resampling both to a common grid of `n =
/// min(len_a, len_b)` order-statistics positions.
pub fn wasserstein_1d(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut sorted_a = a.to_vec();
    let mut sorted_b = b.to_vec();
    sorted_a.sort_by(|x, y| x.partial_cmp(y).unwrap());
    sorted_b.sort_by(|x, y| x.partial_cmp(y).unwrap());

    let n_a = sorted_a.len();
    let n_b = sorted_b.len();
    let n = n_a.min(n_b);
    if n == 0 {
        return 0.0;
    }

    let mut total = 0.0;
    for i in 0..n {
        let ia = (i * n_a) / n;
        let ib = (i * n_b) / n;
        total += (sorted_a[ia] - sorted_b[ib]).abs();
    }
    total / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psi_of_identical_distributions_is_near_zero() {
        let xs: Vec<f64> = (0..200).map(|i| (i % 37) as f64).collect();
        let psi = population_stability_index(&xs, &xs, 10);
        assert!(psi.abs() < 1e-6, "expected ~0, got {psi}");
        assert_eq!(DriftSeverity::from_psi(psi), DriftSeverity::None);
    }

    #[test]
    fn psi_flags_shifted_distribution() {
        let baseline: Vec<f64> = (0..200).map(|i| (i % 50) as f64).collect();
        let current: Vec<f64> = (0..200).map(|i| 100.0 + (i % 50) as f64).collect();
        let psi = population_stability_index(&baseline, &current, 10);
        assert!(psi > 0.35, "expected severe drift, got {psi}");
        assert_eq!(DriftSeverity::from_psi(psi), DriftSeverity::Severe);
    }

    #[test]
    fn wasserstein_of_identical_samples_is_zero() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(wasserstein_1d(&xs, &xs), 0.0);
    }

    #[test]
    fn wasserstein_of_empty_is_zero() {
        assert_eq!(wasserstein_1d(&[], &[1.0]), 0.0);
    }

    #[test]
    fn wasserstein_grows_with_shift_distance() {
        let a = [0.0, 1.0, 2.0, 3.0, 4.0];
        let b_near: Vec<f64> = a.iter().map(|v| v + 1.0).collect();
        let b_far: Vec<f64> = a.iter().map(|v| v + 10.0).collect();
        assert!(wasserstein_1d(&a, &b_near) < wasserstein_1d(&a, &b_far));
    }
}
