//! Welch's unequal-variance t-test, generalized from the teacher's z-score
//! outlier check in `route_quality/baseline.rs` to a two-sample comparison.

use super::dist::two_sided_p_from_z;
use super::corr::sample_variance;

/// Result of a Welch two-sample t-test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchResult {
    pub t_stat: f64,
    pub df: f64,
    pub p_value: f64,
    pub mean_a: f64,
    pub mean_b: f64,
    pub effect_size: f64,
    pub n_a: usize,
    pub n_b: usize,
}

/// Welch's t-test between two independent samples, each requiring at least
/// two observations. The p-value uses the standard normal approximation to
/// the t distribution (valid for the moderate-to-large sample sizes this
/// pipeline deals in); see `stats::dist` for the approximation's accuracy.
///
/// Boundary semantics: when both standard errors are zero and the means
/// match, returns `t=0, p=1`; when the means differ but both standard errors
/// are zero, returns `t=±inf, p=0`.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<WelchResult> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }
    let n_a = a.len();
    let n_b = b.len();
    let mean_a = a.iter().sum::<f64>() / n_a as f64;
    let mean_b = b.iter().sum::<f64>() / n_b as f64;
    let var_a = sample_variance(a, mean_a);
    let var_b = sample_variance(b, mean_b);

    let se_a_sq = var_a / n_a as f64;
    let se_b_sq = var_b / n_b as f64;
    let se = (se_a_sq + se_b_sq).sqrt();

    let diff = mean_a - mean_b;

    let (t_stat, p_value) = if se == 0.0 {
        if diff == 0.0 {
            (0.0, 1.0)
        } else if diff > 0.0 {
            (f64::INFINITY, 0.0)
        } else {
            (f64::NEG_INFINITY, 0.0)
        }
    } else {
        let t = diff / se;
        (t, two_sided_p_from_z(t))
    };

    let df = if se_a_sq + se_b_sq == 0.0 {
        (n_a + n_b - 2) as f64
    } else {
        (se_a_sq + se_b_sq).powi(2)
            / ((se_a_sq.powi(2) / (n_a as f64 - 1.0)) + (se_b_sq.powi(2) / (n_b as f64 - 1.0)))
    };

    Some(WelchResult {
        t_stat,
        df,
        p_value,
        mean_a,
        mean_b,
        effect_size: diff,
        n_a,
        n_b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_few_observations_returns_none() {
        assert!(welch_t_test(&[1.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn identical_degenerate_samples_give_t_zero_p_one() {
        let r = welch_t_test(&[5.0, 5.0], &[5.0, 5.0]).unwrap();
        assert_eq!(r.t_stat, 0.0);
        assert_eq!(r.p_value, 1.0);
    }

    #[test]
    fn differing_degenerate_samples_give_infinite_t_zero_p() {
        let r = welch_t_test(&[5.0, 5.0], &[1.0, 1.0]).unwrap();
        assert!(r.t_stat.is_infinite() && r.t_stat > 0.0);
        assert_eq!(r.p_value, 0.0);
    }

    #[test]
    fn clearly_separated_samples_are_significant() {
        let a: Vec<f64> = (0..30).map(|i| 10.0 + (i % 5) as f64 * 0.01).collect();
        let b: Vec<f64> = (0..30).map(|i| 5.0 + (i % 5) as f64 * 0.01).collect();
        let r = welch_t_test(&a, &b).unwrap();
        assert!(r.p_value < 0.01, "expected small p, got {}", r.p_value);
        assert!(r.effect_size > 0.0);
    }

    #[test]
    fn overlapping_samples_are_not_significant() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [1.5, 2.5, 3.5, 4.5, 5.5];
        let r = welch_t_test(&a, &b).unwrap();
        assert!(r.p_value > 0.05);
    }
}
