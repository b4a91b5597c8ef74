//! Benjamini-Hochberg false discovery rate correction.

/// One multiple-testing-corrected p-value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BhResult {
    pub p_value: f64,
    pub q_value: f64,
    pub significant: bool,
}

/// Benjamini-Hochberg step-up procedure. `p_values` need not be sorted; the
/// returned vector preserves the input order. `alpha` is the target false
/// discovery rate.
pub fn benjamini_hochberg(p_values: &[f64], alpha: f64) -> Vec<BhResult> {
    let m = p_values.len();
    if m == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&i, &j| p_values[i].partial_cmp(&p_values[j]).unwrap());

    let mut q_by_rank = vec![0.0; m];
    let mut running_min = f64::INFINITY;
    for rank in (0..m).rev() {
        let idx = order[rank];
        let raw_q = p_values[idx] * m as f64 / (rank + 1) as f64;
        running_min = running_min.min(raw_q).min(1.0);
        q_by_rank[rank] = running_min;
    }

    let mut q_values = vec![0.0; m];
    for (rank, &idx) in order.iter().enumerate() {
        q_values[idx] = q_by_rank[rank];
    }

    (0..m)
        .map(|i| BhResult {
            p_value: p_values[i],
            q_value: q_values[i],
            significant: q_values[i] <= alpha,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_returns_empty() {
        assert!(benjamini_hochberg(&[], 0.05).is_empty());
    }

    #[test]
    fn q_values_are_monotonic_by_ascending_p_value() {
        let p = [0.001, 0.2, 0.01, 0.5, 0.04];
        let results = benjamini_hochberg(&p, 0.05);
        let mut by_p: Vec<&BhResult> = results.iter().collect();
        by_p.sort_by(|a, b| a.p_value.partial_cmp(&b.p_value).unwrap());
        for window in by_p.windows(2) {
            assert!(
                window[0].q_value <= window[1].q_value,
                "q-values must be non-decreasing in p-value order"
            );
        }
    }

    #[test]
    fn smallest_p_value_is_flagged_significant() {
        let p = [0.001, 0.8, 0.9, 0.95];
        let results = benjamini_hochberg(&p, 0.05);
        assert!(results[0].significant);
        assert!(!results[3].significant);
    }

    #[test]
    fn single_p_value_q_equals_p() {
        let results = benjamini_hochberg(&[0.03], 0.05);
        assert!((results[0].q_value - 0.03).abs() < 1e-12);
    }
}
