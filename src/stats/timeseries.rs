//! EWMA and two-sided CUSUM change detectors over scalar time series.

/// Exponentially weighted moving average. `lambda` in `(0, 1]`. The first
/// output equals the first input (a "warm start" rather than seeding from 0).
pub fn ewma(series: &[f64], lambda: f64) -> Vec<f64> {
    if series.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(series.len());
    let mut prev = series[0];
    out.push(prev);
    for &x in &series[1..] {
        prev = lambda * x + (1.0 - lambda) * prev;
        out.push(prev);
    }
    out
}

/// One point of two-sided CUSUM state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CusumPoint {
    pub s_high: f64,
    pub s_low: f64,
    pub signal: bool,
}

/// Two-sided CUSUM against a fixed target `target_mean`, with slack `k` and
/// decision threshold `h`. A point signals when the upper statistic exceeds
/// `h` or the lower statistic's magnitude exceeds `h`.
pub fn cusum(series: &[f64], target_mean: f64, k: f64, h: f64) -> Vec<CusumPoint> {
    let mut out = Vec::with_capacity(series.len());
    let mut s_high = 0.0_f64;
    let mut s_low = 0.0_f64;
    for &x in series {
        s_high = (s_high + (x - target_mean - k)).max(0.0);
        s_low = (s_low + (x - target_mean + k)).min(0.0);
        let signal = s_high > h || s_low.abs() > h;
        out.push(CusumPoint {
            s_high,
            s_low,
            signal,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_of_empty_is_empty() {
        assert!(ewma(&[], 0.3).is_empty());
    }

    #[test]
    fn ewma_first_point_equals_input() {
        let out = ewma(&[5.0, 1.0, 1.0], 0.3);
        assert_eq!(out[0], 5.0);
    }

    #[test]
    fn ewma_converges_toward_constant_series() {
        let out = ewma(&[0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0], 0.3);
        assert!(out.last().unwrap() > &0.8);
    }

    #[test]
    fn cusum_does_not_signal_on_stable_series() {
        let series = vec![1.0; 20];
        let points = cusum(&series, 1.0, 0.02, 0.2);
        assert!(points.iter().all(|p| !p.signal));
    }

    #[test]
    fn cusum_signals_on_sustained_upward_shift() {
        let mut series = vec![1.0; 10];
        series.extend(vec![1.5; 10]);
        let points = cusum(&series, 1.0, 0.02, 0.2);
        assert!(points.iter().any(|p| p.signal));
    }
}
