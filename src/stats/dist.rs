//! Standard normal CDF via the Abramowitz & Stegun `erf` approximation
//! (formula 7.1.26). Accurate to |error| < 1.5e-7 for |x| <= 4, which is the
//! regime the significance job operates in.

const A1: f64 = 0.254829592;
const A2: f64 = -0.284496736;
const A3: f64 = 1.421413741;
const A4: f64 = -1.453152027;
const A5: f64 = 1.061405429;
const P: f64 = 0.3275911;

/// Abramowitz & Stegun 7.1.26 approximation of the error function.
pub fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

/// Standard normal cumulative distribution function.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Two-sided p-value for a standard-normal test statistic.
pub fn two_sided_p_from_z(z: f64) -> f64 {
    if z.is_infinite() {
        return 0.0;
    }
    2.0 * (1.0 - normal_cdf(z.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erf_is_odd_and_bounded() {
        assert!((erf(0.0)).abs() < 1e-12);
        assert!((erf(4.0) - 1.0).abs() < 1.5e-7);
        assert!((erf(-4.0) + 1.0).abs() < 1.5e-7);
    }

    #[test]
    fn normal_cdf_matches_known_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-9);
        // Phi(1.96) ~= 0.9750021
        assert!((normal_cdf(1.96) - 0.9750021).abs() < 1e-6);
    }

    #[test]
    fn two_sided_p_is_one_at_zero() {
        assert!((two_sided_p_from_z(0.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn two_sided_p_is_zero_at_infinity() {
        assert_eq!(two_sided_p_from_z(f64::INFINITY), 0.0);
    }
}
