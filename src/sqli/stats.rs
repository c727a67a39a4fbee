// src/sqli/stats.rs
//! Timing statistics used to confirm time-based injection

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZTest {
    pub z: f64,
    /// One-sided p-value, P(Z >= z)
    pub p: f64,
}

/// z reported when the deltas are perfectly consistent and positive
pub const Z_SENTINEL: f64 = 1e9;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator)
pub fn stddev(values: &[f64]) -> f64 {
    if values.len() <= 1 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (values.len() - 1) as f64;
    var.max(0.0).sqrt()
}

/// Standard normal CDF via the Abramowitz and Stegun 7.1.26 erf approximation
pub fn norm_cdf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let ax = x.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + P * ax);
    let y = 1.0 - ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t * (-ax * ax).exp();
    0.5 * (1.0 + sign * y)
}

/// Paired z-test over `injected - baseline` differences.
///
/// With one sample or none there is no evidence either way: `{z: 0, p: 1}`.
pub fn paired_z_test_p_value(diffs: &[f64]) -> ZTest {
    let n = diffs.len();
    if n <= 1 {
        return ZTest { z: 0.0, p: 1.0 };
    }
    let m = mean(diffs);
    let se = stddev(diffs) / (n as f64).sqrt();
    let z = if se > 1e-9 {
        m / se
    } else if m > 0.0 {
        Z_SENTINEL
    } else {
        0.0
    };
    ZTest {
        z,
        p: 1.0 - norm_cdf(z),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_samples() {
        assert_eq!(paired_z_test_p_value(&[]), ZTest { z: 0.0, p: 1.0 });
        assert_eq!(paired_z_test_p_value(&[3000.0]), ZTest { z: 0.0, p: 1.0 });
    }

    #[test]
    fn test_mean_and_stddev() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&v) - 5.0).abs() < 1e-12);
        // sample stddev of this classic set is sqrt(32/7)
        assert!((stddev(&v) - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(stddev(&[1.0]), 0.0);
    }

    #[test]
    fn test_norm_cdf() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((norm_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((norm_cdf(-1.96) - 0.025).abs() < 1e-3);
    }

    #[test]
    fn test_consistent_slowdown_is_significant() {
        let result = paired_z_test_p_value(&[3090.0, 3105.0, 3098.0]);
        assert!(result.z > 100.0);
        assert!(result.p <= 0.05);
    }

    #[test]
    fn test_identical_deltas_use_sentinel() {
        let result = paired_z_test_p_value(&[3100.0, 3100.0, 3100.0]);
        assert_eq!(result.z, Z_SENTINEL);
        assert!(result.p < 1e-9);

        let flat = paired_z_test_p_value(&[0.0, 0.0, 0.0]);
        assert_eq!(flat.z, 0.0);
        assert!((flat.p - 0.5).abs() < 1e-7);
    }

    #[test]
    fn test_noise_is_not_significant() {
        let result = paired_z_test_p_value(&[40.0, -35.0, 10.0, -20.0]);
        assert!(result.p > 0.05);
    }
}
