//! Kolmogorov–Smirnov goodness-of-fit tests.
//!
//! [`one_sample_ks_test`] compares draws against a known CDF,
//! [`two_sample_ks_test`] compares two sets of draws. P-values use the
//! asymptotic Kolmogorov distribution (*Numerical Recipes*, Third Edition).

use crate::error::{Result, ShredderError};

/// Smallest sample size for which the asymptotic p-value is used.
pub const MIN_SAMPLE_SIZE: usize = 8;

/// Outcome of a KS test at significance `level`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestResult {
    pub is_rejected: bool,
    pub statistic: f64,
    pub p_value: f64,
    pub level: f64,
}

impl TestResult {
    fn new(statistic: f64, effective_n: f64, level: f64) -> Result<Self> {
        let p_value = qks(effective_n.sqrt() * statistic)?;
        Ok(Self {
            is_rejected: p_value < level,
            statistic,
            p_value,
            level,
        })
    }
}

/// Tests whether `sample` was drawn from the distribution with CDF `cdf`.
pub fn one_sample_ks_test<F>(sample: &[f64], cdf: F, level: f64) -> Result<TestResult>
where
    F: Fn(f64) -> f64,
{
    check_size(sample.len())?;
    let statistic = one_sample_statistic(sample, cdf)?;
    TestResult::new(statistic, sample.len() as f64, level)
}

/// Tests whether two samples come from the same distribution.
pub fn two_sample_ks_test(sample_1: &[f64], sample_2: &[f64], level: f64) -> Result<TestResult> {
    check_size(sample_1.len())?;
    check_size(sample_2.len())?;
    let statistic = two_sample_statistic(sample_1, sample_2)?;
    let (n1, n2) = (sample_1.len() as f64, sample_2.len() as f64);
    TestResult::new(statistic, n1 * n2 / (n1 + n2), level)
}

fn check_size(n: usize) -> Result<()> {
    if n < MIN_SAMPLE_SIZE {
        return Err(ShredderError::InvalidConfig(format!(
            "KS test needs at least {MIN_SAMPLE_SIZE} draws, got {n}"
        )));
    }
    Ok(())
}

fn sorted(sample: &[f64]) -> Result<Vec<f64>> {
    if sample.is_empty() {
        return Err(ShredderError::InvalidConfig("empty sample".to_string()));
    }
    if let Some(&x) = sample.iter().find(|x| x.is_nan()) {
        return Err(ShredderError::NonFinite {
            value: x,
            context: "KS test sample",
        });
    }
    let mut v = sample.to_vec();
    v.sort_unstable_by(f64::total_cmp);
    Ok(v)
}

fn one_sample_statistic<F: Fn(f64) -> f64>(sample: &[f64], cdf: F) -> Result<f64> {
    let xs = sorted(sample)?;
    let n = xs.len() as f64;
    Ok(xs.iter().enumerate().fold(0.0f64, |d, (i, &x)| {
        let f = cdf(x);
        d.max(f - i as f64 / n).max((i + 1) as f64 / n - f)
    }))
}

/// Largest distance between the two empirical CDFs.
fn two_sample_statistic(sample_1: &[f64], sample_2: &[f64]) -> Result<f64> {
    let (a, b) = (sorted(sample_1)?, sorted(sample_2)?);
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0, 0);
    let mut d = 0.0f64;
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / na - j as f64 / nb).abs());
    }
    Ok(d)
}

/// CDF of the Kolmogorov distribution.
fn pks(z: f64) -> Result<f64> {
    if !(z >= 0.0) {
        return Err(ShredderError::InvalidConfig(format!(
            "bad z for KS distribution function: {z}"
        )));
    }
    if z == 0.0 {
        return Ok(0.0);
    }
    if z < 1.18 {
        let y = (-1.233_700_550_136_169_7 / z.powi(2)).exp();
        return Ok(2.256_758_334_191_025
            * (-y.ln()).sqrt()
            * (y + y.powi(9) + y.powi(25) + y.powi(49)));
    }
    let x = (-2.0 * z.powi(2)).exp();
    Ok(1.0 - 2.0 * (x - x.powi(4) + x.powi(9)))
}

/// Complementary CDF of the Kolmogorov distribution.
fn qks(z: f64) -> Result<f64> {
    if z < 1.18 {
        return Ok(1.0 - pks(z)?);
    }
    let x = (-2.0 * z.powi(2)).exp();
    Ok(2.0 * (x - x.powi(4) + x.powi(9)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_two_sample_statistic() {
        let cases: [(&[f64], &[f64], f64); 5] = [
            (&[1.0, 2.0, 3.0], &[2.0, 3.0, 4.0], 1.0 / 3.0),
            (&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0], 0.0),
            (&[1.0, 2.0, 3.0], &[10.0, 11.0, 12.0], 1.0),
            (&[1.0, 1.0, 1.0, 2.0, 2.0], &[1.0, 1.0, 2.0, 2.0, 2.0], 0.2),
            (&[0.0, 1.0, 2.0, 3.0], &[1.0, 2.0, 3.0, 4.0], 0.25),
        ];
        for (a, b, expected) in cases {
            let d = two_sample_statistic(a, b).unwrap();
            assert_abs_diff_eq!(d, expected, epsilon = 1e-12);
            assert_abs_diff_eq!(two_sample_statistic(b, a).unwrap(), d, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_two_sample_repeated_pattern() {
        let base = [0.12, 0.25, 0.25, 0.78, 0.99, 0.33, 0.15, 0.5];
        let s1: Vec<f64> = base.iter().cycle().take(8 * 20).copied().collect();
        let mut other = base;
        other[7] = 0.51;
        let s2: Vec<f64> = other.iter().cycle().take(8 * 20).copied().collect();

        let result = two_sample_ks_test(&s1, &s2, 0.05).unwrap();
        assert_abs_diff_eq!(result.statistic, 0.125, epsilon = 1e-9);
        assert_abs_diff_eq!(result.p_value, 0.1641, epsilon = 1e-4);
        assert!(!result.is_rejected);
    }

    #[test]
    fn test_rejects_bad_samples() {
        let ok = [0.0; 10];
        assert!(two_sample_ks_test(&[], &ok, 0.05).is_err());
        assert!(two_sample_ks_test(&ok, &[1.0, 2.0], 0.05).is_err());
        let mut nan = ok;
        nan[3] = f64::NAN;
        assert!(matches!(
            one_sample_ks_test(&nan, |x| x, 0.05),
            Err(ShredderError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_kolmogorov_distribution() {
        assert!(pks(-1.0).is_err());
        assert_eq!(pks(0.0).unwrap(), 0.0);
        assert_eq!(qks(0.0).unwrap(), 1.0);
        assert_abs_diff_eq!(pks(1.23).unwrap(), 0.9029731024047791, epsilon = 1e-8);
        assert_abs_diff_eq!(pks(2.34).unwrap(), 0.9999649260833611, epsilon = 1e-8);
        assert_abs_diff_eq!(pks(3.45).unwrap(), 1.0, epsilon = 1e-8);
        // Both branches agree around the switch point.
        assert_abs_diff_eq!(pks(1.1799).unwrap(), pks(1.1801).unwrap(), epsilon = 1e-4);
    }

    #[test]
    fn test_one_sample_uniform() {
        let mut rng = SmallRng::seed_from_u64(7);
        let xs: Vec<f64> = (0..2_000).map(|_| rng.gen::<f64>()).collect();
        let uniform = |x: f64| x.clamp(0.0, 1.0);

        let result = one_sample_ks_test(&xs, uniform, 0.01).unwrap();
        assert!(!result.is_rejected, "Got {result:?}");

        let shifted: Vec<f64> = xs.iter().map(|x| x * 0.9).collect();
        let result = one_sample_ks_test(&shifted, uniform, 0.01).unwrap();
        assert!(result.is_rejected, "Got {result:?}");
    }
}
