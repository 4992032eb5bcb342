//! Distributional checks of the slice sampler.
//!
//! Draws from a chain are thinned and compared against the CDF of the target
//! with a one-sample KS test, once for the right target (must not reject) and
//! once for a wrong one (must reject).

use rand::rngs::SmallRng;
use rand::SeedableRng;
use shredder::ks_test::one_sample_ks_test;
use shredder::Shredder;

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: u64 = 42;
    const CHAIN_LENGTH: usize = 20_000;
    const THIN: usize = 10;

    /// CDF of `exp(lp)` on `[lower, upper]` by trapezoidal integration on a fine grid.
    fn integrated_cdf(lp: impl Fn(f64) -> f64, lower: f64, upper: f64) -> impl Fn(f64) -> f64 {
        const STEPS: usize = 100_000;
        let h = (upper - lower) / STEPS as f64;
        let density: Vec<f64> = (0..=STEPS).map(|i| lp(lower + i as f64 * h).exp()).collect();
        let mut cumulative = vec![0.0; STEPS + 1];
        for i in 1..=STEPS {
            cumulative[i] = cumulative[i - 1] + 0.5 * h * (density[i - 1] + density[i]);
        }
        let total = cumulative[STEPS];
        move |x: f64| {
            let pos = ((x - lower) / h).clamp(0.0, STEPS as f64);
            let i = (pos.floor() as usize).min(STEPS - 1);
            let frac = pos - i as f64;
            (cumulative[i] + frac * (cumulative[i + 1] - cumulative[i])) / total
        }
    }

    fn thinned_draws<F>(objective: F, shredder: &Shredder, x0: f64) -> Vec<f64>
    where
        F: Fn(f64) -> (f64, f64),
    {
        let mut rng = SmallRng::seed_from_u64(SEED);
        let mut x = x0;
        let mut draws = Vec::with_capacity(CHAIN_LENGTH / THIN);
        for i in 0..CHAIN_LENGTH {
            x = shredder.sample(&mut rng, &objective, x).unwrap();
            if i % THIN == 0 {
                draws.push(x);
            }
        }
        draws
    }

    /// Gamma(3, 1) kernel.
    fn gamma_kernel(x: f64) -> (f64, f64) {
        (2.0 * x.ln() - x, 2.0 / x - 1.0)
    }

    #[test]
    fn test_gamma_kernel_accept() {
        let (lower, upper) = (1e-10, 40.0);
        let shredder = Shredder::new(lower, upper, 1e-6).unwrap();
        let draws = thinned_draws(gamma_kernel, &shredder, 2.0);
        assert!(draws.iter().all(|&x| (lower..=upper).contains(&x)));

        let cdf = integrated_cdf(|x| gamma_kernel(x).0, lower, upper);
        let result = one_sample_ks_test(&draws, cdf, 0.01).unwrap();
        assert!(
            !result.is_rejected,
            "KS test rejected the slice sampler's draws: {result:?}"
        );
    }

    #[test]
    fn test_gamma_kernel_reject() {
        let (lower, upper) = (1e-10, 40.0);
        let shredder = Shredder::new(lower, upper, 1e-6).unwrap();
        let draws = thinned_draws(gamma_kernel, &shredder, 2.0);

        // Gamma(3, 1.2) instead.
        let wrong = integrated_cdf(|x| 2.0 * x.ln() - 1.2 * x, lower, upper);
        let result = one_sample_ks_test(&draws, wrong, 0.01).unwrap();
        assert!(
            result.is_rejected,
            "KS test failed to reject a wrong target: {result:?}"
        );
    }

    #[test]
    fn test_truncated_exponential() {
        // Mass piles up against the lower boundary, exercising the boundary path.
        let (lower, upper) = (1.0, 4.0);
        let shredder = Shredder::new(lower, upper, 1e-8).unwrap();
        let draws = thinned_draws(|x: f64| (-2.0 * x, -2.0), &shredder, 3.0);

        let norm = (-2.0 * lower).exp() - (-2.0 * upper).exp();
        let cdf = move |x: f64| ((-2.0 * lower).exp() - (-2.0 * x.clamp(lower, upper)).exp()) / norm;
        let result = one_sample_ks_test(&draws, cdf, 0.01).unwrap();
        assert!(!result.is_rejected, "Got {result:?}");
    }

    #[test]
    fn test_optimize_ignores_start() {
        let shredder = Shredder::new(1e-10, 40.0, 1e-6).unwrap();
        for x0 in [0.1, 1.0, 5.0, 30.0] {
            let x = shredder.optimize(&gamma_kernel, x0).unwrap();
            assert!((x - 2.0).abs() < 1e-3, "From {x0}: got {x}");
        }
    }
}
