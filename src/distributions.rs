/*!
Log-density families used to build objectives for the hierarchical model.

Each family is a small `Copy` value holding its parameters together with any
normalizing constant that only depends on them, and exposes the normalized
log-density plus the analytic partial derivatives the univariate sampler
needs. Outside the support the log-density is `-inf`, which the sampler
treats as "reject this point".

Summation helpers accept `f32` or `f64` observations through
[`num_traits::AsPrimitive`], so state arrays can stay in single precision
while objectives are evaluated in double precision.

# Examples

```rust
use shredder::distributions::{LogDensity, MeanShapeGamma, Normal};

let normal = Normal::new(0.0, 1.0);
let lp = normal.ln_pdf(0.5);
assert!((lp - (-0.5 * 0.25 - 0.5 * (2.0 * std::f64::consts::PI).ln())).abs() < 1e-12);

// Gamma parameterized by its mean and shape.
let gamma = MeanShapeGamma::new(2.0, 4.0);
let xs = [1.5f32, 2.0, 2.5];
assert!(gamma.ln_pdf_sum(&xs).is_finite());
assert!(gamma.d_dmean_sum(&xs).abs() < 1e-6);
```
*/

use num_traits::AsPrimitive;
use statrs::function::gamma::{digamma, ln_gamma};
use std::f64::consts::PI;

/// A univariate log-density with a derivative in its argument.
pub trait LogDensity {
    /// Normalized log-density at `x`.
    fn ln_pdf(&self, x: f64) -> f64;

    /// Derivative of [`LogDensity::ln_pdf`] with respect to `x`.
    fn d_dx(&self, x: f64) -> f64;

    /// Sum of log-densities over a slice of observations.
    fn ln_pdf_sum<T: AsPrimitive<f64>>(&self, xs: &[T]) -> f64 {
        xs.iter().map(|&x| self.ln_pdf(x.as_())).sum()
    }
}

/// Normal distribution with mean `mu` and standard deviation `sigma`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normal {
    pub mu: f64,
    pub sigma: f64,
}

impl Normal {
    pub fn new(mu: f64, sigma: f64) -> Self {
        Self { mu, sigma }
    }

    /// Derivative of the log-density with respect to `mu`.
    pub fn d_dmu(&self, x: f64) -> f64 {
        (x - self.mu) / (self.sigma * self.sigma)
    }

    /// Derivative of the log-density with respect to `sigma`.
    pub fn d_dsigma(&self, x: f64) -> f64 {
        let d = x - self.mu;
        d * d / (self.sigma * self.sigma * self.sigma) - 1.0 / self.sigma
    }

    pub fn d_dmu_sum<T: AsPrimitive<f64>>(&self, xs: &[T]) -> f64 {
        xs.iter().map(|&x| self.d_dmu(x.as_())).sum()
    }

    pub fn d_dsigma_sum<T: AsPrimitive<f64>>(&self, xs: &[T]) -> f64 {
        xs.iter().map(|&x| self.d_dsigma(x.as_())).sum()
    }
}

impl LogDensity for Normal {
    fn ln_pdf(&self, x: f64) -> f64 {
        let z = (x - self.mu) / self.sigma;
        -0.5 * (2.0 * PI).ln() - self.sigma.ln() - 0.5 * z * z
    }

    fn d_dx(&self, x: f64) -> f64 {
        (self.mu - x) / (self.sigma * self.sigma)
    }
}

/// Location-scale Student-t distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudentT {
    pub nu: f64,
    pub mu: f64,
    pub sigma: f64,
    ln_norm: f64,
}

impl StudentT {
    pub fn new(nu: f64, mu: f64, sigma: f64) -> Self {
        let ln_norm =
            ln_gamma(0.5 * (nu + 1.0)) - ln_gamma(0.5 * nu) - 0.5 * (nu * PI).ln() - sigma.ln();
        Self {
            nu,
            mu,
            sigma,
            ln_norm,
        }
    }

    /// Derivative of the log-density with respect to the location.
    pub fn d_dmu(&self, x: f64) -> f64 {
        -self.d_dx(x)
    }

    pub fn d_dmu_sum<T: AsPrimitive<f64>>(&self, xs: &[T]) -> f64 {
        xs.iter().map(|&x| self.d_dmu(x.as_())).sum()
    }
}

impl LogDensity for StudentT {
    fn ln_pdf(&self, x: f64) -> f64 {
        let z = (x - self.mu) / self.sigma;
        self.ln_norm - 0.5 * (self.nu + 1.0) * (z * z / self.nu).ln_1p()
    }

    fn d_dx(&self, x: f64) -> f64 {
        let d = x - self.mu;
        -(self.nu + 1.0) * d / (self.nu * self.sigma * self.sigma + d * d)
    }
}

/// Gamma distribution with shape `alpha` and rate `beta`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gamma {
    pub alpha: f64,
    pub beta: f64,
    ln_norm: f64,
}

impl Gamma {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self {
            alpha,
            beta,
            ln_norm: alpha * beta.ln() - ln_gamma(alpha),
        }
    }

    /// Derivative of the log-density with respect to the rate.
    pub fn d_dbeta(&self, x: f64) -> f64 {
        self.alpha / self.beta - x
    }

    pub fn d_dbeta_sum<T: AsPrimitive<f64>>(&self, xs: &[T]) -> f64 {
        xs.iter().map(|&x| self.d_dbeta(x.as_())).sum()
    }
}

impl LogDensity for Gamma {
    fn ln_pdf(&self, x: f64) -> f64 {
        if !(x > 0.0) {
            return f64::NEG_INFINITY;
        }
        self.ln_norm + (self.alpha - 1.0) * x.ln() - self.beta * x
    }

    fn d_dx(&self, x: f64) -> f64 {
        (self.alpha - 1.0) / x - self.beta
    }
}

/// Gamma distribution parameterized by its mean and shape, so that the scale
/// is `mean / shape`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanShapeGamma {
    pub mean: f64,
    pub shape: f64,
    scale: f64,
    ln_norm: f64,
}

impl MeanShapeGamma {
    pub fn new(mean: f64, shape: f64) -> Self {
        let scale = mean / shape;
        Self {
            mean,
            shape,
            scale,
            ln_norm: -(ln_gamma(shape) + shape * scale.ln()),
        }
    }

    /// Derivative of the log-density with respect to the mean.
    pub fn d_dmean(&self, x: f64) -> f64 {
        self.shape * (x - self.mean) / (self.mean * self.mean)
    }

    /// Derivative of the log-density with respect to the shape.
    pub fn d_dshape(&self, x: f64) -> f64 {
        1.0 - digamma(self.shape) - self.scale.ln() + x.ln() - x / self.mean
    }

    pub fn d_dmean_sum<T: AsPrimitive<f64>>(&self, xs: &[T]) -> f64 {
        xs.iter().map(|&x| self.d_dmean(x.as_())).sum()
    }
}

impl LogDensity for MeanShapeGamma {
    fn ln_pdf(&self, x: f64) -> f64 {
        if !(x > 0.0) {
            return f64::NEG_INFINITY;
        }
        self.ln_norm + (self.shape - 1.0) * x.ln() - x / self.scale
    }

    fn d_dx(&self, x: f64) -> f64 {
        (self.shape - 1.0) / x - 1.0 / self.scale
    }
}
