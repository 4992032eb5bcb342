/*!
Conditional log-densities of the hierarchical expression model.

Every type here is built for a single parameter update, borrows the
observations it conditions on, and implements [`Objective`] in the parameter
being updated.
*/

use crate::distributions::{Gamma, LogDensity, MeanShapeGamma, Normal, StudentT};
use crate::objective::Objective;

/// Mean of gamma-distributed observations with known shape, under a
/// mean/shape gamma prior.
#[derive(Debug, Clone, Copy)]
pub struct GammaMean<'a> {
    pub xs: &'a [f64],
    pub shape: f64,
    pub prior: MeanShapeGamma,
}

impl Objective for GammaMean<'_> {
    fn evaluate(&self, mean: f64) -> (f64, f64) {
        let likelihood = MeanShapeGamma::new(mean, self.shape);
        (
            likelihood.ln_pdf_sum(self.xs) + self.prior.ln_pdf(mean),
            likelihood.d_dmean_sum(self.xs) + self.prior.d_dx(mean),
        )
    }
}

/// Shared shape of gamma-distributed observations, each with its own known
/// mean, under a gamma prior.
#[derive(Debug, Clone, Copy)]
pub struct GammaShape<'a> {
    pub xs: &'a [f64],
    /// Mean of each observation.
    pub means: &'a [f64],
    pub prior: Gamma,
}

impl Objective for GammaShape<'_> {
    fn evaluate(&self, shape: f64) -> (f64, f64) {
        let mut lp = self.prior.ln_pdf(shape);
        let mut d = self.prior.d_dx(shape);
        for (&x, &mean) in self.xs.iter().zip(self.means) {
            let g = MeanShapeGamma::new(mean, shape);
            lp += g.ln_pdf(x);
            d += g.d_dshape(x);
        }
        (lp, d)
    }
}

/// Rate of gamma-distributed observations with known shape, under a gamma prior.
#[derive(Debug, Clone, Copy)]
pub struct GammaRate<'a> {
    pub xs: &'a [f64],
    pub alpha: f64,
    pub prior: Gamma,
}

impl Objective for GammaRate<'_> {
    fn evaluate(&self, beta: f64) -> (f64, f64) {
        let likelihood = Gamma::new(self.alpha, beta);
        (
            likelihood.ln_pdf_sum(self.xs) + self.prior.ln_pdf(beta),
            likelihood.d_dbeta_sum(self.xs) + self.prior.d_dx(beta),
        )
    }
}

/// Scale of zero-mean normal residuals under a gamma prior.
#[derive(Debug, Clone, Copy)]
pub struct NormalSigma<'a> {
    pub residuals: &'a [f64],
    pub prior: Gamma,
}

impl Objective for NormalSigma<'_> {
    fn evaluate(&self, sigma: f64) -> (f64, f64) {
        let likelihood = Normal::new(0.0, sigma);
        (
            likelihood.ln_pdf_sum(self.residuals) + self.prior.ln_pdf(sigma),
            likelihood.d_dsigma_sum(self.residuals) + self.prior.d_dx(sigma),
        )
    }
}

/// Location of normal observations with known scale under a Student-t prior.
#[derive(Debug, Clone, Copy)]
pub struct NormalMu<'a> {
    pub xs: &'a [f64],
    pub sigma: f64,
    pub prior: StudentT,
}

impl Objective for NormalMu<'_> {
    fn evaluate(&self, mu: f64) -> (f64, f64) {
        let likelihood = Normal::new(mu, self.sigma);
        (
            likelihood.ln_pdf_sum(self.xs) + self.prior.ln_pdf(mu),
            likelihood.d_dmu_sum(self.xs) + self.prior.d_dx(mu),
        )
    }
}

/// Location of Student-t observations with known scale under a normal prior.
#[derive(Debug, Clone, Copy)]
pub struct StudentTMu<'a> {
    pub xs: &'a [f64],
    pub nu: f64,
    pub sigma: f64,
    pub prior: Normal,
}

impl Objective for StudentTMu<'_> {
    fn evaluate(&self, mu: f64) -> (f64, f64) {
        let likelihood = StudentT::new(self.nu, mu, self.sigma);
        (
            likelihood.ln_pdf_sum(self.xs) + self.prior.ln_pdf(mu),
            likelihood.d_dmu_sum(self.xs) + self.prior.d_dx(mu),
        )
    }
}

/// Joint rescaling of one transcript's condition splice proportions and
/// their spread.
///
/// With `eta`, condition `c` has proportion `eta * offsets[c] + centers[c]`
/// and the spread is `|eta| * sigma`. `eta = 1` leaves both unchanged.
#[derive(Debug, Clone, Copy)]
pub struct SpliceEta<'a> {
    /// Observed proportion per sample.
    pub xs: &'a [f64],
    /// Condition of each sample.
    pub conditions: &'a [usize],
    /// Mean observed proportion per condition.
    pub centers: &'a [f64],
    /// Current proportion minus center, per condition.
    pub offsets: &'a [f64],
    pub sigma: f64,
    /// Prior of condition proportions.
    pub mu_prior: StudentT,
    /// Prior of the spread.
    pub sigma_prior: Gamma,
}

impl Objective for SpliceEta<'_> {
    fn evaluate(&self, eta: f64) -> (f64, f64) {
        let sigma = eta.abs() * self.sigma;
        let dsigma = eta.signum() * self.sigma;

        let mut lp = self.sigma_prior.ln_pdf(sigma);
        let mut d = self.sigma_prior.d_dx(sigma) * dsigma;
        for (&center, &offset) in self.centers.iter().zip(self.offsets) {
            let mu = eta * offset + center;
            lp += self.mu_prior.ln_pdf(mu);
            d += self.mu_prior.d_dx(mu) * offset;
        }
        for (&x, &c) in self.xs.iter().zip(self.conditions) {
            let offset = self.offsets[c];
            let likelihood = Normal::new(eta * offset + self.centers[c], sigma);
            lp += likelihood.ln_pdf(x);
            d += likelihood.d_dmu(x) * offset + likelihood.d_dsigma(x) * dsigma;
        }
        (lp, d)
    }
}
