//! The contract between the univariate sampler and the densities it explores.

/// An unnormalized univariate log-density together with its derivative.
///
/// Implementations are usually short-lived value types that borrow the data
/// of one parameter update (observations, neighbouring parameters, prior
/// settings) and are rebuilt for every call into the sampler.
///
/// Values may be non-finite at or near the boundary of the domain; callers
/// treat such points as outside the support.
pub trait Objective {
    /// Returns `(log f(x), d/dx log f(x))`.
    fn evaluate(&self, x: f64) -> (f64, f64);
}

impl<F> Objective for F
where
    F: Fn(f64) -> (f64, f64),
{
    fn evaluate(&self, x: f64) -> (f64, f64) {
        self(x)
    }
}
