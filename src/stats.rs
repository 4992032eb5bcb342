//! Running moments and convergence diagnostics.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;

use crate::error::{Result, ShredderError};

/// Streaming mean and variance of a fixed-length vector (Welford).
#[derive(Debug, Clone, PartialEq)]
pub struct RunningMoments {
    n: usize,
    mean: Array1<f64>,
    m2: Array1<f64>,
}

impl RunningMoments {
    pub fn new(dim: usize) -> Self {
        Self {
            n: 0,
            mean: Array1::zeros(dim),
            m2: Array1::zeros(dim),
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn count(&self) -> usize {
        self.n
    }

    pub fn push(&mut self, x: &Array1<f64>) -> Result<()> {
        if x.len() != self.dim() {
            return Err(ShredderError::DimensionMismatch {
                what: "running moments",
                expected: self.dim(),
                found: x.len(),
            });
        }
        self.n += 1;
        let delta = x - &self.mean;
        self.mean.scaled_add(1.0 / self.n as f64, &delta);
        self.m2 += &(&delta * &(x - &self.mean));
        Ok(())
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Sample variance; zero before the second observation.
    pub fn variance(&self) -> Array1<f64> {
        if self.n < 2 {
            return Array1::zeros(self.dim());
        }
        &self.m2 / (self.n - 1) as f64
    }

    pub fn std(&self) -> Array1<f64> {
        self.variance().mapv(f64::sqrt)
    }
}

/// Potential scale reduction factor of every parameter.
///
/// `draws` has shape chains x samples x parameters.
pub fn rhat(draws: ArrayView3<f64>) -> Result<Array1<f64>> {
    let (m, n, _) = draws.dim();
    if m < 2 || n < 2 {
        return Err(ShredderError::InvalidConfig(format!(
            "rhat needs at least two chains of two samples, got {m} x {n}"
        )));
    }
    let (m, n) = (m as f64, n as f64);

    // chains x parameters
    let chain_means = draws.mean_axis(Axis(1)).ok_or(ShredderError::InvalidConfig(
        "empty chains".to_string(),
    ))?;
    let chain_vars = draws.var_axis(Axis(1), 1.0);
    let grand_mean = chain_means
        .mean_axis(Axis(0))
        .ok_or(ShredderError::InvalidConfig("no chains".to_string()))?;

    let between = (&chain_means - &grand_mean.insert_axis(Axis(0)))
        .pow2()
        .sum_axis(Axis(0))
        * (n / (m - 1.0));
    let within = chain_vars
        .mean_axis(Axis(0))
        .ok_or(ShredderError::InvalidConfig("no chains".to_string()))?;
    let var = &within * ((n - 1.0) / n) + between / n;
    Ok((var / within).sqrt())
}

/// Largest [`rhat`] over all parameters.
pub fn max_rhat(draws: ArrayView3<f64>) -> Result<f64> {
    let all = rhat(draws)?;
    all.max()
        .copied()
        .map_err(|e| ShredderError::InvalidConfig(format!("rhat: {e}")))
}
