//! Run configuration.
//!
//! Values come from, in order of precedence: command-line flags, a TOML file,
//! and the defaults below. Every section may be omitted from the file.
//!
//! ```toml
//! seed = 7
//! burnin = 20
//! num_samples = 200
//!
//! [priors]
//! condition_shape_alpha = 8.0
//!
//! [edge_search]
//! max_newton_steps = 8
//! ```

use serde::Deserialize;
use std::path::Path;
use std::thread;

use crate::error::{Result, ShredderError};
use crate::optimize::BoundedMaximizer;
use crate::schedule::Schedule;
use crate::shredder::EdgeSearch;

/// Fixed hyperparameters of the hierarchical model.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Priors {
    /// Prior mean of experiment-level transcript means.
    pub experiment_mean0: f64,
    /// Prior shape of experiment-level transcript means.
    pub experiment_mean_shape0: f64,
    /// Shape relating condition means to experiment means.
    pub experiment_shape: f64,
    /// Shape of the gamma prior on condition shapes.
    pub condition_shape_alpha: f64,
    /// Gamma prior on the rate of condition shapes.
    pub condition_shape_beta_a: f64,
    pub condition_shape_beta_b: f64,
    /// Shape of the gamma prior on condition splice sigmas.
    pub condition_splice_alpha: f64,
    /// Gamma prior on the rate of condition splice sigmas.
    pub condition_splice_beta_a: f64,
    pub condition_splice_beta_b: f64,
    /// Gamma prior on the experiment splice sigma.
    pub experiment_splice_sigma_alpha: f64,
    pub experiment_splice_sigma_beta: f64,
    /// Normal prior on experiment splice proportions.
    pub experiment_splice_mu0: f64,
    pub experiment_splice_sigma0: f64,
    /// Degrees of freedom relating condition to experiment splice proportions.
    pub experiment_splice_nu: f64,
    /// Lower bound applied to sampled condition splice sigmas.
    pub min_splice_sigma: f64,
}

impl Default for Priors {
    fn default() -> Self {
        Self {
            experiment_mean0: 1e-4,
            experiment_mean_shape0: 0.5,
            experiment_shape: 2.0,
            condition_shape_alpha: 10.0,
            condition_shape_beta_a: 1.0,
            condition_shape_beta_b: 1.0,
            condition_splice_alpha: 5.0,
            condition_splice_beta_a: 1.0,
            condition_splice_beta_b: 1.0,
            experiment_splice_sigma_alpha: 2.0,
            experiment_splice_sigma_beta: 4.0,
            experiment_splice_mu0: 0.5,
            experiment_splice_sigma0: 0.5,
            experiment_splice_nu: 10.0,
            min_splice_sigma: 1e-3,
        }
    }
}

impl Priors {
    fn validate(&self) -> Result<()> {
        let positive = [
            ("experiment_mean0", self.experiment_mean0),
            ("experiment_mean_shape0", self.experiment_mean_shape0),
            ("experiment_shape", self.experiment_shape),
            ("condition_shape_alpha", self.condition_shape_alpha),
            ("condition_shape_beta_a", self.condition_shape_beta_a),
            ("condition_shape_beta_b", self.condition_shape_beta_b),
            ("condition_splice_alpha", self.condition_splice_alpha),
            ("condition_splice_beta_a", self.condition_splice_beta_a),
            ("condition_splice_beta_b", self.condition_splice_beta_b),
            ("experiment_splice_sigma_alpha", self.experiment_splice_sigma_alpha),
            ("experiment_splice_sigma_beta", self.experiment_splice_sigma_beta),
            ("experiment_splice_sigma0", self.experiment_splice_sigma0),
            ("experiment_splice_nu", self.experiment_splice_nu),
            ("min_splice_sigma", self.min_splice_sigma),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ShredderError::InvalidConfig(format!(
                    "priors.{name} must be positive and finite, got {value}"
                )));
            }
        }
        if !self.experiment_splice_mu0.is_finite() {
            return Err(ShredderError::InvalidConfig(
                "priors.experiment_splice_mu0 must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-sample normalization by an upper quantile of abundances.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Scaling {
    pub quantile: f64,
    /// Only the largest `truncation` abundances of a sample are considered.
    pub truncation: usize,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            quantile: 0.95,
            truncation: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalyzeConfig {
    pub seed: u64,
    pub optimize_rounds: usize,
    pub burnin: usize,
    /// Sampling iterations, burn-in included.
    pub num_samples: usize,
    /// Worker threads per sampler group.
    pub threads: usize,
    /// Units per block of work.
    pub block_size: usize,
    /// Blocks that may wait in a tick queue at once.
    pub queue_capacity: usize,
    /// Never engage the hierarchical prior in upstream quantifiers.
    pub nopriors: bool,
    pub progress: bool,
    pub priors: Priors,
    pub scaling: Scaling,
    pub edge_search: EdgeSearch,
    pub maximizer: BoundedMaximizer,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            optimize_rounds: 10,
            burnin: 10,
            num_samples: 100,
            threads: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            block_size: 250,
            queue_capacity: 64,
            nopriors: false,
            progress: true,
            priors: Priors::default(),
            scaling: Scaling::default(),
            edge_search: EdgeSearch::default(),
            maximizer: BoundedMaximizer::default(),
        }
    }
}

impl AnalyzeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn schedule(&self) -> Schedule {
        Schedule {
            optimize_rounds: self.optimize_rounds,
            burnin: self.burnin,
            num_samples: self.num_samples,
            nopriors: self.nopriors,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ShredderError::InvalidConfig(msg));
        if self.threads == 0 {
            return invalid("threads must be at least 1".to_string());
        }
        if self.block_size == 0 || self.queue_capacity == 0 {
            return invalid("block_size and queue_capacity must be at least 1".to_string());
        }
        if self.burnin > self.num_samples {
            return invalid(format!(
                "burnin ({}) exceeds num_samples ({})",
                self.burnin, self.num_samples
            ));
        }
        if !(self.scaling.quantile > 0.0 && self.scaling.quantile <= 1.0) || self.scaling.truncation == 0 {
            return invalid("scaling.quantile must lie in (0, 1] and truncation be positive".to_string());
        }
        let es = &self.edge_search;
        if !(es.lp_eps > 0.0) || !(es.d_eps >= 0.0) || es.max_bisections == 0 {
            return invalid("edge_search needs lp_eps > 0, d_eps >= 0, max_bisections >= 1".to_string());
        }
        let m = &self.maximizer;
        if m.max_evaluations == 0 || !(m.grad_clamp > 0.0) || !(m.ftol_abs >= 0.0) {
            return invalid(
                "maximizer needs max_evaluations >= 1, grad_clamp > 0, ftol_abs >= 0".to_string(),
            );
        }
        self.priors.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalyzeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.block_size, 250);
        assert_eq!(config.edge_search.max_bisections, 50);
        assert_eq!(config.maximizer.max_evaluations, 20);
    }

    #[test]
    fn test_partial_toml() {
        let config = AnalyzeConfig::from_toml_str(
            r#"
            seed = 7
            burnin = 3
            num_samples = 9
            threads = 2

            [priors]
            condition_shape_alpha = 8.0

            [edge_search]
            max_newton_steps = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.threads, 2);
        assert_eq!(config.priors.condition_shape_alpha, 8.0);
        assert_eq!(config.priors.experiment_shape, Priors::default().experiment_shape);
        assert_eq!(config.edge_search.max_newton_steps, 8);
        assert_eq!(config.edge_search.lp_eps, 1e-2);
        assert_eq!(config.schedule().stationary_iterations(), 6);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            AnalyzeConfig::from_toml_str("burnin = 10\nnum_samples = 5"),
            Err(ShredderError::InvalidConfig(_))
        ));
        assert!(AnalyzeConfig::from_toml_str("threads = 0").is_err());
        assert!(AnalyzeConfig::from_toml_str("[priors]\nexperiment_shape = -1.0").is_err());
        assert!(matches!(
            AnalyzeConfig::from_toml_str("seed = \"seven\""),
            Err(ShredderError::Config(_))
        ));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "num_samples = 12\n[scaling]\nquantile = 0.9\n").unwrap();
        let config = AnalyzeConfig::from_path(&path).unwrap();
        assert_eq!(config.num_samples, 12);
        assert_eq!(config.scaling.quantile, 0.9);
        assert!(AnalyzeConfig::from_path(dir.path().join("missing.toml")).is_err());
    }
}
