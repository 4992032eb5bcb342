//! Current values of every parameter of the hierarchical model.

use ndarray::{Array1, Array2};
use std::sync::Arc;

use crate::design::Design;

/// Smallest abundance or mean the model works with.
pub const MIN_ABUNDANCE: f32 = 1e-16;

/// Scalars updated sequentially on the driving thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hyperparameters {
    pub experiment_shape: f64,
    pub condition_shape_beta: f64,
    pub condition_splice_beta: f64,
    pub experiment_splice_sigma: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            experiment_shape: 2.0,
            condition_shape_beta: 1.0,
            condition_splice_beta: 1.0,
            experiment_splice_sigma: 0.5,
        }
    }
}

/// Parameter arrays of every sampler group.
///
/// Arrays are reference counted so a sweep can hand read-only snapshots to
/// worker threads; the driver writes new values back between sweeps.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    /// Scaled abundance of each transcript in each sample (samples x transcripts).
    pub quant: Arc<Array2<f32>>,
    /// Normalization factor of each sample.
    pub scale: Vec<f64>,
    /// Mean abundance per condition (conditions x transcripts).
    pub condition_mean: Arc<Array2<f32>>,
    /// Gamma shape of replicate abundances per transcript.
    pub condition_shape: Arc<Array1<f32>>,
    /// Mean abundance per transcript over the whole experiment.
    pub experiment_mean: Arc<Array1<f32>>,
    /// Within-group proportions per spliced group (conditions x group size).
    pub condition_splice_mu: Arc<Vec<Array2<f32>>>,
    /// Proportion spread per spliced group and transcript.
    pub condition_splice_sigma: Arc<Vec<Array1<f32>>>,
    /// Experiment-level proportions per spliced group.
    pub experiment_splice_mu: Arc<Vec<Array1<f32>>>,
    pub hyper: Hyperparameters,
}

impl ModelState {
    /// Starting values for `design`.
    pub fn initial(design: &Design, experiment_shape: f64) -> Self {
        let (k, c, n) = (
            design.num_samples(),
            design.num_conditions(),
            design.num_transcripts(),
        );
        let group_sizes: Vec<usize> = (0..design.num_spliced())
            .map(|j| design.spliced_tids(j).len())
            .collect();

        Self {
            quant: Arc::new(Array2::from_elem((k, n), MIN_ABUNDANCE)),
            scale: vec![1.0; k],
            condition_mean: Arc::new(Array2::from_elem((c, n), MIN_ABUNDANCE)),
            condition_shape: Arc::new(Array1::from_elem(n, 1.0)),
            experiment_mean: Arc::new(Array1::from_elem(n, MIN_ABUNDANCE)),
            condition_splice_mu: Arc::new(
                group_sizes
                    .iter()
                    .map(|&len| Array2::from_elem((c, len), 0.5))
                    .collect(),
            ),
            condition_splice_sigma: Arc::new(
                group_sizes
                    .iter()
                    .map(|&len| Array1::from_elem(len, 0.1))
                    .collect(),
            ),
            experiment_splice_mu: Arc::new(
                group_sizes
                    .iter()
                    .map(|&len| Array1::from_elem(len, 0.5))
                    .collect(),
            ),
            hyper: Hyperparameters {
                experiment_shape,
                ..Hyperparameters::default()
            },
        }
    }

    /// Whether every parameter is finite.
    pub fn is_finite(&self) -> bool {
        self.quant.iter().all(|x| x.is_finite())
            && self.scale.iter().all(|x| x.is_finite())
            && self.condition_mean.iter().all(|x| x.is_finite())
            && self.condition_shape.iter().all(|x| x.is_finite())
            && self.experiment_mean.iter().all(|x| x.is_finite())
            && self.condition_splice_mu.iter().flatten().all(|x| x.is_finite())
            && self.condition_splice_sigma.iter().flatten().all(|x| x.is_finite())
            && self.experiment_splice_mu.iter().flatten().all(|x| x.is_finite())
            && [
                self.hyper.experiment_shape,
                self.hyper.condition_shape_beta,
                self.hyper.condition_splice_beta,
                self.hyper.experiment_splice_sigma,
            ]
            .iter()
            .all(|x| x.is_finite())
    }
}
