//! Synthetic expression datasets with known condition-level means.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Gamma, LogNormal, Poisson};
use serde::Deserialize;

use crate::design::Design;
use crate::error::{Result, ShredderError};
use crate::quantify::{GammaPoissonQuantifier, Quantifier};

fn dist_err(e: impl std::fmt::Display) -> ShredderError {
    ShredderError::Distribution(e.to_string())
}

fn normalize(mut row: ndarray::ArrayViewMut1<f64>) {
    let total = row.sum();
    if total > 0.0 {
        row /= total;
    }
}

/// Generative settings of a synthetic experiment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Simulation {
    pub num_transcripts: usize,
    pub num_conditions: usize,
    pub replicates: usize,
    /// Transcripts per transcription group; the last group may be smaller.
    pub tgroup_size: usize,
    /// Expected fragment count per sample.
    pub depth: f64,
    /// Gamma shape of replicate abundances around the condition mean.
    pub condition_shape: f64,
    /// Log-scale spread of condition fold changes.
    pub fold_change_sigma: f64,
    pub seed: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            num_transcripts: 200,
            num_conditions: 2,
            replicates: 3,
            tgroup_size: 2,
            depth: 1e6,
            condition_shape: 20.0,
            fold_change_sigma: 0.5,
            seed: 0,
        }
    }
}

/// Counts drawn from a [`Simulation`], with the means they were drawn from.
#[derive(Debug, Clone)]
pub struct SimulatedData {
    pub design: Design,
    /// Fragment counts of each transcript, one vector per sample.
    pub counts: Vec<Vec<u32>>,
    /// True relative abundance per condition (conditions x transcripts).
    pub condition_mean: Array2<f64>,
}

impl SimulatedData {
    /// One [`GammaPoissonQuantifier`] per sample, seeded `seed + sample`.
    pub fn quantifiers(&self, seed: u64) -> Vec<Box<dyn Quantifier>> {
        self.counts
            .iter()
            .enumerate()
            .map(|(i, c)| {
                Box::new(GammaPoissonQuantifier::new(c.clone(), seed.wrapping_add(i as u64)))
                    as Box<dyn Quantifier>
            })
            .collect()
    }
}

impl Simulation {
    pub fn generate(&self) -> Result<SimulatedData> {
        if self.num_transcripts == 0 || self.num_conditions == 0 || self.replicates == 0 {
            return Err(ShredderError::InvalidConfig(
                "simulation needs transcripts, conditions and replicates".to_string(),
            ));
        }
        let (n, c) = (self.num_transcripts, self.num_conditions);
        let mut rng = SmallRng::seed_from_u64(self.seed);

        let base = Gamma::new(0.5, 1.0).map_err(dist_err)?;
        let mut experiment: Array1<f64> = (0..n).map(|_| base.sample(&mut rng)).collect();
        normalize(experiment.view_mut());

        let fold = LogNormal::new(0.0, self.fold_change_sigma).map_err(dist_err)?;
        let mut condition_mean = Array2::from_shape_fn((c, n), |(_, t)| {
            experiment[t] * fold.sample(&mut rng)
        });
        condition_mean
            .axis_iter_mut(Axis(0))
            .for_each(normalize);

        let mut builder = Design::builder(n);
        let tgroup_size = self.tgroup_size.max(1);
        for start in (0..n).step_by(tgroup_size) {
            builder.add_tgroup((start..(start + tgroup_size).min(n)).collect());
        }

        let mut counts = Vec::with_capacity(c * self.replicates);
        for cond in 0..c {
            let name = format!("condition{cond}");
            for _ in 0..self.replicates {
                builder.add_sample(&name);
                let mut abundance = Array1::zeros(n);
                for (x, &mean) in abundance.iter_mut().zip(condition_mean.row(cond)) {
                    let g = Gamma::new(self.condition_shape, mean.max(1e-300) / self.condition_shape)
                        .map_err(dist_err)?;
                    *x = g.sample(&mut rng);
                }
                normalize(abundance.view_mut());

                let sample = abundance
                    .iter()
                    .map(|&x| {
                        let p = Poisson::new((self.depth * x).max(1e-12)).map_err(dist_err)?;
                        Ok(p.sample(&mut rng) as u32)
                    })
                    .collect::<Result<Vec<u32>>>()?;
                counts.push(sample);
            }
        }

        Ok(SimulatedData {
            design: builder.build()?,
            counts,
            condition_mean,
        })
    }
}
