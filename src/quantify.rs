/*!
Per-sample abundance samplers that feed the hierarchical model.

A [`Quantifier`] owns the observations of one sample and produces an
abundance estimate for every transcript, either a mode or a posterior draw,
optionally under the prior implied by the current condition-level
parameters. Quantifiers are dispatched one per unit through the same work
queue as the hierarchical groups ([`QuantGroup`]).
*/

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Gamma};
use std::sync::Arc;

use crate::design::Design;
use crate::error::{Result, ShredderError};
use crate::schedule::Phase;
use crate::scheduler::SamplerGroup;
use crate::state::{ModelState, MIN_ABUNDANCE};

/// Splice proportion handed to quantifiers for transcripts outside spliced groups.
pub const DEFAULT_SPLICE_MU: f32 = 0.0;
/// Splice spread handed to quantifiers for transcripts outside spliced groups.
pub const DEFAULT_SPLICE_SIGMA: f32 = 0.1;

/// Condition-level prior for one sample, on the scaled abundance scale.
#[derive(Debug, Clone)]
pub struct QuantPrior<'a> {
    /// Normalization factor of this sample.
    pub scale: f64,
    /// Mean abundance of each transcript in this sample's condition.
    pub mean: ArrayView1<'a, f32>,
    pub shape: ArrayView1<'a, f32>,
    pub splice_mu: ArrayView1<'a, f32>,
    pub splice_sigma: ArrayView1<'a, f32>,
    /// Whether the prior should be applied at all.
    pub engaged: bool,
}

/// Upstream abundance sampler of one sample.
pub trait Quantifier: Send {
    fn num_transcripts(&self) -> usize;

    /// Moves the state to a mode.
    fn optimize(&mut self, prior: &QuantPrior<'_>) -> Result<()>;

    /// Replaces the state with a posterior draw.
    fn sample(&mut self, prior: &QuantPrior<'_>) -> Result<()>;

    /// Unscaled abundance of every transcript.
    fn state(&self) -> &[f32];
}

/// Fixed abundances; `optimize` and `sample` leave them unchanged.
#[derive(Debug, Clone)]
pub struct FixedQuantifier {
    values: Vec<f32>,
}

impl FixedQuantifier {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }
}

impl Quantifier for FixedQuantifier {
    fn num_transcripts(&self) -> usize {
        self.values.len()
    }

    fn optimize(&mut self, _: &QuantPrior<'_>) -> Result<()> {
        Ok(())
    }

    fn sample(&mut self, _: &QuantPrior<'_>) -> Result<()> {
        Ok(())
    }

    fn state(&self) -> &[f32] {
        &self.values
    }
}

/// Conjugate gamma-Poisson abundance model over fragment counts.
///
/// Counts are Poisson with rate `depth * x`; under an engaged prior the
/// abundance `x` of a transcript is gamma with the condition shape and the
/// condition mean divided by the sample scale, otherwise flat.
#[derive(Debug, Clone)]
pub struct GammaPoissonQuantifier {
    counts: Vec<u32>,
    depth: f64,
    state: Vec<f32>,
    rng: SmallRng,
}

impl GammaPoissonQuantifier {
    pub fn new(counts: Vec<u32>, seed: u64) -> Self {
        let depth = counts.iter().map(|&c| f64::from(c)).sum::<f64>().max(1.0);
        let state = counts
            .iter()
            .map(|&c| ((f64::from(c) / depth) as f32).max(MIN_ABUNDANCE))
            .collect();
        Self {
            counts,
            depth,
            state,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Posterior `(shape, rate)` of each transcript's abundance.
    fn posterior(&self, prior: &QuantPrior<'_>) -> Result<Vec<(f64, f64)>> {
        let n = self.counts.len();
        if prior.engaged && (prior.mean.len() != n || prior.shape.len() != n) {
            return Err(ShredderError::DimensionMismatch {
                what: "quantifier prior",
                expected: n,
                found: prior.mean.len().min(prior.shape.len()),
            });
        }
        let scale = prior.scale.max(f64::from(MIN_ABUNDANCE));
        Ok(self
            .counts
            .iter()
            .enumerate()
            .map(|(j, &c)| {
                let c = f64::from(c);
                if prior.engaged {
                    let shape = f64::from(prior.shape[j].max(MIN_ABUNDANCE));
                    let mean = f64::from(prior.mean[j].max(MIN_ABUNDANCE)) / scale;
                    (shape + c, shape / mean + self.depth)
                } else {
                    (c + 1.0, self.depth)
                }
            })
            .collect())
    }
}

impl Quantifier for GammaPoissonQuantifier {
    fn num_transcripts(&self) -> usize {
        self.counts.len()
    }

    fn optimize(&mut self, prior: &QuantPrior<'_>) -> Result<()> {
        let modes: Vec<f32> = self
            .posterior(prior)?
            .into_iter()
            .map(|(a, b)| (((a - 1.0).max(0.0) / b) as f32).max(MIN_ABUNDANCE))
            .collect();
        self.state = modes;
        Ok(())
    }

    fn sample(&mut self, prior: &QuantPrior<'_>) -> Result<()> {
        let params = self.posterior(prior)?;
        for (x, (a, b)) in self.state.iter_mut().zip(params) {
            let gamma =
                Gamma::new(a, 1.0 / b).map_err(|e| ShredderError::Distribution(e.to_string()))?;
            *x = (gamma.sample(&mut self.rng) as f32).max(MIN_ABUNDANCE);
        }
        Ok(())
    }

    fn state(&self) -> &[f32] {
        &self.state
    }
}

/// Read-only inputs of one quantifier sweep.
#[derive(Debug, Clone)]
pub struct QuantInputs {
    pub state: ModelState,
    /// Splice proportion of each transcript per condition (conditions x transcripts).
    pub splice_mu: Array2<f32>,
    /// Splice spread of each transcript.
    pub splice_sigma: Array1<f32>,
}

impl QuantInputs {
    pub fn new(state: &ModelState, design: &Design) -> Self {
        let (c, n) = (design.num_conditions(), design.num_transcripts());
        let mut splice_mu = Array2::from_elem((c, n), DEFAULT_SPLICE_MU);
        let mut splice_sigma = Array1::from_elem(n, DEFAULT_SPLICE_SIGMA);
        for (tid, pos) in design.splice_positions().into_iter().enumerate() {
            if let Some((j, k)) = pos {
                for cond in 0..c {
                    splice_mu[[cond, tid]] = state.condition_splice_mu[j][[cond, k]];
                }
                splice_sigma[tid] = state.condition_splice_sigma[j][k];
            }
        }
        Self {
            state: state.clone(),
            splice_mu,
            splice_sigma,
        }
    }
}

/// Runs one [`Quantifier`] per sample.
pub struct QuantGroup {
    design: Arc<Design>,
}

impl QuantGroup {
    pub fn new(design: Arc<Design>) -> Self {
        Self { design }
    }
}

impl SamplerGroup for QuantGroup {
    type Worker = ();
    type Unit = Box<dyn Quantifier>;
    type Inputs = QuantInputs;
    type Output = Vec<f32>;

    fn name(&self) -> &'static str {
        "quant"
    }

    fn worker(&self) -> Result<()> {
        Ok(())
    }

    fn update(
        &self,
        _: &mut (),
        inputs: &QuantInputs,
        sample: usize,
        quantifier: &mut Box<dyn Quantifier>,
        phase: Phase,
    ) -> Result<Vec<f32>> {
        let c = self.design.condition_of(sample);
        let prior = QuantPrior {
            scale: inputs.state.scale[sample],
            mean: inputs.state.condition_mean.row(c),
            shape: inputs.state.condition_shape.view(),
            splice_mu: inputs.splice_mu.row(c),
            splice_sigma: inputs.splice_sigma.view(),
            engaged: phase.priors,
        };
        if phase.optimize {
            quantifier.optimize(&prior)?;
        } else {
            quantifier.sample(&prior)?;
        }

        let state = quantifier.state();
        if state.len() != self.design.num_transcripts() {
            return Err(ShredderError::DimensionMismatch {
                what: "quantifier state",
                expected: self.design.num_transcripts(),
                found: state.len(),
            });
        }
        Ok(state.iter().map(|&x| x.max(MIN_ABUNDANCE)).collect())
    }
}
