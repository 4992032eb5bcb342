/*!
Sampler groups of the hierarchical expression model.

Condition level, updated together after the abundances of an iteration are
known:

- [`ConditionMeanShape`]: one unit per transcript; the mean abundance in each
  condition and the replicate shape.
- [`ConditionSplice`]: one unit per spliced transcription group; the
  within-group proportions per condition and their spread.

Experiment level, updated once the condition level is done:

- [`ExperimentMean`]: one unit per transcript.
- [`ExperimentSplice`]: one unit per spliced transcription group.

Every group reads a [`ModelState`] snapshot and returns new values for its
own units only; per-unit randomness comes from a [`SmallRng`] owned by the
unit.
*/

use ndarray::{Array1, Array2};
use rand::rngs::SmallRng;
use std::sync::Arc;

use crate::config::{AnalyzeConfig, Priors};
use crate::design::Design;
use crate::distributions::{Gamma, MeanShapeGamma, Normal, StudentT};
use crate::error::Result;
use crate::model::{GammaMean, GammaShape, NormalMu, NormalSigma, SpliceEta, StudentTMu};
use crate::optimize::BoundedMaximizer;
use crate::schedule::Phase;
use crate::scheduler::SamplerGroup;
use crate::shredder::{EdgeSearch, Shredder};
use crate::state::ModelState;

/// Domain and tolerance of one kind of parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
    pub tolerance: f64,
}

pub const MEAN_BOUNDS: Bounds = Bounds {
    lower: 1e-12,
    upper: 1.0,
    tolerance: 1e-10,
};
pub const SHAPE_BOUNDS: Bounds = Bounds {
    lower: 0.1,
    upper: 5.0,
    tolerance: 1e-2,
};
pub const SPLICE_MU_BOUNDS: Bounds = Bounds {
    lower: -1.0,
    upper: 2.0,
    tolerance: 1e-5,
};
pub const SPLICE_SIGMA_BOUNDS: Bounds = Bounds {
    lower: 1e-8,
    upper: 1e5,
    tolerance: 1e-5,
};
pub const SPLICE_ETA_BOUNDS: Bounds = Bounds {
    lower: -10.0,
    upper: 10.0,
    tolerance: 1e-5,
};
pub const RATE_BOUNDS: Bounds = Bounds {
    lower: 1e-10,
    upper: 1e5,
    tolerance: 1e-4,
};

/// Value forced on shapes and spreads during burn-in.
pub const BURNIN_VARIANCE: f32 = 1.0;

/// Settings every group needs to build its samplers.
#[derive(Debug, Clone)]
pub struct GroupContext {
    pub design: Arc<Design>,
    pub priors: Priors,
    pub edge_search: EdgeSearch,
    pub maximizer: BoundedMaximizer,
}

impl GroupContext {
    pub fn new(design: Arc<Design>, config: &AnalyzeConfig) -> Self {
        Self {
            design,
            priors: config.priors,
            edge_search: config.edge_search,
            maximizer: config.maximizer,
        }
    }

    pub fn shredder(&self, bounds: Bounds) -> Result<Shredder> {
        Ok(Shredder::new(bounds.lower, bounds.upper, bounds.tolerance)?
            .with_edge_search(self.edge_search)
            .with_maximizer(self.maximizer))
    }
}

fn gather_f64(dst: &mut Vec<f64>, values: impl IntoIterator<Item = f32>) {
    dst.clear();
    dst.extend(values.into_iter().map(f64::from));
}

/// Condition means and replicate shape of one transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanShapeDraw {
    pub means: Vec<f32>,
    pub shape: f32,
}

pub struct ConditionMeanShape {
    ctx: GroupContext,
}

pub struct MeanShapeWorker {
    mean: Shredder,
    shape: Shredder,
    xs: Vec<f64>,
    means: Vec<f64>,
    sample_means: Vec<f64>,
}

impl ConditionMeanShape {
    pub fn new(ctx: GroupContext) -> Self {
        Self { ctx }
    }
}

impl SamplerGroup for ConditionMeanShape {
    type Worker = MeanShapeWorker;
    type Unit = SmallRng;
    type Inputs = ModelState;
    type Output = MeanShapeDraw;

    fn name(&self) -> &'static str {
        "condition-mean-shape"
    }

    fn worker(&self) -> Result<MeanShapeWorker> {
        Ok(MeanShapeWorker {
            mean: self.ctx.shredder(MEAN_BOUNDS)?,
            shape: self.ctx.shredder(SHAPE_BOUNDS)?,
            xs: Vec::new(),
            means: Vec::new(),
            sample_means: Vec::new(),
        })
    }

    fn update(
        &self,
        w: &mut MeanShapeWorker,
        state: &ModelState,
        tid: usize,
        rng: &mut SmallRng,
        phase: Phase,
    ) -> Result<MeanShapeDraw> {
        let design = &self.ctx.design;
        let quant = state.quant.column(tid);
        let shape0 = f64::from(state.condition_shape[tid]);
        let prior = MeanShapeGamma::new(
            f64::from(state.experiment_mean[tid]),
            state.hyper.experiment_shape,
        );

        w.means.clear();
        for c in 0..design.num_conditions() {
            gather_f64(&mut w.xs, design.samples_of(c).iter().map(|&s| quant[s]));
            let objective = GammaMean {
                xs: &w.xs,
                shape: shape0,
                prior,
            };
            let x0 = f64::from(state.condition_mean[[c, tid]]);
            w.means.push(w.mean.draw(rng, &objective, x0, phase.optimize)?);
        }

        let shape = if phase.burnin {
            BURNIN_VARIANCE
        } else {
            gather_f64(&mut w.xs, quant.iter().copied());
            w.sample_means.clear();
            w.sample_means
                .extend(design.conditions().iter().map(|&c| w.means[c]));
            let objective = GammaShape {
                xs: &w.xs,
                means: &w.sample_means,
                prior: Gamma::new(
                    self.ctx.priors.condition_shape_alpha,
                    state.hyper.condition_shape_beta,
                ),
            };
            w.shape.draw(rng, &objective, shape0, phase.optimize)? as f32
        };

        Ok(MeanShapeDraw {
            means: w.means.iter().map(|&m| m as f32).collect(),
            shape,
        })
    }
}

/// Proportions and spread of one spliced transcription group.
#[derive(Debug, Clone, PartialEq)]
pub struct SpliceDraw {
    /// Conditions x group size.
    pub mu: Array2<f32>,
    pub sigma: Array1<f32>,
}

pub struct ConditionSplice {
    ctx: GroupContext,
}

pub struct SpliceWorker {
    mu: Shredder,
    sigma: Shredder,
    eta: Shredder,
    /// Within-group proportion per sample for the transcript being updated.
    xs: Vec<f64>,
    condition_xs: Vec<f64>,
    centers: Vec<f64>,
    offsets: Vec<f64>,
    residuals: Vec<f64>,
}

impl ConditionSplice {
    pub fn new(ctx: GroupContext) -> Self {
        Self { ctx }
    }
}

impl SamplerGroup for ConditionSplice {
    type Worker = SpliceWorker;
    type Unit = SmallRng;
    type Inputs = ModelState;
    type Output = SpliceDraw;

    fn name(&self) -> &'static str {
        "condition-splice"
    }

    fn worker(&self) -> Result<SpliceWorker> {
        Ok(SpliceWorker {
            mu: self.ctx.shredder(SPLICE_MU_BOUNDS)?,
            sigma: self.ctx.shredder(SPLICE_SIGMA_BOUNDS)?,
            eta: self.ctx.shredder(SPLICE_ETA_BOUNDS)?,
            xs: Vec::new(),
            condition_xs: Vec::new(),
            centers: Vec::new(),
            offsets: Vec::new(),
            residuals: Vec::new(),
        })
    }

    fn update(
        &self,
        w: &mut SpliceWorker,
        state: &ModelState,
        j: usize,
        rng: &mut SmallRng,
        phase: Phase,
    ) -> Result<SpliceDraw> {
        let design = &self.ctx.design;
        let priors = &self.ctx.priors;
        let tids = design.spliced_tids(j);
        let conditions = design.conditions();

        let totals: Vec<f64> = state
            .quant
            .rows()
            .into_iter()
            .map(|row| tids.iter().map(|&t| f64::from(row[t])).sum())
            .collect();

        let mut mu = state.condition_splice_mu[j].clone();
        let mut sigma = state.condition_splice_sigma[j].clone();
        let experiment_mu = &state.experiment_splice_mu[j];
        let sigma_prior = Gamma::new(priors.condition_splice_alpha, state.hyper.condition_splice_beta);

        for (k, &tid) in tids.iter().enumerate() {
            let mu_prior = StudentT::new(
                priors.experiment_splice_nu,
                f64::from(experiment_mu[k]),
                state.hyper.experiment_splice_sigma,
            );
            w.xs.clear();
            w.xs.extend(
                state
                    .quant
                    .column(tid)
                    .iter()
                    .zip(&totals)
                    .map(|(&q, &total)| f64::from(q) / total),
            );

            // Rescale proportions and spread jointly.
            w.centers.clear();
            w.offsets.clear();
            for c in 0..design.num_conditions() {
                let samples = design.samples_of(c);
                let center = samples.iter().map(|&s| w.xs[s]).sum::<f64>() / samples.len() as f64;
                w.centers.push(center);
                w.offsets.push(f64::from(mu[[c, k]]) - center);
            }
            let base_sigma = f64::from(sigma[k]);
            let objective = SpliceEta {
                xs: &w.xs,
                conditions,
                centers: &w.centers,
                offsets: &w.offsets,
                sigma: base_sigma,
                mu_prior,
                sigma_prior,
            };
            let eta = w.eta.draw(rng, &objective, 1.0, phase.optimize)?;
            sigma[k] = (base_sigma * eta.abs()) as f32;
            for c in 0..design.num_conditions() {
                mu[[c, k]] = (eta * w.offsets[c] + w.centers[c]) as f32;
            }

            for c in 0..design.num_conditions() {
                w.condition_xs.clear();
                w.condition_xs
                    .extend(design.samples_of(c).iter().map(|&s| w.xs[s]));
                let objective = NormalMu {
                    xs: &w.condition_xs,
                    sigma: f64::from(sigma[k]),
                    prior: mu_prior,
                };
                mu[[c, k]] = w
                    .mu
                    .draw(rng, &objective, f64::from(mu[[c, k]]), phase.optimize)?
                    as f32;
            }

            sigma[k] = if phase.burnin {
                BURNIN_VARIANCE
            } else {
                w.residuals.clear();
                w.residuals.extend(
                    w.xs.iter()
                        .zip(conditions)
                        .map(|(&x, &c)| x - f64::from(mu[[c, k]])),
                );
                let objective = NormalSigma {
                    residuals: &w.residuals,
                    prior: sigma_prior,
                };
                let s = w
                    .sigma
                    .draw(rng, &objective, f64::from(sigma[k]), phase.optimize)?;
                s.max(priors.min_splice_sigma) as f32
            };
        }

        Ok(SpliceDraw { mu, sigma })
    }
}

pub struct ExperimentMean {
    ctx: GroupContext,
}

pub struct ExperimentMeanWorker {
    mean: Shredder,
    xs: Vec<f64>,
}

impl ExperimentMean {
    pub fn new(ctx: GroupContext) -> Self {
        Self { ctx }
    }
}

impl SamplerGroup for ExperimentMean {
    type Worker = ExperimentMeanWorker;
    type Unit = SmallRng;
    type Inputs = ModelState;
    type Output = f32;

    fn name(&self) -> &'static str {
        "experiment-mean"
    }

    fn worker(&self) -> Result<ExperimentMeanWorker> {
        Ok(ExperimentMeanWorker {
            mean: self.ctx.shredder(MEAN_BOUNDS)?,
            xs: Vec::new(),
        })
    }

    fn update(
        &self,
        w: &mut ExperimentMeanWorker,
        state: &ModelState,
        tid: usize,
        rng: &mut SmallRng,
        phase: Phase,
    ) -> Result<f32> {
        gather_f64(&mut w.xs, state.condition_mean.column(tid).iter().copied());
        let objective = GammaMean {
            xs: &w.xs,
            shape: state.hyper.experiment_shape,
            prior: MeanShapeGamma::new(
                self.ctx.priors.experiment_mean0,
                self.ctx.priors.experiment_mean_shape0,
            ),
        };
        let x0 = f64::from(state.experiment_mean[tid]);
        Ok(w.mean.draw(rng, &objective, x0, phase.optimize)? as f32)
    }
}

pub struct ExperimentSplice {
    ctx: GroupContext,
}

pub struct ExperimentSpliceWorker {
    mu: Shredder,
    xs: Vec<f64>,
}

impl ExperimentSplice {
    pub fn new(ctx: GroupContext) -> Self {
        Self { ctx }
    }
}

impl SamplerGroup for ExperimentSplice {
    type Worker = ExperimentSpliceWorker;
    type Unit = SmallRng;
    type Inputs = ModelState;
    type Output = Array1<f32>;

    fn name(&self) -> &'static str {
        "experiment-splice"
    }

    fn worker(&self) -> Result<ExperimentSpliceWorker> {
        Ok(ExperimentSpliceWorker {
            mu: self.ctx.shredder(SPLICE_MU_BOUNDS)?,
            xs: Vec::new(),
        })
    }

    fn update(
        &self,
        w: &mut ExperimentSpliceWorker,
        state: &ModelState,
        j: usize,
        rng: &mut SmallRng,
        phase: Phase,
    ) -> Result<Array1<f32>> {
        let priors = &self.ctx.priors;
        let condition_mu = &state.condition_splice_mu[j];
        let mut mu = state.experiment_splice_mu[j].clone();
        let prior = Normal::new(priors.experiment_splice_mu0, priors.experiment_splice_sigma0);

        for (k, value) in mu.iter_mut().enumerate() {
            gather_f64(&mut w.xs, condition_mu.column(k).iter().copied());
            let objective = StudentTMu {
                xs: &w.xs,
                nu: priors.experiment_splice_nu,
                sigma: state.hyper.experiment_splice_sigma,
                prior,
            };
            *value = w
                .mu
                .draw(rng, &objective, f64::from(*value), phase.optimize)? as f32;
        }
        Ok(mu)
    }
}
