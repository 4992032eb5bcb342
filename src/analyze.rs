/*!
Iteration orchestrator of the hierarchical model.

[`Analyze`] owns the model state, one [`WorkQueue`] per sampler group, and the
per-unit random number generators. Each call to [`Analyze::iterate`] runs one
Gibbs sweep:

1. the quantifier group draws new abundances for every sample while the
   driving thread updates the sequential hyperparameters,
2. abundances are written back and rescaled per sample,
3. the condition mean/shape and condition splicing groups run concurrently,
4. the experiment mean and experiment splicing groups run concurrently.

Between stages the driver blocks until every block of the running groups has
reported back, so each stage sees the complete output of the previous one.
*/

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::AnalyzeConfig;
use crate::design::Design;
use crate::distributions::Gamma;
use crate::error::{Result, ShredderError};
use crate::groups::{
    ConditionMeanShape, ConditionSplice, ExperimentMean, ExperimentSplice, GroupContext,
    RATE_BOUNDS, SPLICE_SIGMA_BOUNDS,
};
use crate::io::SampleSink;
use crate::model::{GammaRate, NormalSigma};
use crate::quantify::{QuantGroup, QuantInputs, Quantifier};
use crate::schedule::Phase;
use crate::scheduler::{seeded_rngs, WorkQueue};
use crate::shredder::Shredder;
use crate::state::{ModelState, MIN_ABUNDANCE};

/// Completion notifications received from each group during one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IterationReport {
    pub quant: usize,
    pub condition_mean_shape: usize,
    pub condition_splice: usize,
    pub experiment_mean: usize,
    pub experiment_splice: usize,
}

/// Samplers updated on the driving thread.
struct HyperSamplers {
    condition_shape_beta: Shredder,
    condition_splice_beta: Shredder,
    experiment_splice_sigma: Shredder,
    rng: SmallRng,
    xs: Vec<f64>,
}

pub struct Analyze {
    config: AnalyzeConfig,
    design: Arc<Design>,
    state: ModelState,
    quantifiers: Vec<Box<dyn Quantifier>>,
    /// One generator per transcript.
    transcript_rngs: Vec<SmallRng>,
    /// One generator per spliced transcription group.
    splice_rngs: Vec<SmallRng>,
    hyper: HyperSamplers,
    quant: WorkQueue<QuantGroup>,
    condition_mean_shape: WorkQueue<ConditionMeanShape>,
    condition_splice: WorkQueue<ConditionSplice>,
    experiment_mean: WorkQueue<ExperimentMean>,
    experiment_splice: WorkQueue<ExperimentSplice>,
}

impl Analyze {
    /// Sets up the worker pools for `design`, with one quantifier per sample.
    pub fn new(
        config: AnalyzeConfig,
        design: Design,
        quantifiers: Vec<Box<dyn Quantifier>>,
    ) -> Result<Self> {
        config.validate()?;
        if quantifiers.len() != design.num_samples() {
            return Err(ShredderError::DimensionMismatch {
                what: "quantifiers",
                expected: design.num_samples(),
                found: quantifiers.len(),
            });
        }
        if let Some(q) = quantifiers
            .iter()
            .find(|q| q.num_transcripts() != design.num_transcripts())
        {
            return Err(ShredderError::DimensionMismatch {
                what: "quantifier transcripts",
                expected: design.num_transcripts(),
                found: q.num_transcripts(),
            });
        }

        let design = Arc::new(design);
        let ctx = GroupContext::new(Arc::clone(&design), &config);
        let (threads, block, cap) = (config.threads, config.block_size, config.queue_capacity);
        let (n, s) = (design.num_transcripts(), design.num_spliced());

        let seed = config.seed;
        let hyper = HyperSamplers {
            condition_shape_beta: ctx.shredder(RATE_BOUNDS)?,
            condition_splice_beta: ctx.shredder(RATE_BOUNDS)?,
            experiment_splice_sigma: ctx.shredder(SPLICE_SIGMA_BOUNDS)?,
            rng: SmallRng::seed_from_u64(seed.wrapping_add((s + n) as u64)),
            xs: Vec::new(),
        };

        debug!(
            samples = design.num_samples(),
            conditions = design.num_conditions(),
            transcripts = n,
            spliced_tgroups = s,
            threads,
            "setting up sampler groups"
        );

        Ok(Self {
            state: ModelState::initial(&design, config.priors.experiment_shape),
            quantifiers,
            splice_rngs: seeded_rngs(seed, 0, s),
            transcript_rngs: seeded_rngs(seed, s as u64, n),
            hyper,
            quant: WorkQueue::new(QuantGroup::new(Arc::clone(&design)), threads, block, cap)?,
            condition_mean_shape: WorkQueue::new(
                ConditionMeanShape::new(ctx.clone()),
                threads,
                block,
                cap,
            )?,
            condition_splice: WorkQueue::new(ConditionSplice::new(ctx.clone()), threads, block, cap)?,
            experiment_mean: WorkQueue::new(ExperimentMean::new(ctx.clone()), threads, block, cap)?,
            experiment_splice: WorkQueue::new(ExperimentSplice::new(ctx), threads, block, cap)?,
            design,
            config,
        })
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn design(&self) -> &Design {
        &self.design
    }

    pub fn config(&self) -> &AnalyzeConfig {
        &self.config
    }

    /// Runs one full Gibbs sweep.
    ///
    /// On error the per-unit state of the failing stage is lost and the
    /// orchestrator must not be iterated again.
    pub fn iterate(&mut self, phase: Phase) -> Result<IterationReport> {
        let mut report = IterationReport::default();

        let inputs = Arc::new(QuantInputs::new(&self.state, &self.design));
        let pending = self
            .quant
            .scatter(inputs, std::mem::take(&mut self.quantifiers), phase)?;
        let hyper = self.sample_hyperparameters(phase);
        let gathered = self.quant.gather(pending)?;
        self.state.hyper = hyper?;
        self.quantifiers = gathered.units;
        report.quant = gathered.notifications;

        {
            let quant = Arc::make_mut(&mut self.state.quant);
            for (mut row, values) in quant.rows_mut().into_iter().zip(&gathered.outputs) {
                row.iter_mut().zip(values).for_each(|(q, &x)| *q = x);
            }
        }
        self.compute_scaling();

        // Condition level.
        let snapshot = Arc::new(self.state.clone());
        let mean_shape = self.condition_mean_shape.scatter(
            Arc::clone(&snapshot),
            std::mem::take(&mut self.transcript_rngs),
            phase,
        )?;
        let splice = self.condition_splice.scatter(
            Arc::clone(&snapshot),
            std::mem::take(&mut self.splice_rngs),
            phase,
        )?;
        drop(snapshot);
        let mean_shape = self.condition_mean_shape.gather(mean_shape);
        let splice = self.condition_splice.gather(splice);
        let (mean_shape, splice) = (mean_shape?, splice?);

        self.transcript_rngs = mean_shape.units;
        self.splice_rngs = splice.units;
        report.condition_mean_shape = mean_shape.notifications;
        report.condition_splice = splice.notifications;
        {
            let means = Arc::make_mut(&mut self.state.condition_mean);
            let shapes = Arc::make_mut(&mut self.state.condition_shape);
            for (tid, draw) in mean_shape.outputs.into_iter().enumerate() {
                for (c, m) in draw.means.into_iter().enumerate() {
                    means[[c, tid]] = m;
                }
                shapes[tid] = draw.shape;
            }
        }
        {
            let (mu, sigma): (Vec<_>, Vec<_>) =
                splice.outputs.into_iter().map(|d| (d.mu, d.sigma)).unzip();
            self.state.condition_splice_mu = Arc::new(mu);
            self.state.condition_splice_sigma = Arc::new(sigma);
        }

        // Experiment level.
        let snapshot = Arc::new(self.state.clone());
        let means = self.experiment_mean.scatter(
            Arc::clone(&snapshot),
            std::mem::take(&mut self.transcript_rngs),
            phase,
        )?;
        let splice = self.experiment_splice.scatter(
            Arc::clone(&snapshot),
            std::mem::take(&mut self.splice_rngs),
            phase,
        )?;
        drop(snapshot);
        let means = self.experiment_mean.gather(means);
        let splice = self.experiment_splice.gather(splice);
        let (means, splice) = (means?, splice?);

        self.transcript_rngs = means.units;
        self.splice_rngs = splice.units;
        report.experiment_mean = means.notifications;
        report.experiment_splice = splice.notifications;
        self.state.experiment_mean = Arc::new(Array1::from(means.outputs));
        self.state.experiment_splice_mu = Arc::new(splice.outputs);

        Ok(report)
    }

    /// Runs the whole schedule, writing the optimized state as sample 0
    /// followed by every stationary sample.
    pub fn run<S: SampleSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        let schedule = self.config.schedule();
        info!(
            optimize_rounds = schedule.optimize_rounds,
            burnin = schedule.burnin,
            num_samples = schedule.num_samples,
            "starting analysis"
        );
        let started = Instant::now();

        let multi = MultiProgress::with_draw_target(if self.config.progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        });
        let style = ProgressStyle::default_bar()
            .template("{prefix:>10} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .map_err(|e| ShredderError::InvalidConfig(e.to_string()))?
            .progress_chars("##-");
        let optimize_bar = multi.add(ProgressBar::new(schedule.optimize_rounds as u64));
        optimize_bar.set_style(style.clone());
        optimize_bar.set_prefix("Optimizing");
        let sample_bar = multi.add(ProgressBar::new(schedule.num_samples as u64));
        sample_bar.set_style(style);
        sample_bar.set_prefix("Sampling");

        let mut sample_num = 0;
        if schedule.optimize_rounds == 0 {
            optimize_bar.finish_and_clear();
            sink.write(sample_num, &self.state)?;
            sample_num += 1;
        }
        for (iteration, phase) in schedule.phases().enumerate() {
            let tick = Instant::now();
            let report = self.iterate(phase)?;
            debug!(iteration, ?phase, ?report, elapsed = ?tick.elapsed(), "iteration done");

            if phase.optimize {
                optimize_bar.inc(1);
                if iteration + 1 == schedule.optimize_rounds {
                    optimize_bar.finish_with_message("Done!");
                    sink.write(sample_num, &self.state)?;
                    sample_num += 1;
                }
                continue;
            }
            sample_bar.inc(1);
            if phase.is_stationary() {
                sink.write(sample_num, &self.state)?;
                sample_num += 1;
            }
        }
        sample_bar.finish_with_message("Done!");

        info!(samples = sample_num, elapsed = ?started.elapsed(), "analysis finished");
        Ok(())
    }

    /// Stops every worker pool.
    pub fn shutdown(self) -> Result<()> {
        self.quant.shutdown()?;
        self.condition_mean_shape.shutdown()?;
        self.condition_splice.shutdown()?;
        self.experiment_mean.shutdown()?;
        self.experiment_splice.shutdown()
    }

    fn sample_hyperparameters(&mut self, phase: Phase) -> Result<crate::state::Hyperparameters> {
        let priors = self.config.priors;
        let mut hyper = self.state.hyper;
        let h = &mut self.hyper;

        h.xs.clear();
        h.xs.extend(self.state.condition_shape.iter().map(|&x| f64::from(x)));
        let objective = GammaRate {
            xs: &h.xs,
            alpha: priors.condition_shape_alpha,
            prior: Gamma::new(priors.condition_shape_beta_a, priors.condition_shape_beta_b),
        };
        hyper.condition_shape_beta = h.condition_shape_beta.draw(
            &mut h.rng,
            &objective,
            hyper.condition_shape_beta,
            phase.optimize,
        )?;

        if self.design.num_spliced() > 0 {
            h.xs.clear();
            h.xs.extend(
                self.state
                    .condition_splice_sigma
                    .iter()
                    .flatten()
                    .map(|&x| f64::from(x)),
            );
            let objective = GammaRate {
                xs: &h.xs,
                alpha: priors.condition_splice_alpha,
                prior: Gamma::new(priors.condition_splice_beta_a, priors.condition_splice_beta_b),
            };
            hyper.condition_splice_beta = h.condition_splice_beta.draw(
                &mut h.rng,
                &objective,
                hyper.condition_splice_beta,
                phase.optimize,
            )?;

            h.xs.clear();
            for (mu, experiment_mu) in self
                .state
                .condition_splice_mu
                .iter()
                .zip(self.state.experiment_splice_mu.iter())
            {
                for row in mu.rows() {
                    h.xs.extend(
                        row.iter()
                            .zip(experiment_mu)
                            .map(|(&m, &e)| f64::from(m) - f64::from(e)),
                    );
                }
            }
            let objective = NormalSigma {
                residuals: &h.xs,
                prior: Gamma::new(
                    priors.experiment_splice_sigma_alpha,
                    priors.experiment_splice_sigma_beta,
                ),
            };
            hyper.experiment_splice_sigma = h.experiment_splice_sigma.draw(
                &mut h.rng,
                &objective,
                hyper.experiment_splice_sigma,
                phase.optimize,
            )?;
        }

        hyper.experiment_shape = priors.experiment_shape;
        Ok(hyper)
    }

    /// Normalizes every sample by an upper quantile of its abundances,
    /// relative to the first sample.
    fn compute_scaling(&mut self) {
        let quant = Arc::make_mut(&mut self.state.quant);
        let n = quant.ncols();
        if n == 0 {
            return;
        }
        let effective = n.min(self.config.scaling.truncation);
        let point = (n - effective + (self.config.scaling.quantile * effective as f64) as usize)
            .min(n - 1);

        let mut work: Vec<f32> = Vec::with_capacity(n);
        let mut quantiles: Vec<f64> = Vec::with_capacity(quant.nrows());
        for row in quant.rows() {
            work.clear();
            work.extend(row.iter().copied());
            work.sort_unstable_by(f32::total_cmp);
            quantiles.push(f64::from(work[point].max(MIN_ABUNDANCE)));
        }

        let reference = quantiles.first().copied().unwrap_or(1.0);
        for ((mut row, q), scale) in quant
            .rows_mut()
            .into_iter()
            .zip(&quantiles)
            .zip(self.state.scale.iter_mut())
        {
            *scale = reference / q;
            let factor = *scale as f32;
            row.mapv_inplace(|x| (x * factor).max(MIN_ABUNDANCE));
        }
    }
}
