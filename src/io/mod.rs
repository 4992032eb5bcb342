/*!
Destinations for the samples produced by [`crate::analyze::Analyze::run`].

A [`SampleSink`] receives the optimized state as sample 0 followed by every
stationary sample. [`MemorySink`] keeps them all, [`PosteriorSummary`] keeps
running moments only, and `csv::CsvSink` (feature `csv`) streams them to a
file.
*/

#[cfg(feature = "csv")]
pub mod csv;

use ndarray::Array1;

use crate::design::Design;
use crate::error::Result;
use crate::state::ModelState;
use crate::stats::RunningMoments;

pub trait SampleSink {
    fn write(&mut self, sample_num: usize, state: &ModelState) -> Result<()>;
}

/// Writes every sample to both sinks.
impl<A: SampleSink, B: SampleSink> SampleSink for (A, B) {
    fn write(&mut self, sample_num: usize, state: &ModelState) -> Result<()> {
        self.0.write(sample_num, state)?;
        self.1.write(sample_num, state)
    }
}

impl<S: SampleSink + ?Sized> SampleSink for &mut S {
    fn write(&mut self, sample_num: usize, state: &ModelState) -> Result<()> {
        (**self).write(sample_num, state)
    }
}

/// Keeps a copy of every sample.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    samples: Vec<(usize, ModelState)>,
}

impl MemorySink {
    pub fn samples(&self) -> &[(usize, ModelState)] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<(usize, ModelState)> {
        self.samples
    }
}

impl SampleSink for MemorySink {
    fn write(&mut self, sample_num: usize, state: &ModelState) -> Result<()> {
        self.samples.push((sample_num, state.clone()));
        Ok(())
    }
}

fn to_f64<'a>(xs: impl IntoIterator<Item = &'a f32>) -> Array1<f64> {
    xs.into_iter().map(|&x| f64::from(x)).collect()
}

/// Posterior means and standard deviations of the transcript-level parameters.
///
/// The optimized state (sample 0) is not part of the summary.
#[derive(Debug, Clone)]
pub struct PosteriorSummary {
    condition_mean: Vec<RunningMoments>,
    condition_shape: RunningMoments,
    experiment_mean: RunningMoments,
}

impl PosteriorSummary {
    pub fn new(design: &Design) -> Self {
        let n = design.num_transcripts();
        Self {
            condition_mean: (0..design.num_conditions())
                .map(|_| RunningMoments::new(n))
                .collect(),
            condition_shape: RunningMoments::new(n),
            experiment_mean: RunningMoments::new(n),
        }
    }

    /// Number of samples summarized.
    pub fn count(&self) -> usize {
        self.experiment_mean.count()
    }

    pub fn condition_mean(&self, condition: usize) -> &RunningMoments {
        &self.condition_mean[condition]
    }

    pub fn condition_shape(&self) -> &RunningMoments {
        &self.condition_shape
    }

    pub fn experiment_mean(&self) -> &RunningMoments {
        &self.experiment_mean
    }
}

impl SampleSink for PosteriorSummary {
    fn write(&mut self, sample_num: usize, state: &ModelState) -> Result<()> {
        if sample_num == 0 {
            return Ok(());
        }
        for (moments, row) in self
            .condition_mean
            .iter_mut()
            .zip(state.condition_mean.rows())
        {
            moments.push(&to_f64(&row))?;
        }
        self.condition_shape
            .push(&to_f64(state.condition_shape.iter()))?;
        self.experiment_mean
            .push(&to_f64(state.experiment_mean.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn design() -> Design {
        let mut b = Design::builder(3);
        b.add_sample("a");
        b.add_sample("b");
        b.build().unwrap()
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let design = design();
        let mut sink = MemorySink::default();
        let mut state = ModelState::initial(&design, 2.0);
        sink.write(0, &state).unwrap();
        Arc::make_mut(&mut state.experiment_mean)[1] = 0.5;
        sink.write(1, &state).unwrap();

        let samples = sink.into_samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].0, 1);
        // Earlier samples are unaffected by later writes to the state.
        assert_ne!(samples[0].1.experiment_mean[1], 0.5);
        assert_eq!(samples[1].1.experiment_mean[1], 0.5);
    }

    #[test]
    fn test_posterior_summary_skips_optimized_state() {
        let design = design();
        let mut summary = PosteriorSummary::new(&design);
        let mut state = ModelState::initial(&design, 2.0);
        Arc::make_mut(&mut state.experiment_mean).fill(100.0);
        summary.write(0, &state).unwrap();

        for (i, x) in [0.1f32, 0.2, 0.3].iter().enumerate() {
            Arc::make_mut(&mut state.experiment_mean).fill(*x);
            Arc::make_mut(&mut state.condition_mean).row_mut(1).fill(2.0 * x);
            summary.write(i + 1, &state).unwrap();
        }
        assert_eq!(summary.count(), 3);
        assert_relative_eq!(summary.experiment_mean().mean()[2], 0.2, epsilon = 1e-6);
        assert_relative_eq!(summary.condition_mean(1).mean()[0], 0.4, epsilon = 1e-6);
        assert_relative_eq!(summary.experiment_mean().std()[0], 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_pair_sink_writes_both() {
        let design = design();
        let state = ModelState::initial(&design, 2.0);
        let mut pair = (MemorySink::default(), PosteriorSummary::new(&design));
        pair.write(0, &state).unwrap();
        pair.write(1, &state).unwrap();
        assert_eq!(pair.0.samples().len(), 2);
        assert_eq!(pair.1.count(), 1);
    }
}
