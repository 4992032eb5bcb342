/*!
Independent slice-sampling chains over a single objective.

This is the standalone use of [`Shredder`]: a [`SliceChain`] repeatedly
draws from one log-density, and a [`SliceSampler`] runs several such chains
in parallel (via [`ChainRunner`]) for convergence diagnostics.

```rust
use shredder::core::{ChainRunner, SliceSampler};
use shredder::Shredder;

// Standard normal truncated to [-5, 5].
let target = |x: f64| (-0.5 * x * x, -x);
let shredder = Shredder::new(-5.0, 5.0, 1e-6)?;
let mut sampler = SliceSampler::new(target, shredder, 0.0, 4).set_seed(42);
let chains = sampler.run(1_000, 100)?;
assert_eq!(chains.len(), 4);
assert_eq!(chains[0].dim(), (900, 1));
# Ok::<(), shredder::ShredderError>(())
```
*/

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::{s, stack, Array2, Array3, ArrayView2, Axis};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::{Result, ShredderError};
use crate::objective::Objective;
use crate::shredder::Shredder;

pub trait MarkovChain {
    /// Does one iteration of the chain, returning the new current state.
    fn step(&mut self) -> Result<&[f64]>;

    fn current_state(&self) -> &[f64];
}

/// Runs `chain` for `n_steps` and collects the states, one row per step.
pub fn run_chain<M: MarkovChain + ?Sized>(chain: &mut M, n_steps: usize) -> Result<Array2<f64>> {
    run_chain_with_progress(chain, n_steps, &ProgressBar::hidden())
}

pub fn run_chain_with_progress<M: MarkovChain + ?Sized>(
    chain: &mut M,
    n_steps: usize,
    pb: &ProgressBar,
) -> Result<Array2<f64>> {
    let dim = chain.current_state().len();
    let mut out = Array2::zeros((n_steps, dim));
    pb.set_length(n_steps as u64);

    for mut row in out.rows_mut() {
        let state = chain.step()?;
        row.iter_mut().zip(state).for_each(|(r, &x)| *r = x);
        pb.inc(1);
    }
    Ok(out)
}

/// Anything that owns multiple [`MarkovChain`]s.
pub trait HasChains {
    type Chain: MarkovChain + Send;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain>;
}

fn discard_rows(samples: Array2<f64>, discard: usize) -> Array2<f64> {
    let discard = discard.min(samples.nrows());
    samples.slice(s![discard.., ..]).to_owned()
}

pub trait ChainRunner: HasChains {
    /// Runs the chains in parallel, discarding the first `discard` states of each.
    fn run(&mut self, n_steps: usize, discard: usize) -> Result<Vec<Array2<f64>>> {
        self.chains_mut()
            .par_iter_mut()
            .map(|chain| Ok(discard_rows(run_chain(chain, n_steps)?, discard)))
            .collect()
    }

    fn run_with_progress(&mut self, n_steps: usize, discard: usize) -> Result<Vec<Array2<f64>>> {
        let multi = MultiProgress::new();
        let pb_style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .map_err(|e| ShredderError::InvalidConfig(e.to_string()))?
            .progress_chars("##-");

        self.chains_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, chain)| {
                let pb = multi.add(ProgressBar::new(n_steps as u64));
                pb.set_prefix(format!("Chain {i}"));
                pb.set_style(pb_style.clone());
                let samples = run_chain_with_progress(chain, n_steps, &pb)?;
                pb.finish_with_message("Done!");
                Ok(discard_rows(samples, discard))
            })
            .collect()
    }
}

impl<T: HasChains> ChainRunner for T {}

/// Stacks per-chain draws into a chains x samples x dimensions array.
pub fn stack_chains(chains: &[Array2<f64>]) -> Result<Array3<f64>> {
    let views: Vec<ArrayView2<f64>> = chains.iter().map(|c| c.view()).collect();
    stack(Axis(0), &views).map_err(|e| ShredderError::InvalidConfig(format!("stacking chains: {e}")))
}

/// A univariate chain drawing from one objective with slice sampling.
#[derive(Debug, Clone)]
pub struct SliceChain<O> {
    pub objective: O,
    pub shredder: Shredder,
    state: [f64; 1],
    rng: SmallRng,
}

impl<O: Objective> SliceChain<O> {
    pub fn new(objective: O, shredder: Shredder, initial: f64, seed: u64) -> Self {
        Self {
            objective,
            shredder,
            state: [initial],
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl<O: Objective> MarkovChain for SliceChain<O> {
    fn step(&mut self) -> Result<&[f64]> {
        self.state[0] = self
            .shredder
            .sample(&mut self.rng, &self.objective, self.state[0])?;
        Ok(&self.state)
    }

    fn current_state(&self) -> &[f64] {
        &self.state
    }
}

/// Several [`SliceChain`]s over clones of the same objective.
pub struct SliceSampler<O> {
    pub chains: Vec<SliceChain<O>>,
    pub seed: u64,
}

impl<O: Objective + Clone + Send> SliceSampler<O> {
    /// Creates `n_chains` chains starting at `initial`, seeded from the thread RNG.
    pub fn new(objective: O, shredder: Shredder, initial: f64, n_chains: usize) -> Self {
        let seed = rand::thread_rng().gen::<u64>();
        let chains = (0..n_chains)
            .map(|i| SliceChain::new(objective.clone(), shredder.clone(), initial, seed.wrapping_add(i as u64)))
            .collect();
        Self { chains, seed }
    }

    /// Reseeds chain `i` with `seed + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        for (i, chain) in self.chains.iter_mut().enumerate() {
            chain.rng = SmallRng::seed_from_u64(seed.wrapping_add(i as u64));
        }
        self
    }
}

impl<O: Objective + Send> HasChains for SliceSampler<O> {
    type Chain = SliceChain<O>;

    fn chains_mut(&mut self) -> &mut Vec<SliceChain<O>> {
        &mut self.chains
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::max_rhat;
    use approx::assert_abs_diff_eq;

    fn normal(x: f64) -> (f64, f64) {
        (-0.5 * (x - 1.0) * (x - 1.0), -(x - 1.0))
    }

    fn sampler(n_chains: usize, seed: u64) -> SliceSampler<fn(f64) -> (f64, f64)> {
        let shredder = Shredder::new(-10.0, 10.0, 1e-6).unwrap();
        SliceSampler::new(normal as fn(f64) -> (f64, f64), shredder, 0.0, n_chains).set_seed(seed)
    }

    #[test]
    fn test_run_shapes_and_discard() {
        let mut s = sampler(3, 1);
        let chains = s.run(50, 10).unwrap();
        assert_eq!(chains.len(), 3);
        assert!(chains.iter().all(|c| c.dim() == (40, 1)));

        let chains = s.run(5, 10).unwrap();
        assert!(chains.iter().all(|c| c.nrows() == 0));
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let a = sampler(2, 99).run(100, 0).unwrap();
        let b = sampler(2, 99).run(100, 0).unwrap();
        assert_eq!(a, b);
        assert_ne!(a[0], a[1]);
    }

    #[test]
    fn test_seeds_wrap_at_u64_max() {
        let mut s = sampler(3, u64::MAX);
        let chains = s.run(20, 0).unwrap();
        assert_eq!(chains.len(), 3);
        assert_eq!(chains[1], sampler(1, 0).run(20, 0).unwrap()[0]);
    }

    #[test]
    fn test_chains_converge() {
        let chains = sampler(4, 5).run(2_000, 200).unwrap();
        let draws = stack_chains(&chains).unwrap();
        assert_eq!(draws.dim(), (4, 1_800, 1));
        let mean = draws.mean().unwrap();
        assert_abs_diff_eq!(mean, 1.0, epsilon = 0.1);
        let rhat = max_rhat(draws.view()).unwrap();
        assert!(rhat < 1.05, "Got rhat {rhat}");
    }

    #[test]
    fn test_errors_propagate() {
        let shredder = Shredder::new(-1.0, 1.0, 1e-6).unwrap();
        let mut s = SliceSampler::new(|_: f64| (f64::NAN, 0.0), shredder, 0.0, 2).set_seed(0);
        assert!(s.run(10, 0).is_err());
    }
}
