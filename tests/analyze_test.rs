//! End-to-end runs of the hierarchical sampler on simulated experiments.

use shredder::analyze::Analyze;
use shredder::config::AnalyzeConfig;
use shredder::groups::{MEAN_BOUNDS, SHAPE_BOUNDS, SPLICE_MU_BOUNDS};
use shredder::io::{MemorySink, PosteriorSummary};
use shredder::simulate::{SimulatedData, Simulation};
use shredder::state::ModelState;

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> SimulatedData {
        Simulation {
            num_transcripts: 30,
            num_conditions: 2,
            replicates: 3,
            tgroup_size: 3,
            depth: 1e5,
            seed: 17,
            ..Simulation::default()
        }
        .generate()
        .unwrap()
    }

    fn config(threads: usize) -> AnalyzeConfig {
        AnalyzeConfig {
            seed: 5,
            optimize_rounds: 3,
            burnin: 5,
            num_samples: 20,
            threads,
            block_size: 7,
            queue_capacity: 2,
            progress: false,
            ..AnalyzeConfig::default()
        }
    }

    fn run(threads: usize) -> (SimulatedData, Vec<(usize, ModelState)>, PosteriorSummary) {
        let data = data();
        let mut analyze =
            Analyze::new(config(threads), data.design.clone(), data.quantifiers(1)).unwrap();
        let mut sink = (MemorySink::default(), PosteriorSummary::new(&data.design));
        analyze.run(&mut sink).unwrap();
        analyze.shutdown().unwrap();
        let (memory, summary) = sink;
        (data, memory.into_samples(), summary)
    }

    fn within(x: f32, lower: f64, upper: f64) -> bool {
        x >= lower as f32 && x <= upper as f32
    }

    #[test]
    fn test_states_stay_finite_and_in_domain() {
        let (data, samples, summary) = run(3);
        assert_eq!(samples.len(), 1 + 15);
        assert_eq!(summary.count(), 15);
        let min_sigma = config(3).priors.min_splice_sigma as f32;

        for (num, state) in &samples {
            assert!(state.is_finite(), "sample {num} is not finite");
            assert!(state
                .condition_mean
                .iter()
                .all(|&m| within(m, MEAN_BOUNDS.lower, MEAN_BOUNDS.upper)));
            assert!(state
                .experiment_mean
                .iter()
                .all(|&m| within(m, MEAN_BOUNDS.lower, MEAN_BOUNDS.upper)));
            assert!(state
                .condition_shape
                .iter()
                .all(|&s| within(s, SHAPE_BOUNDS.lower, SHAPE_BOUNDS.upper)));
            assert_eq!(state.condition_splice_mu.len(), data.design.num_spliced());
            for (mu, sigma) in state
                .condition_splice_mu
                .iter()
                .zip(state.condition_splice_sigma.iter())
            {
                assert!(mu
                    .iter()
                    .all(|&m| within(m, SPLICE_MU_BOUNDS.lower, SPLICE_MU_BOUNDS.upper)));
                assert!(sigma.iter().all(|&s| s >= min_sigma));
            }
            assert!(state.hyper.condition_shape_beta > 0.0);
            assert!(state.hyper.experiment_splice_sigma > 0.0);
        }
    }

    #[test]
    fn test_same_seed_same_result_for_any_thread_count() {
        let (_, one, _) = run(1);
        let (_, four, _) = run(4);
        assert_eq!(one.len(), four.len());
        for ((n1, s1), (n4, s4)) in one.iter().zip(&four) {
            assert_eq!(n1, n4);
            assert_eq!(s1, s4, "sample {n1} differs between thread counts");
        }
    }

    #[test]
    fn test_posterior_tracks_simulated_means() {
        let (data, _, summary) = run(2);
        for c in 0..data.design.num_conditions() {
            let estimated = summary.condition_mean(c).mean();
            let truth = data.condition_mean.row(c);
            let n = truth.len() as f64;
            let (me, mt) = (estimated.sum() / n, truth.sum() / n);
            let cov: f64 = estimated
                .iter()
                .zip(truth)
                .map(|(e, t)| (e - me) * (t - mt))
                .sum();
            let ve: f64 = estimated.iter().map(|e| (e - me).powi(2)).sum();
            let vt: f64 = truth.iter().map(|t| (t - mt).powi(2)).sum();
            let r = cov / (ve * vt).sqrt();
            assert!(r > 0.8, "condition {c}: correlation with truth {r}");
        }
    }
}
