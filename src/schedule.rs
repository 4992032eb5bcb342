//! Phase flags of a sampling run and the order in which they change.

/// Flags broadcast to every worker with each block of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Phase {
    /// Find modes instead of drawing samples.
    pub optimize: bool,
    /// Force variance parameters to fixed values while the chain settles.
    pub burnin: bool,
    /// Upstream quantifiers apply the hierarchical prior.
    pub priors: bool,
}

impl Phase {
    pub fn is_stationary(&self) -> bool {
        !self.optimize && !self.burnin
    }
}

/// Iteration counts of a run.
///
/// A run is `optimize_rounds` optimization iterations followed by
/// `num_samples` sampling iterations, the first `burnin` of which are burn-in.
/// Burn-in also covers the optimization iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub optimize_rounds: usize,
    pub burnin: usize,
    pub num_samples: usize,
    /// Keep the hierarchical prior switched off for the whole run.
    pub nopriors: bool,
}

impl Schedule {
    pub fn total_iterations(&self) -> usize {
        self.optimize_rounds + self.num_samples
    }

    /// Number of iterations whose state is written out after the optimized state.
    pub fn stationary_iterations(&self) -> usize {
        self.num_samples.saturating_sub(self.burnin)
    }

    /// Flags for iteration `iteration` (zero-based).
    pub fn phase(&self, iteration: usize) -> Phase {
        let optimize = iteration < self.optimize_rounds;
        Phase {
            optimize,
            burnin: iteration < self.optimize_rounds + self.burnin,
            priors: !optimize && !self.nopriors,
        }
    }

    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        (0..self.total_iterations()).map(move |i| self.phase(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> Schedule {
        Schedule {
            optimize_rounds: 3,
            burnin: 2,
            num_samples: 5,
            nopriors: false,
        }
    }

    #[test]
    fn test_phase_boundaries() {
        let s = schedule();
        let phases: Vec<Phase> = s.phases().collect();
        assert_eq!(phases.len(), 8);
        for (i, p) in phases.iter().enumerate() {
            match i {
                0..=2 => assert!(p.optimize && p.burnin && !p.priors, "iteration {i}: {p:?}"),
                3..=4 => assert!(!p.optimize && p.burnin && p.priors, "iteration {i}: {p:?}"),
                _ => assert!(p.is_stationary() && p.priors, "iteration {i}: {p:?}"),
            }
        }
        assert_eq!(s.stationary_iterations(), 3);
    }

    #[test]
    fn test_flags_never_flip_back() {
        let s = Schedule {
            optimize_rounds: 4,
            burnin: 7,
            num_samples: 20,
            nopriors: false,
        };
        let phases: Vec<Phase> = s.phases().collect();
        for pair in phases.windows(2) {
            assert!(pair[0].optimize || !pair[1].optimize);
            assert!(pair[0].burnin || !pair[1].burnin);
            assert!(!pair[0].priors || pair[1].priors);
        }
    }

    #[test]
    fn test_nopriors() {
        let s = Schedule {
            nopriors: true,
            ..schedule()
        };
        assert!(s.phases().all(|p| !p.priors));
    }
}
