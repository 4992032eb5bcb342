/*!
Bounded local maximization of a univariate [`Objective`].

The objective is handed to `argmin` as a minimization problem
([`MaximizationProblem`]: negated value, negated and clamped derivative).
The clamped derivative at the start point picks the uphill side of the
domain. If the objective is still rising at the far bound, that bound is the
maximum. Otherwise the uphill bracket is searched with argmin's bounded
Brent solver.

Termination is gated by the absolute parameter tolerance (Brent's bracket
test), the evaluation budget, and the absolute function tolerance: a start
whose first-order gain across the bracket is below `ftol_abs` is returned as
is.

# Example

```rust
use shredder::optimize::BoundedMaximizer;

let f = |x: f64| (-0.5 * (x - 2.0) * (x - 2.0), -(x - 2.0));
let optimum = BoundedMaximizer::default().maximize(&f, -10.0, 10.0, 0.0);
assert!((optimum.x - 2.0).abs() < 1e-4);
assert!(!optimum.status.is_failure());
```
*/

use argmin::core::{
    CostFunction, Error, Executor, Gradient, State, TerminationReason, TerminationStatus,
};
use argmin::solver::brent::BrentOpt;
use serde::Deserialize;

use crate::objective::Objective;

/// Settings of the bounded maximizer.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BoundedMaximizer {
    /// Upper bound on objective evaluations per call, including the start.
    pub max_evaluations: usize,
    /// Absolute function tolerance.
    pub ftol_abs: f64,
    /// Absolute parameter tolerance of the Brent search.
    pub xtol_abs: f64,
    /// Derivatives are clamped to `[-grad_clamp, grad_clamp]`.
    pub grad_clamp: f64,
}

impl Default for BoundedMaximizer {
    fn default() -> Self {
        Self {
            max_evaluations: 20,
            ftol_abs: 1e-7,
            xtol_abs: 1e-5,
            grad_clamp: 1e4,
        }
    }
}

/// Why the maximizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizeStatus {
    /// The derivative at the start vanished exactly.
    Stationary,
    /// The objective still rises at the uphill bound.
    AtBound,
    XtolReached,
    FtolReached,
    MaxEvaluations,
    /// The uphill bracket is already narrower than the parameter tolerance.
    RoundoffLimited,
    Failed(&'static str),
}

impl OptimizeStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, OptimizeStatus::Failed(_))
    }
}

/// Result of [`BoundedMaximizer::maximize`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Optimum {
    /// Best point seen, always inside `[lower, upper]`.
    pub x: f64,
    pub value: f64,
    pub evaluations: usize,
    pub status: OptimizeStatus,
}

/// An [`Objective`] posed as an argmin minimization problem.
///
/// The cost is `-f(x)`, or `+inf` where `f` is not finite so that the solver
/// treats those points as worse than any point of the support. The gradient
/// is `-f'(x)` clamped to `[-grad_clamp, grad_clamp]`.
pub struct MaximizationProblem<'a, O: ?Sized> {
    objective: &'a O,
    grad_clamp: f64,
}

impl<'a, O: Objective + ?Sized> MaximizationProblem<'a, O> {
    pub fn new(objective: &'a O, grad_clamp: f64) -> Self {
        Self {
            objective,
            grad_clamp,
        }
    }

    /// Cost and clamped cost gradient at `x`.
    pub fn evaluate(&self, x: f64) -> (f64, f64) {
        let (f, df) = self.objective.evaluate(x);
        let cost = if f.is_finite() { -f } else { f64::INFINITY };
        let grad = if df.is_nan() {
            df
        } else {
            (-df).clamp(-self.grad_clamp, self.grad_clamp)
        };
        (cost, grad)
    }
}

impl<O: Objective + ?Sized> CostFunction for MaximizationProblem<'_, O> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.evaluate(*x).0)
    }
}

impl<O: Objective + ?Sized> Gradient for MaximizationProblem<'_, O> {
    type Param = f64;
    type Gradient = f64;

    fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient, Error> {
        Ok(self.evaluate(*x).1)
    }
}

impl BoundedMaximizer {
    pub fn with_xtol(mut self, xtol_abs: f64) -> Self {
        self.xtol_abs = xtol_abs;
        self
    }

    /// Maximizes `objective` over `[lower, upper]` starting from `x0`.
    ///
    /// `x0` is clamped into the interval first (a NaN start is replaced by the
    /// midpoint). The returned point is the best finite point evaluated.
    pub fn maximize<O: Objective + ?Sized>(
        &self,
        objective: &O,
        lower: f64,
        upper: f64,
        x0: f64,
    ) -> Optimum {
        if !(lower <= upper) {
            return Optimum {
                x: x0,
                value: f64::NAN,
                evaluations: 0,
                status: OptimizeStatus::Failed("empty interval"),
            };
        }

        let problem = MaximizationProblem::new(objective, self.grad_clamp);
        let x0 = if x0.is_nan() {
            0.5 * (lower + upper)
        } else {
            x0.clamp(lower, upper)
        };
        let (cost0, grad0) = problem.evaluate(x0);
        let mut evaluations = 1;
        let start = move |status, evaluations| Optimum {
            x: x0,
            value: -cost0,
            evaluations,
            status,
        };
        if !cost0.is_finite() {
            return start(
                OptimizeStatus::Failed("objective is not finite at the starting point"),
                evaluations,
            );
        }

        // A negative cost gradient means the objective rises to the right.
        let (lo, hi, uphill_bound) = if grad0 < 0.0 {
            (x0, upper, Some(upper))
        } else if grad0 > 0.0 {
            (lower, x0, Some(lower))
        } else if grad0 == 0.0 {
            return start(OptimizeStatus::Stationary, evaluations);
        } else {
            (lower, upper, None)
        };

        if hi - lo <= self.xtol_abs {
            return start(OptimizeStatus::RoundoffLimited, evaluations);
        }
        if grad0.abs() * (hi - lo) < self.ftol_abs {
            return start(OptimizeStatus::FtolReached, evaluations);
        }

        if let Some(bound) = uphill_bound {
            if evaluations >= self.max_evaluations {
                return start(OptimizeStatus::MaxEvaluations, evaluations);
            }
            let (cost_b, grad_b) = problem.evaluate(bound);
            evaluations += 1;
            let still_rising = grad_b * grad0 > 0.0 || grad_b == 0.0;
            if cost_b.is_finite() && cost_b <= cost0 && still_rising {
                return Optimum {
                    x: bound,
                    value: -cost_b,
                    evaluations,
                    status: OptimizeStatus::AtBound,
                };
            }
        }

        // Brent evaluates once on initialization and once per iteration.
        if evaluations >= self.max_evaluations {
            return start(OptimizeStatus::MaxEvaluations, evaluations);
        }
        let max_iters = (self.max_evaluations - evaluations - 1) as u64;
        let solver = BrentOpt::new(lo, hi).set_tolerance(f64::EPSILON.sqrt(), self.xtol_abs);
        let result = Executor::new(problem, solver)
            .configure(|state| state.max_iters(max_iters))
            .run();
        let state = match result {
            Ok(result) => result.state().clone(),
            Err(_) => {
                return start(OptimizeStatus::Failed("bounded Brent search failed"), evaluations)
            }
        };

        evaluations += state
            .get_func_counts()
            .get("cost_count")
            .copied()
            .unwrap_or(0) as usize;
        let status = match state.get_termination_status() {
            TerminationStatus::Terminated(TerminationReason::SolverConverged) => {
                OptimizeStatus::XtolReached
            }
            TerminationStatus::Terminated(TerminationReason::MaxItersReached) => {
                OptimizeStatus::MaxEvaluations
            }
            _ => OptimizeStatus::Failed("bounded Brent search stopped early"),
        };

        match state.get_best_param().copied() {
            Some(x) if state.get_best_cost() < cost0 => Optimum {
                x: x.clamp(lower, upper),
                value: -state.get_best_cost(),
                evaluations,
                status,
            },
            _ => start(status, evaluations),
        }
    }
}
