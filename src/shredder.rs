/*!
A univariate slice sampler with Newton-accelerated edge search, and a bounded
optimizer over the same domain.

One [`Shredder`] is configured per kind of parameter (domain and tolerance)
and reused for every update of that kind; it keeps no state between calls.
Objectives are passed in per call.

# Example

```rust
use rand::rngs::SmallRng;
use rand::SeedableRng;
use shredder::Shredder;

let shredder = Shredder::new(-10.0, 10.0, 1e-5).unwrap();
let f = |x: f64| (-0.5 * (x - 2.0) * (x - 2.0), -(x - 2.0));

let mode = shredder.optimize(&f, 0.0).unwrap();
assert!((mode - 2.0).abs() < 1e-4);

let mut rng = SmallRng::seed_from_u64(42);
let draw = shredder.sample(&mut rng, &f, 0.0).unwrap();
assert!((-10.0..=10.0).contains(&draw));
```
*/

use rand::Rng;
use serde::Deserialize;
use tracing::warn;

use crate::error::{ensure_finite, Result, ShredderError};
use crate::objective::Objective;
use crate::optimize::{BoundedMaximizer, OptimizeStatus};

/// Floor applied to uniform draws before taking logarithms.
pub const ZERO_EPS: f64 = 1e-16;

/// Which end of the slice to search for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

/// Constants of the slice edge search.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct EdgeSearch {
    /// The edge is accepted once `|f(x) - slice_height|` is below this.
    pub lp_eps: f64,
    /// Derivatives smaller than this in magnitude are not used for Newton steps.
    pub d_eps: f64,
    /// Newton steps allowed per edge search before falling back to bisection.
    pub max_newton_steps: usize,
    /// Consecutive non-finite bisection points tolerated before giving up.
    pub max_bisections: usize,
}

impl Default for EdgeSearch {
    fn default() -> Self {
        Self {
            lp_eps: 1e-2,
            d_eps: 1e-3,
            max_newton_steps: 5,
            max_bisections: 50,
        }
    }
}

/// Univariate slice sampler and bounded optimizer on `[lower_limit, upper_limit]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Shredder {
    lower_limit: f64,
    upper_limit: f64,
    tolerance: f64,
    edge_search: EdgeSearch,
    maximizer: BoundedMaximizer,
}

impl Shredder {
    /// Creates a sampler on `[lower, upper]`.
    ///
    /// `tolerance` is the slice width below which sampling stops shrinking,
    /// and the parameter tolerance of [`Shredder::optimize`].
    pub fn new(lower: f64, upper: f64, tolerance: f64) -> Result<Self> {
        check_domain(lower, upper)?;
        Ok(Self {
            lower_limit: lower,
            upper_limit: upper,
            tolerance,
            edge_search: EdgeSearch::default(),
            maximizer: BoundedMaximizer::default().with_xtol(tolerance),
        })
    }

    pub fn with_edge_search(mut self, edge_search: EdgeSearch) -> Self {
        self.edge_search = edge_search;
        self
    }

    /// Replaces the optimizer settings; its parameter tolerance stays tied to
    /// this sampler's tolerance.
    pub fn with_maximizer(mut self, maximizer: BoundedMaximizer) -> Self {
        self.maximizer = maximizer.with_xtol(self.tolerance);
        self
    }

    pub fn set_limits(&mut self, lower: f64, upper: f64) -> Result<()> {
        check_domain(lower, upper)?;
        self.lower_limit = lower;
        self.upper_limit = upper;
        Ok(())
    }

    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance;
        self.maximizer.xtol_abs = tolerance;
    }

    pub fn lower_limit(&self) -> f64 {
        self.lower_limit
    }

    pub fn upper_limit(&self) -> f64 {
        self.upper_limit
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn clamp(&self, x: f64) -> f64 {
        x.clamp(self.lower_limit, self.upper_limit)
    }

    /// Draws one slice sample from `objective`, starting at `x0`.
    ///
    /// `x0` is clamped into the domain. Fails if the objective is not finite
    /// at the starting point or if an edge search stalls.
    pub fn sample<R, O>(&self, rng: &mut R, objective: &O, x0: f64) -> Result<f64>
    where
        R: Rng + ?Sized,
        O: Objective + ?Sized,
    {
        let x0 = self.clamp(ensure_finite(x0, "starting value")?);
        let (lp0, d0) = objective.evaluate(x0);
        ensure_finite(lp0, "log-density at starting value")?;

        let u: f64 = rng.gen();
        let slice_height = u.max(ZERO_EPS).ln() + lp0;
        ensure_finite(slice_height, "slice height")?;

        let mut x_min = self.find_slice_edge(objective, x0, slice_height, lp0, d0, Direction::Left)?;
        let mut x_max =
            self.find_slice_edge(objective, x0, slice_height, lp0, d0, Direction::Right)?;

        while x_max - x_min > self.tolerance {
            let x = x_min + (x_max - x_min) * rng.gen::<f64>();
            let (lp, _) = objective.evaluate(x);
            if lp >= slice_height {
                return Ok(x);
            }
            if x > x0 {
                x_max = x;
            } else {
                x_min = x;
            }
        }

        Ok(0.5 * (x_min + x_max))
    }

    /// Finds a local maximum of `objective` near `x0` within the domain.
    ///
    /// An optimizer failure is logged and the best point found is returned.
    pub fn optimize<O: Objective + ?Sized>(&self, objective: &O, x0: f64) -> Result<f64> {
        let x0 = self.clamp(ensure_finite(x0, "starting value")?);
        let optimum = self
            .maximizer
            .maximize(objective, self.lower_limit, self.upper_limit, x0);
        // The best value is only non-finite when the start already was.
        if !optimum.value.is_finite() {
            return Err(ShredderError::NonFinite {
                value: optimum.value,
                context: "log-density at starting value",
            });
        }
        if let OptimizeStatus::Failed(reason) = optimum.status {
            warn!(
                reason,
                x0,
                x = optimum.x,
                evaluations = optimum.evaluations,
                "optimization failed"
            );
        }
        Ok(self.clamp(optimum.x))
    }

    /// [`Shredder::optimize`] if `optimize` is set, [`Shredder::sample`] otherwise.
    pub fn draw<R, O>(&self, rng: &mut R, objective: &O, x0: f64, optimize: bool) -> Result<f64>
    where
        R: Rng + ?Sized,
        O: Objective + ?Sized,
    {
        if optimize {
            self.optimize(objective, x0)
        } else {
            self.sample(rng, objective, x0)
        }
    }

    /// Finds the point where `objective` falls to `slice_height` on one side of `x0`.
    ///
    /// `lp0` and `d0` are the objective and its derivative at `x0`. Returns the
    /// domain boundary itself when the objective there is still above the slice.
    pub fn find_slice_edge<O: Objective + ?Sized>(
        &self,
        objective: &O,
        x0: f64,
        slice_height: f64,
        lp0: f64,
        d0: f64,
        direction: Direction,
    ) -> Result<f64> {
        let EdgeSearch {
            lp_eps,
            d_eps,
            max_newton_steps,
            max_bisections,
        } = self.edge_search;
        let tol = self.tolerance;

        let boundary = match direction {
            Direction::Left => self.lower_limit,
            Direction::Right => self.upper_limit,
        };
        let (lp_boundary, _) = objective.evaluate(boundary);
        if lp_boundary.is_finite() && lp_boundary >= slice_height {
            return Ok(boundary);
        }

        let x0 = self.clamp(x0);
        let (mut lo, mut hi) = match direction {
            Direction::Left => (self.lower_limit, x0),
            Direction::Right => (x0, self.upper_limit),
        };
        let mut x = x0;
        let mut lp = lp0 - slice_height;
        let mut d = d0;
        let mut newton_steps = 0;

        while lp.abs() > lp_eps && (hi - lo).abs() > tol {
            let mut x1 = x - lp / d;
            if !d.is_finite() || d.abs() < d_eps || !x1.is_finite() {
                x1 = 0.5 * (lo + hi);
            }

            // Close to the boundary and still heading for it: settle here.
            if (x - boundary).abs() <= tol {
                let outward = match direction {
                    Direction::Left => x1 < x,
                    Direction::Right => x1 > x,
                };
                if outward || lp > 0.0 {
                    break;
                }
            }

            // `lp > 0` means `x` is still inside the slice.
            match (direction, lp > 0.0) {
                (Direction::Left, true) | (Direction::Right, false) => hi = x,
                (Direction::Left, false) | (Direction::Right, true) => lo = x,
            }

            let mut bisect = newton_steps >= max_newton_steps || x1 < lo + tol || x1 > hi - tol;
            if !bisect {
                x = x1;
                let (f, df) = objective.evaluate(x);
                lp = f - slice_height;
                d = df;
                bisect = !lp.is_finite() || !d.is_finite();
            }

            if bisect {
                let mut attempts = 0;
                loop {
                    x = 0.5 * (lo + hi);
                    let (f, df) = objective.evaluate(x);
                    lp = f - slice_height;
                    d = df;
                    if lp.is_finite() {
                        break;
                    }
                    // Non-finite values sit on the boundary side of the bracket.
                    match direction {
                        Direction::Left => lo = x,
                        Direction::Right => hi = x,
                    }
                    attempts += 1;
                    if attempts > max_bisections {
                        return Err(ShredderError::EdgeSearchStalled { attempts });
                    }
                }
            } else {
                newton_steps += 1;
            }
        }

        // The bracket closed with `x` still outside the slice: take its inner end.
        if lp < -lp_eps && x != boundary {
            x = match direction {
                Direction::Left => hi,
                Direction::Right => lo,
            };
        }

        Ok(self.clamp(ensure_finite(x, "slice edge")?))
    }
}

fn check_domain(lower: f64, upper: f64) -> Result<()> {
    if lower.is_nan() || upper.is_nan() || lower > upper {
        return Err(ShredderError::InvalidDomain { lower, upper });
    }
    Ok(())
}
