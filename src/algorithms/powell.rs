use crate::algorithms::{CancellationToken, ConvergenceChecker, ConvergenceState, Objective, ScoredPoint};
use crate::config::PhaseConfig;
use crate::error::{AlignError, AlignResult};
use argmin::core::{ArgminError, CostFunction, Error, Executor, State};
use argmin::solver::brent::BrentOpt;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use tracing::trace;

const GOLD: f64 = 1.618034;
const GROW_LIMIT: f64 = 100.0;
const TINY: f64 = 1e-21;
const MAX_BRACKET_STEPS: usize = 50;
const MAX_LINE_SEARCH_STEPS: u64 = 500;

/// Why a Powell pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Converged,
    Cancelled,
    EvaluationLimit,
    IterationLimit,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Converged => "converged",
            Termination::Cancelled => "cancelled",
            Termination::EvaluationLimit => "evaluation_limit",
            Termination::IterationLimit => "iteration_limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowellOutcome {
    /// Best point evaluated during the pass.
    pub point: Array1<f64>,
    pub value: f64,
    pub termination: Termination,
    pub iterations: usize,
    pub evaluations: usize,
}

/// Derivative-free maximizer using Powell's conjugate direction method.
///
/// Each iteration runs a line search along every direction of the set,
/// then tries the extrapolated point `2x - x_start` and, when Powell's
/// test allows, swaps the direction of largest decrease for the net
/// displacement of the iteration.
///
/// Line searches bracket the minimum of `-f` with golden-ratio expansion
/// and parabolic extrapolation, then hand the bracket to argmin's
/// [`BrentOpt`].
#[derive(Debug, Clone)]
pub struct PowellMaximizer {
    checker: ConvergenceChecker,
    line_search_relative: f64,
    line_search_absolute: f64,
    max_evaluations: usize,
    max_iterations: usize,
}

enum Halt {
    Exhausted,
    Failed(AlignError),
}

impl From<AlignError> for Halt {
    fn from(err: AlignError) -> Self {
        Halt::Failed(err)
    }
}

/// Wraps the objective as a cost to minimize, counting calls and keeping
/// the best point seen.
///
/// Evaluation goes through `&self` so the same counter can sit behind
/// argmin's `CostFunction`.
struct CountedCost<'a, O: Objective> {
    objective: RefCell<&'a mut O>,
    evaluations: Cell<usize>,
    max_evaluations: usize,
    best: RefCell<Option<ScoredPoint>>,
}

impl<'a, O: Objective> CountedCost<'a, O> {
    fn new(objective: &'a mut O, max_evaluations: usize) -> Self {
        Self {
            objective: RefCell::new(objective),
            evaluations: Cell::new(0),
            max_evaluations,
            best: RefCell::new(None),
        }
    }

    fn evaluations(&self) -> usize {
        self.evaluations.get()
    }

    fn cost(&self, point: &Array1<f64>) -> Result<f64, Halt> {
        if self.evaluations.get() >= self.max_evaluations {
            return Err(Halt::Exhausted);
        }
        self.evaluations.set(self.evaluations.get() + 1);
        let value = self.objective.borrow_mut().value(point)?;

        let mut best = self.best.borrow_mut();
        let improves = match best.as_ref() {
            None => true,
            Some(best) => best.value.is_nan() || value > best.value,
        };
        if improves {
            *best = Some(ScoredPoint::new(point.clone(), value));
        }
        Ok(-value)
    }

    fn cost_along(&self, origin: &Array1<f64>, direction: &Array1<f64>, alpha: f64) -> Result<f64, Halt> {
        let point = origin + &(direction * alpha);
        self.cost(&point)
    }
}

/// The cost restricted to `origin + alpha * direction`, as an argmin
/// problem over `alpha`.
///
/// argmin only sees an opaque error, so the reason a call stopped is kept
/// in `halt` for the caller.
struct LineCost<'c, 'a, O: Objective> {
    counted: &'c CountedCost<'a, O>,
    origin: &'c Array1<f64>,
    direction: &'c Array1<f64>,
    halt: &'c RefCell<Option<Halt>>,
}

impl<'c, 'a, O: Objective> CostFunction for LineCost<'c, 'a, O> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, alpha: &Self::Param) -> Result<Self::Output, Error> {
        self.counted
            .cost_along(self.origin, self.direction, *alpha)
            .map_err(|halt| {
                let mut slot = self.halt.borrow_mut();
                if slot.is_none() {
                    *slot = Some(halt);
                }
                ArgminError::ConditionViolated {
                    text: "objective evaluation stopped".to_string(),
                }
                .into()
            })
    }
}

struct LineMinimum {
    alpha: f64,
    cost: f64,
}

impl PowellMaximizer {
    pub fn new(config: &PhaseConfig) -> Self {
        Self {
            checker: config.checker(),
            line_search_relative: config.line_search_relative,
            line_search_absolute: config.line_search_absolute,
            max_evaluations: config.max_evaluations,
            max_iterations: config.max_iterations,
        }
    }

    /// Maximize `objective` starting from `start`.
    ///
    /// Objective errors stop the pass and are returned as-is. Every other
    /// way of stopping, including cancellation and the evaluation cap,
    /// yields the best point evaluated so far.
    pub fn maximize<O: Objective>(
        &self,
        objective: &mut O,
        start: &Array1<f64>,
        cancel: &CancellationToken,
    ) -> AlignResult<PowellOutcome> {
        if start.is_empty() {
            return Err(AlignError::InvalidInput(
                "starting point has no coordinates".to_string(),
            ));
        }
        if self.max_evaluations == 0 {
            return Err(AlignError::InvalidInput(
                "evaluation budget must be positive".to_string(),
            ));
        }

        let counted = CountedCost::new(objective, self.max_evaluations);
        let mut iterations = 0;

        let termination = match self.search(&counted, start, cancel, &mut iterations) {
            Ok(termination) => termination,
            Err(Halt::Exhausted) => Termination::EvaluationLimit,
            Err(Halt::Failed(err)) => return Err(err),
        };

        let evaluations = counted.evaluations();
        let best = counted
            .best
            .into_inner()
            .ok_or_else(|| AlignError::Numeric("no point was evaluated".to_string()))?;
        Ok(PowellOutcome {
            point: best.point,
            value: best.value,
            termination,
            iterations,
            evaluations,
        })
    }

    fn search<O: Objective>(
        &self,
        counted: &CountedCost<'_, O>,
        start: &Array1<f64>,
        cancel: &CancellationToken,
        iterations: &mut usize,
    ) -> Result<Termination, Halt> {
        let n = start.len();
        let mut directions = Array2::<f64>::eye(n);
        let mut x = start.clone();
        let mut f_val = counted.cost(&x)?;

        loop {
            if cancel.is_cancelled() {
                return Ok(Termination::Cancelled);
            }
            if *iterations >= self.max_iterations {
                return Ok(Termination::IterationLimit);
            }
            *iterations += 1;

            let f_x = f_val;
            let x1 = x.clone();
            let mut delta = 0.0;
            let mut biggest = 0;

            for i in 0..n {
                let direction = directions.row(i).to_owned();
                let f_before = f_val;
                let minimum = self.line_search(counted, &x, &direction)?;
                f_val = minimum.cost;
                x = &x + &(&direction * minimum.alpha);
                if f_before - f_val > delta {
                    delta = f_before - f_val;
                    biggest = i;
                }
            }

            trace!(
                iteration = *iterations,
                value = -f_val,
                point = ?x.to_vec(),
                evaluations = counted.evaluations(),
                "Powell iteration"
            );

            let previous = ScoredPoint::new(x1.clone(), -f_x);
            let current = ScoredPoint::new(x.clone(), -f_val);
            if self.checker.check(&previous, &current, cancel) == ConvergenceState::Converged {
                return Ok(if cancel.is_cancelled() {
                    Termination::Cancelled
                } else {
                    Termination::Converged
                });
            }

            let displacement = &x - &x1;
            let extrapolated = &x + &displacement;
            let f_x2 = counted.cost(&extrapolated)?;

            if f_x > f_x2 {
                let mut t = 2.0 * (f_x + f_x2 - 2.0 * f_val);
                let temp = f_x - f_val - delta;
                t *= temp * temp;
                let temp = f_x - f_x2;
                t -= delta * temp * temp;

                if t < 0.0 {
                    let minimum = self.line_search(counted, &x, &displacement)?;
                    f_val = minimum.cost;
                    let step = &displacement * minimum.alpha;
                    x = &x + &step;

                    let last = n - 1;
                    let last_direction = directions.row(last).to_owned();
                    directions.row_mut(biggest).assign(&last_direction);
                    directions.row_mut(last).assign(&step);
                }
            }
        }
    }

    /// Minimize the cost along `origin + alpha * direction`.
    ///
    /// Falls back to the bracket's middle point when Brent does not improve
    /// on it.
    fn line_search<O: Objective>(
        &self,
        counted: &CountedCost<'_, O>,
        origin: &Array1<f64>,
        direction: &Array1<f64>,
    ) -> Result<LineMinimum, Halt> {
        let (lo, mid, hi, f_mid) = bracket(counted, origin, direction)?;
        let fallback = LineMinimum {
            alpha: mid,
            cost: f_mid,
        };
        if !lo.is_finite() || !hi.is_finite() || lo >= hi {
            return Ok(fallback);
        }

        let halt = RefCell::new(None);
        let problem = LineCost {
            counted,
            origin,
            direction,
            halt: &halt,
        };
        let solver = BrentOpt::new(lo, hi)
            .set_tolerance(self.line_search_relative, self.line_search_absolute);
        let outcome = Executor::new(problem, solver)
            .configure(|state| state.max_iters(MAX_LINE_SEARCH_STEPS))
            .run()
            .map(|result| {
                let state = result.state();
                (state.get_best_param().copied(), state.get_best_cost())
            });

        if let Some(halt) = halt.take() {
            return Err(halt);
        }
        match outcome {
            Ok((Some(alpha), cost)) if cost < f_mid => Ok(LineMinimum { alpha, cost }),
            Ok(_) => Ok(fallback),
            Err(err) => Err(Halt::Failed(AlignError::Numeric(format!(
                "line search failed: {}",
                err
            )))),
        }
    }
}

/// Bracket a minimum of the cost along `direction`, starting from the step
/// lengths 0 and 1. Returns `(lo, mid, hi, cost(mid))`.
fn bracket<O: Objective>(
    counted: &CountedCost<'_, O>,
    origin: &Array1<f64>,
    direction: &Array1<f64>,
) -> Result<(f64, f64, f64, f64), Halt> {
    let mut xa = 0.0;
    let mut xb = 1.0;
    let mut fa = counted.cost_along(origin, direction, xa)?;
    let mut fb = counted.cost_along(origin, direction, xb)?;
    if fa < fb {
        std::mem::swap(&mut xa, &mut xb);
        std::mem::swap(&mut fa, &mut fb);
    }

    let mut xc = xb + GOLD * (xb - xa);
    let mut fc = counted.cost_along(origin, direction, xc)?;

    let mut steps = 0;
    while fc < fb && steps < MAX_BRACKET_STEPS {
        steps += 1;
        let tmp1 = (xb - xa) * (fb - fc);
        let tmp2 = (xb - xc) * (fb - fa);
        let val = tmp2 - tmp1;
        let denom = if val.abs() < TINY { 2.0 * TINY } else { 2.0 * val };

        let mut w = xb - ((xb - xc) * tmp2 - (xb - xa) * tmp1) / denom;
        let limit = xb + GROW_LIMIT * (xc - xb);
        let mut fw;

        if (w - xc) * (xb - w) > 0.0 {
            fw = counted.cost_along(origin, direction, w)?;
            if fw < fc {
                xa = xb;
                xb = w;
                fa = fb;
                fb = fw;
                break;
            } else if fw > fb {
                xc = w;
                fc = fw;
                break;
            }
            w = xc + GOLD * (xc - xb);
            fw = counted.cost_along(origin, direction, w)?;
        } else if (w - limit) * (limit - xc) >= 0.0 {
            w = limit;
            fw = counted.cost_along(origin, direction, w)?;
        } else if (w - limit) * (xc - w) > 0.0 {
            fw = counted.cost_along(origin, direction, w)?;
            if fw < fc {
                xb = xc;
                xc = w;
                w = xc + GOLD * (xc - xb);
                fb = fc;
                fc = fw;
                fw = counted.cost_along(origin, direction, w)?;
            }
        } else {
            w = xc + GOLD * (xc - xb);
            fw = counted.cost_along(origin, direction, w)?;
        }

        xa = xb;
        fa = fb;
        xb = xc;
        fb = fc;
        xc = w;
        fc = fw;
    }

    let (lo, hi) = if xa < xc { (xa, xc) } else { (xc, xa) };
    Ok((lo, xb, hi, fb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn coupled(p: &Array1<f64>) -> AlignResult<f64> {
        // Maximum of 3 at (2, -1).
        let (x, y) = (p[0], p[1]);
        Ok(-(x * x + x * y + y * y - 3.0 * x))
    }

    #[test]
    fn test_separable_quadratic() {
        let maximizer = PowellMaximizer::new(&PhaseConfig::fine());
        let mut objective =
            |p: &Array1<f64>| -> AlignResult<f64> { Ok(5.0 - (p[0] - 3.0).powi(2) - 10.0 * (p[1] + 2.0).powi(2)) };
        let outcome = maximizer
            .maximize(&mut objective, &array![0.0, 0.0], &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome.termination, Termination::Converged);
        assert_abs_diff_eq!(outcome.point[0], 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(outcome.point[1], -2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(outcome.value, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_coupled_quadratic() {
        let maximizer = PowellMaximizer::new(&PhaseConfig::fine());
        let mut objective = coupled;
        let outcome = maximizer
            .maximize(&mut objective, &array![-4.0, 3.0], &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome.termination, Termination::Converged);
        assert_abs_diff_eq!(outcome.point[0], 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(outcome.point[1], -1.0, epsilon = 1e-5);
        assert!(outcome.iterations >= 2);
    }

    #[test]
    fn test_cancelled_before_start_returns_start() {
        let maximizer = PowellMaximizer::new(&PhaseConfig::coarse());
        let token = CancellationToken::new();
        token.cancel();
        let mut objective = coupled;
        let start = array![0.5, 0.5];
        let outcome = maximizer.maximize(&mut objective, &start, &token).unwrap();
        assert_eq!(outcome.termination, Termination::Cancelled);
        assert_eq!(outcome.point, start);
        assert_eq!(outcome.evaluations, 1);
        assert_eq!(outcome.iterations, 0);
    }

    #[test]
    fn test_evaluation_limit_keeps_best() {
        let config = PhaseConfig {
            max_evaluations: 6,
            ..PhaseConfig::fine()
        };
        let maximizer = PowellMaximizer::new(&config);
        let mut objective = coupled;
        let start = array![-4.0, 3.0];
        let start_value = coupled(&start).unwrap();
        let outcome = maximizer
            .maximize(&mut objective, &start, &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome.termination, Termination::EvaluationLimit);
        assert_eq!(outcome.evaluations, 6);
        assert!(outcome.value >= start_value);
    }

    #[test]
    fn test_iteration_limit() {
        let config = PhaseConfig {
            max_iterations: 1,
            ..PhaseConfig::fine()
        };
        let maximizer = PowellMaximizer::new(&config);
        let mut objective = coupled;
        let outcome = maximizer
            .maximize(&mut objective, &array![-4.0, 3.0], &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome.termination, Termination::IterationLimit);
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn test_objective_error_propagates() {
        let maximizer = PowellMaximizer::new(&PhaseConfig::fine());
        let mut calls = 0;
        let mut objective = |p: &Array1<f64>| -> AlignResult<f64> {
            calls += 1;
            if calls > 3 {
                return Err(AlignError::Numeric("blew up".to_string()));
            }
            coupled(p)
        };
        let err = maximizer
            .maximize(&mut objective, &array![0.0, 0.0], &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, AlignError::Numeric(_)));
    }

    #[test]
    fn test_line_search_lands_between_bracket_points() {
        let maximizer = PowellMaximizer::new(&PhaseConfig::fine());
        let mut objective = |p: &Array1<f64>| -> AlignResult<f64> { Ok(2.0 - (p[0] - 0.37).powi(2)) };
        let outcome = maximizer
            .maximize(&mut objective, &array![0.0], &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome.termination, Termination::Converged);
        assert_abs_diff_eq!(outcome.point[0], 0.37, epsilon = 1e-6);
    }

    #[test]
    fn test_error_inside_brent_propagates() {
        let maximizer = PowellMaximizer::new(&PhaseConfig::fine());
        let mut calls = 0;
        // Start point and three bracket evaluations succeed, Brent's first fails.
        let mut objective = |p: &Array1<f64>| -> AlignResult<f64> {
            calls += 1;
            if calls == 5 {
                return Err(AlignError::InvalidCrop {
                    horizontal: 9,
                    top: 0,
                    bottom: 0,
                    width: 10,
                    height: 10,
                });
            }
            Ok(2.0 - (p[0] - 0.37).powi(2))
        };
        let err = maximizer
            .maximize(&mut objective, &array![0.0], &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, AlignError::InvalidCrop { .. }));
    }

    #[test]
    fn test_rejects_empty_start() {
        let maximizer = PowellMaximizer::new(&PhaseConfig::fine());
        let mut objective = |_: &Array1<f64>| -> AlignResult<f64> { Ok(0.0) };
        assert!(maximizer
            .maximize(&mut objective, &Array1::zeros(0), &CancellationToken::new())
            .is_err());
    }
}
