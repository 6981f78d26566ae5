use argmin::core::observers::{ObserverMode, SlogLogger};
use argmin::core::{
    Error as ArgminError, Executor, IterState, Jacobian, Operator, Problem as ArgminProblem,
    Solver, State, TerminationReason, TerminationStatus, KV,
};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::config::FitSettings;
use crate::distributions::{Mixture, PARAMS_PER_COMPONENT};
use crate::error::Error;
use crate::Result;

type LmState = IterState<Array1<f64>, (), Array2<f64>, (), f64>;

const INITIAL_DAMPING: f64 = 1e-3;
const MIN_DAMPING: f64 = 1e-12;
/// Damping beyond which no downhill step exists at the current point
const MAX_DAMPING: f64 = 1e12;

#[derive(Clone, Debug)]
/// Least squares fit of a Gaussian mixture to a sampled signal.
///
/// The residual is the model minus the observations, so the cost minimised is
/// $$
///     \frac{1}{2} \sum_i \left(f\left(x_i; p\right) - y_i\right)^2
/// $$
pub struct Problem {
    /// Sample positions in log-diameter
    x: Array1<f64>,
    /// Observed signal at each sample
    y: Array1<f64>,
}

impl Problem {
    pub(crate) fn new(x: Array1<f64>, y: Array1<f64>) -> Self {
        Self { x, y }
    }

    fn compute(&self, params: &Array1<f64>) -> Array1<f64> {
        Mixture::from_params(params).evaluate(&self.x)
    }
}

impl Operator for Problem {
    type Param = Array1<f64>;
    type Output = Array1<f64>;

    fn apply(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, ArgminError> {
        Ok(self.compute(p) - &self.y)
    }
}

impl Jacobian for Problem {
    type Param = Array1<f64>;
    type Jacobian = Array2<f64>;

    fn jacobian(&self, p: &Self::Param) -> ::std::result::Result<Self::Jacobian, ArgminError> {
        Ok(Mixture::from_params(p).jacobian(&self.x))
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
/// Box constraints on the flat parameter vector
pub struct Bounds {
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

impl Bounds {
    #[must_use]
    pub fn project(&self, params: &Array1<f64>) -> Array1<f64> {
        Zip::from(params)
            .and(&self.lower)
            .and(&self.upper)
            .map_collect(|&p, &lo, &hi| p.max(lo).min(hi))
    }

    #[must_use]
    pub fn contains(&self, params: &Array1<f64>) -> bool {
        params.len() == self.lower.len()
            && params
                .iter()
                .zip(&self.lower)
                .zip(&self.upper)
                .all(|((&p, &lo), &hi)| lo <= p && p <= hi)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
/// Levenberg-Marquardt with box constraints.
///
/// Each iteration solves the damped normal equations
/// $$
///     \left(J^T J + \lambda \operatorname{diag}\left(J^T J\right)\right) \delta = -J^T r
/// $$
/// over the parameters which are free to move, then projects the trial point back into the
/// box. A parameter sitting on a bound with the gradient pushing it outwards is held fixed for
/// that iteration. Successful steps reduce the damping, failed steps increase it.
pub struct BoundedLevenbergMarquardt {
    bounds: Bounds,
    damping: f64,
    cost_tolerance: f64,
    step_tolerance: f64,
    converged: bool,
}

impl BoundedLevenbergMarquardt {
    #[must_use]
    pub const fn new(bounds: Bounds, cost_tolerance: f64, step_tolerance: f64) -> Self {
        Self {
            bounds,
            damping: INITIAL_DAMPING,
            cost_tolerance,
            step_tolerance,
            converged: false,
        }
    }

    /// Which parameters may move this iteration
    fn free_parameters(&self, params: &Array1<f64>, gradient: &Array1<f64>) -> Vec<bool> {
        Zip::from(params)
            .and(gradient)
            .and(&self.bounds.lower)
            .and(&self.bounds.upper)
            .map_collect(|&p, &g, &lo, &hi| !((p <= lo && g > 0.0) || (p >= hi && g < 0.0)))
            .to_vec()
    }

    /// Damped normal equations restricted to the free parameters. Rows of fixed parameters are
    /// replaced by the identity with a zero right hand side, so their step is zero.
    fn step(
        &self,
        normal: &Array2<f64>,
        gradient: &Array1<f64>,
        free: &[bool],
    ) -> Option<Array1<f64>> {
        let n = gradient.len();
        let mut damped = Array2::<f64>::zeros((n, n));
        let mut rhs = Array1::<f64>::zeros(n);
        for ii in 0..n {
            if !free[ii] {
                damped[[ii, ii]] = 1.0;
                continue;
            }
            rhs[ii] = -gradient[ii];
            for jj in 0..n {
                if free[jj] {
                    damped[[ii, jj]] = normal[[ii, jj]];
                }
            }
            damped[[ii, ii]] += self.damping * normal[[ii, ii]].max(MIN_DAMPING);
        }
        solve_positive_definite(&damped, &rhs)
    }
}

/// Solve the symmetric system `a x = b` through a Cholesky factorisation, `None` if `a` is not
/// positive definite
fn solve_positive_definite(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let (rows, cols) = a.dim();
    let matrix = DMatrix::from_fn(rows, cols, |ii, jj| a[[ii, jj]]);
    let rhs = DVector::from_iterator(b.len(), b.iter().copied());
    let solution = matrix.cholesky()?.solve(&rhs);
    Some(solution.iter().copied().collect())
}

fn half_sum_of_squares(residual: &Array1<f64>) -> f64 {
    0.5 * residual.dot(residual)
}

impl<O> Solver<O, LmState> for BoundedLevenbergMarquardt
where
    O: Operator<Param = Array1<f64>, Output = Array1<f64>>
        + Jacobian<Param = Array1<f64>, Jacobian = Array2<f64>>,
{
    const NAME: &'static str = "Bounded Levenberg-Marquardt";

    fn init(
        &mut self,
        problem: &mut ArgminProblem<O>,
        mut state: LmState,
    ) -> ::std::result::Result<(LmState, Option<KV>), ArgminError> {
        let initial = state
            .take_param()
            .ok_or_else(|| ArgminError::msg("no initial parameters supplied"))?;
        let param = self.bounds.project(&initial);
        let cost = half_sum_of_squares(&problem.apply(&param)?);
        Ok((state.param(param).cost(cost), None))
    }

    fn next_iter(
        &mut self,
        problem: &mut ArgminProblem<O>,
        state: LmState,
    ) -> ::std::result::Result<(LmState, Option<KV>), ArgminError> {
        let param = state
            .get_param()
            .ok_or_else(|| ArgminError::msg("solver state lost its parameters"))?
            .clone();
        let cost = state.get_cost();

        let residual = problem.apply(&param)?;
        let jacobian = problem.jacobian(&param)?;
        let normal = jacobian.t().dot(&jacobian);
        let gradient = jacobian.t().dot(&residual);
        let free = self.free_parameters(&param, &gradient);

        let Some(delta) = self.step(&normal, &gradient, &free) else {
            self.damping *= 10.0;
            return Ok((state, None));
        };

        let trial = self.bounds.project(&(&param + &delta));
        let trial_cost = half_sum_of_squares(&problem.apply(&trial)?);

        if trial_cost < cost {
            let step_length = (&trial - &param).mapv(|d| d * d).sum().sqrt();
            let param_norm = param.dot(&param).sqrt();
            let reduction = cost - trial_cost;
            self.damping = (self.damping / 3.0).max(MIN_DAMPING);
            self.converged = reduction <= self.cost_tolerance * trial_cost
                || step_length <= self.step_tolerance * (param_norm + self.step_tolerance)
                || trial_cost == 0.0;
            Ok((state.param(trial).cost(trial_cost), None))
        } else {
            self.damping *= 2.0;
            self.converged = self.damping > MAX_DAMPING;
            Ok((state, None))
        }
    }

    fn terminate(&mut self, _state: &LmState) -> TerminationStatus {
        if self.converged {
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        } else {
            TerminationStatus::NotTerminated
        }
    }
}

/// Outcome of a converged solve
#[derive(Clone, Debug)]
pub struct Solution {
    pub params: Array1<f64>,
    pub cost: f64,
    pub iterations: u64,
}

impl Problem {
    /// Run the optimisation from `initial_parameters` within `bounds`.
    ///
    /// # Errors
    /// Returns [`Error::FitDidNotConverge`] if the iteration cap is reached first, or the
    /// solver error if argmin fails.
    pub(crate) fn solve(
        self,
        initial_parameters: Array1<f64>,
        bounds: Bounds,
        settings: &FitSettings,
    ) -> Result<Solution> {
        let peaks = initial_parameters.len() / PARAMS_PER_COMPONENT;
        let solver = BoundedLevenbergMarquardt::new(
            bounds,
            settings.cost_tolerance,
            settings.step_tolerance,
        );

        let executor = Executor::new(self, solver).configure(|state| {
            state
                .param(initial_parameters)
                .max_iters(settings.max_solver_iterations)
        });
        let executor = if settings.trace_solver {
            executor.add_observer(SlogLogger::term(), ObserverMode::Always)
        } else {
            executor
        };
        let res = executor.run()?;

        let mut state = res.state().clone();
        let iterations = state.get_iter();
        let cost = state.get_cost();
        let converged = matches!(
            state.get_termination_status(),
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        );
        if !converged {
            return Err(Error::FitDidNotConverge {
                peaks,
                iterations,
                cost,
            });
        }

        let params = state
            .take_param()
            .ok_or_else(|| ArgminError::msg("solver finished without parameters"))?;
        log::debug!("{peaks} peak solve converged after {iterations} iterations, cost {cost:.4e}");
        Ok(Solution {
            params,
            cost,
            iterations,
        })
    }
}
