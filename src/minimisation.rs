use argmin::core::observers::{ObserverMode, SlogLogger};
use argmin::core::{
    ArgminError, Error as ArgminErrorBox, Executor, IterState, Jacobian, Operator, Problem, Solver,
    State, TerminationReason, TerminationStatus, KV,
};
use ndarray::{Array1, Array2};
use ndarray_linalg::Solve;
use serde::{Deserialize, Serialize};

use crate::{Config, Error, Result};

/// Number of parameters in the blank drift model
pub(crate) const NUM_PARAMS: usize = 5;

/// The coulometer blank at scaled analysis time `x`
///
/// $$
///     b(x) = p_0 + p_1 x + p_2 \exp\left[-\frac{x - p_3}{p_4}\right]
/// $$
///
/// floored at zero, as a negative blank is unphysical. The exponential captures the high blank
/// of a freshly filled cell decaying over the first hours of a session, the linear term the
/// slow drift after that.
pub(crate) fn blank_progression(params: &[f64], x: f64) -> f64 {
    let blank = params[0] + params[1] * x + params[2] * (-(x - params[3]) / params[4]).exp();
    if blank < 0.0 {
        0.0
    } else {
        blank
    }
}

/// Least squares problem for the blank drift in one session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct BlankProblem {
    /// Centred and scaled analysis times
    x: Array1<f64>,
    /// Sample blanks observed at `x`
    y: Array1<f64>,
}

impl BlankProblem {
    pub(crate) fn new(x: &[f64], y: &[f64]) -> Self {
        assert_eq!(x.len(), y.len(), "each blank needs an analysis time");
        Self {
            x: Array1::from(x.to_vec()),
            y: Array1::from(y.to_vec()),
        }
    }

    fn residuals(&self, params: &Array1<f64>) -> Array1<f64> {
        let params = params.to_vec();
        self.x
            .iter()
            .zip(self.y.iter())
            .map(|(&x, &y)| blank_progression(&params, x) - y)
            .collect()
    }
}

impl Operator for BlankProblem {
    type Param = Array1<f64>;
    type Output = Array1<f64>;

    fn apply(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, ArgminErrorBox> {
        Ok(self.residuals(p))
    }
}

impl Jacobian for BlankProblem {
    type Param = Array1<f64>;
    type Jacobian = Array2<f64>;

    /// Forward-difference Jacobian of the residuals
    ///
    /// The step for each parameter is `sqrt(eps)` relative to its magnitude, and never smaller
    /// than `sqrt(eps)`, so a scale parameter sitting at zero is still perturbed off it.
    fn jacobian(
        &self,
        p: &Self::Param,
    ) -> ::std::result::Result<Self::Jacobian, ArgminErrorBox> {
        let base = self.residuals(p);
        let mut jacobian = Array2::zeros((self.x.len(), p.len()));
        for jj in 0..p.len() {
            let step = f64::EPSILON.sqrt() * p[jj].abs().max(1.0);
            let mut shifted = p.clone();
            shifted[jj] += step;
            let column = (self.residuals(&shifted) - &base) / step;
            jacobian.column_mut(jj).assign(&column);
        }
        Ok(jacobian)
    }
}

/// Why the Levenberg-Marquardt iteration stopped before the iteration cap
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum Convergence {
    Gradient,
    Step,
    Cost,
    /// No damping in range produced a downhill step
    Stalled,
}

/// Levenberg-Marquardt with the damping update of Nielsen (1999)
///
/// Each iteration solves the damped normal equations
///
/// $$
///     \left(J^T J + \mu I\right) \delta = -J^T r
/// $$
///
/// and accepts the step only if it lowers the cost. Rejected steps, including those where the
/// model overflows, raise the damping until the step shrinks towards steepest descent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct LevenbergMarquardt {
    tolerance: f64,
    tau: f64,
    mu: Option<f64>,
    nu: f64,
    converged: Option<Convergence>,
}

/// Largest number of damping increases tried within one iteration
const MAX_DAMPING_STEPS: usize = 50;

impl LevenbergMarquardt {
    pub(crate) const fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            tau: 1e-3,
            mu: None,
            nu: 2.0,
            converged: None,
        }
    }
}

fn half_squared_norm(residuals: &Array1<f64>) -> f64 {
    let cost = 0.5 * residuals.dot(residuals);
    if cost.is_finite() {
        cost
    } else {
        f64::INFINITY
    }
}

type LmState = IterState<Array1<f64>, (), Array2<f64>, (), f64>;

impl<O> Solver<O, LmState> for LevenbergMarquardt
where
    O: Operator<Param = Array1<f64>, Output = Array1<f64>>
        + Jacobian<Param = Array1<f64>, Jacobian = Array2<f64>>,
{
    const NAME: &'static str = "Levenberg-Marquardt";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        mut state: LmState,
    ) -> ::std::result::Result<(LmState, Option<KV>), ArgminErrorBox> {
        let param = state.take_param().ok_or_else(|| ArgminError::NotInitialized {
            text: "Levenberg-Marquardt requires an initial parameter vector".to_string(),
        })?;
        let cost = half_squared_norm(&problem.apply(&param)?);
        Ok((state.param(param).cost(cost), None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        mut state: LmState,
    ) -> ::std::result::Result<(LmState, Option<KV>), ArgminErrorBox> {
        let param = state.take_param().ok_or_else(|| ArgminError::NotInitialized {
            text: "Levenberg-Marquardt requires an initial parameter vector".to_string(),
        })?;
        let residuals = problem.apply(&param)?;
        let cost = half_squared_norm(&residuals);
        let jacobian = problem.jacobian(&param)?;

        if !cost.is_finite() || jacobian.iter().any(|v| !v.is_finite()) {
            self.converged = Some(Convergence::Stalled);
            return Ok((state.param(param).cost(cost), None));
        }

        let hessian = jacobian.t().dot(&jacobian);
        let gradient = jacobian.t().dot(&residuals);

        if gradient.iter().fold(0.0f64, |a, g| a.max(g.abs())) <= self.tolerance {
            self.converged = Some(Convergence::Gradient);
            return Ok((state.param(param).cost(cost), None));
        }

        let tau = self.tau;
        let mut mu = *self
            .mu
            .get_or_insert_with(|| tau * hessian.diag().fold(0.0f64, |a, &d| a.max(d)).max(1.0));
        let mut nu = self.nu;
        let param_norm = param.dot(&param).sqrt();

        for _ in 0..MAX_DAMPING_STEPS {
            let damped = &hessian + &(Array2::<f64>::eye(param.len()) * mu);
            let step = damped.solve_into(-&gradient)?;

            if step.dot(&step).sqrt() <= self.tolerance * (param_norm + self.tolerance) {
                self.converged = Some(Convergence::Step);
                return Ok((state.param(param).cost(cost), None));
            }

            let trial = &param + &step;
            let trial_cost = half_squared_norm(&problem.apply(&trial)?);
            let predicted_reduction = 0.5 * step.dot(&(&step * mu - &gradient));

            if trial_cost.is_finite() && predicted_reduction > 0.0 && trial_cost < cost {
                let rho = (cost - trial_cost) / predicted_reduction;
                self.mu = Some(mu * (1.0 / 3.0f64).max(1.0 - (2.0 * rho - 1.0).powi(3)));
                self.nu = 2.0;
                if cost - trial_cost <= self.tolerance * cost {
                    self.converged = Some(Convergence::Cost);
                }
                return Ok((state.param(trial).cost(trial_cost), None));
            }

            mu *= nu;
            nu *= 2.0;
        }

        self.mu = Some(mu);
        self.nu = nu;
        self.converged = Some(Convergence::Stalled);
        Ok((state.param(param).cost(cost), None))
    }

    fn terminate(&mut self, _state: &LmState) -> TerminationStatus {
        match self.converged {
            Some(_) => TerminationStatus::Terminated(TerminationReason::SolverConverged),
            None => TerminationStatus::NotTerminated,
        }
    }
}

/// Fitted blank drift parameters for one session
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct BlankFit {
    pub(crate) params: [f64; NUM_PARAMS],
    pub(crate) iterations: u64,
}

/// Fit the blank drift model to `blanks` observed at scaled times `x`
///
/// The fit always starts from `config.initial_guess`, so refitting the same session gives the
/// same parameters.
pub(crate) fn fit_blank_progression(
    x: &[f64],
    blanks: &[f64],
    config: &Config,
) -> Result<BlankFit> {
    let problem = BlankProblem::new(x, blanks);
    let solver = LevenbergMarquardt::new(config.tolerance);
    let initial_parameters = Array1::from(config.initial_guess.to_vec());

    let mut executor = Executor::new(problem, solver)
        .configure(|state| state.param(initial_parameters).max_iters(config.max_iters));
    if config.verbose_fit {
        executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
    }
    let res = executor
        .run()
        .map_err(|e| Error::Solver(e.to_string()))?;

    let mut state = res.state().clone();
    let iterations = state.get_iter();
    if !state.get_cost().is_finite() {
        return Err(Error::Solver(
            "blank model is not finite at the initial guess".to_owned(),
        ));
    }
    let param = state
        .take_param()
        .ok_or_else(|| Error::Solver("optimiser returned no parameters".to_owned()))?;

    let mut params = [0.0; NUM_PARAMS];
    for (target, value) in params.iter_mut().zip(param.iter()) {
        *target = *value;
    }
    log::debug!("blank fit converged after {iterations} iterations: {params:?}");

    Ok(BlankFit { params, iterations })
}
