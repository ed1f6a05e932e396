//! Dense Levenberg-Marquardt for small nonlinear least squares problems.
//!
//! The solver minimizes `½‖r(x)‖²`. Each iteration solves the damped normal
//! equations
//!
//! ```text
//! (JᵀJ + λ·D)·Δ = −Jᵀr
//! ```
//!
//! on Jacobi-scaled columns with a Cholesky factorization, where `D` is the
//! clamped diagonal of `JᵀJ`. Steps are accepted on their gain ratio and the
//! damping follows Nielsen's update.

use crate::error::{Error, Result};
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// A residual function together with its Jacobian.
pub trait LeastSquaresProblem {
    /// Stacked residual vector at `params`.
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    /// Jacobian of [`LeastSquaresProblem::residuals`], one row per residual.
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64>;

    fn cost(&self, params: &DVector<f64>) -> f64 {
        0.5 * self.residuals(params).norm_squared()
    }
}

/// Why the solver stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Termination {
    GradientTolerance,
    ParameterTolerance,
    CostTolerance,
    MaxIterations,
}

impl Termination {
    pub fn is_converged(&self) -> bool {
        !matches!(self, Termination::MaxIterations)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::GradientTolerance => write!(f, "gradient tolerance"),
            Termination::ParameterTolerance => write!(f, "parameter tolerance"),
            Termination::CostTolerance => write!(f, "cost tolerance"),
            Termination::MaxIterations => write!(f, "maximum iterations"),
        }
    }
}

/// Diagnostics of one call to [`LevenbergMarquardt::minimize`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolveSummary {
    pub initial_cost: f64,
    pub final_cost: f64,
    pub iterations: usize,
    pub successful_steps: usize,
    pub unsuccessful_steps: usize,
    pub final_damping: f64,
    pub final_gradient_norm: f64,
    pub termination: Termination,
}

impl SolveSummary {
    /// Turns a run that hit the iteration cap into [`Error::NonConvergence`].
    pub fn into_converged(self) -> Result<Self> {
        match self.termination {
            Termination::MaxIterations => Err(Error::NonConvergence {
                iterations: self.iterations,
                cost: self.final_cost,
            }),
            _ => Ok(self),
        }
    }
}

impl fmt::Display for SolveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Initial cost:        {:.6e}", self.initial_cost)?;
        writeln!(f, "Final cost:          {:.6e}", self.final_cost)?;
        writeln!(
            f,
            "Iterations:          {} ({} successful, {} unsuccessful)",
            self.iterations, self.successful_steps, self.unsuccessful_steps
        )?;
        writeln!(f, "Final damping:       {:.6e}", self.final_damping)?;
        writeln!(f, "Final gradient norm: {:.6e}", self.final_gradient_norm)?;
        write!(f, "Termination:         {}", self.termination)
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LevenbergMarquardt {
    max_iterations: usize,
    gradient_tolerance: f64,
    parameter_tolerance: f64,
    cost_tolerance: f64,
    initial_damping: f64,
    damping_min: f64,
    damping_max: f64,
    min_step_quality: f64,
    min_diagonal: f64,
    max_diagonal: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            gradient_tolerance: 1e-16,
            parameter_tolerance: 1e-16,
            cost_tolerance: 1e-15,
            initial_damping: 1e-4,
            damping_min: 1e-16,
            damping_max: 1e32,
            min_step_quality: 1e-3,
            min_diagonal: 1e-6,
            max_diagonal: 1e32,
        }
    }
}

impl LevenbergMarquardt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Stop once `‖Jᵀr‖∞` falls to `tolerance` times its value at the seed.
    pub fn with_gradient_tolerance(mut self, tolerance: f64) -> Self {
        self.gradient_tolerance = tolerance;
        self
    }

    /// Stop once `‖Δ‖ ≤ tolerance·(‖x‖ + tolerance)`.
    pub fn with_parameter_tolerance(mut self, tolerance: f64) -> Self {
        self.parameter_tolerance = tolerance;
        self
    }

    /// Stop once an accepted step lowers the cost by at most `tolerance` of
    /// its previous value.
    pub fn with_cost_tolerance(mut self, tolerance: f64) -> Self {
        self.cost_tolerance = tolerance;
        self
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.initial_damping = damping;
        self
    }

    pub fn with_damping_bounds(mut self, min: f64, max: f64) -> Self {
        self.damping_min = min;
        self.damping_max = max;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Refines `params` in place.
    ///
    /// `params` always holds the lowest-cost point found so far, including
    /// when the iteration cap is reached. Fails if the seed cost is not
    /// finite or if the damped system cannot be factored before the damping
    /// exceeds its upper bound.
    pub fn minimize<P>(&self, problem: &P, params: &mut DVector<f64>) -> Result<SolveSummary>
    where
        P: LeastSquaresProblem + ?Sized,
    {
        let mut residuals = problem.residuals(params);
        let mut cost = 0.5 * residuals.norm_squared();
        if !cost.is_finite() {
            return Err(Error::NonFiniteCost);
        }

        let initial_cost = cost;
        let mut damping = self.initial_damping;
        let mut growth = 2.0;
        let mut iterations = 0;
        let mut successful_steps = 0;
        let mut unsuccessful_steps = 0;

        // Rejected steps leave `params` unchanged, so the linearization is
        // only rebuilt after an accepted step.
        let mut linear = self.linearize(problem.jacobian(params), &residuals);
        let gradient_floor = self.gradient_tolerance * linear.gradient_norm;

        let termination = loop {
            if linear.gradient_norm <= gradient_floor {
                break Termination::GradientTolerance;
            }

            if iterations >= self.max_iterations {
                break Termination::MaxIterations;
            }
            iterations += 1;

            let step = loop {
                let mut damped = linear.hessian.clone();
                for (i, d) in linear.diagonal.iter().enumerate() {
                    damped[(i, i)] += damping * d;
                }

                if let Some(chol) = damped.cholesky() {
                    break chol
                        .solve(&-&linear.scaled_gradient)
                        .component_mul(&linear.scale);
                }

                damping *= growth;
                growth *= 2.0;
                if damping > self.damping_max {
                    return Err(Error::SingularJacobian { damping });
                }
            };

            let step_norm = step.norm();
            if step_norm <= self.parameter_tolerance * (params.norm() + self.parameter_tolerance) {
                break Termination::ParameterTolerance;
            }

            let trial = &*params + &step;
            let trial_residuals = problem.residuals(&trial);
            let trial_cost = 0.5 * trial_residuals.norm_squared();

            let actual = cost - trial_cost;
            let predicted = 0.5
                * (residuals.norm_squared()
                    - (&residuals + &linear.jacobian * &step).norm_squared());
            let quality = if predicted > 0.0 {
                actual / predicted
            } else if actual > 0.0 {
                1.0
            } else {
                0.0
            };

            if trial_cost.is_finite() && quality > self.min_step_quality {
                let previous = cost;
                *params = trial;
                residuals = trial_residuals;
                cost = trial_cost;
                successful_steps += 1;

                damping *= (1.0_f64 / 3.0).max(1.0 - (2.0 * quality - 1.0).powi(3));
                damping = damping.max(self.damping_min);
                growth = 2.0;

                debug!(iterations, cost, step_norm, damping, quality, "accepted step");

                linear = self.linearize(problem.jacobian(params), &residuals);
                if actual <= self.cost_tolerance * previous {
                    break Termination::CostTolerance;
                }
            } else {
                unsuccessful_steps += 1;
                damping = (damping * growth).min(self.damping_max);
                growth *= 2.0;

                debug!(iterations, cost, step_norm, damping, quality, "rejected step");
            }
        };

        if !termination.is_converged() {
            warn!(
                iterations,
                cost, "reached the iteration cap before converging, keeping the best parameters"
            );
        }

        Ok(SolveSummary {
            initial_cost,
            final_cost: cost,
            iterations,
            successful_steps,
            unsuccessful_steps,
            final_damping: damping,
            final_gradient_norm: linear.gradient_norm,
            termination,
        })
    }

    /// Jacobi-scaled normal equations at the current parameters.
    fn linearize(&self, jacobian: DMatrix<f64>, residuals: &DVector<f64>) -> Linearization {
        let gradient = jacobian.transpose() * residuals;

        let scale = jacobian.column_iter().map(|col| 1.0 / (1.0 + col.norm()));
        let scale = DVector::from_iterator(jacobian.ncols(), scale);
        let mut scaled = jacobian.clone();
        for (mut col, s) in scaled.column_iter_mut().zip(scale.iter()) {
            col *= *s;
        }

        let hessian = scaled.transpose() * &scaled;
        let diagonal = hessian
            .diagonal()
            .map(|d| d.clamp(self.min_diagonal, self.max_diagonal));

        Linearization {
            gradient_norm: gradient.amax(),
            scaled_gradient: gradient.component_mul(&scale),
            jacobian,
            scale,
            hessian,
            diagonal,
        }
    }
}

struct Linearization {
    jacobian: DMatrix<f64>,
    scale: DVector<f64>,
    hessian: DMatrix<f64>,
    scaled_gradient: DVector<f64>,
    diagonal: DVector<f64>,
    gradient_norm: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};
    use std::cell::Cell;

    struct Rosenbrock;

    impl LeastSquaresProblem for Rosenbrock {
        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            dvector![1.0 - p[0], 10.0 * (p[1] - p[0] * p[0])]
        }

        fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
            dmatrix![
                -1.0, 0.0;
                -20.0 * p[0], 10.0
            ]
        }
    }

    /// Straight line through noisy points, solved in closed form for reference.
    struct Line {
        x: Vec<f64>,
        y: Vec<f64>,
    }

    impl LeastSquaresProblem for Line {
        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(
                self.x.len(),
                self.x.iter().zip(&self.y).map(|(x, y)| p[0] + p[1] * x - y),
            )
        }

        fn jacobian(&self, _p: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_fn(self.x.len(), 2, |i, j| if j == 0 { 1.0 } else { self.x[i] })
        }
    }

    /// Counts Jacobian evaluations of the wrapped problem.
    struct Counting<P> {
        inner: P,
        jacobians: Cell<usize>,
    }

    impl<P: LeastSquaresProblem> LeastSquaresProblem for Counting<P> {
        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            self.inner.residuals(p)
        }

        fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
            self.jacobians.set(self.jacobians.get() + 1);
            self.inner.jacobian(p)
        }
    }

    struct Broken;

    impl LeastSquaresProblem for Broken {
        fn residuals(&self, _p: &DVector<f64>) -> DVector<f64> {
            dvector![1.0]
        }

        fn jacobian(&self, _p: &DVector<f64>) -> DMatrix<f64> {
            dmatrix![f64::NAN]
        }
    }

    #[test]
    fn rosenbrock_converges() {
        let mut params = dvector![-1.2, 1.0];
        let summary = LevenbergMarquardt::new()
            .with_max_iterations(200)
            .minimize(&Rosenbrock, &mut params)
            .unwrap();

        assert!(summary.termination.is_converged(), "{summary}");
        assert!(summary.final_cost < 1e-12, "{summary}");
        assert_relative_eq!(params[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(params[1], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn line_fit_matches_closed_form() {
        let x = vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![1.1, 2.9, 5.2, 6.8, 9.1, 11.0];
        let n = x.len() as f64;
        let (sx, sy): (f64, f64) = (x.iter().sum(), y.iter().sum());
        let sxx: f64 = x.iter().map(|v| v * v).sum();
        let sxy: f64 = x.iter().zip(&y).map(|(a, b)| a * b).sum();
        let slope = (n * sxy - sx * sy) / (n * sxx - sx * sx);
        let intercept = (sy - slope * sx) / n;

        let mut params = dvector![0.0, 0.0];
        let summary = LevenbergMarquardt::new()
            .minimize(&Line { x, y }, &mut params)
            .unwrap();

        assert!(summary.termination.is_converged());
        assert!(summary.final_cost <= summary.initial_cost);
        assert_relative_eq!(params[0], intercept, epsilon = 1e-6);
        assert_relative_eq!(params[1], slope, epsilon = 1e-6);
    }

    #[test]
    fn stationary_seed_stops_immediately() {
        let mut params = dvector![1.0, 1.0];
        let summary = LevenbergMarquardt::new()
            .minimize(&Rosenbrock, &mut params)
            .unwrap();

        assert_eq!(summary.iterations, 0);
        assert_eq!(summary.termination, Termination::GradientTolerance);
        assert_eq!(params, dvector![1.0, 1.0]);
    }

    #[test]
    fn iteration_cap_keeps_best_parameters() {
        let mut params = dvector![-1.2, 1.0];
        let initial_cost = Rosenbrock.cost(&params);
        let summary = LevenbergMarquardt::new()
            .with_max_iterations(2)
            .minimize(&Rosenbrock, &mut params)
            .unwrap();

        assert_eq!(summary.termination, Termination::MaxIterations);
        assert_eq!(summary.iterations, 2);
        assert!(summary.final_cost <= initial_cost);
        assert_relative_eq!(Rosenbrock.cost(&params), summary.final_cost);
        assert!(matches!(
            summary.into_converged(),
            Err(Error::NonConvergence { iterations: 2, .. })
        ));
    }

    #[test]
    fn rejected_steps_reuse_the_jacobian() {
        // The undamped step from p = 3 lands near p = -9.5, where the cost is
        // higher, so the solve starts with rejections.
        struct Arctan;

        impl LeastSquaresProblem for Arctan {
            fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
                dvector![10.0 * p[0].atan()]
            }

            fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
                dmatrix![10.0 / (1.0 + p[0] * p[0])]
            }
        }

        let problem = Counting {
            inner: Arctan,
            jacobians: Cell::new(0),
        };
        let mut params = dvector![3.0];
        let summary = LevenbergMarquardt::new()
            .minimize(&problem, &mut params)
            .unwrap();

        assert!(summary.unsuccessful_steps > 0, "{summary}");
        assert!(summary.termination.is_converged(), "{summary}");
        assert_eq!(problem.jacobians.get(), summary.successful_steps + 1);
        assert_relative_eq!(params[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn gradient_tolerance_is_relative_to_the_seed() {
        // Tiny residuals must not end the solve at the seed.
        struct Scaled;

        impl LeastSquaresProblem for Scaled {
            fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
                dvector![1e-9 * (p[0] - 3.0), 1e-9 * (p[1] + 2.0)]
            }

            fn jacobian(&self, _p: &DVector<f64>) -> DMatrix<f64> {
                dmatrix![
                    1e-9, 0.0;
                    0.0, 1e-9
                ]
            }
        }

        let mut params = dvector![0.0, 0.0];
        let summary = LevenbergMarquardt::new()
            .minimize(&Scaled, &mut params)
            .unwrap();

        assert!(summary.iterations > 0);
        assert!(summary.termination.is_converged());
        assert_relative_eq!(params[0], 3.0, max_relative = 1e-9);
        assert_relative_eq!(params[1], -2.0, max_relative = 1e-9);
    }

    #[test]
    fn non_finite_jacobian_is_singular() {
        let mut params = dvector![0.0];
        let err = LevenbergMarquardt::new()
            .minimize(&Broken, &mut params)
            .unwrap_err();
        assert!(matches!(err, Error::SingularJacobian { .. }));
    }

    #[test]
    fn non_finite_seed_is_rejected() {
        let mut params = dvector![f64::NAN, 0.0];
        let err = LevenbergMarquardt::new()
            .minimize(&Rosenbrock, &mut params)
            .unwrap_err();
        assert!(matches!(err, Error::NonFiniteCost));
    }
}
