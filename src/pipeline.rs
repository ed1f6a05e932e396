//! Seed, solve and validate the parameters of each image of a stereo pair.

use crate::{
    error::Result,
    estimator::InitialEstimator,
    model::{CollinearityModel, ResidualConvention},
    observation::{ImageSide, Observation, ObservationSet},
    rmse,
    sensor::SensorConfig,
    solver::{LeastSquaresProblem, LevenbergMarquardt, SolveSummary},
    state::{PARAMETER_COUNT, ParameterVector},
};
use nalgebra::{DMatrix, DVector};
use tracing::{info, info_span};

/// Reprojection of the control points of one image as a least squares
/// problem over a flattened [`ParameterVector`].
pub struct ResectionProblem<'a> {
    model: CollinearityModel,
    control_points: Vec<&'a Observation>,
    side: ImageSide,
}

impl<'a> ResectionProblem<'a> {
    pub fn new<I>(model: CollinearityModel, control_points: I, side: ImageSide) -> Self
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        Self {
            model,
            control_points: control_points.into_iter().collect(),
            side,
        }
    }

    pub fn len(&self) -> usize {
        self.control_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.control_points.is_empty()
    }
}

impl LeastSquaresProblem for ResectionProblem<'_> {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let params = ParameterVector::from_vector(params);
        let mut residuals = DVector::zeros(2 * self.control_points.len());
        for (i, obs) in self.control_points.iter().enumerate() {
            residuals
                .fixed_rows_mut::<2>(2 * i)
                .copy_from(&self.model.residual(&params, obs, self.side));
        }
        residuals
    }

    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        let params = ParameterVector::from_vector(params);
        let mut jacobian = DMatrix::zeros(2 * self.control_points.len(), PARAMETER_COUNT);
        for (i, obs) in self.control_points.iter().enumerate() {
            jacobian
                .fixed_view_mut::<2, PARAMETER_COUNT>(2 * i, 0)
                .copy_from(&self.model.jacobian(&params, obs.ground(), obs.time()));
        }
        jacobian
    }
}

/// Outcome for one image side.
#[derive(Debug)]
pub struct SideReport {
    pub side: ImageSide,
    pub seed: ParameterVector,
    pub solved: ParameterVector,
    pub summary: SolveSummary,
    /// Accuracy over the check points, or why it could not be computed.
    pub rmse: Result<f64>,
}

/// Outcomes for both sides of the pair.
#[derive(Debug)]
pub struct StereoReport {
    pub left: Result<SideReport>,
    pub right: Result<SideReport>,
}

impl StereoReport {
    pub fn side(&self, side: ImageSide) -> &Result<SideReport> {
        match side {
            ImageSide::Left => &self.left,
            ImageSide::Right => &self.right,
        }
    }

    /// True when both sides solved and produced an RMSE.
    pub fn is_success(&self) -> bool {
        ImageSide::BOTH
            .iter()
            .all(|side| matches!(self.side(*side), Ok(report) if report.rmse.is_ok()))
    }
}

/// Runs the resection of both images over one [`ObservationSet`].
pub struct Pipeline<'a> {
    observations: &'a ObservationSet,
    config: SensorConfig,
    model: CollinearityModel,
    solver: LevenbergMarquardt,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        observations: &'a ObservationSet,
        config: SensorConfig,
        convention: ResidualConvention,
    ) -> Self {
        Self {
            observations,
            config,
            model: CollinearityModel::new(config.focal_length(), convention),
            solver: LevenbergMarquardt::default(),
        }
    }

    pub fn with_solver(mut self, solver: LevenbergMarquardt) -> Self {
        self.solver = solver;
        self
    }

    pub fn model(&self) -> &CollinearityModel {
        &self.model
    }

    /// Seeds, solves and evaluates `side`.
    ///
    /// Seeding and solver failures end the run for this side. A failure to
    /// evaluate the check points is carried in [`SideReport::rmse`].
    pub fn run(&self, side: ImageSide) -> Result<SideReport> {
        let _span = info_span!("resect", side = side.name()).entered();

        let seed = InitialEstimator::new(self.config.focal_length())
            .estimate(self.observations.control_points(), side)?;
        info!(
            x = seed.position[0].constant,
            y = seed.position[1].constant,
            z = seed.position[2].constant,
            kappa = seed.attitude[2].constant,
            "seeded parameters"
        );

        let problem = ResectionProblem::new(self.model, self.observations.control_points(), side);
        let mut params = seed.to_vector();
        let summary = self.solver.minimize(&problem, &mut params)?;
        info!(
            iterations = summary.iterations,
            initial_cost = summary.initial_cost,
            final_cost = summary.final_cost,
            termination = %summary.termination,
            "solved parameters"
        );

        let solved = ParameterVector::from_vector(&params);
        let rmse = rmse::rmse(&self.model, &solved, self.observations.check_points(), side);

        Ok(SideReport {
            side,
            seed,
            solved,
            summary,
            rmse,
        })
    }

    /// Runs both sides in parallel.
    pub fn par_run(&self) -> StereoReport {
        let (left, right) = rayon::join(
            || self.run(ImageSide::Left),
            || self.run(ImageSide::Right),
        );
        StereoReport { left, right }
    }
}
