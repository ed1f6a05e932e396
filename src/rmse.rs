//! Reprojection accuracy over independent check points.

use crate::{
    error::{Error, Result},
    model::CollinearityModel,
    observation::{ImageSide, Observation},
    state::ParameterVector,
};
use nalgebra::Vector2;

/// Residual of a single check point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointResidual {
    pub index: usize,
    pub residual: Vector2<f64>,
}

/// Residuals of every check point under frozen `params`.
pub fn residuals<'a, I>(
    model: &CollinearityModel,
    params: &ParameterVector,
    check_points: I,
    side: ImageSide,
) -> Vec<PointResidual>
where
    I: IntoIterator<Item = &'a Observation>,
{
    check_points
        .into_iter()
        .map(|obs| PointResidual {
            index: obs.index(),
            residual: model.residual(params, obs, side),
        })
        .collect()
}

/// Root mean square of the residual norms over `check_points`.
pub fn rmse<'a, I>(
    model: &CollinearityModel,
    params: &ParameterVector,
    check_points: I,
    side: ImageSide,
) -> Result<f64>
where
    I: IntoIterator<Item = &'a Observation>,
{
    let residuals = residuals(model, params, check_points, side);
    if residuals.is_empty() {
        return Err(Error::EmptyInput);
    }

    let sum: f64 = residuals.iter().map(|r| r.residual.norm_squared()).sum();
    Ok((sum / residuals.len() as f64).sqrt())
}
