use crate::{
    error::{Error, Result},
    observation::{ImageSide, Observation},
    state::{ParameterVector, Quadratic},
};
use nalgebra::{DMatrix, DVector, Point2, Point3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fewest control points that determine a [`ConformalTransform`].
pub const MIN_CONTROL_POINTS: usize = 2;

/// 2D similarity from image to ground:
///
/// ```text
/// Gx = a·x − b·y + c
/// Gy = b·x + a·y + d
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConformalTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl ConformalTransform {
    /// Least squares fit over `(image, ground)` pairs.
    pub fn fit<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a Point2<f64>, &'a Point3<f64>)>,
    {
        let pairs: Vec<_> = pairs.into_iter().collect();
        if pairs.len() < MIN_CONTROL_POINTS {
            return Err(Error::InsufficientData {
                required: MIN_CONTROL_POINTS,
                found: pairs.len(),
            });
        }

        let mut design = DMatrix::zeros(2 * pairs.len(), 4);
        let mut rhs = DVector::zeros(2 * pairs.len());
        for (i, (image, ground)) in pairs.iter().enumerate() {
            let (x, y) = (image.x, image.y);
            design
                .row_mut(2 * i)
                .copy_from_slice(&[x, -y, 1.0, 0.0]);
            design
                .row_mut(2 * i + 1)
                .copy_from_slice(&[y, x, 0.0, 1.0]);
            rhs[2 * i] = ground.x;
            rhs[2 * i + 1] = ground.y;
        }

        let normal = design.transpose() * &design;
        let solution = normal
            .cholesky()
            .ok_or(Error::DegenerateGeometry)?
            .solve(&(design.transpose() * rhs));
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(Error::DegenerateGeometry);
        }

        Ok(Self {
            a: solution[0],
            b: solution[1],
            c: solution[2],
            d: solution[3],
        })
    }

    /// Ground units per image unit.
    pub fn scale(&self) -> f64 {
        self.a.hypot(self.b)
    }

    /// Rotation from image to ground axes in radians.
    pub fn angle(&self) -> f64 {
        self.b.atan2(self.a)
    }

    pub fn apply(&self, image: &Point2<f64>) -> Point2<f64> {
        Point2::new(
            self.a * image.x - self.b * image.y + self.c,
            self.b * image.x + self.a * image.y + self.d,
        )
    }
}

/// Seeds a [`ParameterVector`] from a conformal fit of the control points.
///
/// The seed assumes a near-nadir view over terrain close to `Z = 0`: the
/// flying height is the fitted scale times the principal distance, the
/// heading is the fitted rotation, and every other term starts at zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InitialEstimator {
    principal_distance: f64,
}

impl InitialEstimator {
    pub fn new(principal_distance: f64) -> Self {
        Self { principal_distance }
    }

    pub fn estimate<'a, I>(&self, control_points: I, side: ImageSide) -> Result<ParameterVector>
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        let transform = ConformalTransform::fit(
            control_points
                .into_iter()
                .map(|obs| (obs.image(side), obs.ground())),
        )?;
        debug!(side = side.name(), ?transform, "fitted conformal transform");

        Ok(self.seed(&transform))
    }

    pub fn seed(&self, transform: &ConformalTransform) -> ParameterVector {
        ParameterVector::new(
            [
                Quadratic::constant(transform.c),
                Quadratic::constant(transform.d),
                Quadratic::constant(transform.scale() * self.principal_distance),
            ],
            [
                Quadratic::default(),
                Quadratic::default(),
                Quadratic::constant(transform.angle()),
            ],
        )
    }
}
