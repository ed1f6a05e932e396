use crate::{
    observation::{ImageSide, Observation},
    state::{Attitude, PARAMETER_COUNT, ParameterVector, Quadratic},
};
use nalgebra::{Matrix2x3, Matrix3, Point2, Point3, SMatrix, Vector2, Vector3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Jacobian of one projected point with respect to a flattened [`ParameterVector`].
pub type PointJacobian = SMatrix<f64, 2, PARAMETER_COUNT>;

/// How the observed image coordinate enters the residual.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ResidualConvention {
    /// The ground point is expected on the scan line, so the along-track
    /// residual is the projected x coordinate itself and the observed x is
    /// ignored. Only the cross-track residual subtracts the observation.
    #[default]
    LineScan,

    /// Both projected coordinates are compared with the observation.
    Frame,
}

/// Elemental rotations about X (omega), Y (phi) and Z (kappa) together with
/// their derivatives.
struct Elemental {
    rw: Matrix3<f64>,
    rp: Matrix3<f64>,
    rk: Matrix3<f64>,
    drw: Matrix3<f64>,
    drp: Matrix3<f64>,
    drk: Matrix3<f64>,
}

impl Elemental {
    fn new(att: &Attitude) -> Self {
        let (sw, cw) = att.omega.sin_cos();
        let (sp, cp) = att.phi.sin_cos();
        let (sk, ck) = att.kappa.sin_cos();

        #[rustfmt::skip]
        let elemental = Self {
            rw: Matrix3::new(
                1.0, 0.0, 0.0,
                0.0, cw, -sw,
                0.0, sw, cw,
            ),
            rp: Matrix3::new(
                cp, 0.0, sp,
                0.0, 1.0, 0.0,
                -sp, 0.0, cp,
            ),
            rk: Matrix3::new(
                ck, -sk, 0.0,
                sk, ck, 0.0,
                0.0, 0.0, 1.0,
            ),
            drw: Matrix3::new(
                0.0, 0.0, 0.0,
                0.0, -sw, -cw,
                0.0, cw, -sw,
            ),
            drp: Matrix3::new(
                -sp, 0.0, cp,
                0.0, 0.0, 0.0,
                -cp, 0.0, -sp,
            ),
            drk: Matrix3::new(
                -sk, -ck, 0.0,
                ck, -sk, 0.0,
                0.0, 0.0, 0.0,
            ),
        };
        elemental
    }

    /// `M = Rk * Rp * Rw`. The order fixes the sign of every angle.
    fn rotation(&self) -> Matrix3<f64> {
        self.rk * self.rp * self.rw
    }
}

/// Rotation from ground to sensor axes for `att`.
pub fn rotation(att: &Attitude) -> Matrix3<f64> {
    Elemental::new(att).rotation()
}

/// Collinearity equations for a perspective centre following a
/// [`ParameterVector`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollinearityModel {
    focal_length: f64,
    convention: ResidualConvention,
}

impl CollinearityModel {
    pub fn new(focal_length: f64, convention: ResidualConvention) -> Self {
        Self {
            focal_length,
            convention,
        }
    }

    pub fn focal_length(&self) -> f64 {
        self.focal_length
    }

    pub fn convention(&self) -> ResidualConvention {
        self.convention
    }

    /// Projects `ground` into the image plane of a sensor following
    /// `params` at time `t`.
    pub fn project(&self, params: &ParameterVector, ground: &Point3<f64>, t: f64) -> Point2<f64> {
        let m = rotation(&params.attitude_at(t));
        let v = m * (ground - params.position_at(t));
        Point2::new(
            -self.focal_length * v.x / v.z,
            -self.focal_length * v.y / v.z,
        )
    }

    /// Residual of `obs` as seen in `side`.
    pub fn residual(
        &self,
        params: &ParameterVector,
        obs: &Observation,
        side: ImageSide,
    ) -> Vector2<f64> {
        let projected = self.project(params, obs.ground(), obs.time());
        self.compare(&projected, obs.image(side))
    }

    fn compare(&self, projected: &Point2<f64>, observed: &Point2<f64>) -> Vector2<f64> {
        match self.convention {
            ResidualConvention::LineScan => Vector2::new(projected.x, projected.y - observed.y),
            ResidualConvention::Frame => projected - observed,
        }
    }

    /// Derivatives of [`CollinearityModel::project`] with respect to the
    /// flattened parameters. Observations are constants, so this is also the
    /// Jacobian of the residual under either convention.
    pub fn jacobian(&self, params: &ParameterVector, ground: &Point3<f64>, t: f64) -> PointJacobian {
        let rot = Elemental::new(&params.attitude_at(t));
        let d: Vector3<f64> = ground - params.position_at(t);
        let m = rot.rotation();
        let v = m * d;

        let f = self.focal_length;
        let inv_z = 1.0 / v.z;
        let inv_z2 = inv_z * inv_z;
        #[rustfmt::skip]
        let dproj_dv = Matrix2x3::new(
            -f * inv_z, 0.0, f * v.x * inv_z2,
            0.0, -f * inv_z, f * v.y * inv_z2,
        );

        // d = G - S, so dv/dS = -M.
        let dproj_dpos = dproj_dv * -m;

        let dv_datt = Matrix3::from_columns(&[
            rot.rk * rot.rp * rot.drw * d,
            rot.rk * rot.drp * rot.rw * d,
            rot.drk * rot.rp * rot.rw * d,
        ]);
        let dproj_datt = dproj_dv * dv_datt;

        let basis = Quadratic::basis(t);
        let mut jac = PointJacobian::zeros();
        for axis in 0..3 {
            for (power, b) in basis.iter().enumerate() {
                jac.set_column(3 * axis + power, &(dproj_dpos.column(axis) * *b));
                jac.set_column(9 + 3 * axis + power, &(dproj_datt.column(axis) * *b));
            }
        }
        jac
    }
}
