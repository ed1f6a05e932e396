use nalgebra::{DVector, Point3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of scalars in a flattened [`ParameterVector`].
pub const PARAMETER_COUNT: usize = 18;

/// A polynomial of degree two in time.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Quadratic {
    pub constant: f64,
    pub rate: f64,
    pub acceleration: f64,
}

impl Quadratic {
    pub fn new(constant: f64, rate: f64, acceleration: f64) -> Self {
        Self {
            constant,
            rate,
            acceleration,
        }
    }

    /// A polynomial that holds `value` for all time.
    pub fn constant(value: f64) -> Self {
        Self::new(value, 0.0, 0.0)
    }

    pub fn eval(&self, t: f64) -> f64 {
        self.constant + self.rate * t + self.acceleration * t * t
    }

    /// Partial derivatives of [`Quadratic::eval`] with respect to each coefficient.
    pub fn basis(t: f64) -> [f64; 3] {
        [1.0, t, t * t]
    }

    fn coefficients(&self) -> [f64; 3] {
        [self.constant, self.rate, self.acceleration]
    }

    fn from_coefficients(c: &[f64]) -> Self {
        Self::new(c[0], c[1], c[2])
    }
}

/// Sensor attitude in radians.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Attitude {
    /// Roll about X.
    pub omega: f64,
    /// Pitch about Y.
    pub phi: f64,
    /// Yaw about Z.
    pub kappa: f64,
}

/// Time-varying sensor position and attitude of one image.
///
/// Each of the six exterior orientation elements follows its own
/// [`Quadratic`]. Positions are in ground units, angles in radians.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterVector {
    /// X, Y, Z of the perspective centre.
    pub position: [Quadratic; 3],
    /// Omega, phi, kappa.
    pub attitude: [Quadratic; 3],
}

impl ParameterVector {
    pub fn new(position: [Quadratic; 3], attitude: [Quadratic; 3]) -> Self {
        Self { position, attitude }
    }

    /// A sensor that stays at `position` with constant `attitude`.
    pub fn stationary(position: Point3<f64>, attitude: Attitude) -> Self {
        Self::new(
            [
                Quadratic::constant(position.x),
                Quadratic::constant(position.y),
                Quadratic::constant(position.z),
            ],
            [
                Quadratic::constant(attitude.omega),
                Quadratic::constant(attitude.phi),
                Quadratic::constant(attitude.kappa),
            ],
        )
    }

    pub fn position_at(&self, t: f64) -> Point3<f64> {
        Point3::new(
            self.position[0].eval(t),
            self.position[1].eval(t),
            self.position[2].eval(t),
        )
    }

    pub fn attitude_at(&self, t: f64) -> Attitude {
        Attitude {
            omega: self.attitude[0].eval(t),
            phi: self.attitude[1].eval(t),
            kappa: self.attitude[2].eval(t),
        }
    }

    /// Flattens into `X0 X1 X2 Y0 .. Z2 W0 .. P2 K0 K1 K2`.
    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_iterator(
            PARAMETER_COUNT,
            self.position
                .iter()
                .chain(self.attitude.iter())
                .flat_map(Quadratic::coefficients),
        )
    }

    /// Inverse of [`ParameterVector::to_vector`].
    ///
    /// # Panics
    /// If `vector` does not hold exactly [`PARAMETER_COUNT`] elements.
    pub fn from_vector(vector: &DVector<f64>) -> Self {
        assert_eq!(vector.len(), PARAMETER_COUNT);
        let c = vector.as_slice();
        Self::new(
            [
                Quadratic::from_coefficients(&c[0..3]),
                Quadratic::from_coefficients(&c[3..6]),
                Quadratic::from_coefficients(&c[6..9]),
            ],
            [
                Quadratic::from_coefficients(&c[9..12]),
                Quadratic::from_coefficients(&c[12..15]),
                Quadratic::from_coefficients(&c[15..18]),
            ],
        )
    }
}

impl fmt::Display for ParameterVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 6] = ["X", "Y", "Z", "omega", "phi", "kappa"];
        for (name, poly) in NAMES.iter().zip(self.position.iter().chain(&self.attitude)) {
            writeln!(
                f,
                "{:>6}: {:+.9e} {:+.9e} {:+.9e}",
                name, poly.constant, poly.rate, poly.acceleration
            )?;
        }
        Ok(())
    }
}
