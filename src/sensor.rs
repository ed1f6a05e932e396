use nalgebra::Point2;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uom::{
    ConstZero,
    si::{
        f64::Length,
        length::{meter, micron},
    },
};

/// Fixed geometry of the line-scanner used to turn pixel measurements into
/// metric image-plane coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorConfig {
    principal_distance: Length,
    pixel_size: Length,
    rows: usize,
}

impl SensorConfig {
    /// Creates a new `SensorConfig`.
    ///
    /// # Panics
    /// If `principal_distance` or `pixel_size` is not greater than zero.
    pub fn new(principal_distance: Length, pixel_size: Length, rows: usize) -> Self {
        if principal_distance <= Length::ZERO {
            panic!("principal distance must be greater than zero");
        }

        if pixel_size <= Length::ZERO {
            panic!("pixel size must be greater than zero");
        }

        Self {
            principal_distance,
            pixel_size,
            rows,
        }
    }

    pub fn principal_distance(&self) -> Length {
        self.principal_distance
    }

    pub fn pixel_size(&self) -> Length {
        self.pixel_size
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Principal distance in ground units, as consumed by the projection model.
    pub fn focal_length(&self) -> f64 {
        self.principal_distance.get::<meter>()
    }

    /// Maps a pixel measurement to the metric image plane.
    ///
    /// Both axes are centred on `rows / 2`. The row axis is the along-track
    /// direction, so it becomes the image x coordinate.
    pub fn image_from_pixel(&self, col: f64, row: f64) -> Point2<f64> {
        let center = self.rows as f64 / 2.0;
        let pixel_size = self.pixel_size.get::<meter>();
        Point2::new((row - center) * pixel_size, (col - center) * pixel_size)
    }

    /// Inverse of [`SensorConfig::image_from_pixel`], returned as `(col, row)`.
    pub fn pixel_from_image(&self, point: &Point2<f64>) -> (f64, f64) {
        let center = self.rows as f64 / 2.0;
        let pixel_size = self.pixel_size.get::<meter>();
        (point.y / pixel_size + center, point.x / pixel_size + center)
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self::new(
            Length::new::<meter>(1.082),
            Length::new::<micron>(13.0),
            6000,
        )
    }
}
