use crate::{
    error::{Error, Result},
    model::{CollinearityModel, ResidualConvention},
    observation::{ImageSide, Observation, ObservationSet, Role},
    sensor::SensorConfig,
    state::ParameterVector,
};
use nalgebra::{Point3, Vector3};
use std::{io::Write, path::PathBuf};

const HEADER: [&str; 8] = [
    "groundX", "groundY", "groundZ", "leftCol", "leftRow", "rightCol", "rightRow", "tag",
];

/// Known sensor trajectories of a stereo pair.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Scene {
    pub left: ParameterVector,
    pub right: ParameterVector,
}

impl Scene {
    pub fn new(left: ParameterVector, right: ParameterVector) -> Self {
        Self { left, right }
    }

    pub fn params(&self, side: ImageSide) -> &ParameterVector {
        match side {
            ImageSide::Left => &self.left,
            ImageSide::Right => &self.right,
        }
    }
}

/// Produces noiseless observations of a [`Scene`].
///
/// Observations carry both projected coordinates, so [`Simulation::model`]
/// compares them under [`ResidualConvention::Frame`].
pub struct Simulation {
    config: SensorConfig,
    model: CollinearityModel,
}

impl Simulation {
    pub fn new(config: SensorConfig) -> Self {
        Self {
            config,
            model: CollinearityModel::new(config.focal_length(), ResidualConvention::Frame),
        }
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    pub fn model(&self) -> &CollinearityModel {
        &self.model
    }

    /// Projects `ground` into both images at the time of record `index`.
    pub fn observe(&self, scene: &Scene, index: usize, ground: Point3<f64>, role: Role) -> Observation {
        let t = index as f64;
        Observation::new(
            index,
            ground,
            self.model.project(&scene.left, &ground, t),
            self.model.project(&scene.right, &ground, t),
            role,
        )
    }

    pub fn observation_set<I>(&self, scene: &Scene, points: I) -> ObservationSet
    where
        I: IntoIterator<Item = (Point3<f64>, Role)>,
    {
        ObservationSet::from_observations(
            points
                .into_iter()
                .enumerate()
                .map(|(index, (ground, role))| self.observe(scene, index, ground, role)),
        )
    }

    /// Writes `set` as a tagged point file readable by
    /// [`ObservationSet::from_reader`].
    pub fn write_csv<W: Write>(&self, set: &ObservationSet, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(HEADER).map_err(to_io_error)?;

        for obs in set.iter() {
            let ground = obs.ground();
            let (left_col, left_row) = self.config.pixel_from_image(obs.image(ImageSide::Left));
            let (right_col, right_row) = self.config.pixel_from_image(obs.image(ImageSide::Right));
            writer
                .write_record(&[
                    ground.x.to_string(),
                    ground.y.to_string(),
                    ground.z.to_string(),
                    left_col.to_string(),
                    left_row.to_string(),
                    right_col.to_string(),
                    right_row.to_string(),
                    obs.role().tag().to_string(),
                ])
                .map_err(to_io_error)?;
        }

        writer.flush().map_err(|source| Error::Io {
            path: PathBuf::from("<writer>"),
            source,
        })
    }
}

fn to_io_error(err: csv::Error) -> Error {
    Error::Io {
        path: PathBuf::from("<writer>"),
        source: err.into(),
    }
}

/// Regular grid of `cols × rows` ground points spaced `spacing` apart,
/// starting at `origin`. Every `gcp_every`-th point is a control point.
pub fn grid(
    origin: Point3<f64>,
    spacing: f64,
    cols: usize,
    rows: usize,
    gcp_every: usize,
) -> Vec<(Point3<f64>, Role)> {
    (0..rows)
        .flat_map(|row| (0..cols).map(move |col| (col, row)))
        .enumerate()
        .map(|(i, (col, row))| {
            let ground = origin + Vector3::new(col as f64 * spacing, row as f64 * spacing, 0.0);
            let role = if gcp_every > 0 && i % gcp_every == 0 {
                Role::ControlPoint
            } else {
                Role::CheckPoint
            };
            (ground, role)
        })
        .collect()
}
