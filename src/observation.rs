use crate::{
    error::{Error, Result},
    sensor::SensorConfig,
};
use nalgebra::{Point2, Point3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Read, path::Path};

/// Number of fields in one input record.
const FIELD_COUNT: usize = 8;

/// Which image of the stereo pair an image coordinate belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ImageSide {
    Left,
    Right,
}

impl ImageSide {
    pub const BOTH: [ImageSide; 2] = [ImageSide::Left, ImageSide::Right];

    pub fn name(&self) -> &'static str {
        match self {
            ImageSide::Left => "Left",
            ImageSide::Right => "Right",
        }
    }
}

/// Role of an observation in the adjustment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Role {
    /// Used to fit the sensor parameters.
    ControlPoint,
    /// Withheld from the fit and used to measure accuracy.
    CheckPoint,
}

impl Role {
    /// Tag `1` marks a control point. Every other tag is a check point.
    pub fn from_tag(tag: i64) -> Self {
        match tag {
            1 => Role::ControlPoint,
            _ => Role::CheckPoint,
        }
    }

    pub fn tag(&self) -> i64 {
        match self {
            Role::ControlPoint => 1,
            Role::CheckPoint => 0,
        }
    }
}

/// A ground point matched in both images.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Observation {
    index: usize,
    ground: Point3<f64>,
    left: Point2<f64>,
    right: Point2<f64>,
    role: Role,
}

impl Observation {
    pub fn new(
        index: usize,
        ground: Point3<f64>,
        left: Point2<f64>,
        right: Point2<f64>,
        role: Role,
    ) -> Self {
        Self {
            index,
            ground,
            left,
            right,
            role,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ground(&self) -> &Point3<f64> {
        &self.ground
    }

    /// Metric image coordinate of this point in `side`.
    pub fn image(&self, side: ImageSide) -> &Point2<f64> {
        match side {
            ImageSide::Left => &self.left,
            ImageSide::Right => &self.right,
        }
    }

    /// Acquisition time of the point.
    ///
    /// This is the record index, which assumes the points were sampled at a
    /// uniform unit interval. Telemetry with irregular sampling needs real
    /// timestamps instead.
    pub fn time(&self) -> f64 {
        self.index as f64
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

/// Every observation of one acquisition, in record order.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ObservationSet {
    observations: Vec<Observation>,
}

impl ObservationSet {
    /// Builds a set from observations already in memory.
    ///
    /// Indices are reassigned in iteration order so that the time tag of each
    /// observation matches its position.
    pub fn from_observations(observations: impl IntoIterator<Item = Observation>) -> Self {
        Self {
            observations: observations
                .into_iter()
                .enumerate()
                .map(|(index, obs)| Observation { index, ..obs })
                .collect(),
        }
    }

    /// Loads a tagged point file from `path`.
    pub fn from_path<P: AsRef<Path>>(path: P, config: &SensorConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(file, config, path)
    }

    /// Loads tagged points from any reader.
    ///
    /// The first line is a header. Each following line holds `groundX,
    /// groundY, groundZ, leftCol, leftRow, rightCol, rightRow, tag`.
    pub fn from_reader<R: Read>(reader: R, config: &SensorConfig) -> Result<Self> {
        Self::parse(reader, config, Path::new("<reader>"))
    }

    fn parse<R: Read>(reader: R, config: &SensorConfig, source: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut observations = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| from_csv_error(err, source))?;
            let line = record.position().map_or(0, |pos| pos.line());
            let index = observations.len();
            observations.push(parse_record(&record, line, index, config)?);
        }

        if observations.is_empty() {
            return Err(Error::EmptyData);
        }

        Ok(Self { observations })
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    pub fn with_role(&self, role: Role) -> impl Iterator<Item = &Observation> {
        self.observations.iter().filter(move |obs| obs.role == role)
    }

    pub fn control_points(&self) -> impl Iterator<Item = &Observation> {
        self.with_role(Role::ControlPoint)
    }

    pub fn check_points(&self) -> impl Iterator<Item = &Observation> {
        self.with_role(Role::CheckPoint)
    }
}

fn from_csv_error(err: csv::Error, source: &Path) -> Error {
    let line = err.position().map_or(0, |pos| pos.line());
    let reason = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source_err) => Error::Io {
            path: source.to_path_buf(),
            source: source_err,
        },
        _ => Error::Parse { line, reason },
    }
}

fn parse_record(
    record: &csv::StringRecord,
    line: u64,
    index: usize,
    config: &SensorConfig,
) -> Result<Observation> {
    if record.len() != FIELD_COUNT {
        return Err(Error::Parse {
            line,
            reason: format!("expected {FIELD_COUNT} fields, found {}", record.len()),
        });
    }

    let mut values = [0.0; FIELD_COUNT - 1];
    for (value, field) in values.iter_mut().zip(record.iter()) {
        *value = field
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| Error::Parse {
                line,
                reason: format!("`{field}` is not a finite number"),
            })?;
    }

    let tag_field = &record[FIELD_COUNT - 1];
    let tag = tag_field.parse::<i64>().map_err(|_| Error::Parse {
        line,
        reason: format!("`{tag_field}` is not an integer tag"),
    })?;

    let [gx, gy, gz, left_col, left_row, right_col, right_row] = values;
    Ok(Observation::new(
        index,
        Point3::new(gx, gy, gz),
        config.image_from_pixel(left_col, left_row),
        config.image_from_pixel(right_col, right_row),
        Role::from_tag(tag),
    ))
}
