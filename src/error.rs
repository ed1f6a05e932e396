use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record on line {line}: {reason}")]
    Parse { line: u64, reason: String },

    #[error("no observations follow the header")]
    EmptyData,

    #[error("conformal seed needs at least {required} control points, found {found}")]
    InsufficientData { required: usize, found: usize },

    #[error("control points do not span the image plane")]
    DegenerateGeometry,

    #[error("damped normal equations are not positive definite at damping {damping:e}")]
    SingularJacobian { damping: f64 },

    #[error("failed to converge after {iterations} iterations: cost {cost:e}")]
    NonConvergence { iterations: usize, cost: f64 },

    #[error("initial cost is not finite")]
    NonFiniteCost,

    #[error("no check points to evaluate")]
    EmptyInput,
}
