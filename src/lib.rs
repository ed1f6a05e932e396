// #![warn(missing_docs)]

//! Space Resection for Stereo Line-Scanner Imagery
//!
//! Recovers the time-varying exterior orientation of each image of a stereo
//! pair from ground control points. Each of the six orientation elements is
//! a quadratic polynomial in time, seeded from a conformal transform and
//! refined with Levenberg-Marquardt over the collinearity equations.
//! Accuracy is reported as the reprojection RMSE over independent check
//! points.

#[allow(missing_docs)]
pub mod error;

pub mod estimator;
pub mod model;
pub mod observation;
pub mod pipeline;
pub mod rmse;
pub mod sensor;
pub mod simulation;
pub mod solver;
pub mod state;
