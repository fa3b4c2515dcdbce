//! Metric calibration: turning undistorted pixels into real-world values.
//!
//! - [`line`]: one segment of known length gives a uniform scale.
//! - [`plane`]: the image of a known rectangle gives a plane homography.
//! - [`coordinator`]: the single entry point combining the lens distortion
//!   model, the active calibrator, the world origin and the display units.
//! - [`persistence`]: the serializable calibration document.

use serde::{Deserialize, Serialize};

pub mod coordinator;
pub mod line;
pub mod persistence;
pub mod plane;

pub use coordinator::{CalibrationCoordinator, CalibrationSnapshot, LineInput, PlaneInput};
pub use line::LineCalibrator;
pub use persistence::CalibrationDocument;
pub use plane::{PlaneCalibrator, PlaneSize};

/// Which metric calibration is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CalibratorType {
    #[default]
    Uncalibrated,
    Line,
    Plane,
}

/// Orientation of the world axes of a line calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CalibrationAxis {
    /// The segment is the world x axis.
    LineHorizontal,
    /// The segment is the world y axis.
    LineVertical,
    /// World axes follow the image axes; only the scale is calibrated.
    #[default]
    ImageAxes,
}
