//! Video Calibration Library
//!
//! Geometric calibration for measuring in video frames. Raw image coordinates are
//! turned into real-world positions, distances, speeds and angles in three steps:
//!
//! 1. Lens distortion is removed with a radial-tangential [`DistortionModel`],
//!    either imported from a file or estimated by the [`CameraCalibrator`] from
//!    views of a planar pattern.
//! 2. A metric calibrator maps undistorted pixels to the world: a
//!    [`LineCalibrator`] (one segment of known length) or a [`PlaneCalibrator`]
//!    (the image of a known rectangle, or a square built on a segment).
//! 3. The [`CalibrationCoordinator`] ties both together, handles the world
//!    origin and formats values in the selected units.
//!
//! Calibrations are saved as JSON, distortion parameters as YAML (native or
//! Kalibr camchain) or Agisoft Lens XML, and pattern correspondences as CSV.

pub mod calibration;
pub mod camera;
pub mod config;
pub mod geometry;
pub mod io;
pub mod optimization;
pub mod units;

// Re-export commonly used types
pub use calibration::{
    CalibrationAxis, CalibrationCoordinator, CalibrationDocument, CalibrationSnapshot,
    CalibratorType, LineCalibrator, PlaneCalibrator, PlaneSize,
};
pub use camera::{
    CalibrationError, DistortionModel, DistortionParameters, Intrinsics, Resolution,
    UndistortSettings,
};
pub use config::CalibrationConfig;
pub use geometry::{Ellipse, Homography, Quadrilateral};
pub use io::{AgisoftLensFile, DistortionFile, KalibrFile, NativeDistortionFile};
pub use optimization::{CalibrationOutcome, CameraCalibrator, Optimizer, PatternView};
pub use units::{DisplayUnits, LengthUnit, UnitRegistry};
