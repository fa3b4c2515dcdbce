//! Camera-side types shared by the whole crate.
//!
//! This module holds the pinhole [`Intrinsics`], the image [`Resolution`], the
//! crate-wide [`CalibrationError`] and the lens distortion machinery:
//!
//! - [`parameters`]: the [`DistortionParameters`] value bound to an image size.
//! - [`rad_tan`]: the radial-tangential [`DistortionModel`] (forward model and
//!   Newton inverse for points).
//! - [`remap`]: bulk image undistortion and the diagnostic distortion grid.

use serde::{Deserialize, Serialize};

pub mod parameters;
pub mod rad_tan;
pub mod remap;

pub use parameters::DistortionParameters;
pub use rad_tan::{DistortionModel, UndistortSettings, Undistortion};

/// Pinhole intrinsics: focal scales and principal point, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// Relative difference under which two aspect ratios are considered equal.
pub const ASPECT_RATIO_TOLERANCE: f64 = 1e-3;

/// Image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width over height, or `None` for an empty image.
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.width == 0 || self.height == 0 {
            None
        } else {
            Some(self.width as f64 / self.height as f64)
        }
    }

    /// True when both sizes are non-empty and their aspect ratios differ by
    /// less than [`ASPECT_RATIO_TOLERANCE`].
    pub fn same_aspect_ratio(&self, other: &Resolution) -> bool {
        match (self.aspect_ratio(), other.aspect_ratio()) {
            (Some(a), Some(b)) => ((a - b) / b).abs() < ASPECT_RATIO_TOLERANCE,
            _ => false,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),
    #[error("Did not converge after {iterations} iterations (residual {residual:e})")]
    NonConvergence { iterations: usize, residual: f64 },
    #[error("Failed to parse imported file: {0}")]
    ImportParseFailure(String),
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
    #[error("IO Error: {0}")]
    IOError(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("JSON error: {0}")]
    JsonError(String),
    #[error("CSV error: {0}")]
    CsvError(String),
    #[error("Image error: {0}")]
    ImageError(String),
}

impl From<std::io::Error> for CalibrationError {
    fn from(err: std::io::Error) -> Self {
        CalibrationError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CalibrationError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CalibrationError::YamlError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CalibrationError {
    fn from(err: serde_yaml::Error) -> Self {
        CalibrationError::YamlError(err.to_string())
    }
}

impl From<serde_json::Error> for CalibrationError {
    fn from(err: serde_json::Error) -> Self {
        CalibrationError::JsonError(err.to_string())
    }
}

impl From<csv::Error> for CalibrationError {
    fn from(err: csv::Error) -> Self {
        CalibrationError::CsvError(err.to_string())
    }
}

impl From<image::ImageError> for CalibrationError {
    fn from(err: image::ImageError) -> Self {
        CalibrationError::ImageError(err.to_string())
    }
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CalibrationError> {
        if !(intrinsics.fx > 0.0 && intrinsics.fy > 0.0)
            || !intrinsics.fx.is_finite()
            || !intrinsics.fy.is_finite()
        {
            return Err(CalibrationError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CalibrationError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    pub fn validate_distortions(distortions: &[f64; 5]) -> Result<(), CalibrationError> {
        if let Some(i) = distortions.iter().position(|d| !d.is_finite()) {
            return Err(CalibrationError::InvalidCalibration(format!(
                "distortion coefficient at index {i} is not finite"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_intrinsics() {
        let good = Intrinsics {
            fx: 800.0,
            fy: 800.0,
            cx: 320.0,
            cy: 240.0,
        };
        assert!(validation::validate_intrinsics(&good).is_ok());

        let zero_focal = Intrinsics { fx: 0.0, ..good };
        assert!(matches!(
            validation::validate_intrinsics(&zero_focal),
            Err(CalibrationError::FocalLengthMustBePositive)
        ));

        let nan_focal = Intrinsics { fy: f64::NAN, ..good };
        assert!(validation::validate_intrinsics(&nan_focal).is_err());

        let inf_center = Intrinsics {
            cx: f64::INFINITY,
            ..good
        };
        assert!(matches!(
            validation::validate_intrinsics(&inf_center),
            Err(CalibrationError::PrincipalPointMustBeFinite)
        ));
    }

    #[test]
    fn test_validate_distortions() {
        assert!(validation::validate_distortions(&[0.1, -0.05, 0.001, 0.0, 0.0]).is_ok());
        assert!(matches!(
            validation::validate_distortions(&[0.1, f64::NAN, 0.0, 0.0, 0.0]),
            Err(CalibrationError::InvalidCalibration(_))
        ));
    }

    #[test]
    fn test_resolution_aspect_ratio() {
        assert_eq!(Resolution::new(640, 480).aspect_ratio(), Some(640.0 / 480.0));
        assert_eq!(Resolution::new(0, 480).aspect_ratio(), None);
        assert!(Resolution::new(640, 480).same_aspect_ratio(&Resolution::new(1280, 960)));
        assert!(Resolution::new(1920, 1080).same_aspect_ratio(&Resolution::new(1366, 768)));
        assert!(!Resolution::new(640, 480).same_aspect_ratio(&Resolution::new(1920, 1080)));
        assert!(!Resolution::new(0, 480).same_aspect_ratio(&Resolution::new(0, 480)));
    }
}
