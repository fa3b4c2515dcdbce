use crate::camera::CalibrationError;
use crate::geometry::distance;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Below this many pixels two points are considered the same.
const MIN_PIXEL_DISTANCE: f64 = 1e-9;

/// Uniform scale calibration from one segment of known length.
///
/// Points are expected in undistorted pixel space. World coordinates have the
/// y axis pointing up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineCalibrator {
    /// Real units per undistorted pixel.
    ratio: f64,
}

impl LineCalibrator {
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] unless `ratio` is finite and positive.
    pub fn new(ratio: f64) -> Result<Self, CalibrationError> {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(CalibrationError::DegenerateInput(format!(
                "scale ratio must be positive, got {ratio}"
            )));
        }
        Ok(Self { ratio })
    }

    /// Calibrates from the segment `a`-`b` measuring `real_length` units.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] if the points coincide or the
    ///   length is not a positive number.
    pub fn from_points(
        a: &Point2<f64>,
        b: &Point2<f64>,
        real_length: f64,
    ) -> Result<Self, CalibrationError> {
        if !(real_length.is_finite() && real_length > 0.0) {
            return Err(CalibrationError::DegenerateInput(format!(
                "segment length must be positive, got {real_length}"
            )));
        }
        let pixels = distance(a, b);
        if !(pixels > MIN_PIXEL_DISTANCE) {
            return Err(CalibrationError::DegenerateInput(
                "segment end points coincide".to_string(),
            ));
        }
        Self::new(real_length / pixels)
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn measure(&self, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
        self.ratio * distance(a, b)
    }

    pub fn to_real(&self, p: &Point2<f64>) -> Point2<f64> {
        Point2::new(p.x * self.ratio, -p.y * self.ratio)
    }

    pub fn to_pixel(&self, p: &Point2<f64>) -> Point2<f64> {
        Point2::new(p.x / self.ratio, -p.y / self.ratio)
    }
}
