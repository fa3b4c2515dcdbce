//! The distortion parameter set: intrinsics, five rad-tan coefficients and the
//! image size they were estimated for.

use crate::camera::{validation, CalibrationError, Intrinsics, Resolution};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A lens calibration bound to one image size.
///
/// The coefficients are stored as `[k1, k2, p1, p2, k3]`:
/// * `k1`, `k2`, `k3`: radial distortion coefficients.
/// * `p1`, `p2`: tangential distortion coefficients.
///
/// They act on focal-normalized coordinates `((u - cx) / fx, (v - cy) / fy)`, so a
/// change of image size only rescales the intrinsics (see [`Self::rescaled`]).
///
/// # Examples
///
/// ```rust
/// use video_calibration::camera::{DistortionParameters, Intrinsics, Resolution};
///
/// let params = DistortionParameters::new(
///     Intrinsics { fx: 500.0, fy: 500.0, cx: 320.0, cy: 240.0 },
///     [0.1, -0.05, 0.001, 0.001, 0.02],
///     Resolution::new(640, 480),
/// );
/// assert_eq!(params.k1(), 0.1);
/// assert!(!params.is_identity());
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DistortionParameters {
    pub intrinsics: Intrinsics,
    pub distortions: [f64; 5], // k1, k2, p1, p2, k3
    pub resolution: Resolution,
}

impl DistortionParameters {
    pub fn new(intrinsics: Intrinsics, distortions: [f64; 5], resolution: Resolution) -> Self {
        Self {
            intrinsics,
            distortions,
            resolution,
        }
    }

    /// The "no distortion" set for `resolution`: zero coefficients, unit focal
    /// scale and the principal point at the image center.
    pub fn identity(resolution: Resolution) -> Self {
        Self {
            intrinsics: Intrinsics {
                fx: 1.0,
                fy: 1.0,
                cx: resolution.width as f64 / 2.0,
                cy: resolution.height as f64 / 2.0,
            },
            distortions: [0.0; 5],
            resolution,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.distortions.iter().all(|d| *d == 0.0)
    }

    /// A parameter set that was never filled in. Project files written before
    /// any lens calibration carry zeros for the principal point.
    pub fn is_unset(&self) -> bool {
        self.intrinsics.cx == 0.0 && self.intrinsics.cy == 0.0
    }

    /// Rescales the intrinsics to another image size.
    ///
    /// `fx` and `cx` follow the width ratio, `fy` and `cy` the height ratio. The
    /// coefficients are unchanged.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidCalibration`] if either size is empty.
    pub fn rescaled(&self, to: Resolution) -> Result<Self, CalibrationError> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(CalibrationError::InvalidCalibration(
                "cannot rescale a parameter set recorded for an empty image".to_string(),
            ));
        }
        if to.width == 0 || to.height == 0 {
            return Err(CalibrationError::InvalidCalibration(
                "cannot rescale a parameter set to an empty image".to_string(),
            ));
        }

        let sx = to.width as f64 / self.resolution.width as f64;
        let sy = to.height as f64 / self.resolution.height as f64;

        Ok(Self {
            intrinsics: Intrinsics {
                fx: self.intrinsics.fx * sx,
                fy: self.intrinsics.fy * sy,
                cx: self.intrinsics.cx * sx,
                cy: self.intrinsics.cy * sy,
            },
            distortions: self.distortions,
            resolution: to,
        })
    }

    /// Physical focal length in millimeters given the sensor width.
    pub fn focal_length_mm(&self, sensor_width_mm: f64) -> Option<f64> {
        if sensor_width_mm <= 0.0 || self.resolution.width == 0 {
            return None;
        }
        let pixels_per_mm = self.resolution.width as f64 / sensor_width_mm;
        Some(self.intrinsics.fx / pixels_per_mm)
    }

    pub fn validate_params(&self) -> Result<(), CalibrationError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        validation::validate_distortions(&self.distortions)?;
        Ok(())
    }

    pub fn k1(&self) -> f64 {
        self.distortions[0]
    }

    pub fn k2(&self) -> f64 {
        self.distortions[1]
    }

    pub fn p1(&self) -> f64 {
        self.distortions[2]
    }

    pub fn p2(&self) -> f64 {
        self.distortions[3]
    }

    pub fn k3(&self) -> f64 {
        self.distortions[4]
    }
}

impl fmt::Debug for DistortionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DistortionParameters [fx: {} fy: {} cx: {} cy: {} distortions: {:?} resolution: {}x{}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.distortions,
            self.resolution.width,
            self.resolution.height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_parameters() -> DistortionParameters {
        DistortionParameters::new(
            Intrinsics {
                fx: 461.629,
                fy: 460.152,
                cx: 362.680,
                cy: 246.049,
            },
            [-0.28340811, 0.07395907, 0.00019359, 1.76187114e-05, 0.0],
            Resolution::new(752, 480),
        )
    }

    #[test]
    fn test_identity_parameters() {
        let identity = DistortionParameters::identity(Resolution::new(1920, 1080));
        assert!(identity.is_identity());
        assert!(!identity.is_unset());
        assert_eq!(identity.intrinsics.cx, 960.0);
        assert_eq!(identity.intrinsics.cy, 540.0);
        assert!(identity.validate_params().is_ok());
    }

    #[test]
    fn test_rescaled_parameters() {
        let params = sample_parameters();
        let half = params.rescaled(Resolution::new(376, 240)).unwrap();

        assert_relative_eq!(half.intrinsics.fx, params.intrinsics.fx / 2.0, epsilon = 1e-12);
        assert_relative_eq!(half.intrinsics.fy, params.intrinsics.fy / 2.0, epsilon = 1e-12);
        assert_relative_eq!(half.intrinsics.cx, params.intrinsics.cx / 2.0, epsilon = 1e-12);
        assert_relative_eq!(half.intrinsics.cy, params.intrinsics.cy / 2.0, epsilon = 1e-12);
        assert_eq!(half.distortions, params.distortions);
        assert_eq!(half.resolution, Resolution::new(376, 240));

        assert!(params.rescaled(Resolution::new(0, 240)).is_err());
    }

    #[test]
    fn test_focal_length_mm() {
        let params = sample_parameters();
        // 752 px over a 4.8 mm sensor.
        let focal = params.focal_length_mm(4.8).unwrap();
        assert_relative_eq!(focal, 461.629 / (752.0 / 4.8), epsilon = 1e-12);
        assert!(params.focal_length_mm(0.0).is_none());
    }

    #[test]
    fn test_coefficient_accessors() {
        let params = sample_parameters();
        assert_eq!(params.k1(), -0.28340811);
        assert_eq!(params.k2(), 0.07395907);
        assert_eq!(params.p1(), 0.00019359);
        assert_eq!(params.p2(), 1.76187114e-05);
        assert_eq!(params.k3(), 0.0);
    }
}
