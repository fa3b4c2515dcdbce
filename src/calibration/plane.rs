use crate::camera::{CalibrationError, Intrinsics};
use crate::geometry::{distance, Ellipse, Homography, Quadrilateral};
use crate::optimization::linear::pose_from_homography;
use log::debug;
use nalgebra::{Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Real-world size of the calibration rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneSize {
    pub width: f64,
    pub height: f64,
}

impl PlaneSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Perspective calibration of a plane from the image of a known rectangle.
///
/// The quadrilateral corners top-left, top-right, bottom-right and bottom-left
/// are the images of the world points `(0, H)`, `(W, H)`, `(W, 0)` and
/// `(0, 0)`: the world y axis points up and the origin is the bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneCalibrator {
    quad: Quadrilateral,
    size: PlaneSize,
    /// World to undistorted pixel.
    to_image: Homography,
    /// Undistorted pixel to world.
    to_world: Homography,
}

impl PlaneCalibrator {
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] if the size is not positive, the
    ///   quadrilateral cannot be the image of a rectangle or the resulting
    ///   mapping is singular.
    pub fn new(quad: Quadrilateral, size: PlaneSize) -> Result<Self, CalibrationError> {
        quad.validate()?;
        let to_image = Homography::rect_to_quad(size.width, size.height, &quad)?;
        let to_world = to_image.inverse()?;
        Ok(Self {
            quad,
            size,
            to_image,
            to_world,
        })
    }

    /// Undistorted corners the calibration was computed from.
    pub fn quad(&self) -> &Quadrilateral {
        &self.quad
    }

    pub fn size(&self) -> PlaneSize {
        self.size
    }

    pub fn homography(&self) -> &Homography {
        &self.to_image
    }

    /// True unless the mapping is affine.
    pub fn is_perspective(&self) -> bool {
        let m = &self.to_image.matrix;
        m[(2, 0)] != 0.0 || m[(2, 1)] != 0.0
    }

    /// World coordinates of an undistorted pixel. `None` for points on the
    /// vanishing line of the plane.
    pub fn to_real(&self, p: &Point2<f64>) -> Option<Point2<f64>> {
        self.to_world.apply(p)
    }

    /// Undistorted pixel of a world point. `None` for points the camera sees
    /// at infinity.
    pub fn to_pixel(&self, p: &Point2<f64>) -> Option<Point2<f64>> {
        self.to_image.apply(p)
    }

    /// World distance between two undistorted image points.
    pub fn measure(&self, a: &Point2<f64>, b: &Point2<f64>) -> Option<f64> {
        Some(distance(&self.to_real(a)?, &self.to_real(b)?))
    }

    /// Undistorted image of the world circle of `radius` around `center`.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] if the circle reaches the
    ///   vanishing line, where its image stops being an ellipse.
    pub fn circle_to_image(&self, center: &Point2<f64>, radius: f64) -> Result<Ellipse, CalibrationError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(CalibrationError::DegenerateInput(format!(
                "circle radius must be positive, got {radius}"
            )));
        }
        self.to_image.map_circle(center, radius)
    }

    /// Position of the camera center in the world frame of the plane, from
    /// the pinhole `intrinsics` of the undistorted image.
    ///
    /// x and y follow the calibrated axes, z is the height above the plane on
    /// the side the camera looks from.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::NumericalError`] if the plane homography and the
    ///   intrinsics do not describe a plane in front of the camera.
    pub fn camera_position(&self, intrinsics: &Intrinsics) -> Result<Vector3<f64>, CalibrationError> {
        let pose = pose_from_homography(intrinsics, &self.to_image)?;
        let position = pose.rotation_matrix().inverse() * -pose.translation;
        debug!(
            "Camera at ({:.3}, {:.3}, {:.3}) in plane coordinates",
            position.x, position.y, position.z
        );
        Ok(position)
    }
}
