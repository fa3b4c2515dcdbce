//! Implements the radial-tangential lens distortion model in pixel space.
//!
//! [`DistortionModel`] binds a [`DistortionParameters`] set to the image size it
//! was computed for and converts points between the distorted space (what the
//! camera recorded) and the ideal, rectified space (what a pinhole camera would
//! have recorded). A model is immutable once built: replacing the parameters
//! means building a new model, so a worker holding an older model keeps a
//! consistent snapshot.

use crate::camera::parameters::DistortionParameters;
use crate::camera::remap::RemapTable;
use crate::camera::{CalibrationError, Resolution};
use crate::geometry::Quadrilateral;
use log::{debug, info, warn};
use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Number of points inserted between the end points of a distorted segment.
const LINE_INNER_POINTS: usize = 5;

/// Sampling resolution of the monotonicity scan over the radius range.
const MONOTONIC_SCAN_STEPS: usize = 2000;

/// Iteration budget and tolerance of the Newton inversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortSettings {
    /// Maximum number of Newton steps per point.
    pub max_iterations: usize,
    /// Convergence threshold on the residual, in focal-normalized units.
    pub tolerance: f64,
}

impl Default for UndistortSettings {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            tolerance: 1e-10,
        }
    }
}

/// Result of an undistortion with its convergence status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Undistortion {
    /// Best ideal-space estimate, in pixels.
    pub point: Point2<f64>,
    pub converged: bool,
    pub iterations: usize,
    /// Distance between the re-distorted estimate and the input, normalized units.
    pub residual: f64,
}

/// Radial-tangential distortion bound to an image size.
///
/// # Examples
///
/// ```rust
/// use nalgebra::Point2;
/// use video_calibration::camera::{DistortionModel, DistortionParameters, Intrinsics, Resolution};
///
/// let params = DistortionParameters::new(
///     Intrinsics { fx: 500.0, fy: 500.0, cx: 320.0, cy: 240.0 },
///     [-0.2, 0.05, 0.0, 0.0, 0.0],
///     Resolution::new(640, 480),
/// );
/// let model = DistortionModel::initialize(params, Resolution::new(640, 480)).unwrap();
///
/// let observed = Point2::new(600.0, 400.0);
/// let ideal = model.undistort(&observed);
/// let back = model.distort(&ideal);
/// assert!((back - observed).norm() < 1e-6);
/// ```
#[derive(Clone)]
pub struct DistortionModel {
    parameters: DistortionParameters,
    settings: UndistortSettings,
    /// Normalized radius past which the radial factor is frozen.
    radius_limit: Option<f64>,
    remap: OnceLock<RemapTable>,
}

impl DistortionModel {
    /// The "no distortion" model for an image size.
    pub fn identity(image_size: Resolution) -> Self {
        Self {
            parameters: DistortionParameters::identity(image_size),
            settings: UndistortSettings::default(),
            radius_limit: None,
            remap: OnceLock::new(),
        }
    }

    /// Builds a model for images of `image_size`.
    ///
    /// A parameter set that was never filled in (principal point at the origin)
    /// falls back to the identity model.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidCalibration`] if `image_size` differs from the
    ///   size recorded in `parameters`, or if the parameters are not usable
    ///   (non-positive focal scale, non-finite values).
    pub fn initialize(
        parameters: DistortionParameters,
        image_size: Resolution,
    ) -> Result<Self, CalibrationError> {
        if parameters.is_unset() {
            info!(
                "Distortion parameters are unset, using identity for {}x{}",
                image_size.width, image_size.height
            );
            return Ok(Self::identity(image_size));
        }

        if parameters.resolution != image_size {
            return Err(CalibrationError::InvalidCalibration(format!(
                "parameters were computed for {}x{} but the image is {}x{}",
                parameters.resolution.width,
                parameters.resolution.height,
                image_size.width,
                image_size.height
            )));
        }

        parameters
            .validate_params()
            .map_err(|e| CalibrationError::InvalidCalibration(e.to_string()))?;

        let radius_limit = if parameters.is_identity() {
            None
        } else {
            find_radius_limit(&parameters)
        };

        if let Some(limit) = radius_limit {
            warn!(
                "Radial distortion is not monotonic past normalized radius {:.4}, clamping",
                limit
            );
        }

        Ok(Self {
            parameters,
            settings: UndistortSettings::default(),
            radius_limit,
            remap: OnceLock::new(),
        })
    }

    /// Same as [`Self::initialize`] but rescales the intrinsics when the recorded
    /// size differs from `image_size`.
    pub fn initialize_rescaled(
        parameters: DistortionParameters,
        image_size: Resolution,
    ) -> Result<Self, CalibrationError> {
        if parameters.is_unset() || parameters.resolution == image_size {
            return Self::initialize(parameters, image_size);
        }

        debug!(
            "Rescaling distortion parameters from {}x{} to {}x{}",
            parameters.resolution.width,
            parameters.resolution.height,
            image_size.width,
            image_size.height
        );
        Self::initialize(parameters.rescaled(image_size)?, image_size)
    }

    pub fn with_settings(mut self, settings: UndistortSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn parameters(&self) -> &DistortionParameters {
        &self.parameters
    }

    pub fn resolution(&self) -> Resolution {
        self.parameters.resolution
    }

    pub fn settings(&self) -> UndistortSettings {
        self.settings
    }

    /// Normalized radius where the radial polynomial stops being monotonic, if any.
    pub fn radius_limit(&self) -> Option<f64> {
        self.radius_limit
    }

    pub fn is_monotonic(&self) -> bool {
        self.radius_limit.is_none()
    }

    pub fn is_identity(&self) -> bool {
        self.parameters.is_identity()
    }

    pub(crate) fn remap_table(&self) -> &RemapTable {
        self.remap.get_or_init(|| RemapTable::build(self))
    }

    fn normalize(&self, point: &Point2<f64>) -> Vector2<f64> {
        let intrinsics = &self.parameters.intrinsics;
        Vector2::new(
            (point.x - intrinsics.cx) / intrinsics.fx,
            (point.y - intrinsics.cy) / intrinsics.fy,
        )
    }

    fn denormalize(&self, point: &Vector2<f64>) -> Point2<f64> {
        let intrinsics = &self.parameters.intrinsics;
        Point2::new(
            point.x * intrinsics.fx + intrinsics.cx,
            point.y * intrinsics.fy + intrinsics.cy,
        )
    }

    /// Forward model on normalized coordinates, with its Jacobian.
    fn distort_normalized(&self, point: &Vector2<f64>) -> (Vector2<f64>, Matrix2<f64>) {
        let [k1, k2, p1, p2, k3] = self.parameters.distortions;
        let x = point.x;
        let y = point.y;
        let r2 = x * x + y * y;

        // Past the limit the radial factor is frozen, so its gradient vanishes.
        let (radial, d_radial_dr2) = match self.radius_limit {
            Some(limit) if r2 > limit * limit => {
                let l2 = limit * limit;
                (1.0 + k1 * l2 + k2 * l2 * l2 + k3 * l2 * l2 * l2, 0.0)
            }
            _ => (
                1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2,
                k1 + 2.0 * k2 * r2 + 3.0 * k3 * r2 * r2,
            ),
        };

        let distorted = Vector2::new(
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        );

        let d_radial_dx = d_radial_dr2 * 2.0 * x;
        let d_radial_dy = d_radial_dr2 * 2.0 * y;

        let j00 = radial + x * d_radial_dx + 2.0 * p1 * y + 6.0 * p2 * x;
        let j01 = x * d_radial_dy + 2.0 * p1 * x + 2.0 * p2 * y;
        let j10 = y * d_radial_dx + 2.0 * p1 * x + 2.0 * p2 * y;
        let j11 = radial + y * d_radial_dy + 6.0 * p1 * y + 2.0 * p2 * x;

        (distorted, Matrix2::new(j00, j01, j10, j11))
    }

    /// Maps an ideal (rectified) pixel to where the lens actually images it.
    pub fn distort(&self, point: &Point2<f64>) -> Point2<f64> {
        if self.is_identity() {
            return *point;
        }
        let (distorted, _) = self.distort_normalized(&self.normalize(point));
        self.denormalize(&distorted)
    }

    /// Removes lens distortion from an observed pixel.
    ///
    /// Never fails: when the Newton iteration does not reach the tolerance the
    /// best iterate is returned and a warning is logged.
    pub fn undistort(&self, point: &Point2<f64>) -> Point2<f64> {
        let result = self.undistort_detailed(point);
        if !result.converged {
            warn!(
                "Undistortion of ({:.2}, {:.2}) did not converge after {} iterations (residual {:e})",
                point.x, point.y, result.iterations, result.residual
            );
        }
        result.point
    }

    /// Newton inversion of the forward model, reporting convergence.
    pub fn undistort_detailed(&self, point: &Point2<f64>) -> Undistortion {
        if self.is_identity() {
            return Undistortion {
                point: *point,
                converged: true,
                iterations: 0,
                residual: 0.0,
            };
        }

        let target = self.normalize(point);
        let max_iterations = self.settings.max_iterations;

        // Start from the distorted point itself.
        let mut estimate = target;
        let mut best = (target, f64::INFINITY);
        let mut iterations = 0;

        for iteration in 0..=max_iterations {
            iterations = iteration;
            let (distorted, jacobian) = self.distort_normalized(&estimate);
            let error = distorted - target;
            let residual = error.norm();

            if !residual.is_finite() {
                break;
            }
            if residual < best.1 {
                best = (estimate, residual);
            }
            if residual < self.settings.tolerance {
                return Undistortion {
                    point: self.denormalize(&estimate),
                    converged: true,
                    iterations: iteration,
                    residual,
                };
            }
            if iteration == max_iterations {
                break;
            }

            match jacobian.try_inverse() {
                Some(inverse) => estimate -= inverse * error,
                None => {
                    debug!("Singular Jacobian while undistorting at iteration {iteration}");
                    break;
                }
            }
        }

        Undistortion {
            point: self.denormalize(&best.0),
            converged: false,
            iterations,
            residual: best.1,
        }
    }

    pub fn undistort_quad(&self, quad: &Quadrilateral) -> Quadrilateral {
        Quadrilateral::new(
            self.undistort(&quad.a),
            self.undistort(&quad.b),
            self.undistort(&quad.c),
            self.undistort(&quad.d),
        )
    }

    /// A straight segment of the distorted image, returned as a polyline in
    /// distorted space that follows the lens curvature.
    pub fn distort_line(&self, start: &Point2<f64>, end: &Point2<f64>) -> Vec<Point2<f64>> {
        let mut points = Vec::with_capacity(LINE_INNER_POINTS + 2);
        points.push(*start);
        self.push_inner_points(&self.undistort(start), &self.undistort(end), &mut points);
        points.push(*end);
        points
    }

    /// A straight segment of the rectified image, returned as a polyline in
    /// distorted space.
    pub fn distort_rectified_line(
        &self,
        start: &Point2<f64>,
        end: &Point2<f64>,
    ) -> Vec<Point2<f64>> {
        let mut points = Vec::with_capacity(LINE_INNER_POINTS + 2);
        points.push(self.distort(start));
        self.push_inner_points(start, end, &mut points);
        points.push(self.distort(end));
        points
    }

    fn push_inner_points(
        &self,
        start: &Point2<f64>,
        end: &Point2<f64>,
        points: &mut Vec<Point2<f64>>,
    ) {
        let factor = 1.0 / (LINE_INNER_POINTS as f64 + 1.0);
        let direction = end - start;
        for i in 1..=LINE_INNER_POINTS {
            let ideal = start + direction * (i as f64 * factor);
            points.push(self.distort(&ideal));
        }
    }
}

impl fmt::Debug for DistortionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DistortionModel [{:?} radius_limit: {:?}]",
            self.parameters, self.radius_limit
        )
    }
}

/// First normalized radius where `d/dr (r * radial(r))` reaches zero, searched
/// up to twice the radius of the farthest image corner.
fn find_radius_limit(parameters: &DistortionParameters) -> Option<f64> {
    let [k1, k2, _, _, k3] = parameters.distortions;
    let derivative = |r: f64| {
        let r2 = r * r;
        1.0 + 3.0 * k1 * r2 + 5.0 * k2 * r2 * r2 + 7.0 * k3 * r2 * r2 * r2
    };

    let intrinsics = &parameters.intrinsics;
    let width = parameters.resolution.width as f64;
    let height = parameters.resolution.height as f64;
    let corner_radius = [(0.0, 0.0), (width, 0.0), (width, height), (0.0, height)]
        .iter()
        .map(|(u, v)| {
            let x = (u - intrinsics.cx) / intrinsics.fx;
            let y = (v - intrinsics.cy) / intrinsics.fy;
            (x * x + y * y).sqrt()
        })
        .fold(0.0_f64, f64::max);

    let search_radius = 2.0 * corner_radius;
    if search_radius <= 0.0 {
        return None;
    }

    let step = search_radius / MONOTONIC_SCAN_STEPS as f64;
    let mut previous = 0.0;
    for i in 1..=MONOTONIC_SCAN_STEPS {
        let r = i as f64 * step;
        if derivative(r) <= 0.0 {
            // Bisect between the last monotonic sample and this one.
            let (mut lo, mut hi) = (previous, r);
            for _ in 0..60 {
                let mid = 0.5 * (lo + hi);
                if derivative(mid) > 0.0 {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            return Some(lo);
        }
        previous = r;
    }
    None
}
