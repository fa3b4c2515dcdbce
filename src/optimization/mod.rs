//! The `optimization` module estimates lens distortion parameter sets from
//! observations of a planar calibration pattern.
//!
//! This module defines the [`Optimizer`] trait, which outlines the two stages
//! of a calibration:
//! 1. A linear estimation step giving a closed-form seed for every parameter.
//! 2. A non-linear optimization step (Levenberg-Marquardt) refining all of them
//!    by minimizing the reprojection error between the observed image points and
//!    the projected pattern points.
//!
//! [`CameraCalibrator`] implements both stages for the radial-tangential model.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod camera_calibrator;
pub mod linear;

pub use camera_calibrator::{
    CalibrationOutcome, CalibratorSettings, CameraCalibrator, PatternView, MIN_POINTS_PER_VIEW,
    MIN_VIEWS,
};
pub use linear::PlanarPose;

use crate::camera::{CalibrationError, DistortionParameters, Intrinsics, Resolution};
use log::warn;
use nalgebra::Vector3;

/// Statistics of the reprojection error over all points, in pixels.
///
/// Points that fall behind the camera have no reprojection; they are left out
/// of the statistics and counted in `behind_camera`.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProjectionError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
    pub behind_camera: usize,
}

impl fmt::Debug for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Projection Error [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {}, behind camera: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median, self.behind_camera
        )
    }
}

/// A trait for calibration tasks.
///
/// Types implementing `Optimizer` refine a parameter set so that it explains a
/// set of 2D observations of known planar points.
pub trait Optimizer {
    /// Performs non-linear optimization to refine the parameters.
    ///
    /// # Arguments
    ///
    /// * `verbose` - If `true`, the optimizer logs progress information at
    ///   `info` level.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the optimization was successful and the parameters
    ///   have been updated.
    /// * `Err(CalibrationError)` - If an error occurred during optimization,
    ///   such as invalid input, numerical issues, or if the optimization failed
    ///   to converge.
    fn optimize(&mut self, verbose: bool) -> Result<(), CalibrationError>;

    /// Computes a closed-form estimate of the parameters, used as the starting
    /// point of [`Optimizer::optimize`].
    fn linear_estimation(&mut self) -> Result<(), CalibrationError>
    where
        Self: Sized;

    /// Current intrinsic parameters `fx, fy, cx, cy`.
    fn get_intrinsics(&self) -> Intrinsics;

    /// Image size the parameters are estimated for.
    fn get_resolution(&self) -> Resolution;

    /// Current distortion coefficients.
    fn get_distortion(&self) -> Vec<f64>;
}

/// Reprojection error statistics of `parameters` over every view.
///
/// # Errors
///
/// * [`CalibrationError::DegenerateInput`] if there is not one pose per view or
///   no point projects in front of the camera.
pub fn compute_reprojection_error(
    parameters: &DistortionParameters,
    views: &[PatternView],
    poses: &[PlanarPose],
) -> Result<ProjectionError, CalibrationError> {
    if views.len() != poses.len() {
        return Err(CalibrationError::DegenerateInput(format!(
            "{} views but {} poses",
            views.len(),
            poses.len()
        )));
    }

    let intrinsics = [
        parameters.intrinsics.fx,
        parameters.intrinsics.fy,
        parameters.intrinsics.cx,
        parameters.intrinsics.cy,
    ];

    let mut errors = vec![];
    let mut behind_camera = 0;
    for (view, pose) in views.iter().zip(poses.iter()) {
        let pose = pose.to_vec();
        for (object, observed) in view.object_points.iter().zip(view.image_points.iter()) {
            let object = Vector3::new(object.x, object.y, 0.0);
            match camera_calibrator::project(&intrinsics[..], &parameters.distortions[..], &pose[..], &object) {
                Some(projected) => errors.push((projected - observed.coords).norm()),
                None => behind_camera += 1,
            }
        }
    }
    if behind_camera > 0 {
        warn!("{behind_camera} pattern points project behind the camera");
    }

    if errors.is_empty() {
        return Err(CalibrationError::DegenerateInput(
            "no point projects in front of the camera".to_string(),
        ));
    }

    // Calculate statistics
    let n = errors.len() as f64;
    let sum: f64 = errors.iter().sum::<f64>();
    let mean = sum / n;

    // Calculate variance and standard deviation
    let variance: f64 = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    // Calculate RMSE
    let sum_squared: f64 = errors.iter().map(|x| x.powi(2)).sum::<f64>();
    let rmse = (sum_squared / n).sqrt();

    // Find min and max
    let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

    // Calculate median
    let mut sorted_errors = errors.clone();
    sorted_errors.sort_by(|a, b| a.total_cmp(b));
    let median = if sorted_errors.len() % 2 == 0 {
        let mid = sorted_errors.len() / 2;
        (sorted_errors[mid - 1] + sorted_errors[mid]) / 2.0
    } else {
        sorted_errors[sorted_errors.len() / 2]
    };

    Ok(ProjectionError {
        rmse,
        min,
        max,
        mean,
        stddev,
        median,
        behind_camera,
    })
}
