//! Camera calibration from several views of a planar pattern.
//!
//! The calibrator estimates the pinhole intrinsics and the radial-tangential
//! coefficients `[k1, k2, p1, p2, k3]` that best explain the observed pattern
//! points. It seeds every parameter in closed form (see [`crate::optimization::linear`])
//! and refines intrinsics, distortion and per-view poses jointly with the
//! Levenberg-Marquardt solver of `tiny_solver`.

use crate::camera::{CalibrationError, DistortionParameters, Intrinsics, Resolution};
use crate::geometry::Homography;
use crate::optimization::linear::{
    fallback_intrinsics, intrinsics_from_homographies, pose_from_homography, PlanarPose,
};
use crate::optimization::{compute_reprojection_error, Optimizer, ProjectionError};

use log::{info, warn};
use nalgebra::{DVector, Point2, RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tiny_solver::factors::Factor;
use tiny_solver::optimizer::OptimizerOptions;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

pub const MIN_VIEWS: usize = 2;
pub const MIN_POINTS_PER_VIEW: usize = 6;

/// Residual assigned to points that fall behind the camera.
const BEHIND_CAMERA_RESIDUAL: f64 = 1e6;

/// Extra iterations run from the refined estimate to tell a converged solve
/// from one that ran out of budget.
const CONVERGENCE_CHECK_ITERATIONS: usize = 3;

/// RMS decrease, in pixels, below which the refined estimate is stationary.
const STATIONARY_RMS_DECREASE: f64 = 1e-3;

/// Observations of the calibration pattern in one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternView {
    /// Pattern coordinates on the Z = 0 plane, in any length unit.
    pub object_points: Vec<Point2<f64>>,
    /// Detected image coordinates, in pixels.
    pub image_points: Vec<Point2<f64>>,
}

impl PatternView {
    pub fn new(object_points: Vec<Point2<f64>>, image_points: Vec<Point2<f64>>) -> Self {
        Self {
            object_points,
            image_points,
        }
    }

    /// View of a chessboard with `cols x rows` inner corners, listed row by row.
    pub fn chessboard(
        cols: usize,
        rows: usize,
        square_size: f64,
        image_points: Vec<Point2<f64>>,
    ) -> Self {
        let object_points = (0..rows)
            .flat_map(|i| {
                (0..cols).map(move |j| Point2::new(j as f64 * square_size, i as f64 * square_size))
            })
            .collect();
        Self::new(object_points, image_points)
    }

    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }

    fn is_usable(&self) -> bool {
        self.object_points.len() == self.image_points.len()
            && self.image_points.len() >= MIN_POINTS_PER_VIEW
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibratorSettings {
    /// Iteration budget of the Levenberg-Marquardt refinement.
    pub max_iterations: usize,
    /// RMS reprojection error, in pixels, above which a calibration is rough.
    pub poor_rms_threshold: f64,
}

impl Default for CalibratorSettings {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            poor_rms_threshold: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    pub parameters: DistortionParameters,
    /// `None` when no computation took place.
    pub reprojection: Option<ProjectionError>,
    /// Pattern pose of every view, empty when no computation took place.
    pub poses: Vec<PlanarPose>,
    /// False when the refinement failed and the seed was kept, or when the
    /// iteration budget ran out before the error settled.
    pub converged: bool,
}

impl CalibrationOutcome {
    fn identity(resolution: Resolution) -> Self {
        Self {
            parameters: DistortionParameters::identity(resolution),
            reprojection: None,
            poses: Vec::new(),
            converged: false,
        }
    }

    /// True when the RMS reprojection error exceeds `threshold` pixels, some
    /// pattern points end up behind the camera, or no error could be computed.
    pub fn is_poor(&self, threshold: f64) -> bool {
        self.reprojection
            .as_ref()
            .map_or(true, |error| !(error.rmse <= threshold) || error.behind_camera > 0)
    }
}

/// Reprojection residuals of all points of one view.
#[derive(Debug, Clone)]
struct ViewReprojectionCost {
    object_points: Vec<Vector3<f64>>,
    image_points: Vec<Vector2<f64>>,
}

impl ViewReprojectionCost {
    fn new(view: &PatternView) -> Self {
        let object_points = view
            .object_points
            .iter()
            .map(|p| Vector3::new(p.x, p.y, 0.0))
            .collect();
        let image_points = view.image_points.iter().map(|p| p.coords).collect();
        Self {
            object_points,
            image_points,
        }
    }
}

/// Axis-angle rotation of `point`.
fn rotate<T: RealField>(rotation: &Vector3<T>, point: &Vector3<T>) -> Vector3<T> {
    let theta2 = rotation.norm_squared();
    if theta2 > T::from_f64(1e-14).unwrap() {
        let theta = theta2.sqrt();
        let axis = rotation / theta.clone();
        let (sin, cos) = (theta.clone().sin(), theta.cos());
        let along = axis.dot(point) * (T::one() - cos.clone());
        point * cos + axis.cross(point) * sin + axis * along
    } else {
        point + rotation.cross(point)
    }
}

/// Projects a pattern point through pose, distortion and intrinsics.
///
/// `intrinsics` is `[fx, fy, cx, cy]`, `distortion` is `[k1, k2, p1, p2, k3]`
/// and `pose` is `[rx, ry, rz, tx, ty, tz]`. `None` for points behind the camera.
pub(crate) fn project<T: RealField>(
    intrinsics: &[T],
    distortion: &[T],
    pose: &[T],
    object: &Vector3<T>,
) -> Option<Vector2<T>> {
    let rotation = Vector3::new(pose[0].clone(), pose[1].clone(), pose[2].clone());
    let translation = Vector3::new(pose[3].clone(), pose[4].clone(), pose[5].clone());
    let camera = rotate(&rotation, object) + translation;

    if camera.z < T::from_f64(1e-9).unwrap() {
        return None;
    }

    let x = camera.x.clone() / camera.z.clone();
    let y = camera.y.clone() / camera.z.clone();

    let (k1, k2, p1, p2, k3) = (
        distortion[0].clone(),
        distortion[1].clone(),
        distortion[2].clone(),
        distortion[3].clone(),
        distortion[4].clone(),
    );
    let two = T::from_f64(2.0).unwrap();
    let r2 = x.clone() * x.clone() + y.clone() * y.clone();
    let radial = T::one()
        + k1 * r2.clone()
        + k2 * r2.clone() * r2.clone()
        + k3 * r2.clone() * r2.clone() * r2.clone();
    let xy = x.clone() * y.clone();
    let xd = x.clone() * radial.clone()
        + two.clone() * p1.clone() * xy.clone()
        + p2.clone() * (r2.clone() + two.clone() * x.clone() * x);
    let yd = y.clone() * radial
        + p1 * (r2 + two.clone() * y.clone() * y)
        + two * p2 * xy;

    Some(Vector2::new(
        intrinsics[0].clone() * xd + intrinsics[2].clone(),
        intrinsics[1].clone() * yd + intrinsics[3].clone(),
    ))
}

impl<T: RealField> Factor<T> for ViewReprojectionCost {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let intrinsics = params[0].as_slice();
        let distortion = params[1].as_slice();
        let pose = params[2].as_slice();

        let mut residuals = DVector::zeros(self.image_points.len() * 2);
        for (i, (object, observed)) in self
            .object_points
            .iter()
            .zip(self.image_points.iter())
            .enumerate()
        {
            let object = Vector3::new(
                T::from_f64(object.x).unwrap(),
                T::from_f64(object.y).unwrap(),
                T::from_f64(object.z).unwrap(),
            );
            match project(intrinsics, distortion, pose, &object) {
                Some(projected) => {
                    residuals[i * 2] = projected.x.clone() - T::from_f64(observed.x).unwrap();
                    residuals[i * 2 + 1] = projected.y.clone() - T::from_f64(observed.y).unwrap();
                }
                None => {
                    residuals[i * 2] = T::from_f64(BEHIND_CAMERA_RESIDUAL).unwrap();
                    residuals[i * 2 + 1] = T::from_f64(BEHIND_CAMERA_RESIDUAL).unwrap();
                }
            }
        }
        residuals
    }
}

/// Estimates the lens distortion parameter set from pattern views.
///
/// # Examples
///
/// ```rust,no_run
/// use video_calibration::camera::Resolution;
/// use video_calibration::optimization::{CameraCalibrator, PatternView};
///
/// # let views: Vec<PatternView> = Vec::new();
/// let calibrator = CameraCalibrator::new(views, Resolution::new(1920, 1080));
/// let outcome = calibrator.calibrate();
/// if outcome.is_poor(1.0) {
///     println!("rough calibration: {:?}", outcome.reprojection);
/// }
/// ```
#[derive(Clone)]
pub struct CameraCalibrator {
    views: Vec<PatternView>,
    resolution: Resolution,
    settings: CalibratorSettings,
    intrinsics: Intrinsics,
    distortion: [f64; 5],
    poses: Vec<PlanarPose>,
    converged: bool,
}

impl CameraCalibrator {
    pub fn new(views: Vec<PatternView>, resolution: Resolution) -> Self {
        Self {
            views,
            resolution,
            settings: CalibratorSettings::default(),
            intrinsics: fallback_intrinsics(resolution),
            distortion: [0.0; 5],
            poses: Vec::new(),
            converged: false,
        }
    }

    pub fn with_settings(mut self, settings: CalibratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn views(&self) -> &[PatternView] {
        &self.views
    }

    pub fn poses(&self) -> &[PlanarPose] {
        &self.poses
    }

    /// Enough views, each with enough matching points.
    pub fn is_valid(&self) -> bool {
        self.views.len() >= MIN_VIEWS && self.views.iter().all(PatternView::is_usable)
    }

    /// Current estimate as a distortion parameter set.
    pub fn parameters(&self) -> DistortionParameters {
        DistortionParameters::new(self.intrinsics, self.distortion, self.resolution)
    }

    /// Whether the last refinement settled within its iteration budget.
    pub fn converged(&self) -> bool {
        self.converged
    }

    fn current_error(&self) -> Option<ProjectionError> {
        compute_reprojection_error(&self.parameters(), &self.views, &self.poses).ok()
    }

    fn build_problem(&self) -> tiny_solver::Problem {
        let mut problem = tiny_solver::Problem::new();
        for (i, view) in self.views.iter().enumerate() {
            let pose_key = format!("pose{i}");
            problem.add_residual_block(
                view.len() * 2,
                &["intrinsics", "distortion", pose_key.as_str()],
                Box::new(ViewReprojectionCost::new(view)),
                None,
            );
        }

        let max_focal = 100.0 * self.resolution.width.max(self.resolution.height) as f64;
        problem.set_variable_bounds("intrinsics", 0, 1.0, max_focal);
        problem.set_variable_bounds("intrinsics", 1, 1.0, max_focal);
        problem
    }

    /// Runs at most `max_iteration` Levenberg-Marquardt steps from `parameters`
    /// and `poses`.
    fn solve(
        &self,
        problem: &tiny_solver::Problem,
        parameters: &DistortionParameters,
        poses: &[PlanarPose],
        max_iteration: usize,
    ) -> Result<(DistortionParameters, Vec<PlanarPose>), CalibrationError> {
        let mut initial_values = HashMap::new();
        let intrinsics = &parameters.intrinsics;
        initial_values.insert(
            "intrinsics".to_string(),
            DVector::from_vec(vec![intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy]),
        );
        initial_values.insert(
            "distortion".to_string(),
            DVector::from_row_slice(&parameters.distortions),
        );
        for (i, pose) in poses.iter().enumerate() {
            initial_values.insert(format!("pose{i}"), DVector::from_vec(pose.to_vec()));
        }

        let options = OptimizerOptions {
            max_iteration,
            ..Default::default()
        };
        let optimizer = LevenbergMarquardtOptimizer::default();
        let result = optimizer
            .optimize(problem, &initial_values, Some(options))
            .ok_or(CalibrationError::NonConvergence {
                iterations: max_iteration,
                residual: f64::NAN,
            })?;

        let missing = |key: &str| CalibrationError::NumericalError(format!("solver lost {key}"));
        let intrinsics = result.get("intrinsics").ok_or_else(|| missing("intrinsics"))?;
        let distortion = result.get("distortion").ok_or_else(|| missing("distortion"))?;
        let mut refined_poses = Vec::with_capacity(poses.len());
        for i in 0..poses.len() {
            let key = format!("pose{i}");
            let values = result.get(&key).ok_or_else(|| missing(&key))?;
            refined_poses.push(PlanarPose::from_slice(values.as_slice()).ok_or_else(|| missing(&key))?);
        }

        let candidate = DistortionParameters::new(
            Intrinsics {
                fx: intrinsics[0],
                fy: intrinsics[1],
                cx: intrinsics[2],
                cy: intrinsics[3],
            },
            [
                distortion[0],
                distortion[1],
                distortion[2],
                distortion[3],
                distortion[4],
            ],
            self.resolution,
        );
        candidate.validate_params()?;
        Ok((candidate, refined_poses))
    }

    /// False when a few more iterations from the refined estimate still lower
    /// the RMS error noticeably.
    fn is_stationary(
        &self,
        problem: &tiny_solver::Problem,
        parameters: &DistortionParameters,
        poses: &[PlanarPose],
        error: &ProjectionError,
    ) -> bool {
        let continued = self
            .solve(problem, parameters, poses, CONVERGENCE_CHECK_ITERATIONS)
            .and_then(|(parameters, poses)| {
                compute_reprojection_error(&parameters, &self.views, &poses)
            });
        match continued {
            Ok(continued) => !(error.rmse - continued.rmse > STATIONARY_RMS_DECREASE),
            Err(_) => true,
        }
    }

    /// Runs the full calibration. Never fails: invalid input gives the identity
    /// set and a failed refinement keeps the closed-form seed.
    pub fn calibrate(mut self) -> CalibrationOutcome {
        if !self.is_valid() {
            warn!(
                "Camera calibration needs at least {} views with {} points each, got {} views",
                MIN_VIEWS,
                MIN_POINTS_PER_VIEW,
                self.views.len()
            );
            return CalibrationOutcome::identity(self.resolution);
        }

        if let Err(e) = self.linear_estimation() {
            warn!("Camera calibration seed failed: {e}");
            return CalibrationOutcome::identity(self.resolution);
        }

        let converged = match self.optimize(false) {
            Ok(()) => self.converged,
            Err(e) => {
                warn!("Camera calibration refinement failed, keeping the seed: {e}");
                false
            }
        };

        let reprojection = self.current_error();
        if let Some(error) = &reprojection {
            if error.rmse > self.settings.poor_rms_threshold {
                warn!(
                    "Camera calibration is rough: RMS reprojection error {:.3} px",
                    error.rmse
                );
            }
        }

        CalibrationOutcome {
            parameters: self.parameters(),
            reprojection,
            poses: self.poses,
            converged,
        }
    }
}

impl fmt::Debug for CameraCalibrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CameraCalibrator Summary:\n intrinsics: {:?}\n distortion: {:?}\n views: {}, points: {}",
            self.intrinsics,
            self.distortion,
            self.views.len(),
            self.views.iter().map(PatternView::len).sum::<usize>(),
        )
    }
}

impl Optimizer for CameraCalibrator {
    /// Refines intrinsics, distortion and poses from the current estimate.
    ///
    /// On failure the current estimate is left untouched. A refinement that
    /// lowers the error but runs out of iterations is kept and reported by
    /// [`CameraCalibrator::converged`].
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] if the views are not usable or
    ///   no seed was computed.
    /// * [`CalibrationError::NonConvergence`] if the solver gives up or ends with
    ///   a larger error than it started from.
    /// * [`CalibrationError::NumericalError`] if the refined poses put more
    ///   pattern points behind the camera than the seed did.
    fn optimize(&mut self, verbose: bool) -> Result<(), CalibrationError> {
        if !self.is_valid() || self.poses.len() != self.views.len() {
            return Err(CalibrationError::DegenerateInput(
                "optimization needs usable views and a pose per view".to_string(),
            ));
        }

        let seed_error = compute_reprojection_error(&self.parameters(), &self.views, &self.poses)?;
        if verbose {
            info!("Starting camera calibration refinement...");
            info!("Initial estimate: {:?}", self);
            info!("Initial reprojection error: {:?}", seed_error);
        }

        let problem = self.build_problem();
        let (candidate, poses) = self
            .solve(&problem, &self.parameters(), &self.poses, self.settings.max_iterations)
            .map_err(|e| match e {
                CalibrationError::NonConvergence { iterations, .. } => {
                    CalibrationError::NonConvergence {
                        iterations,
                        residual: seed_error.rmse,
                    }
                }
                e => e,
            })?;

        let refined_error = compute_reprojection_error(&candidate, &self.views, &poses)?;
        if verbose {
            info!("Refined reprojection error: {:?}", refined_error);
        }
        if !(refined_error.rmse <= seed_error.rmse) {
            return Err(CalibrationError::NonConvergence {
                iterations: self.settings.max_iterations,
                residual: refined_error.rmse,
            });
        }
        if refined_error.behind_camera > seed_error.behind_camera {
            return Err(CalibrationError::NumericalError(format!(
                "refinement moved {} pattern points behind the camera",
                refined_error.behind_camera
            )));
        }

        let converged = self.is_stationary(&problem, &candidate, &poses, &refined_error);
        if !converged {
            warn!(
                "Camera calibration used its {} iteration budget before converging (RMS {:.3} px)",
                self.settings.max_iterations, refined_error.rmse
            );
        }

        self.intrinsics = candidate.intrinsics;
        self.distortion = candidate.distortions;
        self.poses = poses;
        self.converged = converged;

        if verbose {
            info!("Refined estimate: {:?}", self);
        }
        Ok(())
    }

    /// Closed-form seed: a DLT homography per view, Zhang's intrinsics and a
    /// pose per view. Distortion starts at zero. When the intrinsics are not
    /// constrained by the views the seed falls back to a centered principal
    /// point and a focal scale of the larger image side.
    fn linear_estimation(&mut self) -> Result<(), CalibrationError> {
        if !self.is_valid() {
            return Err(CalibrationError::DegenerateInput(format!(
                "need at least {MIN_VIEWS} views with {MIN_POINTS_PER_VIEW} matching points each"
            )));
        }

        let homographies = self
            .views
            .iter()
            .map(|view| Homography::from_correspondences(&view.object_points, &view.image_points))
            .collect::<Result<Vec<_>, _>>()?;

        self.intrinsics = match intrinsics_from_homographies(&homographies, self.resolution)
            .and_then(|intrinsics| {
                crate::camera::validation::validate_intrinsics(&intrinsics).map(|_| intrinsics)
            }) {
            Ok(intrinsics) => intrinsics,
            Err(e) => {
                warn!("Closed-form intrinsics unavailable ({e}), using the fallback seed");
                fallback_intrinsics(self.resolution)
            }
        };
        self.distortion = [0.0; 5];
        self.poses = homographies
            .iter()
            .map(|h| pose_from_homography(&self.intrinsics, h))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Camera calibration seed: fx = {:.2}, fy = {:.2}, cx = {:.2}, cy = {:.2}",
            self.intrinsics.fx, self.intrinsics.fy, self.intrinsics.cx, self.intrinsics.cy
        );
        Ok(())
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    /// `[k1, k2, p1, p2, k3]`.
    fn get_distortion(&self) -> Vec<f64> {
        self.distortion.to_vec()
    }
}
