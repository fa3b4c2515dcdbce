//! Closed-form seed for planar-pattern calibration.
//!
//! Intrinsics come from the image of the absolute conic constrained by the
//! per-view homographies, with an extra zero-skew row so that two views are
//! enough. Poses come from decomposing each homography with the intrinsics.

use crate::camera::{CalibrationError, Intrinsics, Resolution};
use crate::geometry::Homography;
use log::debug;
use nalgebra::{DMatrix, Matrix3, Rotation3, Vector3};

/// Rotation (axis-angle, radians) and translation of the pattern in the camera frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanarPose {
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

impl PlanarPose {
    pub fn rotation_matrix(&self) -> Rotation3<f64> {
        Rotation3::new(self.rotation)
    }

    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        ]
    }

    pub fn from_slice(values: &[f64]) -> Option<Self> {
        if values.len() != 6 {
            return None;
        }
        Some(Self {
            rotation: Vector3::new(values[0], values[1], values[2]),
            translation: Vector3::new(values[3], values[4], values[5]),
        })
    }
}

/// Starting intrinsics when the closed form is not usable.
pub fn fallback_intrinsics(resolution: Resolution) -> Intrinsics {
    let focal = resolution.width.max(resolution.height) as f64;
    Intrinsics {
        fx: focal,
        fy: focal,
        cx: resolution.width as f64 / 2.0,
        cy: resolution.height as f64 / 2.0,
    }
}

/// Pixel normalization that keeps the conic equations well conditioned.
fn conditioning(resolution: Resolution) -> Matrix3<f64> {
    let w = resolution.width as f64;
    let h = resolution.height as f64;
    let s = 2.0 / (w + h).max(1.0);
    Matrix3::new(s, 0.0, -s * w / 2.0, 0.0, s, -s * h / 2.0, 0.0, 0.0, 1.0)
}

fn conic_row(h: &Matrix3<f64>, i: usize, j: usize) -> [f64; 6] {
    let (hi, hj) = (h.column(i), h.column(j));
    [
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ]
}

/// Zhang's closed-form intrinsics from pattern-to-image homographies.
///
/// # Errors
///
/// * [`CalibrationError::DegenerateInput`] with fewer than two homographies.
/// * [`CalibrationError::NumericalError`] if the views do not constrain the
///   intrinsics (for example all patterns parallel to the image plane).
pub fn intrinsics_from_homographies(
    homographies: &[Homography],
    resolution: Resolution,
) -> Result<Intrinsics, CalibrationError> {
    if homographies.len() < 2 {
        return Err(CalibrationError::DegenerateInput(format!(
            "need at least 2 views, got {}",
            homographies.len()
        )));
    }

    let n = conditioning(resolution);
    let n_inv = n.try_inverse().ok_or_else(|| {
        CalibrationError::NumericalError("conditioning is not invertible".to_string())
    })?;

    let rows = (2 * homographies.len() + 1).max(6);
    let mut v = DMatrix::<f64>::zeros(rows, 6);
    for (k, homography) in homographies.iter().enumerate() {
        let mut h = n * homography.matrix;
        h /= h.norm();
        let v12 = conic_row(&h, 0, 1);
        let v11 = conic_row(&h, 0, 0);
        let v22 = conic_row(&h, 1, 1);
        for c in 0..6 {
            v[(2 * k, c)] = v12[c];
            v[(2 * k + 1, c)] = v11[c] - v22[c];
        }
    }
    // Zero skew: B12 = 0.
    v[(2 * homographies.len(), 1)] = 1.0;

    let svd = v.svd(false, true);
    let smallest = svd.singular_values.imin();
    let v_t = svd
        .v_t
        .ok_or_else(|| CalibrationError::NumericalError("SVD failed".to_string()))?;
    let mut b = v_t.row(smallest).transpose();
    if b[0] < 0.0 {
        b = -b;
    }

    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);
    let denominator = b11 * b22 - b12 * b12;
    if !(b11 > 0.0) || !(denominator > 0.0) {
        return Err(CalibrationError::NumericalError(
            "absolute conic is not positive definite".to_string(),
        ));
    }

    let v0 = (b12 * b13 - b11 * b23) / denominator;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if !(lambda / b11 > 0.0) {
        return Err(CalibrationError::NumericalError(
            "absolute conic has a negative scale".to_string(),
        ));
    }
    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denominator).sqrt();
    let u0 = -b13 * alpha * alpha / lambda;

    // Undo the conditioning: K = N^-1 * K'.
    let k_conditioned = Matrix3::new(alpha, 0.0, u0, 0.0, beta, v0, 0.0, 0.0, 1.0);
    let k = n_inv * k_conditioned;

    let intrinsics = Intrinsics {
        fx: k[(0, 0)],
        fy: k[(1, 1)],
        cx: k[(0, 2)],
        cy: k[(1, 2)],
    };
    debug!("Closed-form intrinsics: {:?}", intrinsics);

    if ![intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy]
        .iter()
        .all(|v| v.is_finite())
    {
        return Err(CalibrationError::NumericalError(
            "closed-form intrinsics are not finite".to_string(),
        ));
    }
    Ok(intrinsics)
}

/// Pattern pose from its homography once the intrinsics are known.
///
/// # Errors
///
/// * [`CalibrationError::NumericalError`] if the homography does not describe a
///   plane in front of the camera.
pub fn pose_from_homography(
    intrinsics: &Intrinsics,
    homography: &Homography,
) -> Result<PlanarPose, CalibrationError> {
    let k = Matrix3::new(
        intrinsics.fx,
        0.0,
        intrinsics.cx,
        0.0,
        intrinsics.fy,
        intrinsics.cy,
        0.0,
        0.0,
        1.0,
    );
    let k_inv = k.try_inverse().ok_or_else(|| {
        CalibrationError::NumericalError("intrinsic matrix is not invertible".to_string())
    })?;

    let m = k_inv * homography.matrix;
    let m1 = m.column(0).into_owned();
    let m2 = m.column(1).into_owned();
    let m3 = m.column(2).into_owned();

    let norm = m1.norm();
    if !(norm > f64::EPSILON) {
        return Err(CalibrationError::NumericalError(
            "homography has a null first column".to_string(),
        ));
    }
    let mut lambda = 1.0 / norm;
    // The pattern must lie in front of the camera.
    if (lambda * m3).z < 0.0 {
        lambda = -lambda;
    }

    let r1 = lambda * m1;
    let r2 = lambda * m2;
    let r3 = r1.cross(&r2);
    let translation = lambda * m3;

    let approximate = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = approximate.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => {
            return Err(CalibrationError::NumericalError(
                "SVD failed while orthonormalizing rotation".to_string(),
            ))
        }
    };
    let mut rotation = u * v_t;
    if rotation.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        rotation = u * v_t;
    }

    Ok(PlanarPose {
        rotation: Rotation3::from_matrix_unchecked(rotation).scaled_axis(),
        translation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::camera_calibrator::tests::{synthetic_views, TRUE_INTRINSICS};
    use approx::assert_relative_eq;

    fn homographies(views: &[crate::optimization::PatternView]) -> Vec<Homography> {
        views
            .iter()
            .map(|view| {
                Homography::from_correspondences(&view.object_points, &view.image_points).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_closed_form_recovers_intrinsics() {
        let (views, _) = synthetic_views(&[0.0; 5]);
        let hs = homographies(&views);
        let intrinsics = intrinsics_from_homographies(&hs, Resolution::new(640, 480)).unwrap();

        assert_relative_eq!(intrinsics.fx, TRUE_INTRINSICS.fx, max_relative = 1e-6);
        assert_relative_eq!(intrinsics.fy, TRUE_INTRINSICS.fy, max_relative = 1e-6);
        assert_relative_eq!(intrinsics.cx, TRUE_INTRINSICS.cx, epsilon = 1e-3);
        assert_relative_eq!(intrinsics.cy, TRUE_INTRINSICS.cy, epsilon = 1e-3);
    }

    #[test]
    fn test_two_views_are_enough() {
        let (views, _) = synthetic_views(&[0.0; 5]);
        let hs = homographies(&views[..2]);
        let intrinsics = intrinsics_from_homographies(&hs, Resolution::new(640, 480)).unwrap();
        assert_relative_eq!(intrinsics.fx, TRUE_INTRINSICS.fx, max_relative = 1e-5);
        assert_relative_eq!(intrinsics.fy, TRUE_INTRINSICS.fy, max_relative = 1e-5);
    }

    #[test]
    fn test_single_view_is_rejected() {
        let (views, _) = synthetic_views(&[0.0; 5]);
        let hs = homographies(&views[..1]);
        assert!(matches!(
            intrinsics_from_homographies(&hs, Resolution::new(640, 480)),
            Err(CalibrationError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_pose_from_homography() {
        let (views, poses) = synthetic_views(&[0.0; 5]);
        let hs = homographies(&views);
        for (h, truth) in hs.iter().zip(poses.iter()) {
            let pose = pose_from_homography(&TRUE_INTRINSICS, h).unwrap();
            for i in 0..3 {
                assert_relative_eq!(pose.rotation[i], truth.rotation[i], epsilon = 1e-6);
                assert_relative_eq!(pose.translation[i], truth.translation[i], epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_fallback_intrinsics() {
        let intrinsics = fallback_intrinsics(Resolution::new(1920, 1080));
        assert_eq!(intrinsics.fx, 1920.0);
        assert_eq!(intrinsics.fy, 1920.0);
        assert_eq!(intrinsics.cx, 960.0);
        assert_eq!(intrinsics.cy, 540.0);
    }
}
