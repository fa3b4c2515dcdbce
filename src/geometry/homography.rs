//! Plane-to-plane projective transforms.
//!
//! Two constructions are provided:
//! - [`Homography::rect_to_quad`]: the closed-form mapping of an axis-aligned
//!   rectangle onto four image corners, used by the plane calibrator.
//! - [`Homography::from_correspondences`]: the normalized direct linear transform
//!   over any number (>= 4) of correspondences, used to seed camera calibration.

use crate::camera::CalibrationError;
use crate::geometry::ellipse::{circle_conic, Ellipse};
use crate::geometry::Quadrilateral;
use nalgebra::{DMatrix, Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Below this homogeneous weight a mapped point is treated as lying at infinity.
const MIN_HOMOGENEOUS_WEIGHT: f64 = 1e-12;

/// Smallest acceptable ratio between the smallest and largest singular values.
const MIN_INVERSE_CONDITION: f64 = 1e-12;

/// A 3x3 projective transform acting on column vectors `[x, y, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    pub matrix: Matrix3<f64>,
}

impl Homography {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// Wraps a matrix after checking that it is finite and well conditioned.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] for non-finite or near-singular matrices.
    pub fn from_matrix(matrix: Matrix3<f64>) -> Result<Self, CalibrationError> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::DegenerateInput(
                "homography has non-finite entries".to_string(),
            ));
        }

        let singular_values = matrix.singular_values();
        let largest = singular_values.max();
        let smallest = singular_values.min();
        if largest <= 0.0 || smallest / largest < MIN_INVERSE_CONDITION {
            return Err(CalibrationError::DegenerateInput(format!(
                "homography is near singular (condition {:e})",
                if largest > 0.0 { smallest / largest } else { 0.0 }
            )));
        }

        Ok(Self { matrix })
    }

    /// Maps the rectangle `[0, width] x [0, height]` onto `quad`.
    ///
    /// The rectangle corners `(0, height)`, `(width, height)`, `(width, 0)` and
    /// `(0, 0)` land on `quad.a`, `quad.b`, `quad.c` and `quad.d` respectively, so
    /// a world frame with y pointing up has its origin at the bottom-left corner.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] if the rectangle is empty or the
    ///   resulting transform is singular.
    pub fn rect_to_quad(width: f64, height: f64, quad: &Quadrilateral) -> Result<Self, CalibrationError> {
        if !(width > 0.0 && height > 0.0) || !width.is_finite() || !height.is_finite() {
            return Err(CalibrationError::DegenerateInput(format!(
                "rectangle size must be positive, got {width} x {height}"
            )));
        }

        // Unit square (0,0), (1,0), (1,1), (0,1) onto D, C, B, A.
        let square = square_to_quad(&quad.d, &quad.c, &quad.b, &quad.a)?;
        let scale = Matrix3::new(1.0 / width, 0.0, 0.0, 0.0, 1.0 / height, 0.0, 0.0, 0.0, 1.0);
        Self::from_matrix(square * scale)
    }

    /// Estimates `H` with `image ~ H * object` from point correspondences, using
    /// the direct linear transform on Hartley-normalized coordinates.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] with fewer than 4 correspondences,
    ///   mismatched counts, coincident points or a degenerate solution.
    pub fn from_correspondences(
        object: &[Point2<f64>],
        image: &[Point2<f64>],
    ) -> Result<Self, CalibrationError> {
        let n = object.len();
        if n < 4 || image.len() != n {
            return Err(CalibrationError::DegenerateInput(format!(
                "need at least 4 matching correspondences, got {} and {}",
                n,
                image.len()
            )));
        }

        let (object_n, t_object) = normalize_points(object)?;
        let (image_n, t_image) = normalize_points(image)?;

        // Pad to 9 rows so the thin SVD still exposes the null space.
        let rows = (2 * n).max(9);
        let mut a = DMatrix::<f64>::zeros(rows, 9);
        for (i, (pw, pi)) in object_n.iter().zip(image_n.iter()).enumerate() {
            let (x, y, u, v) = (pw.x, pw.y, pi.x, pi.y);
            let r0 = 2 * i;
            let r1 = 2 * i + 1;

            a[(r0, 0)] = -x;
            a[(r0, 1)] = -y;
            a[(r0, 2)] = -1.0;
            a[(r0, 6)] = u * x;
            a[(r0, 7)] = u * y;
            a[(r0, 8)] = u;

            a[(r1, 3)] = -x;
            a[(r1, 4)] = -y;
            a[(r1, 5)] = -1.0;
            a[(r1, 6)] = v * x;
            a[(r1, 7)] = v * y;
            a[(r1, 8)] = v;
        }

        let svd = a.svd(false, true);
        let smallest = svd.singular_values.imin();
        let v_t = svd
            .v_t
            .ok_or_else(|| CalibrationError::NumericalError("SVD failed".to_string()))?;

        let h = v_t.row(smallest);
        let mut normalized = Matrix3::zeros();
        for r in 0..3 {
            for c in 0..3 {
                normalized[(r, c)] = h[3 * r + c];
            }
        }

        let t_image_inv = t_image.try_inverse().ok_or_else(|| {
            CalibrationError::NumericalError("normalization is not invertible".to_string())
        })?;
        let mut matrix = t_image_inv * normalized * t_object;

        let scale = matrix[(2, 2)];
        if scale.abs() > f64::EPSILON {
            matrix /= scale;
        }

        Self::from_matrix(matrix)
    }

    /// Applies the transform with the perspective divide. `None` when the point
    /// maps to the line at infinity.
    pub fn apply(&self, point: &Point2<f64>) -> Option<Point2<f64>> {
        let v = self.matrix * Vector3::new(point.x, point.y, 1.0);
        if v.z.abs() < MIN_HOMOGENEOUS_WEIGHT || !v.z.is_finite() {
            return None;
        }
        let mapped = Point2::new(v.x / v.z, v.y / v.z);
        if mapped.x.is_finite() && mapped.y.is_finite() {
            Some(mapped)
        } else {
            None
        }
    }

    /// Image of the circle of `radius` around `center`.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] if the circle crosses the line
    ///   mapped to infinity, so that its image is not an ellipse.
    pub fn map_circle(&self, center: &Point2<f64>, radius: f64) -> Result<Ellipse, CalibrationError> {
        let inverse = self.inverse()?.matrix;
        let conic = inverse.transpose() * circle_conic(center, radius) * inverse;
        Ellipse::from_conic(&(conic / conic.norm()))
    }

    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] if the matrix is not invertible.
    pub fn inverse(&self) -> Result<Self, CalibrationError> {
        let inverse = self.matrix.try_inverse().ok_or_else(|| {
            CalibrationError::DegenerateInput("homography is not invertible".to_string())
        })?;
        Self::from_matrix(inverse)
    }
}

/// Heckbert's closed-form projective mapping of the unit square onto four points,
/// `(0,0) -> p0`, `(1,0) -> p1`, `(1,1) -> p2`, `(0,1) -> p3`.
fn square_to_quad(
    p0: &Point2<f64>,
    p1: &Point2<f64>,
    p2: &Point2<f64>,
    p3: &Point2<f64>,
) -> Result<Matrix3<f64>, CalibrationError> {
    let sx = p0.x - p1.x + p2.x - p3.x;
    let sy = p0.y - p1.y + p2.y - p3.y;

    if sx.abs() < f64::EPSILON && sy.abs() < f64::EPSILON {
        // Parallelogram: the mapping is affine.
        return Ok(Matrix3::new(
            p1.x - p0.x,
            p3.x - p0.x,
            p0.x,
            p1.y - p0.y,
            p3.y - p0.y,
            p0.y,
            0.0,
            0.0,
            1.0,
        ));
    }

    let dx1 = p1.x - p2.x;
    let dx2 = p3.x - p2.x;
    let dy1 = p1.y - p2.y;
    let dy2 = p3.y - p2.y;
    let det = dx1 * dy2 - dx2 * dy1;
    if det.abs() < f64::EPSILON {
        return Err(CalibrationError::DegenerateInput(
            "quadrilateral does not define a projective mapping".to_string(),
        ));
    }

    let g = (sx * dy2 - dx2 * sy) / det;
    let h = (dx1 * sy - sx * dy1) / det;

    Ok(Matrix3::new(
        p1.x - p0.x + g * p1.x,
        p3.x - p0.x + h * p3.x,
        p0.x,
        p1.y - p0.y + g * p1.y,
        p3.y - p0.y + h * p3.y,
        p0.y,
        g,
        h,
        1.0,
    ))
}

/// Hartley normalization: centroid at the origin, mean distance `sqrt(2)`.
fn normalize_points(points: &[Point2<f64>]) -> Result<(Vec<Point2<f64>>, Matrix3<f64>), CalibrationError> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_distance = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    if !(mean_distance > f64::EPSILON) {
        return Err(CalibrationError::DegenerateInput(
            "all correspondence points coincide".to_string(),
        ));
    }

    let s = std::f64::consts::SQRT_2 / mean_distance;
    let transform = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    Ok((normalized, transform))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn perspective_quad() -> Quadrilateral {
        Quadrilateral::new(
            Point2::new(210.0, 120.0),
            Point2::new(430.0, 130.0),
            Point2::new(520.0, 400.0),
            Point2::new(110.0, 380.0),
        )
    }

    #[test]
    fn test_rect_to_quad_maps_corners() {
        let quad = perspective_quad();
        let h = Homography::rect_to_quad(4.0, 3.0, &quad).unwrap();

        let expected = [
            (Point2::new(0.0, 3.0), quad.a),
            (Point2::new(4.0, 3.0), quad.b),
            (Point2::new(4.0, 0.0), quad.c),
            (Point2::new(0.0, 0.0), quad.d),
        ];
        for (world, image) in expected.iter() {
            let mapped = h.apply(world).unwrap();
            assert_relative_eq!(mapped.x, image.x, epsilon = 1e-9);
            assert_relative_eq!(mapped.y, image.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rect_to_quad_parallelogram_is_affine() {
        let quad = Quadrilateral::from_rect(100.0, 50.0, 200.0, 100.0);
        let h = Homography::rect_to_quad(2.0, 1.0, &quad).unwrap();
        assert_eq!(h.matrix[(2, 0)], 0.0);
        assert_eq!(h.matrix[(2, 1)], 0.0);
        let center = h.apply(&Point2::new(1.0, 0.5)).unwrap();
        assert_relative_eq!(center.x, 200.0, epsilon = 1e-12);
        assert_relative_eq!(center.y, 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rect_to_quad_rejects_empty_rectangle() {
        assert!(Homography::rect_to_quad(0.0, 3.0, &perspective_quad()).is_err());
        assert!(Homography::rect_to_quad(2.0, f64::NAN, &perspective_quad()).is_err());
    }

    #[test]
    fn test_inverse_round_trip() {
        let h = Homography::rect_to_quad(4.0, 3.0, &perspective_quad()).unwrap();
        let inverse = h.inverse().unwrap();
        let point = Point2::new(1.3, 2.2);
        let back = inverse.apply(&h.apply(&point).unwrap()).unwrap();
        assert_relative_eq!(back.x, point.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, point.y, epsilon = 1e-9);
    }

    #[test]
    fn test_dlt_recovers_known_homography() {
        let truth = Matrix3::new(1.2, 0.1, 30.0, -0.05, 0.9, 12.0, 0.0004, -0.0002, 1.0);
        let h_truth = Homography::from_matrix(truth).unwrap();

        let object: Vec<Point2<f64>> = (0..5)
            .flat_map(|i| (0..4).map(move |j| Point2::new(j as f64 * 25.0, i as f64 * 25.0)))
            .collect();
        let image: Vec<Point2<f64>> = object.iter().map(|p| h_truth.apply(p).unwrap()).collect();

        let estimated = Homography::from_correspondences(&object, &image).unwrap();
        for r in 0..3 {
            for c in 0..3 {
                assert_relative_eq!(estimated.matrix[(r, c)], truth[(r, c)], epsilon = 1e-8, max_relative = 1e-6);
            }
        }
    }

    #[test]
    fn test_dlt_with_four_points() {
        let quad = perspective_quad();
        let h = Homography::rect_to_quad(1.0, 1.0, &quad).unwrap();
        let object = vec![
            Point2::new(0.0, 1.0),
            Point2::new(1.0, 1.0),
            Point2::new(1.0, 0.0),
            Point2::new(0.0, 0.0),
        ];
        let image = quad.corners().to_vec();
        let estimated = Homography::from_correspondences(&object, &image).unwrap();
        let p = Point2::new(0.25, 0.75);
        let expected = h.apply(&p).unwrap();
        let mapped = estimated.apply(&p).unwrap();
        assert_relative_eq!(mapped.x, expected.x, epsilon = 1e-8);
        assert_relative_eq!(mapped.y, expected.y, epsilon = 1e-8);
    }

    #[test]
    fn test_dlt_rejects_too_few_points() {
        let pts = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(0.0, 1.0)];
        assert!(matches!(
            Homography::from_correspondences(&pts, &pts),
            Err(CalibrationError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_singular_matrix_is_rejected() {
        let singular = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 0.0, 1.0);
        assert!(Homography::from_matrix(singular).is_err());
        assert!(Homography::from_matrix(Matrix3::from_element(f64::NAN)).is_err());
    }

    #[test]
    fn test_map_circle() {
        let h = Homography::rect_to_quad(4.0, 3.0, &perspective_quad()).unwrap();
        let center = Point2::new(2.0, 1.5);
        let ellipse = h.map_circle(&center, 1.0).unwrap();
        for k in 0..12 {
            let angle = k as f64 * std::f64::consts::PI / 6.0;
            let world = Point2::new(center.x + angle.cos(), center.y + angle.sin());
            let image = h.apply(&world).unwrap();
            assert_relative_eq!(ellipse.level(&image), 1.0, epsilon = 1e-6);
        }
        // Under perspective the center of the image ellipse is not the image
        // of the circle center.
        let projected_center = h.apply(&center).unwrap();
        assert!(ellipse.level(&projected_center) < 1.0);
        assert!((ellipse.center - projected_center).norm() > 1e-3);
    }

    #[test]
    fn test_point_at_infinity() {
        let h = Homography::from_matrix(Matrix3::new(
            1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0,
        ))
        .unwrap();
        assert!(h.apply(&Point2::new(-1.0, 5.0)).is_none());
        assert!(h.apply(&Point2::new(1.0, 5.0)).is_some());
    }
}
