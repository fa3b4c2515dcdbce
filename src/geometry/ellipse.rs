use crate::camera::CalibrationError;
use nalgebra::{Matrix2, Matrix3, Point2, Vector2};
use serde::{Deserialize, Serialize};

/// An ellipse in image space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    pub center: Point2<f64>,
    pub semi_major: f64,
    pub semi_minor: f64,
    /// Angle of the major axis from the x axis, in radians, within `(-pi/2, pi/2]`.
    pub rotation: f64,
}

impl Ellipse {
    pub fn circle(center: Point2<f64>, radius: f64) -> Self {
        Self {
            center,
            semi_major: radius,
            semi_minor: radius,
            rotation: 0.0,
        }
    }

    /// Ellipse whose points satisfy `[x, y, 1] * conic * [x, y, 1]^T = 0`.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] if the conic is a hyperbola, a
    ///   parabola or empty.
    pub fn from_conic(conic: &Matrix3<f64>) -> Result<Self, CalibrationError> {
        let conic = 0.5 * (conic + conic.transpose());
        let quadratic = Matrix2::new(
            conic[(0, 0)],
            conic[(0, 1)],
            conic[(1, 0)],
            conic[(1, 1)],
        );
        let linear = Vector2::new(conic[(0, 2)], conic[(1, 2)]);

        let inverse = quadratic.try_inverse().ok_or_else(|| {
            CalibrationError::DegenerateInput("conic has no center".to_string())
        })?;
        let center = -(inverse * linear);
        let level = -(conic[(2, 2)] + linear.dot(&center));

        let eigen = quadratic.symmetric_eigen();
        let (l0, l1) = (eigen.eigenvalues[0], eigen.eigenvalues[1]);
        let a0 = level / l0;
        let a1 = level / l1;
        if !(a0 > 0.0 && a1 > 0.0) || !a0.is_finite() || !a1.is_finite() {
            return Err(CalibrationError::DegenerateInput(
                "conic is not an ellipse".to_string(),
            ));
        }

        let (major, semi_major, semi_minor) = if a0 >= a1 {
            (0, a0.sqrt(), a1.sqrt())
        } else {
            (1, a1.sqrt(), a0.sqrt())
        };
        let axis = eigen.eigenvectors.column(major);
        let mut rotation = axis[1].atan2(axis[0]);
        if rotation > std::f64::consts::FRAC_PI_2 {
            rotation -= std::f64::consts::PI;
        } else if rotation <= -std::f64::consts::FRAC_PI_2 {
            rotation += std::f64::consts::PI;
        }

        Ok(Self {
            center: Point2::from(center),
            semi_major,
            semi_minor,
            rotation,
        })
    }

    /// 1 on the outline, below 1 inside, above 1 outside.
    pub fn level(&self, p: &Point2<f64>) -> f64 {
        let (sin, cos) = self.rotation.sin_cos();
        let d = p - self.center;
        let u = cos * d.x + sin * d.y;
        let v = -sin * d.x + cos * d.y;
        (u / self.semi_major).powi(2) + (v / self.semi_minor).powi(2)
    }
}

/// Conic matrix of the circle of `radius` around `center`.
pub fn circle_conic(center: &Point2<f64>, radius: f64) -> Matrix3<f64> {
    Matrix3::new(
        1.0,
        0.0,
        -center.x,
        0.0,
        1.0,
        -center.y,
        -center.x,
        -center.y,
        center.x * center.x + center.y * center.y - radius * radius,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_circle_conic() {
        let center = Point2::new(3.0, -2.0);
        let ellipse = Ellipse::from_conic(&circle_conic(&center, 5.0)).unwrap();
        assert_relative_eq!(ellipse.center.x, 3.0, epsilon = 1e-12);
        assert_relative_eq!(ellipse.center.y, -2.0, epsilon = 1e-12);
        assert_relative_eq!(ellipse.semi_major, 5.0, epsilon = 1e-12);
        assert_relative_eq!(ellipse.semi_minor, 5.0, epsilon = 1e-12);
        assert_relative_eq!(ellipse.level(&Point2::new(8.0, -2.0)), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotated_ellipse() {
        // x'^2 / 16 + y'^2 / 4 = 1 rotated by 30 degrees around (10, 20).
        let angle = 30f64.to_radians();
        let (sin, cos) = angle.sin_cos();
        let rotation = Matrix2::new(cos, -sin, sin, cos);
        let q = rotation * Matrix2::new(1.0 / 16.0, 0.0, 0.0, 1.0 / 4.0) * rotation.transpose();
        let c = Vector2::new(10.0, 20.0);
        let b = -(q * c);
        let f = c.dot(&(q * c)) - 1.0;
        let conic = Matrix3::new(q[(0, 0)], q[(0, 1)], b.x, q[(1, 0)], q[(1, 1)], b.y, b.x, b.y, f);

        let ellipse = Ellipse::from_conic(&(conic * 7.0)).unwrap();
        assert_relative_eq!(ellipse.center.x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(ellipse.center.y, 20.0, epsilon = 1e-9);
        assert_relative_eq!(ellipse.semi_major, 4.0, epsilon = 1e-9);
        assert_relative_eq!(ellipse.semi_minor, 2.0, epsilon = 1e-9);
        assert_relative_eq!(ellipse.rotation, angle, epsilon = 1e-9);

        let on_outline = Point2::new(10.0 + 4.0 * cos, 20.0 + 4.0 * sin);
        assert_relative_eq!(ellipse.level(&on_outline), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_hyperbola_is_rejected() {
        let hyperbola = Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0);
        assert!(matches!(
            Ellipse::from_conic(&hyperbola),
            Err(CalibrationError::DegenerateInput(_))
        ));
        let empty = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        assert!(Ellipse::from_conic(&empty).is_err());
    }
}
