use crate::camera::CalibrationError;
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Relative tolerance used by the collinearity and area tests.
const DEGENERACY_EPSILON: f64 = 1e-6;

/// Four image points in the order top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quadrilateral {
    pub a: Point2<f64>,
    pub b: Point2<f64>,
    pub c: Point2<f64>,
    pub d: Point2<f64>,
}

impl Quadrilateral {
    pub fn new(a: Point2<f64>, b: Point2<f64>, c: Point2<f64>, d: Point2<f64>) -> Self {
        Self { a, b, c, d }
    }

    /// Axis-aligned rectangle with its top-left corner at `(x, y)`, y pointing down.
    pub fn from_rect(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(
            Point2::new(x, y),
            Point2::new(x + width, y),
            Point2::new(x + width, y + height),
            Point2::new(x, y + height),
        )
    }

    pub fn corners(&self) -> [Point2<f64>; 4] {
        [self.a, self.b, self.c, self.d]
    }

    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(&Point2<f64>) -> Point2<f64>,
    {
        Self::new(f(&self.a), f(&self.b), f(&self.c), f(&self.d))
    }

    /// Signed shoelace area, positive when the corners run clockwise on screen.
    pub fn signed_area(&self) -> f64 {
        let corners = self.corners();
        let mut sum = 0.0;
        for i in 0..4 {
            let p = corners[i];
            let q = corners[(i + 1) % 4];
            sum += p.x * q.y - q.x * p.y;
        }
        0.5 * sum
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    /// Length of the longest side or diagonal, used as the scale of the tolerances.
    fn extent(&self) -> f64 {
        let corners = self.corners();
        let mut extent = 0.0_f64;
        for i in 0..4 {
            for j in (i + 1)..4 {
                extent = extent.max((corners[j] - corners[i]).norm());
            }
        }
        extent
    }

    /// True when some three corners lie on one line.
    pub fn has_collinear_triple(&self) -> bool {
        let corners = self.corners();
        let extent = self.extent();
        if extent <= 0.0 {
            return true;
        }
        let tolerance = DEGENERACY_EPSILON * extent * extent;
        for skip in 0..4 {
            let triple: Vec<Point2<f64>> = (0..4)
                .filter(|i| *i != skip)
                .map(|i| corners[i])
                .collect();
            let cross = (triple[1] - triple[0]).perp(&(triple[2] - triple[0]));
            if cross.abs() <= tolerance {
                return true;
            }
        }
        false
    }

    /// True when edge AB crosses CD or edge BC crosses DA.
    pub fn is_self_intersecting(&self) -> bool {
        segments_intersect(&self.a, &self.b, &self.c, &self.d)
            || segments_intersect(&self.b, &self.c, &self.d, &self.a)
    }

    /// True when every turn along A, B, C, D has the same orientation.
    pub fn is_convex(&self) -> bool {
        let corners = self.corners();
        let mut sign = 0.0;
        for i in 0..4 {
            let p = corners[i];
            let q = corners[(i + 1) % 4];
            let r = corners[(i + 2) % 4];
            let turn = (q - p).perp(&(r - q));
            if turn == 0.0 {
                return false;
            }
            if sign == 0.0 {
                sign = turn.signum();
            } else if turn.signum() != sign {
                return false;
            }
        }
        true
    }

    pub fn is_axis_aligned_rectangle(&self) -> bool {
        self.a.y == self.b.y && self.b.x == self.c.x && self.c.y == self.d.y && self.d.x == self.a.x
    }

    /// Checks that the corners can be the image of a rectangle.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] for non-finite corners, collinear
    ///   triples, near-zero area, self-intersecting or non-convex outlines.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self
            .corners()
            .iter()
            .any(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(CalibrationError::DegenerateInput(
                "quadrilateral has non-finite corners".to_string(),
            ));
        }
        if self.has_collinear_triple() {
            return Err(CalibrationError::DegenerateInput(
                "three corners of the quadrilateral are collinear".to_string(),
            ));
        }
        let extent = self.extent();
        if self.area() <= DEGENERACY_EPSILON * extent * extent {
            return Err(CalibrationError::DegenerateInput(
                "quadrilateral encloses no area".to_string(),
            ));
        }
        if self.is_self_intersecting() {
            return Err(CalibrationError::DegenerateInput(
                "quadrilateral edges intersect".to_string(),
            ));
        }
        if !self.is_convex() {
            return Err(CalibrationError::DegenerateInput(
                "quadrilateral is not convex".to_string(),
            ));
        }
        Ok(())
    }

    /// Square built on the segment `start -> end` taken as the bottom edge, left
    /// to right. The square extends on the upper side of the segment.
    pub fn square_from_bottom_edge(start: &Point2<f64>, end: &Point2<f64>) -> Self {
        let d = *start;
        let c = *end;
        let edge: Vector2<f64> = c - d;
        // Rotate the edge a quarter turn toward the top of the image (y down).
        let up = Vector2::new(edge.y, -edge.x);
        let a = d + up;
        let b = a + edge;
        Self::new(a, b, c, d)
    }

    /// Square built on the segment `start -> end` taken as the left edge, bottom
    /// to top. The square extends on the right side of the segment.
    pub fn square_from_left_edge(start: &Point2<f64>, end: &Point2<f64>) -> Self {
        let d = *start;
        let a = *end;
        let edge: Vector2<f64> = a - d;
        // A quarter turn clockwise on screen (y down).
        let right = Vector2::new(-edge.y, edge.x);
        let c = d + right;
        let b = a + right;
        Self::new(a, b, c, d)
    }
}

fn orientation(p: &Point2<f64>, q: &Point2<f64>, r: &Point2<f64>) -> f64 {
    (q - p).perp(&(r - p))
}

/// Proper crossing of two segments, touching end points excluded.
fn segments_intersect(p1: &Point2<f64>, p2: &Point2<f64>, q1: &Point2<f64>, q2: &Point2<f64>) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);
    d1 * d2 < 0.0 && d3 * d4 < 0.0
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
    fn test_valid_quad() {
        let quad = perspective_quad();
        assert!(quad.validate().is_ok());
        assert!(quad.is_convex());
        assert!(!quad.is_self_intersecting());
        assert!(!quad.is_axis_aligned_rectangle());
    }

    #[test]
    fn test_area() {
        let quad = Quadrilateral::from_rect(10.0, 20.0, 100.0, 50.0);
        assert_relative_eq!(quad.area(), 5000.0, epsilon = 1e-9);
        assert!(quad.signed_area() > 0.0);
        assert!(quad.is_axis_aligned_rectangle());
    }

    #[test]
    fn test_collinear_quad_is_degenerate() {
        let quad = Quadrilateral::new(
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(20.0, 20.0),
            Point2::new(30.0, 30.0),
        );
        assert!(quad.has_collinear_triple());
        assert!(matches!(
            quad.validate(),
            Err(CalibrationError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_three_collinear_corners_are_degenerate() {
        let quad = Quadrilateral::new(
            Point2::new(0.0, 0.0),
            Point2::new(50.0, 0.0),
            Point2::new(100.0, 0.0),
            Point2::new(0.0, 80.0),
        );
        assert!(matches!(
            quad.validate(),
            Err(CalibrationError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_bow_tie_is_degenerate() {
        let quad = Quadrilateral::new(
            Point2::new(0.0, 0.0),
            Point2::new(100.0, 100.0),
            Point2::new(100.0, 0.0),
            Point2::new(0.0, 100.0),
        );
        assert!(quad.is_self_intersecting());
        assert!(matches!(
            quad.validate(),
            Err(CalibrationError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_concave_quad_is_degenerate() {
        let quad = Quadrilateral::new(
            Point2::new(0.0, 0.0),
            Point2::new(100.0, 0.0),
            Point2::new(30.0, 30.0),
            Point2::new(0.0, 100.0),
        );
        assert!(!quad.is_convex());
        assert!(quad.validate().is_err());
    }

    #[test]
    fn test_square_from_bottom_edge() {
        let quad =
            Quadrilateral::square_from_bottom_edge(&Point2::new(100.0, 300.0), &Point2::new(200.0, 300.0));
        assert_eq!(quad.d, Point2::new(100.0, 300.0));
        assert_eq!(quad.c, Point2::new(200.0, 300.0));
        assert_eq!(quad.a, Point2::new(100.0, 200.0));
        assert_eq!(quad.b, Point2::new(200.0, 200.0));
        assert!(quad.validate().is_ok());
    }

    #[test]
    fn test_square_from_left_edge() {
        let quad =
            Quadrilateral::square_from_left_edge(&Point2::new(100.0, 300.0), &Point2::new(100.0, 200.0));
        assert_eq!(quad.d, Point2::new(100.0, 300.0));
        assert_eq!(quad.a, Point2::new(100.0, 200.0));
        assert_eq!(quad.b, Point2::new(200.0, 200.0));
        assert_eq!(quad.c, Point2::new(200.0, 300.0));
        assert!(quad.validate().is_ok());

        // A tilted edge still gives a clockwise square.
        let quad =
            Quadrilateral::square_from_left_edge(&Point2::new(50.0, 80.0), &Point2::new(80.0, 40.0));
        assert!(quad.validate().is_ok());
        assert!(quad.signed_area() > 0.0);
        assert_relative_eq!(quad.area(), 2500.0, epsilon = 1e-9);
    }
}
