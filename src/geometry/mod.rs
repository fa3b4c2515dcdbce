//! Planar geometry: quadrilaterals, homographies and the images of circles.

use nalgebra::Point2;

pub mod ellipse;
pub mod homography;
pub mod quadrilateral;

pub use ellipse::Ellipse;
pub use homography::Homography;
pub use quadrilateral::Quadrilateral;

/// Euclidean distance between two points.
pub fn distance(a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (b - a).norm()
}
