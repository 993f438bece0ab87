//! Detection struct for input to the associator.

use crate::geometry::{Ellipse, Point};
use crate::{Error, Result};

/// A point detected in a single frame.
///
/// Detections carry no identity; they are produced fresh every frame by an
/// upstream [`Detector`](crate::frame_loop::Detector) and consumed by the
/// [`Associator`](crate::tracker::Associator).
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedPoint {
    /// Centroid of the detected object.
    pub position: Point,

    /// Optional fitted ellipse.
    pub shape: Option<Ellipse>,
}

impl DetectedPoint {
    /// Create a detection at `(x, y)` without a shape.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            position: Point::new(x, y),
            shape: None,
        }
    }

    /// Create a detection from a fitted ellipse, positioned at its centre.
    pub fn with_shape(position: Point, shape: Ellipse) -> Self {
        Self {
            position,
            shape: Some(shape),
        }
    }

    /// Create a detection, rejecting non-finite coordinates.
    pub fn checked(position: Point, shape: Option<Ellipse>) -> Result<Self> {
        if !position.is_finite() {
            return Err(Error::Numeric(format!(
                "detection position {:?} is not finite",
                position
            )));
        }
        Ok(Self { position, shape })
    }
}

impl From<Point> for DetectedPoint {
    fn from(position: Point) -> Self {
        Self {
            position,
            shape: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;

    #[test]
    fn test_detection_new() {
        let det = DetectedPoint::new(1.0, 2.0);
        assert_eq!(det.position, Point::new(1.0, 2.0));
        assert!(det.shape.is_none());
    }

    #[test]
    fn test_detection_with_shape() {
        let ellipse = Ellipse::new(Point::new(3.0, 4.0), Size::new(6.0, 2.0), 45.0);
        let det = DetectedPoint::with_shape(Point::new(3.0, 4.0), ellipse);
        assert_eq!(det.shape.unwrap().axes, Size::new(6.0, 2.0));
    }

    #[test]
    fn test_detection_checked_rejects_nan() {
        assert!(DetectedPoint::checked(Point::new(f64::NAN, 0.0), None).is_err());
        assert!(DetectedPoint::checked(Point::new(1.0, 0.0), None).is_ok());
    }
}
