//! Track struct for objects maintained by the associator.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::filter::{EstimatorConfig, PositionEstimator};
use crate::geometry::{Ellipse, Point};
use crate::Result;

/// Hands out track ids.
///
/// Ids are assigned once and never reused. The allocator is owned by whoever
/// drives the associator and can be shared between associators that must not
/// collide.
#[derive(Debug, Default)]
pub struct TrackIdAllocator {
    next: AtomicU64,
}

impl TrackIdAllocator {
    /// Create an allocator whose first id is 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create an allocator whose first id is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Get the next id.
    /// Relaxed ordering is enough; only uniqueness matters.
    #[inline]
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Id that the next call to [`next_id`](Self::next_id) will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// A persistent object identity.
///
/// Wraps a [`PositionEstimator`] with an id, frame bookkeeping and an optional
/// ellipse that follows the corrected position.
#[derive(Debug, Clone)]
pub struct Track {
    id: u64,
    estimator: PositionEstimator,
    created_frame: u64,
    last_detected_frame: u64,
    shape: Option<Ellipse>,
}

impl Track {
    /// Create a track at `position` first seen in `frame`.
    ///
    /// The estimator starts at rest; callers normally `apply` the same
    /// position straight away.
    pub fn new(
        id: u64,
        config: &EstimatorConfig,
        position: Point,
        shape: Option<Ellipse>,
        frame: u64,
    ) -> Self {
        Self {
            id,
            estimator: PositionEstimator::new(config, position),
            created_frame: frame,
            last_detected_frame: frame,
            shape,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Distance from `point` to this frame's prediction.
    pub fn assess(&mut self, point: &Point) -> f64 {
        self.estimator.assess(point)
    }

    /// Run this frame's predict step (idempotent until the next apply).
    pub fn predict(&mut self) -> Point {
        self.estimator.predict()
    }

    /// Correct with a measured position. The shape, if any, is re-centred.
    pub fn apply(&mut self, point: Point) -> Result<Point> {
        let p = self.estimator.apply(point)?;
        self.recenter(p);
        Ok(p)
    }

    /// Object presumed stationary; re-apply the last point.
    pub fn stopped(&mut self) -> Result<Point> {
        let p = self.estimator.stopped()?;
        self.recenter(p);
        Ok(p)
    }

    /// Object presumed moving undetected; apply the prediction.
    pub fn continue_as_predicted(&mut self) -> Result<Point> {
        let p = self.estimator.continue_as_predicted()?;
        self.recenter(p);
        Ok(p)
    }

    fn recenter(&mut self, p: Point) {
        if let Some(shape) = self.shape.as_mut() {
            shape.center = p;
        }
    }

    pub fn estimator(&self) -> &PositionEstimator {
        &self.estimator
    }

    pub fn shape(&self) -> Option<&Ellipse> {
        self.shape.as_ref()
    }

    pub fn current_position(&self) -> Point {
        self.estimator.current_position()
    }

    pub fn last_predicted_point(&self) -> Point {
        self.estimator.last_predicted_point()
    }

    pub fn last_applied_point(&self) -> Point {
        self.estimator.last_applied_point()
    }

    pub fn applied_point_count(&self) -> u32 {
        self.estimator.applied_point_count()
    }

    pub fn displacement(&self) -> f64 {
        self.estimator.displacement()
    }

    /// Frame in which the track was created.
    pub fn created_frame(&self) -> u64 {
        self.created_frame
    }

    /// Frame in which the track was last matched to a detection.
    pub fn last_detected_frame(&self) -> u64 {
        self.last_detected_frame
    }

    pub fn set_last_detected_frame(&mut self, frame: u64) {
        self.last_detected_frame = frame;
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Track<{},{},{}>",
            self.id,
            self.current_position(),
            self.applied_point_count()
        )
    }
}
