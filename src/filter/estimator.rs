//! Constant-velocity position estimator for a single tracked object.

use nalgebra::{DMatrix, DVector};

use super::config::EstimatorConfig;
use crate::geometry::Point;
use crate::internal::kalman::KalmanFilter;
use crate::Result;

/// State dimension: [x, y, vx, vy]
const DIM_X: usize = 4;
/// Measurement dimension: [x, y]
const DIM_Z: usize = 2;

/// Whether the filter has been propagated for the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
enum PredictState {
    AwaitingPredict,
    Predicted(Point),
}

/// Kalman filter applied to a single object.
///
/// Per frame, call [`assess`](Self::assess) for every candidate detection, then
/// exactly one of [`apply`](Self::apply) (position known),
/// [`stopped`](Self::stopped) or [`continue_as_predicted`](Self::continue_as_predicted).
/// The predict step runs at most once between two applies.
#[derive(Debug, Clone)]
pub struct PositionEstimator {
    kf: KalmanFilter,
    predict_state: PredictState,
    initial_position: Point,
    last_applied_point: Point,
    last_predicted_point: Point,
    current_position: Option<Point>,
    applied_point_count: u32,
    position_changed: bool,
    change_count: u32,
}

impl PositionEstimator {
    /// Create an estimator at rest at `initial_position`.
    pub fn new(config: &EstimatorConfig, initial_position: Point) -> Self {
        let mut kf = KalmanFilter::new(DIM_X, DIM_Z);

        kf.x = DVector::from_vec(vec![initial_position.x, initial_position.y, 0.0, 0.0]);

        // [I, I]
        // [0, I]
        kf.f = DMatrix::identity(DIM_X, DIM_X);
        for i in 0..DIM_Z {
            kf.f[(i, DIM_Z + i)] = 1.0;
        }

        kf.q = DMatrix::identity(DIM_X, DIM_X) * config.process_noise_cov;
        kf.r = DMatrix::identity(DIM_Z, DIM_Z) * config.measurement_noise_cov;
        kf.p = DMatrix::identity(DIM_X, DIM_X) * config.error_cov_post;

        Self {
            kf,
            predict_state: PredictState::AwaitingPredict,
            initial_position,
            last_applied_point: initial_position,
            last_predicted_point: initial_position,
            current_position: None,
            applied_point_count: 0,
            position_changed: false,
            change_count: 0,
        }
    }

    /// Run the predict step if it has not yet run this frame and return the
    /// predicted position.
    pub fn predict(&mut self) -> Point {
        match self.predict_state {
            PredictState::Predicted(p) => p,
            PredictState::AwaitingPredict => {
                let x = self.kf.predict();
                let p = Point::new(x[0], x[1]);
                self.predict_state = PredictState::Predicted(p);
                self.last_predicted_point = p;
                p
            }
        }
    }

    /// Distance from `point` to this frame's predicted position.
    pub fn assess(&mut self, point: &Point) -> f64 {
        self.predict().distance(point)
    }

    /// Correct the filter with `point` and return the corrected position.
    pub fn apply(&mut self, point: Point) -> Result<Point> {
        self.last_applied_point = point;
        self.applied_point_count += 1;

        // Predict must precede correct, exactly once.
        self.predict();
        self.predict_state = PredictState::AwaitingPredict;

        let z = DVector::from_vec(vec![point.x, point.y]);
        let corrected = self.kf.correct(&z)?;
        let new_pos = Point::new(corrected[0], corrected[1]);

        self.position_changed = self.current_position != Some(new_pos);
        if self.position_changed {
            self.change_count += 1;
        }
        self.current_position = Some(new_pos);
        Ok(new_pos)
    }

    /// Re-apply the last applied point; the object is presumed stationary.
    pub fn stopped(&mut self) -> Result<Point> {
        self.apply(self.last_applied_point)
    }

    /// Apply the last predicted point (dead reckoning).
    pub fn continue_as_predicted(&mut self) -> Result<Point> {
        let predicted = self.predict();
        self.apply(predicted)
    }

    /// Result of the most recent apply, or the initial position before any.
    pub fn current_position(&self) -> Point {
        self.current_position.unwrap_or(self.initial_position)
    }

    /// Prediction for this frame, if the predict step already ran.
    pub fn pending_prediction(&self) -> Option<Point> {
        match self.predict_state {
            PredictState::Predicted(p) => Some(p),
            PredictState::AwaitingPredict => None,
        }
    }

    pub fn initial_position(&self) -> Point {
        self.initial_position
    }

    pub fn last_applied_point(&self) -> Point {
        self.last_applied_point
    }

    pub fn last_predicted_point(&self) -> Point {
        self.last_predicted_point
    }

    /// Number of points applied, including stopped and dead-reckoned ones.
    pub fn applied_point_count(&self) -> u32 {
        self.applied_point_count
    }

    /// True if the last apply moved the current position.
    pub fn is_position_changed(&self) -> bool {
        self.position_changed
    }

    pub fn change_count(&self) -> u32 {
        self.change_count
    }

    /// Estimated velocity in pixels per frame.
    pub fn velocity(&self) -> (f64, f64) {
        (self.kf.x[2], self.kf.x[3])
    }

    /// Distance from the initial position to the current position.
    pub fn displacement(&self) -> f64 {
        self.initial_position.distance(&self.current_position())
    }
}
