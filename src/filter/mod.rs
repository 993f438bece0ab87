//! Per-track motion estimation.
//!
//! This module provides:
//! - `EstimatorConfig` - named presets or explicit covariance triples
//! - `PositionEstimator` - constant-velocity Kalman filter over 2D position

mod config;
mod estimator;

pub use config::{EstimatorConfig, PRESET_NAMES};
pub use estimator::PositionEstimator;
