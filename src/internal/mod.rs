//! Internal numeric building blocks.
//!
//! - kalman: discrete linear Kalman filter over dynamically sized matrices

pub mod kalman;
