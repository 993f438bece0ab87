//! Discrete linear Kalman filter.
//!
//! Predict and correct follow the usual two-step formulation: `predict`
//! propagates the posterior through the transition model, `correct` folds a
//! measurement into the prior. A singular innovation covariance or a
//! non-finite state is reported as an error rather than patched over.

use nalgebra::{DMatrix, DVector};

use crate::{Error, Result};

/// Standard Kalman filter with no control input.
#[derive(Clone, Debug)]
pub struct KalmanFilter {
    /// State dimension
    pub dim_x: usize,
    /// Measurement dimension
    pub dim_z: usize,
    /// State vector
    pub x: DVector<f64>,
    /// State covariance matrix
    pub p: DMatrix<f64>,
    /// State transition matrix
    pub f: DMatrix<f64>,
    /// Measurement matrix
    pub h: DMatrix<f64>,
    /// Measurement noise covariance
    pub r: DMatrix<f64>,
    /// Process noise covariance
    pub q: DMatrix<f64>,
}

impl KalmanFilter {
    /// Create a new Kalman filter with identity matrices and a zero state.
    ///
    /// # Arguments
    /// * `dim_x` - State dimension
    /// * `dim_z` - Measurement dimension
    pub fn new(dim_x: usize, dim_z: usize) -> Self {
        // H observes the leading dim_z state components
        let mut h = DMatrix::zeros(dim_z, dim_x);
        for i in 0..dim_z.min(dim_x) {
            h[(i, i)] = 1.0;
        }

        Self {
            dim_x,
            dim_z,
            x: DVector::zeros(dim_x),
            p: DMatrix::identity(dim_x, dim_x),
            f: DMatrix::identity(dim_x, dim_x),
            h,
            r: DMatrix::identity(dim_z, dim_z),
            q: DMatrix::identity(dim_x, dim_x),
        }
    }

    /// Propagate the state one step and return the prior.
    pub fn predict(&mut self) -> &DVector<f64> {
        // x = F @ x
        self.x = &self.f * &self.x;

        // P = F @ P @ F.T + Q
        self.p = &self.f * &self.p * self.f.transpose() + &self.q;

        &self.x
    }

    /// Correct the state with measurement `z` and return the posterior.
    pub fn correct(&mut self, z: &DVector<f64>) -> Result<&DVector<f64>> {
        if z.len() != self.dim_z {
            return Err(Error::Numeric(format!(
                "measurement has {} components, filter expects {}",
                z.len(),
                self.dim_z
            )));
        }

        // y = z - H @ x (innovation)
        let y = z - &self.h * &self.x;

        // S = H @ P @ H.T + R (innovation covariance)
        let s = &self.h * &self.p * self.h.transpose() + &self.r;

        let si = s.try_inverse().ok_or_else(|| {
            Error::Numeric("innovation covariance is singular".to_string())
        })?;

        // K = P @ H.T @ S^-1 (Kalman gain)
        let k = &self.p * self.h.transpose() * si;

        // x = x + K @ y
        self.x += &k * y;

        // P = (I - K @ H) @ P
        let i = DMatrix::identity(self.dim_x, self.dim_x);
        self.p = (i - &k * &self.h) * &self.p;

        if self.x.iter().any(|v| !v.is_finite()) || self.p.iter().any(|v| !v.is_finite()) {
            return Err(Error::Numeric("Kalman correction produced a non-finite state".to_string()));
        }

        Ok(&self.x)
    }
}
