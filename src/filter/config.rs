//! Noise configuration for the position estimator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Names accepted by [`EstimatorConfig::by_name`], smoothest first.
pub const PRESET_NAMES: [&str; 5] = ["veryslow", "slow", "normal", "fast", "veryfast"];

/// Covariance scales for a [`PositionEstimator`](super::PositionEstimator).
///
/// Each value multiplies an identity matrix: `process_noise_cov` scales Q,
/// `measurement_noise_cov` scales R and `error_cov_post` scales the initial P.
///
/// Parsed either from a preset name or from a `"q,r,p"` triple. Serializes
/// back to the same string it was parsed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EstimatorConfig {
    label: String,
    pub process_noise_cov: f64,
    pub measurement_noise_cov: f64,
    pub error_cov_post: f64,
}

impl EstimatorConfig {
    /// Create a configuration from an explicit triple.
    ///
    /// # Arguments
    /// * `process_noise_cov` - Process noise scale (Q)
    /// * `measurement_noise_cov` - Measurement noise scale (R)
    /// * `error_cov_post` - Initial error covariance scale (P)
    pub fn new(process_noise_cov: f64, measurement_noise_cov: f64, error_cov_post: f64) -> Result<Self> {
        for (name, value) in [
            ("process noise covariance", process_noise_cov),
            ("measurement noise covariance", measurement_noise_cov),
            ("error covariance post", error_cov_post),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }

        Ok(Self {
            label: format!("{},{},{}", process_noise_cov, measurement_noise_cov, error_cov_post),
            process_noise_cov,
            measurement_noise_cov,
            error_cov_post,
        })
    }

    /// Look up a named preset.
    pub fn by_name(name: &str) -> Result<Self> {
        let (q, r, p) = match name {
            "veryslow" => (1e-10, 1e-2, 1e-2),
            "slow" => (1e-6, 1e-2, 1e-2),
            "normal" => (1e-4, 1e-1, 1e-1),
            "fast" => (1e-3, 1e-1, 1e-1),
            "veryfast" => (1e-1, 1.0, 1.0),
            _ => return Err(Error::InvalidConfig(format!("unknown estimator preset '{}'", name))),
        };
        Ok(Self {
            label: name.to_string(),
            process_noise_cov: q,
            measurement_noise_cov: r,
            error_cov_post: p,
        })
    }

    /// Preset name or triple this configuration was built from.
    pub fn label(&self) -> &str {
        &self.label
    }

    fn parse_triple(s: &str) -> Option<(f64, f64, f64)> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [q, r, p] => Some((*q, *r, *p)),
            _ => None,
        }
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            label: "normal".to_string(),
            process_noise_cov: 1e-4,
            measurement_noise_cov: 1e-1,
            error_cov_post: 1e-1,
        }
    }
}

impl FromStr for EstimatorConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if PRESET_NAMES.contains(&s) {
            return Self::by_name(s);
        }

        let (q, r, p) = Self::parse_triple(s).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "invalid Kalman filter parameters '{}': expected \
                 '<process noise covariance>,<measurement noise covariance>,<error covariance post>' \
                 or one of {}",
                s,
                PRESET_NAMES.join(", ")
            ))
        })?;
        let mut config = Self::new(q, r, p)?;
        config.label = s.to_string();
        Ok(config)
    }
}

impl TryFrom<String> for EstimatorConfig {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<EstimatorConfig> for String {
    fn from(config: EstimatorConfig) -> Self {
        config.label
    }
}

impl fmt::Display for EstimatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}
