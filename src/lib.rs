//! # motion-tracker - Point Tracking Across Video Frames
//!
//! Turns a stream of unordered, identity-less detected points into a stable
//! set of persistent object identities.
//!
//! ## Features
//!
//! - Per-track constant-velocity Kalman filter (`PositionEstimator`)
//! - Mutual-best detection-to-track association with duplicate suppression
//! - Polygon region masks with JSON persistence and border-proximity gating
//! - Sequential frame loop with a hot-swappable mask slot
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use motion_tracker::{Associator, DetectedPoint, FrameContext, Size, TrackerConfig, TrackIdAllocator};
//!
//! let config = TrackerConfig::default();
//! let mut associator = Associator::new(config, Arc::new(TrackIdAllocator::new()))?;
//!
//! let detections = vec![DetectedPoint::new(100.0, 100.0)];
//! let tracks = associator.update(&detections, &FrameContext::new(0, Size::new(640.0, 480.0)), None)?;
//! ```

// Internal numeric building blocks
pub(crate) mod internal;

// Public modules
pub mod geometry;
pub mod detection;
pub mod filter;
pub mod track;
pub mod matching;
pub mod tracker;
pub mod region;
pub mod frame_loop;

// Re-exports for convenience
pub use geometry::{Ellipse, Point, Rect, Size};
pub use detection::DetectedPoint;
pub use filter::{EstimatorConfig, PositionEstimator};
pub use track::{Track, TrackIdAllocator};
pub use tracker::{Associator, FrameContext, TrackerConfig};
pub use image::GrayImage;
pub use region::{ImageRasterizer, OrthoRotation, Rasterizer, RegionMask, SourceVideoParams};
pub use frame_loop::{Detector, FrameLoop, FrameObserver, FrameSource, LoopSummary, MaskSlot};

// Error types
pub use crate::error::{Error, Result};

mod error {
    use thiserror::Error;

    /// Errors that can occur while tracking
    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Invalid mask '{source_name}': {message}")]
        MaskFormat { source_name: String, message: String },

        #[error("Numeric failure: {0}")]
        Numeric(String),

        #[error("Frame processing error: {0}")]
        Frame(String),

        #[error("JSON error: {0}")]
        Json(#[from] serde_json::Error),

        #[error("IO error: {0}")]
        IoError(#[from] std::io::Error),
    }

    /// Result type for tracking operations
    pub type Result<T> = std::result::Result<T, Error>;
}
