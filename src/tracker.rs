//! Main associator implementation.

use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::detection::DetectedPoint;
use crate::filter::EstimatorConfig;
use crate::geometry::{Point, Rect, Size};
use crate::matching::{
    assign_tracks_and_detections, pairwise_distances, validate_distance_matrix, TrackOutcome,
};
use crate::region::RegionMask;
use crate::track::{Track, TrackIdAllocator};
use crate::{Error, Result};

/// Configuration for the associator.
///
/// Deserialized from camelCase JSON; every field is optional and falls back
/// to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    /// Maximum distance between a prediction and a matched detection (exclusive).
    pub max_jump: f64,

    /// Detections closer than this to one a track prefers are treated as duplicates.
    pub min_gap: f64,

    /// Stopped tracks closer than this to the boundary are terminated. Values <= 0 disable.
    pub termination_border: f64,

    /// Penalty per frame since a track was last detected, applied when a detection picks a track.
    pub age_weighting: f64,

    /// Frames before this index (0-based) are not tracked.
    pub first_frame_to_process: u64,

    /// If false, new tracks are only created on the first processed frame.
    pub allow_new_tracks: bool,

    /// Noise settings for every track's estimator.
    pub estimator: EstimatorConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_jump: 100.0,
            min_gap: 50.0,
            termination_border: -1.0,
            age_weighting: 0.0,
            first_frame_to_process: 0,
            allow_new_tracks: true,
            estimator: EstimatorConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Parse and validate a configuration from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(json)?;

        // The estimator string is parsed on its own so its errors stay InvalidConfig
        let estimator = match value.as_object_mut().and_then(|fields| fields.remove("estimator")) {
            Some(serde_json::Value::String(text)) => Some(text.parse::<EstimatorConfig>()?),
            Some(other) => {
                return Err(Error::InvalidConfig(format!(
                    "estimator must be a preset name or a 'q,r,p' string, got {}",
                    other
                )))
            }
            None => None,
        };

        let mut config: Self = serde_json::from_value(value)?;
        if let Some(estimator) = estimator {
            config.estimator = estimator;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check that thresholds are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_jump.is_nan() || self.max_jump <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "maxJump must be positive, got {}",
                self.max_jump
            )));
        }
        if !self.min_gap.is_finite() || self.min_gap < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "minGap must be a non-negative number, got {}",
                self.min_gap
            )));
        }
        if !self.age_weighting.is_finite() || self.age_weighting < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "ageWeighting must be a non-negative number, got {}",
                self.age_weighting
            )));
        }
        if !self.termination_border.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "terminationBorder must be a finite number, got {}",
                self.termination_border
            )));
        }
        Ok(())
    }

    /// True if `frame_index` may create new tracks.
    pub fn allows_new_tracks_at(&self, frame_index: u64) -> bool {
        self.allow_new_tracks || frame_index == self.first_frame_to_process
    }
}

/// Per-frame information the associator needs besides detections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    /// 0-based index of the frame in the source.
    pub frame_index: u64,
    /// Size of the processed frame.
    pub frame_size: Size,
}

impl FrameContext {
    pub fn new(frame_index: u64, frame_size: Size) -> Self {
        Self {
            frame_index,
            frame_size,
        }
    }
}

/// Detection-to-track associator.
///
/// Maintains the set of live tracks across frames, matching each frame's
/// detections to existing tracks, creating tracks for unclaimed detections
/// and terminating stopped tracks that drift onto the boundary.
pub struct Associator {
    config: TrackerConfig,
    ids: Arc<TrackIdAllocator>,
    tracks: Vec<Track>,
}

impl Associator {
    /// Create an associator with no tracks.
    ///
    /// # Arguments
    /// * `config` - Thresholds and estimator settings
    /// * `ids` - Source of track ids, shared with anything else that must not reuse them
    pub fn new(config: TrackerConfig, ids: Arc<TrackIdAllocator>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ids,
            tracks: Vec::new(),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Live tracks, oldest first.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Process one frame of detections.
    ///
    /// # Arguments
    /// * `detections` - Points detected in this frame
    /// * `frame` - Frame index and size
    /// * `mask` - Active region, used as the termination boundary when present
    ///
    /// # Returns
    /// Tracks after this frame: surviving tracks in their previous order,
    /// followed by new tracks in detection order.
    pub fn update(
        &mut self,
        detections: &[DetectedPoint],
        frame: &FrameContext,
        mask: Option<&RegionMask>,
    ) -> Result<&[Track]> {
        if frame.frame_index < self.config.first_frame_to_process {
            return Ok(self.tracks.as_slice());
        }

        if let Some(bad) = detections.iter().find(|d| !d.position.is_finite()) {
            error!("Frame {}: non-finite detection {:?}", frame.frame_index, bad.position);
            return Err(Error::Numeric(format!(
                "detection position {:?} is not finite",
                bad.position
            )));
        }

        // Work on a copy; self.tracks is only replaced once the whole frame succeeds
        let mut working = self.tracks.clone();

        // Predict once per track, then measure every pair in parallel
        let predictions: Vec<Point> = working.iter_mut().map(|t| t.predict()).collect();
        let positions: Vec<Point> = detections.iter().map(|d| d.position).collect();
        let distances = assessment_matrix(&positions, &predictions);
        if let Err(e) = validate_distance_matrix(&distances) {
            error!("Frame {}: {}", frame.frame_index, e);
            return Err(e);
        }

        let ages: Vec<f64> = working
            .iter()
            .map(|t| {
                let since = frame.frame_index.saturating_sub(t.last_detected_frame());
                self.config.age_weighting * since as f64
            })
            .collect();
        let gaps = pairwise_distances(&positions);

        let assignment = assign_tracks_and_detections(
            &distances,
            &gaps,
            &ages,
            self.config.max_jump,
            self.config.min_gap,
        );

        let fallback;
        let boundary = match mask {
            Some(m) => m,
            None => {
                fallback = RegionMask::from_rect(true, Rect::from_size(frame.frame_size));
                &fallback
            }
        };

        let mut next = Vec::with_capacity(working.len() + detections.len());
        let mut terminated = 0;

        for (mut track, outcome) in working.into_iter().zip(assignment.tracks.iter()) {
            match *outcome {
                TrackOutcome::Assigned(d) => {
                    track.apply(detections[d].position).map_err(|e| log_numeric(&track, e))?;
                    track.set_last_detected_frame(frame.frame_index);
                    next.push(track);
                }
                TrackOutcome::Stopped => {
                    track.stopped().map_err(|e| log_numeric(&track, e))?;
                    if self.should_terminate(&track, boundary) {
                        info!("Frame {}: terminating {}", frame.frame_index, track);
                        terminated += 1;
                    } else {
                        next.push(track);
                    }
                }
            }
        }

        let mut created = 0;
        if self.config.allows_new_tracks_at(frame.frame_index) {
            for d in assignment.new_detections() {
                let detection = &detections[d];
                let mut track = Track::new(
                    self.ids.next_id(),
                    &self.config.estimator,
                    detection.position,
                    detection.shape,
                    frame.frame_index,
                );
                track.apply(detection.position).map_err(|e| log_numeric(&track, e))?;
                info!("Frame {}: new {}", frame.frame_index, track);
                next.push(track);
                created += 1;
            }
        }

        debug!(
            "Frame {}: {} detections, {} assigned, {} discarded, {} new, {} terminated, {} passes -> {} tracks",
            frame.frame_index,
            detections.len(),
            assignment.assigned_count(),
            assignment.discarded_count(),
            created,
            terminated,
            assignment.passes,
            next.len()
        );

        self.tracks = next;
        Ok(self.tracks.as_slice())
    }

    fn should_terminate(&self, track: &Track, boundary: &RegionMask) -> bool {
        self.config.termination_border > 0.0
            && boundary.point_inside(&track.last_predicted_point()) < self.config.termination_border
    }
}

/// Distances from every detection (rows) to every track prediction (columns).
fn assessment_matrix(positions: &[Point], predictions: &[Point]) -> DMatrix<f64> {
    let n = predictions.len();
    let values: Vec<f64> = (0..positions.len() * n)
        .into_par_iter()
        .map(|k| positions[k / n].distance(&predictions[k % n]))
        .collect();
    DMatrix::from_row_slice(positions.len(), n, &values)
}

fn log_numeric(track: &Track, e: Error) -> Error {
    error!("Numeric failure updating {}: {}", track, e);
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FRAME: Size = Size {
        width: 1000.0,
        height: 1000.0,
    };

    fn associator(config: TrackerConfig) -> Associator {
        Associator::new(config, Arc::new(TrackIdAllocator::new())).unwrap()
    }

    fn points(coords: &[(f64, f64)]) -> Vec<DetectedPoint> {
        coords.iter().map(|&(x, y)| DetectedPoint::new(x, y)).collect()
    }

    fn ids(tracks: &[Track]) -> Vec<u64> {
        tracks.iter().map(|t| t.id()).collect()
    }

    // ===== Configuration =====

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.max_jump, 100.0);
        assert_eq!(config.min_gap, 50.0);
        assert_eq!(config.termination_border, -1.0);
        assert_eq!(config.age_weighting, 0.0);
        assert_eq!(config.first_frame_to_process, 0);
        assert!(config.allow_new_tracks);
        assert_eq!(config.estimator.label(), "normal");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_json() {
        let config = TrackerConfig::from_json_str(
            r#"{"maxJump": 40, "minGap": 5, "terminationBorder": 10, "estimator": "fast", "allowNewTracks": false}"#,
        )
        .unwrap();
        assert_eq!(config.max_jump, 40.0);
        assert_eq!(config.min_gap, 5.0);
        assert_eq!(config.termination_border, 10.0);
        assert!(!config.allow_new_tracks);
        assert_eq!(config.estimator, EstimatorConfig::by_name("fast").unwrap());
        // Unspecified fields keep their defaults
        assert_eq!(config.age_weighting, 0.0);

        let triple = TrackerConfig::from_json_str(r#"{"estimator": "1e-5,0.1,0.1"}"#).unwrap();
        assert_relative_eq!(triple.estimator.process_noise_cov, 1e-5);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            TrackerConfig::from_json_str(r#"{"estimator": "medium"}"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            TrackerConfig::from_json_str(r#"{"estimator": "1e-5,0.1"}"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            TrackerConfig::from_json_str(r#"{"estimator": 3}"#),
            Err(Error::InvalidConfig(_))
        ));
        // Syntax errors are still reported as JSON errors
        assert!(matches!(TrackerConfig::from_json_str("{maxJump"), Err(Error::Json(_))));
        assert!(matches!(
            TrackerConfig::from_json_str(r#"{"maxJump": 0}"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            TrackerConfig::from_json_str(r#"{"minGap": -1}"#),
            Err(Error::InvalidConfig(_))
        ));

        let config = TrackerConfig {
            age_weighting: f64::NAN,
            ..TrackerConfig::default()
        };
        assert!(Associator::new(config, Arc::new(TrackIdAllocator::new())).is_err());
    }

    // ===== Scenarios =====

    #[test]
    fn test_first_frame_creates_tracks_in_detection_order() {
        let mut assoc = associator(TrackerConfig::default());
        let tracks = assoc
            .update(&points(&[(0.0, 0.0), (2.0, 1.0), (100.0, 100.0)]), &FrameContext::new(100, FRAME), None)
            .unwrap();

        // No track competes for (0,0) and (2,1), so the close pair is not collapsed
        assert_eq!(ids(tracks), vec![0, 1, 2]);
        for track in tracks {
            assert_eq!(track.applied_point_count(), 1);
            assert_eq!(track.created_frame(), 100);
            assert_eq!(track.last_detected_frame(), 100);
        }
        assert_relative_eq!(tracks[1].current_position().x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(tracks[1].current_position().y, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_continuation_assigns_and_stops() {
        let mut assoc = associator(TrackerConfig::default());
        assoc
            .update(&points(&[(0.0, 0.0), (2.0, 1.0), (100.0, 100.0)]), &FrameContext::new(100, FRAME), None)
            .unwrap();

        let tracks = assoc
            .update(&points(&[(0.0, 0.0), (98.0, 98.0)]), &FrameContext::new(110, FRAME), None)
            .unwrap();

        assert_eq!(ids(tracks), vec![0, 1, 2]);
        assert_eq!(tracks[0].last_detected_frame(), 110);
        assert_eq!(tracks[1].last_detected_frame(), 100);
        assert_eq!(tracks[2].last_detected_frame(), 110);
        // Stopped tracks still take a step
        for track in tracks {
            assert_eq!(track.applied_point_count(), 2);
        }
        assert_eq!(tracks[1].last_applied_point(), Point::new(2.0, 1.0));
        assert!(tracks[2].current_position().x < 100.0);
    }

    #[test]
    fn test_duplicate_detection_discarded() {
        let mut assoc = associator(TrackerConfig::default());
        assoc.update(&points(&[(0.0, 0.0)]), &FrameContext::new(0, FRAME), None).unwrap();

        let tracks = assoc
            .update(&points(&[(0.0, 0.0), (1.0, 1.0)]), &FrameContext::new(1, FRAME), None)
            .unwrap();

        assert_eq!(ids(tracks), vec![0]);
        assert_eq!(tracks[0].applied_point_count(), 2);
    }

    // ===== Thresholds =====

    #[test]
    fn test_jump_beyond_max_starts_new_track() {
        let mut assoc = associator(TrackerConfig {
            max_jump: 10.0,
            min_gap: 1.0,
            ..TrackerConfig::default()
        });
        assoc.update(&points(&[(0.0, 0.0)]), &FrameContext::new(0, FRAME), None).unwrap();

        let tracks = assoc.update(&points(&[(10.0, 0.0)]), &FrameContext::new(1, FRAME), None).unwrap();
        assert_eq!(ids(tracks), vec![0, 1]);
        assert_eq!(tracks[0].last_detected_frame(), 0);

        let tracks = assoc.update(&points(&[(9.5, 0.0)]), &FrameContext::new(2, FRAME), None).unwrap();
        // (9.5, 0) is within reach of the track created at (10, 0)
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].last_detected_frame(), 2);
    }

    #[test]
    fn test_age_weighting_prefers_recent_track() {
        let config = TrackerConfig {
            age_weighting: 5.0,
            min_gap: 1.0,
            ..TrackerConfig::default()
        };
        let mut assoc = associator(config);
        // Two tracks 10 apart
        assoc
            .update(&points(&[(0.0, 0.0), (10.0, 0.0)]), &FrameContext::new(0, FRAME), None)
            .unwrap();
        // Only the second is seen for a while
        for frame in 1..5 {
            assoc.update(&points(&[(10.0, 0.0)]), &FrameContext::new(frame, FRAME), None).unwrap();
        }
        // A detection slightly nearer the stale track goes to the fresh one
        let tracks = assoc.update(&points(&[(4.0, 0.0)]), &FrameContext::new(5, FRAME), None).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].last_detected_frame(), 0);
        assert_eq!(tracks[1].last_detected_frame(), 5);
    }

    // ===== Lifecycle =====

    #[test]
    fn test_empty_frame_stops_everything() {
        let mut assoc = associator(TrackerConfig::default());
        assoc
            .update(&points(&[(100.0, 100.0), (500.0, 500.0)]), &FrameContext::new(0, FRAME), None)
            .unwrap();
        let tracks = assoc.update(&[], &FrameContext::new(1, FRAME), None).unwrap();
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.last_detected_frame() == 0));
        assert!(tracks.iter().all(|t| t.applied_point_count() == 2));
    }

    #[test]
    fn test_termination_near_frame_border() {
        let mut assoc = associator(TrackerConfig {
            termination_border: 20.0,
            ..TrackerConfig::default()
        });
        assoc
            .update(&points(&[(5.0, 500.0), (500.0, 500.0)]), &FrameContext::new(0, FRAME), None)
            .unwrap();

        let tracks = assoc.update(&[], &FrameContext::new(1, FRAME), None).unwrap();
        assert_eq!(ids(tracks), vec![1]);
    }

    #[test]
    fn test_termination_uses_mask_when_present() {
        let mut assoc = associator(TrackerConfig {
            termination_border: 20.0,
            ..TrackerConfig::default()
        });
        let mask = RegionMask::from_rect(true, Rect::new(400.0, 400.0, 200.0, 200.0));
        assoc
            .update(&points(&[(410.0, 500.0), (500.0, 500.0)]), &FrameContext::new(0, FRAME), Some(&mask))
            .unwrap();

        let tracks = assoc.update(&[], &FrameContext::new(1, FRAME), Some(&mask)).unwrap();
        assert_eq!(ids(tracks), vec![1]);
    }

    #[test]
    fn test_disabled_termination_keeps_tracks() {
        let mut assoc = associator(TrackerConfig::default());
        assoc.update(&points(&[(1.0, 1.0)]), &FrameContext::new(0, FRAME), None).unwrap();
        for frame in 1..20 {
            assoc.update(&[], &FrameContext::new(frame, FRAME), None).unwrap();
        }
        assert_eq!(assoc.track_count(), 1);
    }

    #[test]
    fn test_first_frame_to_process() {
        let mut assoc = associator(TrackerConfig {
            first_frame_to_process: 3,
            allow_new_tracks: false,
            ..TrackerConfig::default()
        });

        for frame in 0..3 {
            let tracks = assoc.update(&points(&[(1.0, 1.0)]), &FrameContext::new(frame, FRAME), None).unwrap();
            assert!(tracks.is_empty());
        }

        let tracks = assoc.update(&points(&[(1.0, 1.0)]), &FrameContext::new(3, FRAME), None).unwrap();
        assert_eq!(tracks.len(), 1);

        // Later frames only continue existing tracks
        let tracks = assoc
            .update(&points(&[(1.0, 1.0), (700.0, 700.0)]), &FrameContext::new(4, FRAME), None)
            .unwrap();
        assert_eq!(ids(tracks), vec![0]);
        assert_eq!(tracks[0].last_detected_frame(), 4);
    }

    #[test]
    fn test_shared_id_allocator() {
        let ids_source = Arc::new(TrackIdAllocator::starting_at(10));
        let mut a = Associator::new(TrackerConfig::default(), ids_source.clone()).unwrap();
        let mut b = Associator::new(TrackerConfig::default(), ids_source.clone()).unwrap();

        a.update(&points(&[(0.0, 0.0)]), &FrameContext::new(0, FRAME), None).unwrap();
        b.update(&points(&[(0.0, 0.0)]), &FrameContext::new(0, FRAME), None).unwrap();

        assert_eq!(a.tracks()[0].id(), 10);
        assert_eq!(b.tracks()[0].id(), 11);
        assert_eq!(ids_source.peek(), 12);
    }

    #[test]
    fn test_shape_carried_by_track() {
        use crate::geometry::Ellipse;

        let mut assoc = associator(TrackerConfig::default());
        let ellipse = Ellipse::new(Point::new(50.0, 50.0), Size::new(8.0, 4.0), 30.0);
        assoc
            .update(&[DetectedPoint::with_shape(Point::new(50.0, 50.0), ellipse)], &FrameContext::new(0, FRAME), None)
            .unwrap();
        let tracks = assoc.update(&points(&[(53.0, 50.0)]), &FrameContext::new(1, FRAME), None).unwrap();

        let shape = tracks[0].shape().unwrap();
        assert_eq!(shape.center, tracks[0].current_position());
        assert_eq!(shape.axes, Size::new(8.0, 4.0));
    }

    #[test]
    fn test_non_finite_detection_is_fatal() {
        let mut assoc = associator(TrackerConfig::default());
        let result = assoc.update(&points(&[(f64::NAN, 0.0)]), &FrameContext::new(0, FRAME), None);
        assert!(matches!(result, Err(Error::Numeric(_))));
    }

    #[test]
    fn test_numeric_failure_leaves_tracks_untouched() {
        let mut assoc = associator(TrackerConfig {
            max_jump: f64::MAX,
            ..TrackerConfig::default()
        });

        // Track 1 is pushed to the edge of f64 so its next prediction overflows
        let frames = [
            vec![(10.0, 10.0), (-0.89e308, 0.0)],
            vec![(10.0, 10.0), (0.89e308, 0.0)],
            vec![(10.0, 10.0), (f64::MAX, 0.0)],
        ];
        for (frame, detections) in frames.iter().enumerate() {
            let tracks = assoc
                .update(&points(detections), &FrameContext::new(frame as u64, FRAME), None)
                .unwrap();
            assert_eq!(tracks.len(), 2);
        }

        let snapshot: Vec<(u64, u32, u64, Point)> = assoc
            .tracks()
            .iter()
            .map(|t| (t.id(), t.applied_point_count(), t.last_detected_frame(), t.current_position()))
            .collect();

        // Track 0 is updated before track 1 fails
        let result = assoc.update(&points(&[(10.0, 10.0)]), &FrameContext::new(3, FRAME), None);
        assert!(matches!(result, Err(Error::Numeric(_))));

        let after: Vec<(u64, u32, u64, Point)> = assoc
            .tracks()
            .iter()
            .map(|t| (t.id(), t.applied_point_count(), t.last_detected_frame(), t.current_position()))
            .collect();
        assert_eq!(after, snapshot);
    }
}
