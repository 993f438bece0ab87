//! Detection-to-track matching.
//!
//! Matching is done on a distance matrix with one row per detection and one
//! column per track. A (track, detection) pair is committed only when each is
//! the other's nearest remaining candidate; committed rows and columns are
//! overwritten with `+inf` so later passes cannot reconsider them.

use nalgebra::DMatrix;

use crate::geometry::Point;
use crate::{Error, Result};

/// What happened to a track in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Matched to the detection with this index.
    Assigned(usize),
    /// No detection this frame.
    Stopped,
}

/// What happened to a detection in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// Matched to the track with this index.
    Assigned(usize),
    /// Collapsed into a nearby detection that a track already prefers.
    Discarded,
    /// Unclaimed; may start a new track.
    New,
}

/// Complete per-frame classification of tracks and detections.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub tracks: Vec<TrackOutcome>,
    pub detections: Vec<DetectionOutcome>,
    /// Number of matching passes run, including the final empty one.
    pub passes: usize,
}

impl Assignment {
    /// Indices of detections eligible for new tracks, in detection order.
    pub fn new_detections(&self) -> impl Iterator<Item = usize> + '_ {
        self.detections
            .iter()
            .enumerate()
            .filter(|(_, o)| matches!(o, DetectionOutcome::New))
            .map(|(i, _)| i)
    }

    pub fn assigned_count(&self) -> usize {
        self.tracks
            .iter()
            .filter(|o| matches!(o, TrackOutcome::Assigned(_)))
            .count()
    }

    pub fn discarded_count(&self) -> usize {
        self.detections
            .iter()
            .filter(|o| matches!(o, DetectionOutcome::Discarded))
            .count()
    }
}

/// Check if a matrix contains NaN values.
pub fn has_nan(matrix: &DMatrix<f64>) -> bool {
    matrix.iter().any(|&x| x.is_nan())
}

/// Validate a distance matrix (no NaN values allowed).
pub fn validate_distance_matrix(matrix: &DMatrix<f64>) -> Result<()> {
    if has_nan(matrix) {
        return Err(Error::Numeric("distance matrix contains NaN values".to_string()));
    }
    Ok(())
}

/// Symmetric matrix of Euclidean distances between every pair of points.
pub fn pairwise_distances(points: &[Point]) -> DMatrix<f64> {
    let n = points.len();
    DMatrix::from_fn(n, n, |i, j| points[i].distance(&points[j]))
}

/// Classify every track and detection for one frame.
///
/// # Arguments
/// * `distances` - Track-prediction to detection distances (n_detections x n_tracks)
/// * `detection_gaps` - Distances between detections (n_detections x n_detections)
/// * `track_ages` - Per-track penalty added on the detection side only
/// * `max_jump` - Exclusive upper bound on a matched distance
/// * `min_gap` - Detections closer than this to a track's preferred detection are discarded
pub fn assign_tracks_and_detections(
    distances: &DMatrix<f64>,
    detection_gaps: &DMatrix<f64>,
    track_ages: &[f64],
    max_jump: f64,
    min_gap: f64,
) -> Assignment {
    let n_detections = distances.nrows();
    let n_tracks = distances.ncols();
    debug_assert_eq!(track_ages.len(), n_tracks);
    debug_assert_eq!(detection_gaps.shape(), (n_detections, n_detections));

    let mut state = MatchState {
        distances: distances.clone(),
        tracks: vec![TrackOutcome::Stopped; n_tracks],
        detections: vec![DetectionOutcome::New; n_detections],
        best_detection_for_track: vec![None; n_tracks],
        best_track_for_detection: vec![None; n_detections],
    };

    if n_detections == 0 || n_tracks == 0 {
        return Assignment {
            tracks: state.tracks,
            detections: state.detections,
            passes: 0,
        };
    }

    // First pass settles the unambiguous pairs and records each side's preference.
    state.mutual_best_pass(track_ages, max_jump);
    let mut passes = 1;

    // Detections close to the one a track prefers are artifacts of the same object.
    // Only detections that compete for some track are considered.
    for det in 0..n_detections {
        let Some(track) = state.best_track_for_detection[det] else {
            continue;
        };
        let Some(preferred) = state.best_detection_for_track[track] else {
            continue;
        };
        if preferred != det && detection_gaps[(det, preferred)] < min_gap {
            state.detections[det] = DetectionOutcome::Discarded;
            state.consume_row(det);
        }
    }

    loop {
        passes += 1;
        if state.mutual_best_pass(track_ages, max_jump) == 0 {
            break;
        }
    }

    Assignment {
        tracks: state.tracks,
        detections: state.detections,
        passes,
    }
}

struct MatchState {
    distances: DMatrix<f64>,
    tracks: Vec<TrackOutcome>,
    detections: Vec<DetectionOutcome>,
    best_detection_for_track: Vec<Option<usize>>,
    best_track_for_detection: Vec<Option<usize>>,
}

impl MatchState {
    /// Commit every mutually-best pair below `max_jump`. Returns the number committed.
    fn mutual_best_pass(&mut self, track_ages: &[f64], max_jump: f64) -> usize {
        for track in 0..self.distances.ncols() {
            self.best_detection_for_track[track] = self.best_detection_for_track_at(track);
        }
        for det in 0..self.distances.nrows() {
            self.best_track_for_detection[det] = self.best_track_for_detection_at(det, track_ages, max_jump);
        }

        let mut committed = 0;
        for track in 0..self.distances.ncols() {
            let Some(det) = self.best_detection_for_track[track] else {
                continue;
            };
            if self.best_track_for_detection[det] == Some(track) && self.distances[(det, track)] < max_jump {
                self.tracks[track] = TrackOutcome::Assigned(det);
                self.detections[det] = DetectionOutcome::Assigned(track);
                self.consume_row(det);
                self.consume_column(track);
                committed += 1;
            }
        }
        committed
    }

    fn best_detection_for_track_at(&self, track: usize) -> Option<usize> {
        let mut best = None;
        let mut min_value = f64::INFINITY;
        for (det, &d) in self.distances.column(track).iter().enumerate() {
            if d < min_value {
                min_value = d;
                best = Some(det);
            }
        }
        best
    }

    fn best_track_for_detection_at(&self, det: usize, track_ages: &[f64], max_jump: f64) -> Option<usize> {
        let mut best = None;
        let mut min_value = f64::INFINITY;
        for (track, &d) in self.distances.row(det).iter().enumerate() {
            let weighted = d + track_ages[track];
            if d < max_jump && weighted < min_value {
                min_value = weighted;
                best = Some(track);
            }
        }
        best
    }

    fn consume_row(&mut self, det: usize) {
        self.distances.row_mut(det).fill(f64::INFINITY);
    }

    fn consume_column(&mut self, track: usize) {
        self.distances.column_mut(track).fill(f64::INFINITY);
    }
}
