//! Sequential frame loop: source -> detector -> associator -> observers.
//!
//! Frames are processed strictly in order on the calling thread. The active
//! mask lives in a [`MaskSlot`] that other threads may replace at any time;
//! the loop reads it once per frame and re-derives the processed-frame mask
//! only when the slot holds a different mask than last time.

use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;

use crate::detection::DetectedPoint;
use crate::geometry::Size;
use crate::region::{RegionMask, SourceVideoParams};
use crate::track::Track;
use crate::tracker::{Associator, FrameContext};
use crate::Result;

/// Sequential supplier of frames.
pub trait FrameSource {
    type Frame;

    /// Next `(frame_index, frame)` pair, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<(u64, Self::Frame)>>;

    /// Raw frame size, before rotation and resizing.
    fn frame_size(&self) -> Size;

    /// Total number of frames, if known.
    fn frame_count(&self) -> Option<u64> {
        None
    }

    /// Recording frame rate, if known.
    fn fps(&self) -> Option<f64> {
        None
    }
}

/// Turns a frame into detected points.
pub trait Detector<F> {
    /// Detect points in `frame`.
    ///
    /// `mask` is the active region in processed-frame coordinates; detectors
    /// are expected to ignore anything outside the area of interest.
    fn detect(&mut self, frame: &F, mask: Option<&RegionMask>) -> Result<Vec<DetectedPoint>>;
}

/// Receives per-frame results from a [`FrameLoop`].
pub trait FrameObserver {
    /// Called after every tracked frame with the tracks it produced.
    fn on_frame(&mut self, frame: &FrameContext, tracks: &[Track]) -> Result<()>;

    /// Called when the active mask changes, with the mask in processed-frame coordinates.
    fn on_mask_changed(&mut self, _mask: Option<&RegionMask>) {}

    /// Called once after the source is exhausted.
    fn on_done(&mut self, _summary: &LoopSummary) -> Result<()> {
        Ok(())
    }
}

/// Shared, replaceable holder for the active mask (raw video coordinates).
///
/// Clones share the same slot. Writers swap the whole mask; readers get an
/// `Arc` snapshot that stays valid regardless of later swaps.
#[derive(Debug, Clone, Default)]
pub struct MaskSlot {
    inner: Arc<RwLock<Option<Arc<RegionMask>>>>,
}

impl MaskSlot {
    /// Empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mask(mask: RegionMask) -> Self {
        let slot = Self::new();
        slot.replace(Some(mask));
        slot
    }

    /// Install a new mask, or clear it with `None`.
    pub fn replace(&self, mask: Option<RegionMask>) {
        *self.inner.write() = mask.map(Arc::new);
    }

    pub fn clear(&self) {
        self.replace(None);
    }

    /// Snapshot of the current mask.
    pub fn load(&self) -> Option<Arc<RegionMask>> {
        self.inner.read().clone()
    }
}

/// Counters reported when a [`FrameLoop`] finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopSummary {
    /// Frames read from the source.
    pub frames_read: u64,
    /// Frames passed through detection and association.
    pub frames_tracked: u64,
    /// Tracks alive after the last frame.
    pub final_track_count: usize,
}

/// Drives frames from a [`FrameSource`] through a [`Detector`] and an [`Associator`].
pub struct FrameLoop {
    associator: Associator,
    source_params: SourceVideoParams,
    mask: MaskSlot,
    observers: Vec<Box<dyn FrameObserver>>,
}

impl FrameLoop {
    /// # Arguments
    /// * `associator` - Associator that owns the tracks
    /// * `source_params` - Rotation and resize applied to raw frames
    /// * `mask` - Slot holding the active mask in raw video coordinates
    pub fn new(associator: Associator, source_params: SourceVideoParams, mask: MaskSlot) -> Self {
        Self {
            associator,
            source_params,
            mask,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn FrameObserver>) {
        self.observers.push(observer);
    }

    pub fn associator(&self) -> &Associator {
        &self.associator
    }

    /// Hand back the associator, for example to keep its tracks after the run.
    pub fn into_associator(self) -> Associator {
        self.associator
    }

    pub fn mask_slot(&self) -> &MaskSlot {
        &self.mask
    }

    /// Process every frame of `source`.
    ///
    /// Stops at the first error from the source, the detector, the
    /// associator or an observer.
    pub fn run<S, D>(&mut self, source: &mut S, detector: &mut D) -> Result<LoopSummary>
    where
        S: FrameSource,
        D: Detector<S::Frame>,
    {
        let raw_size = source.frame_size();
        let frame_size = self.source_params.processed_size(raw_size);
        let total = source.frame_count().filter(|&n| n > 0);
        let first_frame = self.associator.config().first_frame_to_process;
        info!(
            "Processing {} frames of {}x{} ({} fps) as {}x{}",
            total.map_or_else(|| "?".to_string(), |n| n.to_string()),
            raw_size.width,
            raw_size.height,
            source.fps().map_or_else(|| "?".to_string(), |f| f.to_string()),
            frame_size.width,
            frame_size.height
        );

        let mut summary = LoopSummary::default();
        let mut raw_mask: Option<Arc<RegionMask>> = None;
        let mut mask: Option<RegionMask> = None;
        let mut logged_decile = 0;

        while let Some((frame_index, frame)) = source.next_frame()? {
            summary.frames_read += 1;

            if let Some(total) = total {
                let decile = (summary.frames_read * 10 / total).min(10);
                if decile > logged_decile {
                    logged_decile = decile;
                    info!("{}% of frames processed", decile * 10);
                }
            }

            if frame_index < first_frame {
                continue;
            }

            // Mask
            let current = self.mask.load();
            let changed = match (&current, &raw_mask) {
                (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
                (None, None) => false,
                _ => true,
            };
            if changed {
                mask = current
                    .as_deref()
                    .map(|m| m.transform_for_params(&self.source_params, raw_size, false));
                match &mask {
                    Some(m) => info!("Frame {}: mask replaced, now {}", frame_index, m),
                    None => info!("Frame {}: mask cleared", frame_index),
                }
                for observer in &mut self.observers {
                    observer.on_mask_changed(mask.as_ref());
                }
                raw_mask = current;
            }

            let detections = detector.detect(&frame, mask.as_ref())?;
            let context = FrameContext::new(frame_index, frame_size);
            let tracks = self.associator.update(&detections, &context, mask.as_ref())?;
            summary.frames_tracked += 1;

            for observer in &mut self.observers {
                observer.on_frame(&context, tracks)?;
            }
        }

        summary.final_track_count = self.associator.track_count();
        debug!("Frame loop finished: {:?}", summary);
        for observer in &mut self.observers {
            observer.on_done(&summary)?;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::region::OrthoRotation;
    use crate::track::TrackIdAllocator;
    use crate::tracker::TrackerConfig;
    use crate::Error;
    use parking_lot::Mutex;

    /// Frames are just the points visible in them.
    struct ScriptedSource {
        frames: Vec<Vec<(f64, f64)>>,
        next: usize,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Vec<(f64, f64)>>) -> Self {
            Self { frames, next: 0 }
        }
    }

    impl FrameSource for ScriptedSource {
        type Frame = Vec<(f64, f64)>;

        fn next_frame(&mut self) -> Result<Option<(u64, Self::Frame)>> {
            let frame = self.frames.get(self.next).cloned();
            let index = self.next as u64;
            self.next += 1;
            Ok(frame.map(|f| (index, f)))
        }

        fn frame_size(&self) -> Size {
            Size::new(200.0, 100.0)
        }

        fn frame_count(&self) -> Option<u64> {
            Some(self.frames.len() as u64)
        }
    }

    /// Reports every point that lies inside an include mask (or all points without one).
    struct PointDetector;

    impl Detector<Vec<(f64, f64)>> for PointDetector {
        fn detect(&mut self, frame: &Vec<(f64, f64)>, mask: Option<&RegionMask>) -> Result<Vec<DetectedPoint>> {
            Ok(frame
                .iter()
                .map(|&(x, y)| DetectedPoint::new(x, y))
                .filter(|d| mask.map_or(true, |m| m.point_inside(&d.position) > 0.0))
                .collect())
        }
    }

    #[derive(Default)]
    struct Log {
        frames: Vec<(u64, Vec<u64>)>,
        masks: Vec<Option<Rect>>,
        done: Option<LoopSummary>,
    }

    struct Recorder {
        log: Arc<Mutex<Log>>,
        swap: Option<(u64, MaskSlot, RegionMask)>,
    }

    impl FrameObserver for Recorder {
        fn on_frame(&mut self, frame: &FrameContext, tracks: &[Track]) -> Result<()> {
            self.log
                .lock()
                .frames
                .push((frame.frame_index, tracks.iter().map(|t| t.id()).collect()));
            if let Some((at, slot, mask)) = &self.swap {
                if *at == frame.frame_index {
                    slot.replace(Some(mask.clone()));
                }
            }
            Ok(())
        }

        fn on_mask_changed(&mut self, mask: Option<&RegionMask>) {
            self.log.lock().masks.push(mask.map(|m| m.bounds()));
        }

        fn on_done(&mut self, summary: &LoopSummary) -> Result<()> {
            self.log.lock().done = Some(*summary);
            Ok(())
        }
    }

    fn associator(config: TrackerConfig) -> Associator {
        Associator::new(config, Arc::new(TrackIdAllocator::new())).unwrap()
    }

    #[test]
    fn test_mask_slot_snapshots() {
        let slot = MaskSlot::new();
        assert!(slot.load().is_none());

        let shared = slot.clone();
        shared.replace(Some(RegionMask::from_rect(true, Rect::new(0.0, 0.0, 1.0, 1.0))));
        let first = slot.load().unwrap();

        slot.replace(Some(RegionMask::from_rect(true, Rect::new(0.0, 0.0, 2.0, 2.0))));
        let second = shared.load().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        // Earlier snapshots are unaffected by the swap
        assert_eq!(first.bounds().width, 1.0);

        shared.clear();
        assert!(slot.load().is_none());
    }

    #[test]
    fn test_loop_tracks_and_notifies() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut frame_loop = FrameLoop::new(
            associator(TrackerConfig::default()),
            SourceVideoParams::default(),
            MaskSlot::new(),
        );
        frame_loop.add_observer(Box::new(Recorder {
            log: log.clone(),
            swap: None,
        }));

        let mut source = ScriptedSource::new(vec![
            vec![(10.0, 10.0), (150.0, 50.0)],
            vec![(12.0, 10.0), (150.0, 52.0)],
            vec![(14.0, 10.0)],
        ]);
        let summary = frame_loop.run(&mut source, &mut PointDetector).unwrap();

        assert_eq!(summary.frames_read, 3);
        assert_eq!(summary.frames_tracked, 3);
        assert_eq!(summary.final_track_count, 2);

        let log = log.lock();
        assert_eq!(
            log.frames,
            vec![(0, vec![0, 1]), (1, vec![0, 1]), (2, vec![0, 1])]
        );
        assert!(log.masks.is_empty());
        assert_eq!(log.done, Some(summary));
    }

    #[test]
    fn test_frames_before_first_are_skipped() {
        let mut frame_loop = FrameLoop::new(
            associator(TrackerConfig {
                first_frame_to_process: 2,
                ..TrackerConfig::default()
            }),
            SourceVideoParams::default(),
            MaskSlot::new(),
        );
        let mut source = ScriptedSource::new(vec![vec![(1.0, 1.0)]; 4]);
        let summary = frame_loop.run(&mut source, &mut PointDetector).unwrap();

        assert_eq!(summary.frames_read, 4);
        assert_eq!(summary.frames_tracked, 2);
        assert_eq!(frame_loop.associator().tracks()[0].created_frame(), 2);
    }

    #[test]
    fn test_mask_transformed_and_hot_swapped() {
        let log = Arc::new(Mutex::new(Log::default()));
        let slot = MaskSlot::with_mask(RegionMask::from_rect(true, Rect::new(0.0, 0.0, 100.0, 100.0)));
        let params = SourceVideoParams::new(OrthoRotation::None, 100.0);
        let config = TrackerConfig {
            max_jump: 30.0,
            ..TrackerConfig::default()
        };
        let mut frame_loop = FrameLoop::new(associator(config), params, slot.clone());
        frame_loop.add_observer(Box::new(Recorder {
            log: log.clone(),
            swap: Some((1, slot.clone(), RegionMask::from_rect(true, Rect::new(100.0, 0.0, 100.0, 100.0)))),
        }));

        // Processed frames are half size; points are in processed coordinates
        let mut source = ScriptedSource::new(vec![
            vec![(20.0, 20.0), (80.0, 20.0)],
            vec![(20.0, 20.0), (80.0, 20.0)],
            vec![(20.0, 20.0), (80.0, 20.0)],
        ]);
        frame_loop.run(&mut source, &mut PointDetector).unwrap();

        let log = log.lock();
        assert_eq!(
            log.masks,
            vec![
                Some(Rect::new(0.0, 0.0, 50.0, 50.0)),
                Some(Rect::new(50.0, 0.0, 50.0, 50.0)),
            ]
        );
        // Left track sees detections until the swap, right one appears after it
        assert_eq!(log.frames[0].1, vec![0]);
        assert_eq!(log.frames[2].1, vec![0, 1]);
    }

    #[test]
    fn test_detector_error_stops_loop() {
        struct Failing;
        impl Detector<Vec<(f64, f64)>> for Failing {
            fn detect(&mut self, _: &Vec<(f64, f64)>, _: Option<&RegionMask>) -> Result<Vec<DetectedPoint>> {
                Err(Error::Frame("decoder gave up".to_string()))
            }
        }

        let mut frame_loop = FrameLoop::new(
            associator(TrackerConfig::default()),
            SourceVideoParams::default(),
            MaskSlot::new(),
        );
        let mut source = ScriptedSource::new(vec![vec![(0.0, 0.0)]]);
        assert!(matches!(
            frame_loop.run(&mut source, &mut Failing),
            Err(Error::Frame(_))
        ));
    }
}
