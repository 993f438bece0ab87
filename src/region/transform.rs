//! Mapping regions between raw video coordinates and processed frame coordinates.
//!
//! Processed frames are the raw frames rotated by a multiple of 90 degrees and
//! then resized to a fixed width with the aspect ratio preserved.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::RegionMask;
use crate::geometry::Size;
use crate::{Error, Result};

/// Orthogonal rotation applied to source video.
///
/// Angles follow the usual mathematical convention: positive is
/// counter-clockwise. Serialized as the angle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum OrthoRotation {
    #[default]
    None,
    Cw90,
    Ccw90,
    Cw180,
}

impl OrthoRotation {
    pub const ALL: [OrthoRotation; 4] = [Self::None, Self::Cw90, Self::Ccw90, Self::Cw180];

    /// Rotation angle in degrees.
    pub fn angle(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Cw90 => -90,
            Self::Ccw90 => 90,
            Self::Cw180 => 180,
        }
    }

    pub fn from_angle(angle: i32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.angle() == angle)
            .ok_or_else(|| {
                let valid: Vec<String> = Self::ALL.iter().map(|r| r.angle().to_string()).collect();
                Error::InvalidConfig(format!(
                    "invalid rotation ({}), must be one of ({})",
                    angle,
                    valid.join(", ")
                ))
            })
    }

    /// The rotation that undoes this one.
    pub fn negative(self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Cw90 => Self::Ccw90,
            Self::Ccw90 => Self::Cw90,
            Self::Cw180 => Self::Cw180,
        }
    }

    /// Frame size after rotation.
    pub fn rotate_size(self, size: Size) -> Size {
        match self {
            Self::None | Self::Cw180 => size,
            Self::Cw90 | Self::Ccw90 => size.transposed(),
        }
    }

    /// Rotate `region` as though it were drawn on a frame of `frame_size`, so
    /// that the rotated frame's top-left corner is back at the origin.
    pub fn rotate_region(self, region: &RegionMask, frame_size: Size) -> RegionMask {
        match self {
            Self::None => region.clone(),
            Self::Cw90 => region.translate(0.0, -frame_size.height).rotate(90.0),
            Self::Ccw90 => region.translate(-frame_size.width, 0.0).rotate(-90.0),
            Self::Cw180 => region
                .translate(-frame_size.width, -frame_size.height)
                .rotate(180.0),
        }
    }
}

impl TryFrom<i32> for OrthoRotation {
    type Error = Error;

    fn try_from(angle: i32) -> Result<Self> {
        Self::from_angle(angle)
    }
}

impl From<OrthoRotation> for i32 {
    fn from(rotation: OrthoRotation) -> Self {
        rotation.angle()
    }
}

impl fmt::Display for OrthoRotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.angle())
    }
}

/// How raw video frames are turned into processed frames.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceVideoParams {
    pub rotation: OrthoRotation,
    /// Width to resize rotated frames to. 0 means no resize.
    pub resize_width: f64,
}

impl SourceVideoParams {
    pub fn new(rotation: OrthoRotation, resize_width: f64) -> Self {
        Self { rotation, resize_width }
    }

    /// Size of `frame` after resizing, aspect ratio preserved.
    pub fn scale_size(&self, frame: Size) -> Size {
        if self.resize_width == 0.0 {
            return frame;
        }
        Size::new(self.resize_width, self.resize_width * frame.height / frame.width)
    }

    /// Scale factor that resizing applies to `frame`.
    pub fn scale(&self, frame: Size) -> f64 {
        if self.resize_width == 0.0 {
            return 1.0;
        }
        self.resize_width / frame.width
    }

    /// Processed frame size for a raw frame of `raw_size`.
    pub fn processed_size(&self, raw_size: Size) -> Size {
        self.scale_size(self.rotation.rotate_size(raw_size))
    }
}

impl RegionMask {
    /// Map this region between raw and processed frame coordinates.
    ///
    /// With `reverse == false` the region is taken to be in raw video
    /// coordinates (frame size `raw_size`) and is rotated then resized into
    /// processed coordinates. With `reverse == true` the inverse mapping is
    /// applied, so a forward then reverse transform returns the original points.
    pub fn transform_for_params(&self, params: &SourceVideoParams, raw_size: Size, reverse: bool) -> RegionMask {
        if reverse {
            let rotation = params.rotation.negative();
            let rotated_size = rotation.rotate_size(raw_size);
            let mut region = self.clone();
            if params.resize_width != 0.0 {
                region = region.scale(rotated_size.width / params.resize_width);
            }
            rotation.rotate_region(&region, rotated_size)
        } else {
            let region = params.rotation.rotate_region(self, raw_size);
            if params.resize_width != 0.0 {
                let rotated_size = params.rotation.rotate_size(raw_size);
                region.scale(params.scale(rotated_size))
            } else {
                region
            }
        }
    }
}
