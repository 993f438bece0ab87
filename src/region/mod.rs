//! Polygon regions used to restrict processing to part of a frame.
//!
//! This module provides:
//! - `RegionMask` - a set of polygons plus an include/exclude flag, with JSON persistence
//! - `OrthoRotation` / `SourceVideoParams` - mapping between raw and processed frame coordinates
//! - `Rasterizer` - the drawing collaborator used to fill, outline and apply masks

mod raster;
mod transform;

pub use raster::{ImageRasterizer, Rasterizer};
pub use transform::{OrthoRotation, SourceVideoParams};

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use image::{imageops, GrayImage, Luma};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::geometry::{bounding_rect, Point, Rect};
use crate::{Error, Result};

/// Outline thickness used by [`RegionMask::draw`].
pub const OUTLINE_THICKNESS: f64 = 4.0;

/// A spatial region made of one or more polygons.
///
/// `include_region` says whether the area of interest is inside the polygons
/// (true) or outside them (false). Geometric queries such as
/// [`point_inside`](Self::point_inside) ignore the flag.
///
/// Serialized as `{"includeRegion": bool, "points": [[{"x":..,"y":..}, ...], ...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionMask {
    include_region: bool,
    points: Vec<Vec<Point>>,
}

impl RegionMask {
    /// Create a region from explicit polygons.
    pub fn new(include_region: bool, polygons: Vec<Vec<Point>>) -> Self {
        Self {
            include_region,
            points: polygons,
        }
        .checked()
    }

    /// Single four-corner polygon: top-left, bottom-left, bottom-right, top-right.
    pub fn from_rect(include_region: bool, rect: Rect) -> Self {
        let polygon = vec![
            Point::new(rect.x, rect.y),
            Point::new(rect.x, rect.y + rect.height),
            Point::new(rect.x + rect.width, rect.y + rect.height),
            Point::new(rect.x + rect.width, rect.y),
        ];
        Self::new(include_region, vec![polygon])
    }

    /// Parse a region from JSON text. `source_name` is only used in errors.
    pub fn from_json_str(json: &str, source_name: &str) -> Result<Self> {
        serde_json::from_str::<Self>(json)
            .map(Self::checked)
            .map_err(|e| mask_format(source_name, e))
    }

    /// Parse a region from any reader of JSON text.
    pub fn from_reader<R: Read>(reader: R, source_name: &str) -> Result<Self> {
        serde_json::from_reader::<_, Self>(reader)
            .map(Self::checked)
            .map_err(|e| mask_format(source_name, e))
    }

    /// Load a region from a mask file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), &path.display().to_string())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Write the region to a mask file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// True if the area of interest is inside the polygons.
    pub fn is_include_region(&self) -> bool {
        self.include_region
    }

    pub fn polygons(&self) -> &[Vec<Point>] {
        &self.points
    }

    /// Number of polygons without any points. They are ignored by every query.
    pub fn empty_polygon_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_empty()).count()
    }

    /// All points scaled relative to the origin.
    pub fn scale(&self, factor: f64) -> Self {
        self.map_points(|p| Point::new(p.x * factor, p.y * factor))
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        self.map_points(|p| Point::new(p.x + dx, p.y + dy))
    }

    /// All points rotated by `degrees` about the origin.
    pub fn rotate(&self, degrees: f64) -> Self {
        self.rotate_about(degrees, Point::ORIGIN)
    }

    /// All points rotated by `degrees` about `pivot`.
    pub fn rotate_about(&self, degrees: f64, pivot: Point) -> Self {
        let (sin_a, cos_a) = degrees.to_radians().sin_cos();
        self.map_points(|p| {
            let dx = p.x - pivot.x;
            let dy = p.y - pivot.y;
            Point::new(dx * cos_a - dy * sin_a + pivot.x, dx * sin_a + dy * cos_a + pivot.y)
        })
    }

    /// Bounding rectangle of every point, or an empty rectangle at the origin
    /// if the region has no points.
    pub fn bounds(&self) -> Rect {
        bounding_rect(self.points.iter().flatten()).unwrap_or_default()
    }

    /// How far `point` lies inside the region.
    ///
    /// Returns the largest signed distance from `point` to the edges of any
    /// polygon, positive inside. Points outside every polygon or on a border
    /// give 0: a point exactly on an edge has a signed distance of +0 or -0,
    /// neither of which beats the starting value in the `d > best` comparison.
    pub fn point_inside(&self, point: &Point) -> f64 {
        let mut best: f64 = 0.0;
        for polygon in self.points.iter().filter(|p| !p.is_empty()) {
            let d = signed_distance(polygon, point);
            if d > best {
                best = d;
            }
        }
        best
    }

    /// Outline and/or fill the region on `image`.
    pub fn draw<R: Rasterizer + ?Sized>(
        &self,
        rasterizer: &R,
        image: &mut GrayImage,
        outline: Option<u8>,
        fill: Option<u8>,
    ) {
        if let Some(value) = outline {
            rasterizer.stroke_polygons(image, &self.points, value, OUTLINE_THICKNESS);
        }
        if let Some(value) = fill {
            rasterizer.fill_polygons(image, &self.points, value);
        }
    }

    /// Copy of `frame` with everything outside the area of interest set to `mask_value`.
    pub fn mask<R: Rasterizer + ?Sized>(
        &self,
        rasterizer: &R,
        frame: &GrayImage,
        mask_value: u8,
    ) -> Result<GrayImage> {
        let (width, height) = frame.dimensions();
        let mut masked = GrayImage::from_pixel(width, height, Luma([mask_value]));
        let mut stencil = GrayImage::new(width, height);
        self.draw(rasterizer, &mut stencil, None, Some(u8::MAX));
        if !self.include_region {
            imageops::invert(&mut stencil);
        }
        rasterizer.masked_copy(frame, &stencil, &mut masked)?;
        Ok(masked)
    }

    fn checked(self) -> Self {
        let empty = self.empty_polygon_count();
        if empty > 0 {
            warn!("Region {} has {} empty polygon(s); they are ignored", self, empty);
        }
        self
    }

    fn map_points<F>(&self, op: F) -> Self
    where
        F: Fn(&Point) -> Point,
    {
        let points = self
            .points
            .iter()
            .map(|polygon| polygon.iter().map(&op).collect())
            .collect();
        Self::new(self.include_region, points)
    }
}

impl fmt::Display for RegionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.bounds();
        write!(
            f,
            "Region[inclusive={},bounds={}x{} at ({},{})]",
            self.include_region, b.width, b.height, b.x, b.y
        )
    }
}

fn mask_format(source_name: &str, err: serde_json::Error) -> Error {
    Error::MaskFormat {
        source_name: source_name.to_string(),
        message: err.to_string(),
    }
}

/// Signed distance from `p` to the closed polygon's edges, positive inside.
fn signed_distance(polygon: &[Point], p: &Point) -> f64 {
    let n = polygon.len();
    let mut min_dist = f64::INFINITY;
    let mut inside = false;

    let mut j = n - 1;
    for i in 0..n {
        let a = polygon[j];
        let b = polygon[i];
        min_dist = min_dist.min(segment_distance(&a, &b, p));

        // Ray casting
        if (b.y > p.y) != (a.y > p.y) && p.x < (a.x - b.x) * (p.y - b.y) / (a.y - b.y) + b.x {
            inside = !inside;
        }
        j = i;
    }

    if inside {
        min_dist
    } else {
        -min_dist
    }
}

/// Distance from `p` to the segment `a`-`b`.
fn segment_distance(a: &Point, b: &Point, p: &Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return a.distance(p);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    Point::new(a.x + t * dx, a.y + t * dy).distance(p)
}
