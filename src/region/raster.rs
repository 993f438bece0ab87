//! Rasterization of regions onto single-channel frames.

use image::{GrayImage, Luma};
use imageproc::drawing::{draw_hollow_polygon_mut, draw_polygon_mut};
use imageproc::point::Point as PixelPoint;

use crate::geometry::Point;
use crate::{Error, Result};

/// Drawing operations a [`RegionMask`](super::RegionMask) needs.
pub trait Rasterizer {
    /// Fill the interior of each closed polygon with `value`.
    fn fill_polygons(&self, target: &mut GrayImage, polygons: &[Vec<Point>], value: u8);

    /// Draw each polygon as a closed polyline of the given thickness.
    fn stroke_polygons(&self, target: &mut GrayImage, polygons: &[Vec<Point>], value: u8, thickness: f64);

    /// Copy `src` into `dst` wherever `mask` is non-zero.
    fn masked_copy(&self, src: &GrayImage, mask: &GrayImage, dst: &mut GrayImage) -> Result<()>;
}

/// CPU rasterizer backed by `imageproc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRasterizer;

impl Rasterizer for ImageRasterizer {
    fn fill_polygons(&self, target: &mut GrayImage, polygons: &[Vec<Point>], value: u8) {
        for polygon in polygons {
            let vertices = integer_vertices(polygon);
            if vertices.len() >= 3 {
                draw_polygon_mut(target, &vertices, Luma([value]));
            }
        }
    }

    fn stroke_polygons(&self, target: &mut GrayImage, polygons: &[Vec<Point>], value: u8, thickness: f64) {
        // Thick outlines are drawn as offset passes of a one pixel outline
        let half = (thickness / 2.0).round().max(0.0) as i32;
        for polygon in polygons {
            let vertices = float_vertices(polygon);
            if vertices.len() < 2 {
                continue;
            }
            for dy in -half..=half {
                for dx in -half..=half {
                    if dx * dx + dy * dy > half * half {
                        continue;
                    }
                    let shifted: Vec<PixelPoint<f32>> = vertices
                        .iter()
                        .map(|p| PixelPoint::new(p.x + dx as f32, p.y + dy as f32))
                        .collect();
                    draw_hollow_polygon_mut(target, &shifted, Luma([value]));
                }
            }
        }
    }

    fn masked_copy(&self, src: &GrayImage, mask: &GrayImage, dst: &mut GrayImage) -> Result<()> {
        if src.dimensions() != mask.dimensions() || src.dimensions() != dst.dimensions() {
            return Err(Error::Frame(format!(
                "masked copy size mismatch: src {:?}, mask {:?}, dst {:?}",
                src.dimensions(),
                mask.dimensions(),
                dst.dimensions()
            )));
        }
        for ((d, s), m) in dst.pixels_mut().zip(src.pixels()).zip(mask.pixels()) {
            if m.0[0] != 0 {
                *d = *s;
            }
        }
        Ok(())
    }
}

/// Vertices rounded to pixels, without repeats or a closing point.
///
/// `imageproc` rejects polygons whose last point equals the first.
fn integer_vertices(polygon: &[Point]) -> Vec<PixelPoint<i32>> {
    let mut vertices: Vec<PixelPoint<i32>> = Vec::with_capacity(polygon.len());
    for p in polygon {
        let v = PixelPoint::new(p.x.round() as i32, p.y.round() as i32);
        if vertices.last() != Some(&v) {
            vertices.push(v);
        }
    }
    while vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    vertices
}

fn float_vertices(polygon: &[Point]) -> Vec<PixelPoint<f32>> {
    let mut vertices: Vec<PixelPoint<f32>> = Vec::with_capacity(polygon.len());
    for p in polygon {
        let v = PixelPoint::new(p.x as f32, p.y as f32);
        if vertices.last() != Some(&v) {
            vertices.push(v);
        }
    }
    while vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    vertices
}
