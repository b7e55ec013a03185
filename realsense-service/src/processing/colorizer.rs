use image::{GrayImage, Luma};

use crate::frames::DepthImage;

/// Renders depth as an 8 bit image for visualization.
///
/// `min_distance` maps to 255 and `max_distance` to 1, so near things are
/// bright. Missing samples are black.
#[derive(Clone, Copy, Debug)]
pub struct Colorizer {
    pub min_distance: f32,
    pub max_distance: f32,
}

impl Colorizer {
    pub fn new(min_distance: f32, max_distance: f32) -> Self {
        Self {
            min_distance,
            max_distance,
        }
    }

    pub fn colorize(&self, depth: &DepthImage) -> GrayImage {
        let span = (self.max_distance - self.min_distance).max(f32::EPSILON);
        GrayImage::from_fn(depth.width(), depth.height(), |x, y| {
            let raw = depth.raw(x, y);
            if raw == 0 {
                return Luma([0]);
            }
            let meters = raw as f32 * depth.depth_units;
            let t = ((meters - self.min_distance) / span).clamp(0.0, 1.0);
            Luma([255 - (t * 254.0).round() as u8])
        })
    }
}
