use nalgebra::Isometry3;

use super::DepthFilter;
use crate::frames::{DepthImage, DepthPixels, Intrinsics};

/// Reprojects a depth image into the viewpoint of another stream.
///
/// Every valid depth pixel is lifted with the depth intrinsics, moved by
/// `extrinsics` and projected with the target intrinsics. When two samples
/// land on the same target pixel the nearer one wins.
#[derive(Clone, Copy, Debug)]
pub struct Align {
    pub target: Intrinsics,
    pub extrinsics: Isometry3<f32>,
}

impl Align {
    pub fn new(target: Intrinsics, extrinsics: Isometry3<f32>) -> Self {
        Self { target, extrinsics }
    }
}

impl DepthFilter for Align {
    fn name(&self) -> &'static str {
        "align"
    }

    fn process(&self, depth: DepthImage) -> DepthImage {
        let mut pixels = DepthPixels::new(self.target.width, self.target.height);
        let mut aligned = DepthImage::new(DepthPixels::new(0, 0), depth.depth_units, self.target);

        for (x, y, sample) in depth.pixels.enumerate_pixels() {
            let sample = sample.0[0];
            if sample == 0 {
                continue;
            }
            let meters = sample as f32 * depth.depth_units;
            let point = depth.intrinsics.deproject(x as f32, y as f32, meters);
            let point = self.extrinsics.transform_point(&point);
            let Some((u, v)) = self
                .target
                .project(&point)
                .and_then(|pixel| self.target.nearest_pixel(&pixel))
            else {
                continue;
            };
            let target_sample = aligned.to_units(point.z);
            if target_sample == 0 {
                continue;
            }
            let existing = &mut pixels.get_pixel_mut(u, v).0[0];
            if *existing == 0 || target_sample < *existing {
                *existing = target_sample;
            }
        }

        aligned.pixels = pixels;
        aligned
    }
}
