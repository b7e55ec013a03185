use super::DepthFilter;
use crate::frames::DepthImage;

/// Drops every depth sample outside `[min_distance, max_distance]` meters.
#[derive(Clone, Copy, Debug)]
pub struct ThresholdFilter {
    pub min_distance: f32,
    pub max_distance: f32,
}

impl ThresholdFilter {
    pub fn new(min_distance: f32, max_distance: f32) -> Self {
        Self {
            min_distance,
            max_distance,
        }
    }
}

impl DepthFilter for ThresholdFilter {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn process(&self, mut depth: DepthImage) -> DepthImage {
        let units = depth.depth_units;
        for sample in depth.pixels.iter_mut() {
            let meters = *sample as f32 * units;
            if meters < self.min_distance || meters > self.max_distance {
                *sample = 0;
            }
        }
        depth
    }
}
