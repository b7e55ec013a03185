use super::DepthFilter;
use crate::frames::{DepthImage, DepthPixels};

/// Shrinks a depth image by `magnitude` in both directions.
///
/// Each output sample is the lower median of the valid samples in its
/// `magnitude x magnitude` block, so an output sample is always one of the
/// input samples and never an average across an edge. Blocks with no valid
/// samples stay empty. Trailing rows and columns that do not fill a whole
/// block are dropped.
#[derive(Clone, Copy, Debug)]
pub struct DecimationFilter {
    pub magnitude: u32,
}

impl DecimationFilter {
    pub fn new(magnitude: u32) -> Self {
        Self {
            magnitude: magnitude.max(1),
        }
    }
}

impl DepthFilter for DecimationFilter {
    fn name(&self) -> &'static str {
        "decimation"
    }

    fn process(&self, depth: DepthImage) -> DepthImage {
        let mag = self.magnitude;
        if mag <= 1 {
            return depth;
        }
        let width = depth.width() / mag;
        let height = depth.height() / mag;
        let mut block = Vec::with_capacity((mag * mag) as usize);

        let pixels = DepthPixels::from_fn(width, height, |x, y| {
            block.clear();
            for by in y * mag..(y + 1) * mag {
                for bx in x * mag..(x + 1) * mag {
                    let sample = depth.raw(bx, by);
                    if sample != 0 {
                        block.push(sample);
                    }
                }
            }
            if block.is_empty() {
                return image::Luma([0]);
            }
            block.sort_unstable();
            image::Luma([block[(block.len() - 1) / 2]])
        });

        DepthImage::new(pixels, depth.depth_units, depth.intrinsics.scaled(mag))
    }
}
