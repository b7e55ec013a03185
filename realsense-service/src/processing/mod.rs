//! Processing blocks that turn a raw frame set into a filtered depth image
//! and a colored point cloud.
//!
//! Each depth filter consumes the output of the previous one, so the order
//! of a `FilterChain` matters: threshold before decimation keeps the
//! decimated samples inside the threshold range, and hole filling last only
//! ever copies samples that already passed both.

use crate::{config::FilterConfig, frames::DepthImage};

pub mod align;
pub mod colorizer;
pub mod decimation;
pub mod hole_filling;
pub mod pointcloud;
pub mod threshold;

pub use align::Align;
pub use colorizer::Colorizer;
pub use decimation::DecimationFilter;
pub use hole_filling::{HoleFillingFilter, HoleFillingMode};
pub use pointcloud::{CloudPoint, PointCloud, PointCloudBlock};
pub use threshold::ThresholdFilter;

/// A pure function over a depth image.
pub trait DepthFilter: Send {
    fn name(&self) -> &'static str;

    fn process(&self, depth: DepthImage) -> DepthImage;
}

/// Depth filters applied left to right.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn DepthFilter>>,
}

impl FilterChain {
    /// Threshold, then decimation, then hole filling.
    pub fn from_config(config: &FilterConfig) -> Self {
        Self::default()
            .then(ThresholdFilter::new(config.min_distance, config.max_distance))
            .then(DecimationFilter::new(config.decimation_magnitude))
            .then(HoleFillingFilter::new(config.hole_filling))
    }

    #[must_use]
    pub fn then(mut self, filter: impl DepthFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn process(&self, depth: DepthImage) -> DepthImage {
        self.filters
            .iter()
            .fold(depth, |depth, filter| filter.process(depth))
    }
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Luma};

    use super::FilterChain;
    use crate::{
        config::FilterConfig,
        frames::{DepthImage, Intrinsics},
    };

    #[test]
    fn chain_order() {
        let chain = FilterChain::from_config(&FilterConfig::default());
        assert_eq!(chain.names(), ["threshold", "decimation", "hole_filling"]);
    }

    #[test]
    fn chain_keeps_samples_in_range() {
        // A ramp from 0 to 3.1 meters with a few holes
        let pixels = ImageBuffer::from_fn(32, 8, |x, y| {
            if (x + y) % 7 == 0 {
                Luma([0])
            } else {
                Luma([(x * 100) as u16])
            }
        });
        let depth = DepthImage::new(pixels, 0.001, Intrinsics::centered(32, 8, 20.0));
        let config = FilterConfig::default();
        let filtered = FilterChain::from_config(&config).process(depth);

        assert_eq!((filtered.width(), filtered.height()), (16, 4));
        for x in 0..filtered.width() {
            for y in 0..filtered.height() {
                let d = filtered.distance(x, y);
                assert!(d == 0.0 || (config.min_distance..=config.max_distance).contains(&d));
            }
        }
        assert!(filtered.valid_count() > 0);
    }

    #[test]
    fn empty_chain_is_identity() {
        let pixels = ImageBuffer::from_fn(3, 3, |x, y| Luma([(x * 3 + y) as u16]));
        let depth = DepthImage::new(pixels.clone(), 0.001, Intrinsics::centered(3, 3, 1.0));
        assert_eq!(FilterChain::default().process(depth).pixels, pixels);
    }
}
