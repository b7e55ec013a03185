use std::sync::Arc;

use image::Rgb;
use nalgebra::{Point2, Point3};

use crate::frames::{ColorImage, DepthImage};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CloudPoint {
    /// Meters, in the color camera frame.
    pub position: Point3<f32>,
    /// The color image pixel nearest to `pixel`, if it lies inside the color image.
    pub color: Option<Rgb<u8>>,
    /// Where the point projects onto the color image.
    pub pixel: Point2<f32>,
    /// The depth pixel the point was lifted from.
    pub source: [u32; 2],
}

/// An immutable, cheaply cloneable set of points.
#[derive(Clone, Debug, Default)]
pub struct PointCloud {
    pub points: Arc<[CloudPoint]>,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CloudPoint> {
        self.points.iter()
    }
}

/// Lifts a depth image aligned to the color stream into a colored point cloud.
#[derive(Clone, Copy, Debug, Default)]
pub struct PointCloudBlock;

impl PointCloudBlock {
    pub fn calculate(&self, depth: &DepthImage, color: &ColorImage) -> PointCloud {
        let points: Vec<_> = depth
            .pixels
            .enumerate_pixels()
            .filter(|(_, _, sample)| sample.0[0] != 0)
            .filter_map(|(x, y, sample)| {
                let meters = sample.0[0] as f32 * depth.depth_units;
                let position = depth.intrinsics.deproject(x as f32, y as f32, meters);
                let pixel = color.intrinsics.project(&position)?;
                Some(CloudPoint {
                    position,
                    color: color.sample(&pixel),
                    pixel,
                    source: [x, y],
                })
            })
            .collect();

        PointCloud {
            points: points.into(),
        }
    }
}
