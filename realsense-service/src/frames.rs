//! Owned images and frame sets.
//!
//! Frames coming out of the camera are copied into these types right away,
//! so nothing here borrows from the SDK and nothing outlives its cycle
//! unless it is explicitly kept as part of a `Capture`.

use chrono::{DateTime, Utc};
use image::{ImageBuffer, Luma, Rgb, RgbImage};
use nalgebra::{Isometry3, Point2, Point3};

use crate::error::{Modality, RealSenseError};

/// The pinhole model of a stream. Distortion is ignored, which is what the
/// RealSense depth and color streams report for their rectified outputs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub ppx: f32,
    pub ppy: f32,
}

impl Intrinsics {
    /// Intrinsics with the principal point at the image center and
    /// the given focal length in pixels.
    pub fn centered(width: u32, height: u32, focal_length: f32) -> Self {
        Self {
            width,
            height,
            fx: focal_length,
            fy: focal_length,
            ppx: width as f32 / 2.0,
            ppy: height as f32 / 2.0,
        }
    }

    /// Lifts pixel `(u, v)` at `depth` meters into a point in the camera frame.
    pub fn deproject(&self, u: f32, v: f32, depth: f32) -> Point3<f32> {
        Point3::new(
            (u - self.ppx) / self.fx * depth,
            (v - self.ppy) / self.fy * depth,
            depth,
        )
    }

    /// Projects a point in the camera frame onto the image plane.
    ///
    /// Returns `None` for points at or behind the camera.
    pub fn project(&self, point: &Point3<f32>) -> Option<Point2<f32>> {
        if point.z <= 0.0 {
            return None;
        }
        Some(Point2::new(
            point.x / point.z * self.fx + self.ppx,
            point.y / point.z * self.fy + self.ppy,
        ))
    }

    /// The intrinsics of this stream after shrinking it by `factor`.
    pub fn scaled(&self, factor: u32) -> Self {
        let factor_f = factor as f32;
        Self {
            width: self.width / factor,
            height: self.height / factor,
            fx: self.fx / factor_f,
            fy: self.fy / factor_f,
            ppx: self.ppx / factor_f,
            ppy: self.ppy / factor_f,
        }
    }

    /// The pixel nearest to `pixel`, if it lies inside this stream's image.
    pub fn nearest_pixel(&self, pixel: &Point2<f32>) -> Option<(u32, u32)> {
        nearest_pixel(pixel, self.width, self.height)
    }
}

/// Pixel centers sit on integer coordinates, so `(-0.5, -0.5)` is the top
/// left corner of the image.
fn nearest_pixel(pixel: &Point2<f32>, width: u32, height: u32) -> Option<(u32, u32)> {
    let (u, v) = (pixel.x.round(), pixel.y.round());
    if u >= 0.0 && v >= 0.0 && u < width as f32 && v < height as f32 {
        Some((u as u32, v as u32))
    } else {
        None
    }
}

pub type DepthPixels = ImageBuffer<Luma<u16>, Vec<u16>>;

/// A grid of 16 bit depth samples. A sample of 0 means "no data".
#[derive(Clone, Debug)]
pub struct DepthImage {
    pub pixels: DepthPixels,
    /// Meters per depth unit.
    pub depth_units: f32,
    pub intrinsics: Intrinsics,
}

impl DepthImage {
    pub fn new(pixels: DepthPixels, depth_units: f32, intrinsics: Intrinsics) -> Self {
        Self {
            pixels,
            depth_units,
            intrinsics,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.width() as usize * self.pixels.height() as usize
    }

    pub fn raw(&self, x: u32, y: u32) -> u16 {
        self.pixels.get_pixel(x, y).0[0]
    }

    /// The distance in meters at `(x, y)`, or 0.0 outside the image or
    /// where there is no data.
    pub fn distance(&self, x: u32, y: u32) -> f32 {
        if x >= self.width() || y >= self.height() {
            return 0.0;
        }
        self.raw(x, y) as f32 * self.depth_units
    }

    /// The raw sample closest to `meters`, saturating at the representable range.
    pub fn to_units(&self, meters: f32) -> u16 {
        (meters / self.depth_units).round().clamp(0.0, u16::MAX as f32) as u16
    }

    pub fn valid_count(&self) -> usize {
        self.pixels.as_raw().iter().filter(|d| **d != 0).count()
    }
}

#[derive(Clone, Debug)]
pub struct ColorImage {
    pub pixels: RgbImage,
    pub intrinsics: Intrinsics,
}

impl ColorImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// The pixel nearest to `pixel`, if it lies inside the image.
    pub fn sample(&self, pixel: &Point2<f32>) -> Option<Rgb<u8>> {
        let (u, v) = nearest_pixel(pixel, self.width(), self.height())?;
        Some(*self.pixels.get_pixel(u, v))
    }
}

/// A color and depth capture taken at the same instant.
///
/// Either frame may be missing if the camera dropped it.
#[derive(Clone, Debug)]
pub struct FrameSet {
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
    pub color: Option<ColorImage>,
    pub depth: Option<DepthImage>,
    /// Moves points from the depth camera frame into the color camera frame.
    pub depth_to_color: Isometry3<f32>,
}

impl FrameSet {
    /// Splits the set into both images, or reports which one is missing.
    pub fn into_pair(self) -> Result<(ColorImage, DepthImage), RealSenseError> {
        match (self.color, self.depth) {
            (Some(color), Some(depth)) => Ok((color, depth)),
            (None, _) => Err(RealSenseError::MissingModality(Modality::Color)),
            (_, None) => Err(RealSenseError::MissingModality(Modality::Depth)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use image::{ImageBuffer, Luma};
    use nalgebra::{Isometry3, Point2};

    use super::{DepthImage, FrameSet, Intrinsics};
    use crate::error::{Modality, RealSenseError};

    const EPSILON: f32 = 0.0001;

    #[test]
    fn deproject_then_project() {
        let intrinsics = Intrinsics {
            width: 640,
            height: 480,
            fx: 600.0,
            fy: 610.0,
            ppx: 321.5,
            ppy: 239.0,
        };
        let point = intrinsics.deproject(100.0, 400.0, 1.25);
        assert!((point.z - 1.25).abs() < EPSILON);
        let pixel = intrinsics.project(&point).unwrap();
        assert!((pixel - Point2::new(100.0, 400.0)).norm() < 0.001);
    }

    #[test]
    fn principal_point_lies_on_the_axis() {
        let intrinsics = Intrinsics::centered(1280, 720, 900.0);
        let point = intrinsics.deproject(640.0, 360.0, 2.0);
        assert!(point.x.abs() < EPSILON && point.y.abs() < EPSILON);
        assert!(intrinsics.project(&point.map(|c| -c)).is_none());
    }

    #[test]
    fn scaled_intrinsics() {
        let intrinsics = Intrinsics::centered(1280, 720, 900.0).scaled(2);
        assert_eq!((intrinsics.width, intrinsics.height), (640, 360));
        assert_eq!(intrinsics.fx, 450.0);
        assert_eq!(intrinsics.ppx, 320.0);
    }

    #[test]
    fn nearest_pixel_rounds_to_centers() {
        let intrinsics = Intrinsics::centered(16, 9, 12.0);
        assert_eq!(intrinsics.nearest_pixel(&Point2::new(-0.4, 0.2)), Some((0, 0)));
        assert_eq!(intrinsics.nearest_pixel(&Point2::new(3.6, 8.4)), Some((4, 8)));
        assert_eq!(intrinsics.nearest_pixel(&Point2::new(15.6, 4.0)), None);
        assert_eq!(intrinsics.nearest_pixel(&Point2::new(2.0, -0.6)), None);
        assert_eq!(intrinsics.nearest_pixel(&Point2::new(f32::NAN, 1.0)), None);
    }

    #[test]
    fn distance_in_meters() {
        let pixels = ImageBuffer::from_fn(4, 4, |x, _| Luma([x as u16 * 1000]));
        let depth = DepthImage::new(pixels, 0.001, Intrinsics::centered(4, 4, 2.0));
        assert!((depth.distance(2, 1) - 2.0).abs() < EPSILON);
        assert_eq!(depth.distance(9, 0), 0.0);
        assert_eq!(depth.to_units(0.3), 300);
        assert_eq!(depth.valid_count(), 12);
    }

    #[test]
    fn missing_modality_is_named() {
        let set = FrameSet {
            frame_number: 1,
            timestamp: Utc::now(),
            color: None,
            depth: None,
            depth_to_color: Isometry3::identity(),
        };
        assert_eq!(
            set.into_pair().unwrap_err(),
            RealSenseError::MissingModality(Modality::Color)
        );
    }
}
