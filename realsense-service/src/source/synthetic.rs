use std::time::{Duration, Instant};

use chrono::Utc;
use image::{ImageBuffer, Luma, Rgb, RgbImage};
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use unros_core::{runtime::RuntimeContext, setup_logging};

use crate::{
    config::StreamConfig,
    error::RealSenseError,
    frames::{ColorImage, DepthImage, FrameSet, Intrinsics},
    session::FrameSource,
};

/// Focal length as a fraction of the image width, close to a D435.
const FOCAL_FRACTION: f32 = 0.71;
const DEPTH_UNITS: f32 = 0.001;

/// A procedural scene: a wall leaning away from the camera with a box in
/// front of it, seen through a sensor that drops a few samples.
#[derive(Clone, Copy, Debug)]
pub struct SyntheticScene {
    /// Distance of the wall along the optical axis.
    pub wall_distance: f32,
    /// How quickly the wall recedes towards the bottom of the image.
    pub wall_tilt: f32,
    pub box_distance: f32,
    /// Half the angular size of the box, in normalized image coordinates.
    pub box_half_size: f32,
    /// Roughly one in this many depth samples is missing.
    pub dropout_period: u32,
}

impl Default for SyntheticScene {
    fn default() -> Self {
        Self {
            wall_distance: 1.7,
            wall_tilt: 0.5,
            box_distance: 0.9,
            box_half_size: 0.12,
            dropout_period: 37,
        }
    }
}

enum Surface {
    Wall(f32),
    Box(f32),
}

impl SyntheticScene {
    fn intersect(&self, ray_x: f32, ray_y: f32) -> Surface {
        if ray_x.abs() < self.box_half_size && ray_y.abs() < self.box_half_size {
            Surface::Box(self.box_distance)
        } else {
            Surface::Wall(self.wall_distance / (1.0 - self.wall_tilt * ray_y).max(0.1))
        }
    }

    fn is_dropout(&self, x: u32, y: u32, frame_number: u64) -> bool {
        let hash = x.wrapping_mul(73_856_093)
            ^ y.wrapping_mul(19_349_663)
            ^ (frame_number as u32).wrapping_mul(83_492_791);
        self.dropout_period > 0 && hash % self.dropout_period == 0
    }

    pub fn render_depth(&self, intrinsics: Intrinsics, frame_number: u64) -> DepthImage {
        let pixels = ImageBuffer::from_fn(intrinsics.width, intrinsics.height, |x, y| {
            if self.is_dropout(x, y, frame_number) {
                return Luma([0]);
            }
            let ray_x = (x as f32 - intrinsics.ppx) / intrinsics.fx;
            let ray_y = (y as f32 - intrinsics.ppy) / intrinsics.fy;
            let (Surface::Wall(z) | Surface::Box(z)) = self.intersect(ray_x, ray_y);
            Luma([(z / DEPTH_UNITS).round().min(u16::MAX as f32) as u16])
        });
        DepthImage::new(pixels, DEPTH_UNITS, intrinsics)
    }

    pub fn render_color(&self, intrinsics: Intrinsics) -> RgbImage {
        RgbImage::from_fn(intrinsics.width, intrinsics.height, |x, y| {
            let ray_x = (x as f32 - intrinsics.ppx) / intrinsics.fx;
            let ray_y = (y as f32 - intrinsics.ppy) / intrinsics.fy;
            match self.intersect(ray_x, ray_y) {
                Surface::Box(_) => Rgb([200, 40, 40]),
                Surface::Wall(z) => {
                    // 10cm checkerboard on the wall
                    let cell = (ray_x * z * 10.0).floor() as i32 + (ray_y * z * 10.0).floor() as i32;
                    if cell.rem_euclid(2) == 0 {
                        Rgb([180, 180, 170])
                    } else {
                        Rgb([90, 90, 100])
                    }
                }
            }
        })
    }
}

/// Renders `SyntheticScene` at the configured resolution and frame rate.
pub struct SyntheticSource {
    scene: SyntheticScene,
    streams: Option<StreamConfig>,
    frame_number: u64,
    next_frame: Instant,
}

impl SyntheticSource {
    pub fn new(scene: SyntheticScene) -> Self {
        Self {
            scene,
            streams: None,
            frame_number: 0,
            next_frame: Instant::now(),
        }
    }

    /// The depth camera sits 15mm to the left of the color camera.
    pub fn depth_to_color() -> Isometry3<f32> {
        Isometry3::from_parts(
            Translation3::from(Vector3::new(0.015, 0.0, 0.0)),
            UnitQuaternion::identity(),
        )
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(SyntheticScene::default())
    }
}

impl FrameSource for SyntheticSource {
    fn start(
        &mut self,
        config: &StreamConfig,
        context: &RuntimeContext,
    ) -> Result<(), RealSenseError> {
        setup_logging!(context);
        info!(
            "Rendering a synthetic scene at {}x{} @ {} fps",
            config.depth.width, config.depth.height, config.depth.fps
        );
        self.streams = Some(config.clone());
        self.next_frame = Instant::now();
        Ok(())
    }

    fn wait_for_frames(&mut self, timeout: Duration) -> Result<FrameSet, RealSenseError> {
        let Some(streams) = &self.streams else {
            return Err(RealSenseError::Sdk("the synthetic source was not started".into()));
        };

        let wait = self.next_frame.saturating_duration_since(Instant::now());
        if wait > timeout {
            spin_sleep::sleep(timeout);
            return Err(RealSenseError::Timeout(timeout));
        }
        spin_sleep::sleep(wait);
        let period = Duration::from_secs_f64(1.0 / f64::from(streams.depth.fps.max(1)));
        self.next_frame = Instant::now() + period;
        self.frame_number += 1;

        let profile = |width: u32, height: u32| {
            Intrinsics::centered(width, height, width as f32 * FOCAL_FRACTION)
        };
        let color_intrinsics = profile(streams.color.width, streams.color.height);
        let depth_intrinsics = profile(streams.depth.width, streams.depth.height);

        Ok(FrameSet {
            frame_number: self.frame_number,
            timestamp: Utc::now(),
            color: Some(ColorImage {
                pixels: self.scene.render_color(color_intrinsics),
                intrinsics: color_intrinsics,
            }),
            depth: Some(self.scene.render_depth(depth_intrinsics, self.frame_number)),
            depth_to_color: Self::depth_to_color(),
        })
    }

    fn stop(&mut self) {
        self.streams = None;
    }
}
