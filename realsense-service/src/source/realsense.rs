//! Frames from a physical camera through the RealSense SDK.

use std::{collections::HashSet, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use image::{ImageBuffer, Luma, Rgb, RgbImage};
use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion};
use realsense_rust::{
    config::Config,
    context::Context,
    frame::{ColorFrame, DepthFrame, FrameEx, PixelKind},
    kind::{Rs2CameraInfo, Rs2Format, Rs2StreamKind, Rs2TimestampDomain},
    pipeline::{ActivePipeline, FrameWaitError, InactivePipeline},
    stream_profile::StreamProfile,
};
use unros_core::{runtime::RuntimeContext, setup_logging};

use crate::{
    config::{ColorFormat, DepthFormat, StreamConfig},
    error::RealSenseError,
    frames::{ColorImage, DepthImage, FrameSet, Intrinsics},
    session::FrameSource,
};

fn sdk_err(e: impl std::fmt::Display) -> RealSenseError {
    RealSenseError::Sdk(e.to_string())
}

/// Converts an SDK timestamp in milliseconds to wall clock time.
///
/// Hardware clock timestamps count from the camera's boot, not the epoch,
/// so they give `None`.
fn sdk_time(domain: Rs2TimestampDomain, millis: f64) -> Option<DateTime<Utc>> {
    match domain {
        Rs2TimestampDomain::SystemTime | Rs2TimestampDomain::GlobalTime
            if millis.is_finite() && millis >= 0.0 =>
        {
            Some(Utc.timestamp_nanos((millis * 1e6) as i64))
        }
        _ => None,
    }
}

fn intrinsics_of(profile: &StreamProfile) -> Result<Intrinsics, RealSenseError> {
    let intrinsics = profile.intrinsics().map_err(sdk_err)?;
    Ok(Intrinsics {
        width: intrinsics.width() as u32,
        height: intrinsics.height() as u32,
        fx: intrinsics.fx(),
        fy: intrinsics.fy(),
        ppx: intrinsics.ppx(),
        ppy: intrinsics.ppy(),
    })
}

fn extrinsics_between(
    from: &StreamProfile,
    to: &StreamProfile,
) -> Result<Isometry3<f32>, RealSenseError> {
    let extrinsics = from.extrinsics(to).map_err(sdk_err)?;
    // The SDK stores rotations column major
    let rotation = Rotation3::from_matrix(&Matrix3::from_column_slice(&extrinsics.rotation()));
    let [x, y, z] = extrinsics.translation();
    Ok(Isometry3::from_parts(
        Translation3::new(x, y, z),
        UnitQuaternion::from_rotation_matrix(&rotation),
    ))
}

fn copy_depth(frame: &DepthFrame) -> Result<DepthImage, RealSenseError> {
    let samples = frame
        .iter()
        .map(|px| match px {
            PixelKind::Z16 { depth } => *depth,
            _ => 0,
        })
        .collect();
    let pixels = ImageBuffer::<Luma<u16>, Vec<_>>::from_raw(
        frame.width() as u32,
        frame.height() as u32,
        samples,
    )
    .ok_or_else(|| sdk_err("depth frame is smaller than its reported size"))?;
    Ok(DepthImage::new(
        pixels,
        frame.depth_units().map_err(sdk_err)?,
        intrinsics_of(frame.stream_profile())?,
    ))
}

fn copy_color(frame: &ColorFrame) -> Result<ColorImage, RealSenseError> {
    let samples = frame
        .iter()
        .flat_map(|px| match px {
            PixelKind::Rgb8 { r, g, b } | PixelKind::Bgr8 { r, g, b } => [*r, *g, *b],
            _ => [0, 0, 0],
        })
        .collect();
    let pixels: RgbImage =
        ImageBuffer::<Rgb<u8>, _>::from_raw(frame.width() as u32, frame.height() as u32, samples)
            .ok_or_else(|| sdk_err("color frame is smaller than its reported size"))?;
    Ok(ColorImage {
        pixels,
        intrinsics: intrinsics_of(frame.stream_profile())?,
    })
}

/// A RealSense camera picked by serial number, or the first one found.
pub struct RealSenseSource {
    context: Context,
    pipeline: Option<ActivePipeline>,
}

impl RealSenseSource {
    pub fn new() -> Result<Self, RealSenseError> {
        let context = Context::new()
            .map_err(|e| RealSenseError::DeviceUnavailable(e.to_string()))?;
        Ok(Self {
            context,
            pipeline: None,
        })
    }
}

impl FrameSource for RealSenseSource {
    fn start(
        &mut self,
        config: &StreamConfig,
        context: &RuntimeContext,
    ) -> Result<(), RealSenseError> {
        setup_logging!(context);
        let devices = self.context.query_devices(HashSet::new());
        let device = match &config.serial {
            Some(serial) => devices.into_iter().find(|device| {
                device
                    .info(Rs2CameraInfo::SerialNumber)
                    .is_some_and(|s| s.to_string_lossy() == serial.as_str())
            }),
            None => devices.into_iter().next(),
        }
        .ok_or_else(|| {
            RealSenseError::DeviceUnavailable(match &config.serial {
                Some(serial) => format!("no camera with serial {serial}"),
                None => "no camera found".into(),
            })
        })?;

        let serial = device
            .info(Rs2CameraInfo::SerialNumber)
            .map(|s| s.to_owned())
            .ok_or_else(|| RealSenseError::DeviceUnavailable("camera has no serial".into()))?;

        let usb = device
            .info(Rs2CameraInfo::UsbTypeDescriptor)
            .and_then(|s| s.to_str().ok()?.parse::<f32>().ok());
        if !usb.is_some_and(|usb| usb >= 3.0) {
            warn!("This Realsense camera is not attached to a USB 3.0 port");
        }

        let color_format = match config.color_format {
            ColorFormat::Rgb8 => Rs2Format::Rgb8,
            ColorFormat::Bgr8 => Rs2Format::Bgr8,
        };
        let depth_format = match config.depth_format {
            DepthFormat::Z16 => Rs2Format::Z16,
        };
        let mut rs_config = Config::new();
        rs_config
            .enable_device_from_serial(&serial)
            .map_err(sdk_err)?
            .disable_all_streams()
            .map_err(sdk_err)?
            .enable_stream(
                Rs2StreamKind::Depth,
                None,
                config.depth.width as usize,
                config.depth.height as usize,
                depth_format,
                config.depth.fps as usize,
            )
            .map_err(sdk_err)?
            .enable_stream(
                Rs2StreamKind::Color,
                None,
                config.color.width as usize,
                config.color.height as usize,
                color_format,
                config.color.fps as usize,
            )
            .map_err(sdk_err)?;

        let pipeline = InactivePipeline::try_from(&self.context)
            .map_err(|e| RealSenseError::DeviceUnavailable(e.to_string()))?;
        let pipeline = pipeline
            .start(Some(rs_config))
            .map_err(|e| RealSenseError::DeviceUnavailable(e.to_string()))?;
        info!("Streaming from camera {}", serial.to_string_lossy());
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn wait_for_frames(&mut self, timeout: Duration) -> Result<FrameSet, RealSenseError> {
        let pipeline = self
            .pipeline
            .as_mut()
            .ok_or_else(|| sdk_err("the camera was not started"))?;
        let frames = match pipeline.wait(Some(timeout)) {
            Ok(frames) => frames,
            Err(FrameWaitError::DidTimeoutBeforeFrameArrival) => {
                return Err(RealSenseError::Timeout(timeout))
            }
            Err(e) => return Err(sdk_err(e)),
        };

        let depth_frame = frames.frames_of_type::<DepthFrame>().pop();
        let color_frame = frames.frames_of_type::<ColorFrame>().pop();

        let depth_to_color = match (&depth_frame, &color_frame) {
            (Some(depth), Some(color)) => {
                extrinsics_between(depth.stream_profile(), color.stream_profile())?
            }
            _ => Isometry3::identity(),
        };
        let frame_number = depth_frame
            .as_ref()
            .map(|f| f.frame_number())
            .or_else(|| color_frame.as_ref().map(|f| f.frame_number()))
            .unwrap_or_default() as u64;
        let timestamp = depth_frame
            .as_ref()
            .and_then(|f| sdk_time(f.timestamp_domain(), f.timestamp()))
            .or_else(|| {
                color_frame
                    .as_ref()
                    .and_then(|f| sdk_time(f.timestamp_domain(), f.timestamp()))
            })
            .unwrap_or_else(Utc::now);

        Ok(FrameSet {
            frame_number,
            timestamp,
            color: color_frame.as_ref().map(copy_color).transpose()?,
            depth: depth_frame.as_ref().map(copy_depth).transpose()?,
            depth_to_color,
        })
    }

    fn stop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use realsense_rust::kind::Rs2TimestampDomain;

    use super::sdk_time;

    #[test]
    fn frame_time_uses_the_sdk_clock() {
        let stamp = sdk_time(Rs2TimestampDomain::SystemTime, 1_700_000_000_123.5).unwrap();
        let expected = Utc.timestamp_nanos(1_700_000_000_123_500_000);
        assert!((stamp - expected).num_microseconds().unwrap().abs() <= 1);
        assert!(sdk_time(Rs2TimestampDomain::GlobalTime, 1_700_000_000_000.0).is_some());
    }

    #[test]
    fn hardware_clock_is_not_wall_time() {
        assert!(sdk_time(Rs2TimestampDomain::HardwareClock, 81_234.0).is_none());
        assert!(sdk_time(Rs2TimestampDomain::SystemTime, f64::NAN).is_none());
    }
}
