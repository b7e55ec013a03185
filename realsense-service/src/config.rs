//! Configuration of the service node.
//!
//! Every value has a default, so an empty file (or no file at all) gives a
//! working 1280x720 @ 30 fps setup. Values are read from an optional TOML
//! file and then from environment variables prefixed with `REALSENSE`, using
//! `__` to step into nested tables (`REALSENSE__FILTERS__MAX_DISTANCE=1.5`).

use std::{path::Path, time::Duration};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::{error::RealSenseError, processing::hole_filling::HoleFillingMode};

/// The file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_NAME: &str = "realsense-service";

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    Rgb8,
    Bgr8,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DepthFormat {
    Z16,
}

/// How depth images are encoded when they leave the node.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DepthEncoding {
    /// Scaled to 8 bits over the threshold range, for visualization.
    Mono8,
    /// The raw 16 bit samples in depth units.
    Mono16,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct StreamProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for StreamProfile {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub color: StreamProfile,
    pub depth: StreamProfile,
    pub color_format: ColorFormat,
    pub depth_format: DepthFormat,
    /// Serial number of the camera to open. The first camera found is used if unset.
    pub serial: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            color: StreamProfile::default(),
            depth: StreamProfile::default(),
            color_format: ColorFormat::Rgb8,
            depth_format: DepthFormat::Z16,
            serial: None,
        }
    }
}

impl StreamConfig {
    /// Checks that both streams exist and that depth can be aligned to color.
    pub fn validate(&self) -> Result<(), RealSenseError> {
        for (name, profile) in [("color", &self.color), ("depth", &self.depth)] {
            if profile.width == 0 || profile.height == 0 || profile.fps == 0 {
                return Err(RealSenseError::InvalidConfig(format!(
                    "{name} stream needs a non-zero resolution and frame rate, got {}x{} @ {}",
                    profile.width, profile.height, profile.fps
                )));
            }
        }
        if self.color.fps != self.depth.fps {
            return Err(RealSenseError::InvalidConfig(format!(
                "color ({} fps) and depth ({} fps) must run at the same rate to be synchronized",
                self.color.fps, self.depth.fps
            )));
        }
        let color_aspect = u64::from(self.color.width) * u64::from(self.depth.height);
        let depth_aspect = u64::from(self.depth.width) * u64::from(self.color.height);
        if color_aspect != depth_aspect {
            return Err(RealSenseError::InvalidConfig(format!(
                "color ({}x{}) and depth ({}x{}) must share an aspect ratio to be aligned",
                self.color.width, self.color.height, self.depth.width, self.depth.height
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    /// Depth samples closer than this (in meters) are dropped.
    pub min_distance: f32,
    /// Depth samples further than this (in meters) are dropped.
    pub max_distance: f32,
    pub decimation_magnitude: u32,
    pub hole_filling: HoleFillingMode,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_distance: 0.3,
            max_distance: 2.0,
            decimation_magnitude: 2,
            hole_filling: HoleFillingMode::NearestFromAround,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), RealSenseError> {
        if !(self.min_distance >= 0.0 && self.min_distance < self.max_distance) {
            return Err(RealSenseError::InvalidConfig(format!(
                "threshold range [{}, {}] is empty or negative",
                self.min_distance, self.max_distance
            )));
        }
        if !(1..=8).contains(&self.decimation_magnitude) {
            return Err(RealSenseError::InvalidConfig(format!(
                "decimation magnitude must be within 1..=8, got {}",
                self.decimation_magnitude
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Every service and topic is advertised under this path.
    pub base_service: String,
    /// The frame id stamped on every outgoing message.
    pub frame_id: String,
    pub loop_rate_hz: f64,
    /// Acquisitions thrown away after the camera starts so that auto
    /// exposure and gain can settle.
    pub warmup_frames: u32,
    pub frame_timeout_ms: u64,
    pub depth_encoding: DepthEncoding,
    pub streams: StreamConfig,
    pub filters: FilterConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_service: "/sensors/realsense".into(),
            frame_id: "ptu_camera_color_optical_frame".into(),
            loop_rate_hz: 30.0,
            warmup_frames: 50,
            frame_timeout_ms: 5000,
            depth_encoding: DepthEncoding::Mono8,
            streams: StreamConfig::default(),
            filters: FilterConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Reads the config file at `path` (or the optional default file) and then
    /// the `REALSENSE` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let builder = match path {
            Some(path) => Config::builder().add_source(File::from(path)),
            None => {
                Config::builder().add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false))
            }
        };
        builder
            .add_source(
                Environment::with_prefix("REALSENSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parses a TOML document, without looking at the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, config::ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), RealSenseError> {
        let hz = self.loop_rate_hz;
        if !(hz.is_finite() && hz > 0.0) || Duration::try_from_secs_f64(1.0 / hz).is_err() {
            return Err(RealSenseError::InvalidConfig(format!(
                "loop rate must be positive and finite with a representable period, got {hz}"
            )));
        }
        if !self.base_service.starts_with('/') {
            return Err(RealSenseError::InvalidConfig(format!(
                "base service {:?} must be an absolute path",
                self.base_service
            )));
        }
        self.streams.validate()?;
        self.filters.validate()
    }
}
