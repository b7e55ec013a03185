//! This crate provides a node that serves captures from a RealSense camera
//! over the unros bus: the color image, the aligned and filtered depth image,
//! and a colored point cloud.
//!
//! Talking to a physical camera needs the RealSense SDK, which is only linked
//! with the `realsense` feature. Without it the node can still run against
//! the synthetic frame source.

pub mod config;
pub mod error;
pub mod frames;
pub mod messages;
pub mod pipeline;
pub mod processing;
pub mod server;
pub mod session;
pub mod source;

pub use config::ServiceConfig;
pub use error::{Modality, RealSenseError};
pub use pipeline::{Capture, FramePipeline};
pub use server::{CaptureRequest, CaptureResponse, RealSenseServer};
pub use session::{CameraSession, FrameSource};
