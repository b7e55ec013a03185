use std::time::Duration;

use thiserror::Error;

/// One of the two image streams that make up a frame set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Color,
    Depth,
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Color => write!(f, "color"),
            Self::Depth => write!(f, "depth"),
        }
    }
}

/// Everything that can go wrong between the camera and a service response.
///
/// Only `DeviceUnavailable` and `InvalidConfig` are fatal, and only at startup.
/// Everything else skips the current cycle or fails the current request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RealSenseError {
    #[error("no camera could be opened or configured: {0}")]
    DeviceUnavailable(String),
    #[error("no frame set arrived within {0:?}")]
    Timeout(Duration),
    #[error("the frame set has no {0} frame")]
    MissingModality(Modality),
    #[error("capture was requested without the capture flag set")]
    UnsolicitedRequest,
    #[error("nothing has been captured yet")]
    NotReady,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("camera error: {0}")]
    Sdk(String),
}

impl RealSenseError {
    /// Errors after which the node cannot keep running.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_) | Self::InvalidConfig(_))
    }
}
