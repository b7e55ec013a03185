//! Where frame sets come from.
//!
//! `RealSenseSource` needs the RealSense SDK and is only built with the
//! `realsense` feature. `SyntheticSource` renders a fake scene so the node
//! can run on machines without a camera, and `ScriptedSource` replays
//! prepared frame sets for tests.

#[cfg(all(unix, feature = "realsense"))]
pub mod realsense;
pub mod scripted;
pub mod synthetic;

#[cfg(all(unix, feature = "realsense"))]
pub use realsense::RealSenseSource;
pub use scripted::ScriptedSource;
pub use synthetic::{SyntheticScene, SyntheticSource};
