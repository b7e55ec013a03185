//! Unros is an experimental alternative to the ROS 1 & 2 frameworks.
//!
//! This crate contains the core functionality that device nodes are
//! built on top of:
//!
//! 1. A complete logging system
//! 2. Publishers and Subscribers (analagous to ROS topics)
//! 3. Services (analagous to ROS services)
//! 4. A `Bus` that names topics and services by path
//! 5. A runtime context and the `SyncNode` trait for nodes that own a thread

use serde::Deserialize;

pub mod bus;
pub mod logging;
pub mod node;
pub mod pubsub;
pub mod runtime;
pub mod service;

pub use anyhow;
pub use chrono;
pub use log;
pub use tokio;

/// Configurations for the runtime
#[derive(Deserialize, Clone, Debug)]
pub struct RunOptions {
    /// The name of this runtime.
    ///
    /// This changes what the sub-logging directory name is.
    #[serde(default)]
    pub runtime_name: String,

    /// Whether or not logs should also be written to a file
    /// inside of the `logs` directory.
    #[serde(default = "default_log_to_file")]
    pub log_to_file: bool,
}

fn default_log_to_file() -> bool {
    true
}

/// Creates a default `RunOptions`.
///
/// This macro was created instead of implementing `Default`
/// so that the crate calling this macro can have its name
/// used as the `runtime_name`.
#[macro_export]
macro_rules! default_run_options {
    () => {
        $crate::RunOptions {
            runtime_name: env!("CARGO_PKG_NAME").into(),
            log_to_file: true,
        }
    };
}
