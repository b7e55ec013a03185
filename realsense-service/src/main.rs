use std::path::PathBuf;

use clap::Parser;
use realsense_service::{
    source::SyntheticSource, FrameSource, RealSenseError, RealSenseServer, ServiceConfig,
};
use unros_core::{
    anyhow::{self, Context},
    default_run_options,
    logging::get_sub_logging_dir,
    node::SyncNode,
    runtime::MainRuntimeContext,
    setup_logging,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file. Defaults to `realsense-service.toml` in the
    /// working directory, if there is one.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Serve a rendered scene instead of a real camera.
    #[arg(long)]
    synthetic: bool,
    /// Serial number of the camera to open.
    #[arg(long)]
    serial: Option<String>,
}

#[cfg(all(unix, feature = "realsense"))]
fn camera_source() -> Result<Box<dyn FrameSource>, RealSenseError> {
    Ok(Box::new(realsense_service::source::RealSenseSource::new()?))
}

#[cfg(not(all(unix, feature = "realsense")))]
fn camera_source() -> Result<Box<dyn FrameSource>, RealSenseError> {
    Err(RealSenseError::DeviceUnavailable(
        "built without the `realsense` feature, pass --synthetic to run without a camera".into(),
    ))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let context = MainRuntimeContext::new(&default_run_options!())?;
    let node_context = context.make_context("realsense");
    setup_logging!(node_context);
    if let Some(dir) = get_sub_logging_dir() {
        info!("Writing logs to {}", dir.display());
    }

    let mut config =
        ServiceConfig::load(cli.config.as_deref()).context("Failed to read the config")?;
    if let Some(serial) = cli.serial {
        config.streams.serial = Some(serial);
    }

    let source: Box<dyn FrameSource> = if cli.synthetic {
        info!("Using the synthetic frame source");
        Box::new(SyntheticSource::default())
    } else {
        camera_source()?
    };

    let server = RealSenseServer::new(source, config, &node_context)?;
    server.run_to_end(node_context);
    Ok(())
}
