use std::{
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock, PoisonError},
    time::Instant,
};

use anyhow::Context;
use fern::colors::{Color, ColoredLevelConfig};

use crate::RunOptions;

pub mod rate;

/// Sets up a locally available set of logging macros.
///
/// The `log` crate allows users to configure the `target`
/// parameter of a log, allowing developers to better filter
/// messages by file. Unros takes this one step further by
/// automatically setting this `target` parameter to be the name
/// of the current node (as passed by the context). This allows
/// two nodes of the same class to have different log targets
/// if their names differ, which should help you to identify
/// issues faster.
#[macro_export]
macro_rules! setup_logging {
    ($context: ident) => {
        setup_logging!($context $)
    };
    ($context: ident $dol:tt) => {
        let _context = &$context;
        #[allow(unused_macros)]
        macro_rules! info {
            ($dol($dol arg:tt)+) => {
                $crate::log::info!(target: $context.get_name(), $dol ($dol arg)+)
            };
        }
        #[allow(unused_macros)]
        macro_rules! warn {
            ($dol ($dol arg:tt)+) => {
                $crate::log::warn!(target: $context.get_name(), $dol ($dol arg)+)
            };
        }
        #[allow(unused_macros)]
        macro_rules! error {
            ($dol ($dol arg:tt)+) => {
                $crate::log::error!(target: $context.get_name(), $dol ($dol arg)+)
            };
        }
        #[allow(unused_macros)]
        macro_rules! debug {
            ($dol ($dol arg:tt)+) => {
                $crate::log::debug!(target: $context.get_name(), $dol ($dol arg)+)
            };
        }
    };
}

const LOGS_DIR: &str = "logs";

static SUB_LOGGING_DIR: OnceLock<Option<PathBuf>> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());
pub(crate) static START_TIME: OnceLock<Instant> = OnceLock::new();

/// The folder this runtime writes its logs into, if file logging is enabled
/// and the logger has been initialized.
pub fn get_sub_logging_dir() -> Option<&'static Path> {
    SUB_LOGGING_DIR.get()?.as_deref()
}

/// Seconds since the logger was initialized, formatted as `m:ss.ss`.
fn elapsed_stamp() -> String {
    let secs = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs_f32())
        .unwrap_or_default();
    format!("{:0>1}:{:.2}", (secs / 60.0).floor(), secs % 60.0)
}

/// Creates `logs/<date>=<time>[=<runtime_name>]`.
fn make_sub_logging_dir(run_options: &RunOptions) -> anyhow::Result<PathBuf> {
    let mut folder = chrono::Local::now()
        .format("%Y-%m-%d=%H-%M-%S")
        .to_string();
    if !run_options.runtime_name.is_empty() {
        folder.push('=');
        folder.push_str(&run_options.runtime_name);
    }
    let path = Path::new(LOGS_DIR).join(folder);
    std::fs::create_dir_all(&path)
        .with_context(|| format!("Failed to create {path:?}. Do we have permissions?"))?;
    Ok(path)
}

/// Initializes the default logging implementation.
///
/// Debug logs (and above) go to `logs/<date>=<time>=<runtime_name>/.log`,
/// while info logs (and above) are printed to stdout in color.
///
/// Calling this multiple times is safe and will not return errors.
pub fn init_logger(run_options: &RunOptions) -> anyhow::Result<()> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if SUB_LOGGING_DIR.get().is_some() {
        return Ok(());
    }

    let log_folder_name = if run_options.log_to_file {
        Some(make_sub_logging_dir(run_options)?)
    } else {
        None
    };

    let colors = ColoredLevelConfig::new()
        .warn(Color::Yellow)
        .error(Color::Red)
        .trace(Color::BrightBlack);

    let _ = START_TIME.set(Instant::now());

    let mut dispatch = fern::Dispatch::new()
        // Add blanket level filter -
        .level(log::LevelFilter::Debug)
        .chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Info)
                .format(move |out, message, record| {
                    out.finish(format_args!(
                        "\x1B[{}m[{} {}] {}\x1B[0m",
                        colors.get_color(&record.level()).to_fg_str(),
                        elapsed_stamp(),
                        record.target(),
                        message
                    ));
                })
                .chain(std::io::stdout()),
        );

    if let Some(log_folder_name) = &log_folder_name {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    out.finish(format_args!(
                        "[{} {} {}] {}",
                        elapsed_stamp(),
                        record.level(),
                        record.target(),
                        message
                    ));
                })
                .chain(
                    fern::log_file(log_folder_name.join(".log"))
                        .context("Failed to create log file. Do we have permissions?")?,
                ),
        );
    }

    dispatch
        .apply()
        .context("Logger should have initialized correctly")?;

    let _ = SUB_LOGGING_DIR.set(log_folder_name);
    Ok(())
}
