//! The camera session: a started frame source plus the warm-up counter.

use std::time::Duration;

use unros_core::{runtime::RuntimeContext, setup_logging};

use crate::{config::StreamConfig, error::RealSenseError, frames::FrameSet};

/// Anything that can produce color and depth frame sets.
///
/// Sources are driven from the thread that owns the node, so they need not be `Send`.
pub trait FrameSource {
    /// Configures and starts the streams. `context` belongs to the node
    /// that owns the source and names its logs.
    fn start(
        &mut self,
        config: &StreamConfig,
        context: &RuntimeContext,
    ) -> Result<(), RealSenseError>;

    /// Blocks until the next frame set arrives or `timeout` passes.
    fn wait_for_frames(&mut self, timeout: Duration) -> Result<FrameSet, RealSenseError>;

    /// Stops the streams. Calling this on a stopped source does nothing.
    fn stop(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn start(
        &mut self,
        config: &StreamConfig,
        context: &RuntimeContext,
    ) -> Result<(), RealSenseError> {
        (**self).start(config, context)
    }

    fn wait_for_frames(&mut self, timeout: Duration) -> Result<FrameSet, RealSenseError> {
        (**self).wait_for_frames(timeout)
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

/// Counters kept by a `CameraSession`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frame sets thrown away while warming up.
    pub discarded: u64,
    /// Frame sets handed out after warming up.
    pub delivered: u64,
    pub timeouts: u64,
}

pub struct CameraSession<S: FrameSource> {
    source: S,
    context: RuntimeContext,
    warmup_remaining: u32,
    stats: SessionStats,
    running: bool,
}

impl<S: FrameSource> CameraSession<S> {
    /// Starts `source` with the given streams.
    ///
    /// The first `warmup_frames` frame sets that arrive afterwards are
    /// dropped without being looked at.
    pub fn start(
        mut source: S,
        config: &StreamConfig,
        warmup_frames: u32,
        context: &RuntimeContext,
    ) -> Result<Self, RealSenseError> {
        setup_logging!(context);
        config.validate()?;
        source.start(config, context).map_err(|e| {
            if e.is_fatal() {
                e
            } else {
                RealSenseError::DeviceUnavailable(e.to_string())
            }
        })?;
        info!(
            "Started color at {}x{} @ {} fps and depth at {}x{} @ {} fps",
            config.color.width,
            config.color.height,
            config.color.fps,
            config.depth.width,
            config.depth.height,
            config.depth.fps,
        );
        Ok(Self {
            source,
            context: context.clone(),
            warmup_remaining: warmup_frames,
            stats: SessionStats::default(),
            running: true,
        })
    }

    pub fn is_warming_up(&self) -> bool {
        self.warmup_remaining > 0
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Waits for the next usable frame set, finishing the warm-up first.
    ///
    /// `timeout` applies to every single acquisition, warm-up included.
    pub fn wait_for_frames(&mut self, timeout: Duration) -> Result<FrameSet, RealSenseError> {
        while self.warmup_remaining > 0 {
            self.acquire(timeout)?;
            self.warmup_remaining -= 1;
            self.stats.discarded += 1;
            if self.warmup_remaining == 0 {
                let context = &self.context;
                setup_logging!(context);
                info!("Camera warmed up after {} frames", self.stats.discarded);
            }
        }
        let frames = self.acquire(timeout)?;
        self.stats.delivered += 1;
        Ok(frames)
    }

    fn acquire(&mut self, timeout: Duration) -> Result<FrameSet, RealSenseError> {
        self.source.wait_for_frames(timeout).map_err(|e| {
            if let RealSenseError::Timeout(_) = e {
                self.stats.timeouts += 1;
            }
            e
        })
    }

    pub fn stop(&mut self) {
        if self.running {
            self.source.stop();
            self.running = false;
            let context = &self.context;
            setup_logging!(context);
            info!("Camera stopped");
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: FrameSource> Drop for CameraSession<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
