use std::{
    collections::VecDeque,
    ops::RangeInclusive,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use chrono::Utc;
use image::{ImageBuffer, Luma, Rgb, RgbImage};
use nalgebra::Isometry3;
use unros_core::runtime::RuntimeContext;

use crate::{
    config::StreamConfig,
    error::RealSenseError,
    frames::{ColorImage, DepthImage, FrameSet, Intrinsics},
    session::FrameSource,
};

pub enum ScriptedFrame {
    Frames(FrameSet),
    Timeout,
}

/// A 16x9 frame set looking at a flat wall `depth_raw` millimeters away.
pub fn flat_frames(frame_number: u64, depth_raw: u16) -> FrameSet {
    let intrinsics = Intrinsics::centered(16, 9, 12.0);
    FrameSet {
        frame_number,
        timestamp: Utc::now(),
        color: Some(ColorImage {
            pixels: RgbImage::from_fn(16, 9, |x, y| Rgb([x as u8 * 16, y as u8 * 28, 100])),
            intrinsics,
        }),
        depth: Some(DepthImage::new(
            ImageBuffer::from_pixel(16, 9, Luma([depth_raw])),
            0.001,
            intrinsics,
        )),
        depth_to_color: Isometry3::identity(),
    }
}

/// Replays a prepared queue of frame sets and timeouts.
///
/// Clones share the same queue, so a test can keep one and feed the
/// other to a session. An empty queue behaves like a camera that stopped
/// sending frames.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    queue: Arc<Mutex<VecDeque<ScriptedFrame>>>,
    start_error: Option<RealSenseError>,
    stops: Arc<AtomicUsize>,
}

impl ScriptedSource {
    /// Frame sets numbered `1..=count`.
    pub fn numbered(count: u64) -> Self {
        let source = Self::default();
        source.push_numbered(1..=count);
        source
    }

    pub fn failing_start(err: RealSenseError) -> Self {
        Self {
            start_error: Some(err),
            ..Default::default()
        }
    }

    pub fn push(&self, frame: ScriptedFrame) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(frame);
    }

    pub fn push_frames(&self, frames: FrameSet) {
        self.push(ScriptedFrame::Frames(frames));
    }

    /// Flat frame sets one meter away, numbered by `range`.
    pub fn push_numbered(&self, range: RangeInclusive<u64>) {
        for n in range {
            self.push_frames(flat_frames(n, 1000));
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::Acquire)
    }
}

impl FrameSource for ScriptedSource {
    fn start(
        &mut self,
        _config: &StreamConfig,
        _context: &RuntimeContext,
    ) -> Result<(), RealSenseError> {
        match self.start_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn wait_for_frames(&mut self, timeout: Duration) -> Result<FrameSet, RealSenseError> {
        let next = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(ScriptedFrame::Frames(frames)) => Ok(frames),
            Some(ScriptedFrame::Timeout) | None => Err(RealSenseError::Timeout(timeout)),
        }
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::AcqRel);
    }
}
