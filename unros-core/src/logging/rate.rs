use std::time::Instant;

use log::info;

/// Logs how often `increment` is called, once per window.
pub struct RateLogger {
    start: Instant,
    epoch: usize,
    count: usize,
    pub window_size: f32,
    pub target: String,
}

impl Default for RateLogger {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            epoch: 0,
            count: 0,
            window_size: 1.0,
            target: "rate-logger".into(),
        }
    }
}

impl RateLogger {
    /// Creates a `RateLogger` that logs under `target` every `window_size` seconds.
    pub fn new(target: impl Into<String>, window_size: f32) -> Self {
        Self {
            window_size,
            target: target.into(),
            ..Default::default()
        }
    }

    /// Records one event, returning the rate of the last window
    /// if that window just closed.
    pub fn increment(&mut self) -> Option<f32> {
        let current_epoch = (self.start.elapsed().as_secs_f32() / self.window_size) as usize;
        let mut closed = None;
        if self.epoch != current_epoch {
            let rate = self.count as f32 / self.window_size;
            info!(target: &self.target, "{:.4} Hz", rate);
            closed = Some(rate);
            self.count = 0;
            self.epoch = current_epoch;
        }
        self.count += 1;
        closed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RateLogger;

    #[test]
    fn first_window_stays_open() {
        let mut logger = RateLogger::new("test", 60.0);
        for _ in 0..10 {
            assert_eq!(logger.increment(), None);
        }
    }

    #[test]
    fn closed_window_reports_rate() {
        let mut logger = RateLogger::new("test", 0.05);
        logger.increment();
        logger.increment();
        std::thread::sleep(Duration::from_millis(60));
        let rate = logger.increment().unwrap();
        assert!((rate - 40.0).abs() < 0.001);
    }
}
