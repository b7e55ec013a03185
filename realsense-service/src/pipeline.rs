use chrono::{DateTime, Utc};
use unros_core::{runtime::RuntimeContext, setup_logging};

use crate::{
    config::FilterConfig,
    frames::{ColorImage, DepthImage, FrameSet},
    processing::{Align, Colorizer, DepthFilter, FilterChain, PointCloud, PointCloudBlock},
};

/// Everything produced by one successful cycle.
#[derive(Clone, Debug)]
pub struct Capture {
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
    pub color: ColorImage,
    /// Aligned to the color stream and filtered.
    pub depth: DepthImage,
    pub cloud: PointCloud,
    /// Distance in meters at the center of the filtered depth image. 0.0 if
    /// there is no data there.
    pub center_distance: f32,
}

/// Turns frame sets into captures.
pub struct FramePipeline {
    filters: FilterChain,
    pointcloud: PointCloudBlock,
    colorizer: Colorizer,
}

impl FramePipeline {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            filters: FilterChain::from_config(config),
            pointcloud: PointCloudBlock,
            colorizer: Colorizer::new(config.min_distance, config.max_distance),
        }
    }

    pub fn colorizer(&self) -> &Colorizer {
        &self.colorizer
    }

    /// Runs one cycle over `frames`.
    ///
    /// Frame sets missing either image are skipped and produce `None`.
    pub fn process(&self, frames: FrameSet, context: &RuntimeContext) -> Option<Capture> {
        setup_logging!(context);
        let frame_number = frames.frame_number;
        let timestamp = frames.timestamp;
        let depth_to_color = frames.depth_to_color;

        let (color, depth) = match frames.into_pair() {
            Ok(pair) => pair,
            Err(e) => {
                debug!("Skipping frame set {frame_number}: {e}");
                return None;
            }
        };

        let aligned = Align::new(color.intrinsics, depth_to_color).process(depth);
        let depth = self.filters.process(aligned);

        let center_distance = depth.distance(depth.width() / 2, depth.height() / 2);
        info!("The camera is facing an object {center_distance} meters away");

        let cloud = self.pointcloud.calculate(&depth, &color);

        Some(Capture {
            frame_number,
            timestamp,
            color,
            depth,
            cloud,
            center_distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, Once, PoisonError};

    use unros_core::{
        log::{self, LevelFilter, Log, Metadata, Record},
        runtime::{MainRuntimeContext, RuntimeContext},
    };

    use super::FramePipeline;
    use crate::{
        config::{FilterConfig, StreamConfig, StreamProfile},
        processing::HoleFillingMode,
        session::FrameSource,
        source::{scripted::flat_frames, SyntheticSource},
    };

    /// Keeps every record logged in this test binary as `(target, message)`.
    struct CapturedLogs(Mutex<Vec<(String, String)>>);

    impl Log for CapturedLogs {
        fn enabled(&self, _: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((record.target().to_owned(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    static LOGS: CapturedLogs = CapturedLogs(Mutex::new(Vec::new()));

    fn capture_logs() -> &'static CapturedLogs {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = log::set_logger(&LOGS);
            log::set_max_level(LevelFilter::Debug);
        });
        &LOGS
    }

    fn context() -> RuntimeContext {
        MainRuntimeContext::without_signals().make_context("realsense")
    }

    fn synthetic_frames(width: u32, height: u32) -> crate::frames::FrameSet {
        let profile = StreamProfile { width, height, fps: 30 };
        let mut source = SyntheticSource::default();
        source
            .start(
                &StreamConfig {
                    color: profile,
                    depth: profile,
                    ..Default::default()
                },
                &context(),
            )
            .unwrap();
        source
            .wait_for_frames(std::time::Duration::from_secs(1))
            .unwrap()
    }

    #[test]
    fn cloud_respects_threshold_and_size() {
        let config = FilterConfig::default();
        let pipeline = FramePipeline::new(&config);
        let capture = pipeline.process(synthetic_frames(128, 72), &context()).unwrap();

        assert_eq!((capture.depth.width(), capture.depth.height()), (64, 36));
        assert!(!capture.cloud.is_empty());
        assert!(capture.cloud.len() <= capture.depth.pixel_count());
        for point in capture.cloud.iter() {
            let z = point.position.z;
            assert!(z >= config.min_distance && z <= config.max_distance, "{z}");
        }
    }

    #[test]
    fn center_point_matches_center_distance() {
        let pipeline = FramePipeline::new(&FilterConfig::default());
        let capture = pipeline.process(synthetic_frames(128, 72), &context()).unwrap();

        // The box is 0.9m away, give or take the baseline shift
        assert!((capture.center_distance - 0.9).abs() < 0.01);
        let center = [capture.depth.width() / 2, capture.depth.height() / 2];
        let point = capture
            .cloud
            .iter()
            .find(|point| point.source == center)
            .unwrap();
        assert!((point.position.z - capture.center_distance).abs() < 0.0005);
    }

    #[test]
    fn full_resolution_capture() {
        let config = FilterConfig {
            hole_filling: HoleFillingMode::NearestFromAround,
            ..Default::default()
        };
        let pipeline = FramePipeline::new(&config);
        let capture = pipeline.process(synthetic_frames(1280, 720), &context()).unwrap();

        assert_eq!(capture.depth.intrinsics.width, 640);
        assert!(capture.cloud.len() <= 640 * 360);
        assert!(capture
            .cloud
            .iter()
            .all(|p| (0.3..=2.0).contains(&p.position.z)));
        let center = capture
            .cloud
            .iter()
            .find(|p| p.source == [320, 180])
            .unwrap();
        assert!((center.position.z - capture.center_distance).abs() < 0.0005);
    }

    #[test]
    fn missing_modality_is_skipped() {
        let pipeline = FramePipeline::new(&FilterConfig::default());

        let mut frames = flat_frames(1, 1000);
        frames.color = None;
        assert!(pipeline.process(frames, &context()).is_none());

        let mut frames = flat_frames(2, 1000);
        frames.depth = None;
        assert!(pipeline.process(frames, &context()).is_none());

        assert!(pipeline.process(flat_frames(3, 1000), &context()).is_some());
    }

    #[test]
    fn out_of_range_wall_gives_empty_cloud() {
        let pipeline = FramePipeline::new(&FilterConfig::default());
        let capture = pipeline.process(flat_frames(1, 2500), &context()).unwrap();
        assert!(capture.cloud.is_empty());
        assert_eq!(capture.center_distance, 0.0);
    }

    #[test]
    fn logs_under_the_node_name() {
        let logs = capture_logs();
        let pipeline = FramePipeline::new(&FilterConfig::default());
        let context = MainRuntimeContext::without_signals().make_context("arm-camera");
        assert!(pipeline.process(flat_frames(1, 1000), &context).is_some());

        let logs = logs.0.lock().unwrap_or_else(PoisonError::into_inner);
        assert!(logs.iter().any(|(target, message)| {
            target == "arm-camera" && message.starts_with("The camera is facing an object")
        }));
    }
}
