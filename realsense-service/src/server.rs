//! The node that owns the camera and answers requests on the bus.

use unros_core::{
    anyhow::{self, Context},
    bus::{join_path, Bus},
    logging::rate::RateLogger,
    node::SyncNode,
    pubsub::Publisher,
    runtime::{Rate, RuntimeContext},
    service::Service,
    setup_logging,
};

use crate::{
    config::{DepthEncoding, ServiceConfig},
    error::RealSenseError,
    messages::{CameraIntrinsics, Float32MultiArray, Header, ImageMsg, PointCloud2},
    pipeline::{Capture, FramePipeline},
    session::{CameraSession, FrameSource, SessionStats},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Must be set for the capture to happen.
    pub capture: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureResponse {
    pub success: bool,
}

pub type FetchResult<T> = Result<T, RealSenseError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Capturing,
}

/// Services and topic names relative to the base service path.
pub mod paths {
    pub const CAPTURE: &str = "capture";
    pub const DEPTH: &str = "depth";
    pub const RGB: &str = "rgb";
    pub const UV: &str = "pointcloud/static/uv";
    pub const POINTCLOUD: &str = "pointcloud/static";
    pub const INTRINSICS: &str = "intrinsics";

    pub const POINTCLOUD_TOPIC: &str = "pointcloudGeometry/static";
    pub const RGB_TOPIC: &str = "rgb/static";
    pub const DEPTH_TOPIC: &str = "depth/static";
    pub const COLORS_TOPIC: &str = "pointcloudGeometry/static/rgb";
}

struct Endpoints {
    capture: Service<CaptureRequest, CaptureResponse>,
    depth: Service<(), FetchResult<ImageMsg>>,
    rgb: Service<(), FetchResult<ImageMsg>>,
    uv: Service<(), FetchResult<Float32MultiArray>>,
    pointcloud: Service<(), FetchResult<PointCloud2>>,
    intrinsics: Service<(), FetchResult<CameraIntrinsics>>,
}

impl Endpoints {
    fn advertise(bus: &Bus, base: &str) -> anyhow::Result<Self> {
        Ok(Self {
            capture: bus.advertise_service(&join_path(base, paths::CAPTURE))?,
            depth: bus.advertise_service(&join_path(base, paths::DEPTH))?,
            rgb: bus.advertise_service(&join_path(base, paths::RGB))?,
            uv: bus.advertise_service(&join_path(base, paths::UV))?,
            pointcloud: bus.advertise_service(&join_path(base, paths::POINTCLOUD))?,
            intrinsics: bus.advertise_service(&join_path(base, paths::INTRINSICS))?,
        })
    }
}

/// Latched, so late subscribers still get the last capture.
struct Topics {
    pointcloud: Publisher<PointCloud2>,
    rgb: Publisher<ImageMsg>,
    depth: Publisher<ImageMsg>,
    colors: Publisher<Float32MultiArray>,
}

impl Topics {
    fn advertise(bus: &Bus, base: &str) -> anyhow::Result<Self> {
        Ok(Self {
            pointcloud: bus.advertise(&join_path(base, paths::POINTCLOUD_TOPIC), true)?,
            rgb: bus.advertise(&join_path(base, paths::RGB_TOPIC), true)?,
            depth: bus.advertise(&join_path(base, paths::DEPTH_TOPIC), true)?,
            colors: bus.advertise(&join_path(base, paths::COLORS_TOPIC), true)?,
        })
    }
}

/// Serves captures from one camera.
///
/// Everything happens on the thread running the node: each tick of the loop
/// drains the pending requests one at a time, and a capture request runs the
/// whole acquisition and pipeline before the next request is looked at.
pub struct RealSenseServer<S: FrameSource> {
    config: ServiceConfig,
    session: CameraSession<S>,
    pipeline: FramePipeline,
    endpoints: Endpoints,
    topics: Topics,
    latest: Option<Capture>,
    state: ServerState,
    seq: u32,
}

impl<S: FrameSource> RealSenseServer<S> {
    /// Starts the camera and advertises every service and topic under
    /// `config.base_service` on the bus of `context`, which must be the
    /// context the node will run with.
    pub fn new(
        source: S,
        config: ServiceConfig,
        context: &RuntimeContext,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let session =
            CameraSession::start(source, &config.streams, config.warmup_frames, context)
                .context("Failed to start the camera")?;
        let bus = context.get_bus();
        let endpoints = Endpoints::advertise(bus, &config.base_service)?;
        let topics = Topics::advertise(bus, &config.base_service)?;
        Ok(Self {
            pipeline: FramePipeline::new(&config.filters),
            config,
            session,
            endpoints,
            topics,
            latest: None,
            state: ServerState::Idle,
            seq: 0,
        })
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn latest(&self) -> Option<&Capture> {
        self.latest.as_ref()
    }

    pub fn session_stats(&self) -> SessionStats {
        self.session.stats()
    }

    /// Acquires one frame set and runs it through the pipeline.
    ///
    /// Returns false only if no frame set could be acquired. A frame set
    /// missing an image still counts as a finished cycle, it just leaves
    /// the last capture in place.
    pub fn capture_once(&mut self, context: &RuntimeContext) -> bool {
        setup_logging!(context);
        self.state = ServerState::Capturing;
        let frames = self.session.wait_for_frames(self.config.frame_timeout());
        let success = match frames {
            Ok(frames) => {
                if let Some(capture) = self.pipeline.process(frames, context) {
                    info!(
                        "Captured frame {} with {} points",
                        capture.frame_number,
                        capture.cloud.len()
                    );
                    self.latest = Some(capture);
                    self.publish();
                    debug!(
                        "Published the capture to {} point cloud subscribers",
                        self.topics.pointcloud.get_subscriber_count()
                    );
                }
                true
            }
            Err(e) => {
                warn!("Capture failed: {e}");
                false
            }
        };
        self.state = ServerState::Idle;
        success
    }

    pub fn handle_capture(
        &mut self,
        request: CaptureRequest,
        context: &RuntimeContext,
    ) -> CaptureResponse {
        setup_logging!(context);
        if !request.capture {
            warn!("Rejected capture request: {}", RealSenseError::UnsolicitedRequest);
            return CaptureResponse { success: false };
        }
        CaptureResponse {
            success: self.capture_once(context),
        }
    }

    fn next_header(&mut self) -> FetchResult<Header> {
        let stamp = self.latest.as_ref().ok_or(RealSenseError::NotReady)?.timestamp;
        self.seq = self.seq.wrapping_add(1);
        Ok(Header {
            seq: self.seq,
            stamp,
            frame_id: self.config.frame_id.clone(),
        })
    }

    fn with_capture<T>(&mut self, f: impl FnOnce(&Self, Header, &Capture) -> T) -> FetchResult<T> {
        let header = self.next_header()?;
        let capture = self.latest.as_ref().ok_or(RealSenseError::NotReady)?;
        Ok(f(self, header, capture))
    }

    pub fn depth_image(&mut self) -> FetchResult<ImageMsg> {
        self.with_capture(|server, header, capture| match server.config.depth_encoding {
            DepthEncoding::Mono8 => {
                ImageMsg::mono8(header, &server.pipeline.colorizer().colorize(&capture.depth))
            }
            DepthEncoding::Mono16 => ImageMsg::mono16(header, &capture.depth),
        })
    }

    pub fn rgb_image(&mut self) -> FetchResult<ImageMsg> {
        self.with_capture(|_, header, capture| ImageMsg::rgb8(header, &capture.color.pixels))
    }

    pub fn uv_mapping(&mut self) -> FetchResult<Float32MultiArray> {
        self.with_capture(|_, _, capture| Float32MultiArray::uv_mapping(&capture.cloud))
    }

    pub fn point_cloud(&mut self) -> FetchResult<PointCloud2> {
        self.with_capture(|_, header, capture| PointCloud2::xyz(header, &capture.cloud))
    }

    pub fn intrinsics(&mut self) -> FetchResult<CameraIntrinsics> {
        self.with_capture(|_, header, capture| {
            CameraIntrinsics::new(header, &capture.color.intrinsics)
        })
    }

    fn publish(&mut self) {
        let (Ok(cloud), Ok(rgb), Ok(depth), Ok(colors)) = (
            self.point_cloud(),
            self.rgb_image(),
            self.depth_image(),
            self.with_capture(|_, _, capture| Float32MultiArray::colors(&capture.cloud)),
        ) else {
            return;
        };
        self.topics.pointcloud.set(cloud);
        self.topics.rgb.set(rgb);
        self.topics.depth.set(depth);
        self.topics.colors.set(colors);
    }

    fn drain<T>(
        &mut self,
        context: &RuntimeContext,
        endpoint: fn(&mut Endpoints) -> &mut Service<(), FetchResult<T>>,
        fetch: fn(&mut Self) -> FetchResult<T>,
    ) -> usize {
        setup_logging!(context);
        let mut handled = 0;
        while let Some(request) = endpoint(&mut self.endpoints).try_next_request() {
            let response = fetch(self);
            if let Err(e) = &response {
                warn!(
                    "{} request failed: {e}",
                    endpoint(&mut self.endpoints).get_path()
                );
            }
            request.respond(response);
            handled += 1;
        }
        handled
    }

    /// Answers every request that is waiting, returning how many there were.
    pub fn handle_pending_requests(&mut self, context: &RuntimeContext) -> usize {
        let mut handled = 0;
        while let Some(request) = self.endpoints.capture.try_next_request() {
            let (input, responder) = request.into_parts();
            let response = self.handle_capture(input, context);
            responder.respond(response);
            handled += 1;
        }
        handled += self.drain(context, |e| &mut e.depth, Self::depth_image);
        handled += self.drain(context, |e| &mut e.rgb, Self::rgb_image);
        handled += self.drain(context, |e| &mut e.uv, Self::uv_mapping);
        handled += self.drain(context, |e| &mut e.pointcloud, Self::point_cloud);
        handled += self.drain(context, |e| &mut e.intrinsics, Self::intrinsics);
        handled
    }
}

impl<S: FrameSource> SyncNode for RealSenseServer<S> {
    type Result = anyhow::Result<()>;

    fn run(mut self, context: RuntimeContext) -> Self::Result {
        setup_logging!(context);
        info!(
            "Serving {} at {} Hz",
            self.config.base_service, self.config.loop_rate_hz
        );

        if !self.capture_once(&context) {
            warn!("Initial capture failed, waiting for requests anyway");
        }

        let mut rate = Rate::new(self.config.loop_rate_hz)?;
        let mut rate_logger = RateLogger::new(context.get_name(), 30.0);

        while !context.is_runtime_exiting() {
            self.handle_pending_requests(&context);
            rate_logger.increment();
            if !rate.sleep() {
                debug!("Loop overran its period of {:?}", rate.get_period());
            }
        }

        self.session.stop();
        let stats = self.session.stats();
        info!(
            "Exiting after {} frame sets ({} timeouts)",
            stats.delivered, stats.timeouts
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use unros_core::{
        node::SyncNode,
        runtime::{MainRuntimeContext, RuntimeContext},
    };

    use super::*;
    use crate::source::{
        scripted::{flat_frames, ScriptedFrame},
        ScriptedSource,
    };

    fn test_config() -> ServiceConfig {
        ServiceConfig {
            warmup_frames: 2,
            frame_timeout_ms: 10,
            loop_rate_hz: 200.0,
            ..Default::default()
        }
    }

    fn server(
        source: ScriptedSource,
    ) -> (MainRuntimeContext, RuntimeContext, RealSenseServer<ScriptedSource>) {
        let main = MainRuntimeContext::without_signals();
        let context = main.make_context("realsense");
        let server = RealSenseServer::new(source, test_config(), &context).unwrap();
        (main, context, server)
    }

    #[test]
    fn fetches_are_not_ready_before_capture() {
        let (_main, _context, mut server) = server(ScriptedSource::default());
        assert_eq!(server.depth_image().unwrap_err(), RealSenseError::NotReady);
        assert_eq!(server.rgb_image().unwrap_err(), RealSenseError::NotReady);
        assert_eq!(server.uv_mapping().unwrap_err(), RealSenseError::NotReady);
        assert_eq!(server.point_cloud().unwrap_err(), RealSenseError::NotReady);
        assert_eq!(server.intrinsics().unwrap_err(), RealSenseError::NotReady);
    }

    #[test]
    fn unsolicited_capture_runs_no_cycle() {
        let source = ScriptedSource::numbered(10);
        let (_main, context, mut server) = server(source.clone());

        let response = server.handle_capture(CaptureRequest { capture: false }, &context);
        assert!(!response.success);
        assert_eq!(source.remaining(), 10);
        assert!(server.latest().is_none());
        assert_eq!(server.state(), ServerState::Idle);
    }

    #[test]
    fn capture_runs_exactly_one_cycle() {
        let source = ScriptedSource::numbered(10);
        let (_main, context, mut server) = server(source.clone());

        let response = server.handle_capture(CaptureRequest { capture: true }, &context);
        assert!(response.success);
        // Two warm-up frames, then one frame set for the cycle
        assert_eq!(source.remaining(), 7);
        assert_eq!(server.session_stats().delivered, 1);
        assert_eq!(server.latest().unwrap().frame_number, 3);

        server.handle_capture(CaptureRequest { capture: true }, &context);
        assert_eq!(source.remaining(), 6);
        assert_eq!(server.latest().unwrap().frame_number, 4);
        assert_eq!(server.state(), ServerState::Idle);
    }

    #[test]
    fn timeout_fails_capture_and_keeps_last() {
        let source = ScriptedSource::numbered(3);
        let (_main, context, mut server) = server(source.clone());
        assert!(server.capture_once(&context));

        source.push(ScriptedFrame::Timeout);
        let response = server.handle_capture(CaptureRequest { capture: true }, &context);
        assert!(!response.success);
        assert_eq!(server.latest().unwrap().frame_number, 3);
        assert!(server.rgb_image().is_ok());
    }

    #[test]
    fn missing_modality_is_a_silent_skip() {
        let source = ScriptedSource::numbered(3);
        let (_main, context, mut server) = server(source.clone());
        assert!(server.capture_once(&context));

        let mut frames = flat_frames(4, 1000);
        frames.depth = None;
        source.push_frames(frames);
        let response = server.handle_capture(CaptureRequest { capture: true }, &context);
        assert!(response.success);
        assert_eq!(server.latest().unwrap().frame_number, 3);
    }

    #[test]
    fn fetches_agree_with_each_other() {
        let source = ScriptedSource::numbered(3);
        let (_main, context, mut server) = server(source);
        assert!(server.capture_once(&context));

        let cloud = server.point_cloud().unwrap();
        let uv = server.uv_mapping().unwrap();
        assert!(cloud.width > 0);
        assert_eq!(uv.rows(), cloud.width as usize);
        assert_eq!(uv.layout.dim[1].label, "pair");

        let rgb = server.rgb_image().unwrap();
        assert_eq!((rgb.width, rgb.height, rgb.encoding), (16, 9, ImageMsg::RGB8));
        let depth = server.depth_image().unwrap();
        assert_eq!(depth.encoding, ImageMsg::MONO8);
        assert_eq!((depth.width, depth.height), (8, 4));
        assert!(depth.header.seq > rgb.header.seq);
        assert_eq!(depth.header.frame_id, "ptu_camera_color_optical_frame");

        let intrinsics = server.intrinsics().unwrap();
        assert_eq!((intrinsics.width, intrinsics.height), (16, 9));
    }

    #[test]
    fn node_serves_the_bus() {
        let source = ScriptedSource::numbered(100);
        let main = MainRuntimeContext::without_signals();
        let bus = main.get_bus().clone();
        let context = main.make_context("realsense");
        let server = RealSenseServer::new(source, test_config(), &context).unwrap();

        // Subscribed before anything is captured
        let mut early = bus
            .subscribe::<PointCloud2>("/sensors/realsense/pointcloudGeometry/static", 4)
            .unwrap();

        let node = server.spawn(context);

        let capture = bus
            .service_client::<CaptureRequest, CaptureResponse>("/sensors/realsense/capture")
            .unwrap();
        assert_eq!(
            capture.blocking_call(CaptureRequest { capture: false }),
            Some(CaptureResponse { success: false })
        );
        assert_eq!(
            capture.blocking_call(CaptureRequest { capture: true }),
            Some(CaptureResponse { success: true })
        );

        let cloud = bus
            .service_client::<(), FetchResult<PointCloud2>>("/sensors/realsense/pointcloud/static")
            .unwrap()
            .blocking_call(())
            .unwrap()
            .unwrap();
        assert!(cloud.width > 0);

        // A late subscriber still gets the latched message
        let mut late = bus
            .subscribe::<Float32MultiArray>("/sensors/realsense/pointcloudGeometry/static/rgb", 4)
            .unwrap();
        let colors = late.try_recv().unwrap();
        assert_eq!(colors.layout.dim[1].label, "rgb");
        assert!(early.try_recv_latest().is_some());

        main.request_exit();
        node.join().unwrap();
    }

    #[test]
    fn base_path_is_configurable() {
        let main = MainRuntimeContext::without_signals();
        let config = ServiceConfig {
            base_service: "/arm/camera/".into(),
            ..test_config()
        };
        let context = main.make_context("realsense");
        let _server = RealSenseServer::new(ScriptedSource::default(), config, &context).unwrap();
        let paths = main.get_bus().list_paths();
        assert!(paths.iter().any(|p| &**p == "/arm/camera/capture"));
        assert!(paths.iter().any(|p| &**p == "/arm/camera/pointcloud/static/uv"));
        assert!(paths.iter().any(|p| &**p == "/arm/camera/depth/static"));
    }
}
