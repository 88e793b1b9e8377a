//! Application wiring: surfaces, detector, camera, and the frame loop.

use std::time::Duration;

use crate::canvas::{DrawingSurface, ImageCanvas};
use crate::config::Config;
use crate::detector::{HandDetector, HandLandmarker};
use crate::frame_loop::{DetectorSlot, FixedRateScheduler, FrameLoop, LoopHandle, LoopState};
use crate::gui::WindowSink;
use crate::image::Resolution;
use crate::presenter::Presenter;
use crate::task::retry;
use crate::video::{
    capture::{self, Capture},
    webcam::{WebcamOptions, WebcamSource},
    CaptureSource, ReadySignal, VideoSurface,
};

/// Title of the output window.
pub const WINDOW_TITLE: &str = "handview";

/// Long-lived handles of a running application.
pub struct AppContext<D, S> {
    video: VideoSurface,
    frame_loop: FrameLoop<D, S>,
    capture: Option<Capture>,
}

impl<D: HandDetector, S: DrawingSurface> AppContext<D, S> {
    /// Creates the context around a not yet armed frame loop.
    ///
    /// `video` must be the surface `frame_loop` reads from.
    pub fn new(video: VideoSurface, frame_loop: FrameLoop<D, S>) -> Self {
        Self {
            video,
            frame_loop,
            capture: None,
        }
    }

    /// Opens the camera, trying up to `attempts` times, and arms the frame loop on success.
    ///
    /// Failing to open the camera is not an error: it is logged, and the frame loop stays
    /// [`LoopState::Uninitialized`].
    pub fn acquire_camera<Src, F>(
        &mut self,
        ready: ReadySignal,
        mut make_source: F,
        attempts: u32,
        delay: Duration,
    ) -> LoopState
    where
        Src: CaptureSource,
        F: FnMut() -> Src,
    {
        let video = &self.video;
        let opened = retry("opening camera", attempts, delay, || {
            let mut capture = capture::acquire(make_source(), video.clone())?;
            capture.wait_opened()?;
            Ok(capture)
        });
        match opened {
            Ok(capture) => {
                self.capture = Some(capture);
                self.frame_loop.arm(ready);
            }
            Err(e) => log::error!("failed to acquire camera: {e:#}"),
        }
        self.frame_loop.state()
    }

    pub fn handle(&self) -> LoopHandle {
        self.frame_loop.handle()
    }

    pub fn state(&self) -> LoopState {
        self.frame_loop.state()
    }

    /// Runs the frame loop until it stops, then releases the camera.
    pub fn run(&mut self) -> anyhow::Result<()> {
        let res = self.frame_loop.run();
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        res
    }
}

/// Runs the application with the given configuration.
///
/// Returns an error for fatal startup failures (the model cannot be loaded, for example). A
/// camera that cannot be opened is only logged, and this returns `Ok(())` without ever running the
/// frame loop.
pub fn run(config: Config) -> anyhow::Result<()> {
    let detector_options = config.detector_options();
    let (model_attempts, retry_delay) = (config.model_attempts, config.retry_delay);
    let detector = DetectorSlot::loading(move || {
        retry("loading hand landmark model", model_attempts, retry_delay, || {
            HandLandmarker::create_from_options(detector_options.clone())
        })
    })?;

    let (video, ready) = VideoSurface::new();
    let presenter = Presenter::new(ImageCanvas::new(Resolution::RES_VGA));
    let frame_loop = FrameLoop::new(detector, presenter, video.clone())
        .with_scheduler(FixedRateScheduler::from_fps(config.display_fps))
        .with_sink(WindowSink::new(WINDOW_TITLE));

    let mut app = AppContext::new(video, frame_loop);
    app.acquire_camera(
        ready,
        || WebcamSource::new(WebcamOptions::default()),
        config.camera_attempts,
        config.retry_delay,
    );
    app.run()
}
