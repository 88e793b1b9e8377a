//! Camera capture and the shared video surface.
//!
//! A [`CaptureSource`] opens a camera and yields a [`FrameStream`]. [`capture::acquire`] runs the
//! stream on a background task that publishes every frame into a [`VideoSurface`]. The first
//! published frame fulfills the surface's [`ReadySignal`]. When the stream ends, the surface is
//! closed, and a [`ReadySignal`] that has not fired yet reports an error.

pub mod webcam;

use std::sync::{Arc, Mutex};

use crate::image::Image;
use crate::task::{promise, Promise, PromiseHandle};
use crate::timer::Timer;

/// Something that can be opened to produce a stream of camera frames.
pub trait CaptureSource: Send + 'static {
    type Stream: FrameStream;

    /// Opens the device.
    ///
    /// This can block for a significant amount of time while the device initializes.
    fn open(&mut self) -> anyhow::Result<Self::Stream>;
}

/// A live stream of frames.
pub trait FrameStream: Send {
    /// Reads the next frame, blocking until one is available.
    fn read(&mut self) -> anyhow::Result<Image>;

    /// Returns profiling timers to log alongside the capture frame rate.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

/// Fires when the first frame has been published to a [`VideoSurface`].
pub type ReadySignal = PromiseHandle<()>;

/// Holds the most recent camera frame.
///
/// This is a cheaply [`Clone`]able handle; all clones share the same frame.
#[derive(Clone)]
pub struct VideoSurface {
    shared: Arc<Mutex<Shared>>,
}

struct Shared {
    frame: Option<Arc<Image>>,
    ready: Option<Promise<()>>,
    frames_published: u64,
    closed: bool,
}

impl VideoSurface {
    /// Creates an empty surface and the signal that fires once it has data.
    pub fn new() -> (Self, ReadySignal) {
        let (ready, handle) = promise();
        let surface = Self {
            shared: Arc::new(Mutex::new(Shared {
                frame: None,
                ready: Some(ready),
                frames_published: 0,
                closed: false,
            })),
        };
        (surface, handle)
    }

    /// Replaces the current frame.
    pub fn publish(&self, frame: Image) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.frame = Some(Arc::new(frame));
        shared.frames_published += 1;
        if let Some(ready) = shared.ready.take() {
            log::debug!("first video frame published");
            ready.fulfill(());
        }
    }

    /// Returns the most recently published frame, if any.
    pub fn current_frame(&self) -> Option<Arc<Image>> {
        let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.frame.clone()
    }

    /// Marks the surface as closed: no more frames will be published.
    ///
    /// Drops the ready signal's promise if no frame was ever published.
    pub fn close(&self) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.closed = true;
        shared.ready.take();
    }

    /// Returns whether the stream feeding this surface has ended.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    /// Returns the number of frames published so far.
    pub fn frames_published(&self) -> u64 {
        self.shared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .frames_published
    }
}

pub mod capture {
    //! Running a [`CaptureSource`] in the background.

    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use anyhow::anyhow;

    use super::{CaptureSource, FrameStream, VideoSurface};
    use crate::task::{promise, PromiseHandle, Task};
    use crate::timer::FpsCounter;

    /// A running capture task.
    ///
    /// Dropping this stops the task and releases the camera.
    pub struct Capture {
        stop: Arc<AtomicBool>,
        opened: Option<PromiseHandle<Result<(), String>>>,
        task: Option<Task>,
    }

    /// Spawns a task that opens `source` and publishes its frames into `surface`.
    ///
    /// Use [`Capture::wait_opened`] to find out whether the device could be opened.
    pub fn acquire<S: CaptureSource>(mut source: S, surface: VideoSurface) -> anyhow::Result<Capture> {
        let stop = Arc::new(AtomicBool::new(false));
        let (opened_promise, opened) = promise();
        let task = Task::spawn("capture", {
            let stop = stop.clone();
            move || {
                let mut stream = match source.open() {
                    Ok(stream) => {
                        opened_promise.fulfill(Ok(()));
                        stream
                    }
                    Err(e) => {
                        opened_promise.fulfill(Err(format!("{e:#}")));
                        return;
                    }
                };

                // Closes the surface even if `read` panics.
                let surface = CloseOnExit(surface);
                let mut fps = FpsCounter::new("capture");
                while !stop.load(Ordering::Relaxed) {
                    match stream.read() {
                        Ok(frame) => surface.0.publish(frame),
                        Err(e) => {
                            log::error!("camera stream failed: {e:#}");
                            break;
                        }
                    }
                    fps.tick_with(stream.timers());
                }
                log::debug!("releasing camera");
            }
        })?;

        Ok(Capture {
            stop,
            opened: Some(opened),
            task: Some(task),
        })
    }

    struct CloseOnExit(VideoSurface);

    impl Drop for CloseOnExit {
        fn drop(&mut self) {
            self.0.close();
        }
    }

    impl Capture {
        /// Blocks until the camera has been opened, or failed to open.
        ///
        /// Calling this again after it returned reports success.
        pub fn wait_opened(&mut self) -> anyhow::Result<()> {
            let Some(opened) = self.opened.take() else {
                return Ok(());
            };
            match opened.block() {
                Ok(Ok(())) => Ok(()),
                Ok(Err(msg)) => {
                    // The task has exited; join it so that the device is closed now.
                    self.task.take();
                    Err(anyhow!(msg))
                }
                Err(e) => Err(anyhow!("capture task exited unexpectedly: {e}")),
            }
        }

        /// Returns whether the capture task is still running.
        pub fn is_running(&self) -> bool {
            self.task.as_ref().map_or(false, |task| !task.is_finished())
        }

        /// Stops capturing and releases the camera, waiting for the task to exit.
        pub fn stop(mut self) {
            self.shutdown();
        }

        fn shutdown(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            self.task.take();
        }
    }

    impl Drop for Capture {
        fn drop(&mut self) {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::bail;

    use super::*;
    use crate::image::{Color, Resolution};

    struct FakeCamera {
        fail_open: bool,
    }

    struct FakeStream {
        frames: u8,
    }

    struct BrokenStream;

    impl FrameStream for BrokenStream {
        fn read(&mut self) -> anyhow::Result<Image> {
            bail!("device unplugged");
        }
    }

    struct BrokenCamera;

    impl CaptureSource for BrokenCamera {
        type Stream = BrokenStream;

        fn open(&mut self) -> anyhow::Result<BrokenStream> {
            Ok(BrokenStream)
        }
    }

    impl CaptureSource for FakeCamera {
        type Stream = FakeStream;

        fn open(&mut self) -> anyhow::Result<FakeStream> {
            if self.fail_open {
                bail!("permission denied");
            }
            Ok(FakeStream { frames: 0 })
        }
    }

    impl FrameStream for FakeStream {
        fn read(&mut self) -> anyhow::Result<Image> {
            std::thread::sleep(Duration::from_millis(1));
            self.frames = self.frames.wrapping_add(1);
            Ok(Image::filled(
                Resolution::new(2, 2),
                Color::from_rgb8(self.frames, 0, 0),
            ))
        }
    }

    #[test]
    fn surface_signals_ready_once() {
        let (surface, ready) = VideoSurface::new();
        assert!(surface.current_frame().is_none());
        assert!(!ready.is_fulfilled());

        surface.publish(Image::new(1, 1));
        surface.publish(Image::new(2, 1));
        assert!(ready.is_fulfilled());
        ready.block().unwrap();
        assert_eq!(surface.frames_published(), 2);
        assert_eq!(surface.current_frame().unwrap().width(), 2);
    }

    #[test]
    fn capture_publishes_frames() {
        let (surface, ready) = VideoSurface::new();
        let mut capture =
            capture::acquire(FakeCamera { fail_open: false }, surface.clone()).unwrap();
        capture.wait_opened().unwrap();
        ready.block().unwrap();
        assert!(surface.current_frame().is_some());
        capture.stop();
    }

    #[test]
    fn capture_reports_open_failure() {
        let (surface, ready) = VideoSurface::new();
        let mut capture = capture::acquire(FakeCamera { fail_open: true }, surface.clone()).unwrap();
        let err = capture.wait_opened().unwrap_err();
        assert!(err.to_string().contains("permission denied"), "{err}");
        assert!(!capture.is_running());
        assert_eq!(surface.frames_published(), 0);

        // Nothing will ever fulfill the signal once the last surface handle is gone.
        drop(surface);
        assert!(ready.block().is_err());
    }

    #[test]
    fn failed_stream_closes_surface() {
        let (surface, ready) = VideoSurface::new();
        let mut capture = capture::acquire(BrokenCamera, surface.clone()).unwrap();
        capture.wait_opened().unwrap();

        // The surface outlives the capture task, but the signal still resolves.
        assert!(ready.block().is_err());
        assert!(surface.is_closed());
        assert_eq!(surface.frames_published(), 0);
        capture.stop();
    }

    #[test]
    fn close_keeps_last_frame() {
        let (surface, ready) = VideoSurface::new();
        surface.publish(Image::new(1, 1));
        surface.close();
        assert!(surface.is_closed());
        assert!(ready.block().is_ok());
        assert!(surface.current_frame().is_some());
    }

    #[test]
    fn stopped_capture_closes_surface() {
        let (surface, _ready) = VideoSurface::new();
        let mut capture =
            capture::acquire(FakeCamera { fail_open: false }, surface.clone()).unwrap();
        capture.wait_opened().unwrap();
        assert!(!surface.is_closed());
        capture.stop();
        assert!(surface.is_closed());
    }
}
