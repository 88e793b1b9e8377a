//! The detect, draw, reschedule cycle.
//!
//! A [`FrameLoop`] moves through these states:
//!
//! * [`LoopState::Uninitialized`]: created, but the camera has not been opened. A loop whose
//!   camera could not be acquired stays here and never detects anything.
//! * [`LoopState::AwaitingFirstFrame`]: armed by [`FrameLoop::arm`] after the camera was opened;
//!   waits for the video surface's ready signal.
//! * [`LoopState::Running`]: one detection and one render per display frame.
//! * [`LoopState::Stopped`]: entered when [`LoopHandle::stop`] was called.
//!
//! If the camera stream ends while the loop is waiting or running, the loop fails with an error
//! instead of waiting for frames that will never come.

use std::{
    fmt, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::anyhow;

use crate::canvas::DrawingSurface;
use crate::clock::{Clock, MonotonicClock, Timestamp, TimestampSequencer};
use crate::detector::HandDetector;
use crate::image::Image;
use crate::landmark::DetectionResult;
use crate::presenter::Presenter;
use crate::task::{promise, PromiseHandle, Task};
use crate::timer::{FpsCounter, Timer};
use crate::video::{ReadySignal, VideoSurface};

/// How long to block on the ready signal before checking for a stop request again.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    AwaitingFirstFrame,
    Running,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Paces the frame loop to the display.
pub trait FrameScheduler {
    /// Blocks until it is time to process the next frame.
    fn wait_for_next_frame(&mut self);
}

/// A [`FrameScheduler`] that fires at a fixed rate.
///
/// If processing a frame took longer than the interval, the next frame starts immediately and the
/// schedule is reset from there instead of trying to catch up.
pub struct FixedRateScheduler {
    interval: Duration,
    next: Option<Instant>,
}

impl FixedRateScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    /// Creates a scheduler firing `fps` times per second.
    pub fn from_fps(fps: u32) -> Self {
        Self::new(Duration::from_secs(1) / fps.max(1))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl FrameScheduler for FixedRateScheduler {
    fn wait_for_next_frame(&mut self) {
        let now = Instant::now();
        let next = self.next.unwrap_or(now + self.interval);
        if next > now {
            thread::sleep(next - now);
            self.next = Some(next + self.interval);
        } else {
            log::trace!("frame loop is {:?} behind schedule", now - next);
            self.next = Some(now + self.interval);
        }
    }
}

/// Receives the camera frame and the freshly drawn surface after every render.
pub trait FrameSink<S> {
    fn present(&mut self, frame: &Image, surface: &S) -> anyhow::Result<()>;
}

/// A [`FrameSink`] that discards everything.
pub struct NullSink;

impl<S> FrameSink<S> for NullSink {
    fn present(&mut self, _frame: &Image, _surface: &S) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A cloneable handle that can stop a [`FrameLoop`] from any thread.
#[derive(Clone, Default)]
pub struct LoopHandle {
    stopped: Arc<AtomicBool>,
}

impl LoopHandle {
    /// Requests the loop to stop. The loop cancels its next tick and enters
    /// [`LoopState::Stopped`].
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

/// The hand detector used by a [`FrameLoop`], possibly still being loaded.
pub struct DetectorSlot<D> {
    state: SlotState<D>,
}

enum SlotState<D> {
    Pending {
        handle: PromiseHandle<anyhow::Result<D>>,
        _task: Option<Task>,
    },
    Ready(D),
    Failed,
}

impl<D: Send + 'static> DetectorSlot<D> {
    /// Runs `load` on a background task; the slot becomes ready once it returns.
    pub fn loading<F>(load: F) -> io::Result<Self>
    where
        F: FnOnce() -> anyhow::Result<D> + Send + 'static,
    {
        let (loaded, handle) = promise();
        let task = Task::spawn("detector loader", move || loaded.fulfill(load()))?;
        Ok(Self {
            state: SlotState::Pending {
                handle,
                _task: Some(task),
            },
        })
    }

    /// A slot that will be filled by fulfilling the [`Promise`] connected to `handle`.
    ///
    /// [`Promise`]: crate::task::Promise
    pub fn from_promise(handle: PromiseHandle<anyhow::Result<D>>) -> Self {
        Self {
            state: SlotState::Pending {
                handle,
                _task: None,
            },
        }
    }
}

impl<D> DetectorSlot<D> {
    /// A slot holding an already initialized detector.
    pub fn ready(detector: D) -> Self {
        Self {
            state: SlotState::Ready(detector),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, SlotState::Ready(_))
    }

    /// Returns the detector if it has finished loading.
    ///
    /// A detector that failed to load is reported as an error once; later calls keep failing.
    fn poll(&mut self) -> anyhow::Result<Option<&mut D>> {
        // Left as `Failed` if loading did not succeed.
        self.state = match std::mem::replace(&mut self.state, SlotState::Failed) {
            SlotState::Pending { handle, _task } => match handle.poll() {
                Ok(Ok(Ok(detector))) => {
                    log::info!("hand detector ready");
                    SlotState::Ready(detector)
                }
                Ok(Ok(Err(e))) => return Err(e.context("hand detector failed to initialize")),
                Ok(Err(handle)) => SlotState::Pending { handle, _task },
                Err(e) => return Err(anyhow!("hand detector failed to initialize: {e}")),
            },
            state => state,
        };

        match &mut self.state {
            SlotState::Ready(detector) => Ok(Some(detector)),
            SlotState::Failed => Err(anyhow!("hand detector is unavailable")),
            SlotState::Pending { .. } => Ok(None),
        }
    }
}

/// Drives detection and rendering for every display frame.
pub struct FrameLoop<D, S> {
    state: LoopState,
    detector: DetectorSlot<D>,
    presenter: Presenter<S>,
    video: VideoSurface,
    ready: Option<ReadySignal>,
    clock: Box<dyn Clock + Send>,
    sequencer: TimestampSequencer,
    scheduler: Box<dyn FrameScheduler + Send>,
    sink: Box<dyn FrameSink<S> + Send>,
    handle: LoopHandle,
    fps: FpsCounter,
    t_detect: Timer,
    t_render: Timer,
}

impl<D: HandDetector, S: DrawingSurface> FrameLoop<D, S> {
    /// Creates an [`LoopState::Uninitialized`] loop.
    ///
    /// By default, the loop uses a [`MonotonicClock`], runs at 60 FPS and presents to a
    /// [`NullSink`].
    pub fn new(detector: DetectorSlot<D>, presenter: Presenter<S>, video: VideoSurface) -> Self {
        Self {
            state: LoopState::Uninitialized,
            detector,
            presenter,
            video,
            ready: None,
            clock: Box::new(MonotonicClock::new()),
            sequencer: TimestampSequencer::new(),
            scheduler: Box::new(FixedRateScheduler::from_fps(60)),
            sink: Box::new(NullSink),
            handle: LoopHandle::default(),
            fps: FpsCounter::new("frame loop"),
            t_detect: Timer::new("detect"),
            t_render: Timer::new("render"),
        }
    }

    pub fn with_clock<C: Clock + Send + 'static>(mut self, clock: C) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_scheduler<F: FrameScheduler + Send + 'static>(mut self, scheduler: F) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    pub fn with_sink<K: FrameSink<S> + Send + 'static>(mut self, sink: K) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Returns a handle that can stop this loop.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn presenter(&self) -> &Presenter<S> {
        &self.presenter
    }

    /// Marks the camera as opened and starts waiting for the first frame.
    ///
    /// Has no effect unless the loop is [`LoopState::Uninitialized`].
    pub fn arm(&mut self, ready: ReadySignal) {
        if self.state == LoopState::Uninitialized {
            self.ready = Some(ready);
            self.set_state(LoopState::AwaitingFirstFrame);
        }
    }

    /// Runs the loop until it is stopped.
    ///
    /// Returns immediately if the loop was never armed. Returns an error if the detector failed to
    /// initialize, or if the camera stream ended.
    pub fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match self.state {
                LoopState::Uninitialized => {
                    log::debug!("frame loop was never armed, not running");
                    return Ok(());
                }
                LoopState::Stopped => return Ok(()),
                LoopState::AwaitingFirstFrame => self.tick()?,
                LoopState::Running => {
                    self.tick()?;
                    if self.state == LoopState::Running {
                        self.scheduler.wait_for_next_frame();
                    }
                }
            }
        }
    }

    /// Performs a single step of the loop without waiting for the next frame slot.
    pub fn tick(&mut self) -> anyhow::Result<()> {
        if self.handle.is_stopped()
            && matches!(
                self.state,
                LoopState::AwaitingFirstFrame | LoopState::Running
            )
        {
            self.set_state(LoopState::Stopped);
            return Ok(());
        }

        match self.state {
            LoopState::Uninitialized | LoopState::Stopped => Ok(()),
            LoopState::AwaitingFirstFrame => self.await_first_frame(),
            LoopState::Running => self.step(),
        }
    }

    fn set_state(&mut self, state: LoopState) {
        log::debug!("frame loop: {} -> {}", self.state, state);
        self.state = state;
    }

    fn await_first_frame(&mut self) -> anyhow::Result<()> {
        let Some(ready) = self.ready.take() else {
            return Err(anyhow!("frame loop armed without a ready signal"));
        };
        match ready.block_timeout(READY_POLL_INTERVAL) {
            Ok(Ok(())) => self.set_state(LoopState::Running),
            Ok(Err(ready)) => self.ready = Some(ready),
            Err(_) => return Err(anyhow!("video surface was closed before producing a frame")),
        }
        Ok(())
    }

    fn step(&mut self) -> anyhow::Result<()> {
        if self.video.is_closed() {
            return Err(anyhow!("camera stream ended"));
        }
        let Some(detector) = self.detector.poll()? else {
            log::trace!("hand detector is still loading, skipping frame");
            return Ok(());
        };
        let Some(frame) = self.video.current_frame() else {
            return Ok(());
        };

        let timestamp: Timestamp = self.sequencer.next(self.clock.now());
        let result = match self.t_detect.time(|| detector.detect(&frame, timestamp)) {
            Ok(result) => result,
            Err(e) => {
                log::error!("hand detection failed at {timestamp}: {e:#}");
                DetectionResult::empty()
            }
        };
        log::trace!("{timestamp}: {result}");

        self.presenter.surface_mut().resize(frame.resolution());
        let presenter = &mut self.presenter;
        if let Err(e) = self.t_render.time(|| presenter.render(&result)) {
            log::error!("failed to draw hand landmarks: {e:#}");
        }
        self.sink.present(&frame, self.presenter.surface())?;

        self.fps.tick_with(
            [&self.t_detect, &self.t_render]
                .into_iter()
                .chain(detector.timers()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{atomic::AtomicUsize, Mutex};

    use super::*;
    use crate::image::Resolution;
    use crate::presenter::tests::{Call, RecordingSurface};

    /// Records the timestamps it was called with.
    #[derive(Clone, Default)]
    struct FakeDetector {
        calls: Arc<Mutex<Vec<Timestamp>>>,
        fail: bool,
    }

    impl HandDetector for FakeDetector {
        fn detect(&mut self, _frame: &Image, ts: Timestamp) -> anyhow::Result<DetectionResult> {
            self.calls.lock().unwrap().push(ts);
            if self.fail {
                anyhow::bail!("inference failed");
            }
            Ok(DetectionResult::empty())
        }
    }

    /// Counts how often its profiling timers were requested.
    struct TimedDetector {
        timer: Timer,
        timer_reads: Arc<AtomicUsize>,
    }

    impl HandDetector for TimedDetector {
        fn detect(&mut self, _frame: &Image, _ts: Timestamp) -> anyhow::Result<DetectionResult> {
            self.timer.time(|| Ok(DetectionResult::empty()))
        }

        fn timers(&self) -> Vec<&Timer> {
            self.timer_reads.fetch_add(1, Ordering::Relaxed);
            vec![&self.timer]
        }
    }

    /// A clock that never advances.
    struct FrozenClock;

    impl Clock for FrozenClock {
        fn now(&mut self) -> Timestamp {
            Timestamp::ZERO
        }
    }

    fn running_loop(detector: DetectorSlot<FakeDetector>) -> FrameLoop<FakeDetector, RecordingSurface> {
        let (video, ready) = VideoSurface::new();
        video.publish(Image::new(4, 4));
        let mut frame_loop = FrameLoop::new(detector, Presenter::new(RecordingSurface::default()), video)
            .with_clock(FrozenClock);
        frame_loop.arm(ready);
        frame_loop.tick().unwrap();
        assert_eq!(frame_loop.state(), LoopState::Running);
        frame_loop
    }

    #[test]
    fn unarmed_loop_does_nothing() {
        let detector = FakeDetector::default();
        let (video, _ready) = VideoSurface::new();
        let mut frame_loop = FrameLoop::new(
            DetectorSlot::ready(detector.clone()),
            Presenter::new(RecordingSurface::default()),
            video,
        );
        frame_loop.tick().unwrap();
        frame_loop.run().unwrap();
        assert_eq!(frame_loop.state(), LoopState::Uninitialized);
        assert!(detector.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn frozen_clock_still_yields_increasing_timestamps() {
        let detector = FakeDetector::default();
        let mut frame_loop = running_loop(DetectorSlot::ready(detector.clone()));
        for _ in 0..5 {
            frame_loop.tick().unwrap();
        }
        let calls = detector.calls.lock().unwrap();
        assert_eq!(calls.len(), 5);
        assert!(calls.windows(2).all(|w| w[0] < w[1]), "{calls:?}");
    }

    #[test]
    fn pending_detector_skips_frames() {
        let (slot, handle) = promise();
        let detector = FakeDetector::default();
        let mut frame_loop = running_loop(DetectorSlot::from_promise(handle));
        frame_loop.tick().unwrap();
        frame_loop.tick().unwrap();
        assert!(frame_loop.presenter().surface().calls.is_empty());

        slot.fulfill(Ok(detector.clone()));
        frame_loop.tick().unwrap();
        assert_eq!(detector.calls.lock().unwrap().len(), 1);
        assert_eq!(frame_loop.presenter().surface().calls, [Call::Clear]);
    }

    #[test]
    fn detector_init_failure_is_fatal() {
        let (slot, handle) = promise::<anyhow::Result<FakeDetector>>();
        let mut frame_loop = running_loop(DetectorSlot::from_promise(handle));
        slot.fulfill(Err(anyhow!("model missing")));
        let err = frame_loop.tick().unwrap_err();
        assert!(format!("{err:#}").contains("model missing"), "{err:#}");
        assert!(frame_loop.run().is_err());
    }

    #[test]
    fn detection_errors_are_not_fatal() {
        let detector = FakeDetector {
            fail: true,
            ..Default::default()
        };
        let mut frame_loop = running_loop(DetectorSlot::ready(detector.clone()));
        frame_loop.tick().unwrap();
        frame_loop.tick().unwrap();
        assert_eq!(detector.calls.lock().unwrap().len(), 2);
        assert_eq!(frame_loop.state(), LoopState::Running);
    }

    #[test]
    fn closed_surface_before_first_frame_is_fatal() {
        let (video, ready) = VideoSurface::new();
        let mut frame_loop = FrameLoop::new(
            DetectorSlot::ready(FakeDetector::default()),
            Presenter::new(RecordingSurface::default()),
            video.clone(),
        );
        frame_loop.arm(ready);
        frame_loop.tick().unwrap();
        assert_eq!(frame_loop.state(), LoopState::AwaitingFirstFrame);

        video.close();
        assert!(frame_loop.tick().is_err());
        assert!(frame_loop.run().is_err());
    }

    #[test]
    fn closed_surface_while_running_is_fatal() {
        let detector = FakeDetector::default();
        let (video, ready) = VideoSurface::new();
        video.publish(Image::new(4, 4));
        let mut frame_loop = FrameLoop::new(
            DetectorSlot::ready(detector.clone()),
            Presenter::new(RecordingSurface::default()),
            video.clone(),
        );
        frame_loop.arm(ready);
        frame_loop.tick().unwrap();
        frame_loop.tick().unwrap();
        assert_eq!(detector.calls.lock().unwrap().len(), 1);

        video.close();
        let err = frame_loop.tick().unwrap_err();
        assert!(err.to_string().contains("camera stream ended"), "{err}");
        assert!(frame_loop.run().is_err());
        assert_eq!(detector.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn detector_timers_are_reported() {
        let timer_reads = Arc::new(AtomicUsize::new(0));
        let detector = TimedDetector {
            timer: Timer::new("model"),
            timer_reads: timer_reads.clone(),
        };
        let (video, ready) = VideoSurface::new();
        video.publish(Image::new(4, 4));
        let mut frame_loop = FrameLoop::new(
            DetectorSlot::ready(detector),
            Presenter::new(RecordingSurface::default()),
            video,
        );
        frame_loop.arm(ready);
        frame_loop.tick().unwrap();
        for _ in 0..3 {
            frame_loop.tick().unwrap();
        }
        assert_eq!(timer_reads.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn stop_enters_stopped() {
        let detector = FakeDetector::default();
        let mut frame_loop = running_loop(DetectorSlot::ready(detector.clone()));
        frame_loop.handle().stop();
        frame_loop.run().unwrap();
        assert_eq!(frame_loop.state(), LoopState::Stopped);
        assert!(detector.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn surface_follows_frame_size() {
        let detector = FakeDetector::default();
        let (video, ready) = VideoSurface::new();
        video.publish(Image::new(8, 6));
        let mut frame_loop = FrameLoop::new(
            DetectorSlot::ready(detector),
            Presenter::new(crate::canvas::ImageCanvas::new(Resolution::new(1, 1))),
            video,
        );
        frame_loop.arm(ready);
        frame_loop.tick().unwrap();
        frame_loop.tick().unwrap();
        assert_eq!(
            frame_loop.presenter().surface().resolution(),
            Resolution::new(8, 6)
        );
    }

    #[test]
    fn fixed_rate_scheduler_paces() {
        let mut scheduler = FixedRateScheduler::new(Duration::from_millis(5));
        let start = Instant::now();
        for _ in 0..3 {
            scheduler.wait_for_next_frame();
        }
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert_eq!(FixedRateScheduler::from_fps(50).interval(), Duration::from_millis(20));
    }
}
