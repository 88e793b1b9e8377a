//! Live hand landmark tracking with a skeleton overlay.
//!
//! A webcam stream is fed through a palm detection network and a hand landmark network frame by
//! frame, and the detected hand skeletons are drawn onto a transparent canvas that is composited over the camera image.
//!
//! The pieces are:
//!
//! * [`presenter::Presenter`]: clears and redraws a [`canvas::DrawingSurface`] every frame.
//! * [`video::capture`]: opens the camera and publishes its frames into a [`video::VideoSurface`].
//! * [`palm::PalmDetector`]: finds palms, each of which marks a region to look for a hand in.
//! * [`detector::HandLandmarker`]: the hand landmark session, created once at startup.
//! * [`frame_loop::FrameLoop`]: the detect, draw, reschedule cycle.
//!
//! [`app`] wires them together.
//!
//! # Coordinates
//!
//! Landmarks use normalized image coordinates: X points to the right, Y points *down*, and both
//! range from 0.0 to 1.0 across the frame. Z is a relative depth in roughly the same scale as X,
//! with smaller values being closer to the camera.
//!
//! # Environment Variables
//!
//! Besides the variables read by [`config::Config::from_env`], some parts of handview can be
//! overridden by setting environment variables:
//!
//! * `HANDVIEW_JPEG_BACKEND`: Configures the JPEG decoder used for webcam frames. Allowed values
//!   are `zune-jpeg` (the default) and `jpeg-decoder`.
//! * `HANDVIEW_WEBCAM_NAME`: Forces the device to use for [`Webcam`]s created without an explicit
//!   device name. If unset, the first device that supports a compatible image format will be used.
//!
//! [`Webcam`]: video::webcam::Webcam

use log::LevelFilter;

pub mod app;
pub mod canvas;
pub mod clock;
pub mod config;
pub mod detection;
pub mod detector;
pub mod frame_loop;
pub mod gui;
pub mod image;
pub mod landmark;
pub mod nn;
pub mod palm;
pub mod presenter;
pub mod task;
pub mod termination;
pub mod timer;
pub mod video;

pub use handview_macros::main;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_CRATE_NAME")), log_level)
        .filter(Some("wgpu"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and handview will log at *trace*
/// level. Otherwise, they will log at *debug* level.
///
/// `wgpu` will always log at *warn* level. `RUST_LOG` overrides all of these.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}

/// Runs the application closure `cb` next to the GUI event loop.
///
/// This is invoked by `#[handview::main]` and never returns: the process exits with a status code
/// derived from the value returned by `cb`.
#[doc(hidden)]
pub fn run<F, R>(cb: F) -> !
where
    F: FnOnce() -> R + Send + 'static,
    R: termination::Termination + Send,
{
    gui::run(cb)
}
