//! V4L2 webcam access.
//!
//! Only V4L2 `VIDEO_CAPTURE` devices yielding JFIF JPEG or Motion JPEG frames are supported.

use std::{cmp::Reverse, env};

use anyhow::bail;
use linuxvideo::{
    format::{FrameIntervals, FrameSizes, PixFormat, Pixelformat},
    stream::ReadStream,
    BufType, CapabilityFlags, Device, Fract,
};

use super::{CaptureSource, FrameStream};
use crate::image::{Image, Resolution};
use crate::timer::Timer;

const ENV_VAR_WEBCAM_NAME: &str = "HANDVIEW_WEBCAM_NAME";

/// Indicates whether to prefer a higher resolution or frame rate.
///
/// By default, [`ParamPreference::Resolution`] is used, selecting the maximum resolution at the
/// desired frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParamPreference {
    /// Prefer increased resolution over higher frame rates.
    Resolution,
    /// Prefer higher frame rate over higher image resolution.
    Framerate,
}

impl Default for ParamPreference {
    #[inline]
    fn default() -> Self {
        Self::Resolution
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FramePrefs {
    resolution: Option<Resolution>,
    fps: Option<u32>,
    pref: ParamPreference,
}

/// Device selection and format negotiation options.
#[derive(Debug, Default, Clone)]
pub struct WebcamOptions {
    name: Option<String>,
    frame: FramePrefs,
}

impl WebcamOptions {
    /// Sets the name of the webcam device to open.
    ///
    /// If no webcam with the given name can be found, opening the webcam will result in an error.
    #[inline]
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the desired image resolution.
    ///
    /// A lower resolution might be selected if the webcam cannot deliver the desired resolution.
    #[inline]
    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.frame.resolution = Some(resolution);
        self
    }

    /// Sets the desired frame rate.
    ///
    /// A lower frame rate might be selected if the webcam cannot deliver the desired resolution.
    #[inline]
    pub fn fps(mut self, fps: u32) -> Self {
        self.frame.fps = Some(fps);
        self
    }

    /// Selects whether to prefer a higher resolution or frame rate.
    ///
    /// When the camera cannot deliver the desired frame rate or resolution, this parameter controls
    /// which one will be maintained.
    ///
    /// If the camera *can* deliver the desired frame rate and resolution, this parameter controls
    /// which camera parameter will be maximized while keeping the other at its desired
    /// configuration value.
    #[inline]
    pub fn prefer(mut self, pref: ParamPreference) -> Self {
        self.frame.pref = pref;
        self
    }
}

#[derive(Clone, Copy)]
struct FrameFormat {
    resolution: Resolution,
    frame_interval: Fract,
}

fn negotiate_format(device: &Device, mut prefs: FramePrefs) -> anyhow::Result<(PixFormat, Fract)> {
    let mut pixel_format = None;
    for format in device.formats(BufType::VIDEO_CAPTURE) {
        let format = format?;
        if format.pixelformat() == Pixelformat::JPEG || format.pixelformat() == Pixelformat::MJPG {
            pixel_format = Some(format.pixelformat());
            break;
        }
    }

    let Some(pixel_format) = pixel_format else {
        bail!("no supported pixel format found");
    };

    let mut formats = Vec::new();
    match device.frame_sizes(pixel_format)? {
        FrameSizes::Discrete(sizes) => {
            for size in sizes {
                let intervals =
                    match device.frame_intervals(pixel_format, size.width(), size.height())? {
                        FrameIntervals::Discrete(intervals) => intervals,
                        FrameIntervals::Stepwise(_) | FrameIntervals::Continuous(_) => {
                            bail!("stepwise or continuous frame rates are not supported")
                        }
                    };
                for rate in intervals {
                    formats.push(FrameFormat {
                        resolution: Resolution::new(size.width(), size.height()),
                        frame_interval: *rate.fract(),
                    });
                }
            }
        }
        FrameSizes::Stepwise(_) | FrameSizes::Continuous(_) => {
            bail!("stepwise or continuous resolutions are not supported");
        }
    }

    loop {
        if let Some(fmt) = negotiate_format_step(&formats, prefs) {
            return Ok((
                PixFormat::new(
                    fmt.resolution.width(),
                    fmt.resolution.height(),
                    pixel_format,
                ),
                fmt.frame_interval,
            ));
        }

        log::debug!("failed to negotiate format with prefs {:?}", prefs);
        match prefs.pref {
            ParamPreference::Resolution => {
                if prefs.resolution.take().is_none() && prefs.fps.take().is_none() {
                    break;
                }
            }
            ParamPreference::Framerate => {
                if prefs.fps.take().is_none() && prefs.resolution.take().is_none() {
                    break;
                }
            }
        }
        log::debug!("retrying with new prefs {:?}", prefs);
    }

    bail!("failed to negotiate a webcam format")
}

fn negotiate_format_step(formats: &[FrameFormat], prefs: FramePrefs) -> Option<FrameFormat> {
    let eligible = formats
        .iter()
        .filter(|fmt| {
            prefs.resolution.map_or(true, |res| {
                fmt.resolution.width() >= res.width() && fmt.resolution.height() >= res.height()
            }) && prefs.fps.map_or(true, |fps| {
                (1.0 / fmt.frame_interval.as_f32()).round() >= fps as f32
            })
        })
        .copied();
    let mut formats = eligible.collect::<Vec<_>>();
    match prefs.pref {
        ParamPreference::Resolution => {
            formats.sort_by_key(|fmt| (fmt.resolution.num_pixels(), Reverse(fmt.frame_interval)))
        }
        ParamPreference::Framerate => {
            formats.sort_by_key(|fmt| (Reverse(fmt.frame_interval), fmt.resolution.num_pixels()))
        }
    }
    formats.last().copied()
}

/// A webcam yielding a stream of [`Image`]s.
pub struct Webcam {
    stream: ReadStream,
    width: u32,
    height: u32,
    t_dequeue: Timer,
    t_decode: Timer,
}

impl Webcam {
    /// Opens the first webcam matching `options`.
    ///
    /// Without a device name in `options`, the `HANDVIEW_WEBCAM_NAME` environment variable is
    /// consulted; if that is unset too, the first device offering a JPEG format is used.
    ///
    /// This can block for hundreds of milliseconds while the webcam initializes.
    pub fn open(options: &WebcamOptions) -> anyhow::Result<Self> {
        let name_from_env = env::var(ENV_VAR_WEBCAM_NAME).ok();
        if let Some(name) = &name_from_env {
            log::debug!("webcam override: `{ENV_VAR_WEBCAM_NAME}` is set to '{name}'");
        }
        let wanted = options.name.as_deref().or(name_from_env.as_deref());

        let mut last_error = None;
        for res in linuxvideo::list()? {
            let dev = match res {
                Ok(dev) => dev,
                Err(e) => {
                    log::warn!("failed to enumerate video device: {e}");
                    continue;
                }
            };
            match Self::try_open(dev, wanted, options.frame) {
                Ok(Some(webcam)) => return Ok(webcam),
                Ok(None) => {}
                Err(e) => {
                    log::debug!("skipping video device: {e:#}");
                    last_error = Some(e);
                }
            }
        }

        match (wanted, last_error) {
            (Some(name), _) => bail!("no usable webcam named '{name}' found"),
            (None, Some(e)) => Err(e.context("no supported webcam device found")),
            (None, None) => bail!("no webcam device found"),
        }
    }

    fn try_open(
        dev: Device,
        wanted: Option<&str>,
        prefs: FramePrefs,
    ) -> anyhow::Result<Option<Self>> {
        let caps = dev.capabilities()?;
        if wanted.map_or(false, |name| caps.card() != name) {
            return Ok(None);
        }

        let cap_flags = caps.device_capabilities();
        let path = dev.path()?;
        log::debug!(
            "device {} ({}) capabilities: {:?}",
            caps.card(),
            path.display(),
            cap_flags,
        );
        if !cap_flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        let (pixfmt, interval) = negotiate_format(&dev, prefs)?;
        let capture = dev.video_capture(pixfmt)?;
        let (width, height) = (capture.format().width(), capture.format().height());
        let actual = capture.set_frame_interval(interval)?;
        log::info!(
            "opened {} ({}), {}x{} @ {:.1}Hz",
            caps.card(),
            path.display(),
            width,
            height,
            1.0 / actual.as_f32(),
        );

        Ok(Some(Self {
            stream: capture.into_stream(2)?,
            width,
            height,
            t_dequeue: Timer::new("dequeue"),
            t_decode: Timer::new("decode"),
        }))
    }

    /// Returns the resolution of the frames produced by this webcam.
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Reads the next frame from the camera.
    ///
    /// If no frame is available, this method will block until one is. Frames that fail to decode
    /// are logged and replaced by a blank image of the stream's size, so that a single corrupted
    /// USB transfer does not end the stream.
    pub fn read(&mut self) -> anyhow::Result<Image> {
        let dequeue_guard = self.t_dequeue.start();
        let (width, height) = (self.width, self.height);
        let t_decode = &self.t_decode;
        self.stream
            .dequeue(|buf| {
                drop(dequeue_guard);
                let image = t_decode
                    .time(|| Image::decode_jpeg(&buf))
                    .unwrap_or_else(|e| {
                        log::error!("webcam decode error: {e:#}");
                        Image::new(width, height)
                    });
                Ok(image)
            })
            .map_err(Into::into)
    }
}

impl FrameStream for Webcam {
    fn read(&mut self) -> anyhow::Result<Image> {
        Webcam::read(self)
    }

    fn timers(&self) -> Vec<&Timer> {
        vec![&self.t_dequeue, &self.t_decode]
    }
}

/// A [`CaptureSource`] opening the webcam selected by [`WebcamOptions`].
#[derive(Debug, Default, Clone)]
pub struct WebcamSource {
    options: WebcamOptions,
}

impl WebcamSource {
    pub fn new(options: WebcamOptions) -> Self {
        Self { options }
    }
}

impl CaptureSource for WebcamSource {
    type Stream = Webcam;

    fn open(&mut self) -> anyhow::Result<Webcam> {
        Webcam::open(&self.options)
    }
}
