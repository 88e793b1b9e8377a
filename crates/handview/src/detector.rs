//! The hand landmark detector session.
//!
//! A [`HandLandmarker`] is created once from [`DetectorOptions`] and then fed video frames with
//! strictly increasing timestamps. Each call synchronously returns the hands found in that frame.
//!
//! Detection runs in two stages: a [`PalmDetector`] finds palms in the whole frame, then the hand
//! landmark network is run on the [`hand_region`] of each palm.

use std::{fmt, path::PathBuf, str::FromStr};

use anyhow::{ensure, Context};

use crate::clock::Timestamp;
use crate::detection::Detection;
use crate::image::{Image, Rect, Resolution};
use crate::landmark::{DetectionResult, NUM_HAND_LANDMARKS};
use crate::nn::{Cnn, Outputs};
use crate::palm::{hand_region, PalmDetector};
use crate::timer::Timer;

/// Minimum hand presence score for a hand to be reported.
const PRESENCE_THRESHOLD: f32 = 0.5;

/// Compute backend preference for running the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delegate {
    Gpu,
    Cpu,
}

impl fmt::Display for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Delegate::Gpu => "gpu",
            Delegate::Cpu => "cpu",
        })
    }
}

/// Error returned when parsing an unknown [`Delegate`] name.
#[derive(Debug, thiserror::Error)]
#[error("unknown delegate '{0}', expected `gpu` or `cpu`")]
pub struct UnknownDelegate(String);

impl FromStr for Delegate {
    type Err = UnknownDelegate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &*s.to_ascii_lowercase() {
            "gpu" => Ok(Delegate::Gpu),
            "cpu" => Ok(Delegate::Cpu),
            _ => Err(UnknownDelegate(s.to_string())),
        }
    }
}

/// Whether the session processes unrelated still images or consecutive video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningMode {
    Image,
    Video,
}

#[derive(Debug, Clone)]
pub struct BaseOptions {
    /// Path to the `.onnx` hand landmark model.
    pub model_asset_path: PathBuf,
    /// Path to the `.onnx` palm detection model.
    pub palm_model_asset_path: PathBuf,
    pub delegate: Delegate,
}

#[derive(Debug, Clone)]
pub struct DetectorOptions {
    pub base_options: BaseOptions,
    pub running_mode: RunningMode,
    /// Maximum number of hands reported per frame.
    pub num_hands: u32,
}

/// Misuse of a [`HandLandmarker`] session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("timestamp {timestamp} is not later than the previous timestamp {last}")]
    NonMonotonicTimestamp { timestamp: Timestamp, last: Timestamp },
    #[error("`{operation}` cannot be used in {mode:?} running mode")]
    WrongRunningMode {
        operation: &'static str,
        mode: RunningMode,
    },
    #[error("`num_hands` must be at least 1")]
    NoHands,
    #[error("model location must be a local file path, got '{0}'")]
    RemoteModel(String),
}

/// Anything that finds hand landmarks in video frames.
///
/// Implementations require `timestamp` to increase strictly from call to call. A frame without
/// hands yields an empty [`DetectionResult`], not an error.
pub trait HandDetector: Send {
    fn detect(&mut self, frame: &Image, timestamp: Timestamp) -> anyhow::Result<DetectionResult>;

    /// Returns profiling timers to log alongside the frame rate.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

/// A hand landmark detector session backed by a palm detection and a hand landmark network.
pub struct HandLandmarker {
    palm: PalmDetector,
    cnn: Cnn,
    options: DetectorOptions,
    last_timestamp: Option<Timestamp>,
    t_infer: Timer,
    t_extract: Timer,
}

impl HandLandmarker {
    /// Validates `options` and loads the model.
    ///
    /// This can take a while and should be done before the first frame arrives.
    pub fn create_from_options(options: DetectorOptions) -> anyhow::Result<Self> {
        validate_options(&options)?;

        let path = &options.base_options.model_asset_path;
        if options.base_options.delegate == Delegate::Gpu {
            log::warn!("GPU delegate is not available, running the hand models on the CPU");
        }
        let palm = PalmDetector::from_path(&options.base_options.palm_model_asset_path)?;
        let cnn = Cnn::from_path(path)
            .with_context(|| format!("failed to load hand landmark model {}", path.display()))?;
        log::info!(
            "loaded hand landmark model {} ({:?} mode, up to {} hands)",
            path.display(),
            options.running_mode,
            options.num_hands,
        );

        Ok(Self {
            palm,
            cnn,
            options,
            last_timestamp: None,
            t_infer: Timer::new("landmark infer"),
            t_extract: Timer::new("landmark extract"),
        })
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    /// Detects hands in an unrelated still image.
    ///
    /// Only available in [`RunningMode::Image`].
    pub fn detect(&mut self, image: &Image) -> anyhow::Result<DetectionResult> {
        self.require_mode("detect", RunningMode::Image)?;
        self.run(image)
    }

    /// Detects hands in a video frame.
    ///
    /// Only available in [`RunningMode::Video`]. `timestamp` must be later than the timestamp of
    /// the previous call.
    pub fn detect_for_video(
        &mut self,
        image: &Image,
        timestamp: Timestamp,
    ) -> anyhow::Result<DetectionResult> {
        self.require_mode("detect_for_video", RunningMode::Video)?;
        check_timestamp(self.last_timestamp, timestamp)?;
        self.last_timestamp = Some(timestamp);
        self.run(image)
    }

    fn require_mode(&self, operation: &'static str, mode: RunningMode) -> Result<(), SessionError> {
        if self.options.running_mode != mode {
            return Err(SessionError::WrongRunningMode {
                operation,
                mode: self.options.running_mode,
            });
        }
        Ok(())
    }

    fn run(&mut self, image: &Image) -> anyhow::Result<DetectionResult> {
        let palms = self.palm.detect(image)?;
        log::trace!("{} palm(s) detected", palms.len());

        let (cnn, t_infer, t_extract) = (&self.cnn, &self.t_infer, &self.t_extract);
        let input_res = cnn.input_resolution();
        let frame_res = image.resolution();
        let hands = landmark_palms(&palms, self.options.num_hands as usize, |roi| {
            let outputs = t_infer.time(|| cnn.estimate(image, roi))?;
            t_extract.time(|| extract(&outputs, roi, input_res, frame_res))
        })?;
        Ok(DetectionResult::from_raw(hands)?)
    }
}

impl HandDetector for HandLandmarker {
    fn detect(&mut self, frame: &Image, timestamp: Timestamp) -> anyhow::Result<DetectionResult> {
        self.detect_for_video(frame, timestamp)
    }

    fn timers(&self) -> Vec<&Timer> {
        let mut timers = self.palm.timers().to_vec();
        timers.extend([&self.t_infer, &self.t_extract]);
        timers
    }
}

/// Runs `estimate` on the hand region of each palm, in order, until `max_hands` hands are found.
///
/// Palms whose region turns out not to contain a hand are skipped.
fn landmark_palms<F>(
    palms: &[Detection],
    max_hands: usize,
    mut estimate: F,
) -> anyhow::Result<Vec<Vec<[f32; 3]>>>
where
    F: FnMut(Rect) -> anyhow::Result<Option<Vec<[f32; 3]>>>,
{
    let mut hands = Vec::new();
    for palm in palms {
        if hands.len() >= max_hands {
            break;
        }
        let roi = hand_region(palm);
        if roi.width() == 0 || roi.height() == 0 {
            continue;
        }
        if let Some(hand) = estimate(roi)? {
            hands.push(hand);
        }
    }
    Ok(hands)
}

fn validate_options(options: &DetectorOptions) -> Result<(), SessionError> {
    if options.num_hands == 0 {
        return Err(SessionError::NoHands);
    }
    let base = &options.base_options;
    for path in [&base.model_asset_path, &base.palm_model_asset_path] {
        let path = path.to_string_lossy();
        if path.contains("://") {
            return Err(SessionError::RemoteModel(path.into_owned()));
        }
    }
    Ok(())
}

fn check_timestamp(last: Option<Timestamp>, timestamp: Timestamp) -> Result<(), SessionError> {
    match last {
        Some(last) if timestamp <= last => {
            Err(SessionError::NonMonotonicTimestamp { timestamp, last })
        }
        _ => Ok(()),
    }
}

/// Turns raw network outputs into normalized frame coordinates.
///
/// The network reports landmarks in pixels of its input resolution, for the `roi` region of a
/// frame of size `frame_res`. Returns `None` if the presence score is below the threshold.
fn extract(
    outputs: &Outputs,
    roi: Rect,
    input_res: Resolution,
    frame_res: Resolution,
) -> anyhow::Result<Option<Vec<[f32; 3]>>> {
    let screen_landmarks = outputs.get(0)?;
    let presence = outputs.get(1)?.as_singular()?;
    ensure!(
        screen_landmarks.as_slice().len() == NUM_HAND_LANDMARKS * 3,
        "unexpected landmark output shape {:?}",
        screen_landmarks.shape(),
    );
    if let Ok(handedness) = outputs.get(2).and_then(|t| t.as_singular()) {
        log::trace!("presence={presence:.3}, handedness={handedness:.3}");
    }

    if presence < PRESENCE_THRESHOLD {
        return Ok(None);
    }

    let scale_x = roi.width() as f32 / input_res.width() as f32;
    let scale_y = roi.height() as f32 / input_res.height() as f32;
    let (frame_w, frame_h) = (frame_res.width() as f32, frame_res.height() as f32);
    let landmarks = screen_landmarks
        .as_slice()
        .chunks_exact(3)
        .map(|lm| {
            [
                (lm[0] * scale_x + roi.x() as f32) / frame_w,
                (lm[1] * scale_y + roi.y() as f32) / frame_h,
                lm[2] * scale_x / frame_w,
            ]
        })
        .collect();
    Ok(Some(landmarks))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::nn::Tensor;
    use crate::palm::tests::palm_at;

    fn options() -> DetectorOptions {
        DetectorOptions {
            base_options: BaseOptions {
                model_asset_path: "models/hand_landmark_full.onnx".into(),
                palm_model_asset_path: "models/palm_detection_full.onnx".into(),
                delegate: Delegate::Cpu,
            },
            running_mode: RunningMode::Video,
            num_hands: 2,
        }
    }

    fn outputs(landmark: [f32; 3], presence: f32) -> Outputs {
        let screen = landmark.repeat(NUM_HAND_LANDMARKS);
        Outputs::new(vec![
            Tensor::new(vec![1, 63], screen).unwrap(),
            Tensor::new(vec![1, 1], vec![presence]).unwrap(),
            Tensor::new(vec![1, 1], vec![0.9]).unwrap(),
        ])
    }

    #[test]
    fn parse_delegate() {
        assert_eq!("gpu".parse::<Delegate>().unwrap(), Delegate::Gpu);
        assert_eq!("Cpu".parse::<Delegate>().unwrap(), Delegate::Cpu);
        assert!("npu".parse::<Delegate>().is_err());
        assert_eq!(Delegate::Gpu.to_string(), "gpu");
    }

    #[test]
    fn rejects_invalid_options() {
        assert_eq!(validate_options(&options()), Ok(()));

        let mut opts = options();
        opts.num_hands = 0;
        assert_eq!(validate_options(&opts), Err(SessionError::NoHands));

        let mut opts = options();
        opts.base_options.model_asset_path = "https://example.com/hand_landmarker.task".into();
        assert!(matches!(
            validate_options(&opts),
            Err(SessionError::RemoteModel(_))
        ));
        assert!(HandLandmarker::create_from_options(opts).is_err());

        let mut opts = options();
        opts.base_options.palm_model_asset_path = "http://example.com/palm.onnx".into();
        assert!(matches!(
            validate_options(&opts),
            Err(SessionError::RemoteModel(_))
        ));
    }

    #[test]
    fn missing_model_is_an_error() {
        let mut opts = options();
        opts.base_options.model_asset_path = "/nonexistent/hand_landmark.onnx".into();
        assert!(HandLandmarker::create_from_options(opts).is_err());
    }

    #[test]
    fn timestamps_must_increase() {
        let ts = Timestamp::from_millis;
        assert_eq!(check_timestamp(None, ts(0)), Ok(()));
        assert_eq!(check_timestamp(Some(ts(5)), ts(6)), Ok(()));
        assert_eq!(
            check_timestamp(Some(ts(5)), ts(5)),
            Err(SessionError::NonMonotonicTimestamp {
                timestamp: ts(5),
                last: ts(5)
            })
        );
        assert!(check_timestamp(Some(ts(5)), ts(4)).is_err());
    }

    #[test]
    fn low_presence_yields_no_hand() {
        let res = Resolution::new(640, 480);
        let hand = extract(
            &outputs([1.0, 2.0, 3.0], 0.1),
            Rect::from_top_left(80, 0, 480, 480),
            Resolution::new(224, 224),
            res,
        )
        .unwrap();
        assert!(hand.is_none());
    }

    #[test]
    fn maps_back_to_frame_coordinates() {
        let res = Resolution::new(640, 480);
        let roi = Rect::from_top_left(80, 0, 480, 480);
        let hand = extract(
            &outputs([112.0, 56.0, 22.4], 0.9),
            roi,
            Resolution::new(224, 224),
            res,
        )
        .unwrap()
        .unwrap();

        assert_eq!(hand.len(), NUM_HAND_LANDMARKS);
        let [x, y, z] = hand[0];
        // Center of the 480x480 square, offset by 80 pixels.
        assert_relative_eq!(x, 0.5, epsilon = 1e-6);
        assert_relative_eq!(y, 0.25, epsilon = 1e-6);
        assert_relative_eq!(z, 22.4 * (480.0 / 224.0) / 640.0, epsilon = 1e-6);
    }

    #[test]
    fn malformed_outputs() {
        let res = Resolution::new(64, 64);
        let short = Outputs::new(vec![Tensor::new(vec![1, 3], vec![0.0; 3]).unwrap()]);
        assert!(extract(&short, Rect::from_top_left(80, 0, 480, 480), res, res).is_err());

        let wrong_count = Outputs::new(vec![
            Tensor::new(vec![1, 60], vec![0.0; 60]).unwrap(),
            Tensor::new(vec![1, 1], vec![1.0]).unwrap(),
        ]);
        assert!(extract(&wrong_count, Rect::from_top_left(80, 0, 480, 480), res, res).is_err());
    }

    /// Estimates a hand whose landmarks all sit at the top-left corner of the region.
    fn corner_hand(roi: Rect) -> anyhow::Result<Option<Vec<[f32; 3]>>> {
        Ok(Some(vec![
            [roi.x() as f32, roi.y() as f32, 0.0];
            NUM_HAND_LANDMARKS
        ]))
    }

    #[test]
    fn one_hand_per_palm_in_order() {
        let palms = [palm_at(100.0, 100.0, 0.9), palm_at(300.0, 200.0, 0.8)];
        let hands = landmark_palms(&palms, 2, corner_hand).unwrap();
        assert_eq!(hands.len(), 2);
        assert_eq!(hands[0][0], [74.0, 64.0, 0.0]);
        assert_eq!(hands[1][0], [274.0, 164.0, 0.0]);

        let result = DetectionResult::from_raw(hands).unwrap();
        assert_eq!(result.landmarks.len(), 2);
        assert_eq!(result.landmarks[0].landmarks()[0].x, 74.0);
        assert_eq!(result.landmarks[1].landmarks()[0].x, 274.0);
    }

    #[test]
    fn hands_are_limited_to_num_hands() {
        let palms = [palm_at(100.0, 100.0, 0.9), palm_at(300.0, 200.0, 0.8)];
        let mut calls = 0;
        let hands = landmark_palms(&palms, 1, |roi| {
            calls += 1;
            corner_hand(roi)
        })
        .unwrap();
        assert_eq!(hands.len(), 1);
        assert_eq!(hands[0][0], [74.0, 64.0, 0.0]);
        assert_eq!(calls, 1);
    }

    #[test]
    fn palms_without_hand_are_skipped() {
        let palms = [palm_at(100.0, 100.0, 0.9), palm_at(300.0, 200.0, 0.8)];
        let hands = landmark_palms(&palms, 2, |roi| {
            if roi.x() < 100 {
                Ok(None)
            } else {
                corner_hand(roi)
            }
        })
        .unwrap();
        assert_eq!(hands.len(), 1);
        assert_eq!(hands[0][0], [274.0, 164.0, 0.0]);

        let failing = landmark_palms(&palms, 2, |_| anyhow::bail!("inference failed"));
        assert!(failing.is_err());
    }
}
