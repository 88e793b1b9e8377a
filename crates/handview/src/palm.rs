//! Palm detection.
//!
//! Palms are much easier to find than whole hands, since they are rigid and roughly square. Each
//! detected palm is turned into a [`hand_region`] that the hand landmark network is run on.

use std::path::Path;

use anyhow::{ensure, Context};
use once_cell::sync::Lazy;

use crate::detection::{
    nms::NonMaxSuppression,
    sigmoid,
    ssd::{Anchor, Anchors, LayerInfo},
    BoundingRect, Detection, Keypoint,
};
use crate::image::{Image, Rect, Resolution};
use crate::nn::{Cnn, Outputs};
use crate::timer::Timer;

/// A keypoint of a palm [`Detection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PalmKeypoint {
    Wrist = 0,
    IndexFingerMcp = 1,
    MiddleFingerMcp = 2,
    RingFingerMcp = 3,
    PinkyMcp = 4,
    ThumbCmc = 5,
    ThumbMcp = 6,
}

const NUM_KEYPOINTS: usize = 7;

/// Box center, box size and keypoints, per anchor.
const BOX_PARAMS: usize = 4 + NUM_KEYPOINTS * 2;

/// Size of the hand region relative to the palm box.
const HAND_REGION_SCALE: f32 = 2.6;

/// How far the hand region is moved towards the fingers, relative to the palm box size.
const HAND_REGION_SHIFT: f32 = 0.5;

static ANCHORS: Lazy<Anchors> = Lazy::new(|| {
    Anchors::calculate(&[LayerInfo::new(2, 24, 24), LayerInfo::new(6, 12, 12)])
});

/// Finds palms in images with the MediaPipe palm detection network.
pub struct PalmDetector {
    cnn: Cnn,
    nms: NonMaxSuppression,
    threshold: f32,
    t_infer: Timer,
    t_extract: Timer,
    t_nms: Timer,
}

impl PalmDetector {
    pub const DEFAULT_THRESHOLD: f32 = 0.5;

    /// Loads the palm detection network from an `.onnx` file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let cnn = Cnn::from_path(path)
            .with_context(|| format!("failed to load palm detection model {}", path.display()))?;
        Self::new(cnn)
    }

    /// Wraps a loaded palm detection network, which has to take a square input.
    pub fn new(cnn: Cnn) -> anyhow::Result<Self> {
        let res = cnn.input_resolution();
        ensure!(
            res.width() == res.height(),
            "palm detection network must take a square input, not {res}"
        );
        Ok(Self {
            cnn,
            nms: NonMaxSuppression::new(),
            threshold: Self::DEFAULT_THRESHOLD,
            t_infer: Timer::new("palm infer"),
            t_extract: Timer::new("palm extract"),
            t_nms: Timer::new("nms"),
        })
    }

    /// Detects palms in `image`, most confident first, in image pixel coordinates.
    pub fn detect(&mut self, image: &Image) -> anyhow::Result<Vec<Detection>> {
        let input_res = self.cnn.input_resolution();

        // Pad the image to a square so that it is not distorted.
        let rect = image.resolution().enclosing_square();
        let outputs = self.t_infer.time(|| self.cnn.estimate(image, rect))?;
        let detections = self
            .t_extract
            .time(|| extract_outputs(input_res, &outputs, self.threshold))?;
        let mut detections = self.t_nms.time(|| self.nms.process(detections));

        let scale = rect.width() as f32 / input_res.width() as f32;
        for det in &mut detections {
            det.map(scale, rect.x() as f32, rect.y() as f32);
        }
        Ok(detections)
    }

    pub fn timers(&self) -> [&Timer; 3] {
        [&self.t_infer, &self.t_extract, &self.t_nms]
    }
}

/// Decodes all palms with a confidence of at least `threshold` from the raw network outputs.
///
/// Coordinates are in pixels of the network input.
fn extract_outputs(
    input_res: Resolution,
    outputs: &Outputs,
    threshold: f32,
) -> anyhow::Result<Vec<Detection>> {
    let num_anchors = ANCHORS.anchor_count();
    let boxes = outputs.get(0)?;
    let confidences = outputs.get(1)?;
    ensure!(
        boxes.as_slice().len() == num_anchors * BOX_PARAMS,
        "unexpected palm box output shape {:?}",
        boxes.shape(),
    );
    ensure!(
        confidences.as_slice().len() == num_anchors,
        "unexpected palm confidence output shape {:?}",
        confidences.shape(),
    );

    let detections = confidences
        .as_slice()
        .iter()
        .zip(boxes.as_slice().chunks_exact(BOX_PARAMS))
        .enumerate()
        .filter_map(|(index, (&raw, params))| {
            let confidence = sigmoid(raw);
            (confidence >= threshold)
                .then(|| extract_detection(&ANCHORS[index], input_res, params, confidence))
        })
        .collect();
    Ok(detections)
}

fn extract_detection(
    anchor: &Anchor,
    input_res: Resolution,
    params: &[f32],
    confidence: f32,
) -> Detection {
    let x_offset = anchor.x_center() * input_res.width() as f32;
    let y_offset = anchor.y_center() * input_res.height() as f32;

    let rect = BoundingRect::from_center(
        params[0] + x_offset,
        params[1] + y_offset,
        params[2],
        params[3],
    );
    let keypoints = params[4..]
        .chunks_exact(2)
        .map(|xy| Keypoint::new(xy[0] + x_offset, xy[1] + y_offset))
        .collect();
    Detection::with_keypoints(confidence, rect, keypoints)
}

/// Computes the image region to run the hand landmark network on for a detected palm.
///
/// The region is a square around the palm, enlarged to fit the fingers and moved from the wrist
/// towards the middle finger.
pub fn hand_region(palm: &Detection) -> Rect {
    let rect = palm.bounding_rect();
    let size = rect.width().max(rect.height());

    let keypoints = palm.keypoints();
    let wrist = keypoints.get(PalmKeypoint::Wrist as usize);
    let finger = keypoints.get(PalmKeypoint::MiddleFingerMcp as usize);
    // Fingers point up if the keypoints are unusable.
    let (dx, dy) = match (wrist, finger) {
        (Some(wrist), Some(finger)) => {
            let (dx, dy) = (finger.x() - wrist.x(), finger.y() - wrist.y());
            let len = dx.hypot(dy);
            if len > f32::EPSILON {
                (dx / len, dy / len)
            } else {
                (0.0, -1.0)
            }
        }
        _ => (0.0, -1.0),
    };

    BoundingRect::from_center(
        rect.x_center() + dx * HAND_REGION_SHIFT * size,
        rect.y_center() + dy * HAND_REGION_SHIFT * size,
        size * HAND_REGION_SCALE,
        size * HAND_REGION_SCALE,
    )
    .to_pixel_rect()
}

#[cfg(test)]
pub(crate) mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::nn::Tensor;

    /// A palm centered at `(x, y)` with the fingers pointing up.
    pub(crate) fn palm_at(x: f32, y: f32, confidence: f32) -> Detection {
        let mut keypoints = vec![Keypoint::new(x, y); NUM_KEYPOINTS];
        keypoints[PalmKeypoint::Wrist as usize] = Keypoint::new(x, y + 10.0);
        keypoints[PalmKeypoint::MiddleFingerMcp as usize] = Keypoint::new(x, y - 10.0);
        Detection::with_keypoints(
            confidence,
            BoundingRect::from_center(x, y, 20.0, 20.0),
            keypoints,
        )
    }

    /// Raw network outputs with palms at the given anchor indices and raw scores.
    fn raw_outputs(palms: &[(usize, f32)]) -> Outputs {
        let num_anchors = ANCHORS.anchor_count();
        let mut boxes = vec![0.0; num_anchors * BOX_PARAMS];
        let mut scores = vec![-10.0; num_anchors];
        for &(index, score) in palms {
            scores[index] = score;
            let params = &mut boxes[index * BOX_PARAMS..][..BOX_PARAMS];
            params[2] = 20.0;
            params[3] = 20.0;
            params[5] = 10.0;
            params[9] = -10.0;
        }
        Outputs::new(vec![
            Tensor::new(vec![1, num_anchors, BOX_PARAMS], boxes).unwrap(),
            Tensor::new(vec![1, num_anchors, 1], scores).unwrap(),
        ])
    }

    #[test]
    fn anchor_count() {
        assert_eq!(ANCHORS.anchor_count(), 2016);
    }

    #[test]
    fn extracts_palms_above_threshold() {
        let input_res = Resolution::new(192, 192);
        let last = ANCHORS.anchor_count() - 1;
        let outputs = raw_outputs(&[(0, 3.0), (last, 5.0)]);

        let detections = extract_outputs(input_res, &outputs, 0.5).unwrap();
        assert_eq!(detections.len(), 2);

        // First anchor: cell (0, 0) of the 24x24 layer.
        let first = &detections[0];
        assert_relative_eq!(first.bounding_rect().x_center(), 4.0, epsilon = 1e-4);
        assert_relative_eq!(first.bounding_rect().y_center(), 4.0, epsilon = 1e-4);
        assert_eq!(first.keypoints().len(), NUM_KEYPOINTS);
        assert_relative_eq!(first.keypoints()[0].x(), 4.0, epsilon = 1e-4);
        assert_relative_eq!(first.keypoints()[0].y(), 14.0, epsilon = 1e-4);

        // Last anchor: cell (11, 11) of the 12x12 layer.
        let second = &detections[1];
        assert_relative_eq!(second.bounding_rect().x_center(), 184.0, epsilon = 1e-3);

        let sorted = NonMaxSuppression::new().process(detections);
        assert_eq!(sorted.len(), 2);
        assert!(sorted[0].confidence() > sorted[1].confidence());
        assert_relative_eq!(sorted[0].bounding_rect().x_center(), 184.0, epsilon = 1e-3);
    }

    #[test]
    fn rejects_malformed_outputs() {
        let res = Resolution::new(192, 192);
        let short = Outputs::new(vec![
            Tensor::new(vec![1, 18], vec![0.0; 18]).unwrap(),
            Tensor::new(vec![1, 1], vec![0.0]).unwrap(),
        ]);
        assert!(extract_outputs(res, &short, 0.5).is_err());
        assert!(extract_outputs(res, &Outputs::new(Vec::new()), 0.5).is_err());
    }

    #[test]
    fn hand_region_extends_towards_fingers() {
        let region = hand_region(&palm_at(100.0, 100.0, 1.0));
        // 20 * 2.6 = 52 pixels, centered 10 pixels above the palm.
        assert_eq!(region, Rect::from_top_left(74, 64, 52, 52));

        // Degenerate keypoints fall back to upright fingers.
        let degenerate = Detection::with_keypoints(
            1.0,
            BoundingRect::from_center(100.0, 100.0, 20.0, 20.0),
            vec![Keypoint::new(100.0, 100.0); NUM_KEYPOINTS],
        );
        assert_eq!(hand_region(&degenerate), region);

        // Fingers pointing right.
        let mut keypoints = vec![Keypoint::new(100.0, 100.0); NUM_KEYPOINTS];
        keypoints[PalmKeypoint::Wrist as usize] = Keypoint::new(90.0, 100.0);
        keypoints[PalmKeypoint::MiddleFingerMcp as usize] = Keypoint::new(110.0, 100.0);
        let sideways = Detection::with_keypoints(
            1.0,
            BoundingRect::from_center(100.0, 100.0, 20.0, 20.0),
            keypoints,
        );
        assert_eq!(hand_region(&sideways), Rect::from_top_left(84, 74, 52, 52));
    }
}
