//! Non-Maximum Suppression and Averaging.
//!
//! SSD networks report every object several times, from neighboring anchors. Non-Maximum
//! Suppression keeps only the most confident detection of each overlapping group
//! ([`SuppressionMode::Remove`]). Non-Maximum Averaging instead merges the group into a
//! confidence-weighted average ([`SuppressionMode::Average`]), which jitters less from frame to
//! frame and is the default.

use super::{BoundingRect, Detection, Keypoint};

/// A non-maximum suppression algorithm.
pub struct NonMaxSuppression {
    iou_thresh: f32,
    mode: SuppressionMode,
}

impl NonMaxSuppression {
    /// The default intersection-over-union threshold above which two detections overlap.
    pub const DEFAULT_IOU_THRESH: f32 = 0.3;

    pub fn new() -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
            mode: SuppressionMode::Average,
        }
    }

    pub fn set_iou_thresh(&mut self, iou_thresh: f32) {
        self.iou_thresh = iou_thresh;
    }

    pub fn set_mode(&mut self, mode: SuppressionMode) {
        self.mode = mode;
    }

    /// Filters `detections`, returning one detection per object, most confident first.
    pub fn process(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
        // Ascending, so that the most confident detection can be popped off the back.
        detections.sort_unstable_by(|a, b| a.confidence().total_cmp(&b.confidence()));

        let mut out = Vec::new();
        while let Some(seed) = detections.pop() {
            let (overlapping, rest): (Vec<_>, Vec<_>) =
                detections.into_iter().partition(|other| {
                    seed.bounding_rect().iou(&other.bounding_rect()) >= self.iou_thresh
                });
            detections = rest;

            match self.mode {
                SuppressionMode::Remove => out.push(seed),
                SuppressionMode::Average => out.push(average(seed, &overlapping)),
            }
        }
        out
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new()
    }
}

/// Describes how [`NonMaxSuppression`] deals with overlapping detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionMode {
    /// Keep only the detection with the highest confidence.
    Remove,
    /// Compute a confidence-weighted average of overlapping detections.
    Average,
}

/// Averages `seed` with `others`, weighted by confidence. The result keeps `seed`'s confidence.
fn average(seed: Detection, others: &[Detection]) -> Detection {
    if others.is_empty() {
        return seed;
    }

    let mut keypoints = vec![(0.0, 0.0); seed.keypoints().len()];
    let (mut x, mut y, mut w, mut h) = (0.0, 0.0, 0.0, 0.0);
    let mut divisor = 0.0;
    for det in std::iter::once(&seed).chain(others) {
        let factor = det.confidence();
        divisor += factor;
        for (acc, kp) in keypoints.iter_mut().zip(det.keypoints()) {
            acc.0 += kp.x() * factor;
            acc.1 += kp.y() * factor;
        }
        let rect = det.bounding_rect();
        x += rect.x_center() * factor;
        y += rect.y_center() * factor;
        w += rect.width() * factor;
        h += rect.height() * factor;
    }
    if divisor <= 0.0 {
        return seed;
    }

    Detection::with_keypoints(
        seed.confidence(),
        BoundingRect::from_center(x / divisor, y / divisor, w / divisor, h / divisor),
        keypoints
            .into_iter()
            .map(|(x, y)| Keypoint::new(x / divisor, y / divisor))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_suppresses_non_maximum() {
        let mut nms = NonMaxSuppression::new();
        nms.set_mode(SuppressionMode::Remove);

        let rect = BoundingRect::from_center(0.0, 0.0, 1.0, 1.0);
        let a = Detection::new(0.6, rect);
        let b = Detection::new(0.55, rect.scale(1.5));
        let detections = nms.process(vec![b, a]);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence(), 0.6);
        assert_eq!(detections[0].bounding_rect(), rect);
    }

    #[test]
    fn nms_ignores_nonoverlapping() {
        let nms = NonMaxSuppression::new();
        let a = Detection::new(0.7, BoundingRect::from_center(0.0, 0.0, 1.0, 1.0));
        let b = Detection::new(0.9, BoundingRect::from_center(5.0, 0.0, 1.0, 1.0));

        let detections = nms.process(vec![a, b]);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].confidence(), 0.9);
        assert_eq!(detections[1].confidence(), 0.7);
    }

    #[test]
    fn nma_averages_detections() {
        let mut nms = NonMaxSuppression::new();
        nms.set_iou_thresh(0.0);

        let rect = BoundingRect::from_center(-1.0, 3.0, 1.0, 1.0);
        let a = Detection::with_keypoints(1.0, rect, vec![Keypoint::new(0.0, 0.0)]);
        let b = Detection::with_keypoints(0.5, rect.scale(4.0), vec![Keypoint::new(3.0, 6.0)]);
        let detections = nms.process(vec![a, b]);
        assert_eq!(detections.len(), 1);

        let d = &detections[0];
        assert_eq!(d.confidence(), 1.0);
        assert_eq!(
            d.bounding_rect(),
            BoundingRect::from_center(-1.0, 3.0, 2.0, 2.0)
        );
        assert_eq!(d.keypoints(), [Keypoint::new(1.0, 2.0)]);
    }
}
