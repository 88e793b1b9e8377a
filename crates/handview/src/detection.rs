//! Object detection building blocks: detections, SSD anchors and non-maximum suppression.

pub mod nms;
pub mod ssd;

use crate::image::Rect;

/// An axis-aligned rectangle with sub-pixel precision, used for detection boxes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingRect {
    x_center: f32,
    y_center: f32,
    width: f32,
    height: f32,
}

impl BoundingRect {
    /// Creates a rectangle extending outwards from a center point.
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            x_center,
            y_center,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    #[inline]
    pub fn x_center(&self) -> f32 {
        self.x_center
    }

    #[inline]
    pub fn y_center(&self) -> f32 {
        self.y_center
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Scales width and height by `scale`, keeping the center in place.
    #[must_use]
    pub fn scale(&self, scale: f32) -> Self {
        Self::from_center(
            self.x_center,
            self.y_center,
            self.width * scale,
            self.height * scale,
        )
    }

    #[must_use]
    pub fn move_by(&self, dx: f32, dy: f32) -> Self {
        Self::from_center(self.x_center + dx, self.y_center + dy, self.width, self.height)
    }

    fn intersection_area(&self, other: &Self) -> f32 {
        let left = (self.x_center - self.width * 0.5).max(other.x_center - other.width * 0.5);
        let right = (self.x_center + self.width * 0.5).min(other.x_center + other.width * 0.5);
        let top = (self.y_center - self.height * 0.5).max(other.y_center - other.height * 0.5);
        let bottom = (self.y_center + self.height * 0.5).min(other.y_center + other.height * 0.5);
        if left > right || top > bottom {
            return 0.0;
        }
        (right - left) * (bottom - top)
    }

    /// Computes the Intersection over Union (IOU) of `self` and `other`.
    ///
    /// Two empty rectangles have an IOU of 0.0.
    pub fn iou(&self, other: &Self) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Rounds this rectangle to whole pixels.
    pub fn to_pixel_rect(&self) -> Rect {
        Rect::from_top_left(
            (self.x_center - self.width * 0.5).round() as i32,
            (self.y_center - self.height * 0.5).round() as i32,
            self.width.round() as u32,
            self.height.round() as u32,
        )
    }
}

/// A 2D keypoint produced as part of a [`Detection`].
///
/// The meaning of a keypoint depends on the detector and on its index in the keypoint list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    x: f32,
    y: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }
}

/// A detected object.
///
/// Consists of a [`BoundingRect`] enclosing the object, a confidence value between 0.0 and 1.0,
/// and a possibly empty set of keypoints.
#[derive(Debug, Clone)]
pub struct Detection {
    confidence: f32,
    rect: BoundingRect,
    keypoints: Vec<Keypoint>,
}

impl Detection {
    pub fn new(confidence: f32, rect: BoundingRect) -> Self {
        Self::with_keypoints(confidence, rect, Vec::new())
    }

    pub fn with_keypoints(confidence: f32, rect: BoundingRect, keypoints: Vec<Keypoint>) -> Self {
        Self {
            confidence,
            rect,
            keypoints,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bounding_rect(&self) -> BoundingRect {
        self.rect
    }

    pub fn set_bounding_rect(&mut self, rect: BoundingRect) {
        self.rect = rect;
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// Scales all coordinates by `scale`, then moves them by `(dx, dy)`.
    ///
    /// Used to map a detection from a network's input space back into the image.
    pub fn map(&mut self, scale: f32, dx: f32, dy: f32) {
        let r = self.rect;
        self.rect = BoundingRect::from_center(
            r.x_center() * scale + dx,
            r.y_center() * scale + dy,
            r.width() * scale,
            r.height() * scale,
        );
        for kp in &mut self.keypoints {
            kp.x = kp.x * scale + dx;
            kp.y = kp.y * scale + dy;
        }
    }
}

/// The logistic function, mapping raw network scores to confidences.
pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}
