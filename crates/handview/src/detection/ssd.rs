//! Anchor generation for Single Shot MultiBox Detectors (SSDs).
//!
//! Only supports the fixed-size anchors used by the palm detection network.

use std::ops::Index;

use crate::image::Resolution;

/// An anchor of an SSD network, in relative coordinates from 0.0 to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    x_center: f32,
    y_center: f32,
}

impl Anchor {
    pub fn x_center(&self) -> f32 {
        self.x_center
    }

    pub fn y_center(&self) -> f32 {
        self.y_center
    }
}

/// Describes an output layer of an SSD network.
pub struct LayerInfo {
    /// Number of anchors per feature map cell.
    boxes_per_cell: u32,
    /// Feature map resolution of this layer.
    resolution: Resolution,
}

impl LayerInfo {
    /// Creates a layer with `boxes_per_cell` anchors in each cell of a `width x height` feature
    /// map.
    pub const fn new(boxes_per_cell: u32, width: u32, height: u32) -> Self {
        Self {
            boxes_per_cell,
            resolution: Resolution::new(width, height),
        }
    }
}

/// The anchors of all output layers, in output order.
pub struct Anchors {
    anchors: Vec<Anchor>,
}

impl Anchors {
    pub fn calculate(layers: &[LayerInfo]) -> Self {
        let mut anchors = Vec::new();

        for layer in layers {
            let (width, height) = (layer.resolution.width(), layer.resolution.height());
            for y in 0..height {
                for x in 0..width {
                    let x_center = (x as f32 + 0.5) / width as f32;
                    let y_center = (y as f32 + 0.5) / height as f32;
                    for _ in 0..layer.boxes_per_cell {
                        anchors.push(Anchor { x_center, y_center });
                    }
                }
            }
        }

        Self { anchors }
    }

    /// Returns the total number of anchors.
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }
}

impl Index<usize> for Anchors {
    type Output = Anchor;

    fn index(&self, index: usize) -> &Anchor {
        &self.anchors[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_layout() {
        let anchors = Anchors::calculate(&[LayerInfo::new(2, 2, 2), LayerInfo::new(1, 1, 1)]);
        assert_eq!(anchors.anchor_count(), 9);
        assert_eq!(anchors[0], anchors[1]);
        assert_eq!(anchors[0].x_center(), 0.25);
        assert_eq!(anchors[2].x_center(), 0.75);
        assert_eq!(anchors[4].y_center(), 0.75);
        assert_eq!(anchors[8].x_center(), 0.5);
    }
}
