//! Hand landmarks and detection results.

use std::fmt;

/// Number of landmarks estimated for every hand.
pub const NUM_HAND_LANDMARKS: usize = 21;

/// A point on a detected hand.
///
/// `x` and `y` are normalized to the frame (0.0 to 1.0, Y pointing down). `z` is the depth
/// relative to the wrist, in roughly the same scale as `x`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f32; 3]> for Landmark {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

/// Names for the hand landmarks.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm of
///   the hand.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: This landmark is just placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// A skeletal edge between two landmarks.
pub type Connection = (LandmarkIdx, LandmarkIdx);

/// The hand skeleton: palm outline, then thumb and fingers from base to tip.
pub const HAND_CONNECTIONS: &[Connection] = {
    use LandmarkIdx::*;
    &[
        // Surround the palm:
        (Wrist, ThumbCmc),
        (ThumbCmc, IndexFingerMcp),
        (IndexFingerMcp, MiddleFingerMcp),
        (MiddleFingerMcp, RingFingerMcp),
        (RingFingerMcp, PinkyMcp),
        (PinkyMcp, Wrist),
        // Thumb:
        (ThumbCmc, ThumbMcp),
        (ThumbMcp, ThumbIp),
        (ThumbIp, ThumbTip),
        // Index:
        (IndexFingerMcp, IndexFingerPip),
        (IndexFingerPip, IndexFingerDip),
        (IndexFingerDip, IndexFingerTip),
        // Middle:
        (MiddleFingerMcp, MiddleFingerPip),
        (MiddleFingerPip, MiddleFingerDip),
        (MiddleFingerDip, MiddleFingerTip),
        // Ring:
        (RingFingerMcp, RingFingerPip),
        (RingFingerPip, RingFingerDip),
        (RingFingerDip, RingFingerTip),
        // Pinky:
        (PinkyMcp, PinkyPip),
        (PinkyPip, PinkyDip),
        (PinkyDip, PinkyTip),
    ]
};

/// The landmarks of a single detected hand.
///
/// Always contains exactly [`NUM_HAND_LANDMARKS`] landmarks with finite coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct HandLandmarks {
    landmarks: Box<[Landmark]>,
}

impl HandLandmarks {
    /// Validates and wraps a list of landmarks.
    pub fn new<I>(landmarks: I) -> Result<Self, InvalidResult>
    where
        I: IntoIterator,
        I::Item: Into<Landmark>,
    {
        let landmarks: Box<[Landmark]> = landmarks.into_iter().map(Into::into).collect();
        if landmarks.len() != NUM_HAND_LANDMARKS {
            return Err(InvalidResult::LandmarkCount {
                count: landmarks.len(),
            });
        }
        if let Some(index) = landmarks.iter().position(|lm| !lm.is_finite()) {
            return Err(InvalidResult::NonFinite { index });
        }
        Ok(Self { landmarks })
    }

    #[inline]
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    #[inline]
    pub fn get(&self, idx: LandmarkIdx) -> Landmark {
        self.landmarks[idx as usize]
    }
}

/// Hands found in one video frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionResult {
    /// One entry per detected hand.
    pub landmarks: Vec<HandLandmarks>,
}

impl DetectionResult {
    /// A result without any hands.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validates raw per-hand landmark lists, as produced by a landmark network.
    pub fn from_raw<H, L>(hands: H) -> Result<Self, InvalidResult>
    where
        H: IntoIterator<Item = L>,
        L: IntoIterator,
        L::Item: Into<Landmark>,
    {
        let landmarks = hands
            .into_iter()
            .map(HandLandmarks::new)
            .collect::<Result<_, _>>()?;
        Ok(Self { landmarks })
    }

    #[inline]
    pub fn hands(&self) -> &[HandLandmarks] {
        &self.landmarks
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
}

impl fmt::Display for DetectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.landmarks.len() {
            1 => f.write_str("1 hand"),
            n => write!(f, "{n} hands"),
        }
    }
}

/// A detection result that violates the landmark invariants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidResult {
    #[error("expected {expected} landmarks per hand, got {count}", expected = NUM_HAND_LANDMARKS)]
    LandmarkCount { count: usize },
    #[error("landmark {index} has a non-finite coordinate")]
    NonFinite { index: usize },
}
