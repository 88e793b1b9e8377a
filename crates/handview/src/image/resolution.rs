use std::fmt;

/// Width and height of an image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    /// 1080p resolution: `1920x1080`
    pub const RES_1080P: Self = Self {
        width: 1920,
        height: 1080,
    };

    /// 720p resolution: `1280x720`
    pub const RES_720P: Self = Self {
        width: 1280,
        height: 720,
    };

    /// VGA resolution: `640x480`
    pub const RES_VGA: Self = Self {
        width: 640,
        height: 480,
    };

    /// Creates a new [`Resolution`] of `width x height`.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns the width of this [`Resolution`].
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the height of this [`Resolution`].
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn num_pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Returns the smallest square [`Rect`] that contains an image of this resolution, centered on
    /// it.
    ///
    /// The part of the square that lies outside of the image is black when sampled.
    pub fn enclosing_square(&self) -> Rect {
        let side = self.width.max(self.height);
        Rect::from_top_left(
            -(((side - self.width) / 2) as i32),
            -(((side - self.height) / 2) as i32),
            side,
            side,
        )
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
}

impl Rect {
    /// Creates a rectangle from its top left corner and its size.
    pub const fn from_top_left(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub fn x(&self) -> i32 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> i32 {
        self.y
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }
}
