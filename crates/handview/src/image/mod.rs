//! Image manipulation.
//!
//! This module provides:
//!
//! - The [`Image`] type, an owned RGBA image.
//! - [`Resolution`] and [`Rect`] to describe image sizes and areas.
//! - A handful of [`draw`] functions used to render landmark overlays.

pub mod draw;
mod jpeg;
mod resolution;


use std::{fmt, ops::Index, path::Path};

use embedded_graphics::{pixelcolor::raw::RawU32, prelude::PixelColor};
use image::{ImageBuffer, Rgba, RgbaImage};

pub use resolution::*;

/// An 8-bit sRGB image with alpha channel.
#[derive(Clone)]
pub struct Image {
    // RGBA8 so that the GUI can upload it to a texture without conversion.
    pub(crate) buf: RgbaImage,
}

impl Image {
    /// Loads a JPEG or PNG image from the filesystem.
    pub fn load<A: AsRef<Path>>(path: A) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("jpg" | "jpeg") => Self::decode_jpeg(&data),
            Some("png") => {
                let buf =
                    image::load_from_memory_with_format(&data, image::ImageFormat::Png)?.to_rgba8();
                Ok(Self { buf })
            }
            _ => anyhow::bail!(
                "invalid image path '{}' (must have one of the supported extensions)",
                path.display()
            ),
        }
    }

    /// Decodes a JFIF JPEG or Motion JPEG from a byte slice.
    pub fn decode_jpeg(data: &[u8]) -> anyhow::Result<Self> {
        jpeg::decode_jpeg(data)
    }

    /// Creates an image from raw RGBA8 pixel data.
    ///
    /// # Panics
    ///
    /// Panics if `buf` does not contain exactly `4 * width * height` bytes.
    pub fn from_rgba8(res: Resolution, buf: &[u8]) -> Self {
        let expected_size = res.num_pixels() as usize * 4;
        assert_eq!(
            expected_size,
            buf.len(),
            "incorrect buffer size {} for {} image (expected {} bytes)",
            buf.len(),
            res,
            expected_size,
        );

        Self {
            buf: ImageBuffer::from_vec(res.width(), res.height(), buf.to_vec())
                .expect("buffer size does not match image resolution"),
        }
    }

    /// Creates an empty image of a specified size.
    ///
    /// The image will start out black and fully transparent.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buf: ImageBuffer::new(width, height),
        }
    }

    /// Creates an image of the given size with every pixel set to `color`.
    pub fn filled(res: Resolution, color: Color) -> Self {
        Self {
            buf: ImageBuffer::from_pixel(res.width(), res.height(), Rgba(color.0)),
        }
    }

    /// Returns the width of this image, in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    /// Returns the height of this image, in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    /// Returns the size of this image.
    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Returns a [`Rect`] covering this image.
    #[inline]
    pub fn rect(&self) -> Rect {
        Rect::from_top_left(0, 0, self.width(), self.height())
    }

    /// Gets the image color at the given pixel coordinates.
    ///
    /// # Panics
    ///
    /// This will panic if `(x, y)` is outside the bounds of this image.
    pub fn get(&self, x: u32, y: u32) -> Color {
        Color(self.buf[(x, y)].0)
    }

    /// Sets the image color at the given pixel coordinates.
    ///
    /// # Panics
    ///
    /// This will panic if `(x, y)` is outside the bounds of this image.
    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        self.buf[(x, y)] = Rgba(color.0);
    }

    /// Clears the image, setting every pixel value to `color`.
    pub fn clear(&mut self, color: Color) {
        self.buf.pixels_mut().for_each(|pix| pix.0 = color.0);
    }

    /// Alpha-blends `overlay` on top of `self`.
    ///
    /// Both images must have the same resolution.
    pub fn blend_over(&mut self, overlay: &Image) {
        assert_eq!(
            self.resolution(),
            overlay.resolution(),
            "overlay resolution must match the destination"
        );

        for (dest, src) in self.buf.pixels_mut().zip(overlay.buf.pixels()) {
            let alpha = u32::from(src.0[3]);
            match alpha {
                0 => {}
                255 => *dest = *src,
                _ => {
                    for c in 0..3 {
                        let s = u32::from(src.0[c]);
                        let d = u32::from(dest.0[c]);
                        dest.0[c] = ((s * alpha + d * (255 - alpha) + 127) / 255) as u8;
                    }
                    let da = u32::from(dest.0[3]);
                    dest.0[3] = (alpha + (da * (255 - alpha) + 127) / 255) as u8;
                }
            }
        }
    }

    /// Samples the pixel nearest to the relative position `(u, v)` within `rect`.
    ///
    /// `u` and `v` range from 0.0 to 1.0. Positions outside of the image yield [`Color::NONE`].
    pub fn sample(&self, rect: Rect, u: f32, v: f32) -> Color {
        let x = rect.x() as f32 + u * rect.width() as f32;
        let y = rect.y() as f32 + v * rect.height() as f32;
        let (x, y) = (x.floor() as i64, y.floor() as i64);
        if x < 0 || y < 0 || x >= i64::from(self.width()) || y >= i64::from(self.height()) {
            return Color::NONE;
        }
        self.get(x as u32, y as u32)
    }

    /// Returns the raw RGBA8 pixel data of this image.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.buf.as_raw()
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} Image", self.width(), self.height())
    }
}

/// An 8-bit RGBA color.
///
/// Colors are always in the sRGB color space and use non-premultiplied alpha.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Color(pub(crate) [u8; 4]);

impl Color {
    /// Fully transparent black (all components are 0).
    pub const NONE: Self = Self([0, 0, 0, 0]);
    pub const BLACK: Self = Self([0, 0, 0, 255]);
    pub const WHITE: Self = Self([255, 255, 255, 255]);
    pub const RED: Self = Self([255, 0, 0, 255]);
    pub const GREEN: Self = Self([0, 255, 0, 255]);
    pub const BLUE: Self = Self([0, 0, 255, 255]);

    #[inline]
    pub const fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    #[inline]
    pub const fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self([r, g, b, a])
    }

    #[inline]
    pub fn r(&self) -> u8 {
        self.0[0]
    }

    #[inline]
    pub fn g(&self) -> u8 {
        self.0[1]
    }

    #[inline]
    pub fn b(&self) -> u8 {
        self.0[2]
    }

    #[inline]
    pub fn a(&self) -> u8 {
        self.0[3]
    }

    pub fn with_alpha(mut self, a: u8) -> Color {
        self.0[3] = a;
        self
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02x}{:02x}{:02x}{:02x}",
            self.r(),
            self.g(),
            self.b(),
            self.a(),
        )
    }
}

impl Index<usize> for Color {
    type Output = u8;

    #[inline]
    fn index(&self, index: usize) -> &u8 {
        &self.0[index]
    }
}

impl PixelColor for Color {
    type Raw = RawU32;
}
