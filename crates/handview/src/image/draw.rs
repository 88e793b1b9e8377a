//! Drawing primitives for visualizing landmarks.
//!
//! Every function returns a guard object that can be used to customize the drawn shape. The shape
//! is drawn when the guard is dropped.

use std::convert::Infallible;

use embedded_graphics::{
    draw_target::DrawTarget,
    prelude::*,
    primitives::{Circle, Line, PrimitiveStyleBuilder, Rectangle},
};

use super::{Color, Image};

/// Guard returned by [`line`]; draws the line when dropped and allows customization.
pub struct DrawLine<'a> {
    image: &'a mut Image,
    start: Point,
    end: Point,
    color: Color,
    stroke_width: u32,
}

impl DrawLine<'_> {
    /// Sets the line's color.
    pub fn color(&mut self, color: Color) -> &mut Self {
        self.color = color;
        self
    }

    /// Sets the line's stroke width.
    ///
    /// By default, a stroke width of 1 is used.
    pub fn stroke_width(&mut self, width: u32) -> &mut Self {
        self.stroke_width = width;
        self
    }
}

impl Drop for DrawLine<'_> {
    fn drop(&mut self) {
        let style = PrimitiveStyleBuilder::new()
            .stroke_color(self.color)
            .stroke_width(self.stroke_width)
            .build();
        match Line::new(self.start, self.end)
            .into_styled(style)
            .draw(&mut Target(&mut *self.image))
        {
            Ok(()) => {}
            Err(infallible) => match infallible {},
        }
    }
}

/// Guard returned by [`circle`]; draws the circle when dropped and allows customization.
pub struct DrawCircle<'a> {
    image: &'a mut Image,
    center: Point,
    diameter: u32,
    stroke_width: u32,
    color: Color,
    fill: Option<Color>,
}

impl DrawCircle<'_> {
    /// Sets the circle's outline color.
    pub fn color(&mut self, color: Color) -> &mut Self {
        self.color = color;
        self
    }

    /// Sets the circle's stroke width.
    ///
    /// By default, a stroke width of 1 is used.
    pub fn stroke_width(&mut self, width: u32) -> &mut Self {
        self.stroke_width = width;
        self
    }

    /// Fills the inside of the circle with `color`.
    ///
    /// By default, circles are not filled.
    pub fn fill(&mut self, color: Color) -> &mut Self {
        self.fill = Some(color);
        self
    }
}

impl Drop for DrawCircle<'_> {
    fn drop(&mut self) {
        let mut style = PrimitiveStyleBuilder::new()
            .stroke_color(self.color)
            .stroke_width(self.stroke_width);
        if let Some(fill) = self.fill {
            style = style.fill_color(fill);
        }
        match Circle::with_center(self.center, self.diameter)
            .into_styled(style.build())
            .draw(&mut Target(&mut *self.image))
        {
            Ok(()) => {}
            Err(infallible) => match infallible {},
        }
    }
}

/// Draws a line from `start` to `end`.
///
/// Coordinates are in pixels and get rounded to the nearest pixel.
pub fn line(image: &mut Image, start: [f32; 2], end: [f32; 2]) -> DrawLine<'_> {
    DrawLine {
        image,
        start: to_point(start),
        end: to_point(end),
        color: Color::BLUE,
        stroke_width: 1,
    }
}

/// Draws a circle of the given `diameter` around `center`.
pub fn circle(image: &mut Image, center: [f32; 2], diameter: u32) -> DrawCircle<'_> {
    DrawCircle {
        image,
        center: to_point(center),
        diameter,
        stroke_width: 1,
        color: Color::GREEN,
        fill: None,
    }
}

fn to_point([x, y]: [f32; 2]) -> Point {
    Point::new(x.round() as i32, y.round() as i32)
}

struct Target<'a>(&'a mut Image);

impl Dimensions for Target<'_> {
    fn bounding_box(&self) -> Rectangle {
        Rectangle {
            top_left: Point { x: 0, y: 0 },
            size: Size {
                width: self.0.width(),
                height: self.0.height(),
            },
        }
    }
}

impl DrawTarget for Target<'_> {
    type Color = Color;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(pos, color) in pixels {
            if pos.x >= 0
                && (pos.x as u32) < self.0.width()
                && pos.y >= 0
                && (pos.y as u32) < self.0.height()
            {
                self.0.set(pos.x as u32, pos.y as u32, color);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Resolution;

    #[test]
    fn test_line() {
        let mut image = Image::new(3, 1);

        line(&mut image, [0.0, 0.0], [2.0, 0.0]).color(Color::WHITE);
        for x in 0..3 {
            assert_eq!(image.get(x, 0), Color::WHITE);
        }
    }

    #[test]
    fn test_line_clipped() {
        let mut image = Image::new(2, 2);
        line(&mut image, [-10.0, 0.0], [10.0, 0.0]).color(Color::RED);
        assert_eq!(image.get(0, 0), Color::RED);
        assert_eq!(image.get(1, 0), Color::RED);
        assert_eq!(image.get(0, 1), Color::NONE);
    }

    #[test]
    fn test_filled_circle() {
        let mut image = Image::filled(Resolution::new(9, 9), Color::NONE);
        circle(&mut image, [4.0, 4.0], 7)
            .color(Color::RED)
            .fill(Color::BLUE);
        assert_eq!(image.get(4, 4), Color::BLUE);
        assert_eq!(image.get(0, 0), Color::NONE);
    }
}
