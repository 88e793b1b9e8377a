//! Drawing surfaces with a saveable paint state.
//!
//! A [`DrawingSurface`] works like a 2D canvas context: it has a current [`DrawState`] that the
//! drawing primitives read and modify, and a stack that [`DrawingSurface::save`] and
//! [`DrawingSurface::restore`] push to and pop from. [`DrawingSurface::scoped`] brackets a
//! sequence of draws so that the state is restored on every exit path.

use std::ops::{Deref, DerefMut};

use anyhow::bail;

use crate::image::{draw, Color, Image, Resolution};
use crate::landmark::{Connection, Landmark};

/// An affine transform consisting of a per-axis scale followed by a translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: [f32; 2],
    pub translate: [f32; 2],
}

impl Transform {
    pub const IDENTITY: Self = Self {
        scale: [1.0, 1.0],
        translate: [0.0, 0.0],
    };

    /// A transform that mirrors the X axis of a surface that is `width` pixels wide.
    pub fn mirror_x(width: f32) -> Self {
        Self {
            scale: [-1.0, 1.0],
            translate: [width, 0.0],
        }
    }

    #[inline]
    pub fn apply(&self, [x, y]: [f32; 2]) -> [f32; 2] {
        [
            x * self.scale[0] + self.translate[0],
            y * self.scale[1] + self.translate[1],
        ]
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// The mutable paint state of a [`DrawingSurface`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawState {
    pub transform: Transform,
    pub stroke: Color,
    pub fill: Color,
    pub line_width: f32,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            transform: Transform::IDENTITY,
            stroke: Color::BLACK,
            fill: Color::BLACK,
            line_width: 1.0,
        }
    }
}

/// Visual style passed to the landmark drawing primitives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Style {
    pub color: Color,
    /// Stroke width in pixels.
    pub line_width: f32,
    /// Radius of landmark points in pixels. Ignored when drawing connectors.
    pub radius: f32,
}

/// The current [`DrawState`] plus the stack of saved states.
///
/// Implementors of [`DrawingSurface`] can delegate their state handling to this.
#[derive(Debug, Clone, Default)]
pub struct StateStack {
    current: DrawState,
    saved: Vec<DrawState>,
}

impl StateStack {
    pub fn current(&self) -> &DrawState {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut DrawState {
        &mut self.current
    }

    pub fn save(&mut self) {
        self.saved.push(self.current);
    }

    /// Pops the most recently saved state. Does nothing if no state is saved.
    pub fn restore(&mut self) {
        if let Some(state) = self.saved.pop() {
            self.current = state;
        }
    }

    /// Returns the number of saved states.
    pub fn depth(&self) -> usize {
        self.saved.len()
    }
}

/// A surface that hand landmarks can be drawn onto.
///
/// Landmark coordinates are normalized; surfaces scale them to their resolution and then apply
/// the current [`Transform`].
pub trait DrawingSurface {
    fn resolution(&self) -> Resolution;

    /// Changes the size of the surface. The contents are cleared if the size changes.
    fn resize(&mut self, res: Resolution);

    fn state(&self) -> &DrawState;

    fn state_mut(&mut self) -> &mut DrawState;

    /// Pushes a copy of the current [`DrawState`] onto the state stack.
    fn save(&mut self);

    /// Pops the last saved [`DrawState`] and makes it current. Does nothing if the stack is empty.
    fn restore(&mut self);

    /// Erases the entire surface to full transparency.
    fn clear(&mut self);

    /// Draws a line for every connection between two landmarks.
    ///
    /// The style is applied to the current [`DrawState`].
    fn draw_connectors(
        &mut self,
        landmarks: &[Landmark],
        connections: &[Connection],
        style: &Style,
    ) -> anyhow::Result<()>;

    /// Draws a dot for every landmark.
    ///
    /// The style is applied to the current [`DrawState`].
    fn draw_landmarks(&mut self, landmarks: &[Landmark], style: &Style) -> anyhow::Result<()>;

    /// Saves the current state and returns a guard that restores it when dropped.
    fn scoped(&mut self) -> Scoped<'_, Self>
    where
        Self: Sized,
    {
        self.save();
        Scoped { surface: self }
    }
}

/// Guard returned by [`DrawingSurface::scoped`]; restores the saved state when dropped.
pub struct Scoped<'a, S: DrawingSurface> {
    surface: &'a mut S,
}

impl<S: DrawingSurface> Deref for Scoped<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.surface
    }
}

impl<S: DrawingSurface> DerefMut for Scoped<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.surface
    }
}

impl<S: DrawingSurface> Drop for Scoped<'_, S> {
    fn drop(&mut self) {
        self.surface.restore();
    }
}

/// A [`DrawingSurface`] backed by a transparent RGBA [`Image`].
pub struct ImageCanvas {
    image: Image,
    state: StateStack,
}

impl ImageCanvas {
    pub fn new(res: Resolution) -> Self {
        Self {
            image: Image::new(res.width(), res.height()),
            state: StateStack::default(),
        }
    }

    /// Returns the image holding the drawn overlay.
    pub fn image(&self) -> &Image {
        &self.image
    }

    fn to_pixel(&self, lm: &Landmark) -> [f32; 2] {
        let res = self.image.resolution();
        self.state
            .current()
            .transform
            .apply([lm.x * res.width() as f32, lm.y * res.height() as f32])
    }
}

fn stroke_width(line_width: f32) -> u32 {
    line_width.round().max(1.0) as u32
}

impl DrawingSurface for ImageCanvas {
    fn resolution(&self) -> Resolution {
        self.image.resolution()
    }

    fn resize(&mut self, res: Resolution) {
        if self.image.resolution() != res {
            log::debug!("resizing canvas from {} to {}", self.image.resolution(), res);
            self.image = Image::new(res.width(), res.height());
        }
    }

    fn state(&self) -> &DrawState {
        self.state.current()
    }

    fn state_mut(&mut self) -> &mut DrawState {
        self.state.current_mut()
    }

    fn save(&mut self) {
        self.state.save();
    }

    fn restore(&mut self) {
        self.state.restore();
    }

    fn clear(&mut self) {
        self.image.clear(Color::NONE);
    }

    fn draw_connectors(
        &mut self,
        landmarks: &[Landmark],
        connections: &[Connection],
        style: &Style,
    ) -> anyhow::Result<()> {
        {
            let state = self.state.current_mut();
            state.stroke = style.color;
            state.line_width = style.line_width;
        }

        let state = *self.state.current();
        for &(a, b) in connections {
            let (Some(start), Some(end)) = (landmarks.get(a as usize), landmarks.get(b as usize))
            else {
                bail!(
                    "connection {a:?}-{b:?} is out of range for {} landmarks",
                    landmarks.len()
                );
            };
            let (start, end) = (self.to_pixel(start), self.to_pixel(end));
            draw::line(&mut self.image, start, end)
                .color(state.stroke)
                .stroke_width(stroke_width(state.line_width));
        }
        Ok(())
    }

    fn draw_landmarks(&mut self, landmarks: &[Landmark], style: &Style) -> anyhow::Result<()> {
        {
            let state = self.state.current_mut();
            state.stroke = style.color;
            state.fill = style.color;
            state.line_width = style.line_width;
        }

        let state = *self.state.current();
        let diameter = (style.radius * 2.0).round().max(1.0) as u32;
        for lm in landmarks {
            let center = self.to_pixel(lm);
            draw::circle(&mut self.image, center, diameter)
                .color(state.stroke)
                .fill(state.fill)
                .stroke_width(stroke_width(state.line_width));
        }
        Ok(())
    }
}
