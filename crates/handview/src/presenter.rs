//! Draws detection results onto a [`DrawingSurface`].

use crate::canvas::{DrawingSurface, Style};
use crate::image::Color;
use crate::landmark::{DetectionResult, HAND_CONNECTIONS};

/// Style of the skeleton lines connecting the landmarks.
pub const CONNECTOR_STYLE: Style = Style {
    color: Color::from_rgb8(0x00, 0xFF, 0x00),
    line_width: 5.0,
    radius: 0.0,
};

/// Style of the landmark points.
pub const LANDMARK_STYLE: Style = Style {
    color: Color::from_rgb8(0xFF, 0x00, 0x00),
    line_width: 2.0,
    radius: 6.0,
};

/// Owns the drawing surface and redraws it from scratch for every frame.
pub struct Presenter<S> {
    surface: S,
}

impl<S: DrawingSurface> Presenter<S> {
    pub fn new(surface: S) -> Self {
        Self { surface }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Clears the surface and draws the skeleton and landmarks of every hand in `results`.
    ///
    /// The surface's [`DrawState`] is the same before and after this call, even if drawing fails
    /// part of the way through.
    ///
    /// [`DrawState`]: crate::canvas::DrawState
    pub fn render(&mut self, results: &DetectionResult) -> anyhow::Result<()> {
        let mut surface = self.surface.scoped();
        surface.clear();
        for hand in results.hands() {
            surface.draw_connectors(hand.landmarks(), HAND_CONNECTIONS, &CONNECTOR_STYLE)?;
            surface.draw_landmarks(hand.landmarks(), &LANDMARK_STYLE)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use super::*;
    use crate::canvas::{DrawState, StateStack, Transform};
    use crate::image::Resolution;
    use crate::landmark::{tests::open_hand, Connection, Landmark, NUM_HAND_LANDMARKS};

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Clear,
        Connectors { first: Landmark, style: Style },
        Landmarks { first: Landmark, style: Style },
    }

    /// Records every draw call instead of drawing.
    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub(crate) calls: Vec<Call>,
        pub(crate) state: StateStack,
        /// Fail (or panic) on the n-th draw call.
        pub(crate) fail_at: Option<(usize, bool)>,
        draws: usize,
    }

    impl RecordingSurface {
        fn draw(&mut self, call: Call) -> anyhow::Result<()> {
            // The primitives mutate the paint state like a real surface would.
            let state = self.state.current_mut();
            state.transform = Transform::mirror_x(100.0);
            state.line_width += 1.0;

            self.draws += 1;
            if let Some((n, panic)) = self.fail_at {
                if n == self.draws {
                    if panic {
                        panic!("surface lost");
                    }
                    anyhow::bail!("surface lost");
                }
            }
            self.calls.push(call);
            Ok(())
        }
    }

    impl DrawingSurface for RecordingSurface {
        fn resolution(&self) -> Resolution {
            Resolution::RES_VGA
        }

        fn resize(&mut self, _res: Resolution) {}

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
            self.calls.push(Call::Clear);
        }

        fn draw_connectors(
            &mut self,
            landmarks: &[Landmark],
            _connections: &[Connection],
            style: &Style,
        ) -> anyhow::Result<()> {
            self.draw(Call::Connectors {
                first: landmarks[0],
                style: *style,
            })
        }

        fn draw_landmarks(&mut self, landmarks: &[Landmark], style: &Style) -> anyhow::Result<()> {
            self.draw(Call::Landmarks {
                first: landmarks[0],
                style: *style,
            })
        }
    }

    fn hand_at(x: f32) -> Vec<[f32; 3]> {
        vec![[x, 0.5, 0.0]; NUM_HAND_LANDMARKS]
    }

    #[test]
    fn empty_result_only_clears() {
        let mut presenter = Presenter::new(RecordingSurface::default());
        presenter.render(&DetectionResult::empty()).unwrap();
        assert_eq!(presenter.surface().calls, [Call::Clear]);
    }

    #[test]
    fn one_hand_uses_fixed_styles() {
        let mut presenter = Presenter::new(RecordingSurface::default());
        let hand = open_hand();
        let results = DetectionResult {
            landmarks: vec![hand.clone()],
        };
        presenter.render(&results).unwrap();

        let first = hand.landmarks()[0];
        assert_eq!(
            presenter.surface().calls,
            [
                Call::Clear,
                Call::Connectors {
                    first,
                    style: CONNECTOR_STYLE
                },
                Call::Landmarks {
                    first,
                    style: LANDMARK_STYLE
                },
            ]
        );
        assert_eq!(CONNECTOR_STYLE.color, Color::GREEN);
        assert_eq!(LANDMARK_STYLE.color, Color::RED);
    }

    #[test]
    fn n_hands_in_order() {
        for _ in 0..20 {
            let n = fastrand::usize(0..6);
            let xs: Vec<f32> = (0..n).map(|_| fastrand::f32()).collect();
            let results = DetectionResult::from_raw(xs.iter().map(|&x| hand_at(x))).unwrap();

            let mut presenter = Presenter::new(RecordingSurface::default());
            presenter.render(&results).unwrap();

            let calls = &presenter.surface().calls;
            assert_eq!(calls.len(), 1 + 2 * n);
            for (i, &x) in xs.iter().enumerate() {
                match (&calls[1 + 2 * i], &calls[2 + 2 * i]) {
                    (Call::Connectors { first: a, .. }, Call::Landmarks { first: b, .. }) => {
                        assert_eq!(a.x, x);
                        assert_eq!(b.x, x);
                    }
                    other => panic!("unexpected calls {other:?}"),
                }
            }
        }
    }

    #[test]
    fn state_is_restored() {
        let mut surface = RecordingSurface::default();
        surface.state_mut().line_width = 7.0;
        let before = *surface.state();

        let mut presenter = Presenter::new(surface);
        let results = DetectionResult::from_raw([hand_at(0.2), hand_at(0.4)]).unwrap();
        presenter.render(&results).unwrap();

        assert_eq!(*presenter.surface().state(), before);
        assert_eq!(presenter.surface().state.depth(), 0);
    }

    #[test]
    fn state_is_restored_after_failure() {
        let results = DetectionResult::from_raw([hand_at(0.2), hand_at(0.4)]).unwrap();
        for n in 1..=4 {
            let surface = RecordingSurface {
                fail_at: Some((n, false)),
                ..Default::default()
            };
            let before = *surface.state();
            let mut presenter = Presenter::new(surface);
            assert!(presenter.render(&results).is_err());
            assert_eq!(*presenter.surface().state(), before);
            assert_eq!(presenter.surface().state.depth(), 0);
        }
    }

    #[test]
    fn state_is_restored_after_panic() {
        let results = DetectionResult::from_raw([hand_at(0.2)]).unwrap();
        let surface = RecordingSurface {
            fail_at: Some((2, true)),
            ..Default::default()
        };
        let before = *surface.state();
        let mut presenter = Presenter::new(surface);
        catch_unwind(AssertUnwindSafe(|| presenter.render(&results))).unwrap_err();
        assert_eq!(*presenter.surface().state(), before);
    }
}
