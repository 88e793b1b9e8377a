//! Windows showing images, driven by a winit event loop on the main thread.

mod renderer;

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    process,
    rc::Rc,
    sync::Mutex,
};

use anyhow::anyhow;
use once_cell::sync::OnceCell;
use winit::{
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopBuilder, EventLoopProxy},
    window::WindowId,
};

use crate::{
    canvas::ImageCanvas,
    frame_loop::FrameSink,
    image::{Image, Resolution},
    termination::Termination,
};

use self::renderer::{Gpu, Renderer, Window};

struct Gui {
    gpu: Rc<Gpu>,
    windows: HashMap<String, Renderer>,
    win_id_to_key: HashMap<WindowId, String>,
}

impl Gui {
    fn new() -> anyhow::Result<Self> {
        Ok(Self {
            gpu: Rc::new(pollster::block_on(Gpu::open())?),
            windows: HashMap::new(),
            win_id_to_key: HashMap::new(),
        })
    }

    fn show(
        &mut self,
        target: &winit::event_loop::EventLoopWindowTarget<Msg>,
        key: String,
        res: Resolution,
        data: &[u8],
    ) -> anyhow::Result<()> {
        if !self.windows.contains_key(&key) {
            log::debug!("creating window for image '{key}' at {res}");
            let win = Window::open(target, &key, res)?;
            self.win_id_to_key.insert(win.win.id(), key.clone());
            let renderer = Renderer::new(win, self.gpu.clone())?;
            self.windows.insert(key.clone(), renderer);
        }

        let renderer = self
            .windows
            .get_mut(&key)
            .ok_or_else(|| anyhow!("no window for image '{key}'"))?;
        renderer.update_texture(res, data)?;
        renderer.window().request_redraw();
        Ok(())
    }

    fn renderer_mut(&mut self, win: WindowId) -> Option<&mut Renderer> {
        let key = self.win_id_to_key.get(&win)?;
        self.windows.get_mut(key)
    }

    fn run(mut self, event_loop: EventLoop<Msg>) -> ! {
        event_loop.run(move |event, target, flow| {
            *flow = ControlFlow::Wait;
            match event {
                Event::UserEvent(Msg::Image { key, res, data }) => {
                    if let Err(e) = self.show(target, key, res, &data) {
                        log::error!("failed to show image: {e:#}");
                        *flow = ControlFlow::ExitWithCode(1);
                    }
                }
                Event::RedrawRequested(window) => {
                    if let Some(renderer) = self.renderer_mut(window) {
                        if let Err(e) = renderer.redraw() {
                            log::error!("failed to redraw window: {e:#}");
                        }
                    }
                }
                Event::WindowEvent {
                    event: WindowEvent::CloseRequested,
                    window_id,
                } => {
                    log::info!(
                        "window '{}' closed, exiting",
                        self.win_id_to_key
                            .get(&window_id)
                            .map_or("?", |key| key.as_str())
                    );
                    *flow = ControlFlow::ExitWithCode(0);
                }
                _ => {}
            }
        });
    }
}

#[derive(Debug)]
enum Msg {
    Image {
        key: String,
        res: Resolution,
        data: Vec<u8>,
    },
}

/// A connection to the GUI event loop.
struct Display {
    proxy: Mutex<EventLoopProxy<Msg>>,
}

static DISPLAY: OnceCell<Display> = OnceCell::new();

fn send(msg: Msg) -> anyhow::Result<()> {
    let display = DISPLAY
        .get()
        .ok_or_else(|| anyhow!("GUI is not running (did you forget `#[handview::main]`?)"))?;
    display
        .proxy
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .send_event(msg)
        .map_err(|_closed| anyhow!("GUI event loop has exited"))
}

pub(crate) fn run<F, R>(cb: F) -> !
where
    F: FnOnce() -> R + Send + 'static,
    R: Termination + Send,
{
    let event_loop = EventLoopBuilder::with_user_event().build();
    let display = Display {
        proxy: Mutex::new(event_loop.create_proxy()),
    };
    if DISPLAY.set(display).is_err() {
        eprintln!("Error: GUI already initialized");
        process::exit(1);
    }

    let gui = match Gui::new() {
        Ok(gui) => gui,
        Err(e) => {
            eprintln!("Error: failed to initialize GUI: {e:?}");
            process::exit(1);
        }
    };

    // Spawn another thread to run the application code; the event loop needs the main thread.
    std::thread::spawn(move || {
        let result = catch_unwind(AssertUnwindSafe(cb));
        match result {
            Ok(r) => {
                if r.is_success() {
                    process::exit(0);
                } else {
                    r.report();
                    process::exit(1);
                }
            }
            Err(_payload) => {
                // The panic hook has already printed the message; exit like libstd would.
                process::exit(101);
            }
        }
    });

    gui.run(event_loop);
}

/// Displays an image in the window identified by `key`, creating the window if needed.
pub fn show_image(key: impl Into<String>, image: &Image) -> anyhow::Result<()> {
    send(Msg::Image {
        key: key.into(),
        res: image.resolution(),
        // Image data is RGBA8 internally, so it can be uploaded as-is.
        data: image.data().to_vec(),
    })
}

/// A [`FrameSink`] that composites the overlay over the camera frame and shows the result in a
/// window.
pub struct WindowSink {
    key: String,
}

impl WindowSink {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Draws `overlay` on top of a copy of `frame`.
///
/// If the sizes differ, the overlay is skipped.
pub fn composite(frame: &Image, overlay: &Image) -> Image {
    let mut out = frame.clone();
    if overlay.resolution() == frame.resolution() {
        out.blend_over(overlay);
    } else {
        log::warn!(
            "overlay size {} does not match frame size {}, not drawing it",
            overlay.resolution(),
            frame.resolution(),
        );
    }
    out
}

impl FrameSink<ImageCanvas> for WindowSink {
    fn present(&mut self, frame: &Image, surface: &ImageCanvas) -> anyhow::Result<()> {
        show_image(&*self.key, &composite(frame, surface.image()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Color;

    #[test]
    fn composite_draws_overlay() {
        let res = Resolution::new(2, 1);
        let frame = Image::filled(res, Color::BLUE);
        let mut overlay = Image::new(2, 1);
        overlay.set(1, 0, Color::RED);

        let out = composite(&frame, &overlay);
        assert_eq!(out.get(0, 0), Color::BLUE);
        assert_eq!(out.get(1, 0), Color::RED);
    }

    #[test]
    fn composite_skips_mismatched_overlay() {
        let frame = Image::filled(Resolution::new(2, 2), Color::BLUE);
        let overlay = Image::filled(Resolution::new(1, 1), Color::RED);
        assert_eq!(composite(&frame, &overlay).get(0, 0), Color::BLUE);
    }

    #[test]
    fn show_image_without_gui() {
        assert!(show_image("test", &Image::new(1, 1)).is_err());
    }
}
