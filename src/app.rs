use crate::session::Session;
use anyhow::{Result, anyhow};
use log::{error, info, warn};
use n170_core::{Display, Phase};
use n170_experiment::ExperimentEvent;
use n170_render::SkiaDisplay;
use pixels::{Pixels, SurfaceTexture};
use std::path::PathBuf;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowId},
};

const FONT_SIZE_PX: f32 = 32.0;

/// Fullscreen window that drives the trial runner from its redraw loop.
pub struct App {
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    display: Option<SkiaDisplay>,
    session: Option<Session>,
    font: Option<PathBuf>,
    scale_factor: f64,
    refresh_rate: Option<f64>,
    failure: Option<anyhow::Error>,

    should_exit: bool,
}

impl App {
    pub fn new(session: Session, font: Option<PathBuf>) -> Self {
        Self {
            window: None,
            pixels: None,
            display: None,
            session: Some(session),
            font,
            scale_factor: 1.0,
            refresh_rate: None,
            failure: None,
            should_exit: false,
        }
    }

    /// Run the event loop until the block ends or is aborted, then hand the
    /// session back for saving.
    pub fn run(mut self) -> Result<Session> {
        let event_loop = EventLoop::new()?;
        info!(
            "platform {} ({}); press SPACE to start or ESC to exit",
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        event_loop.run_app(&mut self)?;

        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        self.session
            .take()
            .ok_or_else(|| anyhow!("presentation session was lost"))
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let primary_monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .ok_or_else(|| anyhow!("no monitor available"))?;

        self.refresh_rate = primary_monitor
            .refresh_rate_millihertz()
            .map(|rate| rate as f64 / 1000.0);

        let window_attributes = Window::default_attributes()
            .with_title("Visual N170")
            .with_fullscreen(Some(Fullscreen::Borderless(Some(primary_monitor))))
            .with_resizable(false);

        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let physical_size = window.inner_size();
        self.scale_factor = window.scale_factor();

        info!(
            "display {}x{} at scale {:.2}{}",
            physical_size.width,
            physical_size.height,
            self.scale_factor,
            self.refresh_rate
                .map(|hz| format!(", {hz:.1} Hz"))
                .unwrap_or_default()
        );

        let surface_texture =
            SurfaceTexture::new(physical_size.width, physical_size.height, window.clone());
        self.pixels = Some(Pixels::new(
            physical_size.width,
            physical_size.height,
            surface_texture,
        )?);

        let mut display = SkiaDisplay::new(physical_size.width, physical_size.height)?;
        if let Some(font) = &self.font {
            display = display.with_font(font, FONT_SIZE_PX)?;
        }
        self.display = Some(display);

        window.set_cursor_visible(false);
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        let (Some(pixels), Some(display), Some(session)) = (
            self.pixels.as_mut(),
            self.display.as_mut(),
            self.session.as_mut(),
        ) else {
            return Ok(());
        };

        if session.runner.current_phase().is_instructions() {
            let lines = session.instructions();
            let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
            display.clear();
            display.draw_text(&lines);
            display.flip()?;
        } else if !session.runner.tick(&mut session.presenter, display)? {
            self.should_exit = true;
        }

        let frame = pixels.frame_mut();
        let front = display.front();
        if frame.len() == front.len() {
            frame.copy_from_slice(front);
        }
        pixels.render()?;
        Ok(())
    }

    fn handle_input(&mut self, key: PhysicalKey, event_loop: &ActiveEventLoop) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match key {
            PhysicalKey::Code(KeyCode::Space) => {
                session.runner.handle_event(ExperimentEvent::SpacePressed);
            }
            PhysicalKey::Code(KeyCode::Escape) => {
                session.runner.handle_event(ExperimentEvent::EscapePressed);
                self.cleanup_and_exit(event_loop);
            }
            _ => {}
        }
    }

    fn handle_resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        if let Some(pixels) = &mut self.pixels {
            if let Err(e) = pixels.resize_surface(new_size.width, new_size.height) {
                warn!("failed to resize surface: {e}");
            }
            if let Err(e) = pixels.resize_buffer(new_size.width, new_size.height) {
                warn!("failed to resize buffer: {e}");
            }
        }
        if let Some(display) = &mut self.display {
            if let Err(e) = display.resize(new_size.width, new_size.height) {
                warn!("failed to resize display: {e}");
            }
        }
        info!("display resized to {}x{}", new_size.width, new_size.height);
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure = Some(e);
        self.cleanup_and_exit(event_loop);
    }

    fn cleanup_and_exit(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.set_cursor_visible(true);
        }
        self.should_exit = true;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                self.fail(event_loop, e.context("failed to create window and surface"));
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(session) = self.session.as_mut() {
                    session.runner.handle_event(ExperimentEvent::EscapePressed);
                }
                self.cleanup_and_exit(event_loop);
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    self.fail(event_loop, e);
                    return;
                }
                if let Some(win) = &self.window {
                    win.request_redraw();
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                self.handle_input(event.physical_key, event_loop);
            }
            WindowEvent::Resized(sz) => self.handle_resize(sz),
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                self.scale_factor = scale_factor;
                if let Some(window) = &self.window {
                    self.handle_resize(window.inner_size());
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_exit {
            event_loop.exit();
        }
    }
}
