// =============================================================================
// VULKAN FRAME PIPELINE - triangle renderer with explicit frame pacing
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, input, redraw requests)              │
// │    └── Renderer (owns every GPU object)                         │
// │          ├── Instance + Surface + Device                        │
// │          ├── Swap ring + Render pass + Pipeline + Framebuffers  │
// │          ├── Command buffers (pre-recorded, one per swap image) │
// │          └── Frame loop (fences + semaphores per frame slot)    │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for this slot's fence, then reset it
// 2. Acquire a swap image
// 3. Submit that image's pre-recorded commands
// 4. Present the image once rendering finishes
// 5. Move to the next slot
//
// =============================================================================

mod backend;
mod config;
mod renderer;

use anyhow::{Context, Result};
use config::Config;
use renderer::Renderer;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    init_logging();
    log::info!("Starting Vulkan frame pipeline");

    let config = Config::load();
    log::info!(
        "Window: {}x{}, {} frames in flight",
        config.window.width,
        config.window.height,
        config.graphics.max_frames_in_flight
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop failed")?;

    // A failure inside the event loop exits the loop; surface it here so the
    // process exit code reflects it
    app.finish()
}

/// Info by default, overridable with RUST_LOG
fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,

    // Renderer first: it must be dropped before the window it presents to
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    /// First fatal error; ends the event loop
    error: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            error: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    /// Nothing is drawn once a fatal error has been recorded: a failed tick
    /// can leave its slot's fence reset with no submission to signal it
    fn can_draw(&self) -> bool {
        self.error.is_none() && self.renderer.is_some()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }

    /// Tear the renderer down and report how the run ended
    fn finish(&mut self) -> Result<()> {
        if let Some(renderer) = self.renderer.take() {
            let frames = renderer.frames_drawn();
            renderer.teardown().context("Teardown failed")?;
            log::info!("Cleanup complete after {} frames", frames);
        }
        self.window = None;

        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // The swap ring is never rebuilt, so the window must not change size
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_resizable(false)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match Renderer::new(&self.config, &*window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to initialize Vulkan"));
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::RedrawRequested => {
                if !self.can_draw() {
                    return;
                }
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                match renderer.draw_frame() {
                    Ok(_) => self.update_fps(),
                    Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("Render error")),
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws; frame pacing comes from the fences
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
