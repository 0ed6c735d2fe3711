//! Aurora - application entry point.
//!
//! Opens a window, brings up the renderer, and drives the frame loop.

use anyhow::Result;
use glam::{Mat4, Vec3};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use aurora_core::FrameTimer;
use aurora_platform::Window;
use aurora_render::Renderer;

struct App {
    window: Option<Window>,
    renderer: Option<Renderer>,
    timer: FrameTimer,
}

impl App {
    fn new() -> Self {
        Self {
            window: None,
            renderer: None,
            timer: FrameTimer::new(),
        }
    }

    fn render(&mut self, delta: f32) {
        let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
            return;
        };

        let frame = match renderer.begin_frame(delta) {
            Ok(started) => started,
            Err(e) => {
                error!("begin_frame failed: {e:?}");
                return;
            }
        };
        if !frame {
            // Skipped frame; try again next loop iteration.
            return;
        }

        let projection = Mat4::perspective_rh(
            45.0_f32.to_radians(),
            window.aspect_ratio(),
            0.1,
            1000.0,
        );
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        if let Err(e) = renderer.update_global_state(projection, view) {
            error!("uniform update failed: {e:?}");
        }

        if let Err(e) = renderer.end_frame() {
            error!("end_frame failed: {e:?}");
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            match Window::new(event_loop, 1280, 720, "Aurora") {
                Ok(window) => match Renderer::new(&window) {
                    Ok(renderer) => {
                        info!("initialization complete, entering main loop");
                        self.renderer = Some(renderer);
                        self.window = Some(window);
                    }
                    Err(e) => {
                        error!("failed to create renderer: {e:?}");
                        event_loop.exit();
                    }
                },
                Err(e) => {
                    error!("failed to create window: {e}");
                    event_loop.exit();
                }
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(ref mut window) = self.window {
                    window.resize(size.width, size.height);
                }
                if let Some(ref mut renderer) = self.renderer {
                    renderer.notify_resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let delta = self.timer.delta_secs();
                self.render(delta);
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    aurora_core::init_logging();
    info!("starting Aurora");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new();
    event_loop.run_app(&mut app)?;

    Ok(())
}
