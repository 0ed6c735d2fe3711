//! Windowing layer for the Aurora renderer.
//!
//! Wraps winit window creation and Vulkan surface plumbing so the
//! render crates never touch raw platform handles directly.

mod window;

pub use window::{Surface, Window};

pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
