//! Vulkan hardware layer for the Aurora renderer.
//!
//! Thin, safe wrappers over `ash` covering everything the presentation
//! path needs:
//! - Instance, physical device selection, and logical device creation
//! - Swapchain lifecycle and recreation
//! - Render pass and framebuffer objects
//! - Command buffer recording with lifecycle tracking
//! - Fences, semaphores, images, buffers, and shader modules

mod error;

pub mod buffer;
pub mod command;
pub mod device;
pub mod framebuffer;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

// Re-export ash types that callers need for handles and flags.
pub use ash::vk;
