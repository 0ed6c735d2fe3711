//! Shared foundation for the Aurora renderer.
//!
//! Everything here is presentation-agnostic: error plumbing, the logging
//! bootstrap, and frame timing. The Vulkan-facing crates build on top.

mod error;
mod logging;
mod timer;

pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::FrameTimer;
