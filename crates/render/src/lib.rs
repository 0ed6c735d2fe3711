//! Frame orchestration built on the `aurora-rhi` wrappers.
//!
//! The renderer owns the Vulkan context end to end and exposes the
//! `begin_frame`/`end_frame` pair as the only entry points the
//! application loop needs.

pub mod frame_sync;
pub mod renderer;
pub mod uniforms;

pub use aurora_rhi::sync::MAX_FRAMES_IN_FLIGHT;
pub use frame_sync::{BeginFrameOutcome, FrameDriver, FrameSequencer};
pub use renderer::Renderer;
pub use uniforms::GlobalUniforms;
