//! RHI-specific error types.

use thiserror::Error;

/// Errors raised by the Vulkan hardware layer.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load the Vulkan library
    #[error("failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// No physical device satisfied the renderer's requirements
    #[error("no suitable GPU found")]
    NoSuitableGpu,

    /// Requested device memory type is not available
    #[error("no memory type matches filter {type_filter:#b} with flags {flags:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        flags: ash::vk::MemoryPropertyFlags,
    },

    /// Surface creation or query error
    #[error("surface error: {0}")]
    SurfaceError(String),

    /// Swapchain configuration error
    #[error("swapchain error: {0}")]
    SwapchainError(String),

    /// Shader load or validation error
    #[error("shader error: {0}")]
    ShaderError(String),

    /// Buffer or image resource misuse
    #[error("resource error: {0}")]
    ResourceError(String),

    /// Command buffer used outside its legal lifecycle
    #[error("command buffer in state {actual:?}, operation requires {expected:?}")]
    InvalidCommandState {
        expected: crate::command::CommandBufferState,
        actual: crate::command::CommandBufferState,
    },

    /// The device was lost while waiting on a fence or queue
    #[error("device lost: {0}")]
    DeviceLost(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
