//! SPIR-V loading and shader module creation.
//!
//! Shaders live on disk as `<name>.vert.spv` and `<name>.frag.spv`;
//! [`stage_path`] builds the filename from a base name and stage.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// SPIR-V magic number, first word of any valid module.
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Pipeline stage a shader module targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    /// Extension fragment used in on-disk filenames.
    pub fn file_tag(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Resolves `<dir>/<name>.<stage>.spv`.
pub fn stage_path(dir: &Path, name: &str, stage: ShaderStage) -> PathBuf {
    dir.join(format!("{name}.{}.spv", stage.file_tag()))
}

/// Shader module plus the stage and entry point it is bound with.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
}

impl Shader {
    /// Loads `<dir>/<name>.<stage>.spv` into a shader module with entry
    /// point `main`.
    pub fn load(
        device: Arc<Device>,
        dir: &Path,
        name: &str,
        stage: ShaderStage,
    ) -> RhiResult<Self> {
        let path = stage_path(dir, name, stage);
        debug!("loading {stage} shader from {path:?}");

        let bytes = std::fs::read(&path).map_err(|err| {
            RhiError::ShaderError(format!("failed to read {path:?}: {err}"))
        })?;

        Self::from_spirv_bytes(device, &bytes, stage)
    }

    /// Creates a shader module from raw SPIR-V bytes.
    ///
    /// # Errors
    ///
    /// Rejects byte streams that are not word-aligned or do not start
    /// with the SPIR-V magic number.
    pub fn from_spirv_bytes(
        device: Arc<Device>,
        bytes: &[u8],
        stage: ShaderStage,
    ) -> RhiResult<Self> {
        let code = validate_spirv(bytes)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        Ok(Self {
            device,
            module,
            stage,
            entry_point: c"main".to_owned(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage create info for pipeline construction. Borrows the entry
    /// point, so it must not outlive the shader.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_shader_module(self.module, None);
        }
    }
}

/// Checks alignment and the magic word, yielding the code as u32 words.
fn validate_spirv(bytes: &[u8]) -> Result<Vec<u32>, RhiError> {
    if bytes.len() < 4 || bytes.len() % 4 != 0 {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V must be a non-empty multiple of 4 bytes, got {}",
            bytes.len()
        )));
    }

    let code: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if code[0] != SPIRV_MAGIC {
        return Err(RhiError::ShaderError(format!(
            "bad SPIR-V magic {:#010x}",
            code[0]
        )));
    }

    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_path_follows_naming_convention() {
        let dir = Path::new("assets/shaders");
        assert_eq!(
            stage_path(dir, "builtin", ShaderStage::Vertex),
            Path::new("assets/shaders/builtin.vert.spv")
        );
        assert_eq!(
            stage_path(dir, "builtin", ShaderStage::Fragment),
            Path::new("assets/shaders/builtin.frag.spv")
        );
    }

    #[test]
    fn stage_maps_to_vk_flags() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn validate_rejects_misaligned_bytes() {
        assert!(validate_spirv(&[0u8; 5]).is_err());
        assert!(validate_spirv(&[]).is_err());
    }

    #[test]
    fn validate_rejects_bad_magic() {
        let bytes = 0xdead_beefu32.to_le_bytes();
        assert!(validate_spirv(&bytes).is_err());
    }

    #[test]
    fn validate_accepts_magic_word() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&SPIRV_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let code = validate_spirv(&bytes).unwrap();
        assert_eq!(code[0], SPIRV_MAGIC);
        assert_eq!(code.len(), 2);
    }
}
