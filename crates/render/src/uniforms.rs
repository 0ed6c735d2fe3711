//! Per-frame uniform data shared by every draw.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Camera matrices uploaded once per frame slot.
///
/// Laid out for std140; the reserved blocks pad the struct to 256 bytes
/// so it satisfies common `minUniformBufferOffsetAlignment` values.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GlobalUniforms {
    pub projection: Mat4,
    pub view: Mat4,
    reserved0: Mat4,
    reserved1: Mat4,
}

impl GlobalUniforms {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(projection: Mat4, view: Mat4) -> Self {
        Self {
            projection,
            view,
            reserved0: Mat4::ZERO,
            reserved1: Mat4::ZERO,
        }
    }
}

impl Default for GlobalUniforms {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_matches_uniform_alignment() {
        assert_eq!(GlobalUniforms::SIZE, 256);
    }
}
