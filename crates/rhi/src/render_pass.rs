//! Classic render pass with one color and one depth attachment.
//!
//! Attachment contract per frame: color is cleared on load, stored, and
//! ends in `PRESENT_SRC_KHR`; depth is cleared and discarded after the
//! pass. Begin and end drive the command buffer's render pass state.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::RhiResult;

/// Render pass plus the clear values and render area it begins with.
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    render_area: vk::Rect2D,
    clear_color: [f32; 4],
    clear_depth: f32,
    clear_stencil: u32,
}

impl RenderPass {
    /// Builds the pass for the given color format and the device's depth
    /// format.
    pub fn new(
        device: Arc<Device>,
        color_format: vk::Format,
        render_area: vk::Rect2D,
        clear_color: [f32; 4],
    ) -> RhiResult<Self> {
        let attachments = [
            // Color: cleared, kept, handed to the presentation engine.
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            // Depth: cleared, contents dead after the pass.
            vk::AttachmentDescription::default()
                .format(device.depth_format())
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];

        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let depth_ref = vk::AttachmentReference::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)];

        // Acquire's semaphore wait lands at color-attachment-output, so
        // the pass must not write color before the image is released.
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };
        debug!("render pass created for color format {color_format:?}");

        Ok(Self {
            device,
            render_pass,
            render_area,
            clear_color,
            clear_depth: 1.0,
            clear_stencil: 0,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn render_area(&self) -> vk::Rect2D {
        self.render_area
    }

    /// Updates the render area after a swapchain resize.
    pub fn set_render_area(&mut self, render_area: vk::Rect2D) {
        self.render_area = render_area;
    }

    /// Begins the pass on `cb` against `framebuffer`, moving the buffer
    /// into its in-render-pass state.
    pub fn begin(&self, cb: &mut CommandBuffer, framebuffer: vk::Framebuffer) -> RhiResult<()> {
        cb.enter_render_pass()?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.clear_depth,
                    stencil: self.clear_stencil,
                },
            },
        ];

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(self.render_area)
            .clear_values(&clear_values);

        unsafe {
            self.device.handle().cmd_begin_render_pass(
                cb.handle(),
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
        Ok(())
    }

    /// Ends the pass and returns the buffer to plain recording.
    pub fn end(&self, cb: &mut CommandBuffer) -> RhiResult<()> {
        cb.leave_render_pass()?;
        unsafe {
            self.device.handle().cmd_end_render_pass(cb.handle());
        }
        Ok(())
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_render_pass(self.render_pass, None);
        }
        debug!("render pass destroyed");
    }
}
