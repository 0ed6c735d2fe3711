//! Command pools and lifecycle-tracked command buffers.
//!
//! Every [`CommandBuffer`] carries its lifecycle state and refuses
//! out-of-order use: begin on a buffer that was never reset, end outside
//! recording, or submit before recording finished all surface as
//! [`RhiError::InvalidCommandState`] instead of driver-level undefined
//! behavior.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Where a command buffer sits in its recording lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBufferState {
    /// Allocated or reset, recording may begin.
    Ready,
    /// Between begin and end, outside any render pass.
    Recording,
    /// Inside an active render pass.
    InRenderPass,
    /// Recording ended, ready for submission.
    RecordingEnded,
    /// Submitted to a queue and not yet reset.
    Submitted,
}

fn expect_state(actual: CommandBufferState, expected: CommandBufferState) -> RhiResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(RhiError::InvalidCommandState { expected, actual })
    }
}

/// Command pool bound to one queue family.
///
/// Created with `RESET_COMMAND_BUFFER` so buffers reset individually.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        debug!("command pool created for queue family {queue_family_index}");

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Allocates `count` primary command buffers wrapped with state
    /// tracking.
    pub fn allocate(&self, count: u32) -> RhiResult<Vec<CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let handles = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        Ok(handles
            .into_iter()
            .map(|buffer| CommandBuffer {
                device: self.device.clone(),
                buffer,
                state: CommandBufferState::Ready,
            })
            .collect())
    }

    /// Returns a buffer's storage to the pool.
    pub fn free(&self, command_buffer: CommandBuffer) {
        let handles = [command_buffer.buffer];
        unsafe {
            self.device.handle().free_command_buffers(self.pool, &handles);
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!(
            "command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Primary command buffer with lifecycle enforcement.
///
/// The handle's storage belongs to the pool; dropping the wrapper does
/// not free it.
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
    state: CommandBufferState,
}

impl CommandBuffer {
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    #[inline]
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Begins recording. The buffer must be `Ready`.
    pub fn begin(
        &mut self,
        single_use: bool,
        renderpass_continue: bool,
        simultaneous_use: bool,
    ) -> RhiResult<()> {
        expect_state(self.state, CommandBufferState::Ready)?;

        let mut flags = vk::CommandBufferUsageFlags::empty();
        if single_use {
            flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        }
        if renderpass_continue {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }
        if simultaneous_use {
            flags |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
        }

        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    /// Ends recording. Any render pass must already be closed.
    pub fn end(&mut self) -> RhiResult<()> {
        expect_state(self.state, CommandBufferState::Recording)?;
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        self.state = CommandBufferState::RecordingEnded;
        Ok(())
    }

    /// Submits the ended buffer to `queue`.
    ///
    /// `wait_stages` pairs positionally with `wait_semaphores`.
    pub fn submit(
        &mut self,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal_semaphores: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        expect_state(self.state, CommandBufferState::RecordingEnded)?;

        let command_buffers = [self.buffer];
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .signal_semaphores(signal_semaphores);

        unsafe {
            self.device
                .handle()
                .queue_submit(queue, &[submit_info], fence)?;
        }
        self.state = CommandBufferState::Submitted;
        Ok(())
    }

    /// Resets the buffer back to `Ready` for re-recording.
    pub fn reset(&mut self) -> RhiResult<()> {
        if matches!(
            self.state,
            CommandBufferState::Recording | CommandBufferState::InRenderPass
        ) {
            warn!("resetting command buffer mid-recording ({:?})", self.state);
        }
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        self.state = CommandBufferState::Ready;
        Ok(())
    }

    /// Render pass begin transition, driven by [`crate::render_pass::RenderPass`].
    pub(crate) fn enter_render_pass(&mut self) -> RhiResult<()> {
        expect_state(self.state, CommandBufferState::Recording)?;
        self.state = CommandBufferState::InRenderPass;
        Ok(())
    }

    /// Render pass end transition.
    pub(crate) fn leave_render_pass(&mut self) -> RhiResult<()> {
        expect_state(self.state, CommandBufferState::InRenderPass)?;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    /// Allocates and begins a throwaway buffer for an immediate
    /// operation such as a staging copy or layout transition.
    pub fn begin_single_use(pool: &CommandPool) -> RhiResult<Self> {
        let mut buffers = pool.allocate(1)?;
        let mut cb = buffers.remove(0);
        cb.begin(true, false, false)?;
        Ok(cb)
    }

    /// Ends, submits, and waits out a single-use buffer, then returns
    /// its storage to the pool. Blocks on `queue_wait_idle`.
    pub fn end_single_use(mut self, pool: &CommandPool, queue: vk::Queue) -> RhiResult<()> {
        self.end()?;
        self.submit(queue, &[], &[], &[], vk::Fence::null())?;
        unsafe {
            self.device.handle().queue_wait_idle(queue)?;
        }
        pool.free(self);
        Ok(())
    }

    /// Sets the viewport.
    pub fn set_viewport(&self, viewport: &vk::Viewport) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(viewport));
        }
    }

    /// Sets the scissor rectangle.
    pub fn set_scissor(&self, scissor: &vk::Rect2D) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(scissor));
        }
    }

    /// Records an image layout barrier.
    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    ) {
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            );
        }
    }

    /// Records a buffer-to-buffer copy.
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, regions);
        }
    }

    /// Records a buffer-to-image copy.
    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                self.buffer,
                src,
                dst,
                dst_layout,
                regions,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expect_state_accepts_match() {
        assert!(expect_state(CommandBufferState::Ready, CommandBufferState::Ready).is_ok());
    }

    #[test]
    fn expect_state_reports_both_states() {
        let err = expect_state(
            CommandBufferState::Submitted,
            CommandBufferState::Ready,
        )
        .unwrap_err();
        match err {
            RhiError::InvalidCommandState { expected, actual } => {
                assert_eq!(expected, CommandBufferState::Ready);
                assert_eq!(actual, CommandBufferState::Submitted);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cannot_end_outside_recording() {
        // Ending is only legal from Recording; InRenderPass must close
        // its pass first.
        assert!(
            expect_state(CommandBufferState::InRenderPass, CommandBufferState::Recording).is_err()
        );
        assert!(expect_state(CommandBufferState::Ready, CommandBufferState::Recording).is_err());
    }

    #[test]
    fn command_types_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
        assert_send::<CommandPool>();
    }
}
