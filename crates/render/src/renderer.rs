//! Main renderer orchestration.
//!
//! [`Renderer`] owns the whole Vulkan context and sequences it into the
//! `begin_frame`/`end_frame` entry points the application loop drives.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use glam::Mat4;
use tracing::{debug, error, info, trace};

use aurora_platform::{Surface, Window};
use aurora_rhi::buffer::{Buffer, BufferUsage};
use aurora_rhi::command::{CommandBuffer, CommandPool};
use aurora_rhi::device::Device;
use aurora_rhi::framebuffer::Framebuffer;
use aurora_rhi::instance::Instance;
use aurora_rhi::physical_device::select_physical_device;
use aurora_rhi::render_pass::RenderPass;
use aurora_rhi::swapchain::Swapchain;
use aurora_rhi::sync::{FenceWaitOutcome, FrameSync, MAX_FRAMES_IN_FLIGHT};
use aurora_rhi::{RhiError, RhiResult};

use crate::frame_sync::{
    AcquireOutcome, BeginFrameOutcome, FrameDriver, FrameSequencer, PresentOutcome,
};
use crate::uniforms::GlobalUniforms;

const CLEAR_COLOR: [f32; 4] = [0.1, 0.1, 0.15, 1.0];

/// Everything the frame protocol touches on the GPU side.
///
/// # Resource Destruction Order
///
/// 1. Wait for the device to go idle
/// 2. Per-slot sync objects and uniform buffers
/// 3. Command buffers, then their pool
/// 4. Framebuffers, render pass, swapchain
/// 5. Surface, then instance
///
/// ManuallyDrop pins the order for the fields whose destructors would
/// otherwise run in declaration order.
struct VulkanContext {
    instance: ManuallyDrop<Instance>,
    surface: ManuallyDrop<Surface>,
    device: Arc<Device>,
    swapchain: ManuallyDrop<Swapchain>,
    render_pass: ManuallyDrop<RenderPass>,
    framebuffers: Vec<Framebuffer>,
    command_pool: ManuallyDrop<CommandPool>,
    /// One command buffer per swapchain image, addressed by acquired
    /// image index.
    command_buffers: Vec<CommandBuffer>,
    /// One sync slot per frame in flight.
    frame_slots: Vec<FrameSync>,
    /// One global uniform buffer per frame slot.
    global_ubos: Vec<Buffer>,
    width: u32,
    height: u32,
}

impl VulkanContext {
    fn new(window: &Window) -> RhiResult<Self> {
        let width = window.width();
        let height = window.height();

        let enable_validation = cfg!(debug_assertions);
        let instance = Instance::new(c"Aurora", enable_validation)?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;

        let device = Device::new(&instance, &physical_device_info)?;

        let swapchain = Swapchain::new(&instance, device.clone(), surface.handle(), width, height)?;

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: swapchain.extent(),
        };
        let render_pass = RenderPass::new(
            device.clone(),
            swapchain.format(),
            render_area,
            CLEAR_COLOR,
        )?;

        let framebuffers = Self::create_framebuffers(&device, &swapchain, &render_pass)?;

        let graphics_family = device
            .queue_families()
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;
        let command_buffers = command_pool.allocate(swapchain.image_count() as u32)?;

        let mut frame_slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        let mut global_ubos = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            frame_slots.push(FrameSync::new(device.clone())?);
            global_ubos.push(Buffer::new(
                device.clone(),
                BufferUsage::Uniform,
                GlobalUniforms::SIZE as u64,
            )?);
        }

        Ok(Self {
            instance: ManuallyDrop::new(instance),
            surface: ManuallyDrop::new(surface),
            device,
            swapchain: ManuallyDrop::new(swapchain),
            render_pass: ManuallyDrop::new(render_pass),
            framebuffers,
            command_pool: ManuallyDrop::new(command_pool),
            command_buffers,
            frame_slots,
            global_ubos,
            width,
            height,
        })
    }

    /// One framebuffer per swapchain image, sharing the depth view.
    fn create_framebuffers(
        device: &Arc<Device>,
        swapchain: &Swapchain,
        render_pass: &RenderPass,
    ) -> RhiResult<Vec<Framebuffer>> {
        let extent = swapchain.extent();
        let mut framebuffers = Vec::with_capacity(swapchain.image_count());
        for index in 0..swapchain.image_count() {
            framebuffers.push(Framebuffer::new(
                device.clone(),
                render_pass,
                swapchain.image_view(index),
                swapchain.depth_view(),
                extent,
            )?);
        }
        Ok(framebuffers)
    }

    /// Begins recording for the acquired image: resets the buffer, sets
    /// viewport and scissor, and opens the render pass on the image's
    /// framebuffer.
    fn begin_recording(&mut self, image_index: u32) -> RhiResult<()> {
        let extent = self.swapchain.extent();
        let index = image_index as usize;

        let cb = &mut self.command_buffers[index];
        cb.reset()?;
        cb.begin(false, false, false)?;

        cb.set_viewport(&vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        cb.set_scissor(&vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        });

        self.render_pass.begin(cb, self.framebuffers[index].handle())
    }

    /// Closes the render pass and ends recording for the acquired image.
    fn end_recording(&mut self, image_index: u32) -> RhiResult<()> {
        let cb = &mut self.command_buffers[image_index as usize];
        self.render_pass.end(cb)?;
        cb.end()
    }
}

impl FrameDriver for VulkanContext {
    fn wait_slot_fence(&mut self, slot: usize, timeout_ns: u64) -> RhiResult<FenceWaitOutcome> {
        self.frame_slots[slot].in_flight_mut().wait(timeout_ns)
    }

    fn wait_image_fence(&mut self, owner_slot: usize) -> RhiResult<FenceWaitOutcome> {
        self.frame_slots[owner_slot].in_flight_mut().wait(u64::MAX)
    }

    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
        let semaphore = self.frame_slots[slot].image_available();
        match self.swapchain.acquire_next_image(semaphore) {
            Ok((image_index, _suboptimal)) => Ok(AcquireOutcome::Acquired(image_index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(e) => Err(RhiError::VulkanError(e)),
        }
    }

    fn reset_slot_fence(&mut self, slot: usize) -> RhiResult<()> {
        self.frame_slots[slot].in_flight_mut().reset()
    }

    fn submit_frame(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
        let slot_sync = &self.frame_slots[slot];
        let wait_semaphores = [slot_sync.image_available()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot_sync.queue_complete()];
        let fence = slot_sync.in_flight().handle();
        let queue = self.device.graphics_queue();

        self.command_buffers[image_index as usize].submit(
            queue,
            &wait_semaphores,
            &wait_stages,
            &signal_semaphores,
            fence,
        )
    }

    fn present_frame(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
        let wait_semaphore = self.frame_slots[slot].queue_complete();
        match self
            .swapchain
            .present(self.device.present_queue(), image_index, wait_semaphore)
        {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => {
                debug!("present reported suboptimal swapchain");
                Ok(PresentOutcome::Stale)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::SUBOPTIMAL_KHR) => {
                Ok(PresentOutcome::Stale)
            }
            Err(e) => Err(RhiError::VulkanError(e)),
        }
    }

    fn recreate_swapchain(&mut self) -> RhiResult<usize> {
        self.swapchain.recreate(
            &self.instance,
            self.surface.handle(),
            self.width,
            self.height,
        )?;

        self.render_pass.set_render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.swapchain.extent(),
        });

        self.framebuffers.clear();
        self.framebuffers =
            Self::create_framebuffers(&self.device, &self.swapchain, &self.render_pass)?;

        // Image count may have changed; regenerate the per-image buffers.
        for cb in self.command_buffers.drain(..) {
            self.command_pool.free(cb);
        }
        self.command_buffers = self.command_pool.allocate(self.swapchain.image_count() as u32)?;

        debug!(
            "swapchain rebuilt at {}x{} with {} images",
            self.width,
            self.height,
            self.swapchain.image_count()
        );
        Ok(self.swapchain.image_count())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("failed to wait for device idle during context drop: {e:?}");
        }

        self.frame_slots.clear();
        self.global_ubos.clear();
        self.framebuffers.clear();
        for cb in self.command_buffers.drain(..) {
            self.command_pool.free(cb);
        }

        unsafe {
            ManuallyDrop::drop(&mut self.command_pool);
            ManuallyDrop::drop(&mut self.render_pass);
            ManuallyDrop::drop(&mut self.swapchain);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }
    }
}

/// Main renderer driving the frame protocol over the Vulkan context.
pub struct Renderer {
    context: VulkanContext,
    sequencer: FrameSequencer,
    globals: GlobalUniforms,
    framebuffer_resized: bool,
}

impl Renderer {
    /// Creates a renderer for the given window.
    ///
    /// # Errors
    ///
    /// Fails when no suitable GPU exists or any Vulkan resource
    /// creation fails.
    pub fn new(window: &Window) -> RhiResult<Self> {
        info!(
            "initializing renderer ({}x{})",
            window.width(),
            window.height()
        );

        let context = VulkanContext::new(window)?;
        let sequencer =
            FrameSequencer::new(MAX_FRAMES_IN_FLIGHT, context.swapchain.image_count());

        info!(
            "renderer ready: {} swapchain images, {} frames in flight",
            context.swapchain.image_count(),
            MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            context,
            sequencer,
            globals: GlobalUniforms::default(),
            framebuffer_resized: false,
        })
    }

    /// Notifies the renderer of a new framebuffer size. The swapchain is
    /// rebuilt before the next acquire, not immediately.
    pub fn notify_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            debug!("ignoring resize to zero dimensions");
            return;
        }
        if width != self.context.width || height != self.context.height {
            debug!(
                "resize {}x{} -> {}x{}",
                self.context.width, self.context.height, width, height
            );
            self.context.width = width;
            self.context.height = height;
            self.framebuffer_resized = true;
        }
    }

    /// Starts a frame: consumes any pending resize, waits on the slot
    /// fence, acquires an image, and opens its command buffer and render
    /// pass.
    ///
    /// Returns `Ok(false)` when the frame was skipped (fence timeout,
    /// device loss, or swapchain rebuild); the caller retries next loop
    /// iteration.
    pub fn begin_frame(&mut self, delta_time: f32) -> RhiResult<bool> {
        trace!("begin_frame, delta {delta_time}");

        if self.framebuffer_resized {
            let image_count = self.context.recreate_swapchain()?;
            self.sequencer.note_recreated(image_count);
            self.framebuffer_resized = false;
        }

        match self.sequencer.begin_frame(&mut self.context)? {
            BeginFrameOutcome::Skipped => Ok(false),
            BeginFrameOutcome::Acquired(image_index) => {
                self.context.begin_recording(image_index)?;
                Ok(true)
            }
        }
    }

    /// Finishes a frame: closes the render pass, submits the command
    /// buffer, and presents.
    ///
    /// Returns `Ok(false)` when no frame was in progress.
    pub fn end_frame(&mut self) -> RhiResult<bool> {
        let Some(image_index) = self.sequencer.acquired_image() else {
            return Ok(false);
        };

        self.context.end_recording(image_index)?;
        self.sequencer.end_frame(&mut self.context)
    }

    /// Stores the camera matrices and writes them into the current
    /// slot's global uniform buffer.
    pub fn update_global_state(&mut self, projection: Mat4, view: Mat4) -> RhiResult<()> {
        self.globals = GlobalUniforms::new(projection, view);
        let slot = self.sequencer.current_slot();
        self.context.global_ubos[slot].write(0, bytemuck::bytes_of(&self.globals))
    }

    /// The command buffer for the image acquired by the in-progress
    /// frame. `None` outside begin/end.
    pub fn active_command_buffer(&mut self) -> Option<&mut CommandBuffer> {
        let image_index = self.sequencer.acquired_image()?;
        Some(&mut self.context.command_buffers[image_index as usize])
    }

    /// The render pass every framebuffer targets.
    #[inline]
    pub fn render_pass(&self) -> &RenderPass {
        &self.context.render_pass
    }

    /// Current swapchain extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.context.swapchain.extent()
    }

    /// Current swapchain surface format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.context.swapchain.format()
    }
}
