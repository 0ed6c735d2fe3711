//! Fences and semaphores.
//!
//! Semaphores order GPU work against GPU work; fences let the host wait
//! for submissions to retire. [`FrameSync`] bundles the trio a frame
//! slot needs: an image-available semaphore, a queue-complete semaphore,
//! and an in-flight fence.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Number of frame slots cycled by the renderer.
///
/// Two lets the CPU record frame k+1 while the GPU renders frame k.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Binary semaphore for queue-to-queue ordering.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled semaphore.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// What a fence wait produced.
///
/// Timeout and device loss are reported rather than raised so the frame
/// loop can skip a frame instead of tearing down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceWaitOutcome {
    /// The fence signaled within the timeout.
    Signaled,
    /// The timeout expired first.
    Timeout,
    /// The device was lost while waiting.
    DeviceLost,
}

/// Host-visible fence tracking whether its submission has retired.
///
/// Mirrors the signaled state on the CPU side so a wait on an
/// already-signaled fence is free.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
    signaled: bool,
}

impl Fence {
    /// Creates a fence, optionally pre-signaled. Frame slots start
    /// signaled so the first wait falls through.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        Ok(Self {
            device,
            fence,
            signaled,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.signaled
    }

    /// Waits up to `timeout_ns` for the fence to signal.
    ///
    /// Returns immediately when the cached state says the fence already
    /// signaled. Timeout and device loss come back as outcomes; other
    /// wait failures are errors.
    pub fn wait(&mut self, timeout_ns: u64) -> Result<FenceWaitOutcome, RhiError> {
        if self.signaled {
            return Ok(FenceWaitOutcome::Signaled);
        }

        let fences = [self.fence];
        match unsafe { self.device.handle().wait_for_fences(&fences, true, timeout_ns) } {
            Ok(()) => {
                self.signaled = true;
                Ok(FenceWaitOutcome::Signaled)
            }
            Err(vk::Result::TIMEOUT) => {
                warn!("fence wait timed out after {timeout_ns}ns");
                Ok(FenceWaitOutcome::Timeout)
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                warn!("device lost while waiting on fence");
                Ok(FenceWaitOutcome::DeviceLost)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Resets the fence to unsignaled ahead of a new submission.
    pub fn reset(&mut self) -> Result<(), RhiError> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        self.signaled = false;
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization bundle for one frame slot.
///
/// Wait/signal pattern per frame:
/// 1. wait + reset `in_flight` (previous use of this slot retired)
/// 2. acquire signals `image_available`
/// 3. submit waits `image_available`, signals `queue_complete` and `in_flight`
/// 4. present waits `queue_complete`
pub struct FrameSync {
    image_available: Semaphore,
    queue_complete: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    /// Creates the slot's semaphores plus a pre-signaled fence.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let queue_complete = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        debug!("created frame slot sync objects");

        Ok(Self {
            image_available,
            queue_complete,
            in_flight,
        })
    }

    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle()
    }

    #[inline]
    pub fn queue_complete(&self) -> vk::Semaphore {
        self.queue_complete.handle()
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }

    #[inline]
    pub fn in_flight_mut(&mut self) -> &mut Fence {
        &mut self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_in_flight_is_sane() {
        assert!(MAX_FRAMES_IN_FLIGHT >= 1);
        assert!(MAX_FRAMES_IN_FLIGHT <= 4);
    }

    #[test]
    fn sync_objects_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<FrameSync>();
    }
}
