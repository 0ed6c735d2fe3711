//! Frame-slot sequencing over the swapchain.
//!
//! This module implements the frames-in-flight protocol that keeps N CPU
//! frame slots and M swapchain images from stepping on each other:
//!
//! 1. Wait on the current slot's fence (previous use of the slot retired)
//! 2. Acquire the next swapchain image
//! 3. Guard: if another slot still owns the acquired image, wait on its
//!    fence, then take ownership
//! 4. Reset the slot fence and submit the image's command buffer
//! 5. Present, gated on the queue-complete semaphore
//! 6. Advance the slot index modulo N
//!
//! The protocol lives in [`FrameSequencer`] and talks to the GPU through
//! the [`FrameDriver`] trait, so the ordering rules can be exercised
//! against a recording mock without a device.

use tracing::{debug, warn};

use aurora_rhi::RhiResult;
use aurora_rhi::sync::FenceWaitOutcome;

/// Result of asking the driver for the next presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready; the slot's image-available semaphore will be
    /// signaled when it is safe to write.
    Acquired(u32),
    /// The surface is stale. The frame must be abandoned and the
    /// swapchain rebuilt.
    Stale,
}

/// Result of handing an image to the presentation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The image was queued for presentation.
    Presented,
    /// Presented, but the swapchain no longer matches the surface and
    /// should be rebuilt before the next frame.
    Stale,
}

/// Outcome of [`FrameSequencer::begin_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginFrameOutcome {
    /// An image index was acquired; record into its command buffer.
    Acquired(u32),
    /// The frame was abandoned (fence timeout, device loss, or a stale
    /// acquire). Skip recording and try again next loop iteration.
    Skipped,
}

/// Everything the sequencer needs from the GPU side.
///
/// Slot indices address the N frame slots; image indices address the M
/// swapchain images. The production implementation is the renderer's
/// Vulkan context; tests substitute a recording mock.
pub trait FrameDriver {
    /// Waits on `slot`'s in-flight fence.
    fn wait_slot_fence(&mut self, slot: usize, timeout_ns: u64) -> RhiResult<FenceWaitOutcome>;

    /// Waits on the fence of the slot currently rendering into an image.
    fn wait_image_fence(&mut self, owner_slot: usize) -> RhiResult<FenceWaitOutcome>;

    /// Acquires the next image, signaling `slot`'s image-available
    /// semaphore.
    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome>;

    /// Resets `slot`'s in-flight fence to unsignaled.
    fn reset_slot_fence(&mut self, slot: usize) -> RhiResult<()>;

    /// Submits the command buffer for `image_index`, waiting on `slot`'s
    /// image-available semaphore and signaling its queue-complete
    /// semaphore and in-flight fence.
    fn submit_frame(&mut self, slot: usize, image_index: u32) -> RhiResult<()>;

    /// Presents `image_index`, gated on `slot`'s queue-complete
    /// semaphore.
    fn present_frame(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome>;

    /// Rebuilds the swapchain and everything sized by it. Returns the
    /// new image count.
    fn recreate_swapchain(&mut self) -> RhiResult<usize>;
}

/// Drives the six-step frame protocol across N slots and M images.
///
/// The in-flight table maps image index to the slot whose fence must be
/// signaled before that image may be written again. It is the only
/// mechanism preventing write hazards when N differs from M and is
/// consulted on every frame including the first.
pub struct FrameSequencer {
    slot_count: usize,
    current_slot: usize,
    images_in_flight: Vec<Option<usize>>,
    acquired_image: Option<u32>,
    fence_timeout_ns: u64,
}

impl FrameSequencer {
    /// Creates a sequencer for `slot_count` frame slots and `image_count`
    /// swapchain images. All in-flight entries start empty.
    pub fn new(slot_count: usize, image_count: usize) -> Self {
        Self {
            slot_count,
            current_slot: 0,
            images_in_flight: vec![None; image_count],
            acquired_image: None,
            fence_timeout_ns: u64::MAX,
        }
    }

    /// Caps how long step 1 blocks on the slot fence. Defaults to
    /// unbounded.
    pub fn set_fence_timeout(&mut self, timeout_ns: u64) {
        self.fence_timeout_ns = timeout_ns;
    }

    /// The slot the next (or in-progress) frame uses.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// The image index acquired by the in-progress frame, if any.
    #[inline]
    pub fn acquired_image(&self) -> Option<u32> {
        self.acquired_image
    }

    /// Resynchronizes after a swapchain rebuild: slot bookkeeping from
    /// the old swapchain is invalid, so the cycle restarts at slot 0
    /// with an empty in-flight table sized for the new image count.
    pub fn note_recreated(&mut self, image_count: usize) {
        self.current_slot = 0;
        self.images_in_flight = vec![None; image_count];
        self.acquired_image = None;
        debug!("frame sequencer reset for {image_count} swapchain images");
    }

    /// Steps 1 and 2: wait on the slot fence, then acquire an image.
    ///
    /// A fence timeout or device loss during the wait abandons the frame
    /// with a warning instead of failing; the loop simply runs again. A
    /// stale acquire rebuilds the swapchain through the driver and also
    /// abandons the frame.
    pub fn begin_frame<D: FrameDriver>(&mut self, driver: &mut D) -> RhiResult<BeginFrameOutcome> {
        let slot = self.current_slot;

        match driver.wait_slot_fence(slot, self.fence_timeout_ns)? {
            FenceWaitOutcome::Signaled => {}
            FenceWaitOutcome::Timeout => {
                warn!("slot {slot} fence wait timed out, skipping frame");
                return Ok(BeginFrameOutcome::Skipped);
            }
            FenceWaitOutcome::DeviceLost => {
                warn!("device lost while waiting on slot {slot} fence, skipping frame");
                return Ok(BeginFrameOutcome::Skipped);
            }
        }

        match driver.acquire_image(slot)? {
            AcquireOutcome::Acquired(image_index) => {
                self.acquired_image = Some(image_index);
                Ok(BeginFrameOutcome::Acquired(image_index))
            }
            AcquireOutcome::Stale => {
                debug!("stale acquire, rebuilding swapchain");
                let image_count = driver.recreate_swapchain()?;
                self.note_recreated(image_count);
                Ok(BeginFrameOutcome::Skipped)
            }
        }
    }

    /// Steps 3 through 6: guard the acquired image, reset the slot
    /// fence, submit, present, advance.
    ///
    /// Returns `Ok(true)` when a frame was submitted and presented,
    /// `Ok(false)` when there was no acquired image to finish or the
    /// guard wait failed and the frame was abandoned.
    pub fn end_frame<D: FrameDriver>(&mut self, driver: &mut D) -> RhiResult<bool> {
        let Some(image_index) = self.acquired_image.take() else {
            debug!("end_frame without an acquired image, nothing to do");
            return Ok(false);
        };

        let slot = self.current_slot;
        let image = image_index as usize;

        // Guard: another slot may still be rendering into this image.
        // If the owner's fence never signals the image must not be
        // submitted again, so the frame is abandoned with the table
        // entry untouched.
        if let Some(owner) = self.images_in_flight[image]
            && owner != slot
        {
            match driver.wait_image_fence(owner)? {
                FenceWaitOutcome::Signaled => {}
                outcome => {
                    warn!(
                        "guard wait on image {image} (slot {owner}) returned {outcome:?}, \
                         abandoning frame"
                    );
                    return Ok(false);
                }
            }
        }
        self.images_in_flight[image] = Some(slot);

        driver.reset_slot_fence(slot)?;
        driver.submit_frame(slot, image_index)?;

        let present = driver.present_frame(slot, image_index)?;
        self.current_slot = (self.current_slot + 1) % self.slot_count;

        if present == PresentOutcome::Stale {
            debug!("stale present, rebuilding swapchain");
            let image_count = driver.recreate_swapchain()?;
            self.note_recreated(image_count);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        WaitSlot(usize),
        WaitImage(usize),
        Acquire(usize),
        ResetSlot(usize),
        Submit(usize, u32),
        Present(usize, u32),
        Recreate,
    }

    struct MockDriver {
        image_count: usize,
        next_image: u32,
        events: Vec<Event>,
        stale_on_acquire: Option<usize>,
        timeout_on_wait: Option<usize>,
        image_wait_outcome: FenceWaitOutcome,
        acquire_calls: usize,
        wait_calls: usize,
    }

    impl MockDriver {
        fn new(image_count: usize) -> Self {
            Self {
                image_count,
                next_image: 0,
                events: Vec::new(),
                stale_on_acquire: None,
                timeout_on_wait: None,
                image_wait_outcome: FenceWaitOutcome::Signaled,
                acquire_calls: 0,
                wait_calls: 0,
            }
        }
    }

    impl FrameDriver for MockDriver {
        fn wait_slot_fence(
            &mut self,
            slot: usize,
            _timeout_ns: u64,
        ) -> RhiResult<FenceWaitOutcome> {
            self.events.push(Event::WaitSlot(slot));
            self.wait_calls += 1;
            if self.timeout_on_wait == Some(self.wait_calls) {
                return Ok(FenceWaitOutcome::Timeout);
            }
            Ok(FenceWaitOutcome::Signaled)
        }

        fn wait_image_fence(&mut self, owner_slot: usize) -> RhiResult<FenceWaitOutcome> {
            self.events.push(Event::WaitImage(owner_slot));
            Ok(self.image_wait_outcome)
        }

        fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
            self.events.push(Event::Acquire(slot));
            self.acquire_calls += 1;
            if self.stale_on_acquire == Some(self.acquire_calls) {
                return Ok(AcquireOutcome::Stale);
            }
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count as u32;
            Ok(AcquireOutcome::Acquired(image))
        }

        fn reset_slot_fence(&mut self, slot: usize) -> RhiResult<()> {
            self.events.push(Event::ResetSlot(slot));
            Ok(())
        }

        fn submit_frame(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
            self.events.push(Event::Submit(slot, image_index));
            Ok(())
        }

        fn present_frame(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
            self.events.push(Event::Present(slot, image_index));
            Ok(PresentOutcome::Presented)
        }

        fn recreate_swapchain(&mut self) -> RhiResult<usize> {
            self.events.push(Event::Recreate);
            self.next_image = 0;
            Ok(self.image_count)
        }
    }

    fn run_frame(seq: &mut FrameSequencer, driver: &mut MockDriver) -> (BeginFrameOutcome, bool) {
        let begin = seq.begin_frame(driver).unwrap();
        let finished = seq.end_frame(driver).unwrap();
        (begin, finished)
    }

    #[test]
    fn two_slots_three_images_cycles_slots() {
        let mut driver = MockDriver::new(3);
        let mut seq = FrameSequencer::new(2, 3);

        let mut slots = Vec::new();
        for _ in 0..5 {
            slots.push(seq.current_slot());
            let (begin, finished) = run_frame(&mut seq, &mut driver);
            assert!(matches!(begin, BeginFrameOutcome::Acquired(_)));
            assert!(finished);
        }

        assert_eq!(slots, vec![0, 1, 0, 1, 0]);

        // Images cycle 0,1,2,0,1. The first reuse of image 0 happens on
        // frame 4 while slot 0 still owns it, and of image 1 on frame 5
        // while slot 1 owns it.
        let guard_waits: Vec<_> = driver
            .events
            .iter()
            .filter(|e| matches!(e, Event::WaitImage(_)))
            .cloned()
            .collect();
        assert_eq!(guard_waits, vec![Event::WaitImage(0), Event::WaitImage(1)]);
    }

    #[test]
    fn guard_wait_precedes_fence_reset_and_submit() {
        let mut driver = MockDriver::new(3);
        let mut seq = FrameSequencer::new(2, 3);

        for _ in 0..4 {
            run_frame(&mut seq, &mut driver);
        }

        // Frame 4 reuses image 0 owned by slot 0 while slot 1 runs.
        let guard_pos = driver
            .events
            .iter()
            .position(|e| *e == Event::WaitImage(0))
            .unwrap();
        let reset_pos = guard_pos
            + driver.events[guard_pos..]
                .iter()
                .position(|e| *e == Event::ResetSlot(1))
                .unwrap();
        let submit_pos = driver
            .events
            .iter()
            .position(|e| *e == Event::Submit(1, 0))
            .unwrap();

        assert!(guard_pos < reset_pos);
        assert!(reset_pos < submit_pos);
    }

    #[test]
    fn stale_acquire_rebuilds_and_skips_frame() {
        let mut driver = MockDriver::new(3);
        driver.stale_on_acquire = Some(2);
        let mut seq = FrameSequencer::new(2, 3);

        run_frame(&mut seq, &mut driver);

        // Frame 2: acquire reports stale.
        let (begin, finished) = run_frame(&mut seq, &mut driver);
        assert_eq!(begin, BeginFrameOutcome::Skipped);
        assert!(!finished);
        assert!(driver.events.contains(&Event::Recreate));
        assert!(!driver.events.contains(&Event::Submit(1, 1)));

        // After the rebuild the cycle restarts at slot 0 and frame 3
        // proceeds normally.
        assert_eq!(seq.current_slot(), 0);
        let (begin, finished) = run_frame(&mut seq, &mut driver);
        assert!(matches!(begin, BeginFrameOutcome::Acquired(0)));
        assert!(finished);
    }

    #[test]
    fn fewer_images_than_slots_still_guards() {
        // M < N is unusual but the table logic must not assume N <= M.
        let mut driver = MockDriver::new(2);
        let mut seq = FrameSequencer::new(3, 2);

        let mut slots = Vec::new();
        for _ in 0..4 {
            slots.push(seq.current_slot());
            let (begin, finished) = run_frame(&mut seq, &mut driver);
            assert!(matches!(begin, BeginFrameOutcome::Acquired(_)));
            assert!(finished);
        }

        assert_eq!(slots, vec![0, 1, 2, 0]);

        // Images cycle 0,1,0,1: frame 3 (slot 2) reuses image 0 owned by
        // slot 0, frame 4 (slot 0) reuses image 1 owned by slot 1.
        let guard_waits: Vec<_> = driver
            .events
            .iter()
            .filter(|e| matches!(e, Event::WaitImage(_)))
            .cloned()
            .collect();
        assert_eq!(guard_waits, vec![Event::WaitImage(0), Event::WaitImage(1)]);
    }

    #[test]
    fn failed_guard_wait_abandons_frame_without_submitting() {
        let mut driver = MockDriver::new(3);
        let mut seq = FrameSequencer::new(2, 3);

        // Three clean frames; frame 4 (slot 1) reuses image 0, which
        // slot 0 still owns.
        for _ in 0..3 {
            run_frame(&mut seq, &mut driver);
        }

        driver.image_wait_outcome = FenceWaitOutcome::DeviceLost;
        let before = driver.events.len();
        let (begin, finished) = run_frame(&mut seq, &mut driver);
        assert!(matches!(begin, BeginFrameOutcome::Acquired(0)));
        assert!(!finished);

        // The image was never handed to the queue: after the guard wait
        // fails nothing else runs and the slot does not advance.
        assert_eq!(
            driver.events[before..],
            [Event::WaitSlot(1), Event::Acquire(1), Event::WaitImage(0)]
        );
        assert_eq!(seq.current_slot(), 1);

        // Slot 0 still owns image 0, so the retry guards again before
        // proceeding.
        driver.image_wait_outcome = FenceWaitOutcome::Signaled;
        driver.next_image = 0;
        let before = driver.events.len();
        let (begin, finished) = run_frame(&mut seq, &mut driver);
        assert!(matches!(begin, BeginFrameOutcome::Acquired(0)));
        assert!(finished);
        assert_eq!(
            driver.events[before..],
            [
                Event::WaitSlot(1),
                Event::Acquire(1),
                Event::WaitImage(0),
                Event::ResetSlot(1),
                Event::Submit(1, 0),
                Event::Present(1, 0),
            ]
        );
    }

    #[test]
    fn fence_timeout_skips_without_acquiring() {
        let mut driver = MockDriver::new(3);
        driver.timeout_on_wait = Some(1);
        let mut seq = FrameSequencer::new(2, 3);

        let begin = seq.begin_frame(&mut driver).unwrap();
        assert_eq!(begin, BeginFrameOutcome::Skipped);
        assert!(!seq.end_frame(&mut driver).unwrap());

        // No acquire, submit, or present happened and the slot did not
        // advance.
        assert_eq!(driver.events, vec![Event::WaitSlot(0)]);
        assert_eq!(seq.current_slot(), 0);

        // The next frame reuses slot 0 and proceeds.
        let (begin, finished) = run_frame(&mut seq, &mut driver);
        assert!(matches!(begin, BeginFrameOutcome::Acquired(0)));
        assert!(finished);
    }

    #[test]
    fn first_frame_has_no_guard_wait() {
        let mut driver = MockDriver::new(3);
        let mut seq = FrameSequencer::new(2, 3);

        run_frame(&mut seq, &mut driver);

        assert!(
            !driver
                .events
                .iter()
                .any(|e| matches!(e, Event::WaitImage(_)))
        );
        assert_eq!(
            driver.events,
            vec![
                Event::WaitSlot(0),
                Event::Acquire(0),
                Event::ResetSlot(0),
                Event::Submit(0, 0),
                Event::Present(0, 0),
            ]
        );
    }
}
