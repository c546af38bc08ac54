//! Frame synchronization for frames in flight
//!
//! Each in-flight slot owns three objects:
//! - an image-available semaphore, signaled by acquire
//! - a render-finished semaphore, signaled by the submit and waited by present
//! - a fence, signaled when the slot's command buffer has finished executing
//!
//! A slot cycles through [`FrameSlotState`]:
//! ```text
//! Available -> Submitted -> Rendering -> Presented -> Available
//! ```
//! The CPU waits on a slot's fence before touching anything the slot used.
//! Fences start signaled so the first frame through each slot does not block.
//! The slot count is fixed when the set is built and never changes.

use ash::vk;
use log::{debug, warn};

use crate::render::device::{DeviceRef, GpuError, GpuResult};

/// Binary semaphore destroyed on drop
pub struct Semaphore {
    device: DeviceRef,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a semaphore
    pub fn new(device: DeviceRef) -> GpuResult<Self> {
        let semaphore = device.create_semaphore()?;
        Ok(Self { device, semaphore })
    }

    /// Semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
    }
}

/// Fence destroyed on drop
pub struct Fence {
    device: DeviceRef,
    fence: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signaled
    pub fn new(device: DeviceRef, signaled: bool) -> GpuResult<Self> {
        let fence = device.create_fence(signaled)?;
        Ok(Self { device, fence })
    }

    /// Block until signaled; a timeout is an error
    pub fn wait(&self, timeout_ns: u64) -> GpuResult<()> {
        self.device.wait_for_fence(self.fence, timeout_ns)
    }

    /// Back to unsignaled
    pub fn reset(&self) -> GpuResult<()> {
        self.device.reset_fence(self.fence)
    }

    /// Fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
    }
}

/// Where a frame slot is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSlotState {
    /// Fence observed signaled; the CPU owns the slot
    Available,
    /// A swapchain image was acquired for the slot
    Submitted,
    /// The slot's command buffer is queued on the GPU
    Rendering,
    /// The image was handed to the presentation engine
    Presented,
}

/// Synchronization objects of one in-flight slot
pub struct FrameSync {
    /// Signaled when the acquired image is ready to be drawn
    pub image_available: Semaphore,
    /// Signaled when rendering finished; present waits on it
    pub render_finished: Semaphore,
    /// Signaled when the slot's GPU work has completed
    pub in_flight: Fence,
    state: FrameSlotState,
}

impl FrameSync {
    fn new(device: &DeviceRef) -> GpuResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device.clone(), true)?,
            state: FrameSlotState::Available,
        })
    }

    /// Current state
    pub fn state(&self) -> FrameSlotState {
        self.state
    }
}

/// Round-robin set of frame slots plus the image-to-slot map
pub struct FrameSyncSet {
    frames: Vec<FrameSync>,
    images_in_flight: Vec<Option<usize>>,
    current: usize,
    timeout_ns: u64,
}

impl FrameSyncSet {
    /// Build `max_frames_in_flight` slots for a swapchain of `image_count` images
    pub fn new(device: &DeviceRef, max_frames_in_flight: u32, image_count: u32, timeout_ns: u64) -> GpuResult<Self> {
        if max_frames_in_flight == 0 {
            return Err(GpuError::InvalidOperation("At least one frame in flight is required".to_string()));
        }
        let frames = (0..max_frames_in_flight)
            .map(|_| FrameSync::new(device))
            .collect::<GpuResult<Vec<_>>>()?;
        debug!("Created {} frame sync slots", frames.len());
        Ok(Self {
            frames,
            images_in_flight: vec![None; image_count as usize],
            current: 0,
            timeout_ns,
        })
    }

    /// Index of the current slot
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// The current slot
    pub fn current(&self) -> &FrameSync {
        &self.frames[self.current]
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Wait until the current slot's previous GPU work is done
    pub fn wait_current(&mut self) -> GpuResult<()> {
        let frame = &mut self.frames[self.current];
        frame.in_flight.wait(self.timeout_ns)?;
        frame.state = FrameSlotState::Available;
        Ok(())
    }

    /// Bind the acquired image to the current slot. If another slot still
    /// renders into that image, wait for it first.
    pub fn claim_image(&mut self, image_index: u32) -> GpuResult<()> {
        let image = image_index as usize;
        if image >= self.images_in_flight.len() {
            self.images_in_flight.resize(image + 1, None);
        }
        if let Some(owner) = self.images_in_flight[image] {
            if owner != self.current {
                self.frames[owner].in_flight.wait(self.timeout_ns)?;
            }
        }
        self.images_in_flight[image] = Some(self.current);
        self.transition(FrameSlotState::Available, FrameSlotState::Submitted);
        Ok(())
    }

    /// Reset the current fence right before the submit that will signal it
    pub fn reset_current(&self) -> GpuResult<()> {
        self.current().in_flight.reset()
    }

    /// The current slot's command buffer was queued
    pub fn mark_rendering(&mut self) {
        self.transition(FrameSlotState::Submitted, FrameSlotState::Rendering);
    }

    /// The current slot's image was queued for presentation
    pub fn mark_presented(&mut self) {
        self.transition(FrameSlotState::Rendering, FrameSlotState::Presented);
    }

    /// Move to the next slot, wrapping at the slot count
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames.len();
    }

    /// Forget image ownership after the swapchain was rebuilt
    pub fn reset_images(&mut self, image_count: u32) {
        self.images_in_flight = vec![None; image_count as usize];
    }

    fn transition(&mut self, from: FrameSlotState, to: FrameSlotState) {
        let frame = &mut self.frames[self.current];
        if frame.state != from {
            warn!(
                "Frame slot {} moved to {:?} from {:?}, expected {:?}",
                self.current, to, frame.state, from
            );
        }
        frame.state = to;
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::render::device::{AcquiredImage, GpuDevice, HeadlessDevice};

    fn submit_current(device: &HeadlessDevice, sync: &mut FrameSyncSet, command_buffer: vk::CommandBuffer) {
        sync.wait_current().unwrap();
        sync.claim_image(sync.current_index() as u32).unwrap();
        sync.reset_current().unwrap();
        device.begin_command_buffer(command_buffer).unwrap();
        device.end_command_buffer(command_buffer).unwrap();
        let frame = sync.current();
        device
            .submit(
                command_buffer,
                frame.image_available.handle(),
                frame.render_finished.handle(),
                frame.in_flight.handle(),
            )
            .unwrap();
        sync.mark_rendering();
        sync.mark_presented();
        sync.advance();
    }

    #[test]
    fn test_round_robin_fence_cycle() {
        let headless = Rc::new(HeadlessDevice::new(2, (64, 64)));
        let device: DeviceRef = headless.clone();
        let mut sync = FrameSyncSet::new(&device, 2, 2, 1_000).unwrap();
        let command_buffer = headless.allocate_command_buffers(1).unwrap()[0];

        let slot0 = sync.current().in_flight.handle();
        let submissions = 4;
        for _ in 0..submissions {
            submit_current(&headless, &mut sync, command_buffer);
        }

        assert_eq!(sync.current_index(), 0);
        assert_eq!(headless.fence_wait_count(slot0), submissions / 2);
        assert_eq!(headless.fence_signal_count(slot0), submissions / 2);
        assert_eq!(headless.fence_reset_count(slot0), submissions / 2);
    }

    fn submit_acquired(device: &HeadlessDevice, sync: &mut FrameSyncSet, command_buffer: vk::CommandBuffer) -> u32 {
        sync.wait_current().unwrap();
        let AcquiredImage::Ready(image) = device
            .acquire_next_image(sync.current().image_available.handle(), 1_000)
            .unwrap()
        else {
            panic!("swapchain unexpectedly out of date");
        };
        sync.claim_image(image).unwrap();
        sync.reset_current().unwrap();
        device.begin_command_buffer(command_buffer).unwrap();
        device.end_command_buffer(command_buffer).unwrap();
        let frame = sync.current();
        device
            .submit(
                command_buffer,
                frame.image_available.handle(),
                frame.render_finished.handle(),
                frame.in_flight.handle(),
            )
            .unwrap();
        sync.mark_rendering();
        sync.mark_presented();
        sync.advance();
        image
    }

    #[test]
    fn test_image_held_by_other_slot_waits_on_its_fence() {
        let headless = Rc::new(HeadlessDevice::new(3, (64, 64)));
        let device: DeviceRef = headless.clone();
        let mut sync = FrameSyncSet::new(&device, 2, 3, 1_000).unwrap();
        let command_buffer = headless.allocate_command_buffers(1).unwrap()[0];
        let slot0 = sync.frames[0].in_flight.handle();
        let slot1 = sync.frames[1].in_flight.handle();

        headless.script_acquire_order(&[0, 0, 1]);

        assert_eq!(submit_acquired(&headless, &mut sync, command_buffer), 0);
        assert_eq!(headless.fence_wait_count(slot0), 1);

        // slot 1 gets image 0 while slot 0 still owns it
        assert_eq!(submit_acquired(&headless, &mut sync, command_buffer), 0);
        assert_eq!(headless.fence_wait_count(slot0), 2);
        assert_eq!(headless.fence_wait_count(slot1), 1);
        assert_eq!(sync.images_in_flight[0], Some(1));

        // a free image only costs the slot's own fence
        assert_eq!(submit_acquired(&headless, &mut sync, command_buffer), 1);
        assert_eq!(headless.fence_wait_count(slot0), 3);
        assert_eq!(headless.fence_wait_count(slot1), 1);
        assert_eq!(sync.images_in_flight, vec![Some(1), Some(0), None]);
    }

    #[test]
    fn test_slot_states_follow_cycle() {
        let headless = Rc::new(HeadlessDevice::new(2, (64, 64)));
        let device: DeviceRef = headless.clone();
        let mut sync = FrameSyncSet::new(&device, 2, 2, 1_000).unwrap();

        sync.wait_current().unwrap();
        assert_eq!(sync.current().state(), FrameSlotState::Available);
        sync.claim_image(0).unwrap();
        assert_eq!(sync.current().state(), FrameSlotState::Submitted);
        sync.mark_rendering();
        assert_eq!(sync.current().state(), FrameSlotState::Rendering);
        sync.mark_presented();
        assert_eq!(sync.current().state(), FrameSlotState::Presented);
    }

    #[test]
    fn test_fences_start_signaled() {
        let headless = Rc::new(HeadlessDevice::default());
        let device: DeviceRef = headless.clone();
        let sync = FrameSyncSet::new(&device, 3, 3, 1_000).unwrap();
        for index in 0..3 {
            assert!(headless.fence_signaled(sync.frames[index].in_flight.handle()));
        }
        assert!(FrameSyncSet::new(&device, 0, 3, 1_000).is_err());
    }
}
