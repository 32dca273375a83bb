// Frame loop - acquire, submit, present, with F frames in flight
//
// Per frame slot:   Idle (fence signalled) -> Submitted (fence unsignalled)
//                   -> Idle once the GPU signals the fence
//
// Each tick:  wait(fence[f]) -> reset(fence[f]) -> acquire(image_available[f])
//             -> submit(cmd[image], wait image_available[f] at color output,
//                       signal render_finished[f] + fence[f])
//             -> present(image, wait render_finished[f]) -> f = (f + 1) % F
//
// The fence wait is the only place the CPU blocks. It caps the CPU at F
// submitted-but-unfinished frames, and because a slot is never reused before
// its fence fires, its semaphores are never re-signalled while still pending.

use super::device::DeviceContext;
use super::error::{RendererError, Result};
use super::swapchain::SwapRing;
use super::sync::FrameSync;
use ash::vk;
use std::sync::Arc;

/// The operations one tick is built from. The Vulkan implementation is
/// below; tests drive the same loop with a simulated GPU.
pub trait FrameBackend {
    type Slot;

    fn create_slot(&self) -> Result<Self::Slot>;
    fn wait_for_fence(&self, slot: &Self::Slot, timeout_ns: u64) -> Result<()>;
    fn reset_fence(&self, slot: &Self::Slot) -> Result<()>;
    fn acquire_image(&self, slot: &Self::Slot) -> Result<u32>;
    fn submit(&self, slot: &Self::Slot, image_index: u32) -> Result<()>;
    fn present(&self, slot: &Self::Slot, image_index: u32) -> Result<()>;
    fn wait_idle(&self) -> Result<()>;
}

/// What a completed tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub slot: usize,
    pub image_index: u32,
    pub frame_number: u64,
}

pub struct FrameLoop<S> {
    slots: Vec<S>,
    current: usize,
    frames_drawn: u64,
    fence_timeout_ns: u64,
}

impl<S> FrameLoop<S> {
    pub fn new<B>(backend: &B, frames_in_flight: usize, fence_timeout_ns: u64) -> Result<Self>
    where
        B: FrameBackend<Slot = S>,
    {
        let count = frames_in_flight.max(1);
        let slots = (0..count)
            .map(|_| backend.create_slot())
            .collect::<Result<Vec<_>>>()?;

        log::info!("Created {} frame slots", count);
        Ok(Self {
            slots,
            current: 0,
            frames_drawn: 0,
            fence_timeout_ns,
        })
    }

    /// Run one acquire -> submit -> present cycle on the current slot.
    /// Any error is fatal; the slot index does not advance.
    pub fn draw<B>(&mut self, backend: &B) -> Result<FrameInfo>
    where
        B: FrameBackend<Slot = S>,
    {
        let slot = &self.slots[self.current];

        backend.wait_for_fence(slot, self.fence_timeout_ns)?;
        backend.reset_fence(slot)?;

        let image_index = backend.acquire_image(slot)?;
        backend.submit(slot, image_index)?;
        backend.present(slot, image_index)?;

        let info = FrameInfo {
            slot: self.current,
            image_index,
            frame_number: self.frames_drawn,
        };
        log::trace!(
            "Frame {}: slot {} image {}",
            info.frame_number,
            info.slot,
            info.image_index
        );

        self.current = (self.current + 1) % self.slots.len();
        self.frames_drawn += 1;
        Ok(info)
    }

    /// Block until no submitted work remains. Slots may be destroyed after.
    pub fn drain<B>(&self, backend: &B) -> Result<()>
    where
        B: FrameBackend<Slot = S>,
    {
        backend.wait_idle()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }
}

impl<S> Drop for FrameLoop<S> {
    fn drop(&mut self) {
        log::debug!("Destroying {} frame slots", self.slots.len());
    }
}

/// Vulkan side of the frame loop, borrowed from the renderer for each call
pub struct VulkanFrames<'a> {
    pub device: &'a Arc<DeviceContext>,
    pub swap_ring: &'a SwapRing,
    pub command_buffers: &'a [vk::CommandBuffer],
}

impl FrameBackend for VulkanFrames<'_> {
    type Slot = FrameSync;

    fn create_slot(&self) -> Result<FrameSync> {
        FrameSync::new(self.device.clone())
    }

    fn wait_for_fence(&self, slot: &FrameSync, timeout_ns: u64) -> Result<()> {
        slot.wait(timeout_ns)
    }

    fn reset_fence(&self, slot: &FrameSync) -> Result<()> {
        slot.reset()
    }

    fn acquire_image(&self, slot: &FrameSync) -> Result<u32> {
        self.swap_ring.acquire_next_image(u64::MAX, slot.image_available)
    }

    fn submit(&self, slot: &FrameSync, image_index: u32) -> Result<()> {
        let command_buffer = self
            .command_buffers
            .get(image_index as usize)
            .copied()
            .ok_or(RendererError::Device {
                op: "submit",
                result: vk::Result::ERROR_UNKNOWN,
            })?;

        // Only color output waits for the image; earlier stages may run ahead
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let wait_semaphores = [slot.image_available];
        let signal_semaphores = [slot.render_finished];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                slot.in_flight_fence,
            )
        }
        .map_err(RendererError::device("queue submit"))
    }

    fn present(&self, slot: &FrameSync, image_index: u32) -> Result<()> {
        self.swap_ring
            .present(self.device.presentation_queue, image_index, &[slot.render_finished])
    }

    fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}
