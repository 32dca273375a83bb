// Synchronization primitives
//
// Fences are the only thing the CPU ever waits on. Semaphores order GPU work
// against the present engine and are never observed from the CPU.

use super::device::DeviceContext;
use super::error::{RendererError, Result};
use ash::vk;
use std::sync::Arc;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    /// Signalled by the present engine once the acquired image is usable
    pub image_available: vk::Semaphore,
    /// Signalled by the graphics queue once the frame's commands finish
    pub render_finished: vk::Semaphore,
    /// Signalled together with `render_finished`; waited on by the CPU
    pub in_flight_fence: vk::Fence,
    device: Arc<DeviceContext>,
}

impl FrameSync {
    pub fn new(device: Arc<DeviceContext>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signalled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(RendererError::creation("image-available semaphore"))?;
            let render_finished = match device.device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.device.destroy_semaphore(image_available, None);
                    return Err(RendererError::creation("render-finished semaphore")(e));
                }
            };
            let in_flight_fence = match device.device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.device.destroy_semaphore(image_available, None);
                    device.device.destroy_semaphore(render_finished, None);
                    return Err(RendererError::creation("in-flight fence")(e));
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
                device,
            })
        }
    }

    /// Block until the GPU finishes this slot's last submission
    pub fn wait(&self, timeout_ns: u64) -> Result<()> {
        match unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight_fence], true, timeout_ns)
        } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RendererError::SyncTimeout("frame fence")),
            Err(e) => Err(RendererError::device("fence wait")(e)),
        }
    }

    /// Fences do not reset themselves
    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.device.reset_fences(&[self.in_flight_fence]) }
            .map_err(RendererError::device("fence reset"))
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
