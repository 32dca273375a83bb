// =============================================================================
// RENDERER - owns every GPU object and drives the frame loop
// =============================================================================
//
// Setup runs once, leaves first:
//   instance -> surface -> device -> swap ring -> render pass -> pipeline
//   -> framebuffers -> recorded command buffers -> frame slots
//
// Teardown is the reverse, and it falls out of Rust's drop order: `Drop for
// Renderer` waits for the device to go idle, then the fields below drop top
// to bottom. Every wrapper also holds an Arc to the device (or instance) it
// was created from, so nothing can outlive its parent.

use crate::backend::commands::{DrawPass, RecordedCommands};
use crate::backend::frame::{FrameInfo, FrameLoop, VulkanFrames};
use crate::backend::pipeline::{Framebuffers, GraphicsPipeline, RenderPass};
use crate::backend::swapchain::SwapRingConfig;
use crate::backend::sync::FrameSync;
use crate::backend::{DeviceContext, InstanceContext, PresentTarget, Result, Surface, SwapRing};
use crate::config::{Config, GraphicsConfig};
use std::sync::Arc;

/// Field order is destruction order. Do not reorder.
pub struct Renderer {
    frames: FrameLoop<FrameSync>,
    commands: RecordedCommands,
    // Never read again after setup; held so they drop in this position
    #[allow(dead_code)]
    framebuffers: Framebuffers,
    #[allow(dead_code)]
    pipeline: GraphicsPipeline,
    #[allow(dead_code)]
    render_pass: RenderPass,
    swap_ring: SwapRing,
    #[allow(dead_code)]
    surface: Surface,
    device: Arc<DeviceContext>,
    instance: Arc<InstanceContext>,
    drained: bool,
}

impl Renderer {
    pub fn new(config: &Config, window: &dyn PresentTarget) -> Result<Self> {
        log::info!("Initializing Vulkan...");
        let graphics: &GraphicsConfig = &config.graphics;

        let instance = InstanceContext::new(
            &config.window.title,
            window.raw_display_handle(),
            config.validation_enabled(),
        )?;
        let surface = Surface::new(instance.clone(), window)?;
        let device = DeviceContext::resolve(instance.clone(), &surface)?;

        let support = surface.support(device.physical_device)?;
        let ring_config = SwapRingConfig::negotiate(&support, window.framebuffer_size())?;
        let swap_ring = SwapRing::new(device.clone(), &surface, ring_config)?;

        let render_pass = RenderPass::new(device.clone(), swap_ring.format())?;
        let pipeline = GraphicsPipeline::new(
            device.clone(),
            &render_pass,
            swap_ring.extent(),
            &config.shaders.vertex,
            &config.shaders.fragment,
        )?;
        let framebuffers = Framebuffers::new(
            device.clone(),
            &render_pass,
            &swap_ring.image_views,
            swap_ring.extent(),
        )?;

        let draw_pass = DrawPass {
            render_pass: render_pass.render_pass,
            pipeline: pipeline.pipeline,
            extent: swap_ring.extent(),
            clear_color: graphics.clear_color,
            vertex_count: graphics.vertex_count,
        };
        let commands = RecordedCommands::record(device.clone(), &framebuffers.framebuffers, &draw_pass)?;

        debug_assert_eq!(commands.len(), framebuffers.len());
        debug_assert_eq!(framebuffers.len(), swap_ring.len());

        let frames = {
            let backend = VulkanFrames {
                device: &device,
                swap_ring: &swap_ring,
                command_buffers: &commands.buffers,
            };
            FrameLoop::new(
                &backend,
                graphics.max_frames_in_flight,
                graphics.fence_timeout_ns(),
            )?
        };

        log::info!(
            "Vulkan initialized: {} swap images, {} frames in flight",
            swap_ring.len(),
            frames.frames_in_flight()
        );

        Ok(Self {
            frames,
            commands,
            framebuffers,
            pipeline,
            render_pass,
            swap_ring,
            surface,
            device,
            instance,
            drained: false,
        })
    }

    /// One acquire -> submit -> present tick. Errors are fatal.
    pub fn draw_frame(&mut self) -> Result<FrameInfo> {
        let backend = VulkanFrames {
            device: &self.device,
            swap_ring: &self.swap_ring,
            command_buffers: &self.commands.buffers,
        };
        self.frames.draw(&backend)
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames.frames_drawn()
    }

    /// Wait for the device to go idle, then release everything in reverse
    /// creation order. Dropping the renderer does the same but can only log
    /// a failed idle wait.
    pub fn teardown(mut self) -> Result<()> {
        self.drain()?;
        drop(self);
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        let backend = VulkanFrames {
            device: &self.device,
            swap_ring: &self.swap_ring,
            command_buffers: &self.commands.buffers,
        };
        self.frames.drain(&backend)?;
        self.drained = true;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if !self.drained {
            if let Err(e) = self.drain() {
                log::error!("Device did not go idle before teardown: {}", e);
            }
        }

        // Fields drop next, in declaration order:
        // frame slots, command pool, framebuffers, pipeline + layout,
        // render pass, image views + swapchain, surface, device,
        // debug messenger + instance
        log::debug!(
            "Releasing renderer after {} frames ({} instance refs)",
            self.frames.frames_drawn(),
            Arc::strong_count(&self.instance)
        );
    }
}
