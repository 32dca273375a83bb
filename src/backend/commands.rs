// Command recording
//
// One primary command buffer per swap image, recorded once at setup and
// resubmitted unchanged every frame. Content is static, so there is nothing
// to re-encode per frame.

use super::device::DeviceContext;
use super::error::{RendererError, Result};
use ash::vk;
use std::sync::Arc;

/// Everything the recorded draw pass needs besides its framebuffer
#[derive(Debug, Clone, Copy)]
pub struct DrawPass {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub vertex_count: u32,
}

/// The commands a draw pass is made of. Implemented over a real command pool
/// and, in tests, over a recorder.
pub trait DrawEncoder {
    type Buffer: Copy;

    fn allocate(&mut self, count: u32) -> Result<Vec<Self::Buffer>>;
    fn begin(&mut self, buffer: Self::Buffer) -> Result<()>;
    fn begin_render_pass(&mut self, buffer: Self::Buffer, framebuffer: vk::Framebuffer, pass: &DrawPass);
    fn bind_pipeline(&mut self, buffer: Self::Buffer, pipeline: vk::Pipeline);
    fn draw(&mut self, buffer: Self::Buffer, vertex_count: u32);
    fn end_render_pass(&mut self, buffer: Self::Buffer);
    fn end(&mut self, buffer: Self::Buffer) -> Result<()>;
}

/// Record one buffer per framebuffer, in framebuffer order
pub fn record_all<E: DrawEncoder>(
    encoder: &mut E,
    framebuffers: &[vk::Framebuffer],
    pass: &DrawPass,
) -> Result<Vec<E::Buffer>> {
    let buffers = encoder.allocate(framebuffers.len() as u32)?;

    for (&buffer, &framebuffer) in buffers.iter().zip(framebuffers) {
        encoder.begin(buffer)?;
        encoder.begin_render_pass(buffer, framebuffer, pass);
        encoder.bind_pipeline(buffer, pass.pipeline);
        encoder.draw(buffer, pass.vertex_count);
        encoder.end_render_pass(buffer);
        encoder.end(buffer)?;
    }

    Ok(buffers)
}

/// Command pool on the graphics family plus the buffers recorded from it
pub struct RecordedCommands {
    pub pool: vk::CommandPool,
    pub buffers: Vec<vk::CommandBuffer>,
    device: Arc<DeviceContext>,
}

impl RecordedCommands {
    pub fn record(device: Arc<DeviceContext>, framebuffers: &[vk::Framebuffer], pass: &DrawPass) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder().queue_family_index(device.families.graphics);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(RendererError::creation("command pool"))?;

        // Owned from here so the pool is released if recording fails
        let mut commands = Self {
            pool,
            buffers: Vec::new(),
            device,
        };

        let mut encoder = VulkanEncoder {
            device: &commands.device.device,
            pool,
        };
        let buffers = record_all(&mut encoder, framebuffers, pass)?;
        commands.buffers = buffers;

        log::info!("Recorded {} command buffers", commands.buffers.len());
        Ok(commands)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }
}

impl Drop for RecordedCommands {
    fn drop(&mut self) {
        // Frees every buffer allocated from it
        log::debug!("Destroying command pool");
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

struct VulkanEncoder<'a> {
    device: &'a ash::Device,
    pool: vk::CommandPool,
}

impl DrawEncoder for VulkanEncoder<'_> {
    type Buffer = vk::CommandBuffer;

    fn allocate(&mut self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(RendererError::creation("command buffers"))
    }

    fn begin(&mut self, buffer: vk::CommandBuffer) -> Result<()> {
        // Resubmitted every frame, but never while still pending thanks to
        // the frame fences
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe { self.device.begin_command_buffer(buffer, &begin_info) }
            .map_err(RendererError::creation("command buffer recording"))
    }

    fn begin_render_pass(&mut self, buffer: vk::CommandBuffer, framebuffer: vk::Framebuffer, pass: &DrawPass) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: pass.clear_color,
            },
        }];

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(pass.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: pass.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device
                .cmd_begin_render_pass(buffer, &begin_info, vk::SubpassContents::INLINE)
        };
    }

    fn bind_pipeline(&mut self, buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(buffer, vk::PipelineBindPoint::GRAPHICS, pipeline)
        };
    }

    fn draw(&mut self, buffer: vk::CommandBuffer, vertex_count: u32) {
        unsafe { self.device.cmd_draw(buffer, vertex_count, 1, 0, 0) };
    }

    fn end_render_pass(&mut self, buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(buffer) };
    }

    fn end(&mut self, buffer: vk::CommandBuffer) -> Result<()> {
        unsafe { self.device.end_command_buffer(buffer) }
            .map_err(RendererError::creation("command buffer recording"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Begin,
        BeginRenderPass(u64),
        BindPipeline(u64),
        Draw(u32),
        EndRenderPass,
        End,
    }

    #[derive(Default)]
    struct Recorder {
        buffers: Vec<Vec<Op>>,
    }

    impl DrawEncoder for Recorder {
        type Buffer = usize;

        fn allocate(&mut self, count: u32) -> Result<Vec<usize>> {
            let start = self.buffers.len();
            self.buffers.extend((0..count).map(|_| Vec::new()));
            Ok((start..self.buffers.len()).collect())
        }

        fn begin(&mut self, buffer: usize) -> Result<()> {
            self.buffers[buffer].push(Op::Begin);
            Ok(())
        }

        fn begin_render_pass(&mut self, buffer: usize, framebuffer: vk::Framebuffer, _pass: &DrawPass) {
            self.buffers[buffer].push(Op::BeginRenderPass(framebuffer.as_raw()));
        }

        fn bind_pipeline(&mut self, buffer: usize, pipeline: vk::Pipeline) {
            self.buffers[buffer].push(Op::BindPipeline(pipeline.as_raw()));
        }

        fn draw(&mut self, buffer: usize, vertex_count: u32) {
            self.buffers[buffer].push(Op::Draw(vertex_count));
        }

        fn end_render_pass(&mut self, buffer: usize) {
            self.buffers[buffer].push(Op::EndRenderPass);
        }

        fn end(&mut self, buffer: usize) -> Result<()> {
            self.buffers[buffer].push(Op::End);
            Ok(())
        }
    }

    fn pass() -> DrawPass {
        DrawPass {
            render_pass: vk::RenderPass::from_raw(1),
            pipeline: vk::Pipeline::from_raw(7),
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vertex_count: 3,
        }
    }

    fn framebuffers(count: u64) -> Vec<vk::Framebuffer> {
        (0..count).map(|i| vk::Framebuffer::from_raw(100 + i)).collect()
    }

    #[test]
    fn one_buffer_per_framebuffer() {
        for count in 1..=16 {
            let mut recorder = Recorder::default();
            let buffers = record_all(&mut recorder, &framebuffers(count), &pass()).unwrap();
            assert_eq!(buffers.len(), count as usize);
            assert_eq!(recorder.buffers.len(), count as usize);
        }
    }

    #[test]
    fn each_buffer_holds_one_full_draw_pass() {
        let mut recorder = Recorder::default();
        record_all(&mut recorder, &framebuffers(3), &pass()).unwrap();

        for (i, ops) in recorder.buffers.iter().enumerate() {
            assert_eq!(
                ops,
                &vec![
                    Op::Begin,
                    Op::BeginRenderPass(100 + i as u64),
                    Op::BindPipeline(7),
                    Op::Draw(3),
                    Op::EndRenderPass,
                    Op::End,
                ]
            );
        }
    }

    #[test]
    fn no_framebuffers_records_nothing() {
        let mut recorder = Recorder::default();
        let buffers = record_all(&mut recorder, &[], &pass()).unwrap();
        assert!(buffers.is_empty());
        assert!(recorder.buffers.is_empty());
    }
}
