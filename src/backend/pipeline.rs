// Render pass, graphics pipeline, and framebuffers
//
// One subpass, one color attachment (the swap image), no depth. Viewport and
// scissor are baked in from the swap extent, so all three objects are only
// valid for the swap ring they were built against.

use super::device::DeviceContext;
use super::error::{RendererError, Result};
use super::shader::ShaderModule;
use ash::vk;
use std::path::Path;
use std::sync::Arc;

/// Swap image attachment: cleared on load, kept on store, handed to the
/// present engine at the end of the pass
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build()
}

/// Layout transitions around the subpass.
///
/// The first keeps color writes from starting before the acquired image is
/// available (the acquire semaphore is waited on at the same stage). The
/// second keeps the present engine from reading before the writes land.
pub fn subpass_dependencies() -> [vk::SubpassDependency; 2] {
    let into_subpass = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
        .build();

    let out_of_subpass = vk::SubpassDependency::builder()
        .src_subpass(0)
        .dst_subpass(vk::SUBPASS_EXTERNAL)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
        .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
        .dst_access_mask(vk::AccessFlags::MEMORY_READ)
        .build();

    [into_subpass, out_of_subpass]
}

/// Source-over compositing: color = a*src + (1-a)*dst, alpha = src alpha
pub fn color_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(
            vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
        )
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .build()
}

/// Full-extent viewport with the standard [0, 1] depth range
pub fn viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

pub struct RenderPass {
    pub render_pass: vk::RenderPass,
    device: Arc<DeviceContext>,
}

impl RenderPass {
    pub fn new(device: Arc<DeviceContext>, format: vk::Format) -> Result<Self> {
        let attachments = [color_attachment(format)];

        let color_attachment_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let color_attachments = [color_attachment_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachments)
            .build();

        let subpasses = [subpass];
        let dependencies = subpass_dependencies();

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.device.create_render_pass(&render_pass_info, None) }
            .map_err(RendererError::creation("render pass"))?;

        Ok(Self { render_pass, device })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        log::debug!("Destroying render pass");
        unsafe { self.device.device.destroy_render_pass(self.render_pass, None) };
    }
}

/// Compiled pipeline plus its (empty) layout
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<DeviceContext>,
}

impl GraphicsPipeline {
    pub fn new(
        device: Arc<DeviceContext>,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
        vertex_shader: &Path,
        fragment_shader: &Path,
    ) -> Result<Self> {
        // Modules are only needed until the pipeline exists
        let vert = ShaderModule::from_file(&device, vertex_shader)?;
        let frag = ShaderModule::from_file(&device, fragment_shader)?;

        let entry_point = c"main";
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert.module)
                .name(entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag.module)
                .name(entry_point)
                .build(),
        ];

        // Geometry comes from the vertex shader; nothing is bound
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [viewport(extent)];
        let scissors = [scissor(extent)];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [color_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .map_err(RendererError::creation("pipeline layout"))?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass.render_pass)
            .subpass(0)
            .build();

        let created = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        let pipeline = match created {
            Ok(pipelines) => pipelines[0],
            Err((_, result)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(RendererError::creation("graphics pipeline")(result));
            }
        };

        drop(frag);
        drop(vert);

        Ok(Self {
            pipeline,
            layout,
            device,
        })
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            log::debug!("Destroying graphics pipeline");
            self.device.device.destroy_pipeline(self.pipeline, None);
            log::debug!("Destroying pipeline layout");
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// One framebuffer per swap image view, in swap image order
pub struct Framebuffers {
    pub framebuffers: Vec<vk::Framebuffer>,
    device: Arc<DeviceContext>,
}

impl Framebuffers {
    pub fn new(
        device: Arc<DeviceContext>,
        render_pass: &RenderPass,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut framebuffers = Self {
            framebuffers: Vec::with_capacity(image_views.len()),
            device,
        };

        for &image_view in image_views {
            let attachments = [image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe {
                framebuffers
                    .device
                    .device
                    .create_framebuffer(&framebuffer_info, None)
            }
            .map_err(RendererError::creation("framebuffer"))?;
            framebuffers.framebuffers.push(framebuffer);
        }

        Ok(framebuffers)
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        log::debug!("Destroying {} framebuffers", self.framebuffers.len());
        for &framebuffer in &self.framebuffers {
            unsafe { self.device.device.destroy_framebuffer(framebuffer, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_clears_and_ends_ready_for_present() {
        let attachment = color_attachment(vk::Format::B8G8R8A8_UNORM);
        assert_eq!(attachment.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(attachment.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn dependencies_bracket_the_subpass() {
        let [into, out] = subpass_dependencies();

        assert_eq!(into.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(into.dst_subpass, 0);
        assert_eq!(into.src_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(into.dst_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert!(into.dst_access_mask.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));

        assert_eq!(out.src_subpass, 0);
        assert_eq!(out.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert!(out.src_access_mask.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
        assert_eq!(out.dst_stage_mask, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(out.dst_access_mask, vk::AccessFlags::MEMORY_READ);
    }

    #[test]
    fn blending_is_source_over() {
        let blend = color_blend_attachment();
        assert_eq!(blend.blend_enable, vk::TRUE);
        let rgba = vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A;
        assert_eq!(blend.color_write_mask, rgba);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(blend.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(blend.color_blend_op, vk::BlendOp::ADD);
        assert_eq!(blend.src_alpha_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(blend.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
        assert_eq!(blend.alpha_blend_op, vk::BlendOp::ADD);
    }

    #[test]
    fn viewport_and_scissor_cover_the_extent() {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let vp = viewport(extent);
        assert_eq!((vp.x, vp.y, vp.width, vp.height), (0.0, 0.0, 1280.0, 720.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));

        let rect = scissor(extent);
        assert_eq!(rect.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(rect.extent, extent);
    }
}
