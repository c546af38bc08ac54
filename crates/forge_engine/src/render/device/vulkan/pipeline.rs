//! SPIR-V shader modules and graphics pipeline construction

use std::ffi::CStr;
use std::fs::File;
use std::path::Path;

use ash::{vk, Device};

use crate::render::device::{GpuError, GpuResult, PipelineDesc, PipelineHandles, VertexLayout};
use crate::render::vertex::{GuiVertex, Vertex};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Shader module destroyed on drop
struct ShaderModule<'a> {
    device: &'a Device,
    module: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    fn from_file(device: &'a Device, path: impl AsRef<Path>) -> GpuResult<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .map_err(|e| GpuError::Initialization(format!("Failed to open shader {}: {}", path.display(), e)))?;
        let code = ash::util::read_spv(&mut file)
            .map_err(|e| GpuError::Initialization(format!("Invalid SPIR-V in {}: {}", path.display(), e)))?;

        let info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { device.create_shader_module(&info, None) }
            .map_err(|code| GpuError::api(code, "creating shader module"))?;
        Ok(Self { device, module })
    }

    fn stage(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Build a pipeline for subpass 0 of `render_pass`. Viewport and scissor
/// are dynamic so the pipeline survives swapchain recreation.
pub fn create_graphics_pipeline(
    device: &Device,
    render_pass: vk::RenderPass,
    desc: &PipelineDesc,
) -> GpuResult<PipelineHandles> {
    let vertex = ShaderModule::from_file(device, &desc.vertex_shader)?;
    let fragment = ShaderModule::from_file(device, &desc.fragment_shader)?;
    let stages = [
        vertex.stage(vk::ShaderStageFlags::VERTEX),
        fragment.stage(vk::ShaderStageFlags::FRAGMENT),
    ];

    let (bindings, attributes): (Vec<_>, Vec<_>) = match desc.vertex_layout {
        VertexLayout::Mesh => (vec![Vertex::binding_description()], Vertex::attribute_descriptions().to_vec()),
        VertexLayout::Gui => (
            vec![GuiVertex::binding_description()],
            GuiVertex::attribute_descriptions().to_vec(),
        ),
    };
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(desc.cull_mode)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(desc.depth_test)
        .depth_write_enable(desc.depth_test)
        .depth_compare_op(vk::CompareOp::LESS);

    let blend_attachment = if desc.alpha_blend {
        vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
    } else {
        vk::PipelineColorBlendAttachmentState::builder().blend_enable(false)
    }
    .color_write_mask(vk::ColorComponentFlags::RGBA)
    .build();
    let blend_attachments = [blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let push_ranges = [vk::PushConstantRange {
        stage_flags: desc.push_constant_stages,
        offset: 0,
        size: desc.push_constant_size,
    }];
    let mut layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&desc.descriptor_layouts);
    if desc.push_constant_size > 0 {
        layout_info = layout_info.push_constant_ranges(&push_ranges);
    }
    let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
        .map_err(|code| GpuError::api(code, "creating pipeline layout"))?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) };
    match pipelines {
        Ok(pipelines) => Ok(PipelineHandles {
            pipeline: pipelines[0],
            layout,
        }),
        Err((_, code)) => {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            Err(GpuError::api(code, "creating graphics pipeline"))
        }
    }
}
