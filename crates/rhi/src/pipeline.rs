//! Shader modules and the overlay graphics pipeline.
//!
//! The frame lifecycle core only draws one kind of geometry: alpha-blended,
//! scissored 2D triangles pushed by the overlay. [`Pipeline::overlay`] builds
//! exactly that state with dynamic rendering, so no render pass objects exist.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use kiln_rhi::device::Device;
//! use kiln_rhi::pipeline::{Pipeline, PipelineLayout, ShaderModule, VertexLayout};
//! use kiln_rhi::vk;
//!
//! # fn example(device: Arc<Device>, layout_desc: VertexLayout<'_>) -> Result<(), kiln_rhi::RhiError> {
//! let vert = ShaderModule::from_file(device.clone(), Path::new("shaders/spirv/overlay.vert.spv"))?;
//! let frag = ShaderModule::from_file(device.clone(), Path::new("shaders/spirv/overlay.frag.spv"))?;
//! let layout = PipelineLayout::with_push_constants(device.clone(), 16)?;
//! let pipeline = Pipeline::overlay(device, &layout, &vert, &frag, layout_desc, vk::Format::B8G8R8A8_SRGB)?;
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

const ENTRY_POINT: &std::ffi::CStr = c"main";

/// Compiled SPIR-V shader module.
pub struct ShaderModule {
    device: Arc<Device>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Loads a SPIR-V binary from disk.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if the file cannot be read or is not
    /// valid SPIR-V, or a Vulkan error if module creation fails.
    pub fn from_file(device: Arc<Device>, path: &Path) -> RhiResult<Self> {
        let mut file = File::open(path).map_err(|e| {
            RhiError::ShaderError(format!("failed to open {}: {}", path.display(), e))
        })?;
        let code = ash::util::read_spv(&mut file).map_err(|e| {
            RhiError::ShaderError(format!("invalid SPIR-V in {}: {}", path.display(), e))
        })?;

        let module = Self::from_words(device, &code)?;
        debug!("Loaded shader module from {}", path.display());
        Ok(module)
    }

    /// Creates a module from SPIR-V words.
    pub fn from_words(device: Arc<Device>, code: &[u32]) -> RhiResult<Self> {
        if code.is_empty() {
            return Err(RhiError::ShaderError("empty SPIR-V code".to_string()));
        }

        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };
        Ok(Self { device, module })
    }

    /// Returns the Vulkan shader module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_shader_module(self.module, None);
        }
    }
}

/// Pipeline layout with a single vertex-stage push constant range.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a layout with `push_constant_size` bytes of vertex push constants.
    pub fn with_push_constants(device: Arc<Device>, push_constant_size: u32) -> RhiResult<Self> {
        let ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: push_constant_size,
        }];
        let create_info = vk::PipelineLayoutCreateInfo::default().push_constant_ranges(&ranges);
        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout with {} byte(s) of push constants",
            push_constant_size
        );
        Ok(Self { device, layout })
    }

    /// Returns the Vulkan pipeline layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Vertex input description for a single interleaved binding.
#[derive(Clone, Copy, Debug)]
pub struct VertexLayout<'a> {
    /// Binding 0 description.
    pub binding: vk::VertexInputBindingDescription,
    /// Attributes read from binding 0.
    pub attributes: &'a [vk::VertexInputAttributeDescription],
}

/// Graphics pipeline.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    /// Builds the overlay pipeline: triangle lists, no culling, no depth,
    /// straight alpha blending, dynamic viewport and scissor.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] or a Vulkan error if creation fails.
    pub fn overlay(
        device: Arc<Device>,
        layout: &PipelineLayout,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
        vertex_layout: VertexLayout<'_>,
        color_format: vk::Format,
    ) -> RhiResult<Self> {
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_shader.handle())
                .name(ENTRY_POINT),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_shader.handle())
                .name(ENTRY_POINT),
        ];

        let bindings = [vertex_layout.binding];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(vertex_layout.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default();

        let blend_attachments = [alpha_blend_attachment()];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .push_next(&mut rendering_info)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle());

        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| RhiError::from(e))?
        };

        let pipeline = pipelines.into_iter().next().ok_or_else(|| {
            RhiError::PipelineError("driver returned no pipeline".to_string())
        })?;

        info!("Created overlay pipeline ({:?})", color_format);
        Ok(Self { device, pipeline })
    }

    /// Returns the Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("Destroyed pipeline");
    }
}

fn alpha_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha_blend_attachment() {
        let attachment = alpha_blend_attachment();
        assert_eq!(attachment.blend_enable, vk::TRUE);
        assert_eq!(attachment.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            attachment.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
        assert_eq!(attachment.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_entry_point_name() {
        assert_eq!(ENTRY_POINT.to_str(), Ok("main"));
    }
}
