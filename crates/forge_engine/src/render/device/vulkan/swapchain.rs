//! Swapchain and everything sized by it: image views, depth buffer,
//! render pass and framebuffers

use ash::vk;
use log::{debug, info};

use super::context::VulkanContext;
use crate::render::device::{GpuError, GpuResult};

const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Preferred surface format, falling back to the first reported
pub fn choose_surface_format(context: &VulkanContext) -> GpuResult<vk::SurfaceFormatKHR> {
    let formats = unsafe {
        context
            .surface_loader
            .get_physical_device_surface_formats(context.physical_device.device, context.surface)
    }
    .map_err(|code| GpuError::api(code, "querying surface formats"))?;

    formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
        .ok_or_else(|| GpuError::Initialization("Surface reports no formats".to_string()))
}

/// Forward pass with one color and one depth attachment
pub fn create_render_pass(context: &VulkanContext, color_format: vk::Format) -> GpuResult<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build(),
        vk::AttachmentDescription::builder()
            .format(DEPTH_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build(),
    ];

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpasses = [vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref)
        .build()];

    let dependencies = [vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build()];

    let info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { context.device.create_render_pass(&info, None) }
        .map_err(|code| GpuError::api(code, "creating render pass"))
}

/// Swapchain, per-image views and framebuffers, and the shared depth buffer
pub struct SwapchainResources {
    /// Swapchain handle
    pub swapchain: vk::SwapchainKHR,
    image_views: Vec<vk::ImageView>,
    /// One framebuffer per swapchain image
    pub framebuffers: Vec<vk::Framebuffer>,
    depth_image: vk::Image,
    depth_memory: vk::DeviceMemory,
    depth_view: vk::ImageView,
    /// Image extent
    pub extent: vk::Extent2D,
}

impl SwapchainResources {
    /// Build for `desired_extent`, retiring `old_swapchain` if given
    pub fn new(
        context: &VulkanContext,
        render_pass: vk::RenderPass,
        format: vk::SurfaceFormatKHR,
        desired_extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> GpuResult<Self> {
        let physical = context.physical_device.device;
        let caps = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_capabilities(physical, context.surface)
        }
        .map_err(|code| GpuError::api(code, "querying surface capabilities"))?;

        let present_modes = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_present_modes(physical, context.surface)
        }
        .map_err(|code| GpuError::api(code, "querying present modes"))?;
        let present_mode = present_modes
            .iter()
            .copied()
            .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO);

        let extent = if caps.current_extent.width == u32::MAX {
            vk::Extent2D {
                width: desired_extent
                    .width
                    .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: desired_extent
                    .height
                    .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        } else {
            caps.current_extent
        };

        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }

        let families = [context.physical_device.graphics_family, context.physical_device.present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        create_info = if families[0] == families[1] {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        };

        let swapchain = unsafe { context.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|code| GpuError::api(code, "creating swapchain"))?;

        let mut resources = Self {
            swapchain,
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            depth_image: vk::Image::null(),
            depth_memory: vk::DeviceMemory::null(),
            depth_view: vk::ImageView::null(),
            extent,
        };

        // From here on `resources` owns what was created, so an early return
        // through `?` still releases it in `destroy`.
        if let Err(err) = resources.build_attachments(context, render_pass, format.format) {
            resources.destroy(context);
            return Err(err);
        }

        info!(
            "Swapchain ready: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            resources.framebuffers.len(),
            present_mode
        );
        Ok(resources)
    }

    fn build_attachments(
        &mut self,
        context: &VulkanContext,
        render_pass: vk::RenderPass,
        color_format: vk::Format,
    ) -> GpuResult<()> {
        let device = &context.device;
        let images = unsafe { context.swapchain_loader.get_swapchain_images(self.swapchain) }
            .map_err(|code| GpuError::api(code, "fetching swapchain images"))?;

        for image in images {
            let view = create_view(context, image, color_format, vk::ImageAspectFlags::COLOR)?;
            self.image_views.push(view);
        }

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        self.depth_image = unsafe { device.create_image(&image_info, None) }
            .map_err(|code| GpuError::api(code, "creating depth image"))?;

        let requirements = unsafe { device.get_image_memory_requirements(self.depth_image) };
        let memory_type = context
            .physical_device
            .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        self.depth_memory = unsafe { device.allocate_memory(&alloc_info, None) }
            .map_err(|code| GpuError::api(code, "allocating depth memory"))?;
        unsafe { device.bind_image_memory(self.depth_image, self.depth_memory, 0) }
            .map_err(|code| GpuError::api(code, "binding depth memory"))?;
        self.depth_view = create_view(context, self.depth_image, DEPTH_FORMAT, vk::ImageAspectFlags::DEPTH)?;

        for &view in &self.image_views {
            let attachments = [view, self.depth_view];
            let info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer = unsafe { device.create_framebuffer(&info, None) }
                .map_err(|code| GpuError::api(code, "creating framebuffer"))?;
            self.framebuffers.push(framebuffer);
        }

        debug!("Created {} framebuffers", self.framebuffers.len());
        Ok(())
    }

    /// Number of images, equal to the number of framebuffers
    #[allow(clippy::cast_possible_truncation)]
    pub fn image_count(&self) -> u32 {
        self.framebuffers.len() as u32
    }

    /// Release everything. Null handles are skipped by the driver.
    pub fn destroy(&mut self, context: &VulkanContext) {
        let device = &context.device;
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_image_view(self.depth_view, None);
            device.destroy_image(self.depth_image, None);
            device.free_memory(self.depth_memory, None);
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            context.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        self.depth_view = vk::ImageView::null();
        self.depth_image = vk::Image::null();
        self.depth_memory = vk::DeviceMemory::null();
        self.swapchain = vk::SwapchainKHR::null();
    }
}

fn create_view(
    context: &VulkanContext,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> GpuResult<vk::ImageView> {
    let info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    unsafe { context.device.create_image_view(&info, None) }
        .map_err(|code| GpuError::api(code, "creating image view"))
}
