//! Vulkan backend for [`GpuDevice`]

use std::cell::{Cell, RefCell};

use ash::vk;
use log::{debug, info, warn};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use super::{
    AcquiredImage, BufferAllocation, DescriptorWrite, GpuDevice, GpuError, GpuResult, PipelineDesc,
    PipelineHandles, PresentOutcome,
};
use crate::core::config::RendererConfig;

pub mod context;
pub mod pipeline;
pub mod swapchain;

use context::VulkanContext;
use swapchain::SwapchainResources;

/// Vulkan device bound to one window surface
pub struct VulkanDevice {
    swapchain: RefCell<Option<SwapchainResources>>,
    surface_format: vk::SurfaceFormatKHR,
    render_pass: vk::RenderPass,
    surface_extent: Cell<vk::Extent2D>,
    context: VulkanContext,
}

impl VulkanDevice {
    /// Create the device, swapchain and render pass for `window`
    pub fn new<W>(window: &W, app_name: &str, config: &RendererConfig, extent: (u32, u32)) -> GpuResult<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        let context = VulkanContext::new(
            window.raw_display_handle(),
            window.raw_window_handle(),
            app_name,
            config.enable_validation,
        )?;
        let surface_format = swapchain::choose_surface_format(&context)?;
        let render_pass = swapchain::create_render_pass(&context, surface_format.format)?;
        let surface_extent = vk::Extent2D {
            width: extent.0,
            height: extent.1,
        };

        let device = Self {
            swapchain: RefCell::new(None),
            surface_format,
            render_pass,
            surface_extent: Cell::new(surface_extent),
            context,
        };
        let resources = SwapchainResources::new(
            &device.context,
            render_pass,
            surface_format,
            surface_extent,
            vk::SwapchainKHR::null(),
        )?;
        *device.swapchain.borrow_mut() = Some(resources);

        info!("Vulkan device ready for '{}'", app_name);
        Ok(device)
    }

    /// Record the window's new framebuffer size; used by the next recreate
    pub fn set_surface_extent(&self, width: u32, height: u32) {
        self.surface_extent.set(vk::Extent2D { width, height });
    }

    fn swapchain_handle(&self) -> vk::SwapchainKHR {
        self.swapchain
            .borrow()
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |s| s.swapchain)
    }

    fn one_shot<F>(&self, record: F) -> GpuResult<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let device = &self.context.device;
        let command_buffer = self
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::InvalidOperation("Command pool returned no buffers".to_string()))?;

        let result = (|| {
            let begin = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(command_buffer, &begin) }
                .map_err(|code| GpuError::api(code, "beginning transfer commands"))?;
            record(command_buffer);
            unsafe { device.end_command_buffer(command_buffer) }
                .map_err(|code| GpuError::api(code, "ending transfer commands"))?;

            let buffers = [command_buffer];
            let submit = vk::SubmitInfo::builder().command_buffers(&buffers).build();
            unsafe {
                device
                    .queue_submit(self.context.graphics_queue, &[submit], vk::Fence::null())
                    .map_err(|code| GpuError::api(code, "submitting transfer"))?;
                device
                    .queue_wait_idle(self.context.graphics_queue)
                    .map_err(|code| GpuError::api(code, "waiting for transfer"))
            }
        })();

        self.free_command_buffers(&[command_buffer]);
        result
    }
}

impl GpuDevice for VulkanDevice {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> GpuResult<BufferAllocation> {
        if size == 0 {
            return Err(GpuError::InvalidOperation("Cannot create a zero-sized buffer".to_string()));
        }
        let device = &self.context.device;
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&info, None) }
            .map_err(|code| GpuError::api(code, "creating buffer"))?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type = match self
            .context
            .physical_device
            .find_memory_type(requirements.memory_type_bits, properties)
        {
            Ok(index) => index,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(code) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(GpuError::api(code, "allocating buffer memory"));
            }
        };

        if let Err(code) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(GpuError::api(code, "binding buffer memory"));
        }

        Ok(BufferAllocation { buffer, memory, size })
    }

    fn destroy_buffer(&self, allocation: &BufferAllocation) {
        unsafe {
            self.context.device.destroy_buffer(allocation.buffer, None);
            self.context.device.free_memory(allocation.memory, None);
        }
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> GpuResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let device = &self.context.device;
        unsafe {
            let ptr = device
                .map_memory(memory, offset, data.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(|code| GpuError::api(code, "mapping memory"))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            device.unmap_memory(memory);
        }
        Ok(())
    }

    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> GpuResult<()> {
        self.one_shot(|command_buffer| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe {
                self.context
                    .device
                    .cmd_copy_buffer(command_buffer, src, dst, &[region]);
            }
        })
    }

    fn create_semaphore(&self) -> GpuResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        unsafe { self.context.device.create_semaphore(&info, None) }
            .map_err(|code| GpuError::api(code, "creating semaphore"))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.context.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self, signaled: bool) -> GpuResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.context.device.create_fence(&info, None) }
            .map_err(|code| GpuError::api(code, "creating fence"))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.context.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> GpuResult<()> {
        match unsafe { self.context.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GpuError::Timeout {
                context: "waiting for frame fence".to_string(),
            }),
            Err(code) => Err(GpuError::api(code, "waiting for fence")),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> GpuResult<()> {
        unsafe { self.context.device.reset_fences(&[fence]) }.map_err(|code| GpuError::api(code, "resetting fence"))
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> GpuResult<vk::DescriptorSetLayout> {
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        unsafe { self.context.device.create_descriptor_set_layout(&info, None) }
            .map_err(|code| GpuError::api(code, "creating descriptor set layout"))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.context.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> GpuResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(sizes)
            .max_sets(max_sets);
        unsafe { self.context.device.create_descriptor_pool(&info, None) }
            .map_err(|code| GpuError::api(code, "creating descriptor pool"))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.context.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> GpuResult<Vec<vk::DescriptorSet>> {
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        unsafe { self.context.device.allocate_descriptor_sets(&info) }
            .map_err(|code| GpuError::api(code, "allocating descriptor sets"))
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        for write in writes {
            match *write {
                DescriptorWrite::UniformBuffer {
                    binding,
                    buffer,
                    offset,
                    range,
                } => {
                    let infos = [vk::DescriptorBufferInfo { buffer, offset, range }];
                    let vk_write = vk::WriteDescriptorSet::builder()
                        .dst_set(set)
                        .dst_binding(binding)
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(&infos)
                        .build();
                    unsafe { self.context.device.update_descriptor_sets(&[vk_write], &[]) };
                }
            }
        }
    }

    fn allocate_command_buffers(&self, count: u32) -> GpuResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.context.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.context.device.allocate_command_buffers(&info) }
            .map_err(|code| GpuError::api(code, "allocating command buffers"))
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        unsafe {
            self.context
                .device
                .free_command_buffers(self.context.command_pool, buffers);
        }
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GpuResult<()> {
        let device = &self.context.device;
        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|code| GpuError::api(code, "resetting command buffer"))?;
            let info = vk::CommandBufferBeginInfo::builder();
            device
                .begin_command_buffer(command_buffer, &info)
                .map_err(|code| GpuError::api(code, "beginning command buffer"))
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GpuResult<()> {
        unsafe { self.context.device.end_command_buffer(command_buffer) }
            .map_err(|code| GpuError::api(code, "ending command buffer"))
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, image_index: u32, clear_color: [f32; 4]) {
        let swapchain = self.swapchain.borrow();
        let Some(resources) = swapchain.as_ref() else {
            warn!("Render pass begun without a swapchain");
            return;
        };
        let Some(&framebuffer) = resources.framebuffers.get(image_index as usize) else {
            warn!("No framebuffer for image {}", image_index);
            return;
        };

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: clear_color },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: resources.extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.context
                .device
                .cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.context.device.cmd_end_render_pass(command_buffer) };
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.context
                .device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.context.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            );
        }
    }

    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe {
            self.context
                .device
                .cmd_bind_vertex_buffers(command_buffer, 0, &[buffer], &[0]);
        }
    }

    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, index_type: vk::IndexType) {
        unsafe {
            self.context
                .device
                .cmd_bind_index_buffer(command_buffer, buffer, 0, index_type);
        }
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        unsafe {
            self.context
                .device
                .cmd_push_constants(command_buffer, layout, stages, 0, data);
        }
    }

    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.context.device.cmd_set_viewport(command_buffer, 0, &[viewport]) };
    }

    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.context.device.cmd_set_scissor(command_buffer, 0, &[scissor]) };
    }

    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32, first_index: u32, vertex_offset: i32) {
        unsafe {
            self.context
                .device
                .cmd_draw_indexed(command_buffer, index_count, 1, first_index, vertex_offset, 0);
        }
    }

    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> GpuResult<()> {
        let wait_semaphores = [wait];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [signal];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        unsafe {
            self.context
                .device
                .queue_submit(self.context.graphics_queue, &[submit], fence)
        }
        .map_err(|code| GpuError::api(code, "submitting frame"))
    }

    fn acquire_next_image(&self, signal: vk::Semaphore, timeout_ns: u64) -> GpuResult<AcquiredImage> {
        let swapchain = self.swapchain_handle();
        let result = unsafe {
            self.context
                .swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())
        };
        match result {
            Ok((index, false)) => Ok(AcquiredImage::Ready(index)),
            // A suboptimal image still signals the semaphore, so it must be
            // rendered and presented; the present reports the mismatch.
            Ok((index, true)) => {
                debug!("Acquired suboptimal swapchain image {}", index);
                Ok(AcquiredImage::Ready(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquiredImage::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(GpuError::Timeout {
                context: "acquiring swapchain image".to_string(),
            }),
            Err(code) => Err(GpuError::api(code, "acquiring swapchain image")),
        }
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> GpuResult<PresentOutcome> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain_handle()];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let result = unsafe {
            self.context
                .swapchain_loader
                .queue_present(self.context.present_queue, &info)
        };
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(code) => Err(GpuError::api(code, "presenting image")),
        }
    }

    fn swapchain_image_count(&self) -> u32 {
        self.swapchain
            .borrow()
            .as_ref()
            .map_or(0, SwapchainResources::image_count)
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain
            .borrow()
            .as_ref()
            .map_or_else(|| self.surface_extent.get(), |s| s.extent)
    }

    fn surface_resized(&self, width: u32, height: u32) {
        self.set_surface_extent(width, height);
    }

    fn recreate_swapchain(&self) -> GpuResult<()> {
        let extent = self.surface_extent.get();
        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::InvalidOperation("Cannot recreate a zero-sized swapchain".to_string()));
        }

        self.wait_idle()?;
        let mut slot = self.swapchain.borrow_mut();
        let old_handle = slot.as_ref().map_or(vk::SwapchainKHR::null(), |s| s.swapchain);
        let fresh = SwapchainResources::new(
            &self.context,
            self.render_pass,
            self.surface_format,
            extent,
            old_handle,
        )?;
        if let Some(mut old) = slot.replace(fresh) {
            old.destroy(&self.context);
        }
        info!("Swapchain recreated at {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn wait_idle(&self) -> GpuResult<()> {
        unsafe { self.context.device.device_wait_idle() }.map_err(|code| GpuError::api(code, "waiting for idle"))
    }

    fn create_graphics_pipeline(&self, desc: &PipelineDesc) -> GpuResult<PipelineHandles> {
        pipeline::create_graphics_pipeline(&self.context.device, self.render_pass, desc)
    }

    fn destroy_pipeline(&self, handles: &PipelineHandles) {
        unsafe {
            self.context.device.destroy_pipeline(handles.pipeline, None);
            self.context.device.destroy_pipeline_layout(handles.layout, None);
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            warn!("Device did not go idle before teardown: {}", err);
        }
        if let Some(mut resources) = self.swapchain.get_mut().take() {
            resources.destroy(&self.context);
        }
        unsafe {
            self.context.device.destroy_render_pass(self.render_pass, None);
        }
    }
}
