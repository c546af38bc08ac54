//! # GPU Device Seam
//!
//! Every GPU resource in the renderer is created and destroyed through the
//! [`GpuDevice`] trait. The device is shared as a [`DeviceRef`] and passed
//! explicitly to each constructor, so resources release their handles in
//! `Drop` without any process-wide device reference.
//!
//! Two implementations exist:
//! - [`VulkanDevice`]: the real backend built on `ash`
//! - [`HeadlessDevice`]: a software device that fabricates handles, backs
//!   buffers with bytes, signals fences on submit and records command
//!   streams. Used for tests and for running the frame loop without a GPU.

use std::rc::Rc;

use ash::vk;
use thiserror::Error;

pub mod headless;
pub mod vulkan;

pub use headless::{FaultPoint, HeadlessDevice, RecordedCommand, Submission};
pub use vulkan::VulkanDevice;

/// GPU errors. Every variant is fatal for the resource that raised it.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Non-success result from the graphics API
    #[error("Vulkan API error {code:?} while {context}")]
    Api {
        /// Raw result code
        code: vk::Result,
        /// What the renderer was doing
        context: String,
    },

    /// A fence or acquire wait exceeded its timeout
    #[error("Timed out while {context}")]
    Timeout {
        /// What the renderer was waiting for
        context: String,
    },

    /// Swapchain no longer matches the surface
    #[error("Swapchain out of date")]
    OutOfDate,

    /// Descriptor pool has no room left
    #[error("Descriptor pool exhausted: requested {requested} sets, capacity {capacity}")]
    PoolExhausted {
        /// Sets requested in total
        requested: u32,
        /// Sets the pool was sized for
        capacity: u32,
    },

    /// No memory type satisfies the requested properties
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Device or surface could not be brought up
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// The caller used a resource in a way the device does not allow
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl GpuError {
    /// Wrap an API result code with context
    pub fn api(code: vk::Result, context: impl Into<String>) -> Self {
        Self::Api {
            code,
            context: context.into(),
        }
    }
}

/// Result type for GPU operations
pub type GpuResult<T> = Result<T, GpuError>;

/// Shared handle to the device
pub type DeviceRef = Rc<dyn GpuDevice>;

/// A buffer together with the memory bound to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAllocation {
    /// Buffer handle
    pub buffer: vk::Buffer,
    /// Backing memory
    pub memory: vk::DeviceMemory,
    /// Requested size in bytes
    pub size: vk::DeviceSize,
}

/// Outcome of acquiring a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquiredImage {
    /// Image index ready for rendering
    Ready(u32),
    /// Swapchain must be recreated before rendering
    OutOfDate,
}

/// Outcome of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Image queued for display
    Presented,
    /// Swapchain must be recreated
    OutOfDate,
}

/// One binding update for a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    /// Uniform buffer range
    UniformBuffer {
        /// Binding slot
        binding: u32,
        /// Buffer referenced by the set; must outlive it
        buffer: vk::Buffer,
        /// Byte offset into the buffer
        offset: vk::DeviceSize,
        /// Byte range visible to the shader
        range: vk::DeviceSize,
    },
}

/// Vertex formats the pipelines understand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexLayout {
    /// [`crate::render::Vertex`]: position, normal, color, uv
    Mesh,
    /// [`crate::render::gui::GuiVertex`]: 2D position, uv, packed color
    Gui,
}

/// Everything needed to build a graphics pipeline
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    /// Path of the SPIR-V vertex shader
    pub vertex_shader: String,
    /// Path of the SPIR-V fragment shader
    pub fragment_shader: String,
    /// Set layouts, in set order
    pub descriptor_layouts: Vec<vk::DescriptorSetLayout>,
    /// Push constant block size in bytes, zero for none
    pub push_constant_size: u32,
    /// Stages that read the push constant block
    pub push_constant_stages: vk::ShaderStageFlags,
    /// Vertex input format
    pub vertex_layout: VertexLayout,
    /// Enable depth test and write
    pub depth_test: bool,
    /// Enable straight alpha blending
    pub alpha_blend: bool,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
}

/// Pipeline and layout handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineHandles {
    /// Pipeline handle
    pub pipeline: vk::Pipeline,
    /// Layout handle, used for descriptor and push constant binds
    pub layout: vk::PipelineLayout,
}

/// Graphics device operations used by the renderer.
///
/// Methods take `&self`; implementations use interior mutability for the
/// little state they keep (swapchain, recording bookkeeping).
pub trait GpuDevice {
    /// Create a buffer and bind freshly allocated memory with `properties`
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> GpuResult<BufferAllocation>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&self, allocation: &BufferAllocation);

    /// Copy bytes into host-visible memory at `offset`
    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> GpuResult<()>;

    /// Device-side copy of `size` bytes. Blocks until the copy has completed.
    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> GpuResult<()>;

    /// Create a binary semaphore
    fn create_semaphore(&self) -> GpuResult<vk::Semaphore>;

    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Create a fence, optionally already signaled
    fn create_fence(&self, signaled: bool) -> GpuResult<vk::Fence>;

    /// Destroy a fence
    fn destroy_fence(&self, fence: vk::Fence);

    /// Block until the fence is signaled or `timeout_ns` elapses
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> GpuResult<()>;

    /// Return a fence to the unsignaled state
    fn reset_fence(&self, fence: vk::Fence) -> GpuResult<()>;

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> GpuResult<vk::DescriptorSetLayout>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    /// Create a pool that can hand out `max_sets` sets
    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> GpuResult<vk::DescriptorPool>;

    /// Destroy a pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    /// Allocate one set per layout
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> GpuResult<Vec<vk::DescriptorSet>>;

    /// Point a set's bindings at resources
    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);

    /// Allocate primary command buffers from the graphics pool
    fn allocate_command_buffers(&self, count: u32) -> GpuResult<Vec<vk::CommandBuffer>>;

    /// Return command buffers to the pool
    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]);

    /// Reset and begin recording
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GpuResult<()>;

    /// Finish recording
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GpuResult<()>;

    /// Begin the main render pass on the framebuffer of `image_index`
    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, image_index: u32, clear_color: [f32; 4]);

    /// End the main render pass
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);

    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);

    /// Bind a descriptor set at set index 0
    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );

    /// Bind a vertex buffer at binding 0
    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer);

    /// Bind an index buffer
    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, index_type: vk::IndexType);

    /// Upload push constants at offset 0
    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    );

    /// Set the dynamic viewport
    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport);

    /// Set the dynamic scissor
    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D);

    /// Indexed draw of one instance
    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32, first_index: u32, vertex_offset: i32);

    /// Submit one command buffer to the graphics queue. Waits on `wait` at the
    /// color output stage, signals `signal`, and signals `fence` on completion.
    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> GpuResult<()>;

    /// Acquire the next swapchain image, signaling `signal` when it is ready
    fn acquire_next_image(&self, signal: vk::Semaphore, timeout_ns: u64) -> GpuResult<AcquiredImage>;

    /// Queue `image_index` for presentation after `wait` is signaled
    fn present(&self, image_index: u32, wait: vk::Semaphore) -> GpuResult<PresentOutcome>;

    /// Number of swapchain images
    fn swapchain_image_count(&self) -> u32;

    /// Current swapchain extent
    fn swapchain_extent(&self) -> vk::Extent2D;

    /// The window's framebuffer changed size; the next recreate uses it
    fn surface_resized(&self, width: u32, height: u32);

    /// Rebuild the swapchain and everything sized by it (depth buffer,
    /// framebuffers). The caller must have drained the GPU.
    fn recreate_swapchain(&self) -> GpuResult<()>;

    /// Block until the device has no work in flight
    fn wait_idle(&self) -> GpuResult<()>;

    /// Build a pipeline compatible with the main render pass
    fn create_graphics_pipeline(&self, desc: &PipelineDesc) -> GpuResult<PipelineHandles>;

    /// Destroy a pipeline and its layout
    fn destroy_pipeline(&self, handles: &PipelineHandles);
}
