//! Software implementation of [`GpuDevice`]
//!
//! Handles are fabricated from a counter. Buffers are plain byte vectors,
//! submitted work completes immediately (the submit fence is signaled at once)
//! and the most recent submissions are kept for inspection. The log holds one
//! entry per swapchain image unless [`HeadlessDevice::with_submission_capacity`]
//! says otherwise, so an unbounded frame loop runs in constant memory.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

use ash::vk::{self, Handle};
use log::debug;

use super::{
    AcquiredImage, BufferAllocation, DescriptorWrite, GpuDevice, GpuError, GpuResult, PipelineDesc,
    PipelineHandles, PresentOutcome,
};

/// A command captured while recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    /// Render pass begun on a swapchain image
    BeginRenderPass {
        /// Framebuffer image index
        image_index: u32,
    },
    /// Render pass ended
    EndRenderPass,
    /// Pipeline bound
    BindPipeline(vk::Pipeline),
    /// Descriptor set bound
    BindDescriptorSet(vk::DescriptorSet),
    /// Vertex buffer bound
    BindVertexBuffer(vk::Buffer),
    /// Index buffer bound
    BindIndexBuffer(vk::Buffer),
    /// Push constants uploaded
    PushConstants(Vec<u8>),
    /// Viewport set
    SetViewport {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
    /// Scissor set
    SetScissor {
        /// Left edge
        x: i32,
        /// Top edge
        y: i32,
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
    /// Indexed draw
    DrawIndexed {
        /// Indices drawn
        index_count: u32,
        /// First index
        first_index: u32,
        /// Added to each index
        vertex_offset: i32,
    },
}

/// One queue submission
#[derive(Debug, Clone)]
pub struct Submission {
    /// Command buffer submitted
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore waited on
    pub wait: vk::Semaphore,
    /// Semaphore signaled
    pub signal: vk::Semaphore,
    /// Fence signaled on completion
    pub fence: vk::Fence,
    /// Commands the buffer held at submit time
    pub commands: Vec<RecordedCommand>,
}

/// Device call that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// Buffer creation, after `skip` more creations succeed
    CreateBuffer {
        /// Creations allowed through before the failing one
        skip: u32,
    },
    /// The next device-side buffer copy
    CopyBuffer,
}

#[derive(Debug)]
struct BufferRecord {
    memory: u64,
    bytes: Vec<u8>,
    host_visible: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct FenceRecord {
    signaled: bool,
    waits: u32,
    signals: u32,
    resets: u32,
}

#[derive(Debug)]
struct PoolRecord {
    max_sets: u32,
    allocated: u32,
    sets: Vec<u64>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_handle: u64,
    buffers: HashMap<u64, BufferRecord>,
    memory_owner: HashMap<u64, u64>,
    semaphores: HashSet<u64>,
    fences: HashMap<u64, FenceRecord>,
    layouts: HashSet<u64>,
    pools: HashMap<u64, PoolRecord>,
    set_writes: HashMap<u64, Vec<DescriptorWrite>>,
    command_buffers: HashMap<u64, Vec<RecordedCommand>>,
    recording: HashSet<u64>,
    pipelines: HashSet<u64>,
    submissions: VecDeque<Submission>,
    submission_capacity: usize,
    submits: u64,
    transfers: u32,
    create_buffer_fault: Option<u32>,
    copy_fault: bool,
    acquire_script: VecDeque<u32>,
    image_count: u32,
    extent: vk::Extent2D,
    next_image: u32,
    out_of_date: bool,
    swapchain_recreations: u32,
    presents: u32,
    wait_idle_calls: u32,
}

impl HeadlessState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn record(&mut self, command_buffer: vk::CommandBuffer, command: RecordedCommand) {
        let raw = command_buffer.as_raw();
        if !self.recording.contains(&raw) {
            debug!("Headless: command {:?} recorded outside begin/end", command);
        }
        if let Some(commands) = self.command_buffers.get_mut(&raw) {
            commands.push(command);
        }
    }
}

/// GPU device that runs entirely on the CPU
#[derive(Debug)]
pub struct HeadlessDevice {
    state: RefCell<HeadlessState>,
}

impl HeadlessDevice {
    /// Device with a simulated swapchain of `image_count` images
    pub fn new(image_count: u32, extent: (u32, u32)) -> Self {
        let state = HeadlessState {
            image_count: image_count.max(1),
            extent: vk::Extent2D {
                width: extent.0,
                height: extent.1,
            },
            submission_capacity: image_count.max(1) as usize,
            ..HeadlessState::default()
        };
        Self {
            state: RefCell::new(state),
        }
    }

    /// Keep up to `capacity` submissions in the log, at least one
    #[must_use]
    pub fn with_submission_capacity(self, capacity: usize) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.submission_capacity = capacity.max(1);
            while state.submissions.len() > state.submission_capacity {
                state.submissions.pop_front();
            }
        }
        self
    }

    /// Make one upcoming device call fail with an API error
    pub fn inject_fault(&self, fault: FaultPoint) {
        let mut state = self.state.borrow_mut();
        match fault {
            FaultPoint::CreateBuffer { skip } => state.create_buffer_fault = Some(skip),
            FaultPoint::CopyBuffer => state.copy_fault = true,
        }
    }

    /// Return these image indices from the next acquires, in order, before
    /// falling back to round robin
    pub fn script_acquire_order(&self, indices: &[u32]) {
        self.state.borrow_mut().acquire_script.extend(indices.iter().copied());
    }

    /// Make the next acquire and present report an out-of-date swapchain
    pub fn invalidate_swapchain(&self) {
        self.state.borrow_mut().out_of_date = true;
    }

    /// Simulate a surface resize: new extent, swapchain out of date
    pub fn resize(&self, width: u32, height: u32) {
        let mut state = self.state.borrow_mut();
        state.extent = vk::Extent2D { width, height };
        state.out_of_date = true;
    }

    /// Buffers currently alive
    pub fn live_buffer_count(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    /// Descriptor pools currently alive
    pub fn live_pool_count(&self) -> usize {
        self.state.borrow().pools.len()
    }

    /// Semaphores, fences, layouts, pipelines and command buffers currently alive
    pub fn live_object_count(&self) -> usize {
        let state = self.state.borrow();
        state.semaphores.len()
            + state.fences.len()
            + state.layouts.len()
            + state.pipelines.len()
            + state.command_buffers.len()
    }

    /// Contents of a buffer
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.borrow().buffers.get(&buffer.as_raw()).map(|b| b.bytes.clone())
    }

    /// Times the fence was waited on successfully
    pub fn fence_wait_count(&self, fence: vk::Fence) -> u32 {
        self.fence_record(fence).waits
    }

    /// Times the fence was signaled by a submission
    pub fn fence_signal_count(&self, fence: vk::Fence) -> u32 {
        self.fence_record(fence).signals
    }

    /// Times the fence was reset
    pub fn fence_reset_count(&self, fence: vk::Fence) -> u32 {
        self.fence_record(fence).resets
    }

    /// Whether the fence is currently signaled
    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.fence_record(fence).signaled
    }

    fn fence_record(&self, fence: vk::Fence) -> FenceRecord {
        self.state
            .borrow()
            .fences
            .get(&fence.as_raw())
            .copied()
            .unwrap_or_default()
    }

    /// Retained submissions, oldest first
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.borrow().submissions.iter().cloned().collect()
    }

    /// Drain the retained submissions, oldest first
    pub fn take_submissions(&self) -> Vec<Submission> {
        self.state.borrow_mut().submissions.drain(..).collect()
    }

    /// Submissions accepted over the device's lifetime
    pub fn submit_count(&self) -> u64 {
        self.state.borrow().submits
    }

    /// Writes last applied to a descriptor set
    pub fn descriptor_writes(&self, set: vk::DescriptorSet) -> Vec<DescriptorWrite> {
        self.state
            .borrow()
            .set_writes
            .get(&set.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    /// Device-side buffer copies performed
    pub fn transfer_count(&self) -> u32 {
        self.state.borrow().transfers
    }

    /// Times the swapchain was rebuilt
    pub fn swapchain_recreations(&self) -> u32 {
        self.state.borrow().swapchain_recreations
    }

    /// Successful presents
    pub fn present_count(&self) -> u32 {
        self.state.borrow().presents
    }

    /// Calls to `wait_idle`
    pub fn wait_idle_calls(&self) -> u32 {
        self.state.borrow().wait_idle_calls
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(3, (800, 600))
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> GpuResult<BufferAllocation> {
        if size == 0 {
            return Err(GpuError::api(vk::Result::ERROR_UNKNOWN, "creating a zero-sized buffer"));
        }
        let len = usize::try_from(size)
            .map_err(|_| GpuError::api(vk::Result::ERROR_OUT_OF_HOST_MEMORY, "allocating buffer memory"))?;

        let mut state = self.state.borrow_mut();
        match state.create_buffer_fault {
            Some(0) => {
                state.create_buffer_fault = None;
                return Err(GpuError::api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, "allocating buffer memory"));
            }
            Some(skip) => state.create_buffer_fault = Some(skip - 1),
            None => {}
        }
        let buffer = state.handle();
        let memory = state.handle();
        state.buffers.insert(
            buffer,
            BufferRecord {
                memory,
                bytes: vec![0; len],
                host_visible: properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE),
            },
        );
        state.memory_owner.insert(memory, buffer);

        Ok(BufferAllocation {
            buffer: vk::Buffer::from_raw(buffer),
            memory: vk::DeviceMemory::from_raw(memory),
            size,
        })
    }

    fn destroy_buffer(&self, allocation: &BufferAllocation) {
        let mut state = self.state.borrow_mut();
        if let Some(record) = state.buffers.remove(&allocation.buffer.as_raw()) {
            state.memory_owner.remove(&record.memory);
        }
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> GpuResult<()> {
        let mut state = self.state.borrow_mut();
        let buffer = *state
            .memory_owner
            .get(&memory.as_raw())
            .ok_or_else(|| GpuError::InvalidOperation("write to unknown memory".to_string()))?;
        let record = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| GpuError::InvalidOperation("write to freed buffer".to_string()))?;

        if !record.host_visible {
            return Err(GpuError::api(vk::Result::ERROR_MEMORY_MAP_FAILED, "mapping device-local memory"));
        }

        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(data.len());
        if end > record.bytes.len() {
            return Err(GpuError::InvalidOperation(format!(
                "write of {} bytes at {} overflows buffer of {}",
                data.len(),
                offset,
                record.bytes.len()
            )));
        }
        record.bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> GpuResult<()> {
        let mut state = self.state.borrow_mut();
        if std::mem::take(&mut state.copy_fault) {
            return Err(GpuError::api(vk::Result::ERROR_DEVICE_LOST, "copying buffer"));
        }
        let len = usize::try_from(size).unwrap_or(usize::MAX);
        let bytes = state
            .buffers
            .get(&src.as_raw())
            .filter(|b| b.bytes.len() >= len)
            .map(|b| b.bytes[..len].to_vec())
            .ok_or_else(|| GpuError::InvalidOperation("copy from missing or short buffer".to_string()))?;
        let target = state
            .buffers
            .get_mut(&dst.as_raw())
            .filter(|b| b.bytes.len() >= len)
            .ok_or_else(|| GpuError::InvalidOperation("copy into missing or short buffer".to_string()))?;
        target.bytes[..len].copy_from_slice(&bytes);
        state.transfers += 1;
        Ok(())
    }

    fn create_semaphore(&self) -> GpuResult<vk::Semaphore> {
        let mut state = self.state.borrow_mut();
        let raw = state.handle();
        state.semaphores.insert(raw);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.borrow_mut().semaphores.remove(&semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> GpuResult<vk::Fence> {
        let mut state = self.state.borrow_mut();
        let raw = state.handle();
        state.fences.insert(
            raw,
            FenceRecord {
                signaled,
                ..FenceRecord::default()
            },
        );
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state.borrow_mut().fences.remove(&fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> GpuResult<()> {
        let mut state = self.state.borrow_mut();
        let record = state
            .fences
            .get_mut(&fence.as_raw())
            .ok_or_else(|| GpuError::InvalidOperation("wait on unknown fence".to_string()))?;
        // Nothing is ever pending here, so an unsignaled fence would never signal.
        if !record.signaled {
            return Err(GpuError::Timeout {
                context: "waiting for an unsignaled fence".to_string(),
            });
        }
        record.waits += 1;
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> GpuResult<()> {
        let mut state = self.state.borrow_mut();
        let record = state
            .fences
            .get_mut(&fence.as_raw())
            .ok_or_else(|| GpuError::InvalidOperation("reset of unknown fence".to_string()))?;
        record.signaled = false;
        record.resets += 1;
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> GpuResult<vk::DescriptorSetLayout> {
        let mut state = self.state.borrow_mut();
        let raw = state.handle();
        state.layouts.insert(raw);
        Ok(vk::DescriptorSetLayout::from_raw(raw))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.borrow_mut().layouts.remove(&layout.as_raw());
    }

    fn create_descriptor_pool(
        &self,
        _sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> GpuResult<vk::DescriptorPool> {
        let mut state = self.state.borrow_mut();
        let raw = state.handle();
        state.pools.insert(
            raw,
            PoolRecord {
                max_sets,
                allocated: 0,
                sets: Vec::new(),
            },
        );
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.borrow_mut();
        if let Some(record) = state.pools.remove(&pool.as_raw()) {
            for set in record.sets {
                state.set_writes.remove(&set);
            }
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> GpuResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state.borrow_mut();
        let requested = u32::try_from(layouts.len()).unwrap_or(u32::MAX);
        let record = state
            .pools
            .get(&pool.as_raw())
            .ok_or_else(|| GpuError::InvalidOperation("allocation from unknown pool".to_string()))?;
        if record.allocated.saturating_add(requested) > record.max_sets {
            return Err(GpuError::api(
                vk::Result::ERROR_OUT_OF_POOL_MEMORY,
                "allocating descriptor sets",
            ));
        }

        let sets: Vec<u64> = layouts.iter().map(|_| state.handle()).collect();
        for set in &sets {
            state.set_writes.insert(*set, Vec::new());
        }
        if let Some(record) = state.pools.get_mut(&pool.as_raw()) {
            record.allocated += requested;
            record.sets.extend(&sets);
        }
        Ok(sets.into_iter().map(vk::DescriptorSet::from_raw).collect())
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        if let Some(existing) = self.state.borrow_mut().set_writes.get_mut(&set.as_raw()) {
            *existing = writes.to_vec();
        }
    }

    fn allocate_command_buffers(&self, count: u32) -> GpuResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.borrow_mut();
        let buffers: Vec<u64> = (0..count).map(|_| state.handle()).collect();
        for buffer in &buffers {
            state.command_buffers.insert(*buffer, Vec::new());
        }
        Ok(buffers.into_iter().map(vk::CommandBuffer::from_raw).collect())
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.borrow_mut();
        for buffer in buffers {
            state.command_buffers.remove(&buffer.as_raw());
            state.recording.remove(&buffer.as_raw());
        }
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GpuResult<()> {
        let mut state = self.state.borrow_mut();
        let raw = command_buffer.as_raw();
        let commands = state
            .command_buffers
            .get_mut(&raw)
            .ok_or_else(|| GpuError::InvalidOperation("begin on unknown command buffer".to_string()))?;
        commands.clear();
        state.recording.insert(raw);
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GpuResult<()> {
        if self.state.borrow_mut().recording.remove(&command_buffer.as_raw()) {
            Ok(())
        } else {
            Err(GpuError::InvalidOperation("end on a command buffer that is not recording".to_string()))
        }
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, image_index: u32, _clear_color: [f32; 4]) {
        self.state
            .borrow_mut()
            .record(command_buffer, RecordedCommand::BeginRenderPass { image_index });
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.state.borrow_mut().record(command_buffer, RecordedCommand::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.state
            .borrow_mut()
            .record(command_buffer, RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.state
            .borrow_mut()
            .record(command_buffer, RecordedCommand::BindDescriptorSet(set));
    }

    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        self.state
            .borrow_mut()
            .record(command_buffer, RecordedCommand::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, _index_type: vk::IndexType) {
        self.state
            .borrow_mut()
            .record(command_buffer, RecordedCommand::BindIndexBuffer(buffer));
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        self.state
            .borrow_mut()
            .record(command_buffer, RecordedCommand::PushConstants(data.to_vec()));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        self.state.borrow_mut().record(
            command_buffer,
            RecordedCommand::SetViewport {
                width: viewport.width as u32,
                height: viewport.height as u32,
            },
        );
    }

    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.state.borrow_mut().record(
            command_buffer,
            RecordedCommand::SetScissor {
                x: scissor.offset.x,
                y: scissor.offset.y,
                width: scissor.extent.width,
                height: scissor.extent.height,
            },
        );
    }

    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32, first_index: u32, vertex_offset: i32) {
        self.state.borrow_mut().record(
            command_buffer,
            RecordedCommand::DrawIndexed {
                index_count,
                first_index,
                vertex_offset,
            },
        );
    }

    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> GpuResult<()> {
        let mut state = self.state.borrow_mut();
        if state.recording.contains(&command_buffer.as_raw()) {
            return Err(GpuError::InvalidOperation("submit of a command buffer still recording".to_string()));
        }
        let commands = state
            .command_buffers
            .get(&command_buffer.as_raw())
            .cloned()
            .ok_or_else(|| GpuError::InvalidOperation("submit of unknown command buffer".to_string()))?;

        let record = state
            .fences
            .get_mut(&fence.as_raw())
            .ok_or_else(|| GpuError::InvalidOperation("submit with unknown fence".to_string()))?;
        if record.signaled {
            return Err(GpuError::InvalidOperation("submit with a fence that is still signaled".to_string()));
        }
        record.signaled = true;
        record.signals += 1;

        if state.submissions.len() >= state.submission_capacity {
            state.submissions.pop_front();
        }
        state.submissions.push_back(Submission {
            command_buffer,
            wait,
            signal,
            fence,
            commands,
        });
        state.submits += 1;
        Ok(())
    }

    fn acquire_next_image(&self, _signal: vk::Semaphore, _timeout_ns: u64) -> GpuResult<AcquiredImage> {
        let mut state = self.state.borrow_mut();
        if state.out_of_date {
            return Ok(AcquiredImage::OutOfDate);
        }
        if let Some(index) = state.acquire_script.pop_front() {
            if index >= state.image_count {
                return Err(GpuError::InvalidOperation(format!("scripted acquire of image {index}")));
            }
            return Ok(AcquiredImage::Ready(index));
        }
        let index = state.next_image % state.image_count;
        state.next_image = state.next_image.wrapping_add(1);
        Ok(AcquiredImage::Ready(index))
    }

    fn present(&self, image_index: u32, _wait: vk::Semaphore) -> GpuResult<PresentOutcome> {
        let mut state = self.state.borrow_mut();
        if image_index >= state.image_count {
            return Err(GpuError::InvalidOperation(format!("present of image {image_index}")));
        }
        if state.out_of_date {
            return Ok(PresentOutcome::OutOfDate);
        }
        state.presents += 1;
        Ok(PresentOutcome::Presented)
    }

    fn swapchain_image_count(&self) -> u32 {
        self.state.borrow().image_count
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.state.borrow().extent
    }

    fn surface_resized(&self, width: u32, height: u32) {
        self.resize(width, height);
    }

    fn recreate_swapchain(&self) -> GpuResult<()> {
        let mut state = self.state.borrow_mut();
        state.out_of_date = false;
        state.next_image = 0;
        state.acquire_script.clear();
        state.swapchain_recreations += 1;
        Ok(())
    }

    fn wait_idle(&self) -> GpuResult<()> {
        self.state.borrow_mut().wait_idle_calls += 1;
        Ok(())
    }

    fn create_graphics_pipeline(&self, _desc: &PipelineDesc) -> GpuResult<PipelineHandles> {
        let mut state = self.state.borrow_mut();
        let pipeline = state.handle();
        let layout = state.handle();
        state.pipelines.insert(pipeline);
        Ok(PipelineHandles {
            pipeline: vk::Pipeline::from_raw(pipeline),
            layout: vk::PipelineLayout::from_raw(layout),
        })
    }

    fn destroy_pipeline(&self, handles: &PipelineHandles) {
        self.state.borrow_mut().pipelines.remove(&handles.pipeline.as_raw());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_signals_fence_and_wait_counts() {
        let device = HeadlessDevice::default();
        let fence = device.create_fence(true).unwrap();
        let semaphore = device.create_semaphore().unwrap();
        let cb = device.allocate_command_buffers(1).unwrap()[0];

        device.wait_for_fence(fence, 1).unwrap();
        device.reset_fence(fence).unwrap();
        assert!(matches!(device.wait_for_fence(fence, 1), Err(GpuError::Timeout { .. })));

        device.begin_command_buffer(cb).unwrap();
        device.end_command_buffer(cb).unwrap();
        device.submit(cb, semaphore, semaphore, fence).unwrap();

        assert!(device.fence_signaled(fence));
        assert_eq!(device.fence_wait_count(fence), 1);
        assert_eq!(device.fence_signal_count(fence), 1);
    }

    #[test]
    fn test_device_local_memory_is_not_mappable() {
        let device = HeadlessDevice::default();
        let buffer = device
            .create_buffer(16, vk::BufferUsageFlags::VERTEX_BUFFER, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .unwrap();
        assert!(matches!(
            device.write_memory(buffer.memory, 0, &[1, 2, 3]),
            Err(GpuError::Api { code: vk::Result::ERROR_MEMORY_MAP_FAILED, .. })
        ));
    }

    #[test]
    fn test_submission_log_keeps_most_recent() {
        let device = HeadlessDevice::new(2, (64, 64));
        let semaphore = device.create_semaphore().unwrap();
        let cb = device.allocate_command_buffers(1).unwrap()[0];
        let fences: Vec<_> = (0..5).map(|_| device.create_fence(false).unwrap()).collect();

        for fence in &fences {
            device.begin_command_buffer(cb).unwrap();
            device.end_command_buffer(cb).unwrap();
            device.submit(cb, semaphore, semaphore, *fence).unwrap();
        }

        let kept: Vec<_> = device.submissions().iter().map(|s| s.fence).collect();
        assert_eq!(kept, vec![fences[3], fences[4]]);
        assert_eq!(device.submit_count(), 5);
        assert_eq!(device.take_submissions().len(), 2);
        assert!(device.submissions().is_empty());
    }

    #[test]
    fn test_injected_faults_fire_once() {
        let device = HeadlessDevice::default();
        let usage = vk::BufferUsageFlags::TRANSFER_SRC;
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;

        device.inject_fault(FaultPoint::CreateBuffer { skip: 1 });
        let first = device.create_buffer(8, usage, host).unwrap();
        assert!(device.create_buffer(8, usage, host).is_err());
        let second = device.create_buffer(8, usage, host).unwrap();

        device.inject_fault(FaultPoint::CopyBuffer);
        assert!(matches!(
            device.copy_buffer(first.buffer, second.buffer, 8),
            Err(GpuError::Api { code: vk::Result::ERROR_DEVICE_LOST, .. })
        ));
        device.copy_buffer(first.buffer, second.buffer, 8).unwrap();
        assert_eq!(device.transfer_count(), 1);
    }

    #[test]
    fn test_out_of_date_until_recreated() {
        let device = HeadlessDevice::new(2, (64, 64));
        let semaphore = device.create_semaphore().unwrap();
        assert_eq!(device.acquire_next_image(semaphore, 0).unwrap(), AcquiredImage::Ready(0));

        device.resize(128, 32);
        assert_eq!(device.acquire_next_image(semaphore, 0).unwrap(), AcquiredImage::OutOfDate);
        assert_eq!(device.present(0, semaphore).unwrap(), PresentOutcome::OutOfDate);

        device.recreate_swapchain().unwrap();
        assert_eq!(device.acquire_next_image(semaphore, 0).unwrap(), AcquiredImage::Ready(0));
        assert_eq!(device.swapchain_extent().width, 128);
    }
}
