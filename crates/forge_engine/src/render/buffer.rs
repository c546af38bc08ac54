//! Buffer management for vertex, index and host-written data
//!
//! Every buffer owns its memory and releases both through the device in
//! `Drop`. Device-local buffers are filled through a transient staging
//! buffer that never outlives the constructor.

use ash::vk;
use bytemuck::Pod;
use log::debug;

use crate::render::device::{BufferAllocation, DeviceRef, GpuError, GpuResult};

/// Buffer plus memory, destroyed on drop
pub struct Buffer {
    device: DeviceRef,
    allocation: BufferAllocation,
}

impl Buffer {
    /// Allocate a buffer with the given usage and memory properties
    pub fn new(
        device: DeviceRef,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> GpuResult<Self> {
        let allocation = device.create_buffer(size, usage, properties)?;
        Ok(Self { device, allocation })
    }

    /// Host-visible, coherent buffer
    pub fn host_visible(device: DeviceRef, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> GpuResult<Self> {
        Self::new(
            device,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Write `data` at byte `offset`. The memory must be host visible.
    pub fn write<T: Pod>(&self, offset: vk::DeviceSize, data: &[T]) -> GpuResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let end = offset.saturating_add(bytes.len() as vk::DeviceSize);
        if end > self.allocation.size {
            return Err(GpuError::InvalidOperation(format!(
                "write of {} bytes at {} overruns buffer of {} bytes",
                bytes.len(),
                offset,
                self.allocation.size
            )));
        }
        self.device.write_memory(self.allocation.memory, offset, bytes)
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.allocation.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.allocation.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.device.destroy_buffer(&self.allocation);
    }
}

/// Byte size of a slice, rejecting empty input
fn byte_size<T: Pod>(data: &[T]) -> GpuResult<vk::DeviceSize> {
    let size = std::mem::size_of_val(data) as vk::DeviceSize;
    if size == 0 {
        return Err(GpuError::InvalidOperation("Cannot upload an empty slice".to_string()));
    }
    Ok(size)
}

/// Upload `data` into a new device-local buffer with `usage`.
///
/// The staging buffer is dropped before this returns, on success and on
/// every error path, so only the destination stays alive.
pub fn upload_device_local<T: Pod>(device: &DeviceRef, data: &[T], usage: vk::BufferUsageFlags) -> GpuResult<Buffer> {
    let size = byte_size(data)?;

    let staging = Buffer::host_visible(device.clone(), size, vk::BufferUsageFlags::TRANSFER_SRC)?;
    staging.write(0, data)?;

    let destination = Buffer::new(
        device.clone(),
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    device.copy_buffer(staging.handle(), destination.handle(), size)?;

    debug!("Uploaded {} bytes to device-local buffer", size);
    Ok(destination)
}

/// Device-local vertex buffer
pub struct VertexBuffer {
    buffer: Buffer,
    vertex_count: u32,
}

impl VertexBuffer {
    /// Upload vertex data
    pub fn new<T: Pod>(device: &DeviceRef, vertices: &[T]) -> GpuResult<Self> {
        let buffer = upload_device_local(device, vertices, vk::BufferUsageFlags::VERTEX_BUFFER)?;
        Ok(Self {
            buffer,
            vertex_count: count_u32(vertices.len())?,
        })
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Number of vertices uploaded
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

/// Device-local `u32` index buffer
pub struct IndexBuffer {
    buffer: Buffer,
    index_count: u32,
}

impl IndexBuffer {
    /// Upload index data
    pub fn new(device: &DeviceRef, indices: &[u32]) -> GpuResult<Self> {
        let buffer = upload_device_local(device, indices, vk::BufferUsageFlags::INDEX_BUFFER)?;
        Ok(Self {
            buffer,
            index_count: count_u32(indices.len())?,
        })
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Number of indices
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

fn count_u32(len: usize) -> GpuResult<u32> {
    u32::try_from(len).map_err(|_| GpuError::InvalidOperation(format!("{} elements exceed u32 range", len)))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::render::device::{FaultPoint, HeadlessDevice};

    #[test]
    fn test_upload_leaves_only_destination_alive() {
        let headless = Rc::new(HeadlessDevice::default());
        let device: DeviceRef = headless.clone();

        let indices = [0_u32, 1, 2, 2, 3, 0];
        let buffer = IndexBuffer::new(&device, &indices).unwrap();

        assert_eq!(headless.live_buffer_count(), 1);
        assert_eq!(headless.transfer_count(), 1);
        assert_eq!(buffer.index_count(), 6);
        let contents = headless.buffer_contents(buffer.handle()).unwrap();
        assert_eq!(contents, bytemuck::cast_slice::<u32, u8>(&indices));

        drop(buffer);
        assert_eq!(headless.live_buffer_count(), 0);
    }

    #[test]
    fn test_empty_upload_is_rejected_without_allocating() {
        let headless = Rc::new(HeadlessDevice::default());
        let device: DeviceRef = headless.clone();

        let empty: [u32; 0] = [];
        assert!(IndexBuffer::new(&device, &empty).is_err());
        assert_eq!(headless.live_buffer_count(), 0);
    }

    #[test]
    fn test_failed_upload_releases_staging_and_destination() {
        let headless = Rc::new(HeadlessDevice::default());
        let device: DeviceRef = headless.clone();
        let _existing = Buffer::host_visible(device.clone(), 16, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
        let before = headless.live_buffer_count();

        // staging succeeds, destination allocation fails
        headless.inject_fault(FaultPoint::CreateBuffer { skip: 1 });
        assert!(VertexBuffer::new(&device, &[1.0_f32, 2.0, 3.0]).is_err());
        assert_eq!(headless.live_buffer_count(), before);

        // both buffers exist when the copy fails
        headless.inject_fault(FaultPoint::CopyBuffer);
        assert!(IndexBuffer::new(&device, &[0_u32, 1, 2]).is_err());
        assert_eq!(headless.live_buffer_count(), before);
        assert_eq!(headless.transfer_count(), 0);

        let buffer = IndexBuffer::new(&device, &[0_u32, 1, 2]).unwrap();
        assert_eq!(headless.live_buffer_count(), before + 1);
        assert_eq!(buffer.index_count(), 3);
    }

    #[test]
    fn test_host_write_bounds() {
        let headless = Rc::new(HeadlessDevice::default());
        let device: DeviceRef = headless.clone();
        let buffer = Buffer::host_visible(device, 8, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();

        buffer.write(4, &[7_u32]).unwrap();
        assert!(buffer.write(4, &[1_u32, 2]).is_err());
        assert_eq!(headless.buffer_contents(buffer.handle()).unwrap(), vec![0, 0, 0, 0, 7, 0, 0, 0]);
    }
}
