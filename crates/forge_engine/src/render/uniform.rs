//! Per-image uniform buffers

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{to_column_array, Mat4};
use crate::render::buffer::Buffer;
use crate::render::device::{DeviceRef, GpuError, GpuResult};

/// Matrices read by the mesh vertex shader, std140 compatible
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    /// Object to world
    pub model: [[f32; 4]; 4],
    /// World to view
    pub view: [[f32; 4]; 4],
    /// View to clip, Vulkan conventions
    pub proj: [[f32; 4]; 4],
}

impl UniformBufferObject {
    /// Pack three matrices
    pub fn new(model: &Mat4, view: &Mat4, proj: &Mat4) -> Self {
        Self {
            model: to_column_array(model),
            view: to_column_array(view),
            proj: to_column_array(proj),
        }
    }

    /// Size of the block in bytes
    pub const SIZE: vk::DeviceSize = std::mem::size_of::<Self>() as vk::DeviceSize;
}

/// One host-visible uniform buffer per swapchain image, so a frame being
/// written never touches the buffer of a frame the GPU may still read.
pub struct UniformBuffers {
    buffers: Vec<Buffer>,
}

impl UniformBuffers {
    /// Allocate `image_count` buffers
    pub fn new(device: &DeviceRef, image_count: u32) -> GpuResult<Self> {
        let buffers = (0..image_count)
            .map(|_| {
                Buffer::host_visible(
                    device.clone(),
                    UniformBufferObject::SIZE,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                )
            })
            .collect::<GpuResult<Vec<_>>>()?;
        Ok(Self { buffers })
    }

    /// Overwrite the buffer of `image_index`
    pub fn update(&self, image_index: u32, ubo: &UniformBufferObject) -> GpuResult<()> {
        self.buffer(image_index)?.write(0, std::slice::from_ref(ubo))
    }

    /// Buffer of `image_index`
    pub fn buffer(&self, image_index: u32) -> GpuResult<&Buffer> {
        self.buffers.get(image_index as usize).ok_or_else(|| {
            GpuError::InvalidOperation(format!(
                "image {} has no uniform buffer ({} allocated)",
                image_index,
                self.buffers.len()
            ))
        })
    }

    /// Number of buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// True when no buffer was allocated
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffers in image order
    pub fn iter(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::render::device::HeadlessDevice;

    #[test]
    fn test_update_touches_only_its_image() {
        let headless = Rc::new(HeadlessDevice::default());
        let device: DeviceRef = headless.clone();
        let uniforms = UniformBuffers::new(&device, 3).unwrap();
        assert_eq!(uniforms.len(), 3);

        let identity = Mat4::identity();
        let ubo = UniformBufferObject::new(&Mat4::new_scaling(2.0), &identity, &identity);
        uniforms.update(1, &ubo).unwrap();

        let written = headless.buffer_contents(uniforms.buffer(1).unwrap().handle()).unwrap();
        assert_eq!(written, bytemuck::bytes_of(&ubo));
        let untouched = headless.buffer_contents(uniforms.buffer(0).unwrap().handle()).unwrap();
        assert!(untouched.iter().all(|&b| b == 0));

        assert!(uniforms.update(3, &ubo).is_err());
    }
}
