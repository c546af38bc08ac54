//! Descriptor set layouts, pools and per-image sets
//!
//! Pools are sized from the swapchain image count times the descriptor
//! types they serve. Running out is fatal; nothing retries.

use ash::vk;
use log::debug;

use crate::render::device::{DescriptorWrite, DeviceRef, GpuError, GpuResult};
use crate::render::uniform::{UniformBufferObject, UniformBuffers};

/// Descriptor set layout destroyed on drop
pub struct DescriptorSetLayout {
    device: DeviceRef,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Create from explicit bindings
    pub fn new(device: DeviceRef, bindings: &[vk::DescriptorSetLayoutBinding]) -> GpuResult<Self> {
        let layout = device.create_descriptor_set_layout(bindings)?;
        Ok(Self { device, layout })
    }

    /// Single uniform buffer at binding 0, read by the vertex stage
    pub fn uniform_buffer(device: DeviceRef) -> GpuResult<Self> {
        let binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build();
        Self::new(device, &[binding])
    }

    /// Layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.device.destroy_descriptor_set_layout(self.layout);
    }
}

/// Descriptor pool with capacity accounting
pub struct DescriptorPool {
    device: DeviceRef,
    pool: vk::DescriptorPool,
    capacity: u32,
    allocated: u32,
}

impl DescriptorPool {
    /// Pool for `image_count` sets, each holding one descriptor of every
    /// type in `types`
    pub fn new(device: DeviceRef, types: &[vk::DescriptorType], image_count: u32) -> GpuResult<Self> {
        if image_count == 0 {
            return Err(GpuError::InvalidOperation("Descriptor pool sized for zero images".to_string()));
        }
        let sizes: Vec<vk::DescriptorPoolSize> = types
            .iter()
            .map(|&ty| vk::DescriptorPoolSize {
                ty,
                descriptor_count: image_count,
            })
            .collect();
        let pool = device.create_descriptor_pool(&sizes, image_count)?;
        debug!("Created descriptor pool for {} sets", image_count);
        Ok(Self {
            device,
            pool,
            capacity: image_count,
            allocated: 0,
        })
    }

    /// Allocate `count` sets of `layout`
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout, count: u32) -> GpuResult<Vec<vk::DescriptorSet>> {
        if count == 0 {
            return Err(GpuError::InvalidOperation("Allocating zero descriptor sets".to_string()));
        }
        let requested = self.allocated.saturating_add(count);
        if requested > self.capacity {
            return Err(GpuError::PoolExhausted {
                requested,
                capacity: self.capacity,
            });
        }

        let layouts = vec![layout; count as usize];
        let sets = self
            .device
            .allocate_descriptor_sets(self.pool, &layouts)
            .map_err(|err| match err {
                GpuError::Api {
                    code: vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL,
                    ..
                } => GpuError::PoolExhausted {
                    requested,
                    capacity: self.capacity,
                },
                other => other,
            })?;
        self.allocated = requested;
        Ok(sets)
    }

    /// Sets the pool was sized for
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Sets handed out so far
    pub fn allocated(&self) -> u32 {
        self.allocated
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        self.device.destroy_descriptor_pool(self.pool);
    }
}

/// One descriptor set per swapchain image, each pointing at the uniform
/// buffer of the same image. The sets borrow nothing; the owner keeps the
/// uniform buffers alive at least as long as this value.
pub struct DescriptorSets {
    sets: Vec<vk::DescriptorSet>,
    _pool: DescriptorPool,
}

impl DescriptorSets {
    /// Allocate and write one set per uniform buffer
    pub fn for_uniforms(
        device: &DeviceRef,
        layout: &DescriptorSetLayout,
        uniforms: &UniformBuffers,
    ) -> GpuResult<Self> {
        let image_count = u32::try_from(uniforms.len())
            .map_err(|_| GpuError::InvalidOperation("too many uniform buffers".to_string()))?;
        let mut pool = DescriptorPool::new(device.clone(), &[vk::DescriptorType::UNIFORM_BUFFER], image_count)?;
        let sets = pool.allocate(layout.handle(), image_count)?;

        for (set, buffer) in sets.iter().zip(uniforms.iter()) {
            device.update_descriptor_set(
                *set,
                &[DescriptorWrite::UniformBuffer {
                    binding: 0,
                    buffer: buffer.handle(),
                    offset: 0,
                    range: UniformBufferObject::SIZE,
                }],
            );
        }

        Ok(Self { sets, _pool: pool })
    }

    /// Set for `image_index`
    pub fn get(&self, image_index: u32) -> Option<vk::DescriptorSet> {
        self.sets.get(image_index as usize).copied()
    }

    /// Number of sets
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// True when there are no sets
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::render::device::HeadlessDevice;

    #[test]
    fn test_pool_allows_exactly_image_count_sets() {
        let headless = Rc::new(HeadlessDevice::default());
        let device: DeviceRef = headless.clone();
        let layout = DescriptorSetLayout::uniform_buffer(device.clone()).unwrap();
        let mut pool = DescriptorPool::new(device, &[vk::DescriptorType::UNIFORM_BUFFER], 3).unwrap();

        for _ in 0..3 {
            assert_eq!(pool.allocate(layout.handle(), 1).unwrap().len(), 1);
        }
        assert!(matches!(
            pool.allocate(layout.handle(), 1),
            Err(GpuError::PoolExhausted { requested: 4, capacity: 3 })
        ));
        assert_eq!(pool.allocated(), 3);
    }

    #[test]
    fn test_zero_set_allocation_is_rejected() {
        let headless = Rc::new(HeadlessDevice::default());
        let device: DeviceRef = headless.clone();
        let layout = DescriptorSetLayout::uniform_buffer(device.clone()).unwrap();
        let mut pool = DescriptorPool::new(device, &[vk::DescriptorType::UNIFORM_BUFFER], 2).unwrap();

        assert!(matches!(pool.allocate(layout.handle(), 0), Err(GpuError::InvalidOperation(_))));
        assert_eq!(pool.allocated(), 0);
        assert_eq!(pool.allocate(layout.handle(), 2).unwrap().len(), 2);
    }

    #[test]
    fn test_sets_point_at_matching_uniform_buffer() {
        let headless = Rc::new(HeadlessDevice::default());
        let device: DeviceRef = headless.clone();
        let layout = DescriptorSetLayout::uniform_buffer(device.clone()).unwrap();
        let uniforms = UniformBuffers::new(&device, 2).unwrap();
        let sets = DescriptorSets::for_uniforms(&device, &layout, &uniforms).unwrap();

        assert_eq!(sets.len(), 2);
        for image in 0..2 {
            let writes = headless.descriptor_writes(sets.get(image).unwrap());
            assert_eq!(
                writes,
                vec![DescriptorWrite::UniformBuffer {
                    binding: 0,
                    buffer: uniforms.buffer(image).unwrap().handle(),
                    offset: 0,
                    range: UniformBufferObject::SIZE,
                }]
            );
        }

        drop(sets);
        assert_eq!(headless.live_pool_count(), 0);
    }
}
