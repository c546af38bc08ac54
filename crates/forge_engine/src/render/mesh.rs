//! Mesh geometry and the GPU objects drawn for it

use std::f32::consts::PI;

use slotmap::new_key_type;

use crate::render::buffer::{IndexBuffer, VertexBuffer};
use crate::render::descriptor::{DescriptorSetLayout, DescriptorSets};
use crate::render::device::{DeviceRef, GpuError, GpuResult};
use crate::render::uniform::{UniformBufferObject, UniformBuffers};
use crate::render::vertex::Vertex;

new_key_type! {
    /// Handle of a render object owned by the render manager
    pub struct RenderObjectId;
}

/// CPU-side geometry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    /// Vertex data
    pub vertices: Vec<Vertex>,
    /// Triangle list indices into `vertices`
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Wrap existing geometry
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Axis-aligned cube with per-face normals
    pub fn cube(half_extent: f32) -> Self {
        // (normal, tangent u, tangent v) per face
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ];
        let corners = [(-1.0, -1.0, [0.0, 0.0]), (1.0, -1.0, [1.0, 0.0]), (1.0, 1.0, [1.0, 1.0]), (-1.0, 1.0, [0.0, 1.0])];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, u, v) in faces {
            let base = vertices.len() as u32;
            for (su, sv, uv) in corners {
                let position = [0, 1, 2].map(|axis| half_extent * (normal[axis] + su * u[axis] + sv * v[axis]));
                vertices.push(Vertex::new(position, normal, uv));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        Self { vertices, indices }
    }

    /// UV sphere centred on the origin
    pub fn uv_sphere(radius: f32, segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);
        let mut indices = Vec::with_capacity((segments * rings * 6) as usize);

        for ring in 0..=rings {
            let v = ring as f32 / rings as f32;
            let theta = v * PI;
            for segment in 0..=segments {
                let u = segment as f32 / segments as f32;
                let phi = u * 2.0 * PI;
                let normal = [theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin()];
                let position = normal.map(|n| n * radius);
                vertices.push(Vertex::new(position, normal, [u, v]));
            }
        }

        let stride = segments + 1;
        for ring in 0..rings {
            for segment in 0..segments {
                let a = ring * stride + segment;
                let b = a + stride;
                indices.extend_from_slice(&[a, a + 1, b, b, a + 1, b + 1]);
            }
        }
        Self { vertices, indices }
    }

    /// Every index must reference an existing vertex
    pub fn validate(&self) -> GpuResult<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(GpuError::InvalidOperation("Mesh has no geometry".to_string()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(GpuError::InvalidOperation(format!(
                "Index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        match self.indices.iter().find(|&&i| i as usize >= self.vertices.len()) {
            Some(bad) => Err(GpuError::InvalidOperation(format!(
                "Index {} out of range for {} vertices",
                bad,
                self.vertices.len()
            ))),
            None => Ok(()),
        }
    }
}

/// A mesh uploaded to device-local memory with its per-image uniforms and
/// descriptor sets
pub struct RenderObject {
    descriptors: DescriptorSets,
    uniforms: UniformBuffers,
    vertices: VertexBuffer,
    indices: IndexBuffer,
}

impl RenderObject {
    /// Upload `mesh` and build per-image resources for `image_count` images
    pub fn new(device: &DeviceRef, mesh: &MeshData, layout: &DescriptorSetLayout, image_count: u32) -> GpuResult<Self> {
        mesh.validate()?;
        let vertices = VertexBuffer::new(device, &mesh.vertices)?;
        let indices = IndexBuffer::new(device, &mesh.indices)?;
        let uniforms = UniformBuffers::new(device, image_count)?;
        let descriptors = DescriptorSets::for_uniforms(device, layout, &uniforms)?;
        Ok(Self {
            descriptors,
            uniforms,
            vertices,
            indices,
        })
    }

    /// Rebuild uniform buffers and descriptor sets after the swapchain
    /// changed. Geometry is kept.
    pub fn rebuild_per_image(&mut self, device: &DeviceRef, layout: &DescriptorSetLayout, image_count: u32) -> GpuResult<()> {
        let uniforms = UniformBuffers::new(device, image_count)?;
        let descriptors = DescriptorSets::for_uniforms(device, layout, &uniforms)?;
        self.descriptors = descriptors;
        self.uniforms = uniforms;
        Ok(())
    }

    /// Write the matrices for `image_index`
    pub fn update_uniform(&self, image_index: u32, ubo: &UniformBufferObject) -> GpuResult<()> {
        self.uniforms.update(image_index, ubo)
    }

    /// Descriptor set for `image_index`
    pub fn descriptor_set(&self, image_index: u32) -> GpuResult<ash::vk::DescriptorSet> {
        self.descriptors
            .get(image_index)
            .ok_or_else(|| GpuError::InvalidOperation(format!("image {} has no descriptor set", image_index)))
    }

    /// Vertex buffer
    pub fn vertex_buffer(&self) -> &VertexBuffer {
        &self.vertices
    }

    /// Index buffer
    pub fn index_buffer(&self) -> &IndexBuffer {
        &self.indices
    }

    /// Number of per-image uniform buffers
    pub fn image_count(&self) -> usize {
        self.uniforms.len()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::render::device::HeadlessDevice;

    #[test]
    fn test_cube_geometry() {
        let cube = MeshData::cube(0.5);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        cube.validate().unwrap();
        assert!(cube
            .vertices
            .iter()
            .all(|v| v.position.iter().all(|c| (c.abs() - 0.5).abs() < 1e-6)));
    }

    #[test]
    fn test_sphere_vertices_lie_on_radius() {
        let sphere = MeshData::uv_sphere(2.0, 8, 6);
        sphere.validate().unwrap();
        for vertex in &sphere.vertices {
            let [x, y, z] = vertex.position;
            assert!(((x * x + y * y + z * z).sqrt() - 2.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let mesh = MeshData::new(vec![Vertex::new([0.0; 3], [0.0, 1.0, 0.0], [0.0; 2])], vec![0, 0, 1]);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_rebuild_replaces_per_image_resources() {
        let headless = Rc::new(HeadlessDevice::default());
        let device: DeviceRef = headless.clone();
        let layout = DescriptorSetLayout::uniform_buffer(device.clone()).unwrap();
        let mut object = RenderObject::new(&device, &MeshData::cube(1.0), &layout, 3).unwrap();

        // vertex + index + three uniforms
        assert_eq!(headless.live_buffer_count(), 5);
        assert_eq!(headless.live_pool_count(), 1);

        object.rebuild_per_image(&device, &layout, 2).unwrap();
        assert_eq!(object.image_count(), 2);
        assert_eq!(headless.live_buffer_count(), 4);
        assert_eq!(headless.live_pool_count(), 1);
    }
}
