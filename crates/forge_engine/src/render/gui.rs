//! # GUI Overlay
//!
//! An immediate-mode GUI layer hands the renderer a [`GuiDrawData`] each
//! frame: 2D vertices, 16-bit indices and a list of clipped draw commands.
//! [`GuiRenderer`] uploads it into host-visible buffers owned by the current
//! frame slot and draws it after the scene, inside the same render pass.
//!
//! Buffers are reused across frames. The vertex buffer is rebuilt when the
//! vertex count changes; the index buffer only when the index count outgrows
//! its capacity.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use log::debug;

use crate::input::InputManager;
use crate::render::buffer::Buffer;
use crate::render::device::{DeviceRef, GpuError, GpuResult, PipelineDesc, PipelineHandles, VertexLayout};

pub use crate::render::vertex::GuiVertex;

/// One scissored draw inside [`GuiDrawData`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuiDrawCommand {
    /// Clip rectangle in pixels: min x, min y, max x, max y
    pub clip_rect: [f32; 4],
    /// Indices to draw
    pub index_count: u32,
    /// First index in the shared index buffer
    pub first_index: u32,
    /// Added to every index
    pub vertex_offset: i32,
}

/// Geometry of one GUI frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuiDrawData {
    /// Top-left of the displayed area in GUI coordinates
    pub display_pos: [f32; 2],
    /// Size of the displayed area in GUI coordinates
    pub display_size: [f32; 2],
    /// Vertices of every command
    pub vertices: Vec<GuiVertex>,
    /// Indices of every command
    pub indices: Vec<u16>,
    /// Draw commands in submission order
    pub commands: Vec<GuiDrawCommand>,
}

impl GuiDrawData {
    /// Empty frame covering `width` x `height`
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            display_size: [width, height],
            ..Self::default()
        }
    }

    /// Drop all geometry but keep the display area
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.commands.clear();
    }

    /// True when there is nothing to draw
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() || self.indices.is_empty()
    }

    /// Append a solid rectangle as its own command, clipped to itself
    pub fn add_rect(&mut self, min: [f32; 2], max: [f32; 2], color: [u8; 4]) {
        let Ok(base) = i32::try_from(self.vertices.len()) else {
            return;
        };
        let Ok(first_index) = u32::try_from(self.indices.len()) else {
            return;
        };
        for (x, y) in [(min[0], min[1]), (max[0], min[1]), (max[0], max[1]), (min[0], max[1])] {
            self.vertices.push(GuiVertex {
                position: [x, y],
                uv: [0.0, 0.0],
                color,
            });
        }
        self.indices.extend_from_slice(&[0, 1, 2, 2, 3, 0]);
        self.commands.push(GuiDrawCommand {
            clip_rect: [min[0], min[1], max[0], max[1]],
            index_count: 6,
            first_index,
            vertex_offset: base,
        });
    }
}

/// Source of per-frame GUI geometry, typically an immediate-mode UI library
pub trait GuiLayer {
    /// Build this frame's geometry into `draw_data`, which arrives cleared
    fn build_frame(&mut self, input: &InputManager, delta_time: f32, draw_data: &mut GuiDrawData);
}

/// Push constant block of the GUI vertex shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GuiPushConstants {
    /// GUI coordinates to NDC scale
    pub scale: [f32; 2],
    /// GUI coordinates to NDC offset
    pub translate: [f32; 2],
}

impl GuiPushConstants {
    /// Map the display rectangle of `data` onto [-1, 1]; `None` while the
    /// display has no area, as with a minimized window
    pub fn for_display(data: &GuiDrawData) -> Option<Self> {
        let [width, height] = data.display_size;
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return None;
        }
        let scale = [2.0 / width, 2.0 / height];
        Some(Self {
            scale,
            translate: [
                -1.0 - data.display_pos[0] * scale[0],
                -1.0 - data.display_pos[1] * scale[1],
            ],
        })
    }
}

#[derive(Default)]
struct SlotBuffers {
    vertex: Option<Buffer>,
    vertex_count: usize,
    index: Option<Buffer>,
    index_capacity: usize,
}

/// Uploads and draws GUI geometry, one buffer pair per frame slot
pub struct GuiRenderer {
    device: DeviceRef,
    pipeline: PipelineHandles,
    slots: Vec<SlotBuffers>,
    rebuilds: u32,
}

impl GuiRenderer {
    /// Build the overlay pipeline and empty buffers for `frames_in_flight` slots
    pub fn new(device: DeviceRef, frames_in_flight: usize, vertex_shader: String, fragment_shader: String) -> GpuResult<Self> {
        let desc = PipelineDesc {
            vertex_shader,
            fragment_shader,
            descriptor_layouts: Vec::new(),
            push_constant_size: std::mem::size_of::<GuiPushConstants>() as u32,
            push_constant_stages: vk::ShaderStageFlags::VERTEX,
            vertex_layout: VertexLayout::Gui,
            depth_test: false,
            alpha_blend: true,
            cull_mode: vk::CullModeFlags::NONE,
        };
        let pipeline = device.create_graphics_pipeline(&desc)?;
        let slots = (0..frames_in_flight).map(|_| SlotBuffers::default()).collect();
        Ok(Self {
            device,
            pipeline,
            slots,
            rebuilds: 0,
        })
    }

    /// Buffer allocations performed so far
    pub fn rebuild_count(&self) -> u32 {
        self.rebuilds
    }

    /// Copy `data` into the buffers of `slot`, growing them when needed
    pub fn upload(&mut self, slot: usize, data: &GuiDrawData) -> GpuResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if data.vertices.is_empty() {
            return Err(GpuError::InvalidOperation(format!(
                "GUI draw list has {} indices but no vertices",
                data.indices.len()
            )));
        }
        let Some(buffers) = self.slots.get_mut(slot) else {
            return Ok(());
        };

        if buffers.vertex.is_none() || buffers.vertex_count != data.vertices.len() {
            let size = std::mem::size_of_val(data.vertices.as_slice()) as vk::DeviceSize;
            buffers.vertex = Some(Buffer::host_visible(
                self.device.clone(),
                size,
                vk::BufferUsageFlags::VERTEX_BUFFER,
            )?);
            buffers.vertex_count = data.vertices.len();
            self.rebuilds += 1;
            debug!("GUI vertex buffer for slot {} resized to {} vertices", slot, data.vertices.len());
        }

        if buffers.index.is_none() || data.indices.len() > buffers.index_capacity {
            let size = std::mem::size_of_val(data.indices.as_slice()) as vk::DeviceSize;
            buffers.index = Some(Buffer::host_visible(
                self.device.clone(),
                size,
                vk::BufferUsageFlags::INDEX_BUFFER,
            )?);
            buffers.index_capacity = data.indices.len();
            self.rebuilds += 1;
            debug!("GUI index buffer for slot {} grown to {} indices", slot, data.indices.len());
        }

        if let (Some(vertex), Some(index)) = (&buffers.vertex, &buffers.index) {
            vertex.write(0, &data.vertices)?;
            index.write(0, &data.indices)?;
        }
        Ok(())
    }

    /// Record the overlay into an open render pass. Empty data and a display
    /// or framebuffer without area record nothing.
    pub fn record(&self, command_buffer: vk::CommandBuffer, slot: usize, data: &GuiDrawData, extent: vk::Extent2D) {
        if data.is_empty() || extent.width == 0 || extent.height == 0 {
            return;
        }
        let Some(push) = GuiPushConstants::for_display(data) else {
            return;
        };
        let Some(SlotBuffers {
            vertex: Some(vertex),
            index: Some(index),
            ..
        }) = self.slots.get(slot)
        else {
            return;
        };

        let device = &self.device;
        device.cmd_bind_pipeline(command_buffer, self.pipeline.pipeline);
        device.cmd_bind_vertex_buffer(command_buffer, vertex.handle());
        device.cmd_bind_index_buffer(command_buffer, index.handle(), vk::IndexType::UINT16);
        device.cmd_set_viewport(
            command_buffer,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        device.cmd_push_constants(
            command_buffer,
            self.pipeline.layout,
            vk::ShaderStageFlags::VERTEX,
            bytemuck::bytes_of(&push),
        );

        for command in &data.commands {
            let Some(scissor) = clip_to_scissor(command.clip_rect, data.display_pos, extent) else {
                continue;
            };
            device.cmd_set_scissor(command_buffer, scissor);
            device.cmd_draw_indexed(command_buffer, command.index_count, command.first_index, command.vertex_offset);
        }
    }
}

impl Drop for GuiRenderer {
    fn drop(&mut self) {
        self.slots.clear();
        self.device.destroy_pipeline(&self.pipeline);
    }
}

/// Clip rectangle in GUI space to a framebuffer scissor; `None` when nothing
/// remains visible
fn clip_to_scissor(clip: [f32; 4], origin: [f32; 2], extent: vk::Extent2D) -> Option<vk::Rect2D> {
    let min_x = (clip[0] - origin[0]).max(0.0);
    let min_y = (clip[1] - origin[1]).max(0.0);
    let max_x = (clip[2] - origin[0]).min(extent.width as f32);
    let max_y = (clip[3] - origin[1]).min(extent.height as f32);
    if max_x <= min_x || max_y <= min_y {
        return None;
    }
    Some(vk::Rect2D {
        offset: vk::Offset2D {
            x: min_x as i32,
            y: min_y as i32,
        },
        extent: vk::Extent2D {
            width: (max_x - min_x) as u32,
            height: (max_y - min_y) as u32,
        },
    })
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::render::device::{GpuDevice, HeadlessDevice, RecordedCommand};

    fn renderer(headless: &Rc<HeadlessDevice>) -> GuiRenderer {
        let device: DeviceRef = headless.clone();
        GuiRenderer::new(device, 2, "gui.vert.spv".into(), "gui.frag.spv".into()).unwrap()
    }

    #[test]
    fn test_buffers_rebuilt_only_when_geometry_changes() {
        let headless = Rc::new(HeadlessDevice::default());
        let mut gui = renderer(&headless);

        let mut data = GuiDrawData::new(800.0, 600.0);
        data.add_rect([0.0, 0.0], [10.0, 10.0], [255; 4]);
        gui.upload(0, &data).unwrap();
        assert_eq!(gui.rebuild_count(), 2);

        gui.upload(0, &data).unwrap();
        assert_eq!(gui.rebuild_count(), 2);

        // Same vertex count, fewer indices: nothing to rebuild
        let mut shorter = data.clone();
        shorter.indices.truncate(3);
        shorter.commands[0].index_count = 3;
        gui.upload(0, &shorter).unwrap();
        assert_eq!(gui.rebuild_count(), 2);

        // Both grow
        data.add_rect([20.0, 20.0], [30.0, 30.0], [255; 4]);
        gui.upload(0, &data).unwrap();
        assert_eq!(gui.rebuild_count(), 4);

        // Other slots keep their own buffers
        gui.upload(1, &data).unwrap();
        assert_eq!(gui.rebuild_count(), 6);
        assert_eq!(headless.live_buffer_count(), 4);
    }

    #[test]
    fn test_empty_data_records_nothing() {
        let headless = Rc::new(HeadlessDevice::default());
        let mut gui = renderer(&headless);
        let data = GuiDrawData::new(800.0, 600.0);
        gui.upload(0, &data).unwrap();
        assert_eq!(headless.live_buffer_count(), 0);

        let cb = headless.allocate_command_buffers(1).unwrap()[0];
        headless.begin_command_buffer(cb).unwrap();
        gui.record(cb, 0, &data, vk::Extent2D { width: 800, height: 600 });
        headless.end_command_buffer(cb).unwrap();
        let fence = headless.create_fence(false).unwrap();
        let semaphore = headless.create_semaphore().unwrap();
        headless.submit(cb, semaphore, semaphore, fence).unwrap();
        assert!(headless.submissions()[0].commands.is_empty());
    }

    #[test]
    fn test_commands_are_scissored_to_their_clip_rect() {
        let headless = Rc::new(HeadlessDevice::default());
        let mut gui = renderer(&headless);
        let mut data = GuiDrawData::new(800.0, 600.0);
        data.add_rect([10.0, 20.0], [110.0, 70.0], [255; 4]);
        data.add_rect([900.0, 0.0], [950.0, 10.0], [255; 4]);
        gui.upload(1, &data).unwrap();

        let cb = headless.allocate_command_buffers(1).unwrap()[0];
        headless.begin_command_buffer(cb).unwrap();
        gui.record(cb, 1, &data, vk::Extent2D { width: 800, height: 600 });
        headless.end_command_buffer(cb).unwrap();
        let fence = headless.create_fence(false).unwrap();
        let semaphore = headless.create_semaphore().unwrap();
        headless.submit(cb, semaphore, semaphore, fence).unwrap();

        let commands = &headless.submissions()[0].commands;
        let scissors: Vec<_> = commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::SetScissor { .. }))
            .collect();
        assert_eq!(
            scissors,
            vec![&RecordedCommand::SetScissor {
                x: 10,
                y: 20,
                width: 100,
                height: 50
            }]
        );
        let draws = commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::DrawIndexed { .. }))
            .count();
        assert_eq!(draws, 1);
    }

    #[test]
    fn test_push_constants_map_display_to_ndc() {
        let data = GuiDrawData::new(800.0, 600.0);
        let push = GuiPushConstants::for_display(&data).unwrap();
        assert!((push.scale[0] * 800.0 + push.translate[0] - 1.0).abs() < 1e-6);
        assert!((push.translate[1] + 1.0).abs() < 1e-6);
        assert!(push.scale.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_minimized_display_records_nothing() {
        let headless = Rc::new(HeadlessDevice::default());
        let mut gui = renderer(&headless);
        let mut data = GuiDrawData::new(0.0, 0.0);
        data.add_rect([0.0, 0.0], [10.0, 10.0], [255; 4]);
        assert!(GuiPushConstants::for_display(&data).is_none());
        gui.upload(0, &data).unwrap();

        let cb = headless.allocate_command_buffers(1).unwrap()[0];
        headless.begin_command_buffer(cb).unwrap();
        gui.record(cb, 0, &data, vk::Extent2D { width: 0, height: 0 });
        gui.record(cb, 0, &data, vk::Extent2D { width: 800, height: 600 });
        headless.end_command_buffer(cb).unwrap();
        let fence = headless.create_fence(false).unwrap();
        let semaphore = headless.create_semaphore().unwrap();
        headless.submit(cb, semaphore, semaphore, fence).unwrap();
        assert!(headless.submissions()[0].commands.is_empty());
    }

    #[test]
    fn test_indices_without_vertices_are_rejected() {
        let headless = Rc::new(HeadlessDevice::default());
        let mut gui = renderer(&headless);
        let mut data = GuiDrawData::new(800.0, 600.0);
        data.add_rect([0.0, 0.0], [10.0, 10.0], [255; 4]);
        data.vertices.clear();

        assert!(matches!(gui.upload(0, &data), Err(GpuError::InvalidOperation(_))));
        assert_eq!(headless.live_buffer_count(), 0);
        assert_eq!(gui.rebuild_count(), 0);
    }
}
