//! # Render Manager
//!
//! Owns every GPU-side object of the running game and turns the scene's
//! mesh instances into one submitted frame per call to
//! [`RenderManager::draw_frame`]:
//!
//! 1. wait on the current slot's fence
//! 2. acquire a swapchain image (out of date: rebuild and skip the frame)
//! 3. write each object's uniform buffer for that image
//! 4. record the scene pass, then the GUI overlay
//! 5. submit with the slot's semaphores and fence, then present
//! 6. advance to the next slot

use std::collections::HashSet;

use ash::vk;
use log::{debug, info, warn};
use slotmap::SlotMap;

use crate::core::config::RendererConfig;
use crate::foundation::math::Transform;
use crate::render::camera::Camera;
use crate::render::descriptor::DescriptorSetLayout;
use crate::render::device::{
    AcquiredImage, DeviceRef, GpuError, GpuResult, PipelineDesc, PipelineHandles, PresentOutcome, VertexLayout,
};
use crate::render::gui::{GuiDrawData, GuiRenderer};
use crate::render::mesh::{MeshData, RenderObject, RenderObjectId};
use crate::render::sync::FrameSyncSet;
use crate::render::uniform::UniformBufferObject;

/// What happened to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented on `image_index`
    Presented {
        /// Swapchain image used
        image_index: u32,
    },
    /// The swapchain was out of date and has been rebuilt. If it happened on
    /// acquire, nothing was drawn.
    SwapchainRecreated,
}

/// Frame orchestration over a [`GpuDevice`](crate::render::GpuDevice)
pub struct RenderManager {
    objects: SlotMap<RenderObjectId, RenderObject>,
    gui: GuiRenderer,
    descriptor_layout: DescriptorSetLayout,
    frame_sync: FrameSyncSet,
    command_buffers: Vec<vk::CommandBuffer>,
    mesh_pipeline: PipelineHandles,
    camera: Camera,
    image_count: u32,
    clear_color: [f32; 4],
    timeout_ns: u64,
    frames_presented: u64,
    swapchain_recreations: u32,
    device: DeviceRef,
}

impl RenderManager {
    /// Build pipelines, frame slots and command buffers for `device`
    pub fn new(device: DeviceRef, config: &RendererConfig) -> GpuResult<Self> {
        let frames_in_flight = u32::try_from(config.max_frames_in_flight)
            .map_err(|_| GpuError::InvalidOperation("frames in flight out of range".to_string()))?;
        let image_count = device.swapchain_image_count();

        let descriptor_layout = DescriptorSetLayout::uniform_buffer(device.clone())?;
        let mesh_pipeline = device.create_graphics_pipeline(&PipelineDesc {
            vertex_shader: config.shader_path("mesh.vert.spv"),
            fragment_shader: config.shader_path("mesh.frag.spv"),
            descriptor_layouts: vec![descriptor_layout.handle()],
            push_constant_size: 0,
            push_constant_stages: vk::ShaderStageFlags::empty(),
            vertex_layout: VertexLayout::Mesh,
            depth_test: true,
            alpha_blend: false,
            cull_mode: vk::CullModeFlags::BACK,
        })?;
        let gui = GuiRenderer::new(
            device.clone(),
            config.max_frames_in_flight,
            config.shader_path("gui.vert.spv"),
            config.shader_path("gui.frag.spv"),
        )?;
        let frame_sync = FrameSyncSet::new(&device, frames_in_flight, image_count, config.fence_timeout_ns)?;
        let command_buffers = device.allocate_command_buffers(frames_in_flight)?;

        let mut camera = Camera::default();
        let extent = device.swapchain_extent();
        if extent.height > 0 {
            camera.set_aspect_ratio(extent.width as f32 / extent.height as f32);
        }

        info!(
            "Render manager ready: {} frames in flight, {} swapchain images",
            frames_in_flight, image_count
        );
        Ok(Self {
            objects: SlotMap::with_key(),
            gui,
            descriptor_layout,
            frame_sync,
            command_buffers,
            mesh_pipeline,
            camera,
            image_count,
            clear_color: config.clear_color,
            timeout_ns: config.fence_timeout_ns,
            frames_presented: 0,
            swapchain_recreations: 0,
            device,
        })
    }

    /// Upload a mesh and create its per-image uniforms and descriptor sets
    pub fn create_render_object(&mut self, mesh: &MeshData) -> GpuResult<RenderObjectId> {
        let object = RenderObject::new(&self.device, mesh, &self.descriptor_layout, self.image_count)?;
        let id = self.objects.insert(object);
        debug!("Created render object {:?} ({} indices)", id, mesh.indices.len());
        Ok(id)
    }

    /// Destroy a render object. The device is drained first since frames in
    /// flight may still read its buffers.
    pub fn remove_render_object(&mut self, id: RenderObjectId) -> GpuResult<bool> {
        if !self.objects.contains_key(id) {
            return Ok(false);
        }
        self.device.wait_idle()?;
        Ok(self.objects.remove(id).is_some())
    }

    /// Render object by id
    pub fn render_object(&self, id: RenderObjectId) -> Option<&RenderObject> {
        self.objects.get(id)
    }

    /// Number of live render objects
    pub fn render_object_count(&self) -> usize {
        self.objects.len()
    }

    /// Active camera
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Active camera, mutable
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Frames presented so far
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Times the swapchain was rebuilt
    pub fn swapchain_recreations(&self) -> u32 {
        self.swapchain_recreations
    }

    /// Index of the frame slot the next frame will use
    pub fn current_frame_slot(&self) -> usize {
        self.frame_sync.current_index()
    }

    /// Draw one frame of `instances` with the optional GUI overlay
    pub fn draw_frame<'a, I>(&mut self, instances: I, gui: &GuiDrawData) -> GpuResult<FrameOutcome>
    where
        I: IntoIterator<Item = (RenderObjectId, &'a Transform)>,
    {
        self.frame_sync.wait_current()?;

        let image_available = self.frame_sync.current().image_available.handle();
        let image_index = match self.device.acquire_next_image(image_available, self.timeout_ns)? {
            AcquiredImage::Ready(index) => index,
            AcquiredImage::OutOfDate => {
                warn!("Swapchain out of date on acquire");
                self.recreate_swapchain()?;
                return Ok(FrameOutcome::SwapchainRecreated);
            }
        };
        self.frame_sync.claim_image(image_index)?;

        let draws = self.update_uniforms(instances, image_index)?;

        let slot = self.frame_sync.current_index();
        self.gui.upload(slot, gui)?;
        let command_buffer = self.command_buffers[slot];
        self.record(command_buffer, image_index, &draws, gui)?;

        let frame = self.frame_sync.current();
        let render_finished = frame.render_finished.handle();
        let fence = frame.in_flight.handle();
        self.frame_sync.reset_current()?;
        self.device.submit(command_buffer, image_available, render_finished, fence)?;
        self.frame_sync.mark_rendering();

        let presented = self.device.present(image_index, render_finished)?;
        self.frame_sync.mark_presented();
        self.frame_sync.advance();

        match presented {
            PresentOutcome::Presented => {
                self.frames_presented += 1;
                Ok(FrameOutcome::Presented { image_index })
            }
            PresentOutcome::OutOfDate => {
                warn!("Swapchain out of date on present");
                self.recreate_swapchain()?;
                Ok(FrameOutcome::SwapchainRecreated)
            }
        }
    }

    /// Write uniforms for every instance and return the objects to draw.
    /// An object referenced by more than one instance is drawn once, with the
    /// first instance's transform. The scene graph refuses such sharing, so
    /// only callers building their own instance lists reach that case.
    fn update_uniforms<'a, I>(&self, instances: I, image_index: u32) -> GpuResult<Vec<RenderObjectId>>
    where
        I: IntoIterator<Item = (RenderObjectId, &'a Transform)>,
    {
        let view = self.camera.view_matrix();
        let proj = self.camera.projection_matrix();
        let mut seen = HashSet::new();
        let mut draws = Vec::new();

        for (id, transform) in instances {
            let Some(object) = self.objects.get(id) else {
                debug!("Mesh instance references missing render object {:?}", id);
                continue;
            };
            if !seen.insert(id) {
                warn!("Render object {:?} appears in more than one instance; drawing the first", id);
                continue;
            }
            let ubo = UniformBufferObject::new(&transform.to_matrix(), &view, &proj);
            object.update_uniform(image_index, &ubo)?;
            draws.push(id);
        }
        Ok(draws)
    }

    fn record(
        &self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        draws: &[RenderObjectId],
        gui: &GuiDrawData,
    ) -> GpuResult<()> {
        let device = &self.device;
        let extent = device.swapchain_extent();

        device.begin_command_buffer(command_buffer)?;
        device.cmd_begin_render_pass(command_buffer, image_index, self.clear_color);
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
        device.cmd_set_scissor(
            command_buffer,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        );

        if !draws.is_empty() {
            device.cmd_bind_pipeline(command_buffer, self.mesh_pipeline.pipeline);
        }
        for &id in draws {
            let Some(object) = self.objects.get(id) else { continue };
            device.cmd_bind_descriptor_set(command_buffer, self.mesh_pipeline.layout, object.descriptor_set(image_index)?);
            device.cmd_bind_vertex_buffer(command_buffer, object.vertex_buffer().handle());
            device.cmd_bind_index_buffer(command_buffer, object.index_buffer().handle(), vk::IndexType::UINT32);
            device.cmd_draw_indexed(command_buffer, object.index_buffer().index_count(), 0, 0);
        }

        let slot = self.frame_sync.current_index();
        self.gui.record(command_buffer, slot, gui, extent);

        device.cmd_end_render_pass(command_buffer);
        device.end_command_buffer(command_buffer)
    }

    /// Drain the GPU, rebuild the swapchain, then rebuild every per-image
    /// resource against the new image count. Frame slots are kept.
    pub fn recreate_swapchain(&mut self) -> GpuResult<()> {
        self.device.wait_idle()?;
        self.device.recreate_swapchain()?;

        self.image_count = self.device.swapchain_image_count();
        for object in self.objects.values_mut() {
            object.rebuild_per_image(&self.device, &self.descriptor_layout, self.image_count)?;
        }
        self.frame_sync.reset_images(self.image_count);

        let extent = self.device.swapchain_extent();
        if extent.height > 0 {
            self.camera.set_aspect_ratio(extent.width as f32 / extent.height as f32);
        }
        self.swapchain_recreations += 1;
        info!(
            "Swapchain rebuilt: {}x{}, {} images",
            extent.width, extent.height, self.image_count
        );
        Ok(())
    }
}

impl Drop for RenderManager {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            warn!("Device did not go idle before renderer teardown: {}", err);
        }
        self.objects.clear();
        self.device.free_command_buffers(&self.command_buffers);
        self.device.destroy_pipeline(&self.mesh_pipeline);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::render::device::{HeadlessDevice, RecordedCommand};

    fn setup(image_count: u32) -> (Rc<HeadlessDevice>, RenderManager) {
        let headless = Rc::new(HeadlessDevice::new(image_count, (800, 600)));
        let device: DeviceRef = headless.clone();
        let renderer = RenderManager::new(device, &RendererConfig::default()).unwrap();
        (headless, renderer)
    }

    #[test]
    fn test_frame_records_scene_in_order() {
        let (headless, mut renderer) = setup(3);
        let id = renderer.create_render_object(&MeshData::cube(1.0)).unwrap();
        let transform = Transform::identity();

        let outcome = renderer
            .draw_frame([(id, &transform)], &GuiDrawData::new(800.0, 600.0))
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0 });

        let object = renderer.render_object(id).unwrap();
        let submissions = headless.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(
            submissions[0].commands,
            vec![
                RecordedCommand::BeginRenderPass { image_index: 0 },
                RecordedCommand::SetViewport { width: 800, height: 600 },
                RecordedCommand::SetScissor {
                    x: 0,
                    y: 0,
                    width: 800,
                    height: 600
                },
                RecordedCommand::BindPipeline(renderer.mesh_pipeline.pipeline),
                RecordedCommand::BindDescriptorSet(object.descriptor_set(0).unwrap()),
                RecordedCommand::BindVertexBuffer(object.vertex_buffer().handle()),
                RecordedCommand::BindIndexBuffer(object.index_buffer().handle()),
                RecordedCommand::DrawIndexed {
                    index_count: 36,
                    first_index: 0,
                    vertex_offset: 0
                },
                RecordedCommand::EndRenderPass,
            ]
        );
        assert_eq!(headless.present_count(), 1);
    }

    #[test]
    fn test_uniform_written_for_acquired_image_only() {
        let (headless, mut renderer) = setup(3);
        let id = renderer.create_render_object(&MeshData::cube(1.0)).unwrap();
        let transform = Transform::from_location(crate::foundation::math::Vec3::new(3.0, 0.0, 0.0));
        let gui = GuiDrawData::new(800.0, 600.0);

        renderer.draw_frame([(id, &transform)], &gui).unwrap();

        let object = renderer.render_object(id).unwrap();
        let writes = headless.descriptor_writes(object.descriptor_set(0).unwrap());
        let crate::render::device::DescriptorWrite::UniformBuffer { buffer, .. } = writes[0];
        let bytes = headless.buffer_contents(buffer).unwrap();
        let ubo: UniformBufferObject = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(ubo.model[3][0], 3.0);

        let other = headless.descriptor_writes(object.descriptor_set(1).unwrap());
        let crate::render::device::DescriptorWrite::UniformBuffer { buffer, .. } = other[0];
        assert!(headless.buffer_contents(buffer).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_slots_wait_and_signal_round_robin() {
        let (headless, mut renderer) = setup(2);
        let slot0 = renderer.frame_sync.current().in_flight.handle();
        let gui = GuiDrawData::new(800.0, 600.0);
        let no_instances: [(RenderObjectId, &Transform); 0] = [];

        for _ in 0..4 {
            renderer.draw_frame(no_instances, &gui).unwrap();
        }
        assert_eq!(headless.fence_wait_count(slot0), 2);
        assert_eq!(headless.fence_signal_count(slot0), 2);
        assert_eq!(renderer.current_frame_slot(), 0);
        assert_eq!(renderer.frames_presented(), 4);
    }

    #[test]
    fn test_out_of_date_acquire_rebuilds_and_skips_frame() {
        let (headless, mut renderer) = setup(3);
        let id = renderer.create_render_object(&MeshData::cube(1.0)).unwrap();
        let old_set = renderer.render_object(id).unwrap().descriptor_set(0).unwrap();
        let transform = Transform::identity();
        let gui = GuiDrawData::new(1024.0, 512.0);

        headless.resize(1024, 512);
        let outcome = renderer.draw_frame([(id, &transform)], &gui).unwrap();
        assert_eq!(outcome, FrameOutcome::SwapchainRecreated);
        assert_eq!(headless.swapchain_recreations(), 1);
        assert!(headless.submissions().is_empty());
        assert!(headless.wait_idle_calls() >= 1);

        let new_set = renderer.render_object(id).unwrap().descriptor_set(0).unwrap();
        assert_ne!(old_set, new_set);
        assert_eq!(headless.live_pool_count(), 1);
        assert!((renderer.camera().aspect - 2.0).abs() < 1e-6);

        let outcome = renderer.draw_frame([(id, &transform)], &gui).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0 });
    }

    #[test]
    fn test_invalidated_swapchain_rebuilt_on_next_frame() {
        let (headless, mut renderer) = setup(2);
        let gui = GuiDrawData::new(800.0, 600.0);
        let no_instances: [(RenderObjectId, &Transform); 0] = [];

        renderer.draw_frame(no_instances, &gui).unwrap();
        headless.invalidate_swapchain();
        assert_eq!(
            renderer.draw_frame(no_instances, &gui).unwrap(),
            FrameOutcome::SwapchainRecreated
        );
        assert_eq!(renderer.swapchain_recreations(), 1);
        assert_eq!(headless.submissions().len(), 1);
    }

    #[test]
    fn test_duplicate_instance_drawn_once() {
        let (headless, mut renderer) = setup(2);
        let id = renderer.create_render_object(&MeshData::cube(1.0)).unwrap();
        let first = Transform::identity();
        let second = Transform::from_location(crate::foundation::math::Vec3::new(5.0, 0.0, 0.0));

        renderer
            .draw_frame([(id, &first), (id, &second)], &GuiDrawData::new(800.0, 600.0))
            .unwrap();

        let draws = headless.submissions()[0]
            .commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::DrawIndexed { .. }))
            .count();
        assert_eq!(draws, 1);
    }

    #[test]
    fn test_long_headless_run_keeps_bounded_submission_log() {
        let (headless, mut renderer) = setup(3);
        let id = renderer.create_render_object(&MeshData::cube(1.0)).unwrap();
        let transform = Transform::identity();
        let gui = GuiDrawData::new(800.0, 600.0);

        for _ in 0..2_000 {
            renderer.draw_frame([(id, &transform)], &gui).unwrap();
        }

        assert_eq!(headless.submit_count(), 2_000);
        assert!(headless.submissions().len() <= 3);
        let latest = headless.take_submissions().pop().unwrap();
        assert!(matches!(
            latest.commands.first(),
            Some(RecordedCommand::BeginRenderPass { .. })
        ));
    }

    #[test]
    fn test_gui_overlay_drawn_after_scene() {
        let (headless, mut renderer) = setup(2);
        let mut gui = GuiDrawData::new(800.0, 600.0);
        gui.add_rect([0.0, 0.0], [100.0, 40.0], [20, 20, 20, 200]);
        let no_instances: [(RenderObjectId, &Transform); 0] = [];

        renderer.draw_frame(no_instances, &gui).unwrap();
        let commands = &headless.submissions()[0].commands;
        assert!(matches!(commands.last(), Some(RecordedCommand::EndRenderPass)));
        assert!(commands
            .iter()
            .any(|c| matches!(c, RecordedCommand::PushConstants(bytes) if bytes.len() == 16)));
        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, RecordedCommand::DrawIndexed { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn test_drop_drains_device_and_releases_objects() {
        let (headless, mut renderer) = setup(3);
        renderer.create_render_object(&MeshData::cube(1.0)).unwrap();
        assert!(headless.live_buffer_count() > 0);
        drop(renderer);
        assert_eq!(headless.live_buffer_count(), 0);
        assert_eq!(headless.live_pool_count(), 0);
        assert_eq!(headless.live_object_count(), 0);
        assert!(headless.wait_idle_calls() >= 1);
    }
}
