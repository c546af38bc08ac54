//! Core engine implementation

use std::mem;

use log::{debug, info};
use thiserror::Error;

use crate::{
    application::{AppError, AppEvent, Application},
    config::ConfigError,
    core::config::EngineConfig,
    foundation::{math::Transform, time::Timer},
    input::InputManager,
    physics::{BodyId, CollisionShape, PhysicsError, PhysicsManager, RigidBodyType},
    render::{
        gui::{GuiDrawData, GuiLayer},
        DeviceRef, GpuError, MeshData, RenderManager,
    },
    scene::{self, Behaviour, ComponentId, ComponentKind, LogicManager, NodeId, SceneGraph},
};

/// Main engine struct
///
/// Owns the scene, the physics world and the renderer, and runs them in a
/// fixed order every frame: application update, node behaviours, physics
/// step, rigid-body sync, render.
pub struct Engine {
    scene: SceneGraph,
    logic: LogicManager,
    physics: PhysicsManager,
    renderer: RenderManager,
    input: InputManager,
    gui_layer: Option<Box<dyn GuiLayer>>,
    gui_data: GuiDrawData,
    timer: Timer,
    config: EngineConfig,
    frame_count: u64,
    resize_pending: bool,
    running: bool,
    device: DeviceRef,
}

impl Engine {
    /// Create a new engine instance on `device`
    pub fn new(config: EngineConfig, device: DeviceRef) -> Result<Self, EngineError> {
        info!("Initializing engine for '{}'...", config.app_name);
        config.validate()?;

        let renderer = RenderManager::new(device.clone(), &config.renderer)?;
        let physics = PhysicsManager::new(&config.physics);
        let extent = device.swapchain_extent();

        Ok(Self {
            scene: SceneGraph::new(),
            logic: LogicManager::new(),
            physics,
            renderer,
            input: InputManager::new(),
            gui_layer: None,
            gui_data: GuiDrawData::new(extent.width as f32, extent.height as f32),
            timer: Timer::new(),
            config,
            frame_count: 0,
            resize_pending: false,
            running: true,
            device,
        })
    }

    /// Run the engine main loop with the given application
    ///
    /// Returns once the application quits, the configured frame limit is
    /// reached or an error occurs. The application's `cleanup` runs and the
    /// device is drained in every case.
    pub fn run<T: Application>(config: EngineConfig, device: DeviceRef, app: &mut T) -> Result<(), EngineError> {
        let mut engine = Self::new(config, device)?;

        app.initialize(&mut engine).map_err(EngineError::Application)?;

        info!("Starting main loop...");
        let result = engine.main_loop(app);

        app.cleanup(&mut engine);
        engine.device.wait_idle()?;
        info!("Engine shutdown complete after {} frames", engine.frame_count);
        result
    }

    fn main_loop<T: Application>(&mut self, app: &mut T) -> Result<(), EngineError> {
        while self.running {
            for event in app.poll_events() {
                self.handle_event(event);
            }

            let delta_time = self.timer.tick();
            app.update(self, delta_time).map_err(EngineError::Application)?;
            if !self.running {
                break;
            }

            self.logic
                .run(&mut self.scene, &mut self.physics, &self.input, delta_time);
            self.physics.step(delta_time);
            scene::sync_rigid_bodies(&mut self.scene, &mut self.physics);

            self.build_gui(app, delta_time);
            self.render()?;

            self.input.update();
            self.frame_count += 1;
            if self.config.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
                debug!("Frame limit {} reached", self.frame_count);
                self.running = false;
            }
        }
        Ok(())
    }

    fn build_gui<T: Application>(&mut self, app: &mut T, delta_time: f32) {
        let mut draw_data = mem::take(&mut self.gui_data);
        draw_data.clear();
        let extent = self.device.swapchain_extent();
        draw_data.display_size = [extent.width as f32, extent.height as f32];

        if let Some(layer) = self.gui_layer.as_mut() {
            layer.build_frame(&self.input, delta_time, &mut draw_data);
        }
        app.on_gui(self, &mut draw_data);
        self.gui_data = draw_data;
    }

    fn render(&mut self) -> Result<(), EngineError> {
        if mem::take(&mut self.resize_pending) {
            self.renderer.recreate_swapchain()?;
        }
        self.renderer.draw_frame(self.scene.mesh_instances(), &self.gui_data)?;
        Ok(())
    }

    /// Feed one windowing event into the engine
    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::WindowCloseRequested => self.quit(),
            AppEvent::WindowResized { width, height } => {
                if width == 0 || height == 0 {
                    debug!("Ignoring resize to an empty surface");
                    return;
                }
                self.device.surface_resized(width, height);
                self.resize_pending = true;
            }
            AppEvent::KeyInput { key, pressed } => self.input.handle_key_input(key, pressed),
            AppEvent::MouseButton { button, pressed } => self.input.handle_mouse_button(button, pressed),
            AppEvent::MouseMoved { x, y } => self.input.handle_mouse_move(x, y),
        }
    }

    /// Upload `mesh` and attach it to `node` as a mesh component
    pub fn spawn_mesh(&mut self, node: NodeId, mesh: &MeshData) -> Result<ComponentId, EngineError> {
        self.require_node(node)?;
        let object = self.renderer.create_render_object(mesh)?;
        match self.scene.create_component(ComponentKind::Mesh { object }) {
            Some(component) => {
                self.scene.add_component(node, component);
                Ok(component)
            }
            None => {
                self.renderer.remove_render_object(object)?;
                Err(EngineError::SharedRenderObject(format!("{:?}", object)))
            }
        }
    }

    /// Create a rigid body at `node`'s transform and attach it. When
    /// `attached_mesh` is given, that mesh follows the body every frame.
    pub fn spawn_rigid_body(
        &mut self,
        node: NodeId,
        shape: CollisionShape,
        body_type: RigidBodyType,
        attached_mesh: Option<ComponentId>,
    ) -> Result<(ComponentId, BodyId), EngineError> {
        let transform = self.require_node(node)?;
        let body = self.physics.create_rigid_body(shape, &transform, body_type)?;
        let component = self.attach_component(node, ComponentKind::RigidBody { body, attached_mesh })?;
        Ok((component, body))
    }

    /// Create a trigger volume at `node`'s transform and attach it
    pub fn spawn_trigger(&mut self, node: NodeId, shape: CollisionShape) -> Result<ComponentId, EngineError> {
        let transform = self.require_node(node)?;
        let trigger = self.physics.create_trigger(shape, &transform)?;
        self.attach_component(node, ComponentKind::Trigger { trigger })
    }

    fn attach_component(&mut self, node: NodeId, kind: ComponentKind) -> Result<ComponentId, EngineError> {
        let component = self
            .scene
            .create_component(kind)
            .ok_or_else(|| EngineError::SharedRenderObject(format!("{:?}", kind)))?;
        self.scene.add_component(node, component);
        Ok(component)
    }

    /// Attach game logic to `node`, replacing any behaviour it had. `start`
    /// runs on the next frame, before its first `update`.
    pub fn attach_behaviour(&mut self, node: NodeId, behaviour: Box<dyn Behaviour>) -> Result<(), EngineError> {
        if self.logic.attach(&self.scene, node, behaviour) {
            Ok(())
        } else {
            Err(EngineError::UnknownNode(format!("{:?}", node)))
        }
    }

    /// Detach and return the behaviour of `node`
    pub fn detach_behaviour(&mut self, node: NodeId) -> Option<Box<dyn Behaviour>> {
        self.logic.detach(node)
    }

    /// Destroy a node with its children and components, releasing the render
    /// objects, bodies and triggers they referenced and the behaviours of
    /// every destroyed node
    pub fn destroy_node(&mut self, node: NodeId) -> Result<(), EngineError> {
        let removed = self.scene.destroy_node(node);
        self.logic.prune(&self.scene);
        for component in removed {
            match *component.kind() {
                ComponentKind::Mesh { object } => {
                    self.renderer.remove_render_object(object)?;
                }
                ComponentKind::RigidBody { body, .. } => {
                    self.physics.remove_rigid_body(body);
                }
                ComponentKind::Trigger { trigger } => {
                    self.physics.remove_trigger(trigger);
                }
            }
        }
        Ok(())
    }

    fn require_node(&self, node: NodeId) -> Result<Transform, EngineError> {
        self.scene
            .node(node)
            .map(|n| *n.transform())
            .ok_or_else(|| EngineError::UnknownNode(format!("{:?}", node)))
    }

    /// Install the immediate-mode GUI layer that feeds the overlay
    pub fn set_gui_layer(&mut self, layer: Box<dyn GuiLayer>) {
        self.gui_layer = Some(layer);
    }

    /// Request engine shutdown at the end of the current frame
    pub fn quit(&mut self) {
        if self.running {
            info!("Engine shutdown requested");
        }
        self.running = false;
    }

    /// Whether the main loop keeps going
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Frames completed so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Seconds the last frame took
    pub fn delta_time(&self) -> f32 {
        self.timer.delta_time()
    }

    /// Get the scene graph
    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    /// Get mutable access to the scene graph
    pub fn scene_mut(&mut self) -> &mut SceneGraph {
        &mut self.scene
    }

    /// Get the physics manager
    pub fn physics(&self) -> &PhysicsManager {
        &self.physics
    }

    /// Get mutable access to the physics manager
    pub fn physics_mut(&mut self) -> &mut PhysicsManager {
        &mut self.physics
    }

    /// Get the renderer
    pub fn renderer(&self) -> &RenderManager {
        &self.renderer
    }

    /// Get mutable access to the renderer
    pub fn renderer_mut(&mut self) -> &mut RenderManager {
        &mut self.renderer
    }

    /// Get the input manager
    pub fn input(&self) -> &InputManager {
        &self.input
    }

    /// Get mutable access to the input manager
    pub fn input_mut(&mut self) -> &mut InputManager {
        &mut self.input
    }

    /// Configuration the engine was started with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// GPU failure; fatal for the running frame loop
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    /// Configuration rejected before start-up
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Physics body or trigger could not be created
    #[error("Physics error: {0}")]
    Physics(#[from] PhysicsError),

    /// Application callback failed
    #[error("Application error: {0}")]
    Application(AppError),

    /// Node handle does not refer to a live node
    #[error("Unknown scene node: {0}")]
    UnknownNode(String),

    /// Render object already backs another mesh component
    #[error("Render object already in use: {0}")]
    SharedRenderObject(String),
}
