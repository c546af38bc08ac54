//! Rolling ball demo
//!
//! A ball rolls down a tilted ramp toward a goal volume. Runs on the
//! headless device so it works without a window or GPU; pass a `.toml` or
//! `.ron` engine configuration path to override the defaults.

use std::rc::Rc;
use std::thread;
use std::time::Duration;

use forge_engine::config::ConfigError;
use forge_engine::foundation::logging;
use forge_engine::physics::TriggerId;
use forge_engine::prelude::*;
use forge_engine::scene::ComponentKind;
use log::{error, info, warn};

const FRAME_PACING: Duration = Duration::from_millis(16);
const PUSH_FORCE: f32 = 4.0;

/// Dark backing panel for the speed readout
struct HudPanel;

impl GuiLayer for HudPanel {
    fn build_frame(&mut self, _input: &InputManager, _delta_time: f32, draw_data: &mut GuiDrawData) {
        let right = (draw_data.display_size[0] - 10.0).max(10.0);
        draw_data.add_rect([5.0, 5.0], [right, 29.0], [20, 20, 20, 160]);
    }
}

/// Pushes its node's rigid body along +X every frame
struct Pusher {
    body: BodyId,
    force: f32,
}

impl Behaviour for Pusher {
    fn start(&mut self, ctx: &mut BehaviourContext<'_>) {
        let name = ctx.scene.node(ctx.node).map_or("?", |node| node.name());
        info!("Pushing '{}' with {} N", name, self.force);
    }

    fn update(&mut self, ctx: &mut BehaviourContext<'_>) {
        if let Some((body, world)) = ctx.physics.body_mut(self.body) {
            body.apply_force_to_center(world, Vec3::new(self.force, 0.0, 0.0));
        }
    }
}

#[derive(Default)]
struct RollingBall {
    ball: Option<BodyId>,
    goal: Option<TriggerId>,
    reached_goal: bool,
}

impl RollingBall {
    fn build_ramp(engine: &mut Engine) -> Result<(), AppError> {
        let ramp = Transform::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -0.15), Vec3::new(1.0, 1.0, 1.0));
        let node = engine.scene_mut().create_static_node("ramp", ramp);
        let half_extents = Vec3::new(8.0, 0.25, 2.0);
        let mesh = engine.spawn_mesh(node, &cuboid_mesh(half_extents))?;
        engine.spawn_rigid_body(node, CollisionShape::cuboid(half_extents), RigidBodyType::Static, Some(mesh))?;
        Ok(())
    }
}

fn cuboid_mesh(half_extents: Vec3) -> MeshData {
    let mut mesh = MeshData::cube(1.0);
    for vertex in &mut mesh.vertices {
        vertex.position[0] *= half_extents.x;
        vertex.position[1] *= half_extents.y;
        vertex.position[2] *= half_extents.z;
    }
    mesh
}

impl Application for RollingBall {
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
        Self::build_ramp(engine)?;

        let start = Transform::from_location(Vec3::new(-6.0, 2.0, 0.0));
        let ball = engine.scene_mut().create_node("ball", start);
        let mesh = engine.spawn_mesh(ball, &MeshData::uv_sphere(0.5, 24, 16))?;
        let (_, body) = engine.spawn_rigid_body(ball, CollisionShape::sphere(0.5), RigidBodyType::Dynamic, Some(mesh))?;
        self.ball = Some(body);
        engine.attach_behaviour(ball, Box::new(Pusher { body, force: PUSH_FORCE }))?;

        let goal = engine
            .scene_mut()
            .create_static_node("goal", Transform::from_location(Vec3::new(6.0, -0.5, 0.0)));
        let trigger = engine.spawn_trigger(goal, CollisionShape::cuboid(Vec3::new(1.0, 2.0, 2.0)))?;
        self.goal = engine
            .scene()
            .component(trigger)
            .and_then(|component| match *component.kind() {
                ComponentKind::Trigger { trigger } => Some(trigger),
                _ => None,
            });

        let camera = engine.renderer_mut().camera_mut();
        camera.set_position(Vec3::new(0.0, 6.0, 14.0));
        camera.look_at(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0));

        engine.set_gui_layer(Box::new(HudPanel));
        info!("Scene ready: {} nodes", engine.scene().node_count());
        Ok(())
    }

    fn update(&mut self, engine: &mut Engine, _delta_time: f32) -> Result<(), AppError> {
        thread::sleep(FRAME_PACING);

        let (Some(ball), Some(goal)) = (self.ball, self.goal) else {
            return Err(AppError::GameLogic("scene was not initialized".to_string()));
        };

        let overlapping = engine
            .physics()
            .trigger_overlaps(goal, ball)
            .map_err(|err| AppError::GameLogic(err.to_string()))?;
        if overlapping && !self.reached_goal {
            self.reached_goal = true;
            info!("Ball reached the goal after {} frames", engine.frame_count());
            engine.quit();
        }
        Ok(())
    }

    fn on_gui(&mut self, engine: &Engine, draw_data: &mut GuiDrawData) {
        let physics = engine.physics();
        let speed = self
            .ball
            .and_then(|ball| physics.body(ball))
            .and_then(|body| body.linear_velocity(physics.world()))
            .map_or(0.0, |velocity| velocity.norm());
        let width = (speed * 40.0).clamp(2.0, (draw_data.display_size[0] - 20.0).max(2.0));
        draw_data.add_rect([10.0, 10.0], [10.0 + width, 24.0], [80, 200, 120, 220]);
    }

    fn cleanup(&mut self, engine: &mut Engine) {
        if !self.reached_goal {
            warn!("Stopped before the ball reached the goal");
        }
        info!(
            "Presented {} frames, {} swapchain rebuilds",
            engine.renderer().frames_presented(),
            engine.renderer().swapchain_recreations()
        );
    }
}

fn load_config() -> Result<EngineConfig, ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from_file(&path),
        None => Ok(EngineConfig {
            frame_limit: Some(900),
            ..EngineConfig::new("Rolling Ball")
        }),
    }
}

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            logging::init("info");
            error!("Failed to load configuration: {}", err);
            std::process::exit(1);
        }
    };
    logging::init(&config.log_level);

    let extent = (config.window.width, config.window.height);
    let device: DeviceRef = Rc::new(HeadlessDevice::new(3, extent));
    let mut app = RollingBall::default();

    if let Err(err) = Engine::run(config, device, &mut app) {
        error!("Engine error: {}", err);
        std::process::exit(1);
    }
}
