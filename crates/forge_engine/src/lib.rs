//! # Forge Engine
//!
//! A real-time 3D game engine built from three cooperating layers:
//!
//! - **Scene graph**: an arena of game objects with parent-relative transforms
//!   and attached mesh, rigid-body and trigger components
//! - **Physics integration**: rigid bodies backed by `rapier3d`, stepped at a
//!   fixed rate and interpolated for rendering
//! - **Vulkan rendering**: per-image uniform buffers and descriptor sets,
//!   frames-in-flight synchronization and an optional GUI overlay pass
//!
//! Every frame runs strictly in order on one thread: application logic,
//! per-node behaviours, physics step, rigid-body transform sync, then render
//! submission.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use forge_engine::prelude::*;
//!
//! struct MyGame;
//!
//! impl Application for MyGame {
//!     fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
//!         engine.scene_mut().create_node("player", Transform::identity());
//!         Ok(())
//!     }
//!
//!     fn update(&mut self, engine: &mut Engine, _delta_time: f32) -> Result<(), AppError> {
//!         if engine.frame_count() > 100 {
//!             engine.quit();
//!         }
//!         Ok(())
//!     }
//!
//!     fn cleanup(&mut self, _engine: &mut Engine) {}
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let device: DeviceRef = Rc::new(HeadlessDevice::new(3, (800, 600)));
//!     Engine::run(config, device, &mut MyGame)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod core;
pub mod config;
pub mod foundation;
pub mod input;
pub mod physics;
pub mod render;
pub mod scene;

mod application;
mod engine;

pub use application::{AppError, AppEvent, Application};
pub use engine::{Engine, EngineError};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        Application, AppError, AppEvent,
        Engine, EngineError,
        core::config::{EngineConfig, PhysicsConfig, RendererConfig, WindowConfig},
        config::Config,
        foundation::{
            math::{Vec3, Mat4, Quat, Transform},
            time::Timer,
        },
        input::{InputManager, KeyCode, MouseButton, CursorMode},
        physics::{BodyId, CollisionShape, RigidBodyType},
        render::{
            Camera, DeviceRef, GpuDevice, GpuError, GpuResult, HeadlessDevice,
            MeshData, RenderObjectId, Vertex,
            gui::{GuiDrawData, GuiLayer},
        },
        scene::{Behaviour, BehaviourContext, Component, ComponentId, NodeId, SceneGraph},
    };
}
