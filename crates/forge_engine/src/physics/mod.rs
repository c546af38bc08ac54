//! # Physics Integration
//!
//! Rigid bodies and sensor triggers backed by `rapier3d`. The solver itself is
//! external; this layer owns body lifetimes, converts between scene transforms
//! and physics isometries, and interpolates simulation results for rendering.

pub mod manager;
pub mod rigid_body;
pub mod shape;
pub mod trigger;
pub mod world;

pub use manager::PhysicsManager;
pub use rigid_body::{RigidBody, RigidBodyType};
pub use shape::CollisionShape;
pub use trigger::Trigger;
pub use world::PhysicsWorld;

slotmap::new_key_type! {
    /// Stable handle to a rigid body owned by the [`PhysicsManager`]
    pub struct BodyId;

    /// Stable handle to a trigger volume owned by the [`PhysicsManager`]
    pub struct TriggerId;
}

/// Physics layer errors
#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    /// Shape dimensions are zero, negative or not finite
    #[error("Invalid collision shape: {0}")]
    InvalidShape(String),

    /// Handle does not refer to a live body or trigger
    #[error("Unknown physics handle: {0}")]
    UnknownHandle(String),
}
