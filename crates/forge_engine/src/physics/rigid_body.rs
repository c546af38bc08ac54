//! # Rigid Body
//!
//! Wrapper around one rapier body and its single collider. The wrapper keeps
//! the last transform handed to the renderer so frames can be interpolated
//! between fixed simulation steps.

use log::debug;
use nalgebra::Isometry3;
use rapier3d::prelude as rapier;
use rapier3d::prelude::{ColliderHandle, RigidBodyHandle};
use serde::{Deserialize, Serialize};

use super::{CollisionShape, PhysicsError, PhysicsWorld};
use crate::foundation::math::{Transform, Vec3};

const DEFAULT_MASS: f32 = 1.0;
const DEFAULT_FRICTION: f32 = 0.3;
const DEFAULT_BOUNCINESS: f32 = 0.5;

/// Simulation behaviour of a body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RigidBodyType {
    /// Never moves; infinite mass
    Static,
    /// Moved by the game, pushes dynamic bodies
    Kinematic,
    /// Fully simulated
    #[default]
    Dynamic,
}

impl RigidBodyType {
    fn to_rapier(self) -> rapier::RigidBodyType {
        match self {
            Self::Static => rapier::RigidBodyType::Fixed,
            Self::Kinematic => rapier::RigidBodyType::KinematicPositionBased,
            Self::Dynamic => rapier::RigidBodyType::Dynamic,
        }
    }
}

/// A physics body with interpolation state
#[derive(Debug)]
pub struct RigidBody {
    shape: CollisionShape,
    start_transform: Isometry3<f32>,
    prev_transform: Isometry3<f32>,
    handle: Option<RigidBodyHandle>,
    collider: Option<ColliderHandle>,
    body_type: RigidBodyType,
    mass: f32,
    friction: f32,
    bounciness: f32,
    allowed_to_sleep: bool,
}

impl RigidBody {
    /// Describe a body; nothing is simulated until [`RigidBody::build_rigidbody`]
    pub fn new(shape: CollisionShape, start: &Transform) -> Result<Self, PhysicsError> {
        shape.validate()?;
        let start_transform = start.to_isometry();
        Ok(Self {
            shape,
            start_transform,
            prev_transform: start_transform,
            handle: None,
            collider: None,
            body_type: RigidBodyType::Dynamic,
            mass: DEFAULT_MASS,
            friction: DEFAULT_FRICTION,
            bounciness: DEFAULT_BOUNCINESS,
            allowed_to_sleep: true,
        })
    }

    /// Transform the body is created with. Also resets the interpolation window.
    pub fn set_start_transform(&mut self, start: &Transform) {
        self.start_transform = start.to_isometry();
        self.prev_transform = self.start_transform;
    }

    /// Whether the body currently lives in a world
    pub fn is_built(&self) -> bool {
        self.handle.is_some()
    }

    /// Create the body in `world` as a dynamic body of mass 1 with its collider attached
    pub fn build_rigidbody(&mut self, world: &mut PhysicsWorld) {
        if self.is_built() {
            debug!("Rigid body already built, ignoring");
            return;
        }

        self.body_type = RigidBodyType::Dynamic;
        self.mass = DEFAULT_MASS;

        let body = rapier::RigidBodyBuilder::new(self.body_type.to_rapier())
            .position(self.start_transform)
            .additional_mass(self.mass)
            .can_sleep(self.allowed_to_sleep)
            .build();
        let handle = world.insert_body(body);
        self.handle = Some(handle);
        self.prev_transform = self.start_transform;
        self.attach_collider(world, handle);
        debug!("Built rigid body {:?} with shape {:?}", handle, self.shape);
    }

    /// Destroy the body and its collider. The wrapper can be built again later.
    pub fn remove_from_world(&mut self, world: &mut PhysicsWorld) {
        if let Some(handle) = self.handle.take() {
            world.remove_body(handle);
            self.collider = None;
            debug!("Removed rigid body {:?}", handle);
        }
    }

    fn attach_collider(&mut self, world: &mut PhysicsWorld, handle: RigidBodyHandle) {
        let collider = self
            .shape
            .collider_builder()
            .density(0.0)
            .friction(self.friction)
            .restitution(self.bounciness)
            .build();
        self.collider = Some(world.insert_collider(collider, Some(handle)));
    }

    /// Interpolate between the previously fetched simulation transform and the
    /// current one, then make the current one the new previous.
    ///
    /// Calling this twice without a simulation step in between collapses the
    /// window: the second call returns the current transform for any factor.
    pub fn get_updated_transform(&mut self, world: &PhysicsWorld, factor: f32) -> Transform {
        let Some(current) = self.handle.and_then(|h| world.body(h)).map(|b| *b.position()) else {
            debug!("Interpolation requested on a body that is not in a world");
            return Transform::from_isometry(&self.prev_transform);
        };

        let interpolated = self.prev_transform.lerp_slerp(&current, factor.clamp(0.0, 1.0));
        self.prev_transform = current;
        Transform::from_isometry(&interpolated)
    }

    /// Latest simulated transform without touching the interpolation window
    pub fn current_transform(&self, world: &PhysicsWorld) -> Option<Transform> {
        self.handle
            .and_then(|h| world.body(h))
            .map(|b| Transform::from_isometry(b.position()))
    }

    /// Replace the collision shape. The old collider is removed from the body
    /// before the new one is attached.
    pub fn set_collision_shape(
        &mut self,
        world: &mut PhysicsWorld,
        shape: CollisionShape,
    ) -> Result<(), PhysicsError> {
        shape.validate()?;
        if let Some(old) = self.collider.take() {
            world.remove_collider(old);
        }
        self.shape = shape;
        if let Some(handle) = self.handle {
            self.attach_collider(world, handle);
        }
        Ok(())
    }

    /// Current collision shape
    pub fn collision_shape(&self) -> &CollisionShape {
        &self.shape
    }

    /// Set the total body mass
    pub fn set_mass(&mut self, world: &mut PhysicsWorld, mass: f32) {
        let Some(body) = self.body_mut(world) else { return };
        body.set_additional_mass(mass, true);
        self.mass = mass;
    }

    /// Body mass, zero while not in a world
    pub fn get_mass(&self) -> f32 {
        if self.is_built() {
            self.mass
        } else {
            0.0
        }
    }

    /// Change the body type; applies immediately
    pub fn set_type(&mut self, world: &mut PhysicsWorld, body_type: RigidBodyType) {
        let Some(body) = self.body_mut(world) else { return };
        body.set_body_type(body_type.to_rapier(), true);
        self.body_type = body_type;
    }

    /// Current body type
    pub fn get_type(&self) -> RigidBodyType {
        self.body_type
    }

    /// Teleport to a new location and rotation
    pub fn set_new_transform(&mut self, world: &mut PhysicsWorld, transform: &Transform) {
        let Some(body) = self.body_mut(world) else { return };
        body.set_position(transform.to_isometry(), true);
    }

    /// Teleport keeping the current rotation
    pub fn set_new_location(&mut self, world: &mut PhysicsWorld, location: Vec3) {
        let Some(body) = self.body_mut(world) else { return };
        body.set_translation(location, true);
    }

    /// Restitution of the body material
    pub fn get_bounciness(&self) -> f32 {
        self.bounciness
    }

    /// Set restitution of the body material
    pub fn set_bounciness(&mut self, world: &mut PhysicsWorld, bounciness: f32) {
        self.bounciness = bounciness;
        if let Some(collider) = self.collider.and_then(|c| world.collider_mut(c)) {
            collider.set_restitution(bounciness);
        }
    }

    /// Friction coefficient of the body material
    pub fn get_friction_coefficient(&self) -> f32 {
        self.friction
    }

    /// Set friction coefficient of the body material
    pub fn set_friction_coefficient(&mut self, world: &mut PhysicsWorld, coefficient: f32) {
        self.friction = coefficient;
        if let Some(collider) = self.collider.and_then(|c| world.collider_mut(c)) {
            collider.set_friction(coefficient);
        }
    }

    /// Whether the solver may put the body to sleep
    pub fn get_allowed_to_sleep(&self) -> bool {
        self.allowed_to_sleep
    }

    /// Allow or forbid sleeping
    pub fn set_allowed_to_sleep(&mut self, world: &mut PhysicsWorld, allowed: bool) {
        self.allowed_to_sleep = allowed;
        let Some(body) = self.body_mut(world) else { return };
        *body.activation_mut() = if allowed {
            rapier::RigidBodyActivation::active()
        } else {
            rapier::RigidBodyActivation::cannot_sleep()
        };
        body.wake_up(true);
    }

    /// Push through the centre of mass for the next step
    pub fn apply_force_to_center(&mut self, world: &mut PhysicsWorld, force: Vec3) {
        let Some(body) = self.body_mut(world) else { return };
        body.add_force(force, true);
    }

    /// Spin the body for the next step
    pub fn apply_torque(&mut self, world: &mut PhysicsWorld, torque: Vec3) {
        let Some(body) = self.body_mut(world) else { return };
        body.add_torque(torque, true);
    }

    /// Zero linear and angular velocity
    pub fn cancel_rigidbody_forces(&mut self, world: &mut PhysicsWorld) {
        let Some(body) = self.body_mut(world) else { return };
        body.set_angvel(Vec3::zeros(), true);
        body.set_linvel(Vec3::zeros(), true);
    }

    /// Linear velocity, if built
    pub fn linear_velocity(&self, world: &PhysicsWorld) -> Option<Vec3> {
        self.handle.and_then(|h| world.body(h)).map(|b| *b.linvel())
    }

    pub(crate) fn collider_handle(&self) -> Option<ColliderHandle> {
        self.collider
    }

    fn body_mut<'w>(&self, world: &'w mut PhysicsWorld) -> Option<&'w mut rapier::RigidBody> {
        let body = self.handle.and_then(|h| world.body_mut(h));
        if body.is_none() {
            debug!("Rigid body call ignored, body is not in a world");
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn falling_ball(world: &mut PhysicsWorld) -> RigidBody {
        let start = Transform::from_location(Vec3::new(0.0, 10.0, 0.0));
        let mut body = RigidBody::new(CollisionShape::sphere(0.5), &start).unwrap();
        body.build_rigidbody(world);
        body
    }

    #[test]
    fn test_default_body_is_dynamic_with_unit_mass() {
        let mut world = PhysicsWorld::default();
        let body = falling_ball(&mut world);
        assert_eq!(body.get_type(), RigidBodyType::Dynamic);
        assert_relative_eq!(body.get_mass(), 1.0);
        assert_eq!(world.body_count(), 1);
        assert_eq!(world.collider_count(), 1);
    }

    #[test]
    fn test_factor_zero_returns_previous_and_one_returns_current() {
        let mut world = PhysicsWorld::default();
        let mut body = falling_ball(&mut world);

        world.step(1.0 / 60.0);
        let at_zero = body.get_updated_transform(&world, 0.0);
        assert_relative_eq!(at_zero.location, Vec3::new(0.0, 10.0, 0.0), epsilon = 1e-6);

        world.step(1.0 / 60.0);
        let current = body.current_transform(&world).unwrap();
        let at_one = body.get_updated_transform(&world, 1.0);
        assert_relative_eq!(at_one.location, current.location, epsilon = 1e-6);
        assert!(at_one.location.y < 10.0);
    }

    #[test]
    fn test_second_call_without_step_collapses_window() {
        let mut world = PhysicsWorld::default();
        let mut body = falling_ball(&mut world);

        for _ in 0..10 {
            world.step(1.0 / 60.0);
        }
        let current = body.current_transform(&world).unwrap();

        let first = body.get_updated_transform(&world, 0.5);
        let expected_mid = (10.0 + current.location.y) * 0.5;
        assert_relative_eq!(first.location.y, expected_mid, epsilon = 1e-5);

        let second = body.get_updated_transform(&world, 0.5);
        assert_relative_eq!(second.location, current.location, epsilon = 1e-6);
    }

    #[test]
    fn test_static_type_stops_motion() {
        let mut world = PhysicsWorld::default();
        let mut body = falling_ball(&mut world);
        body.set_type(&mut world, RigidBodyType::Static);
        assert_eq!(body.get_type(), RigidBodyType::Static);

        for _ in 0..5 {
            world.step(1.0 / 60.0);
        }
        let location = body.current_transform(&world).unwrap().location;
        assert_relative_eq!(location, Vec3::new(0.0, 10.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_shape_replacement_keeps_single_collider() {
        let mut world = PhysicsWorld::default();
        let mut body = falling_ball(&mut world);
        body.set_collision_shape(&mut world, CollisionShape::cuboid(Vec3::new(1.0, 1.0, 1.0)))
            .unwrap();

        assert_eq!(world.collider_count(), 1);
        assert_eq!(*body.collision_shape(), CollisionShape::cuboid(Vec3::new(1.0, 1.0, 1.0)));
        assert!(body
            .set_collision_shape(&mut world, CollisionShape::sphere(-1.0))
            .is_err());
        assert_eq!(world.collider_count(), 1);
    }

    #[test]
    fn test_calls_before_build_are_ignored() {
        let mut world = PhysicsWorld::default();
        let mut body = RigidBody::new(CollisionShape::sphere(1.0), &Transform::identity()).unwrap();

        body.apply_force_to_center(&mut world, Vec3::new(0.0, 100.0, 0.0));
        body.set_type(&mut world, RigidBodyType::Kinematic);
        body.cancel_rigidbody_forces(&mut world);

        assert!(!body.is_built());
        assert_eq!(body.get_type(), RigidBodyType::Dynamic);
        assert_relative_eq!(body.get_mass(), 0.0);
        assert!(body.current_transform(&world).is_none());
        assert_eq!(world.body_count(), 0);
    }

    #[test]
    fn test_cancel_forces_zeroes_velocity() {
        let mut world = PhysicsWorld::default();
        let mut body = falling_ball(&mut world);
        for _ in 0..10 {
            world.step(1.0 / 60.0);
        }
        assert!(body.linear_velocity(&world).unwrap().y < 0.0);

        body.cancel_rigidbody_forces(&mut world);
        assert_relative_eq!(body.linear_velocity(&world).unwrap(), Vec3::zeros());
    }

    #[test]
    fn test_remove_from_world_releases_collider() {
        let mut world = PhysicsWorld::default();
        let mut body = falling_ball(&mut world);
        body.remove_from_world(&mut world);
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.collider_count(), 0);
        assert!(!body.is_built());
    }
}
