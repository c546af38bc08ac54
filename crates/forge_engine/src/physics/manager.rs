//! # Physics Manager
//!
//! Owns the world, every rigid body and trigger, and the fixed-timestep
//! accumulator. The leftover fraction of a step after `step` is the
//! interpolation factor used for rendering.

use log::{debug, warn};
use slotmap::SlotMap;

use super::{BodyId, CollisionShape, PhysicsError, PhysicsWorld, RigidBody, RigidBodyType, Trigger, TriggerId};
use crate::core::config::PhysicsConfig;
use crate::foundation::math::{Transform, Vec3};

/// Fixed-rate driver for the physics world
pub struct PhysicsManager {
    world: PhysicsWorld,
    bodies: SlotMap<BodyId, RigidBody>,
    triggers: SlotMap<TriggerId, Trigger>,
    fixed_timestep: f32,
    max_substeps: u32,
    accumulator: f32,
    interpolation_factor: f32,
}

impl PhysicsManager {
    /// Create an empty world from configuration
    pub fn new(config: &PhysicsConfig) -> Self {
        let [x, y, z] = config.gravity;
        Self {
            world: PhysicsWorld::new(Vec3::new(x, y, z)),
            bodies: SlotMap::with_key(),
            triggers: SlotMap::with_key(),
            fixed_timestep: config.fixed_timestep,
            max_substeps: config.max_substeps,
            accumulator: 0.0,
            interpolation_factor: 0.0,
        }
    }

    /// Create and build a body at `transform`
    pub fn create_rigid_body(
        &mut self,
        shape: CollisionShape,
        transform: &Transform,
        body_type: RigidBodyType,
    ) -> Result<BodyId, PhysicsError> {
        let mut body = RigidBody::new(shape, transform)?;
        body.build_rigidbody(&mut self.world);
        if body_type != RigidBodyType::Dynamic {
            body.set_type(&mut self.world, body_type);
        }
        let id = self.bodies.insert(body);
        debug!("Created rigid body {:?} ({:?})", id, body_type);
        Ok(id)
    }

    /// Remove a body from the world and drop it
    pub fn remove_rigid_body(&mut self, id: BodyId) -> bool {
        match self.bodies.remove(id) {
            Some(mut body) => {
                body.remove_from_world(&mut self.world);
                true
            }
            None => false,
        }
    }

    /// Create and build a trigger volume
    pub fn create_trigger(&mut self, shape: CollisionShape, transform: &Transform) -> Result<TriggerId, PhysicsError> {
        let mut trigger = Trigger::new(shape, transform)?;
        trigger.build(&mut self.world);
        Ok(self.triggers.insert(trigger))
    }

    /// Remove a trigger volume
    pub fn remove_trigger(&mut self, id: TriggerId) -> bool {
        match self.triggers.remove(id) {
            Some(mut trigger) => {
                trigger.remove_from_world(&mut self.world);
                true
            }
            None => false,
        }
    }

    /// Immutable access to a body
    pub fn body(&self, id: BodyId) -> Option<&RigidBody> {
        self.bodies.get(id)
    }

    /// A body together with the world it lives in, for mutating calls
    pub fn body_mut(&mut self, id: BodyId) -> Option<(&mut RigidBody, &mut PhysicsWorld)> {
        let world = &mut self.world;
        self.bodies.get_mut(id).map(|body| (body, world))
    }

    /// A trigger together with the world it lives in
    pub fn trigger_mut(&mut self, id: TriggerId) -> Option<(&mut Trigger, &mut PhysicsWorld)> {
        let world = &mut self.world;
        self.triggers.get_mut(id).map(|trigger| (trigger, world))
    }

    /// Whether `body` overlapped `trigger` during the last step
    pub fn trigger_overlaps(&self, trigger: TriggerId, body: BodyId) -> Result<bool, PhysicsError> {
        let trigger = self
            .triggers
            .get(trigger)
            .ok_or_else(|| PhysicsError::UnknownHandle(format!("{trigger:?}")))?;
        let body = self
            .bodies
            .get(body)
            .ok_or_else(|| PhysicsError::UnknownHandle(format!("{body:?}")))?;
        Ok(trigger.test_overlap(&self.world, body))
    }

    /// Consume `delta_time` in fixed steps. Returns the number of steps taken.
    ///
    /// Time beyond `max_substeps` steps is dropped so a long frame cannot
    /// trigger a spiral of ever longer catch-up frames.
    pub fn step(&mut self, delta_time: f32) -> u32 {
        self.accumulator += delta_time.max(0.0);

        #[allow(clippy::cast_precision_loss)]
        let max_accumulated = self.fixed_timestep * self.max_substeps as f32;
        if self.accumulator > max_accumulated {
            warn!(
                "Physics falling behind, dropping {:.3}s of simulation",
                self.accumulator - max_accumulated
            );
            self.accumulator = max_accumulated;
        }

        let mut steps = 0;
        while self.accumulator >= self.fixed_timestep {
            self.world.step(self.fixed_timestep);
            self.accumulator -= self.fixed_timestep;
            steps += 1;
        }

        self.interpolation_factor = self.accumulator / self.fixed_timestep;
        steps
    }

    /// Fraction of a step left in the accumulator after the last `step`
    pub fn interpolation_factor(&self) -> f32 {
        self.interpolation_factor
    }

    /// Interpolated transform of a body for this frame. Advances the body's
    /// interpolation window, so call it once per frame per body.
    pub fn updated_transform(&mut self, id: BodyId) -> Option<Transform> {
        let factor = self.interpolation_factor;
        let body = self.bodies.get_mut(id)?;
        Some(body.get_updated_transform(&self.world, factor))
    }

    /// Shared world access
    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    /// Mutable world access
    pub fn world_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.world
    }

    /// Number of bodies owned
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn manager(timestep: f32, max_substeps: u32) -> PhysicsManager {
        PhysicsManager::new(&PhysicsConfig {
            gravity: [0.0, -9.81, 0.0],
            fixed_timestep: timestep,
            max_substeps,
        })
    }

    #[test]
    fn test_accumulator_leaves_fractional_factor() {
        let mut physics = manager(0.25, 8);
        assert_eq!(physics.step(0.625), 2);
        assert_relative_eq!(physics.interpolation_factor(), 0.5);

        assert_eq!(physics.step(0.125), 1);
        assert_relative_eq!(physics.interpolation_factor(), 0.0);
    }

    #[test]
    fn test_long_frame_clamped_to_max_substeps() {
        let mut physics = manager(0.25, 3);
        assert_eq!(physics.step(10.0), 3);
        assert_relative_eq!(physics.interpolation_factor(), 0.0);
    }

    #[test]
    fn test_body_lifecycle_through_manager() {
        let mut physics = manager(1.0 / 64.0, 4);
        let id = physics
            .create_rigid_body(CollisionShape::sphere(1.0), &Transform::identity(), RigidBodyType::Kinematic)
            .unwrap();
        assert_eq!(physics.body(id).unwrap().get_type(), RigidBodyType::Kinematic);

        let (body, world) = physics.body_mut(id).unwrap();
        body.set_mass(world, 3.0);
        assert_relative_eq!(physics.body(id).unwrap().get_mass(), 3.0);

        assert!(physics.remove_rigid_body(id));
        assert!(!physics.remove_rigid_body(id));
        assert_eq!(physics.world().body_count(), 0);
    }

    #[test]
    fn test_invalid_shape_rejected() {
        let mut physics = manager(1.0 / 60.0, 4);
        let result = physics.create_rigid_body(
            CollisionShape::sphere(0.0),
            &Transform::identity(),
            RigidBodyType::Dynamic,
        );
        assert!(matches!(result, Err(PhysicsError::InvalidShape(_))));
    }
}
