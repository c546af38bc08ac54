//! Sensor volumes that report overlap with rigid bodies

use log::debug;
use rapier3d::prelude as rapier;
use rapier3d::prelude::ColliderHandle;

use super::{CollisionShape, PhysicsError, PhysicsWorld, RigidBody};
use crate::foundation::math::Transform;

/// A fixed sensor collider. Produces no contact forces.
#[derive(Debug)]
pub struct Trigger {
    shape: CollisionShape,
    transform: Transform,
    collider: Option<ColliderHandle>,
}

impl Trigger {
    /// Describe a trigger; call [`Trigger::build`] to place it in a world
    pub fn new(shape: CollisionShape, transform: &Transform) -> Result<Self, PhysicsError> {
        shape.validate()?;
        Ok(Self {
            shape,
            transform: *transform,
            collider: None,
        })
    }

    /// Insert the sensor into `world`
    pub fn build(&mut self, world: &mut PhysicsWorld) {
        if self.collider.is_some() {
            return;
        }
        let collider = self
            .shape
            .collider_builder()
            .sensor(true)
            .active_collision_types(rapier::ActiveCollisionTypes::all())
            .position(self.transform.to_isometry())
            .build();
        self.collider = Some(world.insert_collider(collider, None));
        debug!("Built trigger with shape {:?}", self.shape);
    }

    /// Remove the sensor from `world`
    pub fn remove_from_world(&mut self, world: &mut PhysicsWorld) {
        if let Some(collider) = self.collider.take() {
            world.remove_collider(collider);
        }
    }

    /// Move the trigger volume
    pub fn set_transform(&mut self, world: &mut PhysicsWorld, transform: &Transform) {
        self.transform = *transform;
        if let Some(collider) = self.collider.and_then(|c| world.collider_mut(c)) {
            collider.set_position(transform.to_isometry());
        }
    }

    /// Trigger placement
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Whether `body` intersected the volume during the last simulation step
    pub fn test_overlap(&self, world: &PhysicsWorld, body: &RigidBody) -> bool {
        match (self.collider, body.collider_handle()) {
            (Some(sensor), Some(other)) => world.intersecting(sensor, other),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;

    #[test]
    fn test_overlap_reported_only_for_bodies_inside() {
        let mut world = PhysicsWorld::default();
        let mut trigger = Trigger::new(
            CollisionShape::cuboid(Vec3::new(2.0, 2.0, 2.0)),
            &Transform::identity(),
        )
        .unwrap();
        trigger.build(&mut world);

        let mut inside = RigidBody::new(CollisionShape::sphere(0.5), &Transform::identity()).unwrap();
        inside.build_rigidbody(&mut world);
        let mut outside = RigidBody::new(
            CollisionShape::sphere(0.5),
            &Transform::from_location(Vec3::new(50.0, 0.0, 0.0)),
        )
        .unwrap();
        outside.build_rigidbody(&mut world);

        world.step(1.0 / 60.0);

        assert!(trigger.test_overlap(&world, &inside));
        assert!(!trigger.test_overlap(&world, &outside));
    }

    #[test]
    fn test_unbuilt_trigger_never_overlaps() {
        let mut world = PhysicsWorld::default();
        let trigger = Trigger::new(CollisionShape::sphere(1.0), &Transform::identity()).unwrap();
        let mut body = RigidBody::new(CollisionShape::sphere(1.0), &Transform::identity()).unwrap();
        body.build_rigidbody(&mut world);
        world.step(1.0 / 60.0);
        assert!(!trigger.test_overlap(&world, &body));
    }
}
