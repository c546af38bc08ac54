//! # Scene Graph
//!
//! Game objects arranged in a parent/child hierarchy, each carrying a world
//! transform and an offset relative to its parent, plus the components that
//! attach render and physics resources to them.

pub mod behaviour;
pub mod component;
pub mod graph;

pub use behaviour::{Behaviour, BehaviourContext, LogicManager};
pub use component::{Component, ComponentId, ComponentKind};
pub use graph::{NodeId, SceneGraph, SceneNode};

use crate::physics::PhysicsManager;

/// Copy interpolated rigid-body transforms onto the mesh components they
/// drive. Every body's interpolation window advances exactly once per call.
pub fn sync_rigid_bodies(scene: &mut SceneGraph, physics: &mut PhysicsManager) {
    for (body, mesh) in scene.rigid_body_links() {
        let Some(transform) = physics.updated_transform(body) else {
            continue;
        };
        if let Some(mesh) = mesh {
            scene.set_component_location(mesh, transform.location);
            scene.set_component_rotation(mesh, transform.rotation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PhysicsConfig;
    use crate::foundation::math::{Transform, Vec3};
    use crate::physics::{CollisionShape, RigidBodyType};
    use crate::render::RenderObjectId;
    use approx::assert_relative_eq;
    use slotmap::KeyData;

    #[test]
    fn test_sync_moves_attached_mesh_with_body() {
        let mut physics = PhysicsManager::new(&PhysicsConfig {
            fixed_timestep: 0.125,
            ..PhysicsConfig::default()
        });
        let mut scene = SceneGraph::new();

        let start = Transform::from_location(Vec3::new(0.0, 5.0, 0.0));
        let node = scene.create_node("ball", start);
        let body = physics
            .create_rigid_body(CollisionShape::sphere(0.5), &start, RigidBodyType::Dynamic)
            .unwrap();

        let mesh = scene.create_component(ComponentKind::Mesh {
            object: RenderObjectId::from(KeyData::from_ffi(1)),
        })
        .unwrap();
        let rigid = scene
            .create_component(ComponentKind::RigidBody { body, attached_mesh: Some(mesh) })
            .unwrap();
        scene.add_component(node, mesh);
        scene.add_component(node, rigid);

        assert_eq!(physics.step(0.5625), 4);
        assert_relative_eq!(physics.interpolation_factor(), 0.5);
        sync_rigid_bodies(&mut scene, &mut physics);

        let current = physics.body(body).unwrap().current_transform(physics.world()).unwrap();
        let mesh_location = scene.component(mesh).unwrap().transform().location;
        assert_relative_eq!(mesh_location.y, (5.0 + current.location.y) * 0.5, epsilon = 1e-5);
        assert!(mesh_location.y < 5.0);
        assert_relative_eq!(scene.node(node).unwrap().transform().location.y, 5.0);
    }
}
