//! Thin owner of the rapier simulation sets

use rapier3d::prelude as rapier;
use rapier3d::prelude::{ColliderHandle, RigidBodyHandle};

use crate::foundation::math::Vec3;

/// One simulation world: every rapier set plus the pipeline that steps them
pub struct PhysicsWorld {
    gravity: Vec3,
    integration_parameters: rapier::IntegrationParameters,
    pipeline: rapier::PhysicsPipeline,
    islands: rapier::IslandManager,
    broad_phase: rapier::BroadPhase,
    narrow_phase: rapier::NarrowPhase,
    bodies: rapier::RigidBodySet,
    colliders: rapier::ColliderSet,
    impulse_joints: rapier::ImpulseJointSet,
    multibody_joints: rapier::MultibodyJointSet,
    ccd_solver: rapier::CCDSolver,
}

impl PhysicsWorld {
    /// Create an empty world
    pub fn new(gravity: Vec3) -> Self {
        Self {
            gravity,
            integration_parameters: rapier::IntegrationParameters::default(),
            pipeline: rapier::PhysicsPipeline::new(),
            islands: rapier::IslandManager::new(),
            broad_phase: rapier::BroadPhase::new(),
            narrow_phase: rapier::NarrowPhase::new(),
            bodies: rapier::RigidBodySet::new(),
            colliders: rapier::ColliderSet::new(),
            impulse_joints: rapier::ImpulseJointSet::new(),
            multibody_joints: rapier::MultibodyJointSet::new(),
            ccd_solver: rapier::CCDSolver::new(),
        }
    }

    /// Advance the simulation by `dt` seconds.
    ///
    /// Forces and torques added since the last step act for this step only.
    pub fn step(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );

        for (_, body) in self.bodies.iter_mut() {
            body.reset_forces(false);
            body.reset_torques(false);
        }
    }

    /// World gravity
    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    /// Change world gravity
    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    /// Number of live bodies
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Number of live colliders, sensors included
    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    pub(crate) fn insert_body(&mut self, body: rapier::RigidBody) -> RigidBodyHandle {
        self.bodies.insert(body)
    }

    pub(crate) fn remove_body(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    pub(crate) fn insert_collider(
        &mut self,
        collider: rapier::Collider,
        parent: Option<RigidBodyHandle>,
    ) -> ColliderHandle {
        match parent {
            Some(parent) => self.colliders.insert_with_parent(collider, parent, &mut self.bodies),
            None => self.colliders.insert(collider),
        }
    }

    pub(crate) fn remove_collider(&mut self, handle: ColliderHandle) {
        self.colliders.remove(handle, &mut self.islands, &mut self.bodies, true);
    }

    pub(crate) fn body(&self, handle: RigidBodyHandle) -> Option<&rapier::RigidBody> {
        self.bodies.get(handle)
    }

    pub(crate) fn body_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut rapier::RigidBody> {
        self.bodies.get_mut(handle)
    }

    pub(crate) fn collider_mut(&mut self, handle: ColliderHandle) -> Option<&mut rapier::Collider> {
        self.colliders.get_mut(handle)
    }

    /// True when the narrow phase found the two colliders intersecting in the last step
    pub(crate) fn intersecting(&self, a: ColliderHandle, b: ColliderHandle) -> bool {
        self.narrow_phase.intersection_pair(a, b) == Some(true)
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, -9.81, 0.0))
    }
}
