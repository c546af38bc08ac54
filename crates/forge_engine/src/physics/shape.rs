//! Collision shape descriptions

use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};

use super::PhysicsError;
use crate::foundation::math::Vec3;

/// Collision geometry attached to a rigid body or trigger
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CollisionShape {
    /// Axis-aligned box given by its half extents
    Box {
        /// Half size along each axis
        half_extents: Vec3,
    },
    /// Sphere around the body origin
    Sphere {
        /// Sphere radius
        radius: f32,
    },
    /// Capsule along the local Y axis
    Capsule {
        /// Radius of the end caps and the cylinder
        radius: f32,
        /// Distance between the two cap centres
        height: f32,
    },
}

impl CollisionShape {
    /// Box shape from half extents
    pub fn cuboid(half_extents: Vec3) -> Self {
        Self::Box { half_extents }
    }

    /// Sphere shape
    pub fn sphere(radius: f32) -> Self {
        Self::Sphere { radius }
    }

    /// Capsule shape
    pub fn capsule(radius: f32, height: f32) -> Self {
        Self::Capsule { radius, height }
    }

    /// Reject degenerate dimensions before they reach the solver
    pub fn validate(&self) -> Result<(), PhysicsError> {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        let ok = match self {
            Self::Box { half_extents } => half_extents.iter().all(|&v| positive(v)),
            Self::Sphere { radius } => positive(*radius),
            Self::Capsule { radius, height } => positive(*radius) && height.is_finite() && *height >= 0.0,
        };

        if ok {
            Ok(())
        } else {
            Err(PhysicsError::InvalidShape(format!("{self:?}")))
        }
    }

    pub(crate) fn collider_builder(&self) -> rapier::ColliderBuilder {
        match *self {
            Self::Box { half_extents } => {
                rapier::ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            }
            Self::Sphere { radius } => rapier::ColliderBuilder::ball(radius),
            Self::Capsule { radius, height } => rapier::ColliderBuilder::capsule_y(height * 0.5, radius),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_shapes_rejected() {
        assert!(CollisionShape::sphere(0.0).validate().is_err());
        assert!(CollisionShape::cuboid(Vec3::new(1.0, -1.0, 1.0)).validate().is_err());
        assert!(CollisionShape::capsule(0.5, f32::NAN).validate().is_err());
        assert!(CollisionShape::capsule(0.5, 0.0).validate().is_ok());
        assert!(CollisionShape::cuboid(Vec3::new(1.0, 2.0, 3.0)).validate().is_ok());
    }
}
