//! Math utilities and types
//!
//! Scene transforms store rotation as Euler angles (radians, roll/pitch/yaw
//! about X/Y/Z) because parent/child propagation composes rotations
//! component-wise. Conversions to quaternions happen only at the physics and
//! GPU boundaries.

pub use nalgebra::{
    Vector2, Vector3, Vector4,
    Matrix4,
    Isometry3, Translation3,
    UnitQuaternion,
};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Quaternion type for rotations
pub type Quat = UnitQuaternion<f32>;

/// Location, Euler rotation and scale of an object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub location: Vec3,

    /// Euler angles in radians (roll, pitch, yaw)
    pub rotation: Vec3,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            location: Vec3::zeros(),
            rotation: Vec3::zeros(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// All-zero transform, used as the neutral relative offset
    pub fn zero() -> Self {
        Self {
            location: Vec3::zeros(),
            rotation: Vec3::zeros(),
            scale: Vec3::zeros(),
        }
    }

    /// Create a transform with only a location
    pub fn from_location(location: Vec3) -> Self {
        Self {
            location,
            ..Default::default()
        }
    }

    /// Create a transform from all three parts
    pub fn new(location: Vec3, rotation: Vec3, scale: Vec3) -> Self {
        Self { location, rotation, scale }
    }

    /// Rotation as a unit quaternion
    pub fn orientation(&self) -> Quat {
        Quat::from_euler_angles(self.rotation.x, self.rotation.y, self.rotation.z)
    }

    /// Translation * rotation, ignoring scale
    pub fn unscaled_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.location) * self.orientation().to_homogeneous()
    }

    /// Full model matrix: translation * rotation * scale
    pub fn to_matrix(&self) -> Mat4 {
        self.unscaled_matrix() * Mat4::new_nonuniform_scaling(&self.scale)
    }

    /// Component-wise difference `self - parent` for location, rotation and scale
    pub fn delta_from(&self, parent: &Transform) -> Transform {
        Transform {
            location: self.location - parent.location,
            rotation: self.rotation - parent.rotation,
            scale: self.scale - parent.scale,
        }
    }

    /// Rigid part of the transform as an isometry
    pub fn to_isometry(&self) -> Isometry3<f32> {
        Isometry3::from_parts(Translation3::from(self.location), self.orientation())
    }

    /// Build a unit-scale transform from an isometry
    pub fn from_isometry(isometry: &Isometry3<f32>) -> Self {
        let (roll, pitch, yaw) = isometry.rotation.euler_angles();
        Self {
            location: isometry.translation.vector,
            rotation: Vec3::new(roll, pitch, yaw),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

/// Matrix layout expected by GLSL std140 uniform blocks
pub fn to_column_array(matrix: &Mat4) -> [[f32; 4]; 4] {
    (*matrix).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unscaled_matrix_ignores_scale() {
        let transform = Transform::new(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::zeros(),
            Vec3::new(5.0, 5.0, 5.0),
        );
        let m = transform.unscaled_matrix();
        assert_relative_eq!(m[(0, 0)], 1.0);
        assert_relative_eq!(m[(0, 3)], 1.0);
        assert_relative_eq!(m[(1, 3)], 2.0);
        assert_relative_eq!(m[(2, 3)], 3.0);
    }

    #[test]
    fn test_isometry_conversion_keeps_euler_angles() {
        let transform = Transform::new(Vec3::new(0.5, -1.0, 2.0), Vec3::new(0.1, 0.2, 0.3), Vec3::new(1.0, 1.0, 1.0));
        let back = Transform::from_isometry(&transform.to_isometry());
        assert_relative_eq!(back.location, transform.location, epsilon = 1e-5);
        assert_relative_eq!(back.rotation, transform.rotation, epsilon = 1e-5);
    }

    #[test]
    fn test_delta_from_is_component_wise() {
        let child = Transform::new(Vec3::new(3.0, 0.0, 0.0), Vec3::new(0.5, 0.0, 0.0), Vec3::new(2.0, 2.0, 2.0));
        let parent = Transform::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.25, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0));
        let delta = child.delta_from(&parent);
        assert_relative_eq!(delta.location, Vec3::new(2.0, 0.0, 0.0));
        assert_relative_eq!(delta.rotation, Vec3::new(0.25, 0.0, 0.0));
        assert_relative_eq!(delta.scale, Vec3::new(1.0, 1.0, 1.0));
    }
}
