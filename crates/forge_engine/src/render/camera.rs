//! Perspective camera producing Vulkan-ready matrices

use crate::foundation::math::{Mat4, Vec3};
use nalgebra::Point3;

/// Look-at camera with a perspective projection
#[derive(Debug, Clone)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,

    /// Point the camera looks at
    pub target: Vec3,

    /// Up direction, usually +Y
    pub up: Vec3,

    /// Vertical field of view in radians
    pub fov: f32,

    /// Width over height
    pub aspect: f32,

    /// Near clipping distance
    pub near: f32,

    /// Far clipping distance
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(Vec3::new(0.0, 2.0, 6.0), 60.0, 16.0 / 9.0, 0.1, 100.0)
    }
}

impl Camera {
    /// Perspective camera looking at the origin
    pub fn perspective(position: Vec3, fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            target: Vec3::zeros(),
            up: Vec3::new(0.0, 1.0, 0.0),
            fov: fov_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    /// Move the camera without changing where it looks
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        log::trace!("Camera position updated to: {:?}", position);
    }

    /// Aim at `target` with `up`
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        self.target = target;
        self.up = up;
    }

    /// Update the aspect ratio, typically after a resize
    pub fn set_aspect_ratio(&mut self, aspect: f32) {
        if (self.aspect - aspect).abs() > 0.01 {
            log::info!("Camera aspect ratio changed: {:.3} -> {:.3}", self.aspect, aspect);
        }
        self.aspect = aspect;
    }

    /// World to view, right-handed
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(
            &Point3::from(self.position),
            &Point3::from(self.target),
            &self.up,
        )
    }

    /// View to clip with depth in [0, 1] and Y pointing down, as Vulkan
    /// expects
    pub fn projection_matrix(&self) -> Mat4 {
        let f = 1.0 / (self.fov * 0.5).tan();
        let depth = self.near - self.far;
        let mut proj = Mat4::zeros();
        proj[(0, 0)] = f / self.aspect;
        proj[(1, 1)] = -f;
        proj[(2, 2)] = self.far / depth;
        proj[(2, 3)] = self.near * self.far / depth;
        proj[(3, 2)] = -1.0;
        proj
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    #[test]
    fn test_projection_maps_near_and_far_to_vulkan_depth() {
        let camera = Camera::perspective(Vec3::zeros(), 90.0, 1.0, 0.5, 10.0);
        let proj = camera.projection_matrix();

        let near = proj * Vector4::new(0.0, 0.0, -0.5, 1.0);
        let far = proj * Vector4::new(0.0, 0.0, -10.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-6);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::perspective(Vec3::zeros(), 90.0, 1.0, 0.1, 10.0);
        let clip = camera.projection_matrix() * Vector4::new(0.0, 1.0, -1.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn test_view_moves_target_onto_negative_z() {
        let camera = Camera::perspective(Vec3::new(0.0, 0.0, 5.0), 60.0, 1.0, 0.1, 100.0);
        let origin = camera.view_matrix() * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(origin.z, -5.0, epsilon = 1e-5);
    }
}
