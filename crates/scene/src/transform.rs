//! Position, rotation and scale.
//!
//! # Example
//!
//! ```
//! use inflight_scene::Transform;
//! use glam::Vec3;
//!
//! let t = Transform::new()
//!     .with_position(Vec3::new(0.0, 2.0, 0.0))
//!     .with_scale(Vec3::splat(2.0));
//!
//! let p = t.matrix().transform_point3(Vec3::X);
//! assert!((p - Vec3::new(2.0, 2.0, 0.0)).length() < 1e-5);
//! ```

use glam::{Mat4, Quat, Vec3};

/// Scale, then rotate, then translate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    /// Translation
    pub position: Vec3,
    /// Rotation as a quaternion
    pub rotation: Quat,
    /// Per-axis scale
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Identity transform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the translation.
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Sets the rotation.
    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Sets the scale.
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Composed matrix.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

impl From<Transform> for Mat4 {
    fn from(t: Transform) -> Self {
        t.matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_identity() {
        assert_eq!(Transform::default().matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_scale_applies_before_translation() {
        let t = Transform::new()
            .with_position(Vec3::new(1.0, 0.0, 0.0))
            .with_scale(Vec3::splat(3.0));
        let p = t.matrix().transform_point3(Vec3::Y);
        assert!((p - Vec3::new(1.0, 3.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_rotation() {
        let t = Transform::new().with_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        let p = Mat4::from(t).transform_vector3(Vec3::X);
        assert!((p - Vec3::NEG_Z).length() < 1e-5);
    }
}
