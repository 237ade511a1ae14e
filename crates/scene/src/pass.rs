//! Per-pass inputs.

use glam::Vec4;

use crate::camera::Camera;
use crate::light::Light;

/// Everything the renderer needs to build the per-pass constants of a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct PassInput {
    /// Viewing camera
    pub camera: Camera,
    /// Scene lights, no more than the renderer's light limit
    pub lights: Vec<Light>,
    /// Ambient light color
    pub ambient: Vec4,
    /// Seconds since start
    pub total_time: f32,
    /// Seconds since the previous frame
    pub delta_time: f32,
}

impl Default for PassInput {
    fn default() -> Self {
        Self {
            camera: Camera::default(),
            lights: vec![Light::default()],
            ambient: Vec4::new(0.25, 0.25, 0.35, 1.0),
            total_time: 0.0,
            delta_time: 0.0,
        }
    }
}
