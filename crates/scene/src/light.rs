//! Light sources.
//!
//! Lights are plain scene data; the renderer packs them into the per-pass
//! constants every frame.

use glam::Vec3;

/// A light source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Light {
    /// Parallel rays, no falloff.
    Directional {
        /// Direction the light travels in (normalized)
        direction: Vec3,
        /// Color times intensity
        strength: Vec3,
    },
    /// Omnidirectional light with linear falloff.
    Point {
        /// Position in world space
        position: Vec3,
        /// Color times intensity
        strength: Vec3,
        /// Distance where falloff begins
        falloff_start: f32,
        /// Distance where the light reaches zero
        falloff_end: f32,
    },
    /// Cone-shaped light.
    Spot {
        /// Position in world space
        position: Vec3,
        /// Direction the cone points in (normalized)
        direction: Vec3,
        /// Color times intensity
        strength: Vec3,
        /// Distance where falloff begins
        falloff_start: f32,
        /// Distance where the light reaches zero
        falloff_end: f32,
        /// Exponent applied to the cone angle cosine
        spot_power: f32,
    },
}

impl Light {
    /// Sun-like light pointing along `direction`.
    pub fn directional(direction: Vec3, strength: Vec3) -> Self {
        Light::Directional {
            direction: direction.normalize_or_zero(),
            strength,
        }
    }

    /// Point light at `position`.
    pub fn point(position: Vec3, strength: Vec3, falloff_start: f32, falloff_end: f32) -> Self {
        Light::Point {
            position,
            strength,
            falloff_start,
            falloff_end,
        }
    }
}

impl Default for Light {
    fn default() -> Self {
        Light::directional(Vec3::new(0.577, -0.577, 0.577), Vec3::splat(0.6))
    }
}
