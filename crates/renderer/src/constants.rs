//! GPU-mirror constant records.
//!
//! These structures must match the shader-side layouts exactly. All of them are
//! `#[repr(C)]`, padded by hand to 16-byte multiples, and implement `Pod` so they
//! can be copied byte-for-byte into upload buffers.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use inflight_scene::{Instance, Light, Material, PassInput, RenderItem};

/// Maximum number of lights in the per-pass constants.
pub const MAX_LIGHTS: usize = 16;

/// One light as the shaders see it.
///
/// Unused fields of a light kind are left at zero.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    /// Color times intensity.
    pub strength: Vec3,
    /// Point/spot only.
    pub falloff_start: f32,
    /// Directional/spot only.
    pub direction: Vec3,
    /// Point/spot only.
    pub falloff_end: f32,
    /// Point/spot only.
    pub position: Vec3,
    /// Spot only.
    pub spot_power: f32,
}

impl From<&Light> for GpuLight {
    fn from(light: &Light) -> Self {
        match *light {
            Light::Directional {
                direction,
                strength,
            } => Self {
                strength,
                direction,
                ..Default::default()
            },
            Light::Point {
                position,
                strength,
                falloff_start,
                falloff_end,
            } => Self {
                strength,
                falloff_start,
                falloff_end,
                position,
                ..Default::default()
            },
            Light::Spot {
                position,
                direction,
                strength,
                falloff_start,
                falloff_end,
                spot_power,
            } => Self {
                strength,
                falloff_start,
                direction,
                falloff_end,
                position,
                spot_power,
            },
        }
    }
}

/// Per-pass constants, bound once per frame.
///
/// # Memory Layout
///
/// - Offset 0: six matrices (384 bytes)
/// - Offset 384: eye position + padding (16 bytes)
/// - Offset 400: render target size and its inverse (16 bytes)
/// - Offset 416: near, far, total time, delta time (16 bytes)
/// - Offset 432: ambient light (16 bytes)
/// - Offset 448: lights (768 bytes)
/// - Offset 1216: light count + padding (16 bytes)
/// - Total size: 1232 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PassConstants {
    pub view: Mat4,
    pub inv_view: Mat4,
    pub proj: Mat4,
    pub inv_proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view_proj: Mat4,
    pub eye_position: Vec3,
    pub _pad0: f32,
    pub render_target_size: Vec2,
    pub inv_render_target_size: Vec2,
    pub near_z: f32,
    pub far_z: f32,
    pub total_time: f32,
    pub delta_time: f32,
    pub ambient_light: Vec4,
    pub lights: [GpuLight; MAX_LIGHTS],
    pub light_count: u32,
    pub _pad1: [u32; 3],
}

impl PassConstants {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Builds the pass constants for a render target of `width` x `height`.
    ///
    /// # Panics
    ///
    /// Panics if `input` holds more than [`MAX_LIGHTS`] lights.
    pub fn new(input: &PassInput, width: u32, height: u32) -> Self {
        assert!(
            input.lights.len() <= MAX_LIGHTS,
            "pass input has {} lights, the pass constants hold at most {MAX_LIGHTS}",
            input.lights.len()
        );

        let camera = &input.camera;
        let view = camera.view_matrix();
        let proj = camera.projection_matrix();
        let view_proj = proj * view;
        let (near_z, far_z) = camera.near_far();

        let size = Vec2::new(width as f32, height as f32);
        let mut lights = [GpuLight::default(); MAX_LIGHTS];
        let light_count = input.lights.len();
        for (dst, src) in lights.iter_mut().zip(&input.lights) {
            *dst = GpuLight::from(src);
        }

        Self {
            view,
            inv_view: view.inverse(),
            proj,
            inv_proj: proj.inverse(),
            view_proj,
            inv_view_proj: view_proj.inverse(),
            eye_position: camera.position,
            _pad0: 0.0,
            render_target_size: size,
            inv_render_target_size: size.recip(),
            near_z,
            far_z,
            total_time: input.total_time,
            delta_time: input.delta_time,
            ambient_light: input.ambient,
            lights,
            light_count: light_count as u32,
            _pad1: [0; 3],
        }
    }
}

/// Per-object constants, one element per render item.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ObjectConstants {
    /// Object-to-world transform.
    pub world: Mat4,
    /// Texture coordinate transform.
    pub texture_transform: Mat4,
    /// Material slot.
    pub material_index: u32,
    pub _pad: [u32; 3],
}

impl From<&RenderItem> for ObjectConstants {
    fn from(item: &RenderItem) -> Self {
        Self {
            world: item.world(),
            texture_transform: item.texture_transform(),
            material_index: item.material().index() as u32,
            _pad: [0; 3],
        }
    }
}

/// Per-material constants.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub diffuse_albedo: Vec4,
    pub fresnel_r0: Vec3,
    pub roughness: f32,
    pub transform: Mat4,
}

impl From<&Material> for MaterialConstants {
    fn from(material: &Material) -> Self {
        Self {
            diffuse_albedo: material.diffuse_albedo,
            fresnel_r0: material.fresnel_r0,
            roughness: material.roughness,
            transform: material.transform,
        }
    }
}

/// One element of the shared instance buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub world: Mat4,
    pub texture_transform: Mat4,
    pub material_index: u32,
    pub _pad: [u32; 3],
}

impl From<&Instance> for InstanceData {
    fn from(instance: &Instance) -> Self {
        Self {
            world: instance.world,
            texture_transform: instance.texture_transform,
            material_index: instance.material.index() as u32,
            _pad: [0; 3],
        }
    }
}
