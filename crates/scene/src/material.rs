//! Surface materials.

use glam::{Mat4, Vec3, Vec4};

use crate::dirty::PropagationWindow;
use crate::render_item::MaterialId;

/// Material parameters supplied when registering a material.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialDesc {
    /// Debug name
    pub name: String,
    /// Base color and opacity
    pub diffuse_albedo: Vec4,
    /// Reflectance at normal incidence
    pub fresnel_r0: Vec3,
    /// 0 = mirror, 1 = fully rough
    pub roughness: f32,
    /// Texture coordinate transform
    pub transform: Mat4,
}

impl Default for MaterialDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            diffuse_albedo: Vec4::ONE,
            fresnel_r0: Vec3::splat(0.01),
            roughness: 0.25,
            transform: Mat4::IDENTITY,
        }
    }
}

/// A registered material.
///
/// Obtained mutably through
/// [`RenderItemRegistry::material_mut`](crate::RenderItemRegistry::material_mut),
/// which restarts its propagation window.
#[derive(Clone, Debug)]
pub struct Material {
    id: MaterialId,
    /// Debug name
    pub name: String,
    /// Base color and opacity
    pub diffuse_albedo: Vec4,
    /// Reflectance at normal incidence
    pub fresnel_r0: Vec3,
    /// 0 = mirror, 1 = fully rough
    pub roughness: f32,
    /// Texture coordinate transform
    pub transform: Mat4,
    window: PropagationWindow,
}

impl Material {
    pub(crate) fn new(id: MaterialId, desc: MaterialDesc, frames: u32) -> Self {
        Self {
            id,
            name: desc.name,
            diffuse_albedo: desc.diffuse_albedo,
            fresnel_r0: desc.fresnel_r0,
            roughness: desc.roughness,
            transform: desc.transform,
            window: PropagationWindow::new(frames),
        }
    }

    /// Material ID.
    #[inline]
    pub fn id(&self) -> MaterialId {
        self.id
    }

    /// Index of the material's element in the material constant buffer.
    #[inline]
    pub fn slot(&self) -> usize {
        self.id.index()
    }

    /// Propagation state.
    #[inline]
    pub fn window(&self) -> &PropagationWindow {
        &self.window
    }

    pub(crate) fn window_mut(&mut self) -> &mut PropagationWindow {
        &mut self.window
    }
}
