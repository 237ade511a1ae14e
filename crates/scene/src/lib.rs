//! Scene data consumed by the frame pipeline.
//!
//! This crate provides:
//! - Render items, materials and their registry
//! - Dirty propagation across frames in flight
//! - Camera, lights, transforms and per-pass inputs

pub mod camera;
pub mod dirty;
mod error;
pub mod light;
pub mod material;
pub mod pass;
pub mod registry;
pub mod render_item;
pub mod transform;

pub use camera::{Camera, Projection};
pub use dirty::PropagationWindow;
pub use error::{SceneError, SceneResult};
pub use light::Light;
pub use material::{Material, MaterialDesc};
pub use pass::PassInput;
pub use registry::{RegistryCapacity, RenderItemRegistry, UploadCounts};
pub use render_item::{
    DrawArgs, Instance, ItemId, MaterialId, MeshId, RenderItem, RenderItemDesc, RenderLayer,
};
pub use transform::Transform;
