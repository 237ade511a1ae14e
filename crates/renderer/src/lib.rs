//! Frame pipelining for the renderer.
//!
//! This crate orchestrates the CPU side of each frame:
//! - A ring of frame resources reused only after their fence completes
//! - The per-frame upload of pass, object, material and instance constants
//! - Command recording and submission
//! - The [`FrameRenderer`] driver tying them together

pub mod constants;
pub mod frame_resource;
pub mod frame_ring;
pub mod renderer;
pub mod submission;
pub mod upload_pass;

pub use constants::{
    GpuLight, InstanceData, MAX_LIGHTS, MaterialConstants, ObjectConstants, PassConstants,
};
pub use frame_resource::{FrameBuffers, FrameResource, FrameResourceDesc, SlotState};
pub use frame_ring::FrameRing;
pub use renderer::{FrameRenderer, FrameStats, FrameToken};
pub use submission::{PipelineSet, record_draws};
pub use upload_pass::upload_frame;
