//! GPU abstraction layer for the frame pipeline.
//!
//! This crate provides:
//! - Backend traits over devices, queues, command lists and timeline fences
//! - The CPU/GPU fence counter
//! - Typed upload buffers and slot handles
//! - A Vulkan backend built on `ash` and `gpu-allocator`
//! - A headless backend with a simulated GPU timeline

mod error;

pub mod backend;
pub mod context;
pub mod fence;
pub mod headless;
pub mod upload;
pub mod vulkan;

pub use backend::{
    CommandAllocator, CommandList, CommandQueue, DrawIndexed, GpuAddress, GpuDevice,
    MappedMemory, RootSlot, TimelineFence,
};
pub use context::GpuContext;
pub use error::{RhiError, RhiResult};
pub use fence::FenceCounter;
pub use upload::{
    CONSTANT_BUFFER_ALIGNMENT, ElementLayout, SlotHandle, UploadBuffer,
    constant_buffer_byte_size,
};

// Re-export ash types that users might need
pub use ash::vk;
