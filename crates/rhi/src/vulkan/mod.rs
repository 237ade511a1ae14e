//! Vulkan backend.
//!
//! Requires Vulkan 1.2 with timeline semaphores and buffer device addresses.
//! Pipelines are created by the caller and handed in as [`VulkanPipeline`];
//! their layouts must declare [`push_constant_range`] so constant bindings can
//! be pushed as device addresses. Draws are recorded as-is: opening a render
//! pass or dynamic rendering scope belongs to the render-target owner.
//!
//! # Example
//!
//! ```no_run
//! use inflight_rhi::fence::FenceCounter;
//! use inflight_rhi::vulkan;
//!
//! # fn example() -> Result<(), inflight_rhi::RhiError> {
//! let context = vulkan::context(cfg!(debug_assertions))?;
//! let mut fence = FenceCounter::new(&context, None)?;
//! fence.flush()?;
//! # Ok(())
//! # }
//! ```

mod command;
mod device;
mod instance;
mod memory;
mod physical_device;
mod sync;

use ash::vk;

use crate::context::GpuContext;
use crate::error::RhiResult;

pub use command::{
    PUSH_CONSTANT_SIZE, VulkanCommandAllocator, VulkanCommandList, push_constant_range,
};
pub use device::{LogicalDevice, VulkanDevice};
pub use instance::Instance;
pub use memory::{VulkanBuffer, VulkanMesh};
pub use physical_device::{PhysicalDeviceInfo, select_physical_device};
pub use sync::{VulkanQueue, VulkanTimeline};

/// Graphics pipeline created by the caller.
///
/// The pipeline is not owned: destroying it stays with whoever created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VulkanPipeline {
    /// Pipeline handle.
    pub pipeline: vk::Pipeline,
    /// Layout the pipeline was created with.
    pub layout: vk::PipelineLayout,
}

/// Creates a Vulkan device and its graphics queue.
///
/// # Errors
///
/// See [`VulkanDevice::new`].
pub fn context(enable_validation: bool) -> RhiResult<GpuContext<VulkanDevice>> {
    let device = VulkanDevice::new(enable_validation)?;
    let queue = VulkanQueue::new(&device);
    Ok(GpuContext::new(device, queue))
}

/// Whether an error only means this machine cannot run Vulkan.
#[cfg(test)]
pub(crate) fn is_unavailable(err: &crate::RhiError) -> bool {
    use crate::RhiError;
    matches!(
        err,
        RhiError::LoadingError(_)
            | RhiError::NoSuitableGpu
            | RhiError::VulkanError(
                vk::Result::ERROR_INCOMPATIBLE_DRIVER
                    | vk::Result::ERROR_INITIALIZATION_FAILED
                    | vk::Result::ERROR_LAYER_NOT_PRESENT
                    | vk::Result::ERROR_EXTENSION_NOT_PRESENT
            )
    )
}
