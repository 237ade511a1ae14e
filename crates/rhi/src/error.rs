//! RHI-specific error types.
//!
//! Every variant is fatal for the render loop: nothing in the frame pipeline
//! retries GPU work. Index and protocol violations are not represented here,
//! they panic at the call site.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// The device was removed or reset; all GPU state is gone
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// A fence wait exceeded the configured watchdog
    #[error("GPU hang: fence {target} not reached (completed {completed})")]
    FenceTimeout {
        /// Value the CPU was waiting for.
        target: u64,
        /// Last value the GPU had completed when the watchdog fired.
        completed: u64,
    },

    /// A buffer or pool was requested with an unusable size
    #[error("Invalid capacity for {what}: {requested}")]
    InvalidCapacity {
        /// What was being allocated.
        what: String,
        /// Requested element or byte count.
        requested: u64,
    },

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
}

impl RhiError {
    /// Maps a raw Vulkan result, singling out device loss.
    pub fn from_vk(result: ash::vk::Result, context: &str) -> Self {
        match result {
            ash::vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost(context.to_string()),
            other => Self::VulkanError(other),
        }
    }

    /// Whether the render loop must stop.
    ///
    /// Every RHI error is fatal; nothing in the frame pipeline retries GPU work.
    pub fn is_fatal(&self) -> bool {
        true
    }

    /// Whether the error means the device itself is gone.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            Self::DeviceLost(_) | Self::VulkanError(ash::vk::Result::ERROR_DEVICE_LOST)
        )
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn test_from_vk_device_lost() {
        let err = RhiError::from_vk(vk::Result::ERROR_DEVICE_LOST, "queue submit");
        assert!(err.is_device_lost());
        assert!(err.to_string().contains("queue submit"));
    }

    #[test]
    fn test_from_vk_other() {
        let err = RhiError::from_vk(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, "alloc");
        assert!(matches!(
            err,
            RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        ));
        assert!(!err.is_device_lost());
        assert!(err.is_fatal());
    }

    #[test]
    fn test_fence_timeout_message() {
        let err = RhiError::FenceTimeout {
            target: 4,
            completed: 1,
        };
        assert_eq!(err.to_string(), "GPU hang: fence 4 not reached (completed 1)");
    }
}
