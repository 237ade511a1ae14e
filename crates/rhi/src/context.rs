//! Explicit GPU context.
//!
//! Owns the device and its submission queue. Everything that talks to the GPU
//! receives a [`GpuContext`] instead of reaching for process-wide state.

use std::sync::Arc;

use crate::backend::GpuDevice;

/// Device and queue shared by the frame pipeline.
pub struct GpuContext<D: GpuDevice> {
    device: Arc<D>,
    queue: Arc<D::Queue>,
}

impl<D: GpuDevice> GpuContext<D> {
    /// Bundles a device with the queue work is submitted to.
    pub fn new(device: Arc<D>, queue: Arc<D::Queue>) -> Self {
        Self { device, queue }
    }

    /// Returns the device.
    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Returns the submission queue.
    #[inline]
    pub fn queue(&self) -> &Arc<D::Queue> {
        &self.queue
    }
}

impl<D: GpuDevice> Clone for GpuContext<D> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
            queue: Arc::clone(&self.queue),
        }
    }
}
