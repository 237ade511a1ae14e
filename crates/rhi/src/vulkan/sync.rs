//! Timeline semaphores and queue submission.
//!
//! The fence counter maps onto a Vulkan timeline semaphore: the queue signals a
//! value with an empty submit carrying `VkTimelineSemaphoreSubmitInfo`, and the
//! CPU waits with `vkWaitSemaphores`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, trace};

use crate::backend::{CommandQueue, TimelineFence};
use crate::error::{RhiError, RhiResult};

use super::command::VulkanCommandList;
use super::device::{LogicalDevice, VulkanDevice};

/// Timeline semaphore.
pub struct VulkanTimeline {
    device: Arc<LogicalDevice>,
    semaphore: vk::Semaphore,
}

impl VulkanTimeline {
    pub(super) fn new(device: &Arc<LogicalDevice>, initial_value: u64) -> RhiResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created timeline semaphore (initial value {})", initial_value);

        Ok(Self {
            device: Arc::clone(device),
            semaphore,
        })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl TimelineFence for VulkanTimeline {
    fn completed_value(&self) -> RhiResult<u64> {
        unsafe { self.device.handle().get_semaphore_counter_value(self.semaphore) }
            .map_err(|e| RhiError::from_vk(e, "timeline semaphore query"))
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> RhiResult<bool> {
        let timeout_ns = timeout.map_or(u64::MAX, |t| {
            u64::try_from(t.as_nanos()).unwrap_or(u64::MAX)
        });
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        match unsafe { self.device.handle().wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(RhiError::from_vk(e, "timeline semaphore wait")),
        }
    }
}

impl Drop for VulkanTimeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed timeline semaphore");
    }
}

/// Graphics queue.
pub struct VulkanQueue {
    device: Arc<LogicalDevice>,
    queue: vk::Queue,
    /// vkQueueSubmit requires external synchronization.
    submit_lock: Mutex<()>,
}

// Safety: the queue handle is only used under `submit_lock`.
unsafe impl Send for VulkanQueue {}
unsafe impl Sync for VulkanQueue {}

impl VulkanQueue {
    /// Wraps the device's graphics queue.
    pub fn new(device: &Arc<VulkanDevice>) -> Arc<Self> {
        let logical = Arc::clone(device.logical());
        let queue = logical.graphics_queue();
        info!("Graphics queue ready (family {})", logical.graphics_family());
        Arc::new(Self {
            device: logical,
            queue,
            submit_lock: Mutex::new(()),
        })
    }

    fn submit(&self, submit: vk::SubmitInfo<'_>, context: &str) -> RhiResult<()> {
        let _guard = self
            .submit_lock
            .lock()
            .map_err(|_| RhiError::DeviceLost(format!("{context}: queue lock poisoned")))?;
        unsafe {
            self.device
                .handle()
                .queue_submit(self.queue, &[submit], vk::Fence::null())
        }
        .map_err(|e| RhiError::from_vk(e, context))
    }
}

impl CommandQueue for VulkanQueue {
    type CommandList = VulkanCommandList;
    type Timeline = VulkanTimeline;

    fn execute(&self, lists: &[&VulkanCommandList]) -> RhiResult<()> {
        if lists.iter().any(|list| list.is_recording()) {
            return Err(RhiError::InvalidHandle(
                "executing a command list that was not closed".to_string(),
            ));
        }
        let buffers: Vec<vk::CommandBuffer> = lists.iter().map(|list| list.handle()).collect();
        let submit = vk::SubmitInfo::default().command_buffers(&buffers);
        self.submit(submit, "queue submit")?;
        trace!("Submitted {} command buffer(s)", buffers.len());
        Ok(())
    }

    fn signal(&self, timeline: &VulkanTimeline, value: u64) -> RhiResult<()> {
        let semaphores = [timeline.handle()];
        let values = [value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&values);
        let submit = vk::SubmitInfo::default()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info);
        self.submit(submit, "timeline signal")
    }
}
