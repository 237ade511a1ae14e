//! Vulkan logical device.
//!
//! [`VulkanDevice`] creates the instance, picks a GPU, creates a logical device
//! with timeline semaphores and buffer device addresses enabled, and sets up
//! gpu-allocator. Resources created from it keep the logical device alive
//! through a shared [`LogicalDevice`], so destruction order never depends on
//! the order the caller drops things in.

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::backend::GpuDevice;
use crate::error::{RhiError, RhiResult};

use super::command::{VulkanCommandAllocator, VulkanCommandList};
use super::instance::Instance;
use super::memory::{VulkanBuffer, VulkanMesh};
use super::physical_device::{PhysicalDeviceInfo, select_physical_device};
use super::sync::{VulkanQueue, VulkanTimeline};
use super::VulkanPipeline;

/// Logical device shared by every resource created from it.
pub struct LogicalDevice {
    device: ash::Device,
    /// Dropped before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_family: u32,
    graphics_queue: vk::Queue,
    /// Destroyed after the device.
    _instance: Instance,
}

impl LogicalDevice {
    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Returns the graphics queue family index.
    #[inline]
    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device is Send + Sync, queue handles are plain handles and
// the allocator is behind a Mutex. Queue submission is serialized by VulkanQueue.
unsafe impl Send for LogicalDevice {}
unsafe impl Sync for LogicalDevice {}

/// Vulkan implementation of [`GpuDevice`].
pub struct VulkanDevice {
    logical: Arc<LogicalDevice>,
    info: PhysicalDeviceInfo,
    name: String,
}

impl VulkanDevice {
    /// Creates an instance, selects a GPU and creates the logical device.
    ///
    /// # Arguments
    ///
    /// * `enable_validation` - Enables the Khronos validation layer when available
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::LoadingError`] without a Vulkan loader,
    /// [`RhiError::NoSuitableGpu`] if no device qualifies, or the error of the
    /// failing Vulkan or allocator call.
    pub fn new(enable_validation: bool) -> RhiResult<Arc<Self>> {
        let instance = Instance::new(enable_validation)?;
        let info = select_physical_device(instance.handle())?;

        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(info.graphics_family)
            .queue_priorities(&queue_priorities)];

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .buffer_device_address(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .push_next(&mut features_1_2);

        let device = unsafe {
            instance
                .handle()
                .create_device(info.device, &create_info, None)?
        };

        info!("Logical device created");

        let graphics_queue = unsafe { device.get_device_queue(info.graphics_family, 0) };
        debug!(
            "Graphics queue retrieved from family {}",
            info.graphics_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: info.device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        let name = info.device_name().to_string();
        Ok(Arc::new(Self {
            logical: Arc::new(LogicalDevice {
                device,
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
                graphics_family: info.graphics_family,
                graphics_queue,
                _instance: instance,
            }),
            info,
            name,
        }))
    }

    /// Returns the shared logical device.
    #[inline]
    pub fn logical(&self) -> &Arc<LogicalDevice> {
        &self.logical
    }

    /// Returns the selected physical device.
    #[inline]
    pub fn physical_device_info(&self) -> &PhysicalDeviceInfo {
        &self.info
    }

    /// Waits for the device to become idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.logical.handle().device_wait_idle() }
            .map_err(|e| RhiError::from_vk(e, "device wait idle"))
    }

    /// Creates mesh buffers from raw vertex bytes and 32-bit indices.
    ///
    /// # Errors
    ///
    /// Returns an error if buffer creation fails.
    pub fn create_mesh(&self, name: &str, vertices: &[u8], indices: &[u32]) -> RhiResult<VulkanMesh> {
        VulkanMesh::new(&self.logical, name, vertices, indices)
    }
}

impl GpuDevice for VulkanDevice {
    type Memory = VulkanBuffer;
    type Allocator = VulkanCommandAllocator;
    type CommandList = VulkanCommandList;
    type Timeline = VulkanTimeline;
    type Queue = VulkanQueue;
    type Pipeline = VulkanPipeline;
    type Mesh = VulkanMesh;

    fn name(&self) -> &str {
        &self.name
    }

    fn create_upload_memory(&self, label: &str, size: u64) -> RhiResult<VulkanBuffer> {
        VulkanBuffer::new(
            &self.logical,
            label,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        )
    }

    fn create_command_allocator(&self) -> RhiResult<VulkanCommandAllocator> {
        VulkanCommandAllocator::new(&self.logical)
    }

    fn create_command_list(
        &self,
        allocator: &mut VulkanCommandAllocator,
    ) -> RhiResult<VulkanCommandList> {
        VulkanCommandList::new(&self.logical, allocator)
    }

    fn create_timeline(&self, initial_value: u64) -> RhiResult<VulkanTimeline> {
        VulkanTimeline::new(&self.logical, initial_value)
    }
}
