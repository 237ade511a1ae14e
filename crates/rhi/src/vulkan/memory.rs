//! Host-visible buffers.
//!
//! Every buffer here lives in `CpuToGpu` memory and stays mapped for its whole
//! lifetime. Upload buffers are bound by device address; mesh buffers are bound
//! as vertex and index buffers.

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::backend::{GpuAddress, MappedMemory};
use crate::error::{RhiError, RhiResult};

use super::device::LogicalDevice;

/// Persistently mapped Vulkan buffer.
pub struct VulkanBuffer {
    device: Arc<LogicalDevice>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    mapped: NonNull<u8>,
    size: u64,
    address: GpuAddress,
    label: String,
}

// Safety: the mapped pointer is only dereferenced through &self / &mut self,
// and the allocation it points into is owned by this buffer.
unsafe impl Send for VulkanBuffer {}
unsafe impl Sync for VulkanBuffer {}

impl VulkanBuffer {
    /// Creates a mapped buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidCapacity`] for a zero size, or the error of the
    /// failing Vulkan or allocator call.
    pub fn new(
        device: &Arc<LogicalDevice>,
        label: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidCapacity {
                what: label.to_string(),
                requested: 0,
            });
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = device.handle();
        let buffer = unsafe { handle.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { handle.get_buffer_memory_requirements(buffer) };

        let allocation = device
            .allocator()
            .lock()
            .map_err(|_| RhiError::InvalidHandle("allocator mutex poisoned".to_string()))
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: label,
                        requirements,
                        location: MemoryLocation::CpuToGpu,
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(RhiError::from)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { handle.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // From here on Drop releases the buffer and allocation.
        let mut this = Self {
            device: Arc::clone(device),
            buffer,
            mapped: NonNull::dangling(),
            allocation: None,
            size,
            address: GpuAddress::default(),
            label: label.to_string(),
        };

        let mapped = allocation.mapped_ptr().map(|p| p.cast::<u8>());
        // SAFETY: the buffer is not bound yet and the allocation was made for its
        // requirements. The allocation is freed in Drop, after the buffer is.
        let bound = unsafe {
            handle.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        this.allocation = Some(allocation);
        bound?;

        this.mapped = mapped.ok_or_else(|| {
            RhiError::InvalidHandle(format!("{label}: CpuToGpu allocation is not mapped"))
        })?;

        if usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
            this.address = GpuAddress(unsafe { handle.get_buffer_device_address(&info) });
        }

        debug!(
            "Created buffer '{}': {} bytes at {:#x}",
            label,
            size,
            this.address.get()
        );

        Ok(this)
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl MappedMemory for VulkanBuffer {
    #[inline]
    fn gpu_address(&self) -> GpuAddress {
        self.address
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.mapped.as_ptr(), self.size as usize) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.mapped.as_ptr(), self.size as usize) }
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator().lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer allocation: {:?}", e);
                    }
                }
                Err(_) => error!("Allocator mutex poisoned, leaking '{}'", self.label),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed buffer '{}'", self.label);
    }
}

/// Vertex and index buffers of one mesh.
pub struct VulkanMesh {
    vertices: VulkanBuffer,
    indices: VulkanBuffer,
    index_count: u32,
}

impl VulkanMesh {
    pub(super) fn new(
        device: &Arc<LogicalDevice>,
        name: &str,
        vertices: &[u8],
        indices: &[u32],
    ) -> RhiResult<Self> {
        let mut vertex_buffer = VulkanBuffer::new(
            device,
            &format!("{name} vertices"),
            vertices.len() as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        vertex_buffer.bytes_mut().copy_from_slice(vertices);

        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let mut index_buffer = VulkanBuffer::new(
            device,
            &format!("{name} indices"),
            index_bytes.len() as u64,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        index_buffer.bytes_mut().copy_from_slice(index_bytes);

        Ok(Self {
            vertices: vertex_buffer,
            indices: index_buffer,
            index_count: indices.len() as u32,
        })
    }

    /// Vertex buffer handle.
    #[inline]
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertices.handle()
    }

    /// Index buffer handle (32-bit indices).
    #[inline]
    pub fn index_buffer(&self) -> vk::Buffer {
        self.indices.handle()
    }

    /// Number of indices.
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::{VulkanDevice, is_unavailable};

    #[test]
    fn test_buffer_bound_and_mapped() {
        let device = match VulkanDevice::new(false) {
            Ok(device) => device,
            Err(e) if is_unavailable(&e) => {
                eprintln!("Skipping test: Vulkan not available ({e})");
                return;
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        };

        let mut buffer = VulkanBuffer::new(
            device.logical(),
            "bound",
            64,
            vk::BufferUsageFlags::STORAGE_BUFFER,
        )
        .unwrap();
        buffer.bytes_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);

        assert_ne!(buffer.handle(), vk::Buffer::null());
        assert_eq!(buffer.size(), 64);
        assert_eq!(&buffer.bytes()[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_size_rejected() {
        let device = match VulkanDevice::new(false) {
            Ok(device) => device,
            Err(e) if is_unavailable(&e) => {
                eprintln!("Skipping test: Vulkan not available ({e})");
                return;
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        };

        let result = VulkanBuffer::new(
            device.logical(),
            "empty",
            0,
            vk::BufferUsageFlags::STORAGE_BUFFER,
        );
        assert!(matches!(result, Err(RhiError::InvalidCapacity { .. })));
    }
}
