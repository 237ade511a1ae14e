//! Command pools and command buffers.
//!
//! One [`VulkanCommandAllocator`] wraps one command pool; resetting it resets
//! every command buffer allocated from it in one call. Constant bindings are
//! 64-bit buffer device addresses written into push constants, one per
//! [`RootSlot`], so the pipeline layout must declare [`push_constant_range`].

use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace};

use crate::backend::{CommandAllocator, CommandList, DrawIndexed, RootSlot};
use crate::error::{RhiError, RhiResult};
use crate::upload::SlotHandle;

use super::VulkanPipeline;
use super::device::LogicalDevice;
use super::memory::VulkanMesh;

/// Bytes of push constants used by constant bindings.
pub const PUSH_CONSTANT_SIZE: u32 = (RootSlot::COUNT * size_of::<u64>()) as u32;

/// Push constant range a pipeline layout must declare for constant bindings.
pub fn push_constant_range() -> vk::PushConstantRange {
    vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::ALL_GRAPHICS)
        .offset(0)
        .size(PUSH_CONSTANT_SIZE)
}

/// Push constant offset of a root parameter.
#[inline]
fn push_constant_offset(slot: RootSlot) -> u32 {
    (slot.index() * size_of::<u64>()) as u32
}

// ============================================================================
// Command allocator
// ============================================================================

/// Command pool on the graphics queue family.
pub struct VulkanCommandAllocator {
    device: Arc<LogicalDevice>,
    pool: vk::CommandPool,
}

impl VulkanCommandAllocator {
    pub(super) fn new(device: &Arc<LogicalDevice>) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.graphics_family())
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        debug!(
            "Command pool created for queue family {}",
            device.graphics_family()
        );

        Ok(Self {
            device: Arc::clone(device),
            pool,
        })
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }
}

impl CommandAllocator for VulkanCommandAllocator {
    fn reset(&mut self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(|e| RhiError::from_vk(e, "command pool reset"))
    }
}

impl Drop for VulkanCommandAllocator {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!("Command pool destroyed");
    }
}

// ============================================================================
// Command list
// ============================================================================

/// Primary command buffer allocated from a [`VulkanCommandAllocator`].
///
/// The buffer is freed together with its pool.
pub struct VulkanCommandList {
    device: Arc<LogicalDevice>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    layout: Option<vk::PipelineLayout>,
    recording: bool,
}

impl VulkanCommandList {
    pub(super) fn new(
        device: &Arc<LogicalDevice>,
        allocator: &VulkanCommandAllocator,
    ) -> RhiResult<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(allocator.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { device.handle().allocate_command_buffers(&alloc_info)? };
        let buffer = buffers
            .first()
            .copied()
            .ok_or_else(|| RhiError::InvalidHandle("no command buffer allocated".to_string()))?;

        Ok(Self {
            device: Arc::clone(device),
            pool: allocator.pool,
            buffer,
            layout: None,
            recording: false,
        })
    }

    /// Returns the Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Whether the buffer is recording.
    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    fn layout(&self) -> vk::PipelineLayout {
        match self.layout {
            Some(layout) => layout,
            None => panic!("constants bound before a pipeline"),
        }
    }
}

impl CommandList for VulkanCommandList {
    type Allocator = VulkanCommandAllocator;
    type Pipeline = VulkanPipeline;
    type Mesh = VulkanMesh;

    fn reset(&mut self, allocator: &mut VulkanCommandAllocator) -> RhiResult<()> {
        assert_eq!(
            self.pool, allocator.pool,
            "command list reset against a pool it was not allocated from"
        );
        if self.recording {
            return Err(RhiError::InvalidHandle(
                "command list reset while still recording".to_string(),
            ));
        }

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }

        self.layout = None;
        self.recording = true;
        trace!("Command buffer recording started");
        Ok(())
    }

    fn set_pipeline(&mut self, pipeline: &VulkanPipeline) {
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.pipeline,
            );
        }
        self.layout = Some(pipeline.layout);
    }

    fn bind_constants(&mut self, slot: RootSlot, handle: SlotHandle) {
        let address = handle.address().get().to_ne_bytes();
        unsafe {
            self.device.handle().cmd_push_constants(
                self.buffer,
                self.layout(),
                vk::ShaderStageFlags::ALL_GRAPHICS,
                push_constant_offset(slot),
                &address,
            );
        }
    }

    fn bind_mesh(&mut self, mesh: &VulkanMesh) {
        unsafe {
            let device = self.device.handle();
            device.cmd_bind_vertex_buffers(self.buffer, 0, &[mesh.vertex_buffer()], &[0]);
            device.cmd_bind_index_buffer(
                self.buffer,
                mesh.index_buffer(),
                0,
                vk::IndexType::UINT32,
            );
        }
    }

    fn draw_indexed(&mut self, args: DrawIndexed) {
        unsafe {
            self.device.handle().cmd_draw_indexed(
                self.buffer,
                args.index_count,
                args.instance_count,
                args.first_index,
                args.base_vertex,
                args.first_instance,
            );
        }
    }

    fn close(&mut self) -> RhiResult<()> {
        if !self.recording {
            return Err(RhiError::InvalidHandle(
                "closing a command list that is not recording".to_string(),
            ));
        }
        unsafe { self.device.handle().end_command_buffer(self.buffer)? };
        self.recording = false;
        Ok(())
    }
}
