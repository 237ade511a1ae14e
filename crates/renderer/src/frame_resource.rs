//! Per-frame GPU resources.
//!
//! A [`FrameResource`] owns everything the CPU writes while recording one frame:
//! a command allocator and list, and upload buffers for pass, object, material
//! and instance data. The ring reuses a resource only after the fence value
//! stamped on it has completed.

use std::fmt;

use tracing::debug;

use inflight_core::RendererConfig;
use inflight_rhi::{
    CommandAllocator, CommandList, ElementLayout, GpuDevice, MappedMemory, RhiResult,
    UploadBuffer,
};
use inflight_scene::RegistryCapacity;

use crate::constants::{InstanceData, MaterialConstants, ObjectConstants, PassConstants};

/// Lifecycle of a ring slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Free for the next acquire.
    Idle,
    /// Acquired; the CPU is writing it.
    Recording,
    /// Handed to the GPU under a fence value.
    Submitted,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotState::Idle => "idle",
            SlotState::Recording => "recording",
            SlotState::Submitted => "submitted",
        };
        f.write_str(name)
    }
}

/// Element counts of the per-frame upload buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameResourceDesc {
    /// Object constant slots.
    pub objects: u32,
    /// Material constant slots.
    pub materials: u32,
    /// Shared instance buffer elements.
    pub instances: u32,
}

impl FrameResourceDesc {
    /// Takes the capacities from the renderer configuration.
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            objects: config.max_objects,
            materials: config.max_materials,
            instances: config.max_instances,
        }
    }

    /// Whether a registry of `capacity` fits in these buffers.
    pub fn fits(&self, capacity: RegistryCapacity) -> bool {
        capacity.objects <= self.objects
            && capacity.materials <= self.materials
            && capacity.instances <= self.instances
    }
}

impl From<FrameResourceDesc> for RegistryCapacity {
    fn from(desc: FrameResourceDesc) -> Self {
        RegistryCapacity {
            objects: desc.objects,
            materials: desc.materials,
            instances: desc.instances,
        }
    }
}

/// Upload buffers of one frame resource.
///
/// Fields are public so the upload pass can write several buffers at once.
pub struct FrameBuffers<M: MappedMemory> {
    /// Per-pass constants. Always a single element.
    pub pass: UploadBuffer<PassConstants, M>,
    /// Per-object constants, indexed by object slot.
    pub objects: UploadBuffer<ObjectConstants, M>,
    /// Per-material constants, indexed by material slot.
    pub materials: UploadBuffer<MaterialConstants, M>,
    /// Instance records, indexed by instance range.
    pub instances: UploadBuffer<InstanceData, M>,
}

impl<M: MappedMemory> FrameBuffers<M> {
    fn new<D>(device: &D, index: usize, desc: &FrameResourceDesc) -> RhiResult<Self>
    where
        D: GpuDevice<Memory = M>,
    {
        Ok(Self {
            pass: UploadBuffer::new(
                device,
                &format!("frame{index}.pass"),
                1,
                ElementLayout::ConstantBuffer,
            )?,
            objects: UploadBuffer::new(
                device,
                &format!("frame{index}.objects"),
                desc.objects as usize,
                ElementLayout::ConstantBuffer,
            )?,
            materials: UploadBuffer::new(
                device,
                &format!("frame{index}.materials"),
                desc.materials as usize,
                ElementLayout::ConstantBuffer,
            )?,
            instances: UploadBuffer::new(
                device,
                &format!("frame{index}.instances"),
                desc.instances as usize,
                ElementLayout::Structured,
            )?,
        })
    }
}

/// One slot of the frame ring.
pub struct FrameResource<D: GpuDevice> {
    index: usize,
    allocator: D::Allocator,
    command_list: D::CommandList,
    buffers: FrameBuffers<D::Memory>,
    /// Fence value of the last submission from this slot, `0` if never submitted.
    fence: u64,
    state: SlotState,
}

impl<D: GpuDevice> FrameResource<D> {
    /// Creates the allocator, command list and upload buffers of slot `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if any GPU object cannot be created.
    pub fn new(device: &D, index: usize, desc: &FrameResourceDesc) -> RhiResult<Self> {
        let mut allocator = device.create_command_allocator()?;
        let command_list = device.create_command_list(&mut allocator)?;
        let buffers = FrameBuffers::new(device, index, desc)?;

        debug!(
            "Frame resource {} created ({} objects, {} materials, {} instances)",
            index, desc.objects, desc.materials, desc.instances
        );

        Ok(Self {
            index,
            allocator,
            command_list,
            buffers,
            fence: 0,
            state: SlotState::Idle,
        })
    }

    /// Resets the allocator and opens the command list for recording.
    ///
    /// The caller must have established that [`FrameResource::fence`] completed.
    ///
    /// # Errors
    ///
    /// Returns an error if either reset fails.
    pub fn begin_recording(&mut self) -> RhiResult<&mut D::CommandList> {
        self.allocator.reset()?;
        self.command_list.reset(&mut self.allocator)?;
        Ok(&mut self.command_list)
    }

    /// Position in the ring.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Fence value stamped by the last submission.
    #[inline]
    pub fn fence(&self) -> u64 {
        self.fence
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Upload buffers.
    #[inline]
    pub fn buffers(&self) -> &FrameBuffers<D::Memory> {
        &self.buffers
    }

    /// Upload buffers, writable.
    #[inline]
    pub fn buffers_mut(&mut self) -> &mut FrameBuffers<D::Memory> {
        &mut self.buffers
    }

    /// Command list of this slot.
    #[inline]
    pub fn command_list(&self) -> &D::CommandList {
        &self.command_list
    }

    /// Command list and buffers together, for recording draws that bind
    /// this slot's constants.
    #[inline]
    pub fn recording_parts(&mut self) -> (&mut D::CommandList, &FrameBuffers<D::Memory>) {
        (&mut self.command_list, &self.buffers)
    }

    pub(crate) fn set_state(&mut self, state: SlotState) {
        self.state = state;
    }

    pub(crate) fn set_fence(&mut self, value: u64) {
        self.fence = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inflight_rhi::headless::{self, CompletionPolicy};

    fn desc() -> FrameResourceDesc {
        FrameResourceDesc {
            objects: 8,
            materials: 4,
            instances: 16,
        }
    }

    #[test]
    fn test_new_resource_is_idle() {
        let context = headless::context(CompletionPolicy::Manual);
        let frame = FrameResource::new(context.device().as_ref(), 1, &desc()).unwrap();

        assert_eq!(frame.index(), 1);
        assert_eq!(frame.fence(), 0);
        assert_eq!(frame.state(), SlotState::Idle);
        assert_eq!(frame.buffers().pass.len(), 1);
        assert_eq!(frame.buffers().objects.len(), 8);
        assert_eq!(frame.buffers().materials.len(), 4);
        assert_eq!(frame.buffers().instances.len(), 16);
    }

    #[test]
    fn test_buffer_layouts() {
        let context = headless::context(CompletionPolicy::Manual);
        let frame = FrameResource::new(context.device().as_ref(), 0, &desc()).unwrap();

        assert_eq!(frame.buffers().objects.stride(), 256);
        assert_eq!(frame.buffers().materials.stride(), 256);
        assert_eq!(frame.buffers().pass.stride(), 1280);
        assert_eq!(
            frame.buffers().instances.stride(),
            std::mem::size_of::<InstanceData>() as u64
        );
    }

    #[test]
    fn test_begin_recording_opens_list() {
        let context = headless::context(CompletionPolicy::Manual);
        let mut frame = FrameResource::new(context.device().as_ref(), 0, &desc()).unwrap();

        let list = frame.begin_recording().unwrap();
        assert!(list.is_recording());
    }

    #[test]
    fn test_desc_fits() {
        let desc = desc();
        assert!(desc.fits(RegistryCapacity::from(desc)));
        assert!(!desc.fits(RegistryCapacity {
            objects: 9,
            ..RegistryCapacity::from(desc)
        }));
    }

    #[test]
    fn test_desc_from_config() {
        let desc = FrameResourceDesc::from_config(&RendererConfig::default());
        assert_eq!(desc.objects, 256);
        assert_eq!(desc.materials, 64);
        assert_eq!(desc.instances, 4096);
    }
}
