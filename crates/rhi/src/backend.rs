//! Backend traits for the frame pipeline.
//!
//! The frame pipeline only ever talks to a GPU through these traits. Two
//! implementations ship with the crate:
//!
//! - [`crate::vulkan`] drives a real device through ash and gpu-allocator.
//! - [`crate::headless`] simulates the GPU timeline in software, used by tests
//!   and by the demo when no GPU is wanted.
//!
//! # Overview
//!
//! - [`GpuDevice`] creates upload memory, command allocators and lists, and
//!   timeline fences. It names every other backend type through associated
//!   types, so generic code only carries one type parameter.
//! - [`CommandQueue`] executes closed command lists and enqueues fence signals.
//! - [`TimelineFence`] is a monotonically increasing `u64` that the GPU
//!   advances and the CPU can wait on.
//! - [`CommandAllocator`] and [`CommandList`] follow the reset-then-record
//!   model: an allocator may only be reset once the GPU has finished every
//!   list recorded from it.

use std::fmt::Debug;
use std::time::Duration;

use crate::error::RhiResult;
use crate::upload::SlotHandle;

/// GPU virtual address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GpuAddress(pub u64);

impl GpuAddress {
    /// Returns the address `bytes` past this one.
    #[inline]
    pub fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }

    /// Returns the raw address.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Root parameter a constant binding is routed to.
///
/// Mirrors the root signature of the frame pipeline: one binding per
/// parameter, each pointing at a single element of an upload buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RootSlot {
    /// Per-pass constants (camera, lights, timing).
    Pass,
    /// Per-object constants (world and texture transforms).
    Object,
    /// Per-material constants.
    Material,
    /// First element of the item's instance range.
    Instances,
}

impl RootSlot {
    /// Number of root parameters.
    pub const COUNT: usize = 4;

    /// Position of the parameter in the root layout.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            RootSlot::Pass => 0,
            RootSlot::Object => 1,
            RootSlot::Material => 2,
            RootSlot::Instances => 3,
        }
    }
}

/// Arguments of an indexed draw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawIndexed {
    /// Number of indices to draw.
    pub index_count: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// First index in the bound index buffer.
    pub first_index: u32,
    /// Value added to each index before fetching vertices.
    pub base_vertex: i32,
    /// First instance ID.
    pub first_instance: u32,
}

/// Persistently mapped, CPU-writable and GPU-readable memory.
pub trait MappedMemory: Send {
    /// GPU address of the first byte.
    fn gpu_address(&self) -> GpuAddress;

    /// Mapped bytes.
    fn bytes(&self) -> &[u8];

    /// Mapped bytes, writable.
    ///
    /// The caller guarantees the GPU is not reading this memory.
    fn bytes_mut(&mut self) -> &mut [u8];
}

/// Backing storage for recorded commands.
pub trait CommandAllocator: Send {
    /// Reclaims the storage of every list recorded from this allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to reset the allocator.
    fn reset(&mut self) -> RhiResult<()>;
}

/// A command list recorded on the CPU and executed by a [`CommandQueue`].
pub trait CommandList: Send {
    /// Allocator the list records into.
    type Allocator: CommandAllocator;
    /// Pipeline state object.
    type Pipeline;
    /// Vertex and index buffers of a mesh.
    type Mesh;

    /// Opens the list for recording against `allocator`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to begin recording.
    fn reset(&mut self, allocator: &mut Self::Allocator) -> RhiResult<()>;

    /// Binds a pipeline state object.
    fn set_pipeline(&mut self, pipeline: &Self::Pipeline);

    /// Points a root parameter at one element of an upload buffer.
    fn bind_constants(&mut self, slot: RootSlot, handle: SlotHandle);

    /// Binds vertex and index buffers.
    fn bind_mesh(&mut self, mesh: &Self::Mesh);

    /// Records an indexed draw.
    fn draw_indexed(&mut self, args: DrawIndexed);

    /// Finishes recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the list was not recording or the backend rejects it.
    fn close(&mut self) -> RhiResult<()>;
}

/// Monotonic GPU timeline the CPU can wait on.
pub trait TimelineFence: Send + Sync {
    /// Highest value the GPU has completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is lost.
    fn completed_value(&self) -> RhiResult<u64>;

    /// Blocks until the completed value reaches `value`.
    ///
    /// `None` waits forever. Returns `Ok(false)` if `timeout` expired first.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is lost.
    fn wait(&self, value: u64, timeout: Option<Duration>) -> RhiResult<bool>;
}

/// GPU queue executing command lists in submission order.
pub trait CommandQueue: Send + Sync {
    /// Command list type accepted by [`CommandQueue::execute`].
    type CommandList: CommandList;
    /// Fence type accepted by [`CommandQueue::signal`].
    type Timeline: TimelineFence;

    /// Submits closed command lists.
    ///
    /// # Errors
    ///
    /// Returns an error if submission fails. Device loss is reported as
    /// [`crate::RhiError::DeviceLost`].
    fn execute(&self, lists: &[&Self::CommandList]) -> RhiResult<()>;

    /// Enqueues a GPU-side signal of `value` after all previously submitted work.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be enqueued.
    fn signal(&self, timeline: &Self::Timeline, value: u64) -> RhiResult<()>;
}

/// A GPU device and the resource types it creates.
pub trait GpuDevice: Send + Sync + 'static {
    /// Upload memory.
    type Memory: MappedMemory;
    /// Command allocator.
    type Allocator: CommandAllocator;
    /// Command list.
    type CommandList: CommandList<
            Allocator = Self::Allocator,
            Pipeline = Self::Pipeline,
            Mesh = Self::Mesh,
        >;
    /// Timeline fence.
    type Timeline: TimelineFence;
    /// Queue.
    type Queue: CommandQueue<CommandList = Self::CommandList, Timeline = Self::Timeline>;
    /// Pipeline state object.
    type Pipeline: Debug + Send + Sync;
    /// Mesh buffers.
    type Mesh: Send + Sync;

    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Allocates `size` bytes of persistently mapped upload memory.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation or mapping fails.
    fn create_upload_memory(&self, label: &str, size: u64) -> RhiResult<Self::Memory>;

    /// Creates a command allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails.
    fn create_command_allocator(&self) -> RhiResult<Self::Allocator>;

    /// Creates a closed command list tied to `allocator`.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails.
    fn create_command_list(&self, allocator: &mut Self::Allocator)
    -> RhiResult<Self::CommandList>;

    /// Creates a timeline fence starting at `initial_value`.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails.
    fn create_timeline(&self, initial_value: u64) -> RhiResult<Self::Timeline>;
}
