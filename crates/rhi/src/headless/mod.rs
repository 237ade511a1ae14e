//! Software GPU backend.
//!
//! The headless backend implements every backend trait without a GPU. Memory
//! is a heap byte array with a synthetic GPU address, command lists record
//! [`RecordedCommand`]s, and the GPU timeline is a counter advanced according
//! to a [`CompletionPolicy`]:
//!
//! - [`CompletionPolicy::Immediate`] completes every signal as it is enqueued.
//! - [`CompletionPolicy::Manual`] leaves signals pending until the caller
//!   completes them with [`HeadlessQueue::complete_through`].
//! - [`CompletionPolicy::Worker`] completes signals on a background thread after
//!   a fixed per-submission latency, like a GPU running behind the CPU.
//!
//! The backend also checks the allocator protocol: resetting a command
//! allocator before the fence that follows its last execution has completed
//! panics.
//!
//! # Example
//!
//! ```
//! use inflight_rhi::backend::{CommandQueue, GpuDevice, TimelineFence};
//! use inflight_rhi::headless::{self, CompletionPolicy};
//!
//! # fn example() -> Result<(), inflight_rhi::RhiError> {
//! let context = headless::context(CompletionPolicy::Manual);
//! let timeline = context.device().create_timeline(0)?;
//!
//! context.queue().signal(&timeline, 1)?;
//! assert_eq!(timeline.completed_value()?, 0);
//!
//! context.queue().complete_through(1);
//! assert_eq!(timeline.completed_value()?, 1);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod command;
mod memory;
mod queue;
mod timeline;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::info;

use crate::backend::{GpuAddress, GpuDevice};
use crate::context::GpuContext;
use crate::error::{RhiError, RhiResult};

pub use command::{
    HeadlessCommandAllocator, HeadlessCommandList, HeadlessMesh, HeadlessPipeline,
    RecordedCommand,
};
pub use memory::HeadlessMemory;
pub use queue::{CompletionPolicy, ExecutedList, HeadlessQueue};
pub use timeline::HeadlessTimeline;

use timeline::TimelineState;

/// First synthetic GPU address handed out.
const ADDRESS_BASE: u64 = 0x1_0000_0000;

/// Granularity of synthetic allocations.
const ADDRESS_ALIGNMENT: u64 = 64 * 1024;

/// Creates a headless device and queue.
pub fn context(policy: CompletionPolicy) -> GpuContext<HeadlessDevice> {
    let device = HeadlessDevice::new();
    let queue = HeadlessQueue::new(&device, policy);
    GpuContext::new(device, queue)
}

/// State shared by a device, its queue, and its timelines.
#[derive(Default)]
struct Shared {
    lost: AtomicBool,
    blocking_waits: AtomicU64,
    timelines: Mutex<Vec<Weak<TimelineState>>>,
}

impl Shared {
    fn check_lost(&self) -> RhiResult<()> {
        if self.lost.load(Ordering::Acquire) {
            Err(RhiError::DeviceLost("headless device removed".to_string()))
        } else {
            Ok(())
        }
    }

    fn mark_lost(&self) {
        self.lost.store(true, Ordering::Release);
        let timelines = lock(&self.timelines);
        for timeline in timelines.iter().filter_map(Weak::upgrade) {
            timeline.wake_all();
        }
    }
}

/// Locks a mutex, ignoring poisoning.
///
/// The headless state stays consistent across a panicking holder, and the
/// protocol checks in this module panic on purpose.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Software GPU device.
pub struct HeadlessDevice {
    shared: Arc<Shared>,
    next_address: AtomicU64,
    next_allocator: AtomicU32,
}

impl HeadlessDevice {
    /// Creates a device.
    pub fn new() -> Arc<Self> {
        info!("Headless device created");
        Arc::new(Self {
            shared: Arc::new(Shared::default()),
            next_address: AtomicU64::new(ADDRESS_BASE),
            next_allocator: AtomicU32::new(0),
        })
    }

    /// Number of waits that had to block because the value was not reached.
    pub fn blocking_waits(&self) -> u64 {
        self.shared.blocking_waits.load(Ordering::Acquire)
    }

    /// Whether the device has been lost.
    pub fn is_lost(&self) -> bool {
        self.shared.lost.load(Ordering::Acquire)
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl GpuDevice for HeadlessDevice {
    type Memory = HeadlessMemory;
    type Allocator = HeadlessCommandAllocator;
    type CommandList = HeadlessCommandList;
    type Timeline = HeadlessTimeline;
    type Queue = HeadlessQueue;
    type Pipeline = HeadlessPipeline;
    type Mesh = HeadlessMesh;

    fn name(&self) -> &str {
        "headless"
    }

    fn create_upload_memory(&self, label: &str, size: u64) -> RhiResult<HeadlessMemory> {
        self.shared.check_lost()?;
        if size == 0 {
            return Err(RhiError::InvalidCapacity {
                what: label.to_string(),
                requested: 0,
            });
        }
        let reserved = size.div_ceil(ADDRESS_ALIGNMENT) * ADDRESS_ALIGNMENT;
        let address = self.next_address.fetch_add(reserved, Ordering::Relaxed);
        HeadlessMemory::new(label, GpuAddress(address), size)
    }

    fn create_command_allocator(&self) -> RhiResult<HeadlessCommandAllocator> {
        self.shared.check_lost()?;
        let id = self.next_allocator.fetch_add(1, Ordering::Relaxed);
        Ok(HeadlessCommandAllocator::new(id))
    }

    fn create_command_list(
        &self,
        allocator: &mut HeadlessCommandAllocator,
    ) -> RhiResult<HeadlessCommandList> {
        self.shared.check_lost()?;
        Ok(HeadlessCommandList::new(allocator))
    }

    fn create_timeline(&self, initial_value: u64) -> RhiResult<HeadlessTimeline> {
        self.shared.check_lost()?;
        let timeline = HeadlessTimeline::new(Arc::clone(&self.shared), initial_value);
        lock(&self.shared.timelines).push(Arc::downgrade(timeline.state()));
        Ok(timeline)
    }
}
