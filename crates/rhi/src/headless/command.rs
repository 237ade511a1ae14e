use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::backend::{CommandAllocator, CommandList, DrawIndexed, RootSlot};
use crate::error::{RhiError, RhiResult};
use crate::upload::SlotHandle;

use super::lock;
use super::timeline::TimelineState;

/// Named pipeline state for the headless backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadlessPipeline {
    name: String,
}

impl HeadlessPipeline {
    /// Creates a pipeline identified by `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Pipeline name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Mesh description for the headless backend. Holds no vertex data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadlessMesh {
    name: String,
    vertex_count: u32,
    index_count: u32,
}

impl HeadlessMesh {
    /// Creates a mesh description.
    pub fn new(name: impl Into<String>, vertex_count: u32, index_count: u32) -> Self {
        Self {
            name: name.into(),
            vertex_count,
            index_count,
        }
    }

    /// Mesh name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of vertices.
    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of indices.
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// A command captured by a [`HeadlessCommandList`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCommand {
    /// Pipeline bound by name.
    SetPipeline(String),
    /// Root parameter pointed at an upload buffer element.
    BindConstants {
        /// Root parameter.
        slot: RootSlot,
        /// Bound element.
        handle: SlotHandle,
    },
    /// Mesh bound by name.
    BindMesh(String),
    /// Indexed draw.
    DrawIndexed(DrawIndexed),
}

/// Fence value that retires the allocator's last execution.
#[derive(Default)]
pub(super) struct Retirement {
    pending: Option<(Arc<TimelineState>, u64)>,
}

pub(super) struct AllocatorState {
    pub(super) id: u32,
    pub(super) retirement: Mutex<Retirement>,
}

impl AllocatorState {
    pub(super) fn retire_at(&self, timeline: &Arc<TimelineState>, value: u64) {
        lock(&self.retirement).pending = Some((Arc::clone(timeline), value));
    }
}

/// Command allocator for the headless backend.
///
/// Resetting it while the fence that follows its last execution is still
/// pending panics.
pub struct HeadlessCommandAllocator {
    state: Arc<AllocatorState>,
    resets: u64,
}

impl HeadlessCommandAllocator {
    pub(super) fn new(id: u32) -> Self {
        Self {
            state: Arc::new(AllocatorState {
                id,
                retirement: Mutex::new(Retirement::default()),
            }),
            resets: 0,
        }
    }

    /// Allocator ID, unique per device.
    #[inline]
    pub fn id(&self) -> u32 {
        self.state.id
    }

    /// Number of successful resets.
    #[inline]
    pub fn reset_count(&self) -> u64 {
        self.resets
    }
}

impl CommandAllocator for HeadlessCommandAllocator {
    fn reset(&mut self) -> RhiResult<()> {
        let mut retirement = lock(&self.state.retirement);
        if let Some((timeline, value)) = &retirement.pending {
            let completed = timeline.value();
            assert!(
                completed >= *value,
                "command allocator {} reset while fence {} is still pending (completed {})",
                self.state.id,
                value,
                completed
            );
        }
        retirement.pending = None;
        self.resets += 1;
        trace!("Command allocator {} reset", self.state.id);
        Ok(())
    }
}

/// Command list recording [`RecordedCommand`]s.
pub struct HeadlessCommandList {
    allocator: Arc<AllocatorState>,
    commands: Vec<RecordedCommand>,
    recording: bool,
    pipeline_bound: bool,
}

impl HeadlessCommandList {
    pub(super) fn new(allocator: &HeadlessCommandAllocator) -> Self {
        Self {
            allocator: Arc::clone(&allocator.state),
            commands: Vec::new(),
            recording: false,
            pipeline_bound: false,
        }
    }

    /// Commands recorded since the last reset.
    #[inline]
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Whether the list is open for recording.
    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub(super) fn allocator_state(&self) -> &Arc<AllocatorState> {
        &self.allocator
    }

    fn record(&mut self, command: RecordedCommand) {
        assert!(self.recording, "recording into a closed command list");
        self.commands.push(command);
    }
}

impl CommandList for HeadlessCommandList {
    type Allocator = HeadlessCommandAllocator;
    type Pipeline = HeadlessPipeline;
    type Mesh = HeadlessMesh;

    fn reset(&mut self, allocator: &mut HeadlessCommandAllocator) -> RhiResult<()> {
        assert!(
            Arc::ptr_eq(&self.allocator, &allocator.state),
            "command list reset against allocator {} it was not created with",
            allocator.id()
        );
        if self.recording {
            return Err(RhiError::InvalidHandle(
                "command list reset while still recording".to_string(),
            ));
        }
        self.commands.clear();
        self.recording = true;
        self.pipeline_bound = false;
        Ok(())
    }

    fn set_pipeline(&mut self, pipeline: &HeadlessPipeline) {
        self.record(RecordedCommand::SetPipeline(pipeline.name.clone()));
        self.pipeline_bound = true;
    }

    fn bind_constants(&mut self, slot: RootSlot, handle: SlotHandle) {
        self.record(RecordedCommand::BindConstants { slot, handle });
    }

    fn bind_mesh(&mut self, mesh: &HeadlessMesh) {
        self.record(RecordedCommand::BindMesh(mesh.name.clone()));
    }

    fn draw_indexed(&mut self, args: DrawIndexed) {
        assert!(self.pipeline_bound, "draw recorded before a pipeline was bound");
        self.record(RecordedCommand::DrawIndexed(args));
    }

    fn close(&mut self) -> RhiResult<()> {
        if !self.recording {
            return Err(RhiError::InvalidHandle(
                "closing a command list that is not recording".to_string(),
            ));
        }
        self.recording = false;
        Ok(())
    }
}
