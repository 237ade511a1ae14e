use std::collections::VecDeque;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace};

use crate::backend::CommandQueue;
use crate::error::{RhiError, RhiResult};

use super::command::{AllocatorState, HeadlessCommandList, RecordedCommand};
use super::timeline::TimelineState;
use super::{HeadlessDevice, HeadlessTimeline, Shared, lock};

/// Number of executed lists kept for inspection.
const CAPTURE_LIMIT: usize = 64;

/// When enqueued fence signals complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Signals complete as soon as they are enqueued.
    Immediate,
    /// Signals stay pending until [`HeadlessQueue::complete_through`],
    /// [`HeadlessQueue::complete_next`] or [`HeadlessQueue::complete_all`].
    Manual,
    /// A background thread completes each signal `latency` after the previous
    /// one, starting no earlier than the moment it was enqueued.
    Worker {
        /// Simulated GPU time per signal.
        latency: Duration,
    },
}

/// A command list as the queue executed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutedList {
    /// ID of the allocator the list was recorded into.
    pub allocator: u32,
    /// Recorded commands.
    pub commands: Vec<RecordedCommand>,
    /// Value of the first fence signal enqueued after execution.
    pub signalled_at: Option<u64>,
}

impl ExecutedList {
    /// Number of draws in the list.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::DrawIndexed(_)))
            .count()
    }

    /// Names of the pipelines bound, in order.
    pub fn pipelines(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::SetPipeline(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

type Job = (Arc<TimelineState>, u64, Instant);

struct Worker {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

struct QueueState {
    executed: VecDeque<ExecutedList>,
    unsignalled: Vec<Arc<AllocatorState>>,
    pending: VecDeque<(Arc<TimelineState>, u64)>,
    busy_until: Instant,
    execute_count: u64,
    signal_count: u64,
}

/// Software queue.
pub struct HeadlessQueue {
    shared: Arc<Shared>,
    policy: CompletionPolicy,
    state: Mutex<QueueState>,
    worker: Mutex<Worker>,
}

impl HeadlessQueue {
    /// Creates a queue on `device`.
    pub fn new(device: &Arc<HeadlessDevice>, policy: CompletionPolicy) -> Arc<Self> {
        let worker = match policy {
            CompletionPolicy::Worker { .. } => {
                let (sender, receiver) = mpsc::channel::<Job>();
                let handle = std::thread::Builder::new()
                    .name("headless-gpu".to_string())
                    .spawn(move || {
                        while let Ok((timeline, value, due)) = receiver.recv() {
                            let now = Instant::now();
                            if due > now {
                                std::thread::sleep(due - now);
                            }
                            timeline.complete(value);
                        }
                    });
                match handle {
                    Ok(handle) => Worker {
                        sender: Some(sender),
                        handle: Some(handle),
                    },
                    Err(e) => {
                        error!("Failed to spawn headless GPU thread: {}", e);
                        device.shared().mark_lost();
                        Worker {
                            sender: None,
                            handle: None,
                        }
                    }
                }
            }
            _ => Worker {
                sender: None,
                handle: None,
            },
        };

        info!("Headless queue created ({:?})", policy);

        Arc::new(Self {
            shared: Arc::clone(device.shared()),
            policy,
            state: Mutex::new(QueueState {
                executed: VecDeque::with_capacity(CAPTURE_LIMIT),
                unsignalled: Vec::new(),
                pending: VecDeque::new(),
                busy_until: Instant::now(),
                execute_count: 0,
                signal_count: 0,
            }),
            worker: Mutex::new(worker),
        })
    }

    /// Completion policy.
    #[inline]
    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    /// Completes every pending signal with a value `<= value`.
    ///
    /// Only meaningful for [`CompletionPolicy::Manual`].
    pub fn complete_through(&self, value: u64) {
        let mut state = lock(&self.state);
        while let Some((timeline, pending)) = state.pending.front() {
            if *pending > value {
                break;
            }
            timeline.complete(*pending);
            trace!("Headless GPU completed fence {}", pending);
            state.pending.pop_front();
        }
    }

    /// Completes the oldest pending signal and returns its value.
    pub fn complete_next(&self) -> Option<u64> {
        let mut state = lock(&self.state);
        let (timeline, value) = state.pending.pop_front()?;
        timeline.complete(value);
        Some(value)
    }

    /// Completes every pending signal.
    pub fn complete_all(&self) {
        let mut state = lock(&self.state);
        for (timeline, value) in state.pending.drain(..) {
            timeline.complete(value);
        }
    }

    /// Values still waiting for completion, oldest first.
    pub fn pending_signals(&self) -> Vec<u64> {
        lock(&self.state).pending.iter().map(|(_, v)| *v).collect()
    }

    /// Simulates device removal.
    ///
    /// Every later submission fails with [`RhiError::DeviceLost`] and blocked
    /// waiters wake up with the same error.
    pub fn inject_device_loss(&self) {
        error!("Injected device loss");
        self.shared.mark_lost();
    }

    /// Number of waits that had to block.
    pub fn blocking_waits(&self) -> u64 {
        self.shared
            .blocking_waits
            .load(std::sync::atomic::Ordering::Acquire)
    }

    /// Number of command lists executed.
    pub fn execute_count(&self) -> u64 {
        lock(&self.state).execute_count
    }

    /// Number of fence signals enqueued.
    pub fn signal_count(&self) -> u64 {
        lock(&self.state).signal_count
    }

    /// The most recently executed lists, oldest first.
    pub fn executed(&self) -> Vec<ExecutedList> {
        lock(&self.state).executed.iter().cloned().collect()
    }

    /// The most recently executed list.
    pub fn last_executed(&self) -> Option<ExecutedList> {
        lock(&self.state).executed.back().cloned()
    }
}

impl CommandQueue for HeadlessQueue {
    type CommandList = HeadlessCommandList;
    type Timeline = HeadlessTimeline;

    fn execute(&self, lists: &[&HeadlessCommandList]) -> RhiResult<()> {
        self.shared.check_lost()?;
        if lists.iter().any(|list| list.is_recording()) {
            return Err(RhiError::InvalidHandle(
                "executing a command list that was not closed".to_string(),
            ));
        }

        let mut state = lock(&self.state);
        for list in lists {
            state.unsignalled.push(Arc::clone(list.allocator_state()));
            if state.executed.len() == CAPTURE_LIMIT {
                state.executed.pop_front();
            }
            state.executed.push_back(ExecutedList {
                allocator: list.allocator_state().id,
                commands: list.commands().to_vec(),
                signalled_at: None,
            });
            state.execute_count += 1;
        }
        trace!("Headless queue executed {} list(s)", lists.len());
        Ok(())
    }

    fn signal(&self, timeline: &HeadlessTimeline, value: u64) -> RhiResult<()> {
        self.shared.check_lost()?;
        let timeline = timeline.state();

        let mut state = lock(&self.state);
        for allocator in state.unsignalled.drain(..) {
            allocator.retire_at(timeline, value);
        }
        for executed in state.executed.iter_mut().rev() {
            if executed.signalled_at.is_some() {
                break;
            }
            executed.signalled_at = Some(value);
        }
        state.signal_count += 1;

        match self.policy {
            CompletionPolicy::Immediate => timeline.complete(value),
            CompletionPolicy::Manual => state.pending.push_back((Arc::clone(timeline), value)),
            CompletionPolicy::Worker { latency } => {
                let due = state.busy_until.max(Instant::now()) + latency;
                state.busy_until = due;
                let worker = lock(&self.worker);
                let sender = worker.sender.as_ref().ok_or_else(|| {
                    RhiError::DeviceLost("headless GPU thread is not running".to_string())
                })?;
                sender.send((Arc::clone(timeline), value, due)).map_err(|_| {
                    RhiError::DeviceLost("headless GPU thread exited".to_string())
                })?;
            }
        }
        Ok(())
    }
}

impl Drop for HeadlessQueue {
    fn drop(&mut self) {
        let mut worker = lock(&self.worker);
        worker.sender = None;
        if let Some(handle) = worker.handle.take()
            && handle.join().is_err()
        {
            error!("Headless GPU thread panicked");
        }
        debug!("Headless queue destroyed");
    }
}
