use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::backend::TimelineFence;
use crate::error::RhiResult;

use super::{Shared, lock};

/// Counter and wakeup primitive behind a [`HeadlessTimeline`].
pub(super) struct TimelineState {
    value: Mutex<u64>,
    changed: Condvar,
    shared: Arc<Shared>,
}

impl TimelineState {
    pub(super) fn value(&self) -> u64 {
        *lock(&self.value)
    }

    /// Raises the completed value to `value`. Lower values are ignored.
    pub(super) fn complete(&self, value: u64) {
        let mut current = lock(&self.value);
        if value > *current {
            *current = value;
            self.changed.notify_all();
        }
    }

    pub(super) fn wake_all(&self) {
        let _guard = lock(&self.value);
        self.changed.notify_all();
    }
}

/// Software timeline fence.
///
/// Waits block on a condition variable until the queue completes the awaited
/// value, the timeout expires, or the device is lost.
pub struct HeadlessTimeline {
    state: Arc<TimelineState>,
}

impl HeadlessTimeline {
    pub(super) fn new(shared: Arc<Shared>, initial_value: u64) -> Self {
        Self {
            state: Arc::new(TimelineState {
                value: Mutex::new(initial_value),
                changed: Condvar::new(),
                shared,
            }),
        }
    }

    pub(super) fn state(&self) -> &Arc<TimelineState> {
        &self.state
    }
}

impl TimelineFence for HeadlessTimeline {
    fn completed_value(&self) -> RhiResult<u64> {
        self.state.shared.check_lost()?;
        Ok(self.state.value())
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> RhiResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut current = lock(&self.state.value);
        let mut counted = false;

        loop {
            self.state.shared.check_lost()?;
            if *current >= value {
                return Ok(true);
            }
            if !counted {
                self.state
                    .shared
                    .blocking_waits
                    .fetch_add(1, Ordering::AcqRel);
                counted = true;
            }

            current = match deadline {
                None => self
                    .state
                    .changed
                    .wait(current)
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.state
                        .changed
                        .wait_timeout(current, deadline - now)
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}
