//! CPU/GPU fence counter.
//!
//! A [`FenceCounter`] owns one timeline fence and the last value the CPU asked
//! the GPU to signal. Each submitted frame is stamped with a fresh value from
//! [`FenceCounter::advance`]; before the CPU touches that frame's memory again
//! it calls [`FenceCounter::wait_until`] with the stamp.
//!
//! Waits block on the backend's own wait primitive (timeline semaphore wait on
//! Vulkan, a condition variable on the headless backend). There is no polling
//! loop. A wait either succeeds, or fails with a fatal error:
//! [`RhiError::FenceTimeout`] when a watchdog timeout is configured and expires,
//! [`RhiError::DeviceLost`] when the device is gone.
//!
//! # Example
//!
//! ```
//! use inflight_rhi::fence::FenceCounter;
//! use inflight_rhi::headless::{self, CompletionPolicy};
//!
//! # fn example() -> Result<(), inflight_rhi::RhiError> {
//! let context = headless::context(CompletionPolicy::Immediate);
//! let mut fence = FenceCounter::new(&context, None)?;
//!
//! let value = fence.advance()?;
//! fence.wait_until(value)?;
//! assert!(fence.is_complete(value)?);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, trace};

use crate::backend::{CommandQueue, GpuDevice, TimelineFence};
use crate::context::GpuContext;
use crate::error::{RhiError, RhiResult};

/// Monotonic fence counter for one queue.
pub struct FenceCounter<D: GpuDevice> {
    queue: Arc<D::Queue>,
    timeline: D::Timeline,
    /// Last value enqueued for signalling.
    last_issued: u64,
    /// Highest completed value observed by the CPU.
    observed: AtomicU64,
    timeout: Option<Duration>,
}

impl<D: GpuDevice> FenceCounter<D> {
    /// Creates a counter at zero on the context's queue.
    ///
    /// # Arguments
    ///
    /// * `context` - Device and queue
    /// * `timeout` - Watchdog for waits; `None` waits forever
    ///
    /// # Errors
    ///
    /// Returns an error if the timeline fence cannot be created.
    pub fn new(context: &GpuContext<D>, timeout: Option<Duration>) -> RhiResult<Self> {
        let timeline = context.device().create_timeline(0)?;

        debug!("Created fence counter (timeout: {:?})", timeout);

        Ok(Self {
            queue: Arc::clone(context.queue()),
            timeline,
            last_issued: 0,
            observed: AtomicU64::new(0),
            timeout,
        })
    }

    /// Increments the counter and enqueues a GPU signal of the new value.
    ///
    /// The signal lands after every command list already executed on the
    /// queue, so the returned value completes once that work is done.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be enqueued. The counter is not
    /// incremented in that case.
    pub fn advance(&mut self) -> RhiResult<u64> {
        let value = self.last_issued + 1;
        self.queue.signal(&self.timeline, value)?;
        self.last_issued = value;
        trace!("Fence signal enqueued: {}", value);
        Ok(value)
    }

    /// Highest value the GPU has completed.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DeviceLost`] if the device is gone or reports a
    /// value lower than one observed earlier.
    pub fn completed_value(&self) -> RhiResult<u64> {
        let value = self.timeline.completed_value()?;
        let previous = self.observed.fetch_max(value, Ordering::AcqRel);
        if value < previous {
            return Err(RhiError::DeviceLost(format!(
                "fence went backwards: observed {previous}, now {value}"
            )));
        }
        Ok(value)
    }

    /// Whether `target` has completed. Never blocks.
    ///
    /// # Errors
    ///
    /// See [`FenceCounter::completed_value`].
    pub fn is_complete(&self, target: u64) -> RhiResult<bool> {
        Ok(self.completed_value()? >= target)
    }

    /// Blocks until the GPU has completed `target`.
    ///
    /// Returns immediately if it already has.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FenceTimeout`] if the watchdog expires, or
    /// [`RhiError::DeviceLost`] if the device is gone. Neither is retryable.
    ///
    /// # Panics
    ///
    /// Panics if `target` was never issued; such a wait could never finish.
    pub fn wait_until(&self, target: u64) -> RhiResult<()> {
        assert!(
            target <= self.last_issued,
            "waiting for fence {target} that was never issued (last issued {})",
            self.last_issued
        );

        let completed = self.completed_value()?;
        if completed >= target {
            return Ok(());
        }

        trace!("Waiting for fence {} (completed {})", target, completed);
        if self.timeline.wait(target, self.timeout)? {
            self.completed_value()?;
            Ok(())
        } else {
            Err(RhiError::FenceTimeout {
                target,
                completed: self.completed_value()?,
            })
        }
    }

    /// Advances the counter and waits for the new value.
    ///
    /// Drains every submission made before the call.
    ///
    /// # Errors
    ///
    /// See [`FenceCounter::advance`] and [`FenceCounter::wait_until`].
    pub fn flush(&mut self) -> RhiResult<u64> {
        let value = self.advance()?;
        self.wait_until(value)?;
        Ok(value)
    }

    /// Waits for the last issued value. Does nothing if it already completed.
    ///
    /// # Errors
    ///
    /// See [`FenceCounter::wait_until`].
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.wait_until(self.last_issued)
    }

    /// Last value enqueued for signalling.
    #[inline]
    pub fn last_issued(&self) -> u64 {
        self.last_issued
    }

    /// Configured watchdog timeout.
    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Underlying timeline fence.
    #[inline]
    pub fn timeline(&self) -> &D::Timeline {
        &self.timeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{self, CompletionPolicy, HeadlessDevice};

    fn counter(
        policy: CompletionPolicy,
        timeout: Option<Duration>,
    ) -> (GpuContext<HeadlessDevice>, FenceCounter<HeadlessDevice>) {
        let context = headless::context(policy);
        let fence = FenceCounter::new(&context, timeout).unwrap();
        (context, fence)
    }

    #[test]
    fn test_advance_is_monotonic() {
        let (_context, mut fence) = counter(CompletionPolicy::Immediate, None);
        assert_eq!(fence.last_issued(), 0);
        assert_eq!(fence.advance().unwrap(), 1);
        assert_eq!(fence.advance().unwrap(), 2);
        assert_eq!(fence.advance().unwrap(), 3);
        assert_eq!(fence.last_issued(), 3);
        assert_eq!(fence.completed_value().unwrap(), 3);
    }

    #[test]
    fn test_wait_on_completed_value_does_not_block() {
        let (context, mut fence) = counter(CompletionPolicy::Immediate, None);
        let value = fence.advance().unwrap();
        fence.wait_until(value).unwrap();
        fence.wait_until(0).unwrap();
        assert_eq!(context.queue().blocking_waits(), 0);
    }

    #[test]
    fn test_manual_completion() {
        let (context, mut fence) = counter(CompletionPolicy::Manual, None);
        let first = fence.advance().unwrap();
        let second = fence.advance().unwrap();

        assert!(!fence.is_complete(first).unwrap());
        context.queue().complete_through(first);
        assert!(fence.is_complete(first).unwrap());
        assert!(!fence.is_complete(second).unwrap());
        assert_eq!(fence.completed_value().unwrap(), first);
    }

    #[test]
    fn test_wait_times_out_when_gpu_hangs() {
        let (_context, mut fence) =
            counter(CompletionPolicy::Manual, Some(Duration::from_millis(20)));
        let value = fence.advance().unwrap();

        match fence.wait_until(value) {
            Err(RhiError::FenceTimeout { target, completed }) => {
                assert_eq!(target, value);
                assert_eq!(completed, 0);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_wait_unblocks_from_other_thread() {
        let (context, mut fence) = counter(CompletionPolicy::Manual, None);
        let value = fence.advance().unwrap();

        let queue = Arc::clone(context.queue());
        let gpu = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            queue.complete_through(value);
        });

        fence.wait_until(value).unwrap();
        gpu.join().unwrap();
        assert_eq!(context.queue().blocking_waits(), 1);
    }

    #[test]
    fn test_flush_drains_worker() {
        let (_context, mut fence) = counter(
            CompletionPolicy::Worker {
                latency: Duration::from_millis(2),
            },
            None,
        );
        fence.advance().unwrap();
        fence.advance().unwrap();
        let value = fence.flush().unwrap();
        assert_eq!(value, 3);
        assert_eq!(fence.completed_value().unwrap(), 3);
    }

    #[test]
    fn test_wait_idle_twice() {
        let (context, mut fence) = counter(CompletionPolicy::Manual, None);
        fence.advance().unwrap();
        context.queue().complete_all();

        fence.wait_idle().unwrap();
        fence.wait_idle().unwrap();
        assert_eq!(context.queue().blocking_waits(), 0);
    }

    #[test]
    fn test_device_loss_fails_advance() {
        let (context, mut fence) = counter(CompletionPolicy::Immediate, None);
        context.queue().inject_device_loss();
        assert!(matches!(fence.advance(), Err(RhiError::DeviceLost(_))));
        assert_eq!(fence.last_issued(), 0);
    }

    #[test]
    #[should_panic(expected = "never issued")]
    fn test_wait_for_unissued_value_panics() {
        let (_context, fence) = counter(CompletionPolicy::Immediate, None);
        let _ = fence.wait_until(1);
    }
}
