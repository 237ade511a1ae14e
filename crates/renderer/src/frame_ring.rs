//! Ring of frame resources.
//!
//! The ring lets the CPU record frame N+1 while the GPU still executes frame N:
//!
//! 1. [`FrameRing::acquire_next`] picks the next slot and waits for its last
//!    stamped fence value, if the GPU has not reached it yet
//! 2. The caller uploads constants and records commands into the slot
//! 3. [`FrameRing::stamp`] tags the slot with the fence value of its submission
//!
//! Slots move through `Idle -> Recording -> Submitted -> Idle`. A slot is never
//! handed out while its fence is pending, so the GPU never reads a buffer the CPU
//! is rewriting.

use tracing::{debug, info, trace};

use inflight_rhi::{FenceCounter, GpuContext, GpuDevice, RhiResult};

use crate::frame_resource::{FrameResource, FrameResourceDesc, SlotState};

/// Fixed ring of [`FrameResource`]s.
pub struct FrameRing<D: GpuDevice> {
    slots: Vec<FrameResource<D>>,
    /// Slot the next acquire hands out.
    next: usize,
    /// Slot currently recording.
    current: Option<usize>,
    highest_stamped: u64,
}

impl<D: GpuDevice> FrameRing<D> {
    /// Creates `count` idle frame resources.
    ///
    /// # Errors
    ///
    /// Returns an error if any resource cannot be created.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn new(context: &GpuContext<D>, count: usize, desc: &FrameResourceDesc) -> RhiResult<Self> {
        assert!(count > 0, "frame ring needs at least one slot");

        let slots = (0..count)
            .map(|index| FrameResource::new(context.device().as_ref(), index, desc))
            .collect::<RhiResult<Vec<_>>>()?;

        info!(
            "Frame ring created: {} slots on {}",
            count,
            context.device().name()
        );

        Ok(Self {
            slots,
            next: 0,
            current: None,
            highest_stamped: 0,
        })
    }

    /// Hands out the next slot for recording.
    ///
    /// Blocks until the GPU has finished the slot's previous submission. This is
    /// the only place the steady-state frame loop waits on the GPU.
    ///
    /// # Errors
    ///
    /// Propagates fence errors ([`inflight_rhi::RhiError::FenceTimeout`],
    /// [`inflight_rhi::RhiError::DeviceLost`]). The slot is not handed out and
    /// the ring does not advance.
    ///
    /// # Panics
    ///
    /// Panics if another slot is still recording.
    pub fn acquire_next(&mut self, fence: &FenceCounter<D>) -> RhiResult<usize> {
        if let Some(current) = self.current {
            panic!("acquiring a frame slot while slot {current} is still recording");
        }

        let index = self.next;
        let slot = &mut self.slots[index];
        let target = slot.fence();
        if target != 0 && !fence.is_complete(target)? {
            trace!("Slot {} waiting for fence {}", index, target);
            fence.wait_until(target)?;
        }

        slot.set_state(SlotState::Recording);
        self.current = Some(index);
        self.next = (index + 1) % self.slots.len();
        trace!("Acquired slot {} (fence {})", index, target);
        Ok(index)
    }

    /// Records the fence value that must complete before `slot` is reused.
    ///
    /// # Panics
    ///
    /// Panics if the slot is not recording or `value` does not exceed every
    /// value stamped before.
    pub fn stamp(&mut self, slot: usize, value: u64) {
        let resource = &mut self.slots[slot];
        assert_eq!(
            resource.state(),
            SlotState::Recording,
            "stamping slot {slot} that is not recording"
        );
        assert!(
            value > self.highest_stamped,
            "fence stamp {value} does not exceed previous stamp {}",
            self.highest_stamped
        );

        resource.set_fence(value);
        resource.set_state(SlotState::Submitted);
        self.highest_stamped = value;
        self.current = None;
        trace!("Slot {} stamped with fence {}", slot, value);
    }

    /// Moves submitted slots whose fence completed back to idle. Never blocks.
    ///
    /// Returns how many slots were retired.
    ///
    /// # Errors
    ///
    /// Propagates [`inflight_rhi::RhiError::DeviceLost`].
    pub fn retire_completed(&mut self, fence: &FenceCounter<D>) -> RhiResult<usize> {
        let completed = fence.completed_value()?;
        let mut retired = 0;
        for slot in &mut self.slots {
            if slot.state() == SlotState::Submitted && slot.fence() <= completed {
                slot.set_state(SlotState::Idle);
                retired += 1;
            }
        }
        if retired > 0 {
            debug!("Retired {} slots (completed fence {})", retired, completed);
        }
        Ok(retired)
    }

    /// Number of slots submitted and not yet retired.
    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state() == SlotState::Submitted)
            .count()
    }

    /// Largest fence value stamped so far, `0` before the first submission.
    #[inline]
    pub fn highest_stamped(&self) -> u64 {
        self.highest_stamped
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a ring has at least one slot.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot currently recording, if any.
    #[inline]
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Returns a slot.
    #[inline]
    pub fn slot(&self, index: usize) -> &FrameResource<D> {
        &self.slots[index]
    }

    /// Returns a slot, writable.
    #[inline]
    pub fn slot_mut(&mut self, index: usize) -> &mut FrameResource<D> {
        &mut self.slots[index]
    }

    /// Iterates over every slot in ring order.
    pub fn slots(&self) -> impl Iterator<Item = &FrameResource<D>> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use inflight_rhi::RhiError;
    use inflight_rhi::headless::{self, CompletionPolicy, HeadlessDevice};

    fn desc() -> FrameResourceDesc {
        FrameResourceDesc {
            objects: 4,
            materials: 2,
            instances: 4,
        }
    }

    fn setup(
        policy: CompletionPolicy,
        count: usize,
        timeout: Option<Duration>,
    ) -> (
        GpuContext<HeadlessDevice>,
        FenceCounter<HeadlessDevice>,
        FrameRing<HeadlessDevice>,
    ) {
        let context = headless::context(policy);
        let fence = FenceCounter::new(&context, timeout).unwrap();
        let ring = FrameRing::new(&context, count, &desc()).unwrap();
        (context, fence, ring)
    }

    /// Acquires, submits nothing, and stamps a fresh fence value.
    fn cycle(
        ring: &mut FrameRing<HeadlessDevice>,
        fence: &mut FenceCounter<HeadlessDevice>,
    ) -> (usize, u64) {
        let slot = ring.acquire_next(fence).unwrap();
        let value = fence.advance().unwrap();
        ring.stamp(slot, value);
        (slot, value)
    }

    #[test]
    fn test_first_acquire_is_slot_zero() {
        let (_context, fence, mut ring) = setup(CompletionPolicy::Manual, 3, None);
        assert_eq!(ring.acquire_next(&fence).unwrap(), 0);
        assert_eq!(ring.current(), Some(0));
        assert_eq!(ring.slot(0).state(), SlotState::Recording);
    }

    #[test]
    fn test_slots_rotate() {
        let (_context, mut fence, mut ring) = setup(CompletionPolicy::Immediate, 3, None);
        let order: Vec<usize> = (0..7).map(|_| cycle(&mut ring, &mut fence).0).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(ring.highest_stamped(), 7);
    }

    #[test]
    fn test_stamp_marks_submitted() {
        let (_context, mut fence, mut ring) = setup(CompletionPolicy::Manual, 3, None);
        let (slot, value) = cycle(&mut ring, &mut fence);

        assert_eq!(ring.slot(slot).state(), SlotState::Submitted);
        assert_eq!(ring.slot(slot).fence(), value);
        assert_eq!(ring.in_flight(), 1);
        assert_eq!(ring.current(), None);
    }

    #[test]
    fn test_reuse_waits_for_stamped_fence() {
        let (context, mut fence, mut ring) = setup(CompletionPolicy::Manual, 2, None);
        cycle(&mut ring, &mut fence);
        cycle(&mut ring, &mut fence);

        let queue = Arc::clone(context.queue());
        let completer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            queue.complete_through(1);
        });

        let slot = ring.acquire_next(&fence).unwrap();
        assert_eq!(slot, 0);
        assert!(fence.completed_value().unwrap() >= 1);
        completer.join().unwrap();
    }

    #[test]
    fn test_completed_slot_does_not_block() {
        let (context, mut fence, mut ring) = setup(CompletionPolicy::Manual, 2, None);
        cycle(&mut ring, &mut fence);
        cycle(&mut ring, &mut fence);
        context.queue().complete_through(1);

        assert_eq!(ring.acquire_next(&fence).unwrap(), 0);
        assert_eq!(context.device().blocking_waits(), 0);
    }

    #[test]
    fn test_acquire_timeout_does_not_advance() {
        let (_context, mut fence, mut ring) =
            setup(CompletionPolicy::Manual, 1, Some(Duration::from_millis(10)));
        cycle(&mut ring, &mut fence);

        let result = ring.acquire_next(&fence);
        assert!(matches!(
            result,
            Err(RhiError::FenceTimeout {
                target: 1,
                completed: 0
            })
        ));
        assert_eq!(ring.current(), None);
        assert_eq!(ring.slot(0).state(), SlotState::Submitted);
    }

    #[test]
    fn test_retire_completed() {
        let (context, mut fence, mut ring) = setup(CompletionPolicy::Manual, 3, None);
        for _ in 0..3 {
            cycle(&mut ring, &mut fence);
        }
        assert_eq!(ring.in_flight(), 3);

        context.queue().complete_through(2);
        assert_eq!(ring.retire_completed(&fence).unwrap(), 2);
        assert_eq!(ring.in_flight(), 1);
        assert_eq!(ring.slot(2).state(), SlotState::Submitted);

        // Nothing new completed.
        assert_eq!(ring.retire_completed(&fence).unwrap(), 0);
    }

    #[test]
    #[should_panic(expected = "still recording")]
    fn test_double_acquire_panics() {
        let (_context, fence, mut ring) = setup(CompletionPolicy::Manual, 3, None);
        ring.acquire_next(&fence).unwrap();
        let _ = ring.acquire_next(&fence);
    }

    #[test]
    #[should_panic(expected = "not recording")]
    fn test_stamp_idle_slot_panics() {
        let (_context, _fence, mut ring) = setup(CompletionPolicy::Manual, 3, None);
        ring.stamp(1, 1);
    }

    #[test]
    #[should_panic(expected = "does not exceed")]
    fn test_non_monotonic_stamp_panics() {
        let (_context, mut fence, mut ring) = setup(CompletionPolicy::Immediate, 3, None);
        cycle(&mut ring, &mut fence);
        let slot = ring.acquire_next(&fence).unwrap();
        ring.stamp(slot, 1);
    }

    #[test]
    #[should_panic(expected = "at least one slot")]
    fn test_empty_ring_panics() {
        let context = headless::context(CompletionPolicy::Immediate);
        let _ = FrameRing::new(&context, 0, &desc());
    }

    #[test]
    fn test_ring_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameRing<HeadlessDevice>>();
    }
}
