//! Dirty propagation across frames in flight.
//!
//! Each frame resource holds its own copy of every GPU record. When a record
//! changes on the CPU, the new value has to reach every copy, one per frame, as
//! the ring cycles through its slots. A [`PropagationWindow`] counts how many
//! more frames must re-upload the record.
//!
//! ```
//! use inflight_scene::PropagationWindow;
//!
//! let mut window = PropagationWindow::new(3);
//! assert!(window.needs_upload());
//!
//! for _ in 0..3 {
//!     window.tick();
//! }
//! assert!(window.is_settled());
//!
//! window.mark_dirty();
//! assert_eq!(window.remaining(), 3);
//! ```

/// Number of frames that still have to re-upload a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropagationWindow {
    remaining: u32,
    frames: u32,
}

impl PropagationWindow {
    /// Creates a window for a ring of `frames` resources.
    ///
    /// New records start dirty: none of the frame resources holds them yet.
    ///
    /// # Panics
    ///
    /// Panics if `frames` is zero.
    pub fn new(frames: u32) -> Self {
        assert!(frames > 0, "propagation window needs at least one frame");
        Self {
            remaining: frames,
            frames,
        }
    }

    /// Creates a window that has nothing to upload until marked dirty.
    ///
    /// # Panics
    ///
    /// Panics if `frames` is zero.
    pub fn settled(frames: u32) -> Self {
        assert!(frames > 0, "propagation window needs at least one frame");
        Self {
            remaining: 0,
            frames,
        }
    }

    /// Restarts the window after a change.
    ///
    /// Resets to the full frame count; repeated calls never accumulate.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.remaining = self.frames;
    }

    /// Records that the current frame uploaded the record.
    #[inline]
    pub fn tick(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Whether the current frame has to upload the record.
    #[inline]
    pub fn needs_upload(&self) -> bool {
        self.remaining > 0
    }

    /// Whether every frame resource holds the latest value.
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.remaining == 0
    }

    /// Frames left to upload.
    #[inline]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Ring size the window was created for.
    #[inline]
    pub fn frames(&self) -> u32 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_window_is_dirty() {
        let window = PropagationWindow::new(3);
        assert_eq!(window.remaining(), 3);
        assert!(window.needs_upload());
        assert!(!window.is_settled());
    }

    #[test]
    fn test_settles_after_n_ticks() {
        let mut window = PropagationWindow::new(3);
        window.tick();
        window.tick();
        assert!(window.needs_upload());
        window.tick();
        assert!(window.is_settled());
    }

    #[test]
    fn test_settled_window_waits_for_mark() {
        let mut window = PropagationWindow::settled(3);
        assert!(window.is_settled());
        window.mark_dirty();
        assert_eq!(window.remaining(), 3);
    }

    #[test]
    fn test_tick_saturates() {
        let mut window = PropagationWindow::new(1);
        window.tick();
        window.tick();
        assert_eq!(window.remaining(), 0);
    }

    #[test]
    fn test_mark_dirty_resets_not_increments() {
        let mut window = PropagationWindow::new(3);
        window.tick();
        window.mark_dirty();
        window.mark_dirty();
        assert_eq!(window.remaining(), 3);
    }

    #[test]
    #[should_panic(expected = "at least one frame")]
    fn test_zero_frames_panics() {
        let _ = PropagationWindow::new(0);
    }
}
