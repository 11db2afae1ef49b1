//! Deferred release of render-timeline resources.
//!
//! A resource retired during frame `F` may still be referenced by draws the
//! GPU has not finished. It becomes releasable at the start of frame
//! `F + frames_in_flight`, by which point every draw submitted up to and
//! including frame `F` is complete.

/// Resources waiting for in-flight frames to drain.
#[derive(Debug)]
pub struct DeferredReleaseQueue<T> {
    frames_in_flight: u64,
    pending: Vec<(u64, T)>,
}

impl<T: PartialEq> DeferredReleaseQueue<T> {
    /// Creates a queue; `frames_in_flight` is raised to at least 1.
    #[must_use]
    pub fn new(frames_in_flight: u32) -> Self {
        Self {
            frames_in_flight: u64::from(frames_in_flight.max(1)),
            pending: Vec::new(),
        }
    }

    /// Retires `item` during `frame`.
    ///
    /// Returns false if the item is already queued; it is never queued twice.
    pub fn retire(&mut self, item: T, frame: u64) -> bool {
        if self.contains(&item) {
            return false;
        }
        self.pending.push((frame, item));
        true
    }

    /// Withdraws a queued item that came back into use. Returns true if found.
    pub fn cancel(&mut self, item: &T) -> bool {
        let before = self.pending.len();
        self.pending.retain(|(_, pending)| pending != item);
        before != self.pending.len()
    }

    /// Returns true if `item` is queued.
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.pending.iter().any(|(_, pending)| pending == item)
    }

    /// Removes and returns every item releasable at the start of `current_frame`.
    pub fn drain_ready(&mut self, current_frame: u64) -> Vec<T> {
        let frames_in_flight = self.frames_in_flight;
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(retired, _)| current_frame >= retired + frames_in_flight);
        self.pending = waiting;
        ready.into_iter().map(|(_, item)| item).collect()
    }

    /// Removes every item regardless of frame, for teardown after the GPU is idle.
    pub fn drain_all(&mut self) -> Vec<T> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(_, item)| item)
            .collect()
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Configured frame latency.
    #[must_use]
    pub fn frames_in_flight(&self) -> u64 {
        self.frames_in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_at_next_frame_with_one_in_flight() {
        let mut queue = DeferredReleaseQueue::new(1);
        assert!(queue.retire("b1", 5));
        assert!(queue.drain_ready(5).is_empty());
        assert_eq!(queue.drain_ready(6), vec!["b1"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_longer_latency_waits_more_frames() {
        let mut queue = DeferredReleaseQueue::new(3);
        queue.retire(1u64, 10);
        assert!(queue.drain_ready(12).is_empty());
        assert_eq!(queue.drain_ready(13), vec![1]);
    }

    #[test]
    fn test_zero_latency_is_raised_to_one() {
        let mut queue = DeferredReleaseQueue::new(0);
        queue.retire(7u32, 2);
        assert!(queue.drain_ready(2).is_empty());
        assert_eq!(queue.frames_in_flight(), 1);
    }

    #[test]
    fn test_retire_twice_queues_once() {
        let mut queue = DeferredReleaseQueue::new(1);
        assert!(queue.retire(4u32, 1));
        assert!(!queue.retire(4u32, 2));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_ready(2), vec![4]);
    }

    #[test]
    fn test_cancel_withdraws_item() {
        let mut queue = DeferredReleaseQueue::new(1);
        queue.retire(9u32, 1);
        assert!(queue.cancel(&9));
        assert!(!queue.cancel(&9));
        assert!(queue.drain_ready(100).is_empty());
    }
}
