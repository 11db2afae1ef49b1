//! Per-frame view visibility bookkeeping for a proxy.

use crate::view::ViewId;

/// Views a proxy was found visible in during the current frame.
///
/// The set is stamped with the frame number passed to [`VisibilitySet::reset`].
/// Inserting for any other frame means relevance was evaluated before the
/// frame's reset, which is a threading/ordering bug and asserts in debug builds.
#[derive(Debug, Clone, Default)]
pub struct VisibilitySet {
    frame: Option<u64>,
    views: Vec<ViewId>,
}

impl VisibilitySet {
    /// Typical number of views per frame.
    const INLINE_VIEWS: usize = 4;

    /// Creates an empty set that has not been reset for any frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the set and stamps it with `frame`.
    pub fn reset(&mut self, frame: u64) {
        self.views.clear();
        self.views.reserve(Self::INLINE_VIEWS);
        self.frame = Some(frame);
    }

    /// Records `view` as visible during `frame`.
    pub fn insert(&mut self, view: ViewId, frame: u64) {
        debug_assert_eq!(
            self.frame,
            Some(frame),
            "visibility for {view} evaluated in frame {frame} before the frame's reset"
        );
        if !self.views.contains(&view) {
            self.views.push(view);
        }
    }

    /// Returns true if `view` was recorded since the last reset.
    #[must_use]
    pub fn contains(&self, view: ViewId) -> bool {
        self.views.iter().any(|v| *v == view)
    }

    /// Returns the frame this set was last reset for.
    #[must_use]
    pub fn frame(&self) -> Option<u64> {
        self.frame
    }

    /// Returns true if the set was reset for `frame`.
    #[must_use]
    pub fn is_current(&self, frame: u64) -> bool {
        self.frame == Some(frame)
    }

    /// Returns the recorded views.
    #[must_use]
    pub fn views(&self) -> &[ViewId] {
        &self.views
    }

    /// Returns the number of recorded views.
    #[must_use]
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Returns true if no view was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Heap bytes held by the set.
    #[must_use]
    pub fn allocated_size(&self) -> usize {
        self.views.capacity() * std::mem::size_of::<ViewId>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_previous_frame() {
        let mut set = VisibilitySet::new();
        set.reset(1);
        set.insert(ViewId(0), 1);
        set.insert(ViewId(2), 1);
        assert!(set.contains(ViewId(2)));

        set.reset(2);
        assert!(set.is_empty());
        assert!(!set.contains(ViewId(0)));
        assert!(set.is_current(2));
    }

    #[test]
    fn test_insert_is_deduplicated() {
        let mut set = VisibilitySet::new();
        set.reset(7);
        set.insert(ViewId(3), 7);
        set.insert(ViewId(3), 7);
        assert_eq!(set.len(), 1);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "before the frame's reset")]
    fn test_insert_without_reset_asserts() {
        let mut set = VisibilitySet::new();
        set.reset(1);
        set.insert(ViewId(0), 2);
    }
}
