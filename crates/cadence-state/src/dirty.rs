//! Set of world sections mutated since the last snapshot.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cadence_types::StateSection;

/// Thread-safe dirty-section set.
///
/// Shared as `Arc<StateDirtyTracker>` between the [`TrackedWorld`] that
/// flags mutations and the [`StateCache`] that consumes them.
///
/// [`TrackedWorld`]: crate::TrackedWorld
/// [`StateCache`]: crate::StateCache
#[derive(Debug, Default)]
pub struct StateDirtyTracker {
    dirty: Mutex<BTreeSet<StateSection>>,
}

impl StateDirtyTracker {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag one section. Idempotent.
    pub fn mark_dirty(&self, section: StateSection) {
        self.guard().insert(section);
    }

    /// Flag several sections at once.
    pub fn mark_dirty_multiple<I>(&self, sections: I)
    where
        I: IntoIterator<Item = StateSection>,
    {
        self.guard().extend(sections);
    }

    /// Flag every tracked section.
    pub fn mark_all(&self) {
        self.mark_dirty_multiple(StateSection::ALL);
    }

    /// Whether `section` is flagged.
    pub fn is_dirty(&self, section: StateSection) -> bool {
        self.guard().contains(&section)
    }

    /// Whether every tracked section is flagged.
    pub fn all_dirty(&self) -> bool {
        self.guard().len() == StateSection::ALL.len()
    }

    /// Copy of the flagged sections.
    pub fn dirty_sections(&self) -> BTreeSet<StateSection> {
        self.guard().clone()
    }

    /// Return the flagged sections and clear them in one step.
    pub fn take(&self) -> BTreeSet<StateSection> {
        std::mem::take(&mut *self.guard())
    }

    /// Unflag everything.
    pub fn clear(&self) {
        self.guard().clear();
    }

    /// Whether nothing is flagged.
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    fn guard(&self) -> MutexGuard<'_, BTreeSet<StateSection>> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marking_is_idempotent() {
        let tracker = StateDirtyTracker::new();
        tracker.mark_dirty(StateSection::Agents);
        tracker.mark_dirty(StateSection::Agents);
        tracker.mark_dirty_multiple([StateSection::Agents, StateSection::Market]);
        assert_eq!(tracker.dirty_sections().len(), 2);
        assert!(tracker.is_dirty(StateSection::Market));
        assert!(!tracker.is_dirty(StateSection::Zones));
    }

    #[test]
    fn take_flushes() {
        let tracker = StateDirtyTracker::new();
        tracker.mark_dirty(StateSection::Zones);
        let taken = tracker.take();
        assert!(taken.contains(&StateSection::Zones));
        assert!(tracker.is_empty());
    }

    #[test]
    fn mark_all_covers_every_section() {
        let tracker = StateDirtyTracker::new();
        assert!(!tracker.all_dirty());
        tracker.mark_all();
        assert!(tracker.all_dirty());
        tracker.clear();
        assert!(tracker.is_empty());
    }
}
