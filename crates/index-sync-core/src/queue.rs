//! Pending index operations, one set per lifecycle phase.

use std::collections::HashSet;

use crate::models::RecordIdentity;

/// Lifecycle phase a pending operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Save,
    Delete,
}

/// Identities observed by a `before_*` hook and awaiting their `after_*` hook.
///
/// Keyed by identity, so a second enqueue of the same logical record in the
/// same phase is a no-op, even when it arrives through a different instance.
#[derive(Debug, Default)]
pub struct MutationQueue {
    save: HashSet<RecordIdentity>,
    delete: HashSet<RecordIdentity>,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn phase_mut(&mut self, phase: Phase) -> &mut HashSet<RecordIdentity> {
        match phase {
            Phase::Save => &mut self.save,
            Phase::Delete => &mut self.delete,
        }
    }

    /// Returns `false` when the identity was already pending in this phase.
    pub fn enqueue(&mut self, phase: Phase, identity: RecordIdentity) -> bool {
        self.phase_mut(phase).insert(identity)
    }

    /// Remove a pending entry. Returns whether one existed.
    pub fn take(&mut self, phase: Phase, identity: &RecordIdentity) -> bool {
        self.phase_mut(phase).remove(identity)
    }

    pub fn contains(&self, phase: Phase, identity: &RecordIdentity) -> bool {
        match phase {
            Phase::Save => self.save.contains(identity),
            Phase::Delete => self.delete.contains(identity),
        }
    }

    pub fn len(&self, phase: Phase) -> usize {
        match phase {
            Phase::Save => self.save.len(),
            Phase::Delete => self.delete.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.save.is_empty() && self.delete.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(key: &str) -> RecordIdentity {
        RecordIdentity::new("Article", vec![key.to_string()])
    }

    #[test]
    fn test_second_enqueue_is_noop() {
        let mut q = MutationQueue::new();
        assert!(q.enqueue(Phase::Save, id("1")));
        assert_eq!(q.len(Phase::Save), 1);
        assert!(!q.enqueue(Phase::Save, id("1")));
        assert_eq!(q.len(Phase::Save), 1);
    }

    #[test]
    fn test_phases_are_independent() {
        let mut q = MutationQueue::new();
        q.enqueue(Phase::Save, id("1"));
        q.enqueue(Phase::Delete, id("1"));
        assert_eq!(q.len(Phase::Save), 1);
        assert_eq!(q.len(Phase::Delete), 1);

        assert!(q.take(Phase::Delete, &id("1")));
        assert!(q.contains(Phase::Save, &id("1")));
        assert!(!q.contains(Phase::Delete, &id("1")));
    }

    #[test]
    fn test_take_without_enqueue() {
        let mut q = MutationQueue::new();
        assert!(!q.take(Phase::Save, &id("9")));
        assert!(q.is_empty());
    }

    #[test]
    fn test_same_key_different_model_not_deduplicated() {
        let mut q = MutationQueue::new();
        q.enqueue(Phase::Save, RecordIdentity::new("Article", vec!["1".into()]));
        q.enqueue(Phase::Save, RecordIdentity::new("Invoice", vec!["1".into()]));
        assert_eq!(q.len(Phase::Save), 2);
    }
}
