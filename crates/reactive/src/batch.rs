//! The open batch of a flush cycle.
//!
//! A batch exists from the first `emit` of a turn until its flush closes it.
//! It collects the handled keys in emission order, the computed refreshes
//! still to run ordered by ascending priority, and the plain effects to run
//! once the refreshes settle.

use crate::computed::Computed;
use crate::follower::{FollowerId, Matched};
use alloc::rc::Rc;
use alloc::vec::Vec;
use deepstate_core::Key;
use hashbrown::HashSet;

pub(crate) struct Batch {
    frame: Vec<Key>,
    handled: HashSet<Key>,
    pending: Vec<Rc<Computed>>,
    effects: Vec<Matched>,
    effect_ids: HashSet<FollowerId>,
}

/// What a closed batch hands back to the observer.
pub(crate) struct Closed {
    pub frame: Vec<Key>,
    pub effects: Vec<Matched>,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            frame: Vec::new(),
            handled: HashSet::new(),
            pending: Vec::new(),
            effects: Vec::new(),
            effect_ids: HashSet::new(),
        }
    }

    /// Marks `key` as handled. Returns false if it already was.
    pub fn mark(&mut self, key: &Key) -> bool {
        if !self.handled.insert(key.clone()) {
            return false;
        }
        self.frame.push(key.clone());
        true
    }

    #[inline]
    pub fn is_handled(&self, key: &str) -> bool {
        self.handled.contains(key)
    }

    /// Queues a computed refresh after every pending refresh of lower or
    /// equal priority. A computed already queued is not queued twice.
    pub fn enqueue_refresh(&mut self, computed: Rc<Computed>) {
        if self.pending.iter().any(|c| Rc::ptr_eq(c, &computed)) {
            return;
        }
        let priority = computed.priority();
        let at = self
            .pending
            .iter()
            .position(|c| c.priority() > priority)
            .unwrap_or(self.pending.len());
        self.pending.insert(at, computed);
    }

    /// Adds a plain effect. A follower runs at most once per batch.
    pub fn enqueue_effect(&mut self, matched: Matched) {
        if self.effect_ids.insert(matched.id) {
            self.effects.push(matched);
        }
    }

    /// Pops the lowest-priority refresh whose own key is not yet handled.
    pub fn next_refresh(&mut self) -> Option<Rc<Computed>> {
        while !self.pending.is_empty() {
            let computed = self.pending.remove(0);
            if !self.is_handled(computed.key()) {
                return Some(computed);
            }
        }
        None
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn close(self) -> Closed {
        Closed {
            frame: self.frame,
            effects: self.effects,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::follower::Listener;

    fn effect(id: FollowerId) -> Matched {
        Matched {
            id,
            listener: Listener::Effect(Rc::new(|_| {})),
            once: false,
        }
    }

    #[test]
    fn test_batch_mark_once() {
        let mut batch = Batch::new();
        let key = Key::from("a");

        assert!(batch.mark(&key));
        assert!(!batch.mark(&key));
        assert!(batch.is_handled("a"));

        let closed = batch.close();
        assert_eq!(closed.frame, [key]);
    }

    #[test]
    fn test_batch_frame_in_emission_order() {
        let mut batch = Batch::new();
        for k in ["c", "a", "b", "a"] {
            batch.mark(&Key::from(k));
        }
        let closed = batch.close();
        let names: Vec<&str> = closed.frame.iter().map(|k| &**k).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn test_batch_effects_deduplicated() {
        let mut batch = Batch::new();
        batch.enqueue_effect(effect(1));
        batch.enqueue_effect(effect(2));
        batch.enqueue_effect(effect(1));

        let closed = batch.close();
        let ids: Vec<_> = closed.effects.iter().map(|m| m.id).collect();
        assert_eq!(ids, [1, 2]);
        assert!(closed
            .effects
            .iter()
            .all(|m| matches!(m.listener, Listener::Effect(_))));
    }

    #[test]
    fn test_batch_without_refreshes() {
        let mut batch = Batch::new();
        assert!(!batch.has_pending());
        assert!(batch.next_refresh().is_none());
    }
}
