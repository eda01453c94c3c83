//! Follower registrations and their disposers.
//!
//! A follower maps a set of watched keys to one listener. The observer keeps
//! followers in registration order so effects fire deterministically.

use crate::computed::Computed;
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use deepstate_core::Key;
use hashbrown::HashSet;

/// Unique identifier for a follower within one observer.
pub type FollowerId = u64;

/// Callback invoked with the keys changed in a flush.
pub type Callback = Rc<dyn Fn(&[Key])>;

/// What a follower runs when one of its keys changes.
#[derive(Clone)]
pub(crate) enum Listener {
    /// Plain effect, run once per flush with the changed keys.
    Effect(Callback),
    /// Refresh of a computed property.
    Refresh(Rc<Computed>),
}

impl Listener {
    pub(crate) fn call(&self, frame: &[Key]) {
        match self {
            Listener::Effect(callback) => callback(frame),
            Listener::Refresh(computed) => computed.refresh(),
        }
    }
}

pub(crate) struct Follower {
    id: FollowerId,
    keys: HashSet<Key>,
    listener: Listener,
    once: bool,
}

/// A follower matched by an emitted key.
pub(crate) struct Matched {
    pub id: FollowerId,
    pub listener: Listener,
    pub once: bool,
}

/// Registration-ordered follower list.
pub(crate) struct Followers {
    entries: Vec<Follower>,
    next_id: FollowerId,
}

impl Default for Followers {
    fn default() -> Self {
        Self::new()
    }
}

impl Followers {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn add(&mut self, keys: HashSet<Key>, listener: Listener, once: bool) -> FollowerId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Follower {
            id,
            keys,
            listener,
            once,
        });
        id
    }

    pub fn remove(&mut self, id: FollowerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|f| f.id != id);
        self.entries.len() != before
    }

    /// Returns every follower interested in `key`.
    pub fn matching(&self, key: &str) -> Vec<Matched> {
        self.entries
            .iter()
            .filter(|f| f.keys.contains(key))
            .map(|f| Matched {
                id: f.id,
                listener: f.listener.clone(),
                once: f.once,
            })
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Handle that removes a registration.
///
/// Disposal is idempotent: the first call runs the teardown, later calls do
/// nothing. Clones share the same state.
#[derive(Clone)]
#[must_use = "dropping a disposer does not remove the registration"]
pub struct Disposer {
    slot: Rc<RefCell<Option<Box<dyn FnOnce()>>>>,
}

impl Disposer {
    pub(crate) fn new(teardown: impl FnOnce() + 'static) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Some(Box::new(teardown)))),
        }
    }

    /// A disposer with nothing to tear down.
    pub fn noop() -> Self {
        Self {
            slot: Rc::new(RefCell::new(None)),
        }
    }

    /// Removes the registration. Later calls are no-ops.
    pub fn dispose(&self) {
        let teardown = self.slot.borrow_mut().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Returns true once the registration has been removed.
    pub fn is_disposed(&self) -> bool {
        self.slot.borrow().is_none()
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
