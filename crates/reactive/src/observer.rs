//! The per-instance state container and change dispatcher.
//!
//! An `Observer` owns the state bag of one tracked instance, the accessor
//! installed for every watched key, the follower registrations and the batch
//! that is open while a flush is pending.
//!
//! # Emission
//!
//! `emit` never notifies anyone directly. The first emit of a turn opens a
//! batch and hands a flush to the scheduler; later emits join that batch.
//! The flush first settles computed refreshes in ascending priority, then
//! closes the batch and runs each plain effect once with every handled key.
//!
//! # Invariants
//!
//! 1. Every watched key has exactly one accessor, and the accessor is the
//!    only path that reads or writes its entry in the state bag.
//! 2. Writing a value strictly equal to the stored one is a no-op.
//! 3. A follower is notified at most once per batch.
//! 4. Refreshes within one flush run in ascending priority order.
//! 5. After `destroy`, no batch is opened and no follower is notified.

use crate::action::ActionState;
use crate::batch::Batch;
use crate::computed::Computed;
use crate::follower::{Callback, Disposer, Followers, Listener};
use crate::instance::{Instance, InstanceInner};
use crate::model::{ComputeFn, SetEffect};
use crate::scheduler::Scheduler;
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::fmt;
use deepstate_core::{Error, Key, Result, Value};
use hashbrown::{HashMap, HashSet};

/// One-shot callback waiting for the next flush.
type Waiting = Box<dyn FnOnce(&[Key])>;

/// Receiver of refresh failures.
pub type ErrorSink = Rc<dyn Fn(&Error)>;

/// The accessor installed for a watched key.
#[derive(Clone)]
pub(crate) enum Accessor {
    /// Plain property, with an optional setter effect.
    Value(Option<SetEffect>),
    /// List compared element by element on write.
    Tuple,
    /// Getter-only computed property.
    Computed(Rc<Computed>),
    /// Single-flight action; reads as its active flag.
    Action(Rc<ActionState>),
    /// Valueless key that is only ever emitted.
    Event,
}

pub(crate) struct ObserverInner {
    type_name: Rc<str>,
    subject: Weak<InstanceInner>,
    scheduler: Rc<dyn Scheduler>,
    state: RefCell<HashMap<Key, Value>>,
    watched: RefCell<HashSet<Key>>,
    accessors: RefCell<HashMap<Key, Accessor>>,
    getters: RefCell<HashMap<Key, Rc<Computed>>>,
    followers: RefCell<Followers>,
    pending: RefCell<Option<Batch>>,
    waiting: RefCell<Vec<Waiting>>,
    error_sink: RefCell<Option<ErrorSink>>,
    destroyed: Cell<bool>,
}

/// State container and change dispatcher of one tracked instance.
///
/// Cloning an `Observer` creates a new handle to the **same** state.
#[derive(Clone)]
pub struct Observer {
    inner: Rc<ObserverInner>,
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("type_name", &self.inner.type_name)
            .field("watched", &self.keys())
            .field("followers", &self.follower_count())
            .field("pending", &self.is_pending())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Observer {
    pub(crate) fn new(
        type_name: Rc<str>,
        subject: Weak<InstanceInner>,
        scheduler: Rc<dyn Scheduler>,
    ) -> Self {
        Self {
            inner: Rc::new(ObserverInner {
                type_name,
                subject,
                scheduler,
                state: RefCell::new(HashMap::new()),
                watched: RefCell::new(HashSet::new()),
                accessors: RefCell::new(HashMap::new()),
                getters: RefCell::new(HashMap::new()),
                followers: RefCell::new(Followers::new()),
                pending: RefCell::new(None),
                waiting: RefCell::new(Vec::new()),
                error_sink: RefCell::new(None),
                destroyed: Cell::new(false),
            }),
        }
    }

    /// Name of the tracked instance's type.
    #[inline]
    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    /// Returns the tracked instance, if it is still alive.
    pub fn subject(&self) -> Option<Instance> {
        self.inner.subject.upgrade().map(Instance::from_inner)
    }

    /// Returns true if both handles refer to the same observer.
    #[inline]
    pub fn ptr_eq(&self, other: &Observer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<ObserverInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Rc<ObserverInner>) -> Self {
        Self { inner }
    }

    /// Returns true if `key` participates in change notification.
    pub fn is_watched(&self, key: &str) -> bool {
        self.inner.watched.borrow().contains(key)
    }

    /// Watched keys, sorted.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.inner.watched.borrow().iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys that hold a value: plain, tuple and computed properties.
    pub(crate) fn value_keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .inner
            .accessors
            .borrow()
            .iter()
            .filter(|(_, a)| {
                matches!(
                    a,
                    Accessor::Value(_) | Accessor::Tuple | Accessor::Computed(_)
                )
            })
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of live follower registrations.
    pub fn follower_count(&self) -> usize {
        self.inner.followers.borrow().len()
    }

    /// Returns true while a batch is open.
    pub fn is_pending(&self) -> bool {
        self.inner.pending.borrow().is_some()
    }

    /// Returns true once `destroy` has run.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Installs a receiver for refresh failures.
    pub fn set_error_sink(&self, sink: impl Fn(&Error) + 'static) {
        *self.inner.error_sink.borrow_mut() = Some(Rc::new(sink));
    }

    /// Registers `key` as a watched plain property.
    ///
    /// The state is seeded with `initial` unless it is `Undefined`. If
    /// `effect` is given, the setter runs it synchronously with the new value
    /// and the instance before emitting.
    pub fn monitor_value(&self, key: &str, initial: Value, effect: Option<SetEffect>) {
        let key = self.intern(key);
        if !initial.is_undefined() {
            self.inner.state.borrow_mut().insert(key.clone(), initial);
        }
        self.install(key, Accessor::Value(effect));
    }

    /// Registers `key` as a lazily initialized computed property.
    ///
    /// Getters are installed while the instance is constructed, before any
    /// follower can exist, so the compute function never runs here. The first
    /// read or follower registration evaluates it.
    pub(crate) fn monitor_computed(&self, key: &str, compute: ComputeFn) {
        let key = self.intern(key);
        let computed = Rc::new(Computed::new(key.clone(), compute, self.downgrade()));
        self.inner
            .getters
            .borrow_mut()
            .insert(key.clone(), computed.clone());
        self.install(key, Accessor::Computed(computed));
    }

    /// Registers `key` as a watched tuple: a list that is only replaced when
    /// some element strictly differs.
    pub(crate) fn monitor_tuple(&self, key: &str, initial: Value) {
        let key = self.intern(key);
        if !initial.is_undefined() {
            self.inner.state.borrow_mut().insert(key.clone(), initial);
        }
        self.install(key, Accessor::Tuple);
    }

    pub(crate) fn monitor_action(&self, state: Rc<ActionState>) {
        let key = self.intern(state.key());
        self.install(key, Accessor::Action(state));
    }

    pub(crate) fn monitor_event(&self, key: &str) {
        let key = self.intern(key);
        self.install(key, Accessor::Event);
    }

    fn install(&self, key: Key, accessor: Accessor) {
        self.inner.watched.borrow_mut().insert(key.clone());
        self.inner.accessors.borrow_mut().insert(key, accessor);
    }

    fn accessor(&self, key: &str) -> Option<Accessor> {
        self.inner.accessors.borrow().get(key).cloned()
    }

    pub(crate) fn is_event(&self, key: &str) -> bool {
        matches!(self.accessor(key), Some(Accessor::Event))
    }

    pub(crate) fn action_state(&self, key: &str) -> Option<Rc<ActionState>> {
        match self.accessor(key) {
            Some(Accessor::Action(state)) => Some(state),
            _ => None,
        }
    }

    /// Returns the shared key for `key`, reusing a watched one if present.
    fn intern(&self, key: &str) -> Key {
        self.inner
            .watched
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or_else(|| Key::from(key))
    }

    pub(crate) fn computed(&self, key: &str) -> Option<Rc<Computed>> {
        self.inner.getters.borrow().get(key).cloned()
    }

    /// Current state entry, without initializing anything.
    pub(crate) fn peek(&self, key: &str) -> Value {
        self.inner
            .state
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Stores a value without emitting.
    pub(crate) fn store(&self, key: &Key, value: Value) {
        self.inner.state.borrow_mut().insert(key.clone(), value);
    }

    /// Stores `value` if it strictly differs from the current entry.
    /// Returns true if the state changed.
    pub(crate) fn replace(&self, key: &Key, value: Value) -> bool {
        let unchanged = match self.inner.state.borrow().get(key) {
            Some(current) => current.strict_eq(&value),
            None => value.is_undefined(),
        };
        if unchanged {
            return false;
        }
        self.store(key, value);
        true
    }

    /// Reads a watched property through its accessor.
    ///
    /// A computed property that was never evaluated is initialized here; if
    /// its compute function fails the error is returned and the property
    /// stays unset.
    pub fn read(&self, key: &str) -> Result<Value> {
        match self.accessor(key) {
            Some(Accessor::Value(_)) | Some(Accessor::Tuple) => Ok(self.peek(key)),
            Some(Accessor::Computed(computed)) => {
                if computed.is_initialized() || self.is_destroyed() {
                    Ok(self.peek(key))
                } else {
                    computed.initialize(false)
                }
            }
            Some(Accessor::Action(state)) => Ok(Value::Bool(state.is_active())),
            Some(Accessor::Event) => Ok(Value::Undefined),
            None => Err(Error::unknown_property(self.type_name(), key)),
        }
    }

    /// Writes a watched property through its accessor.
    ///
    /// Assigning a computed or event key is skipped with a warning.
    pub fn write(&self, key: &str, value: Value) -> Result<()> {
        match self.accessor(key) {
            Some(Accessor::Value(effect)) => {
                let key = self.intern(key);
                if !self.replace(&key, value.clone()) {
                    return Ok(());
                }
                if let Some(effect) = effect {
                    if let Some(subject) = self.subject() {
                        effect(&value, &subject);
                    }
                }
                self.emit(&key);
                Ok(())
            }
            Some(Accessor::Tuple) => {
                let key = self.intern(key);
                if self.merge_tuple(&key, value)? {
                    self.emit(&key);
                }
                Ok(())
            }
            Some(Accessor::Computed(_)) | Some(Accessor::Event) => {
                tracing::warn!(
                    type_name = %self.inner.type_name,
                    key,
                    "Property {} is a getter only. Assignment was skipped.",
                    key
                );
                Ok(())
            }
            Some(Accessor::Action(_)) => Err(Error::set_action_property(key)),
            None => Err(Error::unknown_property(self.type_name(), key)),
        }
    }

    /// Stores a tuple write if its length or any element strictly differs
    /// from the current list. Returns true if the state changed.
    fn merge_tuple(&self, key: &Key, next: Value) -> Result<bool> {
        let Value::List(items) = &next else {
            return Err(Error::type_mismatch(&**key, "list", next.type_name()));
        };
        let changed = match self.inner.state.borrow().get(key) {
            Some(Value::List(current)) => {
                current.len() != items.len()
                    || current.iter().zip(items.iter()).any(|(a, b)| !a.strict_eq(b))
            }
            _ => true,
        };
        if changed {
            self.store(key, next);
        }
        Ok(changed)
    }

    /// Registers `callback` for changes to any of `keys`.
    ///
    /// Computed keys that were never evaluated are evaluated before the
    /// registration completes. A `once` registration is removed before its
    /// first notification.
    pub fn add_listener<I, K>(
        &self,
        keys: I,
        callback: impl Fn(&[Key]) + 'static,
        once: bool,
    ) -> Result<Disposer>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let callback: Callback = Rc::new(callback);
        let keys = keys.into_iter().map(|k| self.intern(k.as_ref())).collect();
        self.follow(keys, Listener::Effect(callback), once)
    }

    pub(crate) fn follow(
        &self,
        keys: HashSet<Key>,
        listener: Listener,
        once: bool,
    ) -> Result<Disposer> {
        if self.is_destroyed() {
            return Ok(Disposer::noop());
        }
        for key in &keys {
            if let Some(computed) = self.computed(key) {
                if !computed.is_initialized() {
                    computed.initialize(true)?;
                }
            }
        }

        let id = self.inner.followers.borrow_mut().add(keys, listener, once);
        let weak = self.downgrade();
        Ok(Disposer::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.followers.borrow_mut().remove(id);
            }
        }))
    }

    /// Signals that `key` changed.
    ///
    /// Opens a batch and schedules its flush if none is open, otherwise joins
    /// the open batch. Always returns immediately.
    pub fn emit(&self, key: &str) {
        if self.is_destroyed() {
            return;
        }
        let key = self.intern(key);
        let opened = {
            let mut pending = self.inner.pending.borrow_mut();
            if pending.is_none() {
                *pending = Some(Batch::new());
                true
            } else {
                false
            }
        };

        self.include(&key);

        if opened {
            tracing::trace!(type_name = %self.inner.type_name, key = %key, "batch opened");
            let weak = self.downgrade();
            self.inner.scheduler.schedule_flush(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Observer::from_inner(inner).flush();
                }
            }));
        }
    }

    /// Adds `key` to the open batch and sorts its followers into refreshes
    /// and effects.
    fn include(&self, key: &Key) {
        let fresh = match self.inner.pending.borrow_mut().as_mut() {
            Some(batch) => batch.mark(key),
            None => false,
        };
        if !fresh {
            return;
        }

        let matched = self.inner.followers.borrow().matching(key);
        let mut pending = self.inner.pending.borrow_mut();
        let Some(batch) = pending.as_mut() else {
            return;
        };
        for m in matched {
            match &m.listener {
                Listener::Refresh(computed) if computed.is_owned_by(&self.inner) => {
                    batch.enqueue_refresh(computed.clone());
                }
                _ => batch.enqueue_effect(m),
            }
        }
    }

    /// Runs the open batch to completion.
    pub(crate) fn flush(&self) {
        loop {
            let next = match self.inner.pending.borrow_mut().as_mut() {
                Some(batch) if batch.has_pending() => batch.next_refresh(),
                Some(_) => None,
                None => return,
            };
            match next {
                Some(computed) => computed.refresh(),
                None => break,
            }
        }

        let Some(batch) = self.inner.pending.borrow_mut().take() else {
            return;
        };
        let closed = batch.close();
        tracing::trace!(
            type_name = %self.inner.type_name,
            keys = closed.frame.len(),
            effects = closed.effects.len(),
            "batch flushed"
        );

        for matched in closed.effects {
            if self.is_destroyed() {
                return;
            }
            if matched.once {
                self.inner.followers.borrow_mut().remove(matched.id);
            }
            matched.listener.call(&closed.frame);
        }

        let waiting = core::mem::take(&mut *self.inner.waiting.borrow_mut());
        for callback in waiting {
            callback(&closed.frame);
        }
    }

    /// Runs `callback` with the changed keys of the next flush.
    pub fn request_update(&self, callback: impl FnOnce(&[Key]) + 'static) {
        if self.is_destroyed() {
            return;
        }
        self.inner.waiting.borrow_mut().push(Box::new(callback));
    }

    /// Forwards a refresh failure to the error sink, if any.
    pub(crate) fn report(&self, error: &Error) {
        let sink = self.inner.error_sink.borrow().clone();
        if let Some(sink) = sink {
            sink(error);
        }
    }

    /// Drops every follower and the open batch. Later emits are ignored.
    pub fn destroy(&self) {
        if !self.teardown() {
            tracing::warn!(
                type_name = %self.inner.type_name,
                "{}.destroy() was called on an instance which is not active.",
                self.inner.type_name
            );
        }
    }

    /// Destroys the observer. Returns false if it was already destroyed.
    pub(crate) fn teardown(&self) -> bool {
        if self.inner.destroyed.replace(true) {
            return false;
        }
        self.inner.pending.borrow_mut().take();
        self.inner.followers.borrow_mut().clear();
        self.inner.waiting.borrow_mut().clear();

        let getters: Vec<Rc<Computed>> = self.inner.getters.borrow().values().cloned().collect();
        for computed in getters {
            computed.release();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelType;
    use crate::scheduler::ManualScheduler;
    use alloc::vec;

    fn instance() -> (Rc<ManualScheduler>, Instance) {
        let sched = Rc::new(ManualScheduler::new());
        let ty = ModelType::builder("Sample")
            .value("a", 1)
            .value("unset", Value::Undefined)
            .computed("b", |v| Ok(Value::Int(v.get_int("a")? + 1)))
            .event("tick")
            .build();
        let instance = Instance::new(&ty, sched.clone());
        (sched, instance)
    }

    #[test]
    fn test_read_write_through_accessors() {
        let (_sched, t) = instance();
        let observer = t.observer();

        assert_eq!(observer.read("a").unwrap(), Value::Int(1));
        assert_eq!(observer.read("unset").unwrap(), Value::Undefined);
        observer.write("a", Value::Int(2)).unwrap();
        assert_eq!(observer.read("b").unwrap(), Value::Int(3));

        assert!(matches!(
            observer.read("nope"),
            Err(Error::UnknownProperty { .. })
        ));
        assert!(observer.write("nope", Value::Null).is_err());
    }

    #[test]
    fn test_watched_keys() {
        let (_sched, t) = instance();
        let observer = t.observer();

        let keys = observer.keys();
        let names: Vec<&str> = keys.iter().map(|k| &**k).collect();
        assert_eq!(names, vec!["a", "b", "tick", "unset"]);
        assert!(observer.is_watched("tick"));
        assert!(!observer.is_watched("c"));
        assert_eq!(observer.type_name(), "Sample");
        assert!(observer.subject().unwrap().ptr_eq(&t));
    }

    #[test]
    fn test_emit_opens_one_batch() {
        let (sched, t) = instance();
        let observer = t.observer();

        assert!(!observer.is_pending());
        observer.emit("a");
        observer.emit("tick");
        assert!(observer.is_pending());
        assert_eq!(sched.pending(), 1);

        sched.flush_now();
        assert!(!observer.is_pending());
    }

    #[test]
    fn test_add_listener_and_dispose() {
        let (sched, t) = instance();
        let observer = t.observer();
        let frames = Rc::new(RefCell::new(Vec::new()));
        let sink = frames.clone();

        let disposer = observer
            .add_listener(["a", "tick"], move |keys| sink.borrow_mut().push(keys.to_vec()), false)
            .unwrap();
        assert_eq!(observer.follower_count(), 1);

        observer.emit("tick");
        observer.emit("a");
        observer.emit("tick");
        sched.flush_now();
        assert_eq!(frames.borrow().len(), 1);
        assert_eq!(frames.borrow()[0], vec![Key::from("tick"), Key::from("a")]);

        disposer.dispose();
        assert_eq!(observer.follower_count(), 0);
    }

    #[test]
    fn test_destroy_twice() {
        let (sched, t) = instance();
        let observer = t.observer();
        assert_eq!(observer.read("b").unwrap(), Value::Int(2));

        observer.emit("a");
        observer.destroy();
        assert!(observer.is_destroyed());
        assert!(!observer.is_pending());
        observer.destroy();

        observer.emit("a");
        sched.flush_now();
        assert!(!observer.is_pending());
        assert!(observer.add_listener(["a"], |_| {}, false).unwrap().is_disposed());
    }
}
