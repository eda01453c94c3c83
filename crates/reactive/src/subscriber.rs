//! Per-consumer watch sessions and their tracking views.
//!
//! A `Subscriber` records which keys its consumer actually reads through a
//! [`View`] and, once armed with [`Subscriber::listen`], registers exactly
//! those keys with the observer. Reads that land on a nested tracked instance
//! go through a child subscriber sharing the parent's trigger, so a change
//! deep in the tree reaches the consumer as if it were a direct property.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use deepstate_reactive::{Instance, ManualScheduler, ModelType, Scheduler, Subscriber};
//!
//! let scheduler = Rc::new(ManualScheduler::new());
//! let ty = ModelType::builder("Counter").value("count", 0).build();
//! let counter = Instance::new(&ty, scheduler.clone());
//!
//! let renders = Rc::new(Cell::new(0));
//! let hits = renders.clone();
//! let sub = Subscriber::new(&counter, move |_| hits.set(hits.get() + 1));
//! assert_eq!(sub.view().get_int("count").unwrap(), 0);
//! let _disposer = sub.listen().unwrap();
//!
//! counter.set("count", 1).unwrap();
//! scheduler.flush_now();
//! assert_eq!(renders.get(), 1);
//! ```

use crate::follower::{Disposer, Listener};
use crate::instance::Instance;
use crate::observer::Observer;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use deepstate_core::{Error, Key, Result, Value};
use hashbrown::{HashMap, HashSet};

struct SubscriberInner {
    observer: Observer,
    listener: Listener,
    following: RefCell<HashSet<Key>>,
    children: RefCell<HashMap<Key, Subscriber>>,
    armed: RefCell<Option<(HashSet<Key>, Disposer)>>,
}

/// A watch session over one tracked instance.
#[derive(Clone)]
pub struct Subscriber {
    inner: Rc<SubscriberInner>,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("type_name", &self.inner.observer.type_name())
            .field("following", &self.following())
            .field("armed", &self.is_armed())
            .finish()
    }
}

/// Result of focusing a single property.
#[derive(Clone, Debug)]
pub enum Focus {
    /// A plain value.
    Value(Value),
    /// A nested tracked instance, observed through a child view.
    Nested(View),
}

impl Subscriber {
    /// Creates a session over `instance` that calls `trigger` with the
    /// changed keys once armed.
    pub fn new(instance: &Instance, trigger: impl Fn(&[Key]) + 'static) -> Self {
        Self::with_listener(instance, Listener::Effect(Rc::new(trigger)))
    }

    pub(crate) fn with_listener(instance: &Instance, listener: Listener) -> Self {
        Self::from_observer(instance.observer().clone(), listener)
    }

    fn from_observer(observer: Observer, listener: Listener) -> Self {
        Self {
            inner: Rc::new(SubscriberInner {
                observer,
                listener,
                following: RefCell::new(HashSet::new()),
                children: RefCell::new(HashMap::new()),
                armed: RefCell::new(None),
            }),
        }
    }

    /// Returns the tracking view.
    pub fn view(&self) -> View {
        View {
            subscriber: self.clone(),
        }
    }

    /// The observer this session watches.
    pub fn observer(&self) -> &Observer {
        &self.inner.observer
    }

    /// Keys read so far, sorted.
    pub fn following(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.inner.following.borrow().iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns true between `listen` and `release`.
    pub fn is_armed(&self) -> bool {
        self.inner.armed.borrow().is_some()
    }

    /// Adds `key` to the following set. An armed session extends its
    /// registration right away, so reads made after `listen` are covered
    /// without listening again.
    fn record(&self, key: &str) -> Result<()> {
        let added = {
            let mut following = self.inner.following.borrow_mut();
            !following.contains(key) && following.insert(Key::from(key))
        };
        if added && self.is_armed() {
            self.arm()?;
        }
        Ok(())
    }

    /// Focuses `key`, failing if it is `required` and resolves to `Undefined`.
    ///
    /// A failed required read records nothing.
    pub fn focus(&self, key: &str, required: bool) -> Result<Focus> {
        let value = self.inner.observer.read(key)?;
        if required && value.is_undefined() {
            return Err(Error::required(self.inner.observer.type_name(), key));
        }
        self.resolve(key, value)
    }

    /// Records `key` and resolves the focused value through `resolver`.
    pub fn watch(
        &self,
        key: &str,
        resolver: impl FnOnce(&View) -> Result<Value>,
    ) -> Result<Focus> {
        let value = resolver(&self.view())?;
        self.resolve(key, value)
    }

    fn resolve(&self, key: &str, value: Value) -> Result<Focus> {
        self.record(key)?;
        match Instance::from_value(&value) {
            Some(instance) => Ok(Focus::Nested(self.child(key, &instance)?.view())),
            None => Ok(Focus::Value(value)),
        }
    }

    /// Returns the child session for the instance held under `key`, replacing
    /// a child that watches a different instance.
    fn child(&self, key: &str, instance: &Instance) -> Result<Subscriber> {
        let existing = self.inner.children.borrow().get(key).cloned();
        if let Some(child) = existing {
            if child.inner.observer.ptr_eq(instance.observer()) {
                return Ok(child);
            }
            child.release();
        }

        let child = Self::from_observer(instance.observer().clone(), self.inner.listener.clone());
        self.inner
            .children
            .borrow_mut()
            .insert(Key::from(key), child.clone());
        if self.is_armed() {
            child.arm()?;
        }
        Ok(child)
    }

    /// Arms the session with the keys read so far, and every child session.
    ///
    /// Calling it again re-registers only if new keys were read since. The
    /// returned disposer releases the whole session.
    pub fn listen(&self) -> Result<Disposer> {
        self.arm()?;

        let children: Vec<Subscriber> = self.inner.children.borrow().values().cloned().collect();
        for child in children {
            let _ = child.listen()?;
        }

        let weak = Rc::downgrade(&self.inner);
        Ok(Disposer::new(move || {
            if let Some(inner) = weak.upgrade() {
                Subscriber { inner }.release();
            }
        }))
    }

    /// Registers the current following set, replacing the previous
    /// registration only once the new one is in place.
    fn arm(&self) -> Result<()> {
        let keys = self.inner.following.borrow().clone();
        if matches!(&*self.inner.armed.borrow(), Some((armed, _)) if *armed == keys) {
            return Ok(());
        }

        let disposer = if keys.is_empty() {
            Disposer::noop()
        } else {
            self.inner
                .observer
                .follow(keys.clone(), self.inner.listener.clone(), false)?
        };
        let previous = self.inner.armed.replace(Some((keys, disposer)));
        if let Some((_, disposer)) = previous {
            disposer.dispose();
        }
        Ok(())
    }

    /// Removes the registration of this session and all of its children.
    pub fn release(&self) {
        let armed = self.inner.armed.borrow_mut().take();
        if let Some((_, disposer)) = armed {
            disposer.dispose();
        }
        let children: Vec<Subscriber> = self
            .inner
            .children
            .borrow_mut()
            .drain()
            .map(|(_, child)| child)
            .collect();
        for child in children {
            child.release();
        }
    }

    /// Highest priority among the initialized computed properties this
    /// session has read, including through children.
    pub(crate) fn max_priority(&self) -> Option<u32> {
        let mut best = None;
        for key in self.inner.following.borrow().iter() {
            if let Some(computed) = self.inner.observer.computed(key) {
                if computed.is_initialized() {
                    best = best.max(Some(computed.priority()));
                }
            }
        }
        for child in self.inner.children.borrow().values() {
            best = best.max(child.max_priority());
        }
        best
    }
}

/// Read-tracking view handed to consumers and compute functions.
///
/// Every read records the key with the owning subscriber and returns the
/// live value.
#[derive(Clone)]
pub struct View {
    subscriber: Subscriber,
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("type_name", &self.subscriber.inner.observer.type_name())
            .finish()
    }
}

impl View {
    /// Reads `key` and records it.
    pub fn get(&self, key: &str) -> Result<Value> {
        let value = self.subscriber.inner.observer.read(key)?;
        self.subscriber.record(key)?;
        Ok(value)
    }

    /// Reads `key`, failing with [`Error::Required`] if it is `Undefined`.
    pub fn require(&self, key: &str) -> Result<Value> {
        let value = self.get(key)?;
        if value.is_undefined() {
            return Err(Error::required(self.type_name(), key));
        }
        Ok(value)
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        let value = self.get(key)?;
        value
            .as_int()
            .ok_or_else(|| Error::type_mismatch(key, "int", value.type_name()))
    }

    /// Reads a number; integers are widened.
    pub fn get_float(&self, key: &str) -> Result<f64> {
        let value = self.get(key)?;
        value
            .as_float()
            .ok_or_else(|| Error::type_mismatch(key, "float", value.type_name()))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        let value = self.get(key)?;
        value
            .as_bool()
            .ok_or_else(|| Error::type_mismatch(key, "bool", value.type_name()))
    }

    pub fn get_str(&self, key: &str) -> Result<Rc<str>> {
        match self.get(key)? {
            Value::Str(s) => Ok(s),
            other => Err(Error::type_mismatch(key, "string", other.type_name())),
        }
    }

    /// Follows `key` into the tracked instance it holds.
    ///
    /// Returns `None` if the value is not a tracked instance.
    pub fn nested(&self, key: &str) -> Result<Option<View>> {
        match self.subscriber.focus(key, false)? {
            Focus::Nested(view) => Ok(Some(view)),
            Focus::Value(_) => Ok(None),
        }
    }

    /// The instance behind this view, if still alive.
    pub fn instance(&self) -> Option<Instance> {
        self.subscriber.inner.observer.subject()
    }

    #[inline]
    pub fn type_name(&self) -> &str {
        self.subscriber.inner.observer.type_name()
    }
}
