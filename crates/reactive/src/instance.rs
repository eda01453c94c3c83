//! Tracked instances.
//!
//! An `Instance` is a handle to one object built from a [`ModelType`]. It
//! owns exactly one [`Observer`]; every tracked property is read and written
//! through that observer's accessors. Untracked fields live beside it and
//! are never emitted.

use crate::action::{Action, ActionState};
use crate::follower::Disposer;
use crate::lifecycle;
use crate::model::{FieldInit, FieldKind, MemoFn, ModelType, PhaseHandler};
use crate::observer::Observer;
use crate::scheduler::Scheduler;
use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::fmt;
use core::future::Future;
use deepstate_core::{Error, Key, Result, Value};
use futures::channel::oneshot;
use hashbrown::HashMap;

pub(crate) struct InstanceInner {
    ty: Rc<ModelType>,
    observer: Observer,
    untracked: RefCell<HashMap<Key, Value>>,
    deferred: RefCell<HashMap<Key, MemoFn>>,
    handlers: RefCell<Vec<(u64, Key, PhaseHandler)>>,
    next_handler: Cell<u64>,
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        self.observer.teardown();
    }
}

/// Handle to a tracked instance.
///
/// Cloning creates a new handle to the **same** instance.
#[derive(Clone)]
pub struct Instance {
    inner: Rc<InstanceInner>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type_name", &self.type_name())
            .field("keys", &self.inner.observer.keys())
            .finish()
    }
}

impl Instance {
    /// Constructs an instance of `ty`, classifies its fields and forwards the
    /// `didCreate` phase.
    pub fn new(ty: &Rc<ModelType>, scheduler: Rc<dyn Scheduler>) -> Self {
        let inner = Rc::new_cyclic(|weak| InstanceInner {
            ty: ty.clone(),
            observer: Observer::new(ty.name_rc(), weak.clone(), scheduler.clone()),
            untracked: RefCell::new(HashMap::new()),
            deferred: RefCell::new(HashMap::new()),
            handlers: RefCell::new(Vec::new()),
            next_handler: Cell::new(1),
        });
        let instance = Self { inner };
        instance.start(&scheduler);
        instance.lifecycle(lifecycle::DID_CREATE);
        instance
    }

    pub(crate) fn from_inner(inner: Rc<InstanceInner>) -> Self {
        Self { inner }
    }

    fn start(&self, scheduler: &Rc<dyn Scheduler>) {
        let ty = &self.inner.ty;
        let observer = &self.inner.observer;

        for field in ty.fields() {
            let initial = match &field.init {
                FieldInit::Value(v) => v.clone(),
                FieldInit::Child(child) => Instance::new(child, scheduler.clone()).to_value(),
                FieldInit::Memo { factory, lazy: true } => {
                    self.inner
                        .deferred
                        .borrow_mut()
                        .insert(field.key.clone(), factory.clone());
                    continue;
                }
                FieldInit::Memo { factory, lazy: false } => factory(self),
            };
            if field.is_untracked() {
                self.inner
                    .untracked
                    .borrow_mut()
                    .insert(field.key.clone(), initial);
            } else if field.kind == FieldKind::Tuple {
                observer.monitor_tuple(&field.key, initial);
            } else {
                observer.monitor_value(&field.key, initial, field.effect.clone());
            }
        }

        for key in ty.events() {
            observer.monitor_event(key);
        }
        for (key, run) in ty.actions() {
            observer.monitor_action(Rc::new(ActionState::new(
                key.clone(),
                run.clone(),
                observer.downgrade(),
            )));
        }
        for (key, compute) in ty.getters() {
            if !observer.is_watched(key) {
                observer.monitor_computed(key, compute.clone());
            }
        }
    }

    /// The observer that owns this instance's state.
    #[inline]
    pub fn observer(&self) -> &Observer {
        &self.inner.observer
    }

    #[inline]
    pub fn type_name(&self) -> &str {
        self.inner.ty.name()
    }

    pub fn model_type(&self) -> &Rc<ModelType> {
        &self.inner.ty
    }

    /// Reads a tracked or untracked property.
    ///
    /// A lazy memo is computed on its first read.
    pub fn get(&self, key: &str) -> Result<Value> {
        if let Some(value) = self.inner.untracked.borrow().get(key) {
            return Ok(value.clone());
        }
        let deferred = self.inner.deferred.borrow_mut().remove(key);
        if let Some(factory) = deferred {
            let value = factory(self);
            self.inner
                .untracked
                .borrow_mut()
                .insert(Key::from(key), value.clone());
            return Ok(value);
        }
        self.inner.observer.read(key)
    }

    /// Writes a tracked or untracked property.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if self.inner.deferred.borrow_mut().remove(key).is_some() {
            self.inner
                .untracked
                .borrow_mut()
                .insert(Key::from(key), value);
            return Ok(());
        }
        {
            let mut untracked = self.inner.untracked.borrow_mut();
            if let Some(slot) = untracked.get_mut(key) {
                *slot = value;
                return Ok(());
            }
        }
        self.inner.observer.write(key, value)
    }

    /// Calls `callback` with the changed keys whenever any of `keys` changes.
    pub fn on<I, K>(&self, keys: I, callback: impl Fn(&[Key]) + 'static) -> Result<Disposer>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.inner.observer.add_listener(keys, callback, false)
    }

    /// Like [`on`](Self::on), but only for the next change.
    pub fn once<I, K>(&self, keys: I, callback: impl Fn(&[Key]) + 'static) -> Result<Disposer>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.inner.observer.add_listener(keys, callback, true)
    }

    /// Resolves with the value of `key` after its next change.
    ///
    /// Dropping the future removes the registration. If the instance is
    /// destroyed first, it resolves to [`Error::Canceled`].
    pub fn next_value(&self, key: &str) -> Result<impl Future<Output = Result<Value>>> {
        let observer = &self.inner.observer;
        if !observer.is_watched(key) {
            return Err(Error::unknown_property(self.type_name(), key));
        }

        let (tx, rx) = oneshot::channel();
        let tx = RefCell::new(Some(tx));
        let weak = observer.downgrade();
        let key = Key::from(key);
        let read_key = key.clone();
        let registration = observer.add_listener(
            [key],
            move |_| {
                let Some(tx) = tx.borrow_mut().take() else {
                    return;
                };
                if let Some(inner) = weak.upgrade() {
                    let _ = tx.send(Observer::from_inner(inner).read(&read_key));
                }
            },
            true,
        )?;

        let guard = Registration(registration);
        let type_name: Rc<str> = self.inner.ty.name_rc();
        Ok(async move {
            let _guard = guard;
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::canceled(&*type_name)),
            }
        })
    }

    /// Runs `callback` now with an empty frame, then on every change of `keys`.
    pub fn effect<I, K>(&self, keys: I, callback: impl Fn(&[Key]) + 'static) -> Result<Disposer>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        callback(&[]);
        self.on(keys, callback)
    }

    /// Snapshot of the given keys, or of every value-holding tracked key.
    pub fn export(&self, keys: Option<&[&str]>) -> Result<BTreeMap<Key, Value>> {
        let keys: Vec<Key> = match keys {
            Some(keys) => keys.iter().map(|k| Key::from(*k)).collect(),
            None => self.inner.observer.value_keys(),
        };
        let mut out = BTreeMap::new();
        for key in keys {
            let value = self.get(&key)?;
            out.insert(key, value);
        }
        Ok(out)
    }

    /// Assigns several properties in one call. Every write joins the same
    /// batch; the first failing write stops the rest.
    pub fn assign<I, K, V>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (key, value) in entries {
            self.set(key.as_ref(), value)?;
        }
        Ok(())
    }

    /// Emits `keys` without changing them.
    pub fn update<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        for key in keys {
            self.inner.observer.emit(key.as_ref());
        }
    }

    /// Runs `callback` with the changed keys of the next flush.
    pub fn request_update(&self, callback: impl FnOnce(&[Key]) + 'static) {
        self.inner.observer.request_update(callback);
    }

    /// Resolves with the changed keys of the next flush.
    pub fn next_update(&self) -> impl Future<Output = Result<Vec<Key>>> {
        let (tx, rx) = oneshot::channel();
        self.inner.observer.request_update(move |keys| {
            let _ = tx.send(keys.to_vec());
        });
        let type_name: Rc<str> = self.inner.ty.name_rc();
        async move {
            match rx.await {
                Ok(keys) => Ok(keys),
                Err(_) => Err(Error::canceled(&*type_name)),
            }
        }
    }

    /// Returns the handle of a field declared with
    /// [`ModelBuilder::ref_object`](crate::ModelBuilder::ref_object).
    pub fn ref_object(&self, key: &str) -> Result<RefObject> {
        if !self.inner.ty.is_ref(key) {
            return Err(Error::type_mismatch(key, "ref", self.get(key)?.type_name()));
        }
        Ok(RefObject {
            instance: self.clone(),
            key: Key::from(key),
        })
    }

    /// Emits a declared event.
    pub fn fire(&self, event: &str) -> Result<()> {
        if !self.inner.observer.is_event(event) {
            return Err(Error::unknown_property(self.type_name(), event));
        }
        self.inner.observer.emit(event);
        Ok(())
    }

    /// Returns a handle to a declared action.
    pub fn action(&self, key: &str) -> Result<Action> {
        let state = self
            .inner
            .observer
            .action_state(key)
            .ok_or_else(|| Error::unknown_property(self.type_name(), key))?;
        Ok(Action::new(state, self.clone()))
    }

    /// Forwards a lifecycle phase tag to every handler registered under it,
    /// type handlers first. Unhandled tags are ignored.
    pub fn lifecycle(&self, tag: &str) {
        let mut handlers: Vec<PhaseHandler> = self.inner.ty.handlers(tag).cloned().collect();
        handlers.extend(
            self.inner
                .handlers
                .borrow()
                .iter()
                .filter(|(_, k, _)| &**k == tag)
                .map(|(_, _, h)| h.clone()),
        );
        let known = lifecycle::is_known(tag);
        if handlers.is_empty() {
            tracing::trace!(type_name = %self.type_name(), tag, known, "lifecycle tag unhandled");
            return;
        }
        tracing::trace!(
            type_name = %self.type_name(),
            tag,
            known,
            handlers = handlers.len(),
            "lifecycle"
        );
        for handler in handlers {
            handler(self);
        }
    }

    /// Registers an instance-level handler for a lifecycle phase tag.
    pub fn on_phase(&self, tag: &str, handler: impl Fn(&Instance) + 'static) -> Disposer {
        let id = self.inner.next_handler.get();
        self.inner.next_handler.set(id + 1);
        self.inner
            .handlers
            .borrow_mut()
            .push((id, Key::from(tag), Rc::new(handler)));

        let weak = Rc::downgrade(&self.inner);
        Disposer::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handlers.borrow_mut().retain(|(i, _, _)| *i != id);
            }
        })
    }

    /// Forwards `willDestroy`, then destroys the observer.
    pub fn destroy(&self) {
        if !self.inner.observer.is_destroyed() {
            self.lifecycle(lifecycle::WILL_DESTROY);
        }
        self.inner.observer.destroy();
    }

    /// Recovers an instance stored in a property value.
    pub fn from_value(value: &Value) -> Option<Instance> {
        let object = value.as_object()?.clone();
        object.downcast::<InstanceInner>().ok().map(Self::from_inner)
    }

    /// Wraps this instance as a property value.
    pub fn to_value(&self) -> Value {
        Value::object(self.inner.clone())
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Removes a listener registration when dropped.
struct Registration(Disposer);

impl Drop for Registration {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

/// Handle to a ref field.
///
/// `current` goes through the same watched accessor as any plain property,
/// so assigning it notifies followers of the field's key.
#[derive(Clone, Debug)]
pub struct RefObject {
    instance: Instance,
    key: Key,
}

impl RefObject {
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn current(&self) -> Result<Value> {
        self.instance.observer().read(&self.key)
    }

    pub fn set_current(&self, value: impl Into<Value>) -> Result<()> {
        self.instance.observer().write(&self.key, value.into())
    }
}
