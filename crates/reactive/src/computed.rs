//! Computed properties.
//!
//! A computed property is evaluated lazily through a private subscriber whose
//! trigger is the property's own refresh. The first successful evaluation
//! fixes its priority: one more than the highest priority among the computed
//! properties it read, or 0 if it read none.

use crate::follower::Listener;
use crate::model::ComputeFn;
use crate::observer::{Observer, ObserverInner};
use crate::subscriber::Subscriber;
use alloc::rc::{Rc, Weak};
use core::cell::{Cell, RefCell};
use core::fmt;
use deepstate_core::{Error, Key, Result, Value};

pub(crate) struct Computed {
    key: Key,
    compute: ComputeFn,
    owner: Weak<ObserverInner>,
    priority: Cell<u32>,
    initialized: Cell<bool>,
    evaluating: Cell<bool>,
    subscriber: RefCell<Option<Subscriber>>,
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("key", &self.key)
            .field("priority", &self.priority.get())
            .field("initialized", &self.initialized.get())
            .finish()
    }
}

impl Computed {
    pub(crate) fn new(key: Key, compute: ComputeFn, owner: Weak<ObserverInner>) -> Self {
        Self {
            key,
            compute,
            owner,
            priority: Cell::new(0),
            initialized: Cell::new(false),
            evaluating: Cell::new(false),
            subscriber: RefCell::new(None),
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub(crate) fn priority(&self) -> u32 {
        self.priority.get()
    }

    #[inline]
    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    pub(crate) fn is_owned_by(&self, observer: &ObserverInner) -> bool {
        core::ptr::eq(self.owner.as_ptr(), observer)
    }

    fn owner(&self) -> Option<Observer> {
        self.owner.upgrade().map(Observer::from_inner)
    }

    fn evaluate(&self, subscriber: &Subscriber) -> Result<Value> {
        self.evaluating.set(true);
        let result = (self.compute)(&subscriber.view());
        self.evaluating.set(false);
        result
    }

    /// First evaluation. Stores the value, fixes the priority and arms the
    /// refresh subscription.
    ///
    /// `early` marks an evaluation forced by a follower registration rather
    /// than by a read.
    pub(crate) fn initialize(self: &Rc<Self>, early: bool) -> Result<Value> {
        let Some(observer) = self.owner() else {
            return Ok(Value::Undefined);
        };
        if self.evaluating.get() {
            return Err(Error::cyclic(observer.type_name(), &*self.key));
        }
        if self.initialized.get() {
            return Ok(observer.peek(&self.key));
        }
        let Some(instance) = observer.subject() else {
            return Ok(Value::Undefined);
        };

        let subscriber = Subscriber::with_listener(&instance, Listener::Refresh(self.clone()));
        let value = match self.evaluate(&subscriber) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    type_name = %observer.type_name(),
                    key = %self.key,
                    phase = "initial",
                    error = %err,
                    "ComputeFailed: an exception was thrown while initializing {}.{}",
                    observer.type_name(),
                    self.key
                );
                if early {
                    tracing::warn!(
                        type_name = %observer.type_name(),
                        key = %self.key,
                        "ComputedEarly: {}.{} was evaluated early because a subscriber follows it",
                        observer.type_name(),
                        self.key
                    );
                }
                subscriber.release();
                return Err(err);
            }
        };

        self.priority
            .set(subscriber.max_priority().map_or(0, |p| p + 1));
        observer.store(&self.key, value.clone());
        self.initialized.set(true);

        if let Err(err) = subscriber.listen() {
            subscriber.release();
            self.initialized.set(false);
            return Err(err);
        }
        *self.subscriber.borrow_mut() = Some(subscriber);
        Ok(value)
    }

    /// Re-evaluates and emits the key if the value strictly changed.
    ///
    /// A failing refresh keeps the previous value and goes to the warning log
    /// and the observer's error sink.
    pub(crate) fn refresh(self: &Rc<Self>) {
        if !self.initialized.get() || self.evaluating.get() {
            return;
        }
        let Some(observer) = self.owner() else {
            return;
        };
        if observer.is_destroyed() {
            return;
        }
        let Some(subscriber) = self.subscriber.borrow().clone() else {
            return;
        };

        let value = match self.evaluate(&subscriber) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    type_name = %observer.type_name(),
                    key = %self.key,
                    phase = "refresh",
                    error = %err,
                    "ComputeFailed: an exception was thrown while refreshing {}.{}",
                    observer.type_name(),
                    self.key
                );
                observer.report(&err);
                return;
            }
        };

        if let Some(p) = subscriber.max_priority() {
            self.priority.set(self.priority.get().max(p + 1));
        }
        if let Err(err) = subscriber.listen() {
            observer.report(&err);
        }
        if observer.replace(&self.key, value) {
            observer.emit(&self.key);
        }
    }

    /// Drops the refresh subscription.
    pub(crate) fn release(&self) {
        let subscriber = self.subscriber.borrow_mut().take();
        if let Some(subscriber) = subscriber {
            subscriber.release();
        }
    }
}
