//! Single-flight asynchronous actions.
//!
//! An action runs at most once at a time. Its key is watched: it is emitted
//! when a run starts and again when it settles, and reads as `Bool(active)`.

use crate::instance::Instance;
use crate::model::ActionFn;
use crate::observer::{Observer, ObserverInner};
use alloc::rc::{Rc, Weak};
use core::cell::Cell;
use core::fmt;
use core::future::Future;
use deepstate_core::{Error, Key, Result, Value};

pub(crate) struct ActionState {
    key: Key,
    run: ActionFn,
    active: Cell<bool>,
    observer: Weak<ObserverInner>,
}

impl ActionState {
    pub(crate) fn new(key: Key, run: ActionFn, observer: Weak<ObserverInner>) -> Self {
        Self {
            key,
            run,
            active: Cell::new(false),
            observer,
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    fn set_active(&self, active: bool) {
        self.active.set(active);
        if let Some(inner) = self.observer.upgrade() {
            Observer::from_inner(inner).emit(&self.key);
        }
    }
}

/// Clears the active flag when a run completes or its future is dropped.
struct PendingGuard {
    state: Rc<ActionState>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.state.set_active(false);
    }
}

/// Handle to a declared action of one instance.
#[derive(Clone)]
pub struct Action {
    state: Rc<ActionState>,
    instance: Instance,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("key", &self.state.key)
            .field("active", &self.state.is_active())
            .finish()
    }
}

impl Action {
    pub(crate) fn new(state: Rc<ActionState>, instance: Instance) -> Self {
        Self { state, instance }
    }

    #[inline]
    pub fn key(&self) -> &str {
        self.state.key()
    }

    /// Returns true while a run is pending.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Starts a run.
    ///
    /// Fails with [`Error::DuplicateAction`] if a previous run has not
    /// settled; no second run is started.
    pub fn invoke(&self) -> Result<impl Future<Output = Result<Value>>> {
        if self.state.is_active() {
            tracing::warn!(
                type_name = %self.instance.type_name(),
                key = %self.state.key,
                "duplicate action rejected"
            );
            return Err(Error::duplicate_action(&*self.state.key));
        }

        self.state.set_active(true);
        let guard = PendingGuard {
            state: self.state.clone(),
        };
        let run = (self.state.run)(self.instance.clone());
        Ok(async move {
            let _guard = guard;
            run.await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelType;
    use crate::scheduler::{ManualScheduler, Scheduler};

    async fn save(doc: Instance) -> Result<Value> {
        let n = doc.get("saved")?.as_int().unwrap_or(0);
        doc.set("saved", n + 1)?;
        Ok(Value::Int(n + 1))
    }

    fn saver() -> (Rc<ManualScheduler>, Instance) {
        let sched = Rc::new(ManualScheduler::new());
        let ty = ModelType::builder("Doc")
            .value("saved", 0)
            .action("save", save)
            .build();
        let doc = Instance::new(&ty, sched.clone());
        (sched, doc)
    }

    #[test]
    fn test_action_reads_active_flag() {
        let (_sched, doc) = saver();
        let save = doc.action("save").unwrap();

        assert_eq!(doc.get("save").unwrap(), Value::Bool(false));
        let run = save.invoke().unwrap();
        assert_eq!(doc.get("save").unwrap(), Value::Bool(true));
        assert!(save.is_active());

        drop(run);
        assert!(!save.is_active());
    }

    #[test]
    fn test_action_single_flight() {
        let (_sched, doc) = saver();
        let save = doc.action("save").unwrap();

        let _run = save.invoke().unwrap();
        let err = save.invoke().err().unwrap();
        assert!(matches!(err, Error::DuplicateAction { .. }));
        assert_eq!(doc.get("saved").unwrap(), Value::Int(0));
    }

    #[test]
    fn test_action_key_not_assignable() {
        let (sched, doc) = saver();
        assert!(matches!(
            doc.set("save", true),
            Err(Error::SetActionProperty { .. })
        ));
        assert!(doc.action("saved").is_err());
        sched.flush_now();
    }
}
