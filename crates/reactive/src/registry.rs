//! Shared instances keyed by model type.
//!
//! A `Registry` owns at most one instance per model type, identified by the
//! pointer of its `Rc<ModelType>`. Detaching an instance destroys it.

use crate::instance::Instance;
use crate::model::ModelType;
use crate::scheduler::Scheduler;
use alloc::rc::Rc;
use deepstate_core::{Error, Result};
use hashbrown::HashMap;

/// Type-identity keyed store of shared instances.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<usize, (Rc<ModelType>, Instance)>,
}

#[inline]
fn slot(ty: &Rc<ModelType>) -> usize {
    Rc::as_ptr(ty) as usize
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared instance of `ty`, creating it on first use.
    pub fn get_or_create(&mut self, ty: &Rc<ModelType>, scheduler: Rc<dyn Scheduler>) -> Instance {
        self.entries
            .entry(slot(ty))
            .or_insert_with(|| (ty.clone(), Instance::new(ty, scheduler)))
            .1
            .clone()
    }

    /// Adopts `instance` as the shared instance of its type.
    pub fn attach(&mut self, instance: Instance) -> Result<()> {
        let ty = instance.model_type().clone();
        let key = slot(&ty);
        if self.entries.contains_key(&key) {
            return Err(Error::global_exists(ty.name()));
        }
        self.entries.insert(key, (ty, instance));
        Ok(())
    }

    pub fn get(&self, ty: &Rc<ModelType>) -> Option<Instance> {
        self.entries.get(&slot(ty)).map(|(_, i)| i.clone())
    }

    /// Like [`get`](Self::get), failing with `GlobalDoesNotExist`.
    pub fn require(&self, ty: &Rc<ModelType>) -> Result<Instance> {
        self.get(ty)
            .ok_or_else(|| Error::global_does_not_exist(ty.name()))
    }

    /// Removes and destroys the shared instance of `ty`.
    pub fn detach(&mut self, ty: &Rc<ModelType>) -> Option<Instance> {
        let (_, instance) = self.entries.remove(&slot(ty))?;
        instance.destroy();
        Some(instance)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destroys every shared instance.
    pub fn clear(&mut self) {
        for (_, (_, instance)) in self.entries.drain() {
            instance.destroy();
        }
    }
}
