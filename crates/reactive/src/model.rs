//! Model types: the static description of a tracked instance.
//!
//! A `ModelType` lists the fields, computed getters, events, actions and
//! lifecycle handlers of a type. Ancestors are resolved once in
//! [`ModelBuilder::build`], so constructing an instance never walks the
//! type chain again.
//!
//! Resolution rules:
//!
//! - Fields, events and actions: ancestors first, a redefinition replaces
//!   the inherited entry in place.
//! - Getters: the most-derived definition of a key wins.
//! - Phase handlers: all of them run, ancestors first.

use crate::instance::Instance;
use crate::subscriber::View;
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use deepstate_core::{Key, Result, Value};

/// Compute function of a getter-only property.
pub type ComputeFn = Rc<dyn Fn(&View) -> Result<Value>>;

/// Setter effect, run with the new value before emission.
pub type SetEffect = Rc<dyn Fn(&Value, &Instance)>;

/// Lifecycle phase handler.
pub type PhaseHandler = Rc<dyn Fn(&Instance)>;

/// Future returned by an action body.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<Value>>>>;

/// Action body.
pub type ActionFn = Rc<dyn Fn(Instance) -> ActionFuture>;

/// Factory of a memoized field, called with the instance.
pub type MemoFn = Rc<dyn Fn(&Instance) -> Value>;

#[derive(Clone)]
pub(crate) enum FieldInit {
    Value(Value),
    Child(Rc<ModelType>),
    Memo { factory: MemoFn, lazy: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FieldKind {
    Plain,
    Ignored,
    Ref,
    Tuple,
}

#[derive(Clone)]
pub(crate) struct Field {
    pub key: Key,
    pub init: FieldInit,
    pub effect: Option<SetEffect>,
    pub kind: FieldKind,
}

impl Field {
    /// Returns true if the field is stored untracked.
    ///
    /// Memos are never tracked. Plain fields holding a function or with a
    /// capitalized key are not tracked either.
    pub fn is_untracked(&self) -> bool {
        match (self.kind, &self.init) {
            (FieldKind::Ignored, _) | (_, FieldInit::Memo { .. }) => true,
            (FieldKind::Plain, FieldInit::Value(v)) if v.is_function() => true,
            (FieldKind::Plain, _) => self.key.chars().next().is_some_and(char::is_uppercase),
            (FieldKind::Ref, _) | (FieldKind::Tuple, _) => false,
        }
    }
}

/// Resolved description of a tracked type.
pub struct ModelType {
    name: Rc<str>,
    parent: Option<Rc<ModelType>>,
    fields: Vec<Field>,
    getters: Vec<(Key, ComputeFn)>,
    events: Vec<Key>,
    actions: Vec<(Key, ActionFn)>,
    handlers: Vec<(Key, PhaseHandler)>,
}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelType")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .field("fields", &self.field_keys())
            .field("getters", &self.getter_keys())
            .finish()
    }
}

impl ModelType {
    /// Starts a new type definition.
    pub fn builder(name: &str) -> ModelBuilder {
        ModelBuilder::new(name)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_rc(&self) -> Rc<str> {
        self.name.clone()
    }

    pub fn parent(&self) -> Option<&Rc<ModelType>> {
        self.parent.as_ref()
    }

    /// Returns true if `ancestor` is this type or one of its ancestors.
    pub fn extends(&self, ancestor: &Rc<ModelType>) -> bool {
        if core::ptr::eq(self, Rc::as_ptr(ancestor)) {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.extends(ancestor))
    }

    /// Resolved field keys, ancestors first.
    pub fn field_keys(&self) -> Vec<&str> {
        self.fields.iter().map(|f| &*f.key).collect()
    }

    /// Resolved getter keys, most-derived first.
    pub fn getter_keys(&self) -> Vec<&str> {
        self.getters.iter().map(|(k, _)| &**k).collect()
    }

    /// Returns true if `key` was declared with [`ModelBuilder::ref_object`].
    pub fn is_ref(&self, key: &str) -> bool {
        self.fields
            .iter()
            .any(|f| f.kind == FieldKind::Ref && &*f.key == key)
    }

    pub(crate) fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub(crate) fn getters(&self) -> &[(Key, ComputeFn)] {
        &self.getters
    }

    pub(crate) fn events(&self) -> &[Key] {
        &self.events
    }

    pub(crate) fn actions(&self) -> &[(Key, ActionFn)] {
        &self.actions
    }

    pub(crate) fn handlers<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a PhaseHandler> {
        self.handlers
            .iter()
            .filter(move |(k, _)| &**k == tag)
            .map(|(_, h)| h)
    }
}

/// Builder for [`ModelType`].
pub struct ModelBuilder {
    name: Rc<str>,
    parent: Option<Rc<ModelType>>,
    fields: Vec<Field>,
    getters: Vec<(Key, ComputeFn)>,
    events: Vec<Key>,
    actions: Vec<(Key, ActionFn)>,
    handlers: Vec<(Key, PhaseHandler)>,
}

impl ModelBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: Rc::from(name),
            parent: None,
            fields: Vec::new(),
            getters: Vec::new(),
            events: Vec::new(),
            actions: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Inherits everything `parent` resolved.
    pub fn extends(mut self, parent: &Rc<ModelType>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    fn field(mut self, key: &str, init: FieldInit, effect: Option<SetEffect>, kind: FieldKind) -> Self {
        self.fields.push(Field {
            key: Key::from(key),
            init,
            effect,
            kind,
        });
        self
    }

    /// Plain property.
    pub fn value(self, key: &str, initial: impl Into<Value>) -> Self {
        self.field(key, FieldInit::Value(initial.into()), None, FieldKind::Plain)
    }

    /// Plain property whose setter runs `effect` before emitting.
    pub fn value_with_effect(
        self,
        key: &str,
        initial: impl Into<Value>,
        effect: impl Fn(&Value, &Instance) + 'static,
    ) -> Self {
        self.field(
            key,
            FieldInit::Value(initial.into()),
            Some(Rc::new(effect)),
            FieldKind::Plain,
        )
    }

    /// Untracked field.
    pub fn ignore(self, key: &str, value: impl Into<Value>) -> Self {
        self.field(key, FieldInit::Value(value.into()), None, FieldKind::Ignored)
    }

    /// Nested tracked instance, constructed with its parent.
    pub fn child(self, key: &str, ty: &Rc<ModelType>) -> Self {
        self.field(key, FieldInit::Child(ty.clone()), None, FieldKind::Plain)
    }

    /// Watched slot that starts unset and is accessed through
    /// [`Instance::ref_object`].
    pub fn ref_object(self, key: &str) -> Self {
        self.field(key, FieldInit::Value(Value::Undefined), None, FieldKind::Ref)
    }

    /// Like [`ref_object`](Self::ref_object), running `effect` whenever
    /// `current` is assigned a new value.
    pub fn ref_object_with_effect(
        self,
        key: &str,
        effect: impl Fn(&Value, &Instance) + 'static,
    ) -> Self {
        self.field(
            key,
            FieldInit::Value(Value::Undefined),
            Some(Rc::new(effect)),
            FieldKind::Ref,
        )
    }

    /// Watched list that only emits when an element strictly changes.
    ///
    /// An empty tuple starts unset.
    pub fn tuple<I, V>(self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        let initial = if values.is_empty() {
            Value::Undefined
        } else {
            Value::list(values)
        };
        self.field(key, FieldInit::Value(initial), None, FieldKind::Tuple)
    }

    /// Untracked field computed once from the instance while it is
    /// constructed. Earlier fields are already readable.
    pub fn memo(self, key: &str, factory: impl Fn(&Instance) -> Value + 'static) -> Self {
        let init = FieldInit::Memo {
            factory: Rc::new(factory),
            lazy: false,
        };
        self.field(key, init, None, FieldKind::Ignored)
    }

    /// Like [`memo`](Self::memo), deferred until the first read.
    pub fn memo_lazy(self, key: &str, factory: impl Fn(&Instance) -> Value + 'static) -> Self {
        let init = FieldInit::Memo {
            factory: Rc::new(factory),
            lazy: true,
        };
        self.field(key, init, None, FieldKind::Ignored)
    }

    /// Getter-only property.
    pub fn computed(
        mut self,
        key: &str,
        compute: impl Fn(&View) -> Result<Value> + 'static,
    ) -> Self {
        self.getters.push((Key::from(key), Rc::new(compute)));
        self
    }

    /// Valueless key that is only emitted.
    pub fn event(mut self, key: &str) -> Self {
        self.events.push(Key::from(key));
        self
    }

    /// Single-flight asynchronous action.
    pub fn action<F, Fut>(mut self, key: &str, run: F) -> Self
    where
        F: Fn(Instance) -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        let run: ActionFn = Rc::new(move |instance| Box::pin(run(instance)) as ActionFuture);
        self.actions.push((Key::from(key), run));
        self
    }

    /// Handler for a lifecycle phase tag.
    pub fn on_phase(mut self, tag: &str, handler: impl Fn(&Instance) + 'static) -> Self {
        self.handlers.push((Key::from(tag), Rc::new(handler)));
        self
    }

    pub fn build(self) -> Rc<ModelType> {
        let mut fields: Vec<Field> = Vec::new();
        let mut getters: Vec<(Key, ComputeFn)> = Vec::new();
        let mut events: Vec<Key> = Vec::new();
        let mut actions: Vec<(Key, ActionFn)> = Vec::new();
        let mut handlers: Vec<(Key, PhaseHandler)> = Vec::new();

        if let Some(parent) = &self.parent {
            fields.extend(parent.fields.iter().cloned());
            events.extend(parent.events.iter().cloned());
            actions.extend(parent.actions.iter().cloned());
            handlers.extend(parent.handlers.iter().cloned());
        }

        for field in self.fields {
            match fields.iter_mut().find(|f| f.key == field.key) {
                Some(slot) => *slot = field,
                None => fields.push(field),
            }
        }
        for event in self.events {
            if !events.contains(&event) {
                events.push(event);
            }
        }
        for (key, run) in self.actions {
            match actions.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = run,
                None => actions.push((key, run)),
            }
        }
        handlers.extend(self.handlers);

        for (key, compute) in self.getters {
            if !getters.iter().any(|(k, _)| *k == key) {
                getters.push((key, compute));
            }
        }
        if let Some(parent) = &self.parent {
            for (key, compute) in &parent.getters {
                if !getters.iter().any(|(k, _)| k == key) {
                    getters.push((key.clone(), compute.clone()));
                }
            }
        }

        Rc::new(ModelType {
            name: self.name,
            parent: self.parent,
            fields,
            getters,
            events,
            actions,
            handlers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_fields_resolve_root_first() {
        let base = ModelType::builder("Base")
            .value("a", 1)
            .value("b", 2)
            .build();
        let derived = ModelType::builder("Derived")
            .extends(&base)
            .value("c", 3)
            .value("a", 10)
            .build();

        assert_eq!(derived.field_keys(), vec!["a", "b", "c"]);
        match &derived.fields()[0].init {
            FieldInit::Value(v) => assert_eq!(*v, Value::Int(10)),
            _ => panic!("expected a value field"),
        }
        assert!(derived.extends(&base));
        assert!(!base.extends(&derived));
    }

    #[test]
    fn test_getters_most_derived_wins() {
        let base = ModelType::builder("Base")
            .computed("x", |_| Ok(Value::Int(1)))
            .computed("y", |_| Ok(Value::Int(2)))
            .build();
        let derived = ModelType::builder("Derived")
            .extends(&base)
            .computed("x", |_| Ok(Value::Int(100)))
            .build();

        assert_eq!(derived.getter_keys(), vec!["x", "y"]);
        assert_eq!(base.getter_keys(), vec!["x", "y"]);
    }

    #[test]
    fn test_untracked_classification() {
        let ty = ModelType::builder("T")
            .value("plain", 1)
            .value("Capital", 2)
            .value("callback", Value::function(|_| Value::Null))
            .ignore("hidden", 3)
            .build();

        let untracked: Vec<&str> = ty
            .fields()
            .iter()
            .filter(|f| f.is_untracked())
            .map(|f| &*f.key)
            .collect();
        assert_eq!(untracked, vec!["Capital", "callback", "hidden"]);
    }

    #[test]
    fn test_directive_fields() {
        let ty = ModelType::builder("T")
            .ref_object("Input")
            .tuple("pos", [1, 2])
            .tuple("empty", Vec::<Value>::new())
            .memo("id", |_| Value::Int(7))
            .memo_lazy("slow", |_| Value::Int(8))
            .build();

        let untracked: Vec<&str> = ty
            .fields()
            .iter()
            .filter(|f| f.is_untracked())
            .map(|f| &*f.key)
            .collect();
        assert_eq!(untracked, vec!["id", "slow"]);
        assert!(ty.is_ref("Input"));
        assert!(!ty.is_ref("pos"));
        match &ty.fields()[2].init {
            FieldInit::Value(v) => assert!(v.is_undefined()),
            _ => panic!("expected a value field"),
        }
    }

    #[test]
    fn test_handlers_run_root_first() {
        let base = ModelType::builder("Base").on_phase("didCreate", |_| {}).build();
        let derived = ModelType::builder("Derived")
            .extends(&base)
            .on_phase("didCreate", |_| {})
            .on_phase("willDestroy", |_| {})
            .build();

        assert_eq!(derived.handlers("didCreate").count(), 2);
        assert_eq!(derived.handlers("willDestroy").count(), 1);
        assert_eq!(base.handlers("willDestroy").count(), 0);
    }
}
