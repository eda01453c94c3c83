//! Deepstate Reactive - Per-instance reactive state engine.
//!
//! Every tracked object owns one observer. Reads made through a tracking view
//! are recorded as dependencies, and writes are coalesced into one
//! notification pass per turn.
//!
//! # Core Concepts
//!
//! - `ModelType`: Static description of a tracked type (fields, getters, events, actions)
//! - `RefObject`: Handle to a ref field, read and written through `current`
//! - `Instance`: A tracked object built from a model type
//! - `Observer`: State bag, accessors and change dispatcher of one instance
//! - `Subscriber` / `View`: A consumer's watch session and its read-tracking view
//! - `Scheduler`: Decides when the end of a turn is and runs pending flushes
//!
//! # Flush order
//!
//! Within one flush, computed properties settle in ascending priority (a
//! computed property always outranks the computed properties it reads), then
//! every plain listener runs once with the full set of changed keys.
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use deepstate_reactive::{Instance, ManualScheduler, ModelType, Scheduler, Value};
//!
//! let scheduler = Rc::new(ManualScheduler::new());
//! let ty = ModelType::builder("Counter")
//!     .value("count", 0)
//!     .computed("double", |v| Ok(Value::Int(v.get_int("count")? * 2)))
//!     .build();
//! let counter = Instance::new(&ty, scheduler.clone());
//! assert_eq!(counter.get("double").unwrap(), Value::Int(0));
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let log = seen.clone();
//! let _disposer = counter
//!     .on(["count", "double"], move |keys| log.borrow_mut().push(keys.to_vec()))
//!     .unwrap();
//!
//! counter.set("count", 5).unwrap();
//! scheduler.flush_now();
//!
//! assert_eq!(counter.get("double").unwrap(), Value::Int(10));
//! assert_eq!(seen.borrow().len(), 1);
//! ```

#![no_std]

extern crate alloc;

mod action;
mod batch;
mod computed;
mod follower;
mod instance;
pub mod lifecycle;
mod model;
mod observer;
mod registry;
pub mod scheduler;
mod subscriber;

pub use action::Action;
pub use follower::{Callback, Disposer, FollowerId};
pub use instance::{Instance, RefObject};
pub use model::{
    ActionFn, ActionFuture, ComputeFn, MemoFn, ModelBuilder, ModelType, PhaseHandler, SetEffect,
};
pub use observer::{ErrorSink, Observer};
pub use registry::Registry;
pub use scheduler::{FlushQueue, FlushTask, ManualScheduler, Scheduler, SchedulerConfig, Turn, TurnScheduler};
pub use subscriber::{Focus, Subscriber, View};

#[cfg(feature = "wasm")]
pub use scheduler::MicrotaskScheduler;

// Re-export commonly used types from dependencies
pub use deepstate_core::{Error, Key, Result, Value};
