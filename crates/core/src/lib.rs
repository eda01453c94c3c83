//! Deepstate Core - Property values and error types for the deepstate engine.
//!
//! This crate provides the foundational types shared by the reactive engine:
//!
//! - `Value`: Dynamic value held by a tracked property
//! - `Key`: Property name as stored by an observer
//! - `Error`: Error taxonomy for reads, writes, computations and registries
//!
//! # Example
//!
//! ```rust
//! use deepstate_core::Value;
//!
//! let a = Value::from(5i64);
//! let b = Value::from(5i64);
//! assert!(a.strict_eq(&b));
//!
//! // NaN is never strictly equal, not even to itself.
//! let nan = Value::Float(f64::NAN);
//! assert!(!nan.strict_eq(&nan));
//!
//! // Lists compare by identity.
//! let list = Value::list(vec![Value::from(1i64)]);
//! assert!(list.strict_eq(&list.clone()));
//! assert!(!list.strict_eq(&Value::list(vec![Value::from(1i64)])));
//! ```

#![no_std]

extern crate alloc;

mod error;
mod value;

pub use error::{Error, Result};
pub use value::{Key, NativeFn, Value};
