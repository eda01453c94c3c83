//! Value type definitions for deepstate.
//!
//! This module defines the `Value` enum which represents anything a tracked
//! property can hold, and the strict-equality rule the engine uses to decide
//! whether a write is a change.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;

/// A property name as stored by an observer.
pub type Key = Rc<str>;

/// A callable property value.
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Value>;

/// A value that can be held by a tracked property.
#[derive(Clone, Default)]
pub enum Value {
    /// No value; distinct from `Null`
    #[default]
    Undefined,
    /// Explicit null
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// Immutable UTF-8 string
    Str(Rc<str>),
    /// Shared list, compared by identity
    List(Rc<[Value]>),
    /// Callable value; never tracked
    Function(NativeFn),
    /// Opaque shared object, compared by identity
    Object(Rc<dyn Any>),
}

impl Value {
    /// Creates a list value.
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(items.into())
    }

    /// Creates a function value.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + 'static,
    {
        Value::Function(Rc::new(f))
    }

    /// Creates an object value.
    pub fn object<T: Any>(object: Rc<T>) -> Self {
        Value::Object(object)
    }

    /// Returns true if this value is Undefined.
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns true if this value is Null.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if this value is a Function.
    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    /// Returns the boolean value if this is a Bool, None otherwise.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the i64 value if this is an Int, None otherwise.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as f64 if this is a Float or an Int.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns a reference to the string if this is a Str, None otherwise.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the items if this is a List, None otherwise.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the shared object if this is an Object, None otherwise.
    pub fn as_object(&self) -> Option<&Rc<dyn Any>> {
        match self {
            Value::Object(v) => Some(v),
            _ => None,
        }
    }

    /// Calls the function if this is a Function, None otherwise.
    pub fn call(&self, args: &[Value]) -> Option<Value> {
        match self {
            Value::Function(f) => Some(f(args)),
            _ => None,
        }
    }

    /// Short name of the variant, used in type mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Function(_) => "function",
            Value::Object(_) => "object",
        }
    }

    /// Strict equality as used by property setters.
    ///
    /// Scalars compare by value and strings by content. `NaN` never equals
    /// anything. Lists, functions and objects compare by identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => a[..] == b[..],
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self.strict_eq(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Value::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Value::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Value::Str(v) => f.debug_tuple("Str").field(v).finish(),
            Value::List(v) => f.debug_tuple("List").field(v).finish(),
            Value::Function(v) => write!(f, "Function({:p})", Rc::as_ptr(v)),
            Value::Object(v) => write!(f, "Object({:p})", Rc::as_ptr(v)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::list(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Undefined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_value_default_is_undefined() {
        let v = Value::default();
        assert!(v.is_undefined());
        assert!(!v.is_null());
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::Int(2).as_float(), Some(2.0));
        assert_eq!(Value::Float(1.5).as_float(), Some(1.5));
        assert_eq!(Value::from("hello").as_str(), Some("hello"));
        assert_eq!(Value::Null.as_int(), None);
    }

    #[test]
    fn test_strict_eq_scalars() {
        assert!(Value::Int(1).strict_eq(&Value::Int(1)));
        assert!(Value::Int(1).strict_eq(&Value::Float(1.0)));
        assert!(!Value::Int(1).strict_eq(&Value::Int(2)));
        assert!(!Value::Undefined.strict_eq(&Value::Null));
        assert!(Value::from("a").strict_eq(&Value::from(String::from("a"))));
    }

    #[test]
    fn test_strict_eq_nan() {
        let nan = Value::Float(f64::NAN);
        assert!(!nan.strict_eq(&nan));
        // Structural equality treats NaN as equal to keep test assertions sane.
        assert_eq!(nan, Value::Float(f64::NAN));
    }

    #[test]
    fn test_strict_eq_identity() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = Value::list(vec![Value::Int(1)]);
        assert!(a.strict_eq(&a.clone()));
        assert!(!a.strict_eq(&b));
        assert_eq!(a, b);

        let obj = Value::object(Rc::new(7u8));
        assert!(obj.strict_eq(&obj.clone()));
        assert!(!obj.strict_eq(&Value::object(Rc::new(7u8))));
    }

    #[test]
    fn test_function_value() {
        let f = Value::function(|args| Value::Int(args.len() as i64));
        assert!(f.is_function());
        assert_eq!(f.call(&[Value::Null, Value::Null]), Some(Value::Int(2)));
        assert_eq!(Value::Null.call(&[]), None);
    }

    #[test]
    fn test_value_from_impls() {
        let v: Value = 42i32.into();
        assert_eq!(v.as_int(), Some(42));

        let v: Value = Some(100i64).into();
        assert_eq!(v.as_int(), Some(100));

        let v: Value = None::<i64>.into();
        assert!(v.is_undefined());

        let v: Value = vec![Value::Int(1), Value::Int(2)].into();
        assert_eq!(v.as_list().map(|l| l.len()), Some(2));
    }

    #[test]
    fn test_type_name() {
        assert_eq!(Value::Undefined.type_name(), "undefined");
        assert_eq!(Value::Int(1).type_name(), "int");
        assert_eq!(Value::from("x").type_name(), "string");
    }
}
