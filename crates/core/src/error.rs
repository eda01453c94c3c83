//! Error types for deepstate.

use alloc::string::String;
use thiserror::Error;

/// Result type alias for deepstate operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for reads, writes, computations and registries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A compute function failed.
    #[error("Computation failed: {message}")]
    Compute { message: String },
    /// A focused key was required for this pass but resolved to undefined.
    #[error("{type_name}.{key} is marked as required for this render.")]
    Required { type_name: String, key: String },
    /// A computed property read itself while being evaluated.
    #[error("{type_name}.{key} depends on itself; cyclic computed properties are not supported.")]
    CyclicDependency { type_name: String, key: String },
    /// The property is not tracked by this instance.
    #[error("{type_name} has no property {key}.")]
    UnknownProperty { type_name: String, key: String },
    /// A value did not have the expected variant.
    #[error("Type mismatch on {key}: expected {expected}, got {got}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        got: &'static str,
    },
    /// Assignment to an action property.
    #[error("Attempted assignment of {key}. This is not allowed because an action-property.")]
    SetActionProperty { key: String },
    /// An action was invoked while a previous run was still pending.
    #[error("Invoked action {key} but one is already active.")]
    DuplicateAction { key: String },
    /// The value is not a tracked instance.
    #[error("Property {key} does not hold a tracked instance.")]
    NotTracked { key: String },
    /// An awaited change never arrived because the instance was destroyed.
    #[error("{type_name} was destroyed before the awaited update.")]
    Canceled { type_name: String },
    /// The registry already owns an instance of this type.
    #[error("Shared instance of {type_name} already exists!")]
    GlobalExists { type_name: String },
    /// The registry has no instance of this type.
    #[error("Tried to access singleton {type_name} but one does not exist!")]
    GlobalDoesNotExist { type_name: String },
}

impl Error {
    /// Creates a compute failure with a message.
    pub fn compute(message: impl Into<String>) -> Self {
        Error::Compute {
            message: message.into(),
        }
    }

    /// Creates a required-read error.
    pub fn required(type_name: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Required {
            type_name: type_name.into(),
            key: key.into(),
        }
    }

    /// Creates a cyclic dependency error.
    pub fn cyclic(type_name: impl Into<String>, key: impl Into<String>) -> Self {
        Error::CyclicDependency {
            type_name: type_name.into(),
            key: key.into(),
        }
    }

    /// Creates an unknown property error.
    pub fn unknown_property(type_name: impl Into<String>, key: impl Into<String>) -> Self {
        Error::UnknownProperty {
            type_name: type_name.into(),
            key: key.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(key: impl Into<String>, expected: &'static str, got: &'static str) -> Self {
        Error::TypeMismatch {
            key: key.into(),
            expected,
            got,
        }
    }

    /// Creates an error for assignment to an action property.
    pub fn set_action_property(key: impl Into<String>) -> Self {
        Error::SetActionProperty { key: key.into() }
    }

    /// Creates a duplicate action error.
    pub fn duplicate_action(key: impl Into<String>) -> Self {
        Error::DuplicateAction { key: key.into() }
    }

    /// Creates an error for a property that does not hold a tracked instance.
    pub fn not_tracked(key: impl Into<String>) -> Self {
        Error::NotTracked { key: key.into() }
    }

    /// Creates an error for a wait cut short by destruction.
    pub fn canceled(type_name: impl Into<String>) -> Self {
        Error::Canceled {
            type_name: type_name.into(),
        }
    }

    /// Creates a registry conflict error.
    pub fn global_exists(type_name: impl Into<String>) -> Self {
        Error::GlobalExists {
            type_name: type_name.into(),
        }
    }

    /// Creates a registry miss error.
    pub fn global_does_not_exist(type_name: impl Into<String>) -> Self {
        Error::GlobalDoesNotExist {
            type_name: type_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_error_display() {
        let err = Error::required("Counter", "count");
        assert_eq!(
            err.to_string(),
            "Counter.count is marked as required for this render."
        );

        let err = Error::cyclic("Graph", "loop");
        assert!(err.to_string().contains("Graph.loop"));

        let err = Error::duplicate_action("save");
        assert!(err.to_string().contains("save"));
    }

    #[test]
    fn test_error_constructors() {
        let err = Error::type_mismatch("count", "int", "string");
        match err {
            Error::TypeMismatch { key, expected, got } => {
                assert_eq!(key, "count");
                assert_eq!(expected, "int");
                assert_eq!(got, "string");
            }
            _ => panic!("Wrong error type"),
        }
    }
}
