//! Script-level exception types.
//!
//! Exceptions raised by scripts, by builtins, and by host functions share one
//! representation so that `try`/`except` blocks can catch any of them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exception classes visible to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExcType {
    /// Base class; `except Exception` catches every other variant.
    Exception,
    /// Invalid value for an otherwise well-typed argument.
    ValueError,
    /// Operation applied to an object of the wrong type.
    TypeError,
    /// Missing mapping key.
    KeyError,
    /// Sequence index out of range.
    IndexError,
    /// Unresolved name.
    NameError,
    /// Unknown attribute or method.
    AttributeError,
    /// Division or modulo by zero.
    ZeroDivisionError,
    /// Integer arithmetic left the 64-bit range.
    OverflowError,
    /// Generic runtime failure (tool execution errors land here).
    RuntimeError,
    /// A denied tool was invoked.
    PermissionError,
    /// A host-side wait exceeded its bound.
    TimeoutError,
    /// Failed `assert` statement.
    AssertionError,
    /// Call depth exceeded the configured limit.
    RecursionError,
    /// A string or container would grow past the sandbox size cap.
    MemoryError,
    /// Feature intentionally missing from the sandbox.
    NotImplementedError,
}

impl ExcType {
    /// Name as written in scripts.
    pub fn name(self) -> &'static str {
        match self {
            ExcType::Exception => "Exception",
            ExcType::ValueError => "ValueError",
            ExcType::TypeError => "TypeError",
            ExcType::KeyError => "KeyError",
            ExcType::IndexError => "IndexError",
            ExcType::NameError => "NameError",
            ExcType::AttributeError => "AttributeError",
            ExcType::ZeroDivisionError => "ZeroDivisionError",
            ExcType::OverflowError => "OverflowError",
            ExcType::RuntimeError => "RuntimeError",
            ExcType::PermissionError => "PermissionError",
            ExcType::TimeoutError => "TimeoutError",
            ExcType::AssertionError => "AssertionError",
            ExcType::RecursionError => "RecursionError",
            ExcType::MemoryError => "MemoryError",
            ExcType::NotImplementedError => "NotImplementedError",
        }
    }

    /// Resolve a builtin exception class by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "Exception" | "BaseException" => ExcType::Exception,
            "ValueError" => ExcType::ValueError,
            "TypeError" => ExcType::TypeError,
            "KeyError" => ExcType::KeyError,
            "IndexError" => ExcType::IndexError,
            "NameError" => ExcType::NameError,
            "AttributeError" => ExcType::AttributeError,
            "ZeroDivisionError" => ExcType::ZeroDivisionError,
            "OverflowError" => ExcType::OverflowError,
            "RuntimeError" => ExcType::RuntimeError,
            "PermissionError" => ExcType::PermissionError,
            "TimeoutError" => ExcType::TimeoutError,
            "AssertionError" => ExcType::AssertionError,
            "RecursionError" => ExcType::RecursionError,
            "MemoryError" => ExcType::MemoryError,
            "NotImplementedError" => ExcType::NotImplementedError,
            _ => return None,
        })
    }

    /// Whether an `except <handler>` clause catches this exception.
    pub fn is_subclass_of(self, handler: ExcType) -> bool {
        if handler == ExcType::Exception || self == handler {
            return true;
        }
        // RecursionError derives from RuntimeError, as in Python. Host wait
        // timeouts are runtime failures too.
        matches!(
            (self, handler),
            (ExcType::RecursionError | ExcType::TimeoutError, ExcType::RuntimeError)
        )
    }
}

impl fmt::Display for ExcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A raised (or constructed) exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptException {
    /// Exception class.
    pub exc_type: ExcType,
    /// Message passed to the constructor.
    pub message: String,
}

impl ScriptException {
    /// Construct a new exception.
    pub fn new(exc_type: ExcType, message: impl Into<String>) -> Self {
        Self {
            exc_type,
            message: message.into(),
        }
    }

    /// Shorthand for a `TypeError`.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExcType::TypeError, message)
    }

    /// Shorthand for a `ValueError`.
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExcType::ValueError, message)
    }

    /// Shorthand for a `RuntimeError`.
    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(ExcType::RuntimeError, message)
    }

    /// `NameError` for an unresolved identifier.
    pub fn name_error(name: &str) -> Self {
        Self::new(ExcType::NameError, format!("name '{name}' is not defined"))
    }

    /// Python-style summary: `ValueError: message`.
    pub fn summary(&self) -> String {
        if self.message.is_empty() {
            self.exc_type.name().to_string()
        } else {
            format!("{}: {}", self.exc_type, self.message)
        }
    }
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::error::Error for ScriptException {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_base_catches_everything() {
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(ExcType::RecursionError.is_subclass_of(ExcType::RuntimeError));
        assert!(ExcType::TimeoutError.is_subclass_of(ExcType::RuntimeError));
        assert!(!ExcType::RuntimeError.is_subclass_of(ExcType::TimeoutError));
        assert!(!ExcType::KeyError.is_subclass_of(ExcType::ValueError));
    }

    #[test]
    fn summary_includes_type() {
        let exc = ScriptException::name_error("foo");
        assert_eq!(exc.summary(), "NameError: name 'foo' is not defined");
        assert_eq!(
            ScriptException::new(ExcType::AssertionError, "").summary(),
            "AssertionError"
        );
    }
}
