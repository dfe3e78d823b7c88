//! Owned values exchanged between scripts and the host.
//!
//! Interpreter heap values are single-threaded; everything that crosses the
//! host boundary (inputs, external call arguments, return values, the final
//! result) is deep-copied into an [`Object`], which is `Send`.

use serde_json::{Map, Number, Value as JsonValue};
use std::fmt;

use super::exception::ScriptException;

/// Host-facing script value.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// `None`.
    None,
    /// `True` / `False`.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Double precision float.
    Float(f64),
    /// Unicode string.
    Str(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// List (copied).
    List(Vec<Object>),
    /// Tuple.
    Tuple(Vec<Object>),
    /// Dict in insertion order.
    Dict(Vec<(Object, Object)>),
    /// Exception instance.
    Exception(ScriptException),
    /// Value that cannot leave the interpreter (functions, ranges); carries its repr.
    Repr(String),
}

impl Object {
    /// Python type name of the value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::None => "NoneType",
            Object::Bool(_) => "bool",
            Object::Int(_) => "int",
            Object::Float(_) => "float",
            Object::Str(_) => "str",
            Object::Bytes(_) => "bytes",
            Object::List(_) => "list",
            Object::Tuple(_) => "tuple",
            Object::Dict(_) => "dict",
            Object::Exception(_) => "Exception",
            Object::Repr(_) => "object",
        }
    }

    /// Whether the value is `None`.
    pub fn is_none(&self) -> bool {
        matches!(self, Object::None)
    }

    /// Borrow the string payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload (booleans coerce like Python).
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Object::Int(i) => Some(*i),
            Object::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Numeric payload as a float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Object::Float(f) => Some(*f),
            Object::Int(i) => Some(*i as f64),
            Object::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    /// Boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Look up a string key in a dict value.
    pub fn get(&self, key: &str) -> Option<&Object> {
        match self {
            Object::Dict(items) => items
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Build a dict from string keys.
    pub fn dict<K: Into<String>>(items: impl IntoIterator<Item = (K, Object)>) -> Self {
        Object::Dict(
            items
                .into_iter()
                .map(|(k, v)| (Object::Str(k.into()), v))
                .collect(),
        )
    }

    /// Convert into JSON. Fails for bytes, exceptions and opaque values.
    pub fn to_json(&self) -> Result<JsonValue, ScriptException> {
        Ok(match self {
            Object::None => JsonValue::Null,
            Object::Bool(b) => JsonValue::Bool(*b),
            Object::Int(i) => JsonValue::Number((*i).into()),
            Object::Float(f) => Number::from_f64(*f).map(JsonValue::Number).ok_or_else(|| {
                ScriptException::value_error(format!("float {f} is not JSON compliant"))
            })?,
            Object::Str(s) => JsonValue::String(s.clone()),
            Object::List(items) | Object::Tuple(items) => JsonValue::Array(
                items
                    .iter()
                    .map(Object::to_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Object::Dict(items) => {
                let mut map = Map::new();
                for (k, v) in items {
                    let key = match k {
                        Object::Str(s) => s.clone(),
                        Object::Int(_) | Object::Float(_) | Object::Bool(_) | Object::None => {
                            k.to_string()
                        }
                        other => {
                            return Err(ScriptException::type_error(format!(
                                "keys must be str, int, float, bool or None, not {}",
                                other.type_name()
                            )));
                        }
                    };
                    map.insert(key, v.to_json()?);
                }
                JsonValue::Object(map)
            }
            other => {
                return Err(ScriptException::type_error(format!(
                    "Object of type {} is not JSON serializable",
                    other.type_name()
                )));
            }
        })
    }

    /// Convert from JSON.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Object::None,
            JsonValue::Bool(b) => Object::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Object::Int(i),
                None => Object::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Object::Str(s.clone()),
            JsonValue::Array(items) => Object::List(items.iter().map(Object::from_json).collect()),
            JsonValue::Object(map) => Object::Dict(
                map.iter()
                    .map(|(k, v)| (Object::Str(k.clone()), Object::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Object {
    /// `str()` rendering.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Str(s) => f.write_str(s),
            Object::Exception(exc) => f.write_str(&exc.message),
            other => f.write_str(&repr_object(other)),
        }
    }
}

fn repr_object(obj: &Object) -> String {
    match obj {
        Object::None => "None".to_string(),
        Object::Bool(true) => "True".to_string(),
        Object::Bool(false) => "False".to_string(),
        Object::Int(i) => i.to_string(),
        Object::Float(v) => super::value::format_float(*v),
        Object::Str(s) => super::value::quote_str(s),
        Object::Bytes(b) => super::value::quote_bytes(b),
        Object::List(items) => format!(
            "[{}]",
            items.iter().map(repr_object).collect::<Vec<_>>().join(", ")
        ),
        Object::Tuple(items) if items.len() == 1 => format!("({},)", repr_object(&items[0])),
        Object::Tuple(items) => format!(
            "({})",
            items.iter().map(repr_object).collect::<Vec<_>>().join(", ")
        ),
        Object::Dict(items) => format!(
            "{{{}}}",
            items
                .iter()
                .map(|(k, v)| format!("{}: {}", repr_object(k), repr_object(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Object::Exception(exc) => {
            format!("{}({})", exc.exc_type, super::value::quote_str(&exc.message))
        }
        Object::Repr(r) => r.clone(),
    }
}

impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Object::Bool(v)
    }
}

impl From<i64> for Object {
    fn from(v: i64) -> Self {
        Object::Int(v)
    }
}

impl From<i32> for Object {
    fn from(v: i32) -> Self {
        Object::Int(i64::from(v))
    }
}

impl From<f64> for Object {
    fn from(v: f64) -> Self {
        Object::Float(v)
    }
}

impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Object::Str(v.to_string())
    }
}

impl From<String> for Object {
    fn from(v: String) -> Self {
        Object::Str(v)
    }
}

impl From<Vec<u8>> for Object {
    fn from(v: Vec<u8>) -> Self {
        Object::Bytes(v)
    }
}

impl From<Vec<Object>> for Object {
    fn from(v: Vec<Object>) -> Self {
        Object::List(v)
    }
}

impl<T: Into<Object>> From<Option<T>> for Object {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Object::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_conversion_preserves_structure() {
        let value = json!({"name": "echo", "tags": [1, 2.5, null, true]});
        let obj = Object::from_json(&value);
        assert_eq!(obj.get("name"), Some(&Object::Str("echo".into())));
        assert_eq!(obj.to_json().unwrap(), value);
    }

    #[test]
    fn bytes_are_not_json() {
        let err = Object::Bytes(vec![1]).to_json().unwrap_err();
        assert!(err.message.contains("not JSON serializable"));
    }

    #[test]
    fn display_matches_python_str() {
        let obj = Object::List(vec![Object::Str("a".into()), Object::None, Object::Float(1.0)]);
        assert_eq!(obj.to_string(), "['a', None, 1.0]");
        assert_eq!(Object::Str("plain".into()).to_string(), "plain");
    }
}
