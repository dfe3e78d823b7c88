//! Interpreter heap values.
//!
//! Containers are shared through `Rc<RefCell<..>>` so aliasing behaves like
//! Python (`b = a; b.append(1)` mutates `a`). Values never leave the
//! interpreter thread; the host sees [`Object`] copies instead.

use indexmap::IndexMap;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

use super::ast::FunctionDef;
use super::exception::{ExcType, ScriptException};
use super::object::Object;

/// Builtins that double as type objects for `isinstance` and `type()`.
pub const TYPE_NAMES: &[&str] = &[
    "bool", "bytes", "dict", "float", "int", "list", "range", "str", "tuple",
];

/// Longest string (in characters) or container a script may build.
pub const MAX_LEN: usize = 10_000_000;

/// Nesting depth past which `repr` stops descending.
const MAX_REPR_DEPTH: usize = 1_000;

/// `MemoryError` if a result of `len` items would exceed [`MAX_LEN`].
pub fn check_len(len: usize, what: &str) -> Result<(), ScriptException> {
    if len > MAX_LEN {
        return Err(ScriptException::new(
            ExcType::MemoryError,
            format!("{what} would exceed {MAX_LEN} items"),
        ));
    }
    Ok(())
}

/// Dict storage: hashed key to the original key and its value.
pub type DictMap = IndexMap<DictKey, (Value, Value)>;

/// Interpreter value.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<DictMap>>),
    Range { start: i64, stop: i64, step: i64 },
    Function(Rc<Closure>),
    Builtin(&'static str),
    /// Method bound to its receiver, e.g. `items.append`.
    Method(Box<Value>, &'static str),
    /// Host-provided function, resolved by name at call time.
    External(Rc<str>),
    ExcClass(ExcType),
    Exception(Rc<ScriptException>),
}

/// User-defined function together with its defining scope.
#[derive(Debug)]
pub struct Closure {
    pub def: Arc<FunctionDef>,
    /// Evaluated defaults, aligned with `def.params`.
    pub defaults: Vec<Option<Value>>,
    pub scope: Rc<Scope>,
}

/// Lexical scope. The module scope has no parent.
#[derive(Debug, Default)]
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    declared_outer: RefCell<HashSet<String>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn module() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Self {
            parent: Some(parent.clone()),
            ..Self::default()
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Bind a name, honoring `global`/`nonlocal` declarations.
    pub fn assign(self: &Rc<Self>, name: &str, value: Value) {
        if self.declared_outer.borrow().contains(name) {
            let mut scope = self.parent.clone();
            while let Some(current) = scope {
                if current.vars.borrow().contains_key(name) || current.parent.is_none() {
                    current.vars.borrow_mut().insert(name.to_string(), value);
                    return;
                }
                scope = current.parent.clone();
            }
        }
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub fn declare_outer(&self, name: &str) {
        self.declared_outer.borrow_mut().insert(name.to_string());
    }

    /// Drop every binding. Breaks reference cycles between functions and
    /// the scope that defines them.
    pub fn clear(&self) {
        self.vars.borrow_mut().clear();
    }
}

/// Hashable projection of a dict key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Vec<DictKey>),
    Other(String),
}

impl Hash for DictKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            DictKey::None => {}
            DictKey::Int(i) => i.hash(state),
            DictKey::Float(bits) => bits.hash(state),
            DictKey::Str(s) => s.hash(state),
            DictKey::Bytes(b) => b.hash(state),
            DictKey::Tuple(items) => items.hash(state),
            DictKey::Other(s) => s.hash(state),
        }
    }
}

impl DictKey {
    /// Project a value into a key. `1`, `1.0` and `True` share a key.
    pub fn from_value(value: &Value) -> Result<Self, ScriptException> {
        Ok(match value {
            Value::None => DictKey::None,
            Value::Bool(b) => DictKey::Int(i64::from(*b)),
            Value::Int(i) => DictKey::Int(*i),
            Value::Float(f) => {
                // `i64::MAX as f64` rounds up to 2^63, which is out of range.
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    DictKey::Int(*f as i64)
                } else {
                    DictKey::Float(f.to_bits())
                }
            }
            Value::Str(s) => DictKey::Str(s.clone()),
            Value::Bytes(b) => DictKey::Bytes(b.clone()),
            Value::Tuple(items) => DictKey::Tuple(
                items
                    .iter()
                    .map(DictKey::from_value)
                    .collect::<Result<_, _>>()?,
            ),
            Value::ExcClass(t) => DictKey::Other(format!("class:{}", t.name())),
            Value::Builtin(name) => DictKey::Other(format!("builtin:{name}")),
            Value::Function(f) => DictKey::Other(format!("function:{:p}", Rc::as_ptr(f))),
            other => {
                return Err(ScriptException::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )));
            }
        })
    }
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(map: DictMap) -> Self {
        Value::Dict(Rc::new(RefCell::new(map)))
    }

    /// Build a dict, failing on unhashable keys.
    pub fn dict_from_pairs(
        pairs: impl IntoIterator<Item = (Value, Value)>,
    ) -> Result<Self, ScriptException> {
        let mut map = DictMap::new();
        for (k, v) in pairs {
            dict_insert(&mut map, k, v)?;
        }
        Ok(Value::dict(map))
    }

    pub fn exception(exc: ScriptException) -> Self {
        Value::Exception(Rc::new(exc))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Function(_) | Value::External(_) => "function",
            Value::Builtin(name) if TYPE_NAMES.contains(name) => "type",
            Value::Builtin(_) | Value::Method(..) => "builtin_function_or_method",
            Value::ExcClass(_) => "type",
            Value::Exception(exc) => exc.exc_type.name(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(map) => !map.borrow().is_empty(),
            Value::Range { start, stop, step } => wide_range_len(*start, *stop, *step) > 0,
            _ => true,
        }
    }

    /// `repr()` rendering. Containers already being rendered show as `[...]`
    /// or `{...}`.
    pub fn repr(&self) -> String {
        self.repr_nested(&mut Vec::new())
    }

    fn repr_nested(&self, open: &mut Vec<*const ()>) -> String {
        if open.len() > MAX_REPR_DEPTH {
            return "...".to_string();
        }
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => quote_str(s),
            Value::Bytes(b) => quote_bytes(b),
            Value::List(items) => {
                let ptr = Rc::as_ptr(items).cast::<()>();
                if open.contains(&ptr) {
                    return "[...]".to_string();
                }
                open.push(ptr);
                let body = join_repr(items.borrow().iter(), open);
                open.pop();
                format!("[{body}]")
            }
            Value::Tuple(items) if items.len() == 1 => {
                format!("({},)", items[0].repr_nested(open))
            }
            Value::Tuple(items) => format!("({})", join_repr(items.iter(), open)),
            Value::Dict(map) => {
                let ptr = Rc::as_ptr(map).cast::<()>();
                if open.contains(&ptr) {
                    return "{...}".to_string();
                }
                open.push(ptr);
                let body = map
                    .borrow()
                    .values()
                    .map(|(k, v)| format!("{}: {}", k.repr_nested(open), v.repr_nested(open)))
                    .collect::<Vec<_>>()
                    .join(", ");
                open.pop();
                format!("{{{body}}}")
            }
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    format!("range({start}, {stop})")
                } else {
                    format!("range({start}, {stop}, {step})")
                }
            }
            Value::Function(f) => format!("<function {}>", f.def.name),
            Value::External(name) => format!("<function {name}>"),
            Value::Builtin(name) if TYPE_NAMES.contains(name) => format!("<class '{name}'>"),
            Value::Builtin(name) => format!("<built-in function {name}>"),
            Value::Method(recv, name) => {
                format!("<built-in method {name} of {} object>", recv.type_name())
            }
            Value::ExcClass(t) => format!("<class '{}'>", t.name()),
            Value::Exception(exc) => format!("{}({})", exc.exc_type, quote_str(&exc.message)),
        }
    }

    /// `str()` rendering.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(exc) => exc.message.clone(),
            other => other.repr(),
        }
    }

    /// Deep-copy an owned host value into the heap.
    pub fn from_object(obj: &Object) -> Self {
        match obj {
            Object::None => Value::None,
            Object::Bool(b) => Value::Bool(*b),
            Object::Int(i) => Value::Int(*i),
            Object::Float(f) => Value::Float(*f),
            Object::Str(s) | Object::Repr(s) => Value::str(s),
            Object::Bytes(b) => Value::Bytes(Rc::from(b.as_slice())),
            Object::List(items) => Value::list(items.iter().map(Value::from_object).collect()),
            Object::Tuple(items) => Value::tuple(items.iter().map(Value::from_object).collect()),
            Object::Dict(items) => {
                let mut map = DictMap::new();
                for (k, v) in items {
                    let key = Value::from_object(k);
                    // Keys arriving from the host are strings or scalars.
                    let hashed = DictKey::from_value(&key)
                        .unwrap_or_else(|_| DictKey::Other(key.repr()));
                    map.insert(hashed, (key, Value::from_object(v)));
                }
                Value::dict(map)
            }
            Object::Exception(exc) => Value::exception(exc.clone()),
        }
    }

    /// Deep-copy into an owned host value.
    pub fn to_object(&self) -> Object {
        self.to_object_bounded(0)
    }

    fn to_object_bounded(&self, depth: usize) -> Object {
        // Self-referencing containers stop here.
        if depth > 256 {
            return Object::Repr("...".to_string());
        }
        match self {
            Value::None => Object::None,
            Value::Bool(b) => Object::Bool(*b),
            Value::Int(i) => Object::Int(*i),
            Value::Float(f) => Object::Float(*f),
            Value::Str(s) => Object::Str(s.to_string()),
            Value::Bytes(b) => Object::Bytes(b.to_vec()),
            Value::List(items) => Object::List(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.to_object_bounded(depth + 1))
                    .collect(),
            ),
            Value::Tuple(items) => Object::Tuple(
                items
                    .iter()
                    .map(|v| v.to_object_bounded(depth + 1))
                    .collect(),
            ),
            Value::Dict(map) => Object::Dict(
                map.borrow()
                    .values()
                    .map(|(k, v)| (k.to_object_bounded(depth + 1), v.to_object_bounded(depth + 1)))
                    .collect(),
            ),
            Value::Exception(exc) => Object::Exception((**exc).clone()),
            other => Object::Repr(other.repr()),
        }
    }
}

fn join_repr<'a>(items: impl Iterator<Item = &'a Value>, open: &mut Vec<*const ()>) -> String {
    items
        .map(|item| item.repr_nested(open))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Insert into a dict map, hashing the key.
pub fn dict_insert(map: &mut DictMap, key: Value, value: Value) -> Result<(), ScriptException> {
    let hashed = DictKey::from_value(&key)?;
    match map.get_mut(&hashed) {
        // Python keeps the first key object on overwrite.
        Some(entry) => entry.1 = value,
        None => {
            map.insert(hashed, (key, value));
        }
    }
    Ok(())
}

/// Number of items in `range(start, stop, step)`. Wider than `i64` since
/// `range(i64::MIN, i64::MAX)` has 2^64 - 1 items.
pub fn wide_range_len(start: i64, stop: i64, step: i64) -> i128 {
    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    if step > 0 && start < stop {
        (stop - start + step - 1) / step
    } else if step < 0 && start > stop {
        (start - stop - step - 1) / (-step)
    } else {
        0
    }
}

/// `len()` of a range. `OverflowError` when the length does not fit in an `int`.
pub fn range_len(value: &Value) -> Result<i64, ScriptException> {
    match value {
        Value::Range { start, stop, step } => i64::try_from(wide_range_len(*start, *stop, *step))
            .map_err(|_| {
                ScriptException::new(ExcType::OverflowError, "range length does not fit in an int")
            }),
        _ => Ok(0),
    }
}

/// Python `==`.
pub fn py_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || seq_eq(&x.borrow(), &y.borrow())
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().all(|(key, (_, v))| {
                    y.get(key).is_some_and(|(_, other)| py_eq(v, other))
                })
        }
        (
            Value::Range { start, stop, step },
            Value::Range {
                start: s2,
                stop: e2,
                step: st2,
            },
        ) => start == s2 && stop == e2 && step == st2,
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::External(x), Value::External(y)) => x == y,
        (Value::ExcClass(x), Value::ExcClass(y)) => x == y,
        (Value::Exception(x), Value::Exception(y)) => Rc::ptr_eq(x, y),
        _ => match (as_number(a), as_number(b)) {
            (Some(Number::Int(x)), Some(Number::Int(y))) => x == y,
            (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
            _ => false,
        },
    }
}

fn seq_eq(x: &[Value], y: &[Value]) -> bool {
    x.len() == y.len() && x.iter().zip(y).all(|(a, b)| py_eq(a, b))
}

/// Result of an ordering comparison.
pub enum Comparison {
    Ordered(Ordering),
    /// Comparable types whose values are unordered (NaN).
    Unordered,
    /// Types that do not support ordering.
    Unsupported,
}

/// Python ordering for `<`, `<=`, `>`, `>=` and sorting.
pub fn py_compare(a: &Value, b: &Value) -> Comparison {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Comparison::Ordered(x.cmp(y)),
        (Value::Bytes(x), Value::Bytes(y)) => Comparison::Ordered(x.cmp(y)),
        (Value::List(x), Value::List(y)) => seq_compare(&x.borrow(), &y.borrow()),
        (Value::Tuple(x), Value::Tuple(y)) => seq_compare(x, y),
        _ => match (as_number(a), as_number(b)) {
            (Some(Number::Int(x)), Some(Number::Int(y))) => Comparison::Ordered(x.cmp(&y)),
            (Some(x), Some(y)) => match x.as_f64().partial_cmp(&y.as_f64()) {
                Some(ord) => Comparison::Ordered(ord),
                None => Comparison::Unordered,
            },
            _ => Comparison::Unsupported,
        },
    }
}

fn seq_compare(x: &[Value], y: &[Value]) -> Comparison {
    for (a, b) in x.iter().zip(y) {
        if py_eq(a, b) {
            continue;
        }
        return py_compare(a, b);
    }
    Comparison::Ordered(x.len().cmp(&y.len()))
}

/// Numeric view of a value (`bool` counts as `int`).
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

pub fn as_number(value: &Value) -> Option<Number> {
    match value {
        Value::Bool(b) => Some(Number::Int(i64::from(*b))),
        Value::Int(i) => Some(Number::Int(*i)),
        Value::Float(f) => Some(Number::Float(*f)),
        _ => None,
    }
}

/// Python float repr: shortest round-trip digits, exponent outside `1e-4..1e16`.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let sci = format!("{value:e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if (-4..16).contains(&exponent) {
        let plain = format!("{value}");
        if plain.contains('.') || plain.contains("inf") || plain.contains("NaN") {
            plain
        } else {
            format!("{plain}.0")
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    }
}

/// Python string repr with quote selection.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Python bytes repr.
pub fn quote_bytes(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };
    let mut out = String::from("b");
    out.push(quote as char);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            b => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push(quote as char);
    out
}
