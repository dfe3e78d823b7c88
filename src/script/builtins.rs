//! Builtin functions and the methods of builtin types.

use std::rc::Rc;

use super::ast::{BinOp, CmpOp};
use super::exception::{ExcType, ScriptException};
use super::format::{format_value, str_format};
use super::interp::{Eval, Interpreter};
use super::ops;
use super::value::{
    DictKey, DictMap, Number, TYPE_NAMES, Value, as_number, check_len, dict_insert, py_eq,
    range_len,
};

type BuiltinResult<T> = Result<T, ScriptException>;

const FUNCTIONS: &[&str] = &[
    "abs", "all", "any", "bool", "bytes", "chr", "dict", "divmod", "enumerate", "filter", "float",
    "format", "hex", "int", "isinstance", "len", "list", "map", "max", "min", "ord", "print",
    "range", "repr", "reversed", "round", "sorted", "str", "sum", "tuple", "type", "zip",
];

const STR_METHODS: &[&str] = &[
    "capitalize", "center", "count", "encode", "endswith", "find", "format", "index", "isalnum",
    "isalpha", "isdigit", "islower", "isnumeric", "isspace", "isupper", "join", "ljust", "lower",
    "lstrip", "partition", "removeprefix", "removesuffix", "replace", "rfind", "rjust",
    "rpartition", "rsplit", "rstrip", "split", "splitlines", "startswith", "strip", "swapcase",
    "title", "upper", "zfill",
];
const BYTES_METHODS: &[&str] = &["decode", "endswith", "hex", "startswith"];
const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];
const TUPLE_METHODS: &[&str] = &["count", "index"];
const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "popitem", "setdefault", "update", "values",
];

/// Resolve a builtin function by name.
pub fn lookup(name: &str) -> Option<Value> {
    FUNCTIONS
        .iter()
        .find(|candidate| **candidate == name)
        .map(|name| Value::Builtin(name))
}

struct Args<'n> {
    name: &'n str,
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl<'n> Args<'n> {
    fn new(name: &'n str, positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            name,
            positional,
            keywords,
        }
    }

    fn keyword(&mut self, key: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(k, _)| k == key)?;
        Some(self.keywords.remove(index).1)
    }

    /// Keyword-or-positional parameter at `index`.
    fn param(&mut self, index: usize, key: &str) -> Option<Value> {
        match self.keyword(key) {
            Some(v) => Some(v),
            None => self.positional.get(index).cloned(),
        }
    }

    fn arity(&self, min: usize, max: usize) -> BuiltinResult<()> {
        let n = self.positional.len();
        if n < min || n > max {
            let message = if min == max {
                format!(
                    "{}() takes exactly {min} argument{} ({n} given)",
                    self.name,
                    if min == 1 { "" } else { "s" }
                )
            } else if n < min {
                let plural = if min == 1 { "" } else { "s" };
                format!("{} expected at least {min} argument{plural}, got {n}", self.name)
            } else {
                let plural = if max == 1 { "" } else { "s" };
                format!("{} expected at most {max} argument{plural}, got {n}", self.name)
            };
            return Err(ScriptException::type_error(message));
        }
        Ok(())
    }

    fn no_keywords_left(&self) -> BuiltinResult<()> {
        match self.keywords.first() {
            Some((key, _)) => Err(ScriptException::type_error(format!(
                "{}() got an unexpected keyword argument '{key}'",
                self.name
            ))),
            None => Ok(()),
        }
    }

    fn check(&self, min: usize, max: usize) -> BuiltinResult<()> {
        self.no_keywords_left()?;
        self.arity(min, max)
    }

    fn first(&self) -> &Value {
        &self.positional[0]
    }
}

fn expect_int(value: &Value, context: &str) -> BuiltinResult<i64> {
    match as_number(value) {
        Some(Number::Int(i)) => Ok(i),
        _ => Err(ScriptException::type_error(format!(
            "{context}: '{}' object cannot be interpreted as an integer",
            value.type_name()
        ))),
    }
}

fn expect_str(value: &Value, context: &str) -> BuiltinResult<Rc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => Err(ScriptException::type_error(format!(
            "{context} must be str, not {}",
            other.type_name()
        ))),
    }
}

fn optional(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !matches!(v, Value::None))
}

/// Call a builtin function.
pub fn call_builtin(
    interp: &mut Interpreter<'_>,
    name: &str,
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
) -> Eval<Value> {
    let mut args = Args::new(name, positional, keywords);
    let value = match name {
        "print" => {
            let sep = optional(args.keyword("sep")).map_or_else(|| " ".to_string(), |v| v.to_str());
            let end =
                optional(args.keyword("end")).map_or_else(|| "\n".to_string(), |v| v.to_str());
            args.keyword("flush");
            args.no_keywords_left()?;
            let text = args
                .positional
                .iter()
                .map(Value::to_str)
                .collect::<Vec<_>>()
                .join(&sep);
            interp.write_output(&text);
            interp.write_output(&end);
            Value::None
        }
        "len" => {
            args.check(1, 1)?;
            Value::Int(length(args.first())?)
        }
        "str" => {
            let encoding = args.keyword("encoding");
            args.check(0, 2)?;
            match (args.positional.first(), encoding.or_else(|| args.positional.get(1).cloned())) {
                (None, _) => Value::str(""),
                (Some(Value::Bytes(b)), Some(_)) => Value::str(&decode_utf8(b, "strict")?),
                (Some(v), _) => Value::str(&v.to_str()),
            }
        }
        "repr" => {
            args.check(1, 1)?;
            Value::str(&args.first().repr())
        }
        "int" => {
            let base = args.keyword("base");
            args.check(0, 2)?;
            let base = match base.or_else(|| args.positional.get(1).cloned()) {
                Some(b) => Some(expect_int(&b, "int() base")?),
                None => None,
            };
            match args.positional.first() {
                None => Value::Int(0),
                Some(v) => Value::Int(to_int(v, base)?),
            }
        }
        "float" => {
            args.check(0, 1)?;
            match args.positional.first() {
                None => Value::Float(0.0),
                Some(v) => Value::Float(to_float(v)?),
            }
        }
        "bool" => {
            args.check(0, 1)?;
            Value::Bool(args.positional.first().is_some_and(Value::truthy))
        }
        "list" => {
            args.check(0, 1)?;
            match args.positional.first() {
                None => Value::list(Vec::new()),
                Some(v) => Value::list(ops::materialize(v)?),
            }
        }
        "tuple" => {
            args.check(0, 1)?;
            match args.positional.first() {
                None => Value::tuple(Vec::new()),
                Some(v) => Value::tuple(ops::materialize(v)?),
            }
        }
        "dict" => {
            args.arity(0, 1)?;
            let mut map = DictMap::new();
            if let Some(source) = args.positional.first() {
                update_dict(&mut map, source)?;
            }
            for (key, value) in std::mem::take(&mut args.keywords) {
                dict_insert(&mut map, Value::str(&key), value)?;
            }
            Value::dict(map)
        }
        "bytes" => {
            let encoding = args.keyword("encoding");
            args.check(0, 2)?;
            match args.positional.first() {
                None => Value::Bytes(Rc::from(Vec::new())),
                Some(Value::Str(s)) => {
                    if encoding.is_none() && args.positional.len() < 2 {
                        return Err(ScriptException::type_error(
                            "string argument without an encoding",
                        )
                        .into());
                    }
                    Value::Bytes(Rc::from(s.as_bytes()))
                }
                Some(Value::Bytes(b)) => Value::Bytes(b.clone()),
                Some(Value::Int(n)) => {
                    let n = usize::try_from(*n)
                        .map_err(|_| ScriptException::value_error("negative count"))?;
                    check_len(n, "bytes")?;
                    Value::Bytes(Rc::from(vec![0u8; n]))
                }
                Some(other) => {
                    let mut out = Vec::new();
                    for item in ops::materialize(other)? {
                        let b = expect_int(&item, "bytes")?;
                        out.push(u8::try_from(b).map_err(|_| {
                            ScriptException::value_error("bytes must be in range(0, 256)")
                        })?);
                    }
                    Value::Bytes(Rc::from(out))
                }
            }
        }
        "range" => {
            args.check(1, 3)?;
            let ints = args
                .positional
                .iter()
                .map(|v| expect_int(v, "range()"))
                .collect::<BuiltinResult<Vec<_>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => (0, 0, 1),
            };
            if step == 0 {
                return Err(ScriptException::value_error("range() arg 3 must not be zero").into());
            }
            Value::Range { start, stop, step }
        }
        "enumerate" => {
            let start = args.keyword("start");
            args.check(1, 2)?;
            let mut counter = match start.or_else(|| args.positional.get(1).cloned()) {
                Some(v) => expect_int(&v, "enumerate()")?,
                None => 0,
            };
            let mut out = Vec::new();
            for item in ops::materialize(args.first())? {
                out.push(Value::tuple(vec![Value::Int(counter), item]));
                counter += 1;
            }
            Value::list(out)
        }
        "zip" => {
            args.no_keywords_left()?;
            let columns = args
                .positional
                .iter()
                .map(ops::materialize)
                .collect::<BuiltinResult<Vec<_>>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            Value::list(
                (0..rows)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            )
        }
        "sorted" => {
            let key = optional(args.keyword("key"));
            let reverse = args.keyword("reverse").is_some_and(|v| v.truthy());
            args.check(1, 1)?;
            let items: Vec<Value> = ops::materialize(args.first())?;
            Value::list(sort_values(interp, items, key, reverse)?)
        }
        "reversed" => {
            args.check(1, 1)?;
            if matches!(args.first(), Value::Dict(_)) {
                return Err(ScriptException::type_error("'dict' object is not reversible").into());
            }
            let mut items: Vec<Value> = ops::materialize(args.first())?;
            items.reverse();
            Value::list(items)
        }
        "min" | "max" => {
            let key = optional(args.keyword("key"));
            let default = args.keyword("default");
            args.no_keywords_left()?;
            let items: Vec<Value> = match args.positional.len() {
                0 => {
                    return Err(ScriptException::type_error(format!(
                        "{name} expected at least 1 argument, got 0"
                    ))
                    .into());
                }
                1 => ops::materialize(args.first())?,
                _ => args.positional.clone(),
            };
            extreme(interp, name, items, key, default)?
        }
        "sum" => {
            let start = args.keyword("start");
            args.check(1, 2)?;
            let mut total = start
                .or_else(|| args.positional.get(1).cloned())
                .unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err(ScriptException::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                )
                .into());
            }
            for item in ops::iterate(args.first())? {
                total = ops::binary(BinOp::Add, &total, &item)?;
            }
            total
        }
        "abs" => {
            args.check(1, 1)?;
            match as_number(args.first()) {
                Some(Number::Int(i)) => Value::Int(i.checked_abs().ok_or_else(|| {
                    ScriptException::new(ExcType::OverflowError, "integer overflow")
                })?),
                Some(Number::Float(f)) => Value::Float(f.abs()),
                None => {
                    return Err(ScriptException::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        args.first().type_name()
                    ))
                    .into());
                }
            }
        }
        "round" => {
            let ndigits = optional(args.param(1, "ndigits"));
            args.check(1, 2)?;
            let ndigits = match ndigits {
                Some(n) => Some(expect_int(&n, "round()")?),
                None => None,
            };
            round(args.first(), ndigits)?
        }
        "any" => {
            args.check(1, 1)?;
            Value::Bool(ops::iterate(args.first())?.any(|v| v.truthy()))
        }
        "all" => {
            args.check(1, 1)?;
            Value::Bool(ops::iterate(args.first())?.all(|v| v.truthy()))
        }
        "isinstance" => {
            args.check(2, 2)?;
            Value::Bool(isinstance(&args.positional[0], &args.positional[1])?)
        }
        "type" => {
            args.check(1, 1)?;
            type_of(args.first())
        }
        "format" => {
            args.check(1, 2)?;
            let spec = match args.positional.get(1) {
                Some(v) => expect_str(v, "format() argument 2")?.to_string(),
                None => String::new(),
            };
            Value::str(&format_value(args.first(), &spec)?)
        }
        "map" => {
            args.no_keywords_left()?;
            if args.positional.len() < 2 {
                return Err(
                    ScriptException::type_error("map() must have at least two arguments.").into(),
                );
            }
            let func = args.positional[0].clone();
            let columns = args.positional[1..]
                .iter()
                .map(ops::materialize)
                .collect::<BuiltinResult<Vec<_>>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(rows);
            for i in 0..rows {
                let call_args = columns.iter().map(|c| c[i].clone()).collect();
                out.push(interp.call_value(&func, call_args, Vec::new())?);
            }
            Value::list(out)
        }
        "filter" => {
            args.check(2, 2)?;
            let func = args.positional[0].clone();
            let mut out = Vec::new();
            for item in ops::materialize(&args.positional[1])? {
                let keep = match &func {
                    Value::None => item.truthy(),
                    f => interp.call_value(f, vec![item.clone()], Vec::new())?.truthy(),
                };
                if keep {
                    out.push(item);
                }
            }
            Value::list(out)
        }
        "chr" => {
            args.check(1, 1)?;
            let code = expect_int(args.first(), "chr()")?;
            let ch = u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| ScriptException::value_error("chr() arg not in range(0x110000)"))?;
            Value::str(&ch.to_string())
        }
        "ord" => {
            args.check(1, 1)?;
            let s = expect_str(args.first(), "ord() argument")?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Value::Int(i64::from(u32::from(c))),
                _ => {
                    return Err(ScriptException::type_error(format!(
                        "ord() expected a character, but string of length {} found",
                        s.chars().count()
                    ))
                    .into());
                }
            }
        }
        "divmod" => {
            args.check(2, 2)?;
            let (a, b) = (&args.positional[0], &args.positional[1]);
            Value::tuple(vec![
                ops::binary(BinOp::FloorDiv, a, b)?,
                ops::binary(BinOp::Mod, a, b)?,
            ])
        }
        "hex" => {
            args.check(1, 1)?;
            let i = expect_int(args.first(), "hex()")?;
            let sign = if i < 0 { "-" } else { "" };
            Value::str(&format!("{sign}0x{:x}", i.unsigned_abs()))
        }
        other => return Err(ScriptException::name_error(other).into()),
    };
    Ok(value)
}

fn length(value: &Value) -> BuiltinResult<i64> {
    Ok(match value {
        Value::Str(s) => s.chars().count() as i64,
        Value::Bytes(b) => b.len() as i64,
        Value::List(items) => items.borrow().len() as i64,
        Value::Tuple(items) => items.len() as i64,
        Value::Dict(map) => map.borrow().len() as i64,
        Value::Range { .. } => range_len(value)?,
        other => {
            return Err(ScriptException::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )));
        }
    })
}

fn to_int(value: &Value, base: Option<i64>) -> BuiltinResult<i64> {
    match value {
        Value::Str(s) => parse_int(s, base.unwrap_or(10)),
        _ if base.is_some() => Err(ScriptException::type_error(
            "int() can't convert non-string with explicit base",
        )),
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Float(f) => {
            if f.is_nan() {
                Err(ScriptException::value_error("cannot convert float NaN to integer"))
            } else if f.is_infinite() || f.abs() >= 9.223_372_036_854_776e18 {
                Err(ScriptException::new(
                    ExcType::OverflowError,
                    "cannot convert float infinity to integer",
                ))
            } else {
                Ok(f.trunc() as i64)
            }
        }
        other => Err(ScriptException::type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

fn parse_int(text: &str, base: i64) -> BuiltinResult<i64> {
    let invalid = || {
        ScriptException::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            Value::str(text).repr()
        ))
    };
    let trimmed = text.trim();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = rest.to_ascii_lowercase();
    let (radix, digits) = match base {
        0 | 16 if lower.starts_with("0x") => (16, &lower[2..]),
        0 | 8 if lower.starts_with("0o") => (8, &lower[2..]),
        0 | 2 if lower.starts_with("0b") => (2, &lower[2..]),
        0 => (10, lower.as_str()),
        b if (2..=36).contains(&b) => (b as u32, lower.as_str()),
        _ => {
            return Err(ScriptException::value_error(
                "int() base must be >= 2 and <= 36, or 0",
            ));
        }
    };
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
    {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let magnitude = i64::from_str_radix(&cleaned, radix).map_err(|_| invalid())?;
    Ok(if negative { -magnitude } else { magnitude })
}

fn to_float(value: &Value) -> BuiltinResult<f64> {
    match value {
        Value::Str(s) => {
            let trimmed = s.trim();
            let cleaned = trimmed.replace('_', "");
            cleaned.parse::<f64>().map_err(|_| {
                ScriptException::value_error(format!(
                    "could not convert string to float: {}",
                    Value::str(s).repr()
                ))
            })
        }
        other => match as_number(other) {
            Some(n) => Ok(n.as_f64()),
            None => Err(ScriptException::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))),
        },
    }
}

fn round(value: &Value, ndigits: Option<i64>) -> BuiltinResult<Value> {
    match (as_number(value), ndigits) {
        (Some(Number::Int(i)), None) => Ok(Value::Int(i)),
        (Some(Number::Int(i)), Some(n)) if n >= 0 => Ok(Value::Int(i)),
        (Some(Number::Int(i)), Some(n)) => {
            let scale = 10f64.powi(i32::try_from(-n).unwrap_or(i32::MAX));
            Ok(Value::Int(((i as f64 / scale).round_ties_even() * scale) as i64))
        }
        (Some(Number::Float(f)), None) => {
            if f.is_nan() {
                return Err(ScriptException::value_error("cannot convert float NaN to integer"));
            }
            if f.is_infinite() {
                return Err(ScriptException::new(
                    ExcType::OverflowError,
                    "cannot convert float infinity to integer",
                ));
            }
            Ok(Value::Int(f.round_ties_even() as i64))
        }
        (Some(Number::Float(f)), Some(n)) => {
            if !f.is_finite() {
                return Ok(Value::Float(f));
            }
            let n = i32::try_from(n.clamp(-308, 308)).unwrap_or(0);
            let scale = 10f64.powi(n.abs());
            let rounded = if n >= 0 {
                (f * scale).round_ties_even() / scale
            } else {
                (f / scale).round_ties_even() * scale
            };
            Ok(Value::Float(rounded))
        }
        (None, _) => Err(ScriptException::type_error(format!(
            "type {} doesn't define __round__ method",
            value.type_name()
        ))),
    }
}

fn isinstance(value: &Value, class: &Value) -> BuiltinResult<bool> {
    match class {
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if isinstance(value, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(name) if TYPE_NAMES.contains(name) => Ok(match *name {
            "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
            "bool" => matches!(value, Value::Bool(_)),
            "float" => matches!(value, Value::Float(_)),
            "str" => matches!(value, Value::Str(_)),
            "bytes" => matches!(value, Value::Bytes(_)),
            "list" => matches!(value, Value::List(_)),
            "tuple" => matches!(value, Value::Tuple(_)),
            "dict" => matches!(value, Value::Dict(_)),
            "range" => matches!(value, Value::Range { .. }),
            _ => false,
        }),
        Value::ExcClass(handler) => Ok(match value {
            Value::Exception(exc) => exc.exc_type.is_subclass_of(*handler),
            _ => false,
        }),
        _ => Err(ScriptException::type_error(
            "isinstance() arg 2 must be a type, a tuple of types, or a union",
        )),
    }
}

fn type_of(value: &Value) -> Value {
    match value {
        Value::Exception(exc) => Value::ExcClass(exc.exc_type),
        other => match lookup(other.type_name()) {
            Some(builtin) => builtin,
            None => Value::str(&format!("<class '{}'>", other.type_name())),
        },
    }
}

fn update_dict(map: &mut DictMap, source: &Value) -> BuiltinResult<()> {
    if let Value::Dict(other) = source {
        for (key, value) in other.borrow().values() {
            dict_insert(map, key.clone(), value.clone())?;
        }
        return Ok(());
    }
    for (index, item) in ops::iterate(source)?.enumerate() {
        let pair: Vec<Value> = ops::iterate(&item)
            .map_err(|_| {
                ScriptException::type_error(format!(
                    "cannot convert dictionary update sequence element #{index} to a sequence"
                ))
            })?
            .collect();
        let [key, value] = <[Value; 2]>::try_from(pair).map_err(|pair| {
            ScriptException::value_error(format!(
                "dictionary update sequence element #{index} has length {}; 2 is required",
                pair.len()
            ))
        })?;
        dict_insert(map, key, value)?;
    }
    Ok(())
}

/// Stable merge sort with a fallible `<`.
fn merge_sort(
    mut order: Vec<usize>,
    less: &mut dyn FnMut(usize, usize) -> BuiltinResult<bool>,
) -> BuiltinResult<Vec<usize>> {
    if order.len() <= 1 {
        return Ok(order);
    }
    let right = order.split_off(order.len() / 2);
    let left = merge_sort(order, less)?;
    let right = merge_sort(right, less)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        if less(right[j], left[i])? {
            merged.push(right[j]);
            j += 1;
        } else {
            merged.push(left[i]);
            i += 1;
        }
    }
    merged.extend_from_slice(&left[i..]);
    merged.extend_from_slice(&right[j..]);
    Ok(merged)
}

fn sort_values(
    interp: &mut Interpreter<'_>,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> Eval<Vec<Value>> {
    let keys = match &key {
        Some(func) => items
            .iter()
            .map(|item| interp.call_value(func, vec![item.clone()], Vec::new()))
            .collect::<Eval<Vec<_>>>()?,
        None => items.clone(),
    };
    let order = merge_sort((0..items.len()).collect(), &mut |a, b| {
        if reverse {
            ops::compare(CmpOp::Lt, &keys[b], &keys[a])
        } else {
            ops::compare(CmpOp::Lt, &keys[a], &keys[b])
        }
    })?;
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

fn extreme(
    interp: &mut Interpreter<'_>,
    name: &str,
    items: Vec<Value>,
    key: Option<Value>,
    default: Option<Value>,
) -> Eval<Value> {
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let score = match &key {
            Some(func) => interp.call_value(func, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((_, best_score)) if name == "min" => ops::compare(CmpOp::Lt, &score, best_score)?,
            Some((_, best_score)) => ops::compare(CmpOp::Gt, &score, best_score)?,
        };
        if replace {
            best = Some((item, score));
        }
    }
    match (best, default) {
        (Some((item, _)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => {
            Err(ScriptException::value_error(format!("{name}() arg is an empty sequence")).into())
        }
    }
}

fn decode_utf8(bytes: &[u8], errors: &str) -> BuiltinResult<String> {
    match errors {
        "replace" | "ignore" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        _ => String::from_utf8(bytes.to_vec()).map_err(|e| {
            ScriptException::value_error(format!(
                "'utf-8' codec can't decode byte at position {}: invalid start byte",
                e.utf8_error().valid_up_to()
            ))
        }),
    }
}

/// Attribute access on builtin values. Methods come back bound.
pub fn get_attribute(value: &Value, attr: &str) -> BuiltinResult<Value> {
    let methods: &[&'static str] = match value {
        Value::Str(_) => STR_METHODS,
        Value::Bytes(_) => BYTES_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Exception(exc) if attr == "args" => {
            return Ok(if exc.message.is_empty() {
                Value::tuple(Vec::new())
            } else {
                Value::tuple(vec![Value::str(&exc.message)])
            });
        }
        Value::Builtin(name) if attr == "__name__" => return Ok(Value::str(name)),
        Value::ExcClass(t) if attr == "__name__" => return Ok(Value::str(t.name())),
        Value::Function(f) if attr == "__name__" => return Ok(Value::str(&f.def.name)),
        Value::External(name) if attr == "__name__" => return Ok(Value::Str(name.clone())),
        _ => &[],
    };
    match methods.iter().find(|m| **m == attr) {
        Some(method) => Ok(Value::Method(Box::new(value.clone()), method)),
        None => Err(ScriptException::new(
            ExcType::AttributeError,
            format!("'{}' object has no attribute '{attr}'", value.type_name()),
        )),
    }
}

/// Call a method bound by [`get_attribute`].
pub fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
) -> Eval<Value> {
    let mut args = Args::new(name, positional, keywords);
    match receiver {
        Value::Str(s) => Ok(str_method(s, name, &mut args)?),
        Value::Bytes(b) => Ok(bytes_method(b, name, &mut args)?),
        Value::List(_) => list_method(interp, receiver, name, &mut args),
        Value::Tuple(items) => Ok(sequence_method(items, name, &mut args)?),
        Value::Dict(_) => Ok(dict_method(receiver, name, &mut args)?),
        other => Err(ScriptException::new(
            ExcType::AttributeError,
            format!("'{}' object has no attribute '{name}'", other.type_name()),
        )
        .into()),
    }
}

fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn prefixes(value: &Value) -> BuiltinResult<Vec<Rc<str>>> {
    match value {
        Value::Tuple(items) => items
            .iter()
            .map(|v| expect_str(v, "tuple for startswith"))
            .collect(),
        other => Ok(vec![expect_str(other, "startswith first arg")?]),
    }
}

fn pad_arg(args: &Args<'_>) -> BuiltinResult<(usize, char)> {
    let width = expect_int(args.first(), args.name)?.max(0) as usize;
    check_len(width, "padded string")?;
    let fill = match args.positional.get(1) {
        Some(v) => {
            let s = expect_str(v, "fill character")?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(ScriptException::type_error(
                        "The fill character must be exactly one character long",
                    ));
                }
            }
        }
        None => ' ',
    };
    Ok((width, fill))
}

fn split_whitespace(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 == maxsplit {
            parts.push(Value::str(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(Value::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts
}

fn str_method(s: &Rc<str>, name: &str, args: &mut Args<'_>) -> BuiltinResult<Value> {
    let text: &str = s;
    Ok(match name {
        "upper" => {
            args.check(0, 0)?;
            Value::str(&text.to_uppercase())
        }
        "lower" => {
            args.check(0, 0)?;
            Value::str(&text.to_lowercase())
        }
        "swapcase" => {
            args.check(0, 0)?;
            let swapped: String = text
                .chars()
                .flat_map(|c| {
                    if c.is_uppercase() {
                        c.to_lowercase().collect::<Vec<_>>()
                    } else {
                        c.to_uppercase().collect::<Vec<_>>()
                    }
                })
                .collect();
            Value::str(&swapped)
        }
        "capitalize" => {
            args.check(0, 0)?;
            let mut chars = text.chars();
            let out = match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.as_str().to_lowercase().chars())
                    .collect(),
                None => String::new(),
            };
            Value::str(&out)
        }
        "title" => {
            args.check(0, 0)?;
            let mut out = String::with_capacity(text.len());
            let mut previous_cased = false;
            for c in text.chars() {
                if previous_cased {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                previous_cased = c.is_alphabetic();
            }
            Value::str(&out)
        }
        "strip" | "lstrip" | "rstrip" => {
            args.check(0, 1)?;
            let chars = match optional(args.positional.first().cloned()) {
                Some(v) => Some(expect_str(&v, name)?),
                None => None,
            };
            let matcher = |c: char| match &chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            Value::str(match name {
                "strip" => text.trim_matches(matcher),
                "lstrip" => text.trim_start_matches(matcher),
                _ => text.trim_end_matches(matcher),
            })
        }
        "split" | "rsplit" => {
            let sep = optional(args.param(0, "sep"));
            let maxsplit = match args.param(1, "maxsplit") {
                Some(v) => expect_int(&v, name)?,
                None => -1,
            };
            args.no_keywords_left()?;
            let parts: Vec<Value> = match sep {
                None if name == "split" => split_whitespace(text, maxsplit),
                None => {
                    let reversed: String = text.chars().rev().collect();
                    let mut parts: Vec<Value> = split_whitespace(&reversed, maxsplit)
                        .into_iter()
                        .map(|v| Value::str(&v.to_str().chars().rev().collect::<String>()))
                        .collect();
                    parts.reverse();
                    parts
                }
                Some(sep) => {
                    let sep = expect_str(&sep, "separator")?;
                    if sep.is_empty() {
                        return Err(ScriptException::value_error("empty separator"));
                    }
                    let pieces: Vec<&str> = match (name, maxsplit) {
                        ("split", m) if m >= 0 => text.splitn(m as usize + 1, &*sep).collect(),
                        ("split", _) => text.split(&*sep).collect(),
                        (_, m) if m >= 0 => {
                            let mut p: Vec<&str> = text.rsplitn(m as usize + 1, &*sep).collect();
                            p.reverse();
                            p
                        }
                        _ => text.split(&*sep).collect(),
                    };
                    pieces.into_iter().map(Value::str).collect()
                }
            };
            Value::list(parts)
        }
        "splitlines" => {
            args.check(0, 0)?;
            Value::list(text.lines().map(Value::str).collect())
        }
        "join" => {
            args.check(1, 1)?;
            let mut pieces = Vec::new();
            for (i, item) in ops::iterate(args.first())?.enumerate() {
                match item {
                    Value::Str(piece) => pieces.push(piece),
                    other => {
                        return Err(ScriptException::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )));
                    }
                }
            }
            let total = pieces.iter().map(|p| p.len()).sum::<usize>()
                + text.len() * pieces.len().saturating_sub(1);
            check_len(total, "joined string")?;
            let joined = pieces.iter().map(|p| &**p).collect::<Vec<&str>>().join(text);
            Value::str(&joined)
        }
        "replace" => {
            args.check(2, 3)?;
            let old = expect_str(&args.positional[0], "replace() argument 1")?;
            let new = expect_str(&args.positional[1], "replace() argument 2")?;
            let count = match args.positional.get(2) {
                Some(v) => expect_int(v, "replace()")?,
                None => -1,
            };
            let found = if old.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(&*old).count()
            };
            let replaced = if count < 0 { found } else { found.min(count as usize) };
            check_len(text.len() + replaced.saturating_mul(new.len()), "replaced string")?;
            if count < 0 {
                Value::str(&text.replace(&*old, &new))
            } else {
                Value::str(&text.replacen(&*old, &new, count as usize))
            }
        }
        "startswith" | "endswith" => {
            args.check(1, 1)?;
            let candidates = prefixes(args.first())?;
            Value::Bool(candidates.iter().any(|p| {
                if name == "startswith" {
                    text.starts_with(&**p)
                } else {
                    text.ends_with(&**p)
                }
            }))
        }
        "removeprefix" => {
            args.check(1, 1)?;
            let prefix = expect_str(args.first(), "removeprefix() argument")?;
            Value::str(text.strip_prefix(&*prefix).unwrap_or(text))
        }
        "removesuffix" => {
            args.check(1, 1)?;
            let suffix = expect_str(args.first(), "removesuffix() argument")?;
            Value::str(text.strip_suffix(&*suffix).unwrap_or(text))
        }
        "find" | "rfind" | "index" => {
            args.check(1, 1)?;
            let needle = expect_str(args.first(), "must be str")?;
            let found = if name == "rfind" {
                text.rfind(&*needle)
            } else {
                text.find(&*needle)
            };
            match found {
                Some(byte) => Value::Int(char_index(text, byte)),
                None if name == "index" => {
                    return Err(ScriptException::value_error("substring not found"));
                }
                None => Value::Int(-1),
            }
        }
        "count" => {
            args.check(1, 1)?;
            let needle = expect_str(args.first(), "must be str")?;
            let count = if needle.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(&*needle).count()
            };
            Value::Int(count as i64)
        }
        "format" => {
            let keywords = std::mem::take(&mut args.keywords);
            Value::str(&str_format(text, &args.positional, &keywords)?)
        }
        "isdigit" | "isnumeric" => {
            args.check(0, 0)?;
            Value::Bool(!text.is_empty() && text.chars().all(char::is_numeric))
        }
        "isalpha" => {
            args.check(0, 0)?;
            Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic))
        }
        "isalnum" => {
            args.check(0, 0)?;
            Value::Bool(!text.is_empty() && text.chars().all(char::is_alphanumeric))
        }
        "isspace" => {
            args.check(0, 0)?;
            Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace))
        }
        "isupper" => {
            args.check(0, 0)?;
            Value::Bool(
                text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase),
            )
        }
        "islower" => {
            args.check(0, 0)?;
            Value::Bool(
                text.chars().any(char::is_lowercase) && !text.chars().any(char::is_uppercase),
            )
        }
        "center" | "ljust" | "rjust" => {
            args.check(1, 2)?;
            let (width, fill) = pad_arg(args)?;
            let len = text.chars().count();
            if len >= width {
                Value::Str(s.clone())
            } else {
                let total = width - len;
                let (left, right) = match name {
                    "ljust" => (0, total),
                    "rjust" => (total, 0),
                    _ => {
                        // Python puts the extra fill char on the right for odd widths.
                        let left = total / 2 + (total & width & 1);
                        (left, total - left)
                    }
                };
                let fill_str = |n: usize| std::iter::repeat_n(fill, n).collect::<String>();
                Value::str(&format!("{}{text}{}", fill_str(left), fill_str(right)))
            }
        }
        "zfill" => {
            args.check(1, 1)?;
            let width = expect_int(args.first(), "zfill")?.max(0) as usize;
            check_len(width, "padded string")?;
            let len = text.chars().count();
            if len >= width {
                Value::Str(s.clone())
            } else {
                let zeros = "0".repeat(width - len);
                match text.strip_prefix(['-', '+']) {
                    Some(rest) => Value::str(&format!("{}{zeros}{rest}", &text[..1])),
                    None => Value::str(&format!("{zeros}{text}")),
                }
            }
        }
        "partition" | "rpartition" => {
            args.check(1, 1)?;
            let sep = expect_str(args.first(), "partition")?;
            if sep.is_empty() {
                return Err(ScriptException::value_error("empty separator"));
            }
            let split = if name == "partition" {
                text.split_once(&*sep)
            } else {
                text.rsplit_once(&*sep)
            };
            let parts = match split {
                Some((before, after)) => [before, &*sep, after],
                None if name == "partition" => [text, "", ""],
                None => ["", "", text],
            };
            Value::tuple(parts.into_iter().map(Value::str).collect())
        }
        "encode" => {
            args.keyword("encoding");
            args.keyword("errors");
            args.check(0, 2)?;
            Value::Bytes(Rc::from(text.as_bytes()))
        }
        other => {
            return Err(ScriptException::new(
                ExcType::AttributeError,
                format!("'str' object has no attribute '{other}'"),
            ));
        }
    })
}

fn bytes_method(b: &Rc<[u8]>, name: &str, args: &mut Args<'_>) -> BuiltinResult<Value> {
    Ok(match name {
        "decode" => {
            args.keyword("encoding");
            let errors = args
                .keyword("errors")
                .map(|v| v.to_str())
                .unwrap_or_else(|| "strict".to_string());
            args.check(0, 2)?;
            Value::str(&decode_utf8(b, &errors)?)
        }
        "hex" => {
            args.check(0, 0)?;
            Value::str(&b.iter().map(|x| format!("{x:02x}")).collect::<String>())
        }
        "startswith" | "endswith" => {
            args.check(1, 1)?;
            let Value::Bytes(affix) = args.first() else {
                return Err(ScriptException::type_error("a bytes-like object is required"));
            };
            Value::Bool(if name == "startswith" {
                b.starts_with(affix)
            } else {
                b.ends_with(affix)
            })
        }
        other => {
            return Err(ScriptException::new(
                ExcType::AttributeError,
                format!("'bytes' object has no attribute '{other}'"),
            ));
        }
    })
}

fn sequence_method(items: &[Value], name: &str, args: &mut Args<'_>) -> BuiltinResult<Value> {
    args.check(1, 1)?;
    let needle = args.first();
    match name {
        "count" => Ok(Value::Int(items.iter().filter(|v| py_eq(v, needle)).count() as i64)),
        "index" => items
            .iter()
            .position(|v| py_eq(v, needle))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| {
                ScriptException::value_error(format!("{} is not in list", needle.repr()))
            }),
        other => Err(ScriptException::new(
            ExcType::AttributeError,
            format!("object has no attribute '{other}'"),
        )),
    }
}

fn list_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: &mut Args<'_>,
) -> Eval<Value> {
    let Value::List(list) = receiver else {
        return Err(ScriptException::type_error("expected list").into());
    };
    let value = match name {
        "append" => {
            args.check(1, 1)?;
            let mut items = list.borrow_mut();
            check_len(items.len() + 1, "list")?;
            items.push(args.first().clone());
            Value::None
        }
        "extend" => {
            args.check(1, 1)?;
            let extra: Vec<Value> = ops::materialize(args.first())?;
            let mut items = list.borrow_mut();
            check_len(items.len() + extra.len(), "list")?;
            items.extend(extra);
            Value::None
        }
        "insert" => {
            args.check(2, 2)?;
            let index = expect_int(&args.positional[0], "insert")?;
            let mut items = list.borrow_mut();
            check_len(items.len() + 1, "list")?;
            let len = items.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(at as usize, args.positional[1].clone());
            Value::None
        }
        "pop" => {
            args.check(0, 1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(ScriptException::new(ExcType::IndexError, "pop from empty list").into());
            }
            let len = items.len() as i64;
            let index = match args.positional.first() {
                Some(v) => expect_int(v, "pop")?,
                None => -1,
            };
            let actual = if index < 0 { index + len } else { index };
            if actual < 0 || actual >= len {
                return Err(
                    ScriptException::new(ExcType::IndexError, "pop index out of range").into(),
                );
            }
            items.remove(actual as usize)
        }
        "remove" => {
            args.check(1, 1)?;
            let position = list.borrow().iter().position(|v| py_eq(v, args.first()));
            match position {
                Some(i) => {
                    list.borrow_mut().remove(i);
                }
                None => {
                    return Err(
                        ScriptException::value_error("list.remove(x): x not in list").into()
                    );
                }
            }
            Value::None
        }
        "index" | "count" => {
            let snapshot = list.borrow().clone();
            sequence_method(&snapshot, name, args)?
        }
        "reverse" => {
            args.check(0, 0)?;
            list.borrow_mut().reverse();
            Value::None
        }
        "sort" => {
            let key = optional(args.keyword("key"));
            let reverse = args.keyword("reverse").is_some_and(|v| v.truthy());
            args.check(0, 0)?;
            let snapshot = list.borrow().clone();
            let sorted = sort_values(interp, snapshot, key, reverse)?;
            *list.borrow_mut() = sorted;
            Value::None
        }
        "copy" => {
            args.check(0, 0)?;
            Value::list(list.borrow().clone())
        }
        "clear" => {
            args.check(0, 0)?;
            list.borrow_mut().clear();
            Value::None
        }
        other => {
            return Err(ScriptException::new(
                ExcType::AttributeError,
                format!("'list' object has no attribute '{other}'"),
            )
            .into());
        }
    };
    Ok(value)
}

fn dict_method(receiver: &Value, name: &str, args: &mut Args<'_>) -> BuiltinResult<Value> {
    let Value::Dict(dict) = receiver else {
        return Err(ScriptException::type_error("expected dict"));
    };
    Ok(match name {
        "get" => {
            args.check(1, 2)?;
            let key = DictKey::from_value(args.first())?;
            let default = args.positional.get(1).cloned().unwrap_or(Value::None);
            dict.borrow()
                .get(&key)
                .map(|(_, v)| v.clone())
                .unwrap_or(default)
        }
        "keys" => {
            args.check(0, 0)?;
            Value::list(dict.borrow().values().map(|(k, _)| k.clone()).collect())
        }
        "values" => {
            args.check(0, 0)?;
            Value::list(dict.borrow().values().map(|(_, v)| v.clone()).collect())
        }
        "items" => {
            args.check(0, 0)?;
            Value::list(
                dict.borrow()
                    .values()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            )
        }
        "pop" => {
            args.check(1, 2)?;
            let key = DictKey::from_value(args.first())?;
            let removed = dict.borrow_mut().shift_remove(&key);
            match (removed, args.positional.get(1)) {
                (Some((_, v)), _) => v,
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(ScriptException::new(ExcType::KeyError, args.first().repr()));
                }
            }
        }
        "popitem" => {
            args.check(0, 0)?;
            match dict.borrow_mut().pop() {
                Some((_, (k, v))) => Value::tuple(vec![k, v]),
                None => {
                    return Err(ScriptException::new(
                        ExcType::KeyError,
                        "'popitem(): dictionary is empty'",
                    ));
                }
            }
        }
        "setdefault" => {
            args.check(1, 2)?;
            let key = DictKey::from_value(args.first())?;
            let default = args.positional.get(1).cloned().unwrap_or(Value::None);
            let mut map = dict.borrow_mut();
            map.entry(key)
                .or_insert_with(|| (args.positional[0].clone(), default))
                .1
                .clone()
        }
        "update" => {
            args.arity(0, 1)?;
            let mut staged = DictMap::new();
            if let Some(source) = args.positional.first() {
                update_dict(&mut staged, source)?;
            }
            for (key, value) in std::mem::take(&mut args.keywords) {
                dict_insert(&mut staged, Value::str(&key), value)?;
            }
            let mut map = dict.borrow_mut();
            for (_, (k, v)) in staged {
                dict_insert(&mut map, k, v)?;
            }
            Value::None
        }
        "copy" => {
            args.check(0, 0)?;
            Value::dict(dict.borrow().clone())
        }
        "clear" => {
            args.check(0, 0)?;
            dict.borrow_mut().clear();
            Value::None
        }
        other => {
            return Err(ScriptException::new(
                ExcType::AttributeError,
                format!("'dict' object has no attribute '{other}'"),
            ));
        }
    })
}
