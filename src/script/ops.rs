//! Operators, indexing and iteration over interpreter values.

use std::rc::Rc;

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::exception::{ExcType, ScriptException};
use super::format::percent_format;
use super::value::{
    Comparison, DictKey, Number, Value, as_number, check_len, dict_insert, py_compare, py_eq,
    range_len, wide_range_len,
};

type OpResult<T> = Result<T, ScriptException>;

fn unsupported(op: &str, l: &Value, r: &Value) -> ScriptException {
    ScriptException::type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        l.type_name(),
        r.type_name()
    ))
}

fn overflow() -> ScriptException {
    ScriptException::new(ExcType::OverflowError, "integer overflow")
}

fn zero_division(message: &str) -> ScriptException {
    ScriptException::new(ExcType::ZeroDivisionError, message)
}

/// Binary arithmetic.
pub fn binary(op: BinOp, l: &Value, r: &Value) -> OpResult<Value> {
    if let (Some(a), Some(b)) = (as_number(l), as_number(r)) {
        return numeric(op, a, b);
    }
    let symbol = op.symbol();
    match (op, l, r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            check_len(a.len() + b.len(), "string")?;
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::Str(Rc::from(s)))
        }
        (BinOp::Add, Value::Bytes(a), Value::Bytes(b)) => {
            check_len(a.len() + b.len(), "bytes")?;
            Ok(Value::Bytes(a.iter().chain(b.iter()).copied().collect()))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            check_len(a.borrow().len() + b.borrow().len(), "list")?;
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            check_len(a.len() + b.len(), "tuple")?;
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Add, Value::Str(_), other) => Err(ScriptException::type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            other.type_name()
        ))),
        (BinOp::Add, Value::List(_), other) => Err(ScriptException::type_error(format!(
            "can only concatenate list (not \"{}\") to list",
            other.type_name()
        ))),
        (BinOp::Mul, seq, count) | (BinOp::Mul, count, seq)
            if matches!(count, Value::Int(_) | Value::Bool(_))
                && matches!(
                    seq,
                    Value::Str(_) | Value::List(_) | Value::Tuple(_) | Value::Bytes(_)
                ) =>
        {
            let n = match as_number(count) {
                Some(Number::Int(n)) => usize::try_from(n).unwrap_or(0),
                _ => 0,
            };
            repeat(seq, n)
        }
        (BinOp::Mod, Value::Str(template), args) => {
            Ok(Value::str(&percent_format(template, args)?))
        }
        _ => Err(unsupported(symbol, l, r)),
    }
}

fn repeat(seq: &Value, n: usize) -> OpResult<Value> {
    let len = match seq {
        Value::Str(s) => s.len(),
        Value::Bytes(b) => b.len(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        _ => 0,
    };
    check_len(len.saturating_mul(n), "repeated sequence")?;
    Ok(match seq {
        Value::Str(s) => Value::str(&s.repeat(n)),
        Value::Bytes(b) => Value::Bytes(b.repeat(n).into()),
        Value::List(items) => {
            let items = items.borrow();
            Value::list((0..n).flat_map(|_| items.iter().cloned()).collect())
        }
        Value::Tuple(items) => Value::tuple((0..n).flat_map(|_| items.iter().cloned()).collect()),
        other => {
            return Err(ScriptException::type_error(format!(
                "can't multiply sequence of type '{}'",
                other.type_name()
            )));
        }
    })
}

fn numeric(op: BinOp, a: Number, b: Number) -> OpResult<Value> {
    if let (Number::Int(x), Number::Int(y)) = (a, b) {
        return int_op(op, x, y);
    }
    let (x, y) = (a.as_f64(), b.as_f64());
    Ok(Value::Float(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            x.powf(y)
        }
    }))
}

fn int_op(op: BinOp, x: i64, y: i64) -> OpResult<Value> {
    Ok(match op {
        BinOp::Add => Value::Int(x.checked_add(y).ok_or_else(overflow)?),
        BinOp::Sub => Value::Int(x.checked_sub(y).ok_or_else(overflow)?),
        BinOp::Mul => Value::Int(x.checked_mul(y).ok_or_else(overflow)?),
        BinOp::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            Value::Float(x as f64 / y as f64)
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) {
                Value::Int(q - 1)
            } else {
                Value::Int(q)
            }
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let r = x.checked_rem(y).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (y < 0)) {
                Value::Int(r + y)
            } else {
                Value::Int(r)
            }
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(zero_division("0.0 cannot be raised to a negative power"));
                }
                Value::Float((x as f64).powf(y as f64))
            } else {
                let exp = u32::try_from(y).map_err(|_| overflow())?;
                Value::Int(x.checked_pow(exp).ok_or_else(overflow)?)
            }
        }
    })
}

/// Augmented assignment. Lists extend in place; everything else rebinds.
pub fn inplace(op: BinOp, l: &Value, r: &Value) -> OpResult<Value> {
    if let (BinOp::Add, Value::List(items)) = (op, l) {
        let extra = materialize(r)?;
        let mut items = items.borrow_mut();
        check_len(items.len() + extra.len(), "list")?;
        items.extend(extra);
        return Ok(l.clone());
    }
    binary(op, l, r)
}

/// Unary operators.
pub fn unary(op: UnaryOp, v: &Value) -> OpResult<Value> {
    match (op, as_number(v)) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Some(Number::Int(i))) => {
            Ok(Value::Int(i.checked_neg().ok_or_else(overflow)?))
        }
        (UnaryOp::Neg, Some(Number::Float(f))) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Some(Number::Int(i))) => Ok(Value::Int(i)),
        (UnaryOp::Pos, Some(Number::Float(f))) => Ok(Value::Float(f)),
        (op, None) => Err(ScriptException::type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            v.type_name()
        ))),
    }
}

/// One comparison of a chain.
pub fn compare(op: CmpOp, l: &Value, r: &Value) -> OpResult<bool> {
    let ordered = |expected: &dyn Fn(std::cmp::Ordering) -> bool| match py_compare(l, r) {
        Comparison::Ordered(ord) => Ok(expected(ord)),
        Comparison::Unordered => Ok(false),
        Comparison::Unsupported => Err(ScriptException::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            l.type_name(),
            r.type_name()
        ))),
    };
    match op {
        CmpOp::Eq => Ok(py_eq(l, r)),
        CmpOp::NotEq => Ok(!py_eq(l, r)),
        CmpOp::Lt => ordered(&|o| o.is_lt()),
        CmpOp::LtE => ordered(&|o| o.is_le()),
        CmpOp::Gt => ordered(&|o| o.is_gt()),
        CmpOp::GtE => ordered(&|o| o.is_ge()),
        CmpOp::In => contains(r, l),
        CmpOp::NotIn => contains(r, l).map(|found| !found),
        CmpOp::Is => Ok(identical(l, r)),
        CmpOp::IsNot => Ok(!identical(l, r)),
    }
}

fn identical(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::ExcClass(a), Value::ExcClass(b)) => a == b,
        _ => false,
    }
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> OpResult<bool> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(ScriptException::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Bytes(haystack) => match item {
            Value::Bytes(needle) => Ok(needle.is_empty()
                || haystack.windows(needle.len()).any(|w| w == &needle[..])),
            Value::Int(b) => Ok(haystack.iter().any(|x| i64::from(*x) == *b)),
            other => Err(ScriptException::type_error(format!(
                "a bytes-like object is required, not '{}'",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| py_eq(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| py_eq(v, item))),
        Value::Dict(map) => {
            let key = DictKey::from_value(item)?;
            Ok(map.borrow().contains_key(&key))
        }
        Value::Range { start, stop, step } => match as_number(item) {
            Some(Number::Int(i)) => {
                let in_bounds = if *step > 0 {
                    i >= *start && i < *stop
                } else {
                    i <= *start && i > *stop
                };
                Ok(in_bounds && (i128::from(i) - i128::from(*start)) % i128::from(*step) == 0)
            }
            _ => Ok(false),
        },
        other => Err(ScriptException::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: &Value, len: usize, kind: &str) -> OpResult<usize> {
    let i = match as_number(index) {
        Some(Number::Int(i)) => i,
        _ => {
            return Err(ScriptException::type_error(format!(
                "{kind} indices must be integers or slices, not {}",
                index.type_name()
            )));
        }
    };
    let len_i = len as i64;
    let actual = if i < 0 { i + len_i } else { i };
    if actual < 0 || actual >= len_i {
        return Err(ScriptException::new(
            ExcType::IndexError,
            format!("{kind} index out of range"),
        ));
    }
    Ok(actual as usize)
}

/// `container[index]`.
pub fn get_item(container: &Value, index: &Value) -> OpResult<Value> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let i = normalize_index(index, items.len(), "list")?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => {
            let i = normalize_index(index, items.len(), "tuple")?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(index, chars.len(), "string")?;
            Ok(Value::str(&chars[i].to_string()))
        }
        Value::Bytes(b) => {
            let i = normalize_index(index, b.len(), "index")?;
            Ok(Value::Int(i64::from(b[i])))
        }
        Value::Range { start, step, .. } => {
            let len = usize::try_from(range_len(container)?).unwrap_or(0);
            let i = normalize_index(index, len, "range object")?;
            let item = i128::from(*start) + i128::from(*step) * i as i128;
            // Items of a range lie between its bounds.
            Ok(Value::Int(i64::try_from(item).map_err(|_| overflow())?))
        }
        Value::Dict(map) => {
            let key = DictKey::from_value(index)?;
            map.borrow()
                .get(&key)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| ScriptException::new(ExcType::KeyError, index.repr()))
        }
        other => Err(ScriptException::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `container[index] = value`.
pub fn set_item(container: &Value, index: &Value, value: Value) -> OpResult<()> {
    match container {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = normalize_index(index, items.len(), "list assignment")?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(map) => dict_insert(&mut map.borrow_mut(), index.clone(), value),
        other => Err(ScriptException::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// Indices selected by a slice over a sequence of `len` items.
pub fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> OpResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(ScriptException::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |v: i64, low: i64, high: i64| v.max(low).min(high);
    let resolve = |v: i64| if v < 0 { v + len } else { v };
    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |v| clamp(resolve(v), 0, len));
        let stop = upper.map_or(len, |v| clamp(resolve(v), 0, len));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            let Some(next) = i.checked_add(step) else { break };
            i = next;
        }
    } else {
        let start = lower.map_or(len - 1, |v| clamp(resolve(v), -1, len - 1));
        let stop = upper.map_or(-1, |v| clamp(resolve(v), -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            let Some(next) = i.checked_add(step) else { break };
            i = next;
        }
    }
    Ok(out)
}

/// `container[lower:upper:step]`.
pub fn get_slice(
    container: &Value,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> OpResult<Value> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let idx = slice_indices(items.len(), lower, upper, step)?;
            Ok(Value::list(idx.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let idx = slice_indices(items.len(), lower, upper, step)?;
            Ok(Value::tuple(idx.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = slice_indices(chars.len(), lower, upper, step)?;
            Ok(Value::str(&idx.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        Value::Bytes(b) => {
            let idx = slice_indices(b.len(), lower, upper, step)?;
            Ok(Value::Bytes(idx.into_iter().map(|i| b[i]).collect()))
        }
        other => Err(ScriptException::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Iterator over a value's items. Ranges are produced lazily.
pub enum ValueIter {
    Range { next: i64, stop: i64, step: i64 },
    Items(std::vec::IntoIter<Value>),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Range { next, stop, step } => {
                let done = if *step > 0 { *next >= *stop } else { *next <= *stop };
                if done {
                    return None;
                }
                let current = *next;
                *next = next.saturating_add(*step);
                Some(Value::Int(current))
            }
            ValueIter::Items(items) => items.next(),
        }
    }
}

/// Collect every item of an iterable. Ranges longer than the size cap raise
/// `MemoryError` instead of being expanded.
pub fn materialize(value: &Value) -> OpResult<Vec<Value>> {
    if let Value::Range { start, stop, step } = value {
        let len = usize::try_from(wide_range_len(*start, *stop, *step)).unwrap_or(usize::MAX);
        check_len(len, "range expansion")?;
    }
    Ok(iterate(value)?.collect())
}

/// Start iterating a value. Lists are snapshotted.
pub fn iterate(value: &Value) -> OpResult<ValueIter> {
    let items: Vec<Value> = match value {
        Value::Range { start, stop, step } => {
            return Ok(ValueIter::Range {
                next: *start,
                stop: *stop,
                step: *step,
            });
        }
        Value::List(items) => items.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        Value::Str(s) => s.chars().map(|c| Value::str(&c.to_string())).collect(),
        Value::Bytes(b) => b.iter().map(|x| Value::Int(i64::from(*x))).collect(),
        Value::Dict(map) => map.borrow().values().map(|(k, _)| k.clone()).collect(),
        other => {
            return Err(ScriptException::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )));
        }
    };
    Ok(ValueIter::Items(items.into_iter()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_and_modulo_follow_python_signs() {
        assert!(matches!(
            binary(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)),
            Ok(Value::Int(-4))
        ));
        assert!(matches!(binary(BinOp::Mod, &Value::Int(-7), &Value::Int(2)), Ok(Value::Int(1))));
        assert!(matches!(binary(BinOp::Mod, &Value::Int(7), &Value::Int(-2)), Ok(Value::Int(-1))));
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.exc_type, ExcType::ZeroDivisionError);
    }

    #[test]
    fn true_division_yields_float() {
        assert!(matches!(
            binary(BinOp::Div, &Value::Int(7), &Value::Int(2)),
            Ok(Value::Float(f)) if f == 3.5
        ));
        assert!(matches!(
            binary(BinOp::Pow, &Value::Int(2), &Value::Int(-1)),
            Ok(Value::Float(f)) if f == 0.5
        ));
    }

    #[test]
    fn overflow_is_reported() {
        let err = binary(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2)).unwrap_err();
        assert_eq!(err.exc_type, ExcType::OverflowError);
    }

    #[test]
    fn mixed_comparison_is_type_error() {
        let err = compare(CmpOp::Lt, &Value::Int(1), &Value::str("a")).unwrap_err();
        assert_eq!(
            err.message,
            "'<' not supported between instances of 'int' and 'str'"
        );
    }

    #[test]
    fn slices_match_python() {
        assert_eq!(slice_indices(5, None, None, Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, Some(1), Some(-1), None).unwrap(), vec![1, 2, 3]);
        assert_eq!(slice_indices(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert!(slice_indices(5, Some(10), None, None).unwrap().is_empty());
    }

    #[test]
    fn negative_indexing_and_errors() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(get_item(&list, &Value::Int(-1)), Ok(Value::Int(2))));
        let err = get_item(&list, &Value::Int(5)).unwrap_err();
        assert_eq!(err.exc_type, ExcType::IndexError);
        let dict = Value::dict_from_pairs([(Value::str("a"), Value::Int(1))]).unwrap();
        let err = get_item(&dict, &Value::str("b")).unwrap_err();
        assert_eq!(err.summary(), "KeyError: 'b'");
    }

    #[test]
    fn ranges_iterate_lazily() {
        let items: Vec<i64> = iterate(&Value::Range { start: 10, stop: 0, step: -3 })
            .unwrap()
            .map(|v| match v {
                Value::Int(i) => i,
                _ => panic!("expected int"),
            })
            .collect();
        assert_eq!(items, vec![10, 7, 4, 1]);
    }

    #[test]
    fn huge_ranges_are_not_expanded() {
        let huge = Value::Range { start: 0, stop: 100_000_000_000, step: 1 };
        let err = materialize(&huge).unwrap_err();
        assert_eq!(err.exc_type, ExcType::MemoryError);
        assert_eq!(materialize(&Value::Range { start: 0, stop: 3, step: 1 }).unwrap().len(), 3);
    }

    #[test]
    fn extreme_ranges_index_and_contain() {
        let full = Value::Range { start: i64::MIN, stop: i64::MAX, step: 1 };
        assert_eq!(range_len(&full).unwrap_err().exc_type, ExcType::OverflowError);
        let wide = Value::Range { start: i64::MIN, stop: i64::MAX, step: i64::MAX };
        assert!(matches!(get_item(&wide, &Value::Int(-1)), Ok(Value::Int(i)) if i == i64::MAX - 1));
        assert!(contains(&wide, &Value::Int(-1)).unwrap());
        assert!(!contains(&wide, &Value::Int(0)).unwrap());
    }

    #[test]
    fn concatenation_and_repetition_respect_the_size_cap() {
        let err = binary(BinOp::Mul, &Value::str("ab"), &Value::Int(1_000_000_000)).unwrap_err();
        assert_eq!(err.exc_type, ExcType::MemoryError);
        let big = Value::str(&"x".repeat(6_000_000));
        let err = binary(BinOp::Add, &big, &big).unwrap_err();
        assert_eq!(err.exc_type, ExcType::MemoryError);
    }

    #[test]
    fn slices_with_huge_steps_stop_cleanly() {
        assert_eq!(slice_indices(3, Some(1), None, Some(i64::MAX)).unwrap(), vec![1]);
        assert_eq!(slice_indices(3, None, None, Some(i64::MIN)).unwrap(), vec![2]);
    }
}
