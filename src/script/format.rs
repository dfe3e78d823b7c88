//! String formatting: format specs (`f"{x:>8.2f}"`, `format()`), printf-style
//! `%` formatting, and `str.format`.

use super::exception::{ExcType, ScriptException};
use super::value::{DictKey, Value, check_len, format_float};

#[derive(Debug, Default)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

/// Width or precision digits. Values past the size cap raise `MemoryError`;
/// no digits means zero.
fn parse_size(digits: &[char], what: &str) -> Result<usize, ScriptException> {
    if digits.is_empty() {
        return Ok(0);
    }
    let size = digits
        .iter()
        .collect::<String>()
        .parse()
        .unwrap_or(usize::MAX);
    check_len(size, what)?;
    Ok(size)
}

fn parse_spec(spec: &str) -> Result<Spec, ScriptException> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i)
        && matches!(c, '+' | '-' | ' ')
    {
        out.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        out.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        out.width = parse_size(&chars[start..i], "format width")?;
    }
    if let Some(&c) = chars.get(i)
        && (c == ',' || c == '_')
    {
        out.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return Err(ScriptException::value_error("Format specifier missing precision"));
        }
        out.precision = Some(parse_size(&chars[start..i], "format precision")?);
    }
    if let Some(&c) = chars.get(i) {
        out.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid_spec(spec));
    }
    Ok(out)
}

fn invalid_spec(spec: &str) -> ScriptException {
    ScriptException::value_error(format!("Invalid format specifier '{spec}'"))
}

/// Apply a format spec, as `format(value, spec)` does.
pub fn format_value(value: &Value, spec: &str) -> Result<String, ScriptException> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let spec = parse_spec(spec)?;
    let (body, numeric) = match value {
        Value::Int(_) | Value::Bool(_) | Value::Float(_) => (format_number(value, &spec)?, true),
        Value::Str(s) => {
            if spec.kind.is_some_and(|k| k != 's') {
                return Err(unknown_code(spec.kind, "str"));
            }
            let mut text = s.to_string();
            if let Some(p) = spec.precision {
                text = text.chars().take(p).collect();
            }
            (text, false)
        }
        other => {
            if spec.kind.is_some() || spec.precision.is_some() {
                return Err(ScriptException::type_error(format!(
                    "unsupported format string passed to {}.__format__",
                    other.type_name()
                )));
            }
            (other.to_str(), false)
        }
    };
    Ok(pad(body, &spec, numeric))
}

fn unknown_code(kind: Option<char>, type_name: &str) -> ScriptException {
    ScriptException::value_error(format!(
        "Unknown format code '{}' for object of type '{type_name}'",
        kind.unwrap_or(' ')
    ))
}

fn format_number(value: &Value, spec: &Spec) -> Result<String, ScriptException> {
    let (int, float) = match value {
        Value::Int(i) => (Some(*i), *i as f64),
        Value::Bool(b) => (Some(i64::from(*b)), f64::from(u8::from(*b))),
        Value::Float(f) => (None, *f),
        _ => return Err(ScriptException::type_error("expected a number")),
    };
    let kind = spec.kind;
    let negative = match int {
        Some(i) => i < 0,
        None => float.is_sign_negative() && !float.is_nan(),
    };
    let magnitude = match (kind, int) {
        (None | Some('d') | Some('n'), Some(i)) => {
            group(&i.unsigned_abs().to_string(), spec.grouping)
        }
        (Some('x'), Some(i)) => prefixed(format!("{:x}", i.unsigned_abs()), "0x", spec.alternate),
        (Some('X'), Some(i)) => prefixed(format!("{:X}", i.unsigned_abs()), "0X", spec.alternate),
        (Some('o'), Some(i)) => prefixed(format!("{:o}", i.unsigned_abs()), "0o", spec.alternate),
        (Some('b'), Some(i)) => prefixed(format!("{:b}", i.unsigned_abs()), "0b", spec.alternate),
        (Some('c'), Some(i)) => {
            let ch = u32::try_from(i)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| ScriptException::new(ExcType::ValueError, "%c arg not in range"))?;
            return Ok(ch.to_string());
        }
        (Some('d') | Some('x') | Some('X') | Some('o') | Some('b') | Some('c'), None) => {
            return Err(unknown_code(kind, "float"));
        }
        (Some('f') | Some('F'), _) => {
            let p = spec.precision.unwrap_or(6);
            let text = non_finite(float, kind == Some('F'))
                .unwrap_or_else(|| format!("{:.*}", p, float.abs()));
            group_fixed(&text, spec.grouping)
        }
        (Some('e') | Some('E'), _) => {
            let text = non_finite(float, kind == Some('E'))
                .unwrap_or_else(|| exp_format(float.abs(), spec.precision.unwrap_or(6)));
            if kind == Some('E') {
                text.to_uppercase()
            } else {
                text
            }
        }
        (Some('g') | Some('G'), _) => {
            let text = general(float.abs(), spec.precision, true, spec.alternate);
            if kind == Some('G') {
                text.to_uppercase()
            } else {
                text
            }
        }
        (Some('%'), _) => {
            let p = spec.precision.unwrap_or(6);
            let text = non_finite(float * 100.0, false)
                .unwrap_or_else(|| format!("{:.*}", p, (float * 100.0).abs()));
            format!("{}%", group_fixed(&text, spec.grouping))
        }
        (None, _) => match spec.precision {
            Some(p) => general(float.abs(), Some(p), false, spec.alternate),
            None => {
                let text = format_float(float.abs());
                group_fixed(&text, spec.grouping)
            }
        },
        (Some(other), _) => {
            return Err(unknown_code(Some(other), value.type_name()));
        }
    };
    let sign = if negative {
        "-"
    } else {
        match spec.sign {
            Some('+') => "+",
            Some(' ') => " ",
            _ => "",
        }
    };
    Ok(format!("{sign}{magnitude}"))
}

fn non_finite(value: f64, upper: bool) -> Option<String> {
    let text = if value.is_nan() {
        "nan"
    } else if value.is_infinite() {
        "inf"
    } else {
        return None;
    };
    Some(if upper {
        text.to_uppercase()
    } else {
        text.to_string()
    })
}

fn prefixed(digits: String, prefix: &str, alternate: bool) -> String {
    if alternate {
        format!("{prefix}{digits}")
    } else {
        digits
    }
}

/// Python-style exponent notation: `1.50e+03`.
fn exp_format(value: f64, precision: usize) -> String {
    let text = format!("{:.*e}", precision, value);
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => text,
    }
}

/// `g` formatting. `strip` mirrors the explicit `g` type; an omitted type keeps
/// at least one fractional digit.
fn general(value: f64, precision: Option<usize>, strip: bool, alternate: bool) -> String {
    if let Some(text) = non_finite(value, false) {
        return text;
    }
    let p = precision.unwrap_or(6).max(1);
    if value == 0.0 {
        return if strip { "0".to_string() } else { "0.0".to_string() };
    }
    let sci = format!("{:.*e}", p - 1, value);
    let exp: i32 = sci
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    if exp >= -4 && (exp as i64) < p as i64 {
        let decimals = (p as i64 - 1 - exp as i64).max(0) as usize;
        let mut text = format!("{:.*}", decimals, value);
        if !alternate && text.contains('.') {
            text = text.trim_end_matches('0').trim_end_matches('.').to_string();
        }
        if !strip && !text.contains('.') {
            text.push_str(".0");
        }
        text
    } else {
        let mut text = exp_format(value, p - 1);
        if !alternate && let Some((mantissa, exp)) = text.split_once('e') {
            let mantissa = if mantissa.contains('.') {
                mantissa.trim_end_matches('0').trim_end_matches('.')
            } else {
                mantissa
            };
            text = format!("{mantissa}e{exp}");
        }
        text
    }
}

fn group(digits: &str, sep: Option<char>) -> String {
    let Some(sep) = sep else {
        return digits.to_string();
    };
    let mut out = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(ch);
    }
    out
}

fn group_fixed(text: &str, sep: Option<char>) -> String {
    match text.split_once('.') {
        Some((int, frac)) => format!("{}.{frac}", group(int, sep)),
        None => group(text, sep),
    }
}

fn pad(body: String, spec: &Spec, numeric: bool) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body;
    }
    let (fill, align) = if spec.zero && spec.align.is_none() && numeric {
        ('0', '=')
    } else {
        (
            spec.fill.unwrap_or(' '),
            spec.align.unwrap_or(if numeric { '>' } else { '<' }),
        )
    };
    let padding = spec.width - len;
    let fill_str = |n: usize| std::iter::repeat_n(fill, n).collect::<String>();
    match align {
        '<' => format!("{body}{}", fill_str(padding)),
        '^' => format!(
            "{}{body}{}",
            fill_str(padding / 2),
            fill_str(padding - padding / 2)
        ),
        '=' => {
            let split = body
                .char_indices()
                .find(|(_, c)| !matches!(c, '+' | '-' | ' '))
                .map_or(0, |(i, _)| i);
            let (sign, digits) = body.split_at(split);
            format!("{sign}{}{digits}", fill_str(padding))
        }
        _ => format!("{}{body}", fill_str(padding)),
    }
}

/// printf-style `template % args`.
pub fn percent_format(template: &str, args: &Value) -> Result<String, ScriptException> {
    let positional: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mapping = match args {
        Value::Dict(_) => Some(args.clone()),
        _ => None,
    };
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut next = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        i += 1;
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let mut key: Option<String> = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..]
                .iter()
                .position(|&c| c == ')')
                .ok_or_else(|| ScriptException::value_error("incomplete format key"))?;
            key = Some(chars[i + 1..i + close].iter().collect());
            i += close + 1;
        }
        let mut spec = Spec::default();
        while let Some(&flag) = chars.get(i) {
            match flag {
                '-' => spec.align = Some('<'),
                '0' => spec.zero = true,
                '+' => spec.sign = Some('+'),
                ' ' => spec.sign = spec.sign.or(Some(' ')),
                '#' => spec.alternate = true,
                _ => break,
            }
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i > start {
            spec.width = parse_size(&chars[start..i], "format width")?;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            spec.precision = Some(parse_size(&chars[start..i], "format precision")?);
        }
        let Some(&conv) = chars.get(i) else {
            return Err(ScriptException::value_error("incomplete format"));
        };
        i += 1;
        if conv == '%' {
            out.push('%');
            continue;
        }
        let arg = match (&key, &mapping) {
            (Some(k), Some(Value::Dict(map))) => {
                let hashed = DictKey::Str(k.as_str().into());
                map.borrow()
                    .get(&hashed)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| ScriptException::new(ExcType::KeyError, format!("'{k}'")))?
            }
            (Some(_), _) => {
                return Err(ScriptException::type_error("format requires a mapping"));
            }
            (None, _) => {
                let arg = positional.get(next).cloned().ok_or_else(|| {
                    ScriptException::type_error("not enough arguments for format string")
                })?;
                next += 1;
                arg
            }
        };
        if spec.zero && spec.align.is_some() {
            spec.zero = false;
        }
        if !spec.zero && spec.align.is_none() {
            spec.align = Some('>');
        }
        let numeric = !matches!(conv, 's' | 'r' | 'a');
        let body = match conv {
            's' => truncate(arg.to_str(), spec.precision),
            'r' | 'a' => truncate(arg.repr(), spec.precision),
            'd' | 'i' | 'u' => {
                let int = match &arg {
                    Value::Float(f) => Value::Int(f.trunc() as i64),
                    Value::Int(_) | Value::Bool(_) => arg.clone(),
                    other => {
                        return Err(ScriptException::type_error(format!(
                            "%{conv} format: a real number is required, not {}",
                            other.type_name()
                        )));
                    }
                };
                let spec = Spec {
                    kind: Some('d'),
                    precision: None,
                    ..clone_flags(&spec)
                };
                format_number(&int, &spec)?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' | 'c' => {
                if !matches!(arg, Value::Int(_) | Value::Float(_) | Value::Bool(_)) {
                    return Err(ScriptException::type_error(format!(
                        "must be real number, not {}",
                        arg.type_name()
                    )));
                }
                let spec = Spec {
                    kind: Some(conv),
                    precision: spec.precision,
                    ..clone_flags(&spec)
                };
                format_number(&arg, &spec)?
            }
            other => {
                return Err(ScriptException::value_error(format!(
                    "unsupported format character '{other}'"
                )));
            }
        };
        out.push_str(&pad(body, &spec, numeric));
    }
    if mapping.is_none() && next < positional.len() && !matches!(args, Value::Dict(_)) {
        return Err(ScriptException::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

fn clone_flags(spec: &Spec) -> Spec {
    Spec {
        sign: spec.sign,
        alternate: spec.alternate,
        ..Spec::default()
    }
}

fn truncate(text: String, precision: Option<usize>) -> String {
    match precision {
        Some(p) => text.chars().take(p).collect(),
        None => text,
    }
}

/// `str.format(*args, **kwargs)`.
pub fn str_format(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Result<String, ScriptException> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut auto_index = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '{' {
            if chars.get(i + 1) == Some(&'{') {
                out.push('{');
                i += 2;
                continue;
            }
            let close = chars[i..]
                .iter()
                .position(|&c| c == '}')
                .ok_or_else(|| ScriptException::value_error("expected '}' before end of string"))?;
            let field: String = chars[i + 1..i + close].iter().collect();
            i += close + 1;

            let (name_part, spec) = match field.split_once(':') {
                Some((n, s)) => (n.to_string(), s.to_string()),
                None => (field.clone(), String::new()),
            };
            let (name, conversion) = match name_part.split_once('!') {
                Some((n, c)) => (n.to_string(), c.chars().next()),
                None => (name_part, None),
            };
            let value = if name.is_empty() {
                let v = args.get(auto_index).cloned().ok_or_else(|| {
                    ScriptException::new(
                        ExcType::IndexError,
                        format!(
                            "Replacement index {auto_index} out of range \
                             for positional args tuple"
                        ),
                    )
                })?;
                auto_index += 1;
                v
            } else if let Ok(index) = name.parse::<usize>() {
                args.get(index).cloned().ok_or_else(|| {
                    ScriptException::new(
                        ExcType::IndexError,
                        format!("Replacement index {index} out of range for positional args tuple"),
                    )
                })?
            } else {
                kwargs
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| ScriptException::new(ExcType::KeyError, format!("'{name}'")))?
            };
            let value = match conversion {
                Some('r') => Value::str(&value.repr()),
                Some('s') => Value::str(&value.to_str()),
                _ => value,
            };
            out.push_str(&format_value(&value, &spec)?);
            continue;
        }
        if ch == '}' {
            if chars.get(i + 1) == Some(&'}') {
                out.push('}');
                i += 2;
                continue;
            }
            return Err(ScriptException::value_error(
                "Single '}' encountered in format string",
            ));
        }
        out.push(ch);
        i += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_numeric_specs() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(42), "05d").unwrap(), "00042");
        assert_eq!(format_value(&Value::Int(-42), "05d").unwrap(), "-0042");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::Float(0.256), ".1%").unwrap(), "25.6%");
        assert_eq!(format_value(&Value::Int(255), "#x").unwrap(), "0xff");
        assert_eq!(format_value(&Value::Float(1234.5), ".2e").unwrap(), "1.23e+03");
    }

    #[test]
    fn applies_alignment() {
        assert_eq!(format_value(&Value::str("ab"), ">5").unwrap(), "   ab");
        assert_eq!(format_value(&Value::str("ab"), "*^6").unwrap(), "**ab**");
        assert_eq!(format_value(&Value::Int(7), "<3").unwrap(), "7  ");
    }

    #[test]
    fn percent_formatting() {
        let args = Value::tuple(vec![Value::str("x"), Value::Int(3), Value::Float(2.5)]);
        assert_eq!(
            percent_format("%s=%d (%.2f) 100%%", &args).unwrap(),
            "x=3 (2.50) 100%"
        );
        assert_eq!(percent_format("%5s|", &Value::str("a")).unwrap(), "    a|");
        assert!(percent_format("%s %s", &Value::str("a")).is_err());
    }

    #[test]
    fn str_format_fields() {
        let args = [Value::str("a"), Value::Int(2)];
        let kwargs = [("name".to_string(), Value::str("bob"))];
        assert_eq!(
            str_format("{} {} {name!r} {1:>3} {{x}}", &args, &kwargs).unwrap(),
            "a 2 'bob'   2 {x}"
        );
    }

    #[test]
    fn general_format_strips_zeros() {
        assert_eq!(format_value(&Value::Float(2.50), "g").unwrap(), "2.5");
        assert_eq!(format_value(&Value::Float(1e-7), "g").unwrap(), "1e-07");
        assert_eq!(format_value(&Value::Float(3.14159), ".3").unwrap(), "3.14");
    }

    #[test]
    fn oversized_widths_raise_instead_of_allocating() {
        let err = format_value(&Value::Int(1), ">99999999999").unwrap_err();
        assert_eq!(err.exc_type, ExcType::MemoryError);
        let err = format_value(&Value::Float(1.0), ".99999999999999999999999f").unwrap_err();
        assert_eq!(err.exc_type, ExcType::MemoryError);
        let err = percent_format("%5000000000d", &Value::Int(1)).unwrap_err();
        assert_eq!(err.exc_type, ExcType::MemoryError);
        assert_eq!(percent_format("%.f", &Value::Float(2.25)).unwrap(), "2");
    }
}
