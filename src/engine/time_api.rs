//! Time, duration and timezone functions.
//!
//! A time value crossing into a script is a dict carrying the instant as
//! `unix_nano`, the IANA `timezone` it is displayed in, and its calendar
//! components in that zone. Every function taking a time also accepts an
//! RFC 3339 string. Durations are plain floats in seconds.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::{
    DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, Offset, SecondsFormat,
    TimeDelta, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;

use super::registry::{CallArgs, HostFunction, HostResult};
use crate::context::{Clock, ExecutionContext};
use crate::script::{ExcType, Object, ScriptException};

const NANOS_PER_SECOND: f64 = 1e9;

/// Duration constants, in seconds.
pub fn constants() -> Vec<(&'static str, Object)> {
    vec![
        ("NANOSECOND", Object::Float(1e-9)),
        ("MICROSECOND", Object::Float(1e-6)),
        ("MILLISECOND", Object::Float(1e-3)),
        ("SECOND", Object::Float(1.0)),
        ("MINUTE", Object::Float(60.0)),
        ("HOUR", Object::Float(3600.0)),
        ("DAY", Object::Float(86_400.0)),
        ("WEEK", Object::Float(604_800.0)),
    ]
}

#[derive(Clone)]
struct Env {
    clock: Arc<dyn Clock>,
    default_tz: Tz,
}

type TimeFn = fn(&Env, &CallArgs) -> HostResult;

/// The time API bound to the clock and default timezone of `context`.
pub fn functions(context: &ExecutionContext) -> Vec<(&'static str, HostFunction)> {
    let env = Env {
        clock: context.clock.clone(),
        default_tz: context.tz(),
    };
    let table: [(&'static str, TimeFn); 31] = [
        ("time_now", time_now),
        ("time_now_utc", time_now_utc),
        ("time_create", time_create),
        ("time_from_timestamp", time_from_timestamp),
        ("time_parse", time_parse),
        ("time_format", time_format),
        ("time_in_location", time_in_location),
        ("time_add", time_add),
        ("time_add_duration", time_add_duration),
        ("time_sub", time_sub),
        ("time_truncate", time_truncate),
        ("time_year", |env, call| component(env, call, |t| i64::from(t.year()))),
        ("time_month", |env, call| component(env, call, |t| i64::from(t.month()))),
        ("time_day", |env, call| component(env, call, |t| i64::from(t.day()))),
        ("time_hour", |env, call| component(env, call, |t| i64::from(t.hour()))),
        ("time_minute", |env, call| component(env, call, |t| i64::from(t.minute()))),
        ("time_second", |env, call| component(env, call, |t| i64::from(t.second()))),
        ("time_weekday", |env, call| {
            component(env, call, |t| i64::from(t.weekday().num_days_from_monday()))
        }),
        ("time_unix", |env, call| component(env, call, |t| t.timestamp())),
        ("time_unix_nano", time_unix_nano),
        ("time_before", |env, call| compare(env, call).map(|o| Object::Bool(o.is_lt()))),
        ("time_after", |env, call| compare(env, call).map(|o| Object::Bool(o.is_gt()))),
        ("time_equal", |env, call| compare(env, call).map(|o| Object::Bool(o.is_eq()))),
        ("time_compare", |env, call| {
            compare(env, call).map(|o| Object::Int(o as i64))
        }),
        ("duration_parse", |_, call| {
            parse_duration(call.str(0, "duration")?).map(Object::Float)
        }),
        ("duration_format", |_, call| {
            let seconds = required_float(call, 0, "seconds")?;
            Ok(Object::Str(format_duration(seconds)))
        }),
        ("timezone_is_valid", |_, call| {
            Ok(Object::Bool(call.str(0, "timezone")?.parse::<Tz>().is_ok()))
        }),
        ("timezone_offset", timezone_offset),
        ("is_weekend", |env, call| {
            let t = time_arg(env, call, 0, "t")?;
            Ok(Object::Bool(t.weekday().num_days_from_monday() >= 5))
        }),
        ("is_weekday", |env, call| {
            let t = time_arg(env, call, 0, "t")?;
            Ok(Object::Bool(t.weekday().num_days_from_monday() < 5))
        }),
        ("is_between", is_between),
    ];
    table
        .into_iter()
        .map(|(name, f)| {
            let env = env.clone();
            (name, HostFunction::sync(move |call| f(&env, &call)))
        })
        .collect()
}

fn value_error(message: impl Into<String>) -> ScriptException {
    ScriptException::value_error(message)
}

fn parse_tz(name: &str) -> Result<Tz, ScriptException> {
    name.parse::<Tz>()
        .map_err(|_| value_error(format!("unknown timezone: {name}")))
}

fn tz_arg(env: &Env, call: &CallArgs, index: usize, name: &str) -> Result<Tz, ScriptException> {
    match call.opt_str(index, name)? {
        Some(zone) => parse_tz(zone),
        None => Ok(env.default_tz),
    }
}

fn required_float(call: &CallArgs, index: usize, name: &str) -> Result<f64, ScriptException> {
    call.opt_float(index, name)?.ok_or_else(|| {
        ScriptException::type_error(format!(
            "{}() missing required argument '{name}'",
            call.function
        ))
    })
}

fn from_unix_nanos(nanos: i64, tz: Tz) -> DateTime<Tz> {
    DateTime::from_timestamp_nanos(nanos).with_timezone(&tz)
}

fn seconds_to_delta(seconds: f64) -> Result<TimeDelta, ScriptException> {
    let nanos = (seconds * NANOS_PER_SECOND).round();
    if !nanos.is_finite() || nanos.abs() >= i64::MAX as f64 {
        return Err(ScriptException::new(
            ExcType::OverflowError,
            "duration out of range",
        ));
    }
    Ok(TimeDelta::nanoseconds(nanos as i64))
}

/// A script value as a zoned instant.
fn to_datetime(env: &Env, value: &Object) -> Result<DateTime<Tz>, ScriptException> {
    match value {
        Object::Dict(_) => {
            let nanos = value
                .get("unix_nano")
                .and_then(Object::as_int)
                .ok_or_else(|| value_error("time value is missing 'unix_nano'"))?;
            let tz = match value.get("timezone").and_then(Object::as_str) {
                Some(zone) => parse_tz(zone)?,
                None => env.default_tz,
            };
            Ok(from_unix_nanos(nanos, tz))
        }
        Object::Str(text) => DateTime::parse_from_rfc3339(text)
            .map(|t| t.with_timezone(&env.default_tz))
            .map_err(|e| value_error(format!("invalid RFC 3339 time '{text}': {e}"))),
        other => Err(ScriptException::type_error(format!(
            "expected a time value, not {}",
            other.type_name()
        ))),
    }
}

fn time_arg(
    env: &Env,
    call: &CallArgs,
    index: usize,
    name: &str,
) -> Result<DateTime<Tz>, ScriptException> {
    to_datetime(env, call.required(index, name)?)
}

/// A zoned instant as the dict scripts see.
fn to_object(t: &DateTime<Tz>) -> HostResult {
    let unix_nano = t.timestamp_nanos_opt().ok_or_else(|| {
        ScriptException::new(ExcType::OverflowError, "time out of representable range")
    })?;
    Ok(Object::dict([
        ("unix_nano", Object::Int(unix_nano)),
        ("timezone", Object::from(t.timezone().name())),
        ("year", Object::Int(i64::from(t.year()))),
        ("month", Object::Int(i64::from(t.month()))),
        ("day", Object::Int(i64::from(t.day()))),
        ("hour", Object::Int(i64::from(t.hour()))),
        ("minute", Object::Int(i64::from(t.minute()))),
        ("second", Object::Int(i64::from(t.second()))),
        ("nanosecond", Object::Int(i64::from(t.nanosecond()))),
        ("weekday", Object::Int(i64::from(t.weekday().num_days_from_monday()))),
    ]))
}

fn localize(tz: Tz, naive: NaiveDateTime) -> Result<DateTime<Tz>, ScriptException> {
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| value_error(format!("{naive} does not exist in {}", tz.name())))
}

fn time_now(env: &Env, call: &CallArgs) -> HostResult {
    let tz = tz_arg(env, call, 0, "timezone")?;
    to_object(&env.clock.now().with_timezone(&tz))
}

fn time_now_utc(env: &Env, _call: &CallArgs) -> HostResult {
    to_object(&env.clock.now().with_timezone(&Tz::UTC))
}

fn time_create(env: &Env, call: &CallArgs) -> HostResult {
    let field = |index: usize, name: &'static str| -> Result<u32, ScriptException> {
        let value = call.opt_int(index, name)?.unwrap_or(0);
        u32::try_from(value).map_err(|_| value_error(format!("{name} out of range: {value}")))
    };
    let year = call.int(0, "year")?;
    let year = i32::try_from(year).map_err(|_| value_error(format!("year out of range: {year}")))?;
    let (month, day) = (field(1, "month")?, field(2, "day")?);
    let (hour, minute, second) = (field(3, "hour")?, field(4, "minute")?, field(5, "second")?);
    let nanosecond = field(6, "nanosecond")?;
    let tz = tz_arg(env, call, 7, "timezone")?;

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| value_error(format!("invalid date {year:04}-{month:02}-{day:02}")))?;
    if nanosecond >= 1_000_000_000 {
        return Err(value_error(format!("nanosecond out of range: {nanosecond}")));
    }
    let time = NaiveTime::from_hms_nano_opt(hour, minute, second, nanosecond)
        .ok_or_else(|| value_error(format!("invalid time {hour:02}:{minute:02}:{second:02}")))?;
    to_object(&localize(tz, date.and_time(time))?)
}

fn time_from_timestamp(env: &Env, call: &CallArgs) -> HostResult {
    let seconds = required_float(call, 0, "seconds")?;
    let tz = tz_arg(env, call, 1, "timezone")?;
    let delta = seconds_to_delta(seconds)?;
    let nanos = delta
        .num_nanoseconds()
        .ok_or_else(|| ScriptException::new(ExcType::OverflowError, "timestamp out of range"))?;
    to_object(&from_unix_nanos(nanos, tz))
}

/// Named layouts as `strftime` patterns.
fn named_layout(layout: &str) -> Option<&'static str> {
    Some(match layout {
        "RFC1123" => "%a, %d %b %Y %H:%M:%S %Z",
        "Kitchen" => "%-I:%M%p",
        "DateOnly" => "%Y-%m-%d",
        "TimeOnly" => "%H:%M:%S",
        "DateTime" => "%Y-%m-%d %H:%M:%S",
        _ => return None,
    })
}

fn checked_items(pattern: &str) -> Result<Vec<Item<'_>>, ScriptException> {
    let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(value_error(format!("invalid time layout: {pattern}")));
    }
    Ok(items)
}

fn parse_with_pattern(
    env: &Env,
    text: &str,
    pattern: &str,
    tz: Tz,
) -> Result<DateTime<Tz>, ScriptException> {
    checked_items(pattern)?;
    if let Ok(t) = DateTime::parse_from_str(text, pattern) {
        return Ok(t.with_timezone(&tz));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, pattern) {
        return localize(tz, naive);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, pattern) {
        return localize(tz, date.and_time(NaiveTime::MIN));
    }
    if let Ok(time) = NaiveTime::parse_from_str(text, pattern) {
        let today = env.clock.now().with_timezone(&tz).date_naive();
        return localize(tz, today.and_time(time));
    }
    Err(value_error(format!(
        "cannot parse '{text}' with layout '{pattern}'"
    )))
}

fn time_parse(env: &Env, call: &CallArgs) -> HostResult {
    let text = call.str(0, "text")?.trim();
    let layout = call.opt_str(1, "layout")?;
    let tz = tz_arg(env, call, 2, "timezone")?;

    let parsed = match layout {
        None | Some("RFC3339") | Some("RFC3339Nano") => {
            match DateTime::parse_from_rfc3339(text) {
                Ok(t) => t.with_timezone(&tz),
                Err(_) if layout.is_none() => {
                    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d"]
                        .iter()
                        .find_map(|pattern| parse_with_pattern(env, text, pattern, tz).ok())
                        .ok_or_else(|| value_error(format!("cannot parse time '{text}'")))?
                }
                Err(e) => return Err(value_error(format!("invalid RFC 3339 time '{text}': {e}"))),
            }
        }
        Some("RFC1123") => match DateTime::parse_from_rfc2822(text) {
            Ok(t) => t.with_timezone(&tz),
            Err(_) => {
                let without_zone = text.rsplit_once(' ').map_or(text, |(head, _)| head);
                parse_with_pattern(env, without_zone, "%a, %d %b %Y %H:%M:%S", tz)?
            }
        },
        Some("Kitchen") => parse_with_pattern(env, text, "%I:%M%p", tz)?,
        Some(name) => {
            let pattern = named_layout(name).unwrap_or(name);
            parse_with_pattern(env, text, pattern, tz)?
        }
    };
    to_object(&parsed)
}

fn format_time(t: &DateTime<Tz>, layout: &str) -> Result<String, ScriptException> {
    match layout {
        "RFC3339" => Ok(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        "RFC3339Nano" => Ok(t.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        other => {
            let pattern = named_layout(other).unwrap_or(other);
            let items = checked_items(pattern)?;
            Ok(t.format_with_items(items.into_iter()).to_string())
        }
    }
}

fn time_format(env: &Env, call: &CallArgs) -> HostResult {
    let t = time_arg(env, call, 0, "t")?;
    let layout = call.opt_str(1, "layout")?.unwrap_or("RFC3339");
    format_time(&t, layout).map(Object::Str)
}

fn time_in_location(env: &Env, call: &CallArgs) -> HostResult {
    let t = time_arg(env, call, 0, "t")?;
    let tz = parse_tz(call.str(1, "timezone")?)?;
    to_object(&t.with_timezone(&tz))
}

fn add_months(t: DateTime<Tz>, months: i64) -> Result<DateTime<Tz>, ScriptException> {
    let magnitude = u32::try_from(months.unsigned_abs())
        .map_err(|_| value_error(format!("months out of range: {months}")))?;
    let shifted = if months >= 0 {
        t.checked_add_months(Months::new(magnitude))
    } else {
        t.checked_sub_months(Months::new(magnitude))
    };
    shifted.ok_or_else(|| value_error("time arithmetic out of range"))
}

fn add_days(t: DateTime<Tz>, days: i64) -> Result<DateTime<Tz>, ScriptException> {
    let shifted = if days >= 0 {
        t.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        t.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.ok_or_else(|| value_error("time arithmetic out of range"))
}

fn add_seconds(t: DateTime<Tz>, seconds: f64) -> Result<DateTime<Tz>, ScriptException> {
    t.checked_add_signed(seconds_to_delta(seconds)?)
        .ok_or_else(|| value_error("time arithmetic out of range"))
}

/// Calendar parts (years, months, days) move the wall clock; the rest is
/// elapsed time.
fn time_add(env: &Env, call: &CallArgs) -> HostResult {
    let mut t = time_arg(env, call, 0, "t")?;
    let years = call.opt_int(usize::MAX, "years")?.unwrap_or(0);
    let months = call.opt_int(usize::MAX, "months")?.unwrap_or(0);
    let total_months = years
        .checked_mul(12)
        .and_then(|m| m.checked_add(months))
        .ok_or_else(|| value_error("months out of range"))?;
    if total_months != 0 {
        t = add_months(t, total_months)?;
    }
    let days = call.opt_int(usize::MAX, "days")?.unwrap_or(0);
    if days != 0 {
        t = add_days(t, days)?;
    }
    let seconds = call.opt_float(1, "seconds")?.unwrap_or(0.0)
        + call.opt_float(usize::MAX, "hours")?.unwrap_or(0.0) * 3600.0
        + call.opt_float(usize::MAX, "minutes")?.unwrap_or(0.0) * 60.0;
    if seconds != 0.0 {
        t = add_seconds(t, seconds)?;
    }
    to_object(&t)
}

fn time_add_duration(env: &Env, call: &CallArgs) -> HostResult {
    let t = time_arg(env, call, 0, "t")?;
    let seconds = match call.required(1, "duration")? {
        Object::Str(text) => parse_duration(text)?,
        other => other.as_float().ok_or_else(|| {
            ScriptException::type_error(format!(
                "time_add_duration() duration must be str or a number, not {}",
                other.type_name()
            ))
        })?,
    };
    to_object(&add_seconds(t, seconds)?)
}

fn time_sub(env: &Env, call: &CallArgs) -> HostResult {
    let a = time_arg(env, call, 0, "a")?;
    let b = time_arg(env, call, 1, "b")?;
    let delta = a.signed_duration_since(b);
    let seconds = delta.num_seconds() as f64
        + f64::from(delta.subsec_nanos()) / NANOS_PER_SECOND;
    Ok(Object::Float(seconds))
}

fn time_truncate(env: &Env, call: &CallArgs) -> HostResult {
    let t = time_arg(env, call, 0, "t")?;
    let unit = call.str(1, "unit")?;
    let local = t.naive_local();
    let date = local.date();
    let midnight = |d: NaiveDate| d.and_time(NaiveTime::MIN);
    let truncated = match unit {
        "second" => local.with_nanosecond(0),
        "minute" => date.and_hms_opt(local.hour(), local.minute(), 0),
        "hour" => date.and_hms_opt(local.hour(), 0, 0),
        "day" => Some(midnight(date)),
        "week" => date
            .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
            .map(midnight),
        "month" => date.with_day(1).map(midnight),
        "year" => date.with_ordinal(1).map(midnight),
        other => {
            return Err(value_error(format!(
                "unknown truncation unit '{other}' \
                 (expected second, minute, hour, day, week, month or year)"
            )));
        }
    }
    .ok_or_else(|| value_error("time arithmetic out of range"))?;
    to_object(&localize(t.timezone(), truncated)?)
}

fn component(env: &Env, call: &CallArgs, f: fn(&DateTime<Tz>) -> i64) -> HostResult {
    time_arg(env, call, 0, "t").map(|t| Object::Int(f(&t)))
}

fn time_unix_nano(env: &Env, call: &CallArgs) -> HostResult {
    let t = time_arg(env, call, 0, "t")?;
    t.timestamp_nanos_opt()
        .map(Object::Int)
        .ok_or_else(|| {
            ScriptException::new(ExcType::OverflowError, "time out of representable range")
        })
}

fn compare(env: &Env, call: &CallArgs) -> Result<Ordering, ScriptException> {
    let a = time_arg(env, call, 0, "a")?;
    let b = time_arg(env, call, 1, "b")?;
    Ok(a.cmp(&b))
}

fn timezone_offset(env: &Env, call: &CallArgs) -> HostResult {
    let tz = parse_tz(call.str(0, "timezone")?)?;
    let at = match call.get(1, "t") {
        Some(value) => to_datetime(env, value)?.with_timezone(&Utc),
        None => env.clock.now(),
    };
    let offset = at.with_timezone(&tz).offset().fix().local_minus_utc();
    Ok(Object::Int(i64::from(offset)))
}

/// `start_hour <= hour < end_hour`, wrapping past midnight when start > end.
fn is_between(env: &Env, call: &CallArgs) -> HostResult {
    let t = time_arg(env, call, 0, "t")?;
    let start = call.int(1, "start_hour")?;
    let end = call.int(2, "end_hour")?;
    let hour = i64::from(t.hour());
    let inside = if start <= end {
        start <= hour && hour < end
    } else {
        hour >= start || hour < end
    };
    Ok(Object::Bool(inside))
}

const UNITS: [(&str, f64); 10] = [
    ("ns", 1e-9),
    ("us", 1e-6),
    ("\u{b5}s", 1e-6),
    ("\u{3bc}s", 1e-6),
    ("ms", 1e-3),
    ("s", 1.0),
    ("m", 60.0),
    ("h", 3600.0),
    ("d", 86_400.0),
    ("w", 604_800.0),
];

/// Parse a duration such as `1h30m`, `-2.5s` or `3d` into seconds.
pub fn parse_duration(text: &str) -> Result<f64, ScriptException> {
    let invalid = || value_error(format!("invalid duration: '{text}'"));
    let trimmed = text.trim();
    let (negative, mut rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    if rest == "0" {
        return Ok(0.0);
    }
    if rest.is_empty() {
        return Err(invalid());
    }
    let mut total = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let number: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(invalid)?;
        total += number * scale;
        rest = &rest[unit_len..];
    }
    Ok(if negative { -total } else { total })
}

/// Digits of `frac` (out of `10^width`) after a decimal point, trailing zeros trimmed.
fn fraction(frac: u128, width: usize) -> String {
    if frac == 0 {
        return String::new();
    }
    let digits = format!("{frac:0width$}");
    format!(".{}", digits.trim_end_matches('0'))
}

/// Render seconds the way `duration_parse` reads them, e.g. `1h30m0s` or `1.5ms`.
pub fn format_duration(seconds: f64) -> String {
    let nanos = (seconds * NANOS_PER_SECOND).round();
    if nanos == 0.0 || !nanos.is_finite() {
        return "0s".to_string();
    }
    let sign = if nanos < 0.0 { "-" } else { "" };
    let n = nanos.abs() as u128;
    let body = if n < 1_000 {
        format!("{n}ns")
    } else if n < 1_000_000 {
        format!("{}{}\u{b5}s", n / 1_000, fraction(n % 1_000, 3))
    } else if n < 1_000_000_000 {
        format!("{}{}ms", n / 1_000_000, fraction(n % 1_000_000, 6))
    } else {
        let total_secs = n / 1_000_000_000;
        let secs = format!("{}{}s", total_secs % 60, fraction(n % 1_000_000_000, 9));
        let (hours, minutes) = (total_secs / 3600, (total_secs / 60) % 60);
        if hours > 0 {
            format!("{hours}h{minutes}m{secs}")
        } else if minutes > 0 {
            format!("{minutes}m{secs}")
        } else {
            secs
        }
    };
    format!("{sign}{body}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FixedClock;

    fn env() -> Env {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 15, 4, 5).single().expect("valid");
        Env {
            clock: Arc::new(FixedClock::new(now)),
            default_tz: Tz::Europe__London,
        }
    }

    fn call(env: &Env, f: TimeFn, args: Vec<Object>, kwargs: Vec<(&str, Object)>) -> HostResult {
        let kwargs = kwargs.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        f(env, &CallArgs::new("test", args, kwargs))
    }

    fn int(value: &Object, key: &str) -> i64 {
        value.get(key).and_then(Object::as_int).expect(key)
    }

    #[test]
    fn now_uses_clock_and_default_zone() {
        let env = env();
        let now = call(&env, time_now, vec![], vec![]).expect("now");
        assert_eq!(now.get("timezone"), Some(&Object::from("Europe/London")));
        assert_eq!(int(&now, "hour"), 15);
        let tokyo = call(&env, time_now, vec![Object::from("Asia/Tokyo")], vec![]).expect("tokyo");
        assert_eq!(int(&tokyo, "hour"), 0);
        assert_eq!(int(&tokyo, "day"), 10);
        assert_eq!(int(&tokyo, "unix_nano"), int(&now, "unix_nano"));
    }

    #[test]
    fn create_format_parse() {
        let env = env();
        let t = call(
            &env,
            time_create,
            vec![2024.into(), 7.into(), 4.into(), 9.into(), 30.into()],
            vec![("timezone", Object::from("America/New_York"))],
        )
        .expect("create");
        assert_eq!(int(&t, "weekday"), 3);
        let text = call(&env, time_format, vec![t.clone()], vec![]).expect("format");
        assert_eq!(text, Object::from("2024-07-04T09:30:00-04:00"));
        let kitchen =
            call(&env, time_format, vec![t.clone(), "Kitchen".into()], vec![]).expect("kitchen");
        assert_eq!(kitchen, Object::from("9:30AM"));
        let back = call(&env, time_parse, vec![text], vec![]).expect("parse");
        assert_eq!(int(&back, "unix_nano"), int(&t, "unix_nano"));
    }

    #[test]
    fn invalid_components_and_zones() {
        let env = env();
        let err = call(&env, time_create, vec![2023.into(), 2.into(), 30.into()], vec![])
            .expect_err("feb 30");
        assert_eq!(err.exc_type, ExcType::ValueError);
        let err =
            call(&env, time_now, vec![Object::from("Mars/Olympus")], vec![]).expect_err("zone");
        assert_eq!(err.exc_type, ExcType::ValueError);
        let err = call(
            &env,
            time_format,
            vec![Object::from("2024-01-01T00:00:00Z"), "%Q".into()],
            vec![],
        )
        .expect_err("layout");
        assert_eq!(err.exc_type, ExcType::ValueError);
    }

    #[test]
    fn add_calendar_and_elapsed() {
        let env = env();
        let start = Object::from("2024-01-31T10:00:00Z");
        let t =
            call(&env, time_add, vec![start.clone()], vec![("months", 1.into())]).expect("months");
        assert_eq!((int(&t, "month"), int(&t, "day")), (2, 29));
        let t = call(&env, time_add, vec![start.clone(), 90.0.into()], vec![("hours", 1.into())])
            .expect("elapsed");
        assert_eq!((int(&t, "hour"), int(&t, "minute")), (11, 1));
        let t = call(&env, time_add_duration, vec![start.clone(), "1h30m".into()], vec![])
            .expect("duration");
        let diff = call(&env, time_sub, vec![t, start], vec![]).expect("sub");
        assert_eq!(diff, Object::Float(5400.0));
    }

    #[test]
    fn truncate_to_week_and_month() {
        let env = env();
        let t = Object::from("2024-03-09T15:04:05Z");
        let week = call(&env, time_truncate, vec![t.clone(), "week".into()], vec![]).expect("week");
        assert_eq!((int(&week, "day"), int(&week, "hour"), int(&week, "weekday")), (4, 0, 0));
        let month = call(&env, time_truncate, vec![t, "month".into()], vec![]).expect("month");
        assert_eq!(int(&month, "day"), 1);
    }

    #[test]
    fn comparisons_ignore_display_zone() {
        let env = env();
        let a = Object::from("2024-03-09T12:00:00+01:00");
        let b = Object::from("2024-03-09T11:00:00Z");
        let same = compare(&env, &CallArgs::new("time_equal", vec![a.clone(), b], vec![]));
        assert_eq!(same, Ok(Ordering::Equal));
        let later = Object::from("2024-03-09T11:00:01Z");
        let before = compare(&env, &CallArgs::new("time_before", vec![a, later], vec![]));
        assert_eq!(before, Ok(Ordering::Less));
    }

    #[test]
    fn weekday_predicates_and_ranges() {
        let env = env();
        let saturday_night = Object::from("2024-03-09T23:30:00Z");
        let weekend = is_weekend_call(&env, saturday_night.clone());
        assert_eq!(weekend, Object::Bool(true));
        let evening = vec![saturday_night.clone(), 22.into(), 7.into()];
        let quiet = call(&env, is_between, evening, vec![]).expect("wrap");
        assert_eq!(quiet, Object::Bool(true));
        let office = call(&env, is_between, vec![saturday_night, 9.into(), 17.into()], vec![])
            .expect("plain");
        assert_eq!(office, Object::Bool(false));
    }

    fn is_weekend_call(env: &Env, t: Object) -> Object {
        let functions = functions(
            &ExecutionContext::new("c").with_clock(env.clock.clone()),
        );
        let (_, f) = functions.iter().find(|(n, _)| *n == "is_weekend").expect("registered");
        let HostFunction::Sync(f) = f else { panic!("sync") };
        f(CallArgs::new("is_weekend", vec![t], vec![])).expect("call")
    }

    #[test]
    fn timezone_offsets_follow_dst() {
        let env = env();
        let summer = Object::from("2024-07-01T12:00:00Z");
        let offset = call(&env, timezone_offset, vec!["America/New_York".into(), summer], vec![])
            .expect("offset");
        assert_eq!(offset, Object::Int(-4 * 3600));
        let winter =
            call(&env, timezone_offset, vec!["America/New_York".into()], vec![]).expect("now");
        assert_eq!(winter, Object::Int(-5 * 3600));
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("1h30m"), Ok(5400.0));
        assert_eq!(parse_duration("-1.5s"), Ok(-1.5));
        assert_eq!(parse_duration("2d"), Ok(172_800.0));
        assert_eq!(parse_duration("0"), Ok(0.0));
        assert!(parse_duration("5 parsecs").is_err());
        assert!(parse_duration("").is_err());
        assert_eq!(format_duration(5400.0), "1h30m0s");
        assert_eq!(format_duration(62.5), "1m2.5s");
        assert_eq!(format_duration(0.0015), "1.5ms");
        assert_eq!(format_duration(-3.0), "-3s");
        assert_eq!(format_duration(0.0), "0s");
    }
}
