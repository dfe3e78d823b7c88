use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::ser::{PrettyFormatter, Serializer};

use super::registry::{CallArgs, HostFunction};
use crate::script::{Object, ScriptException};

fn encode(value: &JsonValue, indent: Option<usize>) -> Result<String, ScriptException> {
    let Some(width) = indent else {
        return Ok(value.to_string());
    };
    let indent = " ".repeat(width);
    let mut out = Vec::new();
    let mut serializer =
        Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(indent.as_bytes()));
    value
        .serialize(&mut serializer)
        .map_err(|e| ScriptException::value_error(e.to_string()))?;
    String::from_utf8(out).map_err(|e| ScriptException::value_error(e.to_string()))
}

fn json_encode(call: CallArgs) -> Result<Object, ScriptException> {
    let value = call.args.first().cloned().unwrap_or(Object::None);
    let indent = call.opt_int(1, "indent")?.map(|n| n.max(0) as usize);
    let json = value.to_json()?;
    encode(&json, indent).map(Object::Str)
}

fn json_decode(call: CallArgs) -> Result<Object, ScriptException> {
    let text = call.str(0, "text")?;
    serde_json::from_str::<JsonValue>(text)
        .map(|value| Object::from_json(&value))
        .map_err(|e| ScriptException::value_error(format!("invalid JSON: {e}")))
}

/// `json_encode(value, indent=None)` and `json_decode(text)`.
pub fn functions() -> Vec<(&'static str, HostFunction)> {
    vec![
        ("json_encode", HostFunction::sync(json_encode)),
        ("json_decode", HostFunction::sync(json_decode)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ExcType;

    #[test]
    fn encode_compact_and_indented() {
        let value = Object::dict([("a", Object::List(vec![Object::Int(1), Object::None]))]);
        let compact = json_encode(CallArgs::new("json_encode", vec![value.clone()], vec![]));
        assert_eq!(compact, Ok(Object::Str(r#"{"a":[1,null]}"#.into())));
        let pretty = json_encode(CallArgs::new(
            "json_encode",
            vec![value],
            vec![("indent".into(), Object::Int(2))],
        ));
        assert_eq!(
            pretty,
            Ok(Object::Str("{\n  \"a\": [\n    1,\n    null\n  ]\n}".into()))
        );
    }

    #[test]
    fn decode_and_errors() {
        let decoded = json_decode(CallArgs::new(
            "json_decode",
            vec![Object::from("[1, \"x\"]")],
            vec![],
        ));
        assert_eq!(
            decoded,
            Ok(Object::List(vec![Object::Int(1), Object::Str("x".into())]))
        );
        let err = json_decode(CallArgs::new("json_decode", vec![Object::from("{")], vec![]))
            .expect_err("invalid");
        assert_eq!(err.exc_type, ExcType::ValueError);
    }
}
