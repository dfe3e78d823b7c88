//! Integration tests for script evaluation
//!
//! Covers both entry points end to end: registry assembly, host calls,
//! tools, wake requests and the execution time limit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use family_assistant::attachments::SqliteAttachmentRegistry;
use family_assistant::db::Database;
use family_assistant::tools::{LocalToolProvider, ToolDefinition, ToolError, ToolOutput};
use family_assistant::{EngineConfig, ExecutionContext, Globals, Object, ScriptEngine, ScriptError};
use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};

fn engine() -> ScriptEngine {
    ScriptEngine::new(EngineConfig {
        max_execution_time_secs: 10.0,
        ..EngineConfig::default()
    })
}

fn echo_provider() -> LocalToolProvider {
    LocalToolProvider::new()
        .with_tool(
            ToolDefinition::new(
                "echo",
                "Echo the text back",
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            ),
            |args, _ctx| async move {
                let text = args
                    .get("text")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| ToolError::invalid("echo", "missing text"))?;
                Ok(ToolOutput::from(text))
            },
        )
        .with_tool(
            ToolDefinition::new("fail", "Always fails", json!({"type": "object"})),
            |_args, _ctx| async move { Err(ToolError::Execution("boom".to_string())) },
        )
}

fn tool_context(provider: LocalToolProvider) -> ExecutionContext {
    ExecutionContext::new("conv-1").with_tool_provider(Arc::new(provider))
}

#[test]
fn test_constant_expression_sync() {
    let value = engine()
        .evaluate("1 + 1", Globals::new(), &ExecutionContext::new("c"))
        .unwrap();
    assert_eq!(value, Object::Int(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_external_function_async() {
    let globals = Globals::new()
        .value("x", 21)
        .function("double", |call| Ok(Object::Int(call.int(0, "x")? * 2)));
    let value = engine()
        .evaluate_async("double(x)", globals, &ExecutionContext::new("c"))
        .await
        .unwrap();
    assert_eq!(value, Object::Int(42));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_undefined_name_is_execution_error() {
    let err = engine()
        .evaluate_async("undefined_fn()", Globals::new(), &ExecutionContext::new("c"))
        .await
        .unwrap_err();
    match err {
        ScriptError::Execution { message, .. } => {
            assert!(message.contains("undefined_fn"), "{message}");
            assert!(message.contains("not defined"), "{message}");
        }
        other => panic!("expected an execution error, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tool_positional_and_keyword_arguments() {
    let context = tool_context(echo_provider());
    let engine = engine();
    let script = "[echo('hi'), echo(text='hi'), tools_execute('echo', text='hi')]";
    let expected = Object::List(vec![Object::from("hi"); 3]);

    let value = engine
        .evaluate_async(script, Globals::new(), &context)
        .await
        .unwrap();
    assert_eq!(value, expected);

    let value = engine.evaluate(script, Globals::new(), &context).unwrap();
    assert_eq!(value, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dual_tool_names_share_execution() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let provider = LocalToolProvider::new().with_tool(
        ToolDefinition::new(
            "foo",
            "Records its arguments",
            json!({"type": "object", "properties": {"n": {"type": "integer"}}, "required": ["n"]}),
        ),
        move |args, _ctx| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().push(args.clone());
                Ok(ToolOutput::Json(json!({"n": args.get("n").cloned()})))
            }
        },
    );
    let value = engine()
        .evaluate_async("[foo(7), tool_foo(7)]", Globals::new(), &tool_context(provider))
        .await
        .unwrap();
    let Object::List(results) = value else {
        panic!("expected a list");
    };
    assert_eq!(results[0], results[1]);
    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tool_failures_are_catchable_runtime_errors() {
    let script = "\
try:
    fail()
    out = 'no error'
except RuntimeError as e:
    out = str(e)
out";
    let value = engine()
        .evaluate_async(script, Globals::new(), &tool_context(echo_provider()))
        .await
        .unwrap();
    assert_eq!(value, Object::from("Error executing tool 'fail': boom"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_user_globals_shadow_tools() {
    let globals = Globals::new().function("echo", |_| Ok(Object::from("mine")));
    let value = engine()
        .evaluate_async("[echo('hi'), tool_echo('hi')]", globals, &tool_context(echo_provider()))
        .await
        .unwrap();
    assert_eq!(
        value,
        Object::List(vec![Object::from("mine"), Object::from("hi")])
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_async_timeout_bounds_hung_host_call() {
    let engine = ScriptEngine::new(EngineConfig {
        max_execution_time_secs: 0.5,
        ..EngineConfig::default()
    });
    let globals = Globals::new().async_function("hang", |_| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Object::None)
    });
    let started = Instant::now();
    let err = engine
        .evaluate_async("hang()", globals, &ExecutionContext::new("c"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ScriptError::Timeout {
            limit: Duration::from_millis(500)
        }
    );
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[test]
fn test_sync_timeout_bounds_hung_host_call() {
    let engine = ScriptEngine::new(EngineConfig {
        max_execution_time_secs: 0.5,
        ..EngineConfig::default()
    });
    let globals = Globals::new().function("slow", |_| {
        std::thread::sleep(Duration::from_secs(3));
        Ok(Object::Int(7))
    });
    let started = Instant::now();
    let err = engine
        .evaluate("slow()", globals, &ExecutionContext::new("c"))
        .unwrap_err();
    assert_eq!(
        err,
        ScriptError::Timeout {
            limit: Duration::from_millis(500)
        }
    );
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[test]
fn test_bridge_timeout_is_a_catchable_runtime_error() {
    let engine = ScriptEngine::new(EngineConfig {
        max_execution_time_secs: 5.0,
        bridge_timeout_secs: 1,
        ..EngineConfig::default()
    });
    let globals = Globals::new().async_function("hang", |_| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Object::None)
    });
    let script = "\
try:
    hang()
    r = 'finished'
except RuntimeError as e:
    r = str(e)
r";
    let value = engine
        .evaluate(script, globals, &ExecutionContext::new("c"))
        .unwrap();
    let message = value.as_str().unwrap().to_string();
    assert!(message.contains("timed out"), "{message}");
}

#[test]
fn test_runaway_loop_hits_interpreter_limit() {
    let engine = ScriptEngine::new(EngineConfig {
        max_execution_time_secs: 0.2,
        ..EngineConfig::default()
    });
    let err = engine
        .evaluate("while True:\n    pass", Globals::new(), &ExecutionContext::new("c"))
        .unwrap_err();
    assert!(matches!(err, ScriptError::Timeout { .. }), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wake_requests_are_per_invocation() {
    let engine = engine();
    let context = ExecutionContext::new("c");
    engine
        .evaluate_async(
            "wake_llm({'message': 'x'})\nwake_llm({'message': 'x'}, include_event=False)",
            Globals::new(),
            &context,
        )
        .await
        .unwrap();
    let requests = engine.take_wake_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].context.get("message"), Some(&json!("x")));
    assert!(!requests[1].include_event);

    engine
        .evaluate_async("wake_llm({'message': 'y'})", Globals::new(), &context)
        .await
        .unwrap();
    engine
        .evaluate_async("1", Globals::new(), &context)
        .await
        .unwrap();
    assert!(engine.take_wake_requests().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wake_rejects_malformed_attachment_ids() {
    let engine = engine();
    let context = ExecutionContext::new("c");
    let err = engine
        .evaluate_async(
            "wake_llm({'attachments': ['not-a-uuid']})",
            Globals::new(),
            &context,
        )
        .await
        .unwrap_err();
    match err {
        ScriptError::Execution { message, .. } => {
            assert!(message.starts_with("ValueError"), "{message}")
        }
        other => panic!("expected an execution error, got {other:?}"),
    }
    assert!(engine.take_wake_requests().is_empty());

    let id = uuid::Uuid::new_v4().to_string();
    engine
        .evaluate_async(
            "wake_llm({'attachments': [attachment]})",
            Globals::new().value("attachment", id.as_str()),
            &context,
        )
        .await
        .unwrap();
    let requests = engine.take_wake_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].context.get("attachments"), Some(&json!([id])));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_attachment_created_by_script_can_be_woken_with() {
    let database = Database::in_memory().await.unwrap();
    let context = ExecutionContext::new("c")
        .with_attachments(Arc::new(SqliteAttachmentRegistry::new(database)));
    let engine = engine();
    let script = "\
meta = attachment_create('groceries: milk, eggs', 'list.txt', description='shopping')
wake_llm({'message': 'new list', 'attachments': [meta['id']]})
attachment_read(meta['id'])";
    let value = engine
        .evaluate_async(script, Globals::new(), &context)
        .await
        .unwrap();
    assert_eq!(value, Object::from("groceries: milk, eggs"));
    assert_eq!(engine.take_wake_requests().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_print_does_not_change_result() {
    let value = engine()
        .evaluate_async(
            "for i in range(3):\n    print('step', i)\njson_encode({'done': True})",
            Globals::new(),
            &ExecutionContext::new("c"),
        )
        .await
        .unwrap();
    assert_eq!(value, Object::from(r#"{"done":true}"#));
}
