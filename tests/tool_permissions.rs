//! Integration tests for tool allow-lists
//!
//! Policy is enforced both on the script surface and on the `ToolsApi`
//! used directly from host code.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use family_assistant::tools::{
    AsyncBridge, LocalToolProvider, ToolDefinition, ToolOutput, ToolProvider, ToolsApi,
    ToolsApiError,
};
use family_assistant::{EngineConfig, ExecutionContext, Globals, Object, ScriptEngine, ScriptError};
use serde_json::json;

fn provider() -> Arc<dyn ToolProvider> {
    let mut tools = LocalToolProvider::new();
    for name in ["a", "b"] {
        tools.register(
            ToolDefinition::new(name, format!("tool {name}"), json!({"type": "object"})),
            move |_args, _ctx| async move { Ok(ToolOutput::from(format!("ran {name}"))) },
        );
    }
    Arc::new(tools)
}

fn api(allowed: Option<&[&str]>, deny_all: bool) -> ToolsApi {
    ToolsApi::new(
        provider(),
        ExecutionContext::new("c"),
        allowed.map(|names| names.iter().map(|n| n.to_string()).collect::<BTreeSet<_>>()),
        deny_all,
        Arc::new(AsyncBridge::current(Duration::from_secs(5))),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allow_list_on_api() {
    let api = api(Some(&["a"]), false);
    let names: Vec<_> = api
        .list_tools_async()
        .await
        .unwrap()
        .into_iter()
        .map(|def| def.name)
        .collect();
    assert_eq!(names, ["a"]);
    assert_eq!(api.execute_async("a", vec![], vec![]).await.unwrap(), "ran a");
    let err = api.execute_async("b", vec![], vec![]).await.unwrap_err();
    assert_eq!(err, ToolsApiError::PermissionDenied("b".to_string()));
}

#[test]
fn test_deny_all_on_blocking_api() {
    let api = api(None, true);
    assert!(api.list_tools().unwrap().is_empty());
    assert!(matches!(
        api.execute("a", vec![], vec![]),
        Err(ToolsApiError::PermissionDenied(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allow_list_on_script_surface() {
    let engine = ScriptEngine::new(EngineConfig {
        allowed_tools: Some(BTreeSet::from(["a".to_string()])),
        ..EngineConfig::default()
    });
    let context = ExecutionContext::new("c").with_tool_provider(provider());
    let script = "\
names = [t['name'] for t in tools_list()]
try:
    tools_execute('b')
    denied = 'no'
except PermissionError as e:
    denied = str(e)
[names, a(), denied]";
    let value = engine
        .evaluate_async(script, Globals::new(), &context)
        .await
        .unwrap();
    assert_eq!(
        value,
        Object::List(vec![
            Object::List(vec![Object::from("a")]),
            Object::from("ran a"),
            Object::from("Tool 'b' is not allowed"),
        ])
    );

    let err = engine
        .evaluate_async("b()", Globals::new(), &context)
        .await
        .unwrap_err();
    assert!(matches!(err, ScriptError::Execution { .. }));
}
