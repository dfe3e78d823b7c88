//! External function registry.
//!
//! Built fresh for every invocation from the user-supplied [`Globals`] and
//! the [`ExecutionContext`]: callables become external functions, everything
//! else becomes a plain input. The host API blocks (wake, JSON, time,
//! attachments, tools) are layered on top without replacing user entries.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use indexmap::map::Entry;
use tracing::{debug, warn};

use super::wake::WakeQueue;
use super::{attachments_api, json_api, time_api, wake};
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::script::{ExcType, Object, ScriptException};
use crate::tools::{AsyncBridge, ToolsApi};

/// What a host function returns to the script.
pub type HostResult = Result<Object, ScriptException>;

type SyncFn = Arc<dyn Fn(CallArgs) -> HostResult + Send + Sync>;
type AsyncFn = Arc<dyn Fn(CallArgs) -> BoxFuture<'static, HostResult> + Send + Sync>;

/// A host-provided callable.
#[derive(Clone)]
pub enum HostFunction {
    /// Runs inline and returns immediately.
    Sync(SyncFn),
    /// Returns a future; awaited natively on the async path and bridged on the sync path.
    Async(AsyncFn),
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostFunction::Sync(_) => f.write_str("HostFunction::Sync"),
            HostFunction::Async(_) => f.write_str("HostFunction::Async"),
        }
    }
}

impl HostFunction {
    /// Wrap a synchronous closure.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(CallArgs) -> HostResult + Send + Sync + 'static,
    {
        HostFunction::Sync(Arc::new(f))
    }

    /// Wrap an asynchronous closure.
    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HostResult> + Send + 'static,
    {
        HostFunction::Async(Arc::new(move |args| Box::pin(f(args))))
    }

    /// Whether calling this yields a future.
    pub fn is_async(&self) -> bool {
        matches!(self, HostFunction::Async(_))
    }

    /// Call from async code.
    pub async fn call(&self, args: CallArgs) -> HostResult {
        match self {
            HostFunction::Sync(f) => f(args),
            HostFunction::Async(f) => f(args).await,
        }
    }

    /// Call from synchronous code, driving async functions through `bridge`.
    pub fn call_blocking(&self, args: CallArgs, bridge: &AsyncBridge) -> HostResult {
        match self {
            HostFunction::Sync(f) => f(args),
            HostFunction::Async(f) => {
                let name = args.function.clone();
                bridge.block_on(f(args)).unwrap_or_else(|err| {
                    let exc_type = match err {
                        crate::tools::BridgeError::Timeout(_) => ExcType::TimeoutError,
                        _ => ExcType::RuntimeError,
                    };
                    Err(ScriptException::new(exc_type, format!("{name}(): {err}")))
                })
            }
        }
    }
}

/// Arguments of one external call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallArgs {
    /// Name the script called.
    pub function: String,
    /// Positional arguments.
    pub args: Vec<Object>,
    /// Keyword arguments in call order.
    pub kwargs: Vec<(String, Object)>,
}

impl CallArgs {
    /// Arguments for a call to `function`.
    pub fn new(
        function: impl Into<String>,
        args: Vec<Object>,
        kwargs: Vec<(String, Object)>,
    ) -> Self {
        Self {
            function: function.into(),
            args,
            kwargs,
        }
    }

    /// Parameter `name` at position `index`, by keyword or position. `None`
    /// values count as absent.
    pub fn get(&self, index: usize, name: &str) -> Option<&Object> {
        self.kwargs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .or_else(|| self.args.get(index))
            .filter(|v| !v.is_none())
    }

    /// Like [`get`](Self::get) but missing values raise `TypeError`.
    pub fn required(&self, index: usize, name: &str) -> Result<&Object, ScriptException> {
        self.get(index, name).ok_or_else(|| {
            ScriptException::type_error(format!(
                "{}() missing required argument '{name}'",
                self.function
            ))
        })
    }

    fn wrong_type(&self, name: &str, expected: &str, got: &Object) -> ScriptException {
        ScriptException::type_error(format!(
            "{}() argument '{name}' must be {expected}, not {}",
            self.function,
            got.type_name()
        ))
    }

    /// Optional string parameter.
    pub fn opt_str(&self, index: usize, name: &str) -> Result<Option<&str>, ScriptException> {
        match self.get(index, name) {
            None => Ok(None),
            Some(Object::Str(s)) => Ok(Some(s)),
            Some(other) => Err(self.wrong_type(name, "str", other)),
        }
    }

    /// Required string parameter.
    pub fn str(&self, index: usize, name: &str) -> Result<&str, ScriptException> {
        let value = self.required(index, name)?;
        value.as_str().ok_or_else(|| self.wrong_type(name, "str", value))
    }

    /// Optional integer parameter.
    pub fn opt_int(&self, index: usize, name: &str) -> Result<Option<i64>, ScriptException> {
        match self.get(index, name) {
            None => Ok(None),
            Some(Object::Int(i)) => Ok(Some(*i)),
            Some(Object::Bool(b)) => Ok(Some(i64::from(*b))),
            Some(other) => Err(self.wrong_type(name, "int", other)),
        }
    }

    /// Required integer parameter.
    pub fn int(&self, index: usize, name: &str) -> Result<i64, ScriptException> {
        self.opt_int(index, name)?.ok_or_else(|| {
            ScriptException::type_error(format!(
                "{}() missing required argument '{name}'",
                self.function
            ))
        })
    }

    /// Optional number parameter, ints widened to float.
    pub fn opt_float(&self, index: usize, name: &str) -> Result<Option<f64>, ScriptException> {
        match self.get(index, name) {
            None => Ok(None),
            Some(value) => value
                .as_float()
                .map(Some)
                .ok_or_else(|| self.wrong_type(name, "a number", value)),
        }
    }

    /// Optional boolean parameter.
    pub fn opt_bool(&self, index: usize, name: &str) -> Result<Option<bool>, ScriptException> {
        match self.get(index, name) {
            None => Ok(None),
            Some(Object::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.wrong_type(name, "bool", other)),
        }
    }
}

/// A user-supplied global.
#[derive(Debug, Clone)]
pub enum Global {
    /// Plain input value.
    Value(Object),
    /// Callable exposed as an external function.
    Function(HostFunction),
}

/// User-supplied globals for one invocation.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    entries: IndexMap<String, Global>,
}

impl Globals {
    /// No globals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain input.
    pub fn value(mut self, name: impl Into<String>, value: impl Into<Object>) -> Self {
        self.entries.insert(name.into(), Global::Value(value.into()));
        self
    }

    /// Add a synchronous function.
    pub fn function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(CallArgs) -> HostResult + Send + Sync + 'static,
    {
        self.entries
            .insert(name.into(), Global::Function(HostFunction::sync(f)));
        self
    }

    /// Add an asynchronous function.
    pub fn async_function<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HostResult> + Send + 'static,
    {
        self.entries
            .insert(name.into(), Global::Function(HostFunction::asynchronous(f)));
        self
    }

    /// Insert any entry.
    pub fn insert(&mut self, name: impl Into<String>, global: Global) {
        self.entries.insert(name.into(), global);
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Name → implementation map plus plain inputs for one invocation.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: IndexMap<String, HostFunction>,
    inputs: IndexMap<String, Object>,
}

impl FunctionRegistry {
    /// Assemble the registry for one invocation.
    pub async fn build(
        globals: Globals,
        context: ExecutionContext,
        config: EngineConfig,
        bridge: Arc<AsyncBridge>,
        wake_queue: WakeQueue,
    ) -> Self {
        let mut registry = Self::from_globals(globals);
        registry.add_function("wake_llm", wake::wake_llm(wake_queue));

        if config.enable_apis {
            for (name, function) in json_api::functions() {
                registry.add_function(name, function);
            }
            for (name, function) in time_api::functions(&context) {
                registry.add_function(name, function);
            }
            for (name, value) in time_api::constants() {
                registry.add_input(name, value);
            }
        }

        if let Some(attachments) = context.attachments.clone() {
            for (name, function) in attachments_api::functions(attachments, context.clone()) {
                registry.add_function(name, function);
            }
        }

        if let Some(provider) = context.tool_provider.clone() {
            let api = ToolsApi::new(
                provider,
                context.clone(),
                config.allowed_tools.clone(),
                config.deny_all_tools,
                bridge,
            );
            match tool_functions(&api).await {
                Ok(functions) => {
                    for (name, function) in functions {
                        registry.add_function(name, function);
                    }
                }
                Err(err) => warn!(error = %err, "skipping tools API, tool catalogue unavailable"),
            }
        }

        debug!(
            functions = registry.functions.len(),
            inputs = registry.inputs.len(),
            "external function registry built"
        );
        registry
    }

    /// Registry holding only the user-supplied entries.
    pub fn from_globals(globals: Globals) -> Self {
        let mut registry = Self::default();
        for (name, global) in globals.entries {
            match global {
                Global::Value(value) => {
                    registry.inputs.insert(name, value);
                }
                Global::Function(function) => {
                    registry.functions.insert(name, function);
                }
            }
        }
        registry
    }

    fn add_function(&mut self, name: impl Into<String>, function: HostFunction) {
        if let Entry::Vacant(slot) = self.functions.entry(name.into()) {
            slot.insert(function);
        }
    }

    fn add_input(&mut self, name: impl Into<String>, value: Object) {
        if let Entry::Vacant(slot) = self.inputs.entry(name.into()) {
            slot.insert(value);
        }
    }

    /// Implementation for `name`.
    pub fn get(&self, name: &str) -> Option<&HostFunction> {
        self.functions.get(name)
    }

    /// External function names.
    pub fn function_names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    /// Plain input names.
    pub fn input_names(&self) -> Vec<String> {
        self.inputs.keys().cloned().collect()
    }

    /// Plain inputs as `(name, value)` pairs.
    pub fn inputs(&self) -> Vec<(String, Object)> {
        self.inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn definition_object(def: &crate::tools::ToolDefinition) -> Object {
    Object::dict([
        ("name", Object::from(def.name.as_str())),
        ("description", Object::from(def.description.as_str())),
        ("parameters", Object::from_json(&def.parameters)),
    ])
}

async fn tool_functions(
    api: &ToolsApi,
) -> Result<Vec<(String, HostFunction)>, crate::tools::ToolsApiError> {
    let definitions = api.list_tools_async().await?;
    let mut functions = Vec::with_capacity(definitions.len() * 2 + 4);

    let list_api = api.clone();
    functions.push((
        "tools_list".to_string(),
        HostFunction::asynchronous(move |_call| {
            let api = list_api.clone();
            async move {
                let definitions = api.list_tools_async().await.map_err(ScriptException::from)?;
                Ok(Object::List(definitions.iter().map(definition_object).collect()))
            }
        }),
    ));

    let get_api = api.clone();
    functions.push((
        "tools_get".to_string(),
        HostFunction::asynchronous(move |call| {
            let api = get_api.clone();
            async move {
                let name = call.str(0, "name")?.to_string();
                let definition = api.get_tool_async(&name).await.map_err(ScriptException::from)?;
                Ok(definition.as_ref().map_or(Object::None, definition_object))
            }
        }),
    ));

    let execute_api = api.clone();
    functions.push((
        "tools_execute".to_string(),
        HostFunction::asynchronous(move |mut call| {
            let api = execute_api.clone();
            async move {
                let name = match call.kwargs.iter().position(|(k, _)| k == "tool_name") {
                    Some(index) => call.kwargs.remove(index).1,
                    None if !call.args.is_empty() => call.args.remove(0),
                    None => {
                        return Err(ScriptException::type_error(
                            "tools_execute() missing required argument 'tool_name'",
                        ));
                    }
                };
                let Object::Str(name) = name else {
                    return Err(ScriptException::type_error(
                        "tools_execute() argument 'tool_name' must be str",
                    ));
                };
                api.execute_async(&name, call.args, call.kwargs)
                    .await
                    .map(Object::Str)
                    .map_err(ScriptException::from)
            }
        }),
    ));

    let json_api = api.clone();
    functions.push((
        "tools_execute_json".to_string(),
        HostFunction::asynchronous(move |call| {
            let api = json_api.clone();
            async move {
                let name = call.str(0, "tool_name")?.to_string();
                let args_json = call.opt_str(1, "args_json")?.unwrap_or("{}").to_string();
                api.execute_json_async(&name, &args_json)
                    .await
                    .map(Object::Str)
                    .map_err(ScriptException::from)
            }
        }),
    ));

    for definition in definitions {
        let tool_api = api.clone();
        let tool_name = definition.name.clone();
        let function = HostFunction::asynchronous(move |call| {
            let api = tool_api.clone();
            let name = tool_name.clone();
            async move {
                api.execute_async(&name, call.args, call.kwargs)
                    .await
                    .map(Object::Str)
                    .map_err(ScriptException::from)
            }
        });
        functions.push((definition.name.clone(), function.clone()));
        functions.push((format!("tool_{}", definition.name), function));
    }
    Ok(functions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_args_prefer_keywords() {
        let call = CallArgs::new(
            "f",
            vec![Object::Int(1), Object::None],
            vec![("b".to_string(), Object::Str("kw".into()))],
        );
        assert_eq!(call.opt_int(0, "a"), Ok(Some(1)));
        assert_eq!(call.str(1, "b"), Ok("kw"));
        assert_eq!(call.get(1, "c"), None);
        let err = call.str(2, "missing").expect_err("missing");
        assert_eq!(err.message, "f() missing required argument 'missing'");
        let err = call.str(0, "a").expect_err("wrong type");
        assert_eq!(err.message, "f() argument 'a' must be str, not int");
    }

    #[tokio::test]
    async fn user_globals_are_partitioned() {
        let globals = Globals::new()
            .value("x", 21)
            .function("double", |call: CallArgs| Ok(Object::Int(call.int(0, "n")? * 2)));
        let registry = FunctionRegistry::build(
            globals,
            ExecutionContext::new("c"),
            EngineConfig::default(),
            Arc::new(AsyncBridge::current(std::time::Duration::from_secs(1))),
            WakeQueue::default(),
        )
        .await;
        assert!(registry.input_names().contains(&"x".to_string()));
        assert!(registry.input_names().contains(&"HOUR".to_string()));
        assert!(registry.get("double").is_some());
        assert!(registry.get("wake_llm").is_some());
        assert!(registry.get("time_now").is_some());
        assert!(registry.get("json_encode").is_some());
        assert!(registry.get("tools_list").is_none());
        assert!(registry.get("attachment_get").is_none());
    }

    #[tokio::test]
    async fn disabled_apis_are_absent() {
        let config = EngineConfig {
            enable_apis: false,
            ..EngineConfig::default()
        };
        let registry = FunctionRegistry::build(
            Globals::new(),
            ExecutionContext::new("c"),
            config,
            Arc::new(AsyncBridge::current(std::time::Duration::from_secs(1))),
            WakeQueue::default(),
        )
        .await;
        assert_eq!(registry.function_names(), vec!["wake_llm".to_string()]);
        assert!(registry.input_names().is_empty());
    }

    #[tokio::test]
    async fn user_functions_win_over_host_blocks() {
        let globals = Globals::new().function("time_now", |_| Ok(Object::Str("frozen".into())));
        let registry = FunctionRegistry::build(
            globals,
            ExecutionContext::new("c"),
            EngineConfig::default(),
            Arc::new(AsyncBridge::current(std::time::Duration::from_secs(1))),
            WakeQueue::default(),
        )
        .await;
        let result = registry
            .get("time_now")
            .expect("registered")
            .call(CallArgs::new("time_now", vec![], vec![]))
            .await;
        assert_eq!(result, Ok(Object::Str("frozen".into())));
    }
}
