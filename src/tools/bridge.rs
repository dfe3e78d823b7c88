//! Synchronous access to asynchronous tool execution.
//!
//! Scripts call host functions synchronously from the interpreter thread,
//! but tools are async and usually touch the database pool owned by the
//! application's runtime. [`AsyncBridge`] drives a future to completion from
//! whatever thread it is called on while keeping it on that runtime whenever
//! possible:
//!
//! 1. On a multi-threaded runtime worker: block in place on the current runtime.
//! 2. On a current-thread runtime (which cannot be blocked): run on a
//!    throwaway thread with its own runtime.
//! 3. Off any runtime: spawn onto the main runtime handle, or onto a lazily
//!    started background runtime when there is none.
//!
//! Every path is bounded by the bridge timeout.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};
use tracing::{debug, warn};

use super::{ToolArguments, ToolDefinition, ToolError, ToolProvider};
use crate::context::ExecutionContext;
use crate::script::{ExcType, Object, ScriptException};

/// Bridge failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// The future did not finish in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The target runtime went away before the result arrived.
    #[error("runtime shut down before the operation completed")]
    LoopClosed,

    /// A runtime could not be created or the task panicked.
    #[error("bridge failure: {0}")]
    Runtime(String),
}

/// Runs futures to completion from synchronous code.
pub struct AsyncBridge {
    main: Option<Handle>,
    timeout: Duration,
    background: OnceCell<Runtime>,
}

impl fmt::Debug for AsyncBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncBridge")
            .field("main", &self.main.is_some())
            .field("timeout", &self.timeout)
            .field("background", &self.background.get().is_some())
            .finish()
    }
}

impl AsyncBridge {
    /// Bridge that schedules onto `main` when called off-runtime.
    pub fn new(main: Option<Handle>, timeout: Duration) -> Self {
        Self {
            main,
            timeout,
            background: OnceCell::new(),
        }
    }

    /// Bridge bound to the runtime of the calling thread, if any.
    pub fn current(timeout: Duration) -> Self {
        Self::new(Handle::try_current().ok(), timeout)
    }

    /// Per-call bound.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Drive `future` to completion from synchronous code.
    pub fn block_on<F, T>(&self, future: F) -> Result<T, BridgeError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let limit = self.timeout;
        match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                debug!("bridge: blocking in place on the current runtime");
                tokio::task::block_in_place(|| {
                    current.block_on(async move { tokio::time::timeout(limit, future).await })
                })
                .map_err(|_| BridgeError::Timeout(limit))
            }
            Ok(current) => match &self.main {
                Some(main) if main.id() != current.id() => {
                    debug!("bridge: current-thread runtime, handing off to the main runtime");
                    self.on_helper_thread(main, future)
                }
                // The main runtime is the one this thread is blocking.
                _ => {
                    debug!("bridge: current-thread runtime, running on a throwaway runtime");
                    self.on_fresh_runtime(future)
                }
            },
            Err(_) => {
                let handle = match &self.main {
                    Some(main) => main.clone(),
                    None => self.background()?.handle().clone(),
                };
                debug!("bridge: scheduling onto the owning runtime");
                self.spawn_and_wait(&handle, future)
            }
        }
    }

    fn spawn_and_wait<F, T>(&self, handle: &Handle, future: F) -> Result<T, BridgeError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let task = handle.spawn(async move {
            // The waiter may have timed out already.
            let _ = tx.send(future.await);
        });
        match rx.recv_timeout(self.timeout) {
            Ok(value) => Ok(value),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                task.abort();
                Err(BridgeError::Timeout(self.timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(BridgeError::LoopClosed),
        }
    }

    fn on_helper_thread<F, T>(&self, main: &Handle, future: F) -> Result<T, BridgeError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        std::thread::scope(|scope| {
            scope
                .spawn(|| self.spawn_and_wait(main, future))
                .join()
                .map_err(|_| BridgeError::Runtime("bridge thread panicked".to_string()))?
        })
    }

    fn on_fresh_runtime<F, T>(&self, future: F) -> Result<T, BridgeError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let limit = self.timeout;
        std::thread::scope(|scope| {
            scope
                .spawn(move || {
                    let runtime = Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .map_err(|e| BridgeError::Runtime(e.to_string()))?;
                    runtime
                        .block_on(async move { tokio::time::timeout(limit, future).await })
                        .map_err(|_| BridgeError::Timeout(limit))
                })
                .join()
                .map_err(|_| BridgeError::Runtime("bridge thread panicked".to_string()))?
        })
    }

    fn background(&self) -> Result<&Runtime, BridgeError> {
        self.background.get_or_try_init(|| {
            debug!("bridge: starting background runtime");
            Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("bridge-runtime")
                .enable_all()
                .build()
                .map_err(|e| BridgeError::Runtime(e.to_string()))
        })
    }
}

impl Drop for AsyncBridge {
    fn drop(&mut self) {
        if let Some(runtime) = self.background.take() {
            runtime.shutdown_background();
        }
    }
}

/// Errors surfaced by [`ToolsApi`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolsApiError {
    /// The tool is not allowed for this invocation.
    #[error("Tool '{0}' is not allowed")]
    PermissionDenied(String),

    /// Arguments could not be converted for the tool.
    #[error("invalid arguments for tool '{tool}': {message}")]
    InvalidArguments {
        /// Tool name.
        tool: String,
        /// What was wrong.
        message: String,
    },

    /// The tool failed.
    #[error("Error executing tool '{tool}': {message}")]
    Execution {
        /// Tool name.
        tool: String,
        /// Failure description.
        message: String,
    },

    /// The bridge failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl From<ToolsApiError> for ScriptException {
    fn from(err: ToolsApiError) -> Self {
        let exc_type = match &err {
            ToolsApiError::PermissionDenied(_) => ExcType::PermissionError,
            ToolsApiError::InvalidArguments { .. } => ExcType::ValueError,
            ToolsApiError::Execution { .. } => ExcType::RuntimeError,
            ToolsApiError::Bridge(BridgeError::Timeout(_)) => ExcType::TimeoutError,
            ToolsApiError::Bridge(_) => ExcType::RuntimeError,
        };
        ScriptException::new(exc_type, err.to_string())
    }
}

struct ToolsApiInner {
    provider: Arc<dyn ToolProvider>,
    context: ExecutionContext,
    allowed: Option<BTreeSet<String>>,
    deny_all: bool,
    bridge: Arc<AsyncBridge>,
    definitions: tokio::sync::OnceCell<Vec<ToolDefinition>>,
}

/// Policy-checked tool access for scripts. Cheap to clone.
#[derive(Clone)]
pub struct ToolsApi {
    inner: Arc<ToolsApiInner>,
}

impl fmt::Debug for ToolsApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolsApi")
            .field("allowed", &self.inner.allowed)
            .field("deny_all", &self.inner.deny_all)
            .finish_non_exhaustive()
    }
}

impl ToolsApi {
    /// Tools from `provider`, filtered by `allowed` (when set) or hidden
    /// entirely by `deny_all`.
    pub fn new(
        provider: Arc<dyn ToolProvider>,
        context: ExecutionContext,
        allowed: Option<BTreeSet<String>>,
        deny_all: bool,
        bridge: Arc<AsyncBridge>,
    ) -> Self {
        Self {
            inner: Arc::new(ToolsApiInner {
                provider,
                context,
                allowed,
                deny_all,
                bridge,
                definitions: tokio::sync::OnceCell::new(),
            }),
        }
    }

    /// Whether policy permits `name`.
    pub fn is_allowed(&self, name: &str) -> bool {
        if self.inner.deny_all {
            return false;
        }
        match &self.inner.allowed {
            Some(allowed) => allowed.contains(name),
            None => true,
        }
    }

    async fn all_definitions(&self) -> Result<&[ToolDefinition], ToolsApiError> {
        let definitions = self
            .inner
            .definitions
            .get_or_try_init(|| async {
                self.inner
                    .provider
                    .get_tool_definitions()
                    .await
                    .map_err(|e| ToolsApiError::Execution {
                        tool: "tools_list".to_string(),
                        message: e.to_string(),
                    })
            })
            .await?;
        Ok(definitions.as_slice())
    }

    /// Visible tool definitions. Fetched from the provider once per instance.
    pub async fn list_tools_async(&self) -> Result<Vec<ToolDefinition>, ToolsApiError> {
        if self.inner.deny_all {
            return Ok(Vec::new());
        }
        Ok(self
            .all_definitions()
            .await?
            .iter()
            .filter(|def| self.is_allowed(&def.name))
            .cloned()
            .collect())
    }

    /// Visible definition for `name`.
    pub async fn get_tool_async(
        &self,
        name: &str,
    ) -> Result<Option<ToolDefinition>, ToolsApiError> {
        if !self.is_allowed(name) {
            return Ok(None);
        }
        Ok(self
            .all_definitions()
            .await?
            .iter()
            .find(|def| def.name == name)
            .cloned())
    }

    /// Blocking form of [`list_tools_async`](Self::list_tools_async).
    pub fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolsApiError> {
        let this = self.clone();
        self.inner
            .bridge
            .block_on(async move { this.list_tools_async().await })?
    }

    /// Blocking form of [`get_tool_async`](Self::get_tool_async).
    pub fn get_tool(&self, name: &str) -> Result<Option<ToolDefinition>, ToolsApiError> {
        let this = self.clone();
        let name = name.to_string();
        self.inner
            .bridge
            .block_on(async move { this.get_tool_async(&name).await })?
    }

    fn check_permission(&self, name: &str) -> Result<(), ToolsApiError> {
        if self.is_allowed(name) {
            return Ok(());
        }
        warn!(
            target: "security",
            tool = name,
            conversation_id = %self.inner.context.conversation_id,
            "script attempted to call a tool that is not allowed"
        );
        Err(ToolsApiError::PermissionDenied(name.to_string()))
    }

    /// Execute `name` with script arguments. Positional arguments fill the
    /// tool's required parameters in order; extras are dropped.
    pub async fn execute_async(
        &self,
        name: &str,
        args: Vec<Object>,
        kwargs: Vec<(String, Object)>,
    ) -> Result<String, ToolsApiError> {
        self.check_permission(name)?;
        let definition = if args.is_empty() {
            None
        } else {
            self.get_tool_async(name).await?
        };
        let arguments = resolve_arguments(name, definition.as_ref(), args, kwargs)?;
        self.execute_with_arguments(name, arguments).await
    }

    /// Execute `name` with an already-built argument map.
    pub async fn execute_with_arguments(
        &self,
        name: &str,
        arguments: ToolArguments,
    ) -> Result<String, ToolsApiError> {
        self.check_permission(name)?;
        debug!(tool = name, "executing tool from script");
        self.inner
            .provider
            .execute_tool(name, arguments, &self.inner.context)
            .await
            .map(|output| output.into_text())
            .map_err(|err| ToolsApiError::Execution {
                tool: name.to_string(),
                message: match err {
                    ToolError::Execution(message) => message,
                    other => other.to_string(),
                },
            })
    }

    /// Execute with arguments given as a JSON object string.
    pub async fn execute_json_async(
        &self,
        name: &str,
        args_json: &str,
    ) -> Result<String, ToolsApiError> {
        self.check_permission(name)?;
        let arguments = match serde_json::from_str::<JsonValue>(args_json) {
            Ok(JsonValue::Object(map)) => map,
            Ok(other) => {
                return Err(ToolsApiError::InvalidArguments {
                    tool: name.to_string(),
                    message: format!("expected a JSON object, got {other}"),
                });
            }
            Err(e) => {
                return Err(ToolsApiError::InvalidArguments {
                    tool: name.to_string(),
                    message: e.to_string(),
                });
            }
        };
        self.execute_with_arguments(name, arguments).await
    }

    /// Blocking form of [`execute_async`](Self::execute_async).
    pub fn execute(
        &self,
        name: &str,
        args: Vec<Object>,
        kwargs: Vec<(String, Object)>,
    ) -> Result<String, ToolsApiError> {
        let this = self.clone();
        let name = name.to_string();
        self.inner
            .bridge
            .block_on(async move { this.execute_async(&name, args, kwargs).await })?
    }
}

/// Map positional arguments onto the required parameters of `definition`.
pub fn resolve_arguments(
    tool: &str,
    definition: Option<&ToolDefinition>,
    args: Vec<Object>,
    kwargs: Vec<(String, Object)>,
) -> Result<ToolArguments, ToolsApiError> {
    let invalid = |err: ScriptException| ToolsApiError::InvalidArguments {
        tool: tool.to_string(),
        message: err.message,
    };
    let required = definition.map(ToolDefinition::required_params).unwrap_or_default();
    let mut arguments = ToolArguments::new();
    let supplied = args.len();
    for (index, value) in args.into_iter().enumerate() {
        match required.get(index) {
            Some(param) => {
                arguments.insert(param.clone(), value.to_json().map_err(invalid)?);
            }
            None => {
                warn!(
                    tool,
                    supplied,
                    accepted = required.len(),
                    "dropping extra positional arguments for tool"
                );
                break;
            }
        }
    }
    for (key, value) in kwargs {
        arguments.insert(key, value.to_json().map_err(invalid)?);
    }
    Ok(arguments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{LocalToolProvider, ToolOutput};
    use serde_json::json;

    fn provider() -> Arc<dyn ToolProvider> {
        let schema = json!({
            "type": "object",
            "properties": {"text": {"type": "string"}, "times": {"type": "integer"}},
            "required": ["text"]
        });
        Arc::new(
            LocalToolProvider::new()
                .with_tool(
                    ToolDefinition::new("a", "tool a", schema.clone()),
                    |args, _| async move { Ok(ToolOutput::Json(JsonValue::Object(args))) },
                )
                .with_tool(ToolDefinition::new("b", "tool b", schema), |_, _| async move {
                    Ok(ToolOutput::Text("b ran".into()))
                }),
        )
    }

    fn api(allowed: Option<&[&str]>, deny_all: bool) -> ToolsApi {
        ToolsApi::new(
            provider(),
            ExecutionContext::new("c"),
            allowed.map(|names| names.iter().map(|n| n.to_string()).collect()),
            deny_all,
            Arc::new(AsyncBridge::current(Duration::from_secs(5))),
        )
    }

    #[test]
    fn positional_arguments_follow_required_order() {
        let def = ToolDefinition::new("echo", "", json!({"required": ["text", "lang"]}));
        let args = resolve_arguments(
            "echo",
            Some(&def),
            vec![Object::from("hi"), Object::from("en"), Object::from("extra")],
            vec![("loud".to_string(), Object::Bool(true))],
        )
        .expect("resolve");
        assert_eq!(JsonValue::Object(args), json!({"text": "hi", "lang": "en", "loud": true}));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn allow_list_filters_and_denies() {
        let api = api(Some(&["a"]), false);
        let names: Vec<String> = api
            .list_tools_async()
            .await
            .expect("list")
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["a"]);
        let ok = api
            .execute_async("a", vec![Object::from("x")], vec![])
            .await
            .expect("a allowed");
        assert_eq!(ok, r#"{"text":"x"}"#);
        let err = api.execute_async("b", vec![], vec![]).await.expect_err("b denied");
        assert_eq!(err, ToolsApiError::PermissionDenied("b".into()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deny_all_hides_everything() {
        let api = api(None, true);
        assert!(api.list_tools_async().await.expect("list").is_empty());
        assert!(matches!(
            api.execute_async("a", vec![], vec![]).await,
            Err(ToolsApiError::PermissionDenied(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blocking_calls_from_a_runtime_worker() {
        let api = api(None, false);
        let out = api
            .execute("b", vec![], vec![])
            .expect("blocking execute");
        assert_eq!(out, "b ran");
        assert_eq!(api.list_tools().expect("list").len(), 2);
    }

    #[test]
    fn blocking_calls_without_a_runtime_use_background_runtime() {
        let api = ToolsApi::new(
            provider(),
            ExecutionContext::new("c"),
            None,
            false,
            Arc::new(AsyncBridge::new(None, Duration::from_secs(5))),
        );
        assert_eq!(api.execute("b", vec![], vec![]).expect("execute"), "b ran");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn current_thread_runtime_uses_throwaway_runtime() {
        let bridge = AsyncBridge::current(Duration::from_secs(5));
        assert_eq!(bridge.block_on(async { 41 + 1 }), Ok(42));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn current_thread_runtime_hands_off_to_a_separate_main_runtime() {
        let main = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("main runtime");
        let bridge = AsyncBridge::new(Some(main.handle().clone()), Duration::from_secs(5));
        let ran_on = bridge
            .block_on(async { Handle::current().id() })
            .expect("handed off");
        assert_eq!(ran_on, main.handle().id());
        assert_ne!(ran_on, Handle::current().id());
        main.shutdown_background();
    }

    #[test]
    fn bridge_timeout_is_reported() {
        let bridge = AsyncBridge::new(None, Duration::from_millis(50));
        let result = bridge.block_on(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        assert_eq!(result, Err(BridgeError::Timeout(Duration::from_millis(50))));
    }

    #[test]
    fn errors_map_to_script_exceptions() {
        let exc: ScriptException = ToolsApiError::Execution {
            tool: "a".into(),
            message: "boom".into(),
        }
        .into();
        assert_eq!(exc.exc_type, ExcType::RuntimeError);
        assert_eq!(exc.message, "Error executing tool 'a': boom");
        let exc: ScriptException = ToolsApiError::PermissionDenied("b".into()).into();
        assert_eq!(exc.exc_type, ExcType::PermissionError);
    }
}
