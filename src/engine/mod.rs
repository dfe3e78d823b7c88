//! Script engine: compiles a script against a per-invocation function
//! registry and runs it, synchronously or on the async pause/resume path.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

pub mod attachments_api;
mod executor;
pub mod json_api;
pub mod registry;
pub mod time_api;
pub mod wake;

pub use registry::{CallArgs, FunctionRegistry, Global, Globals, HostFunction, HostResult};
pub use wake::{WakeQueue, WakeRequest};

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::script::{
    ExternalCaller, ExternalResult, INTERPRETER_STACK_SIZE, Object, ParseError, PrintWriter,
    Program, ResourceLimits, RunError, ScriptException,
};
use crate::tools::AsyncBridge;

/// Why an evaluation failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    /// The script does not parse.
    #[error("syntax error{}: {message}", at_line(.line))]
    Syntax {
        /// Parser message.
        message: String,
        /// 1-based line, when known.
        line: Option<usize>,
    },

    /// The script raised, or the interpreter failed while running it.
    #[error("script execution failed: {message}")]
    Execution {
        /// Underlying message.
        message: String,
        /// Script traceback, when the failure was a script exception.
        traceback: Option<String>,
    },

    /// The configured execution time was exceeded.
    #[error("script execution timed out after {limit:?}")]
    Timeout {
        /// Configured limit.
        limit: Duration,
    },
}

fn at_line(line: &Option<usize>) -> String {
    line.map(|l| format!(" at line {l}")).unwrap_or_default()
}

impl From<ParseError> for ScriptError {
    fn from(err: ParseError) -> Self {
        ScriptError::Syntax {
            message: err.message,
            line: Some(err.line),
        }
    }
}

impl From<RunError> for ScriptError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Exception {
                exception,
                traceback,
            } => ScriptError::Execution {
                message: exception.summary(),
                traceback: Some(traceback),
            },
            RunError::Timeout { limit } => ScriptError::Timeout { limit },
            RunError::Inputs(message) | RunError::Internal(message) => ScriptError::Execution {
                message,
                traceback: None,
            },
        }
    }
}

/// Result of an evaluation.
pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

/// Routes `print` output to the log, one record per line.
struct LogPrinter {
    line: String,
    echo: bool,
    emitted: usize,
}

impl LogPrinter {
    fn new(echo: bool) -> Self {
        Self {
            line: String::new(),
            echo,
            emitted: 0,
        }
    }

    fn emit(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        self.emitted += 1;
        info!(target: "script", "{line}");
        if self.echo {
            eprintln!("{line}");
        }
    }
}

impl PrintWriter for LogPrinter {
    fn write(&mut self, text: &str) {
        self.line.push_str(text);
        while let Some(end) = self.line.find('\n') {
            let rest = self.line.split_off(end + 1);
            let line = std::mem::replace(&mut self.line, rest);
            self.emit(line.trim_end_matches('\n'));
        }
    }
}

impl Drop for LogPrinter {
    fn drop(&mut self) {
        let line = std::mem::take(&mut self.line);
        self.emit(&line);
    }
}

/// Serves external calls on the blocking path.
struct BridgeCaller<'a> {
    registry: &'a FunctionRegistry,
    bridge: &'a AsyncBridge,
}

impl ExternalCaller for BridgeCaller<'_> {
    fn call_external(
        &mut self,
        name: &str,
        args: Vec<Object>,
        kwargs: Vec<(String, Object)>,
    ) -> Option<ExternalResult> {
        let result = match self.registry.get(name) {
            Some(function) => {
                debug!(
                    function = %name,
                    is_async = function.is_async(),
                    "dispatching external call"
                );
                function.call_blocking(CallArgs::new(name, args, kwargs), self.bridge)
            }
            None => Err(ScriptException::name_error(name)),
        };
        Some(result.into())
    }
}

/// Evaluates scripts against host-provided functions.
#[derive(Debug)]
pub struct ScriptEngine {
    config: EngineConfig,
    main: Option<Handle>,
    wake_requests: Mutex<Vec<WakeRequest>>,
}

impl ScriptEngine {
    /// Engine bound to the runtime of the calling thread, if there is one.
    /// Async host functions called from [`evaluate`](Self::evaluate) are
    /// scheduled onto that runtime.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_runtime(config, Handle::try_current().ok())
    }

    /// Engine that schedules async host functions onto `main`.
    pub fn with_runtime(config: EngineConfig, main: Option<Handle>) -> Self {
        Self {
            config,
            main,
            wake_requests: Mutex::new(Vec::new()),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Wake requests queued by the most recent evaluation. Draining.
    pub fn take_wake_requests(&self) -> Vec<WakeRequest> {
        std::mem::take(&mut *self.wake_requests.lock())
    }

    fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            max_duration: Some(self.config.max_execution_time()),
            max_recursion_depth: self.config.max_recursion_depth,
        }
    }

    fn publish(&self, queue: &WakeQueue) {
        let requests = queue.drain();
        if !requests.is_empty() {
            debug!(count = requests.len(), "script queued wake requests");
        }
        *self.wake_requests.lock() = requests;
    }

    /// Evaluate `script` and block until it finishes or the configured
    /// execution time runs out.
    ///
    /// Async host functions are driven through an [`AsyncBridge`]. When
    /// called from a multi-threaded runtime the wait happens in
    /// `block_in_place`. On timeout the interpreter thread is abandoned.
    pub fn evaluate(
        &self,
        script: &str,
        globals: Globals,
        context: &ExecutionContext,
    ) -> ScriptResult<Object> {
        self.wake_requests.lock().clear();
        let queue = WakeQueue::default();
        let outcome = match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| {
                    self.evaluate_blocking(script, globals, context, self.main.clone(), &queue)
                })
            }
            Ok(current) => {
                // Scheduling onto the current-thread runtime we are blocking would deadlock.
                let main = self.main.clone().filter(|main| main.id() != current.id());
                self.evaluate_blocking(script, globals, context, main, &queue)
            }
            Err(_) => self.evaluate_blocking(script, globals, context, self.main.clone(), &queue),
        };
        self.publish(&queue);
        outcome
    }

    fn evaluate_blocking(
        &self,
        script: &str,
        globals: Globals,
        context: &ExecutionContext,
        main: Option<Handle>,
        queue: &WakeQueue,
    ) -> ScriptResult<Object> {
        let bridge = Arc::new(AsyncBridge::new(main, self.config.bridge_timeout()));
        let registry = bridge
            .block_on(FunctionRegistry::build(
                globals,
                context.clone(),
                self.config.clone(),
                bridge.clone(),
                queue.clone(),
            ))
            .map_err(|err| ScriptError::Execution {
                message: format!("failed to build external functions: {err}"),
                traceback: None,
            })?;
        let program = Program::new(script, registry.input_names(), registry.function_names())?;
        let registry = Arc::new(registry);
        let limits = self.limits();
        let limit = self.config.max_execution_time();
        let echo = self.config.debug_print;

        let (done_tx, done_rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("script-interpreter".to_string())
            .stack_size(INTERPRETER_STACK_SIZE)
            .spawn(move || {
                let mut caller = BridgeCaller {
                    registry: &registry,
                    bridge: &bridge,
                };
                let mut printer = LogPrinter::new(echo);
                let result = program.run(registry.inputs(), &limits, &mut caller, &mut printer);
                drop(printer);
                // Nobody is listening once the caller has timed out.
                let _ = done_tx.send(result);
            })
            .map_err(|err| ScriptError::Execution {
                message: format!("failed to spawn interpreter thread: {err}"),
                traceback: None,
            })?;

        match done_rx.recv_timeout(limit) {
            Ok(result) => result.map_err(ScriptError::from),
            Err(RecvTimeoutError::Timeout) => {
                warn!(limit = ?limit, "script evaluation timed out, abandoning interpreter thread");
                Err(ScriptError::Timeout { limit })
            }
            Err(RecvTimeoutError::Disconnected) => Err(ScriptError::Execution {
                message: "interpreter thread panicked".to_string(),
                traceback: None,
            }),
        }
    }

    /// Evaluate `script` without blocking the runtime.
    ///
    /// The whole evaluation, host calls included, is bounded by the
    /// configured execution time. On timeout the interpreter thread is
    /// abandoned rather than stopped.
    pub async fn evaluate_async(
        &self,
        script: &str,
        globals: Globals,
        context: &ExecutionContext,
    ) -> ScriptResult<Object> {
        self.wake_requests.lock().clear();
        let queue = WakeQueue::default();
        let limit = self.config.max_execution_time();
        let run = self.run_async(script, globals, context, &queue);
        let outcome = match tokio::time::timeout(limit, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(limit = ?limit, "script evaluation timed out");
                Err(ScriptError::Timeout { limit })
            }
        };
        self.publish(&queue);
        outcome
    }

    async fn run_async(
        &self,
        script: &str,
        globals: Globals,
        context: &ExecutionContext,
        queue: &WakeQueue,
    ) -> ScriptResult<Object> {
        let bridge = Arc::new(AsyncBridge::current(self.config.bridge_timeout()));
        let registry = FunctionRegistry::build(
            globals,
            context.clone(),
            self.config.clone(),
            bridge,
            queue.clone(),
        )
        .await;
        let program = Program::new(script, registry.input_names(), registry.function_names())?;
        let printer = Box::new(LogPrinter::new(self.config.debug_print));
        let inputs = registry.inputs();
        executor::drive(&program, inputs, self.limits(), printer, &registry)
            .await
            .map_err(ScriptError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seconds: f64) -> EngineConfig {
        EngineConfig {
            max_execution_time_secs: seconds,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn print_is_split_into_lines() {
        let mut printer = LogPrinter::new(false);
        printer.write("a");
        printer.write(" ");
        printer.write("b\nc");
        assert_eq!(printer.line, "c");
        assert_eq!(printer.emitted, 1);
        printer.write("\n");
        assert!(printer.line.is_empty());
        assert_eq!(printer.emitted, 2);
        printer.write("\n");
        printer.write("\n\n");
        assert_eq!(printer.emitted, 2);
    }

    #[test]
    fn syntax_errors_carry_the_line() {
        let engine = ScriptEngine::new(config(5.0));
        let err = engine
            .evaluate("x = 1\ny = (\n", Globals::new(), &ExecutionContext::new("c"))
            .expect_err("syntax");
        let ScriptError::Syntax { line, .. } = err else {
            panic!("expected a syntax error, got {err:?}");
        };
        assert!(line.is_some());
    }

    #[test]
    fn evaluate_without_runtime() {
        let engine = ScriptEngine::new(config(5.0));
        let globals = Globals::new()
            .value("name", "world")
            .async_function("shout", |call| async move {
                Ok(Object::Str(call.str(0, "text")?.to_uppercase()))
            });
        let value = engine
            .evaluate("shout(f'hello {name}')", globals, &ExecutionContext::new("c"))
            .expect("run");
        assert_eq!(value, Object::from("HELLO WORLD"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn evaluate_inside_current_thread_runtime() {
        let engine = ScriptEngine::new(config(5.0));
        let globals = Globals::new().async_function("tick", |_| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Object::Int(1))
        });
        let value = engine
            .evaluate("tick() + tick()", globals, &ExecutionContext::new("c"))
            .expect("run");
        assert_eq!(value, Object::Int(2));
    }

    #[tokio::test]
    async fn script_exceptions_become_execution_errors() {
        let engine = ScriptEngine::new(config(5.0));
        let err = engine
            .evaluate_async(
                "def f():\n    raise ValueError('nope')\nf()",
                Globals::new(),
                &ExecutionContext::new("c"),
            )
            .await
            .expect_err("raises");
        let ScriptError::Execution { message, traceback } = err else {
            panic!("expected an execution error, got {err:?}");
        };
        assert_eq!(message, "ValueError: nope");
        assert!(traceback.is_some_and(|tb| tb.contains("in f")));
    }
}
