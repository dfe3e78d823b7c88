//! Compiled programs and the two ways of running them.
//!
//! [`Program::run`] executes to completion on the calling thread and answers
//! external calls through an [`ExternalCaller`]. [`Program::start`] moves the
//! interpreter onto its own thread and hands every external call back to the
//! host as a [`RunProgress::FunctionCall`] carrying a [`Snapshot`]; the
//! snapshot is resumed exactly once with the call's outcome.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use super::ast::Stmt;
use super::exception::ScriptException;
use super::interp::{Interpreter, Raised, Unwind};
use super::object::Object;
use super::parser::{ParseError, parse_module};
use super::value::Value;

/// Stack size for interpreter threads. Deep recursion in scripts maps onto
/// native recursion in the evaluator.
pub const INTERPRETER_STACK_SIZE: usize = 32 * 1024 * 1024;

/// Receives text written by `print`.
pub trait PrintWriter {
    /// Append `text` to the output. Separators and line ends arrive as separate writes.
    fn write(&mut self, text: &str);
}

/// Discards all output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write(&mut self, _text: &str) {}
}

/// Collects output into a string.
#[derive(Debug, Default, Clone)]
pub struct CollectPrint(pub String);

impl PrintWriter for CollectPrint {
    fn write(&mut self, text: &str) {
        self.0.push_str(text);
    }
}

/// Outcome of a host-provided function, fed back into the script.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalResult {
    /// The call returned a value.
    Return(Object),
    /// The call raised; scripts can catch this.
    Raise(ScriptException),
}

impl From<Result<Object, ScriptException>> for ExternalResult {
    fn from(result: Result<Object, ScriptException>) -> Self {
        match result {
            Ok(value) => ExternalResult::Return(value),
            Err(exc) => ExternalResult::Raise(exc),
        }
    }
}

/// Serves external function calls for [`Program::run`].
pub trait ExternalCaller {
    /// Call `name`. Returning `None` abandons the run.
    fn call_external(
        &mut self,
        name: &str,
        args: Vec<Object>,
        kwargs: Vec<(String, Object)>,
    ) -> Option<ExternalResult>;
}

/// Limits applied to a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    /// Wall-clock budget measured from the start of the run.
    pub max_duration: Option<Duration>,
    /// Maximum depth of nested script function calls.
    pub max_recursion_depth: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_duration: None,
            max_recursion_depth: 200,
        }
    }
}

/// Errors from running a program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    /// The script raised and did not catch.
    #[error("{}", exception.summary())]
    Exception {
        /// The uncaught exception.
        exception: ScriptException,
        /// Python-style traceback text.
        traceback: String,
    },

    /// The wall-clock limit was exceeded.
    #[error("execution exceeded time limit of {limit:?}")]
    Timeout {
        /// Configured limit.
        limit: Duration,
    },

    /// Supplied inputs do not match the declared input names.
    #[error("invalid inputs: {0}")]
    Inputs(String),

    /// The interpreter thread or host protocol failed.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for program execution.
pub type RunResult<T> = std::result::Result<T, RunError>;

/// A parsed script together with the names it may reference from the host.
#[derive(Clone)]
pub struct Program {
    body: Arc<Vec<Stmt>>,
    input_names: Arc<Vec<String>>,
    externals: Arc<HashSet<String>>,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("statements", &self.body.len())
            .field("input_names", &self.input_names)
            .field("externals", &self.externals)
            .finish()
    }
}

impl Program {
    /// Parse `source`. Inputs become globals; external names resolve to host calls.
    pub fn new<I, E>(
        source: &str,
        input_names: I,
        external_functions: E,
    ) -> Result<Self, ParseError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        let body = parse_module(source)?;
        Ok(Self {
            body: Arc::new(body),
            input_names: Arc::new(input_names.into_iter().map(Into::into).collect()),
            externals: Arc::new(external_functions.into_iter().map(Into::into).collect()),
        })
    }

    /// Declared input names.
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Declared external function names.
    pub fn external_functions(&self) -> impl Iterator<Item = &str> {
        self.externals.iter().map(String::as_str)
    }

    fn check_inputs(&self, inputs: &[(String, Object)]) -> RunResult<()> {
        for (name, _) in inputs {
            if !self.input_names.contains(name) {
                return Err(RunError::Inputs(format!("'{name}' is not a declared input")));
            }
        }
        for name in self.input_names.iter() {
            if !inputs.iter().any(|(n, _)| n == name) {
                return Err(RunError::Inputs(format!("missing input '{name}'")));
            }
        }
        Ok(())
    }

    /// Run to completion on the current thread.
    pub fn run(
        &self,
        inputs: Vec<(String, Object)>,
        limits: &ResourceLimits,
        caller: &mut dyn ExternalCaller,
        printer: &mut dyn PrintWriter,
    ) -> RunResult<Object> {
        self.check_inputs(&inputs)?;
        let deadline = limits.max_duration.map(|d| Instant::now() + d);
        let mut interp = Interpreter::new(
            &self.externals,
            caller,
            printer,
            deadline,
            limits.max_recursion_depth,
        );
        for (name, value) in &inputs {
            interp.set_global(name, Value::from_object(value));
        }
        let outcome = interp.run_module(&self.body);
        match outcome {
            Ok(value) => Ok(value.to_object()),
            Err(unwind) => Err(unwind_to_error(unwind, limits)),
        }
    }

    /// Start running on a dedicated thread, pausing at each external call.
    pub fn start(
        &self,
        inputs: Vec<(String, Object)>,
        limits: ResourceLimits,
        printer: Box<dyn PrintWriter + Send>,
    ) -> RunResult<RunProgress> {
        self.check_inputs(&inputs)?;
        let (event_tx, event_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        let program = self.clone();
        thread::Builder::new()
            .name("script-interpreter".to_string())
            .stack_size(INTERPRETER_STACK_SIZE)
            .spawn(move || {
                let mut caller = ChannelCaller {
                    events: event_tx.clone(),
                    resumes: resume_rx,
                };
                let mut printer = printer;
                let result = program.run(inputs, &limits, &mut caller, printer.as_mut());
                // The host may have stopped listening.
                let _ = event_tx.send(Event::Done(result));
            })
            .map_err(|e| RunError::Internal(format!("failed to spawn interpreter thread: {e}")))?;
        next_progress(Channels {
            events: event_rx,
            resumes: resume_tx,
        })
    }
}

fn unwind_to_error(unwind: Unwind, limits: &ResourceLimits) -> RunError {
    match unwind {
        Unwind::Raise(raised) => {
            let traceback = format_traceback(&raised);
            RunError::Exception {
                exception: raised.exc,
                traceback,
            }
        }
        Unwind::Timeout => RunError::Timeout {
            limit: limits.max_duration.unwrap_or_default(),
        },
        Unwind::Abandoned => {
            RunError::Internal("external call was abandoned by the host".to_string())
        }
    }
}

/// Identical consecutive frames shown before the rest are summarised.
const REPEATED_FRAMES_SHOWN: usize = 3;

fn format_traceback(raised: &Raised) -> String {
    fn note_repeats(out: &mut String, repeats: usize) {
        if repeats > REPEATED_FRAMES_SHOWN {
            let more = repeats - REPEATED_FRAMES_SHOWN;
            out.push_str(&format!("  [Previous line repeated {more} more times]\n"));
        }
    }

    let mut out = String::from("Traceback (most recent call last):\n");
    let mut previous: Option<&(String, usize)> = None;
    let mut repeats = 0;
    for frame in raised.trace.iter().flatten() {
        if previous == Some(frame) {
            repeats += 1;
        } else {
            note_repeats(&mut out, repeats);
            previous = Some(frame);
            repeats = 1;
        }
        if repeats <= REPEATED_FRAMES_SHOWN {
            let (function, line) = frame;
            out.push_str(&format!("  File \"<script>\", line {line}, in {function}\n"));
        }
    }
    note_repeats(&mut out, repeats);
    out.push_str(&raised.exc.summary());
    out
}

enum Event {
    Call {
        name: String,
        args: Vec<Object>,
        kwargs: Vec<(String, Object)>,
    },
    Done(RunResult<Object>),
}

struct ChannelCaller {
    events: Sender<Event>,
    resumes: Receiver<ExternalResult>,
}

impl ExternalCaller for ChannelCaller {
    fn call_external(
        &mut self,
        name: &str,
        args: Vec<Object>,
        kwargs: Vec<(String, Object)>,
    ) -> Option<ExternalResult> {
        let event = Event::Call {
            name: name.to_string(),
            args,
            kwargs,
        };
        self.events.send(event).ok()?;
        // A dropped snapshot closes the channel and unwinds the interpreter.
        self.resumes.recv().ok()
    }
}

struct Channels {
    events: Receiver<Event>,
    resumes: Sender<ExternalResult>,
}

fn next_progress(channels: Channels) -> RunResult<RunProgress> {
    match channels.events.recv() {
        Ok(Event::Call { name, args, kwargs }) => {
            debug!(function = %name, "script paused at external call");
            Ok(RunProgress::FunctionCall {
                function_name: name,
                args,
                kwargs,
                snapshot: Snapshot { channels },
            })
        }
        Ok(Event::Done(result)) => result.map(RunProgress::Complete),
        Err(_) => Err(RunError::Internal("interpreter thread exited unexpectedly".to_string())),
    }
}

/// State of a run started with [`Program::start`].
#[derive(Debug)]
pub enum RunProgress {
    /// The script called a host function and is waiting for its result.
    FunctionCall {
        /// Name the script called.
        function_name: String,
        /// Positional arguments.
        args: Vec<Object>,
        /// Keyword arguments in call order.
        kwargs: Vec<(String, Object)>,
        /// Handle used to continue the run.
        snapshot: Snapshot,
    },
    /// The script finished with this value.
    Complete(Object),
}

/// A paused run. Dropping it abandons the interpreter thread.
pub struct Snapshot {
    channels: Channels,
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot").finish_non_exhaustive()
    }
}

impl Snapshot {
    /// Continue with the outcome of the pending call. Blocks until the next
    /// pause or completion.
    pub fn resume(self, result: ExternalResult) -> RunResult<RunProgress> {
        self.channels
            .resumes
            .send(result)
            .map_err(|_| RunError::Internal("interpreter thread is gone".to_string()))?;
        next_progress(self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::exception::ExcType;

    struct Doubler {
        calls: Vec<String>,
    }

    impl ExternalCaller for Doubler {
        fn call_external(
            &mut self,
            name: &str,
            args: Vec<Object>,
            _kwargs: Vec<(String, Object)>,
        ) -> Option<ExternalResult> {
            self.calls.push(name.to_string());
            match (name, args.first()) {
                ("double", Some(Object::Int(n))) => {
                    Some(ExternalResult::Return(Object::Int(n * 2)))
                }
                _ => Some(ExternalResult::Raise(ScriptException::new(
                    ExcType::ValueError,
                    format!("bad call to {name}"),
                ))),
            }
        }
    }

    fn run(source: &str, inputs: Vec<(String, Object)>) -> RunResult<Object> {
        let names: Vec<String> = inputs.iter().map(|(n, _)| n.clone()).collect();
        let program = Program::new(source, names, ["double", "explode"]).expect("parse");
        let mut caller = Doubler { calls: Vec::new() };
        program.run(inputs, &ResourceLimits::default(), &mut caller, &mut NoPrint)
    }

    #[test]
    fn final_expression_is_the_result() {
        assert_eq!(run("x = 20\nx + 1", vec![]), Ok(Object::Int(21)));
        assert_eq!(run("x = 20", vec![]), Ok(Object::None));
    }

    #[test]
    fn external_calls_use_the_caller() {
        let result = run("double(x)", vec![("x".to_string(), Object::Int(21))]);
        assert_eq!(result, Ok(Object::Int(42)));
    }

    #[test]
    fn external_errors_are_catchable() {
        let source = "try:\n    explode()\nexcept ValueError as e:\n    r = str(e)\nr";
        assert_eq!(run(source, vec![]), Ok(Object::Str("bad call to explode".to_string())));
    }

    #[test]
    fn uncaught_exception_carries_traceback() {
        let source = "def f():\n    raise ValueError('boom')\nf()";
        match run(source, vec![]) {
            Err(RunError::Exception { exception, traceback }) => {
                assert_eq!(exception.exc_type, ExcType::ValueError);
                assert!(traceback.starts_with("Traceback (most recent call last):"));
                assert!(traceback.contains("line 2, in f"), "{traceback}");
                assert!(traceback.ends_with("ValueError: boom"), "{traceback}");
            }
            other => panic!("expected exception, got {other:?}"),
        }
    }

    #[test]
    fn deep_recursion_traceback_collapses_repeats() {
        let program = Program::new(
            "def f(n):\n    return f(n + 1)\nf(0)",
            Vec::<String>::new(),
            Vec::<String>::new(),
        )
        .expect("parse");
        let limits = ResourceLimits {
            max_recursion_depth: 20,
            ..ResourceLimits::default()
        };
        match program.run(vec![], &limits, &mut Doubler { calls: vec![] }, &mut NoPrint) {
            Err(RunError::Exception { exception, traceback }) => {
                assert_eq!(exception.exc_type, ExcType::RecursionError);
                assert!(traceback.contains("more times]"), "{traceback}");
                assert_eq!(traceback.matches("line 2, in f").count(), 3, "{traceback}");
                assert!(traceback.lines().count() < 10, "{traceback}");
            }
            other => panic!("expected RecursionError, got {other:?}"),
        }
    }

    #[test]
    fn oversized_results_raise_memory_error() {
        let sources = [
            "f'{1:>99999999999}'",
            "'a'.center(10**12)",
            "'a'.ljust(10**12)",
            "'a'.zfill(10**12)",
            "'%5000000000d' % 1",
            "list(range(10**11))",
            "tuple(range(10**11))",
            "sorted(range(10**11))",
            "'ab' * 10**9",
        ];
        for source in sources {
            match run(source, vec![]) {
                Err(RunError::Exception { exception, .. }) => {
                    assert_eq!(exception.exc_type, ExcType::MemoryError, "{source}");
                }
                other => panic!("{source}: expected MemoryError, got {other:?}"),
            }
        }
        let caught = "try:\n    x = 'a'.rjust(10**12)\nexcept MemoryError:\n    x = 'capped'\nx";
        assert_eq!(run(caught, vec![]), Ok(Object::Str("capped".to_string())));
    }

    #[test]
    fn self_referencing_list_prints() {
        let source = "x = [1]\nx.append(x)\nstr(x)";
        assert_eq!(run(source, vec![]), Ok(Object::Str("[1, [...]]".to_string())));
    }

    #[test]
    fn full_width_range_length_overflows() {
        let source = "len(range(-9223372036854775807 - 1, 9223372036854775807))";
        match run(source, vec![]) {
            Err(RunError::Exception { exception, .. }) => {
                assert_eq!(exception.exc_type, ExcType::OverflowError);
            }
            other => panic!("expected OverflowError, got {other:?}"),
        }
        assert_eq!(
            run("range(0, 10**18, 3)[-1]", vec![]),
            Ok(Object::Int(999_999_999_999_999_999))
        );
    }

    #[test]
    fn missing_inputs_are_rejected() {
        let program = Program::new("x", ["x"], Vec::<String>::new()).expect("parse");
        let err = program
            .run(vec![], &ResourceLimits::default(), &mut Doubler { calls: vec![] }, &mut NoPrint)
            .expect_err("missing input");
        assert!(matches!(err, RunError::Inputs(_)));
    }

    #[test]
    fn runaway_loop_times_out() {
        let program =
            Program::new("while True:\n    pass", Vec::<String>::new(), Vec::<String>::new())
                .expect("parse");
        let limits = ResourceLimits {
            max_duration: Some(Duration::from_millis(50)),
            ..ResourceLimits::default()
        };
        let err = program
            .run(vec![], &limits, &mut Doubler { calls: vec![] }, &mut NoPrint)
            .expect_err("timeout");
        assert_eq!(err, RunError::Timeout { limit: Duration::from_millis(50) });
    }

    #[test]
    fn print_output_reaches_the_writer() {
        let program = Program::new(
            "print('a', 1, sep='-')\nprint('b', end='')",
            Vec::<String>::new(),
            Vec::<String>::new(),
        )
        .expect("parse");
        let mut out = CollectPrint::default();
        program
            .run(vec![], &ResourceLimits::default(), &mut Doubler { calls: vec![] }, &mut out)
            .expect("run");
        assert_eq!(out.0, "a-1\nb");
    }

    #[test]
    fn start_pauses_at_each_external_call() {
        let program = Program::new(
            "a = double(1)\nb = double(a)\na + b",
            Vec::<String>::new(),
            ["double"],
        )
        .expect("parse");
        let mut progress = program
            .start(vec![], ResourceLimits::default(), Box::new(NoPrint))
            .expect("start");
        let mut seen = Vec::new();
        loop {
            match progress {
                RunProgress::FunctionCall { function_name, args, snapshot, .. } => {
                    let n = args[0].as_int().expect("int arg");
                    seen.push((function_name, n));
                    progress = snapshot
                        .resume(ExternalResult::Return(Object::Int(n * 2)))
                        .expect("resume");
                }
                RunProgress::Complete(value) => {
                    assert_eq!(value, Object::Int(6));
                    break;
                }
            }
        }
        assert_eq!(seen, vec![("double".to_string(), 1), ("double".to_string(), 2)]);
    }

    #[test]
    fn resumed_exception_propagates_when_uncaught() {
        let program = Program::new("double(1)", Vec::<String>::new(), ["double"]).expect("parse");
        let RunProgress::FunctionCall { snapshot, .. } = program
            .start(vec![], ResourceLimits::default(), Box::new(NoPrint))
            .expect("start")
        else {
            panic!("expected a pause");
        };
        let err = snapshot
            .resume(ExternalResult::Raise(ScriptException::name_error("double")))
            .expect_err("uncaught");
        match err {
            RunError::Exception { exception, .. } => {
                assert_eq!(exception.exc_type, ExcType::NameError)
            }
            other => panic!("expected exception, got {other:?}"),
        }
    }
}
