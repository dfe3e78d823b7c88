//! Pause/resume executor.
//!
//! The interpreter runs on its own thread and stops at every external call.
//! Host functions are awaited here on the caller's runtime; only the
//! hand-offs to the interpreter thread go through `spawn_blocking`.

use tokio::task::{JoinError, spawn_blocking};
use tracing::debug;

use super::registry::{CallArgs, FunctionRegistry};
use crate::script::{
    Object, PrintWriter, Program, ResourceLimits, RunError, RunProgress, RunResult,
    ScriptException,
};

fn join_error(err: JoinError) -> RunError {
    RunError::Internal(format!("interpreter hand-off failed: {err}"))
}

/// Run `program` to completion, serving its external calls from `registry`.
///
/// Dropping the returned future abandons the run: the interpreter thread
/// unwinds once it next asks for a result.
pub(crate) async fn drive(
    program: &Program,
    inputs: Vec<(String, Object)>,
    limits: ResourceLimits,
    printer: Box<dyn PrintWriter + Send>,
    registry: &FunctionRegistry,
) -> RunResult<Object> {
    let start = program.clone();
    let mut progress = spawn_blocking(move || start.start(inputs, limits, printer))
        .await
        .map_err(join_error)??;
    loop {
        match progress {
            RunProgress::Complete(value) => return Ok(value),
            RunProgress::FunctionCall {
                function_name,
                args,
                kwargs,
                snapshot,
            } => {
                let result = match registry.get(&function_name) {
                    Some(function) => {
                        debug!(
                            function = %function_name,
                            is_async = function.is_async(),
                            "dispatching external call"
                        );
                        function
                            .call(CallArgs::new(function_name, args, kwargs))
                            .await
                    }
                    None => Err(ScriptException::name_error(&function_name)),
                };
                progress = spawn_blocking(move || snapshot.resume(result.into()))
                    .await
                    .map_err(join_error)??;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::Globals;
    use crate::script::{ExcType, NoPrint};

    #[tokio::test]
    async fn serves_sync_and_async_calls() {
        let globals = Globals::new()
            .function("double", |call| Ok(Object::Int(call.int(0, "x")? * 2)))
            .async_function("later", |call| async move {
                tokio::task::yield_now().await;
                Ok(Object::Int(call.int(0, "x")? + 1))
            });
        let registry = FunctionRegistry::from_globals(globals);
        let program = Program::new(
            "later(double(20))",
            registry.input_names(),
            registry.function_names(),
        )
        .expect("parse");
        let value = drive(&program, vec![], ResourceLimits::default(), Box::new(NoPrint), &registry)
            .await
            .expect("run");
        assert_eq!(value, Object::Int(41));
    }

    #[tokio::test]
    async fn host_exceptions_are_catchable() {
        let globals = Globals::new().function("boom", |_| {
            Err(ScriptException::value_error("bad input"))
        });
        let registry = FunctionRegistry::from_globals(globals);
        let source = "try:\n    boom()\n    r = 'no'\nexcept ValueError as e:\n    r = str(e)\nr";
        let program = Program::new(source, registry.input_names(), registry.function_names())
            .expect("parse");
        let value = drive(&program, vec![], ResourceLimits::default(), Box::new(NoPrint), &registry)
            .await
            .expect("run");
        assert_eq!(value, Object::from("bad input"));
    }

    #[tokio::test]
    async fn undeclared_external_raises_name_error() {
        let registry = FunctionRegistry::from_globals(Globals::new());
        let program = Program::new("ghost()", Vec::<String>::new(), ["ghost"]).expect("parse");
        let err = drive(&program, vec![], ResourceLimits::default(), Box::new(NoPrint), &registry)
            .await
            .expect_err("name error");
        let RunError::Exception { exception, .. } = err else {
            panic!("expected an exception, got {err:?}");
        };
        assert_eq!(exception.exc_type, ExcType::NameError);
    }
}
