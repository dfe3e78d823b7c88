//! `wake_llm`: scripts ask for the assistant to be woken with some context.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use super::registry::{CallArgs, HostFunction};
use crate::script::{Object, ScriptException};

/// One queued wake request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeRequest {
    /// Context payload. An `attachments` entry, when present, holds attachment UUIDs.
    pub context: Map<String, JsonValue>,
    /// Whether the triggering event should be attached to the wake-up.
    pub include_event: bool,
}

/// Per-invocation queue of wake requests.
#[derive(Debug, Clone, Default)]
pub struct WakeQueue(Arc<Mutex<Vec<WakeRequest>>>);

impl WakeQueue {
    /// Append a request.
    pub fn push(&self, request: WakeRequest) {
        self.0.lock().push(request);
    }

    /// Remove and return everything queued.
    pub fn drain(&self) -> Vec<WakeRequest> {
        std::mem::take(&mut *self.0.lock())
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

fn validate_attachments(context: &Map<String, JsonValue>) -> Result<(), ScriptException> {
    let Some(attachments) = context.get("attachments") else {
        return Ok(());
    };
    let JsonValue::Array(ids) = attachments else {
        return Err(ScriptException::value_error(
            "wake_llm() 'attachments' must be a list of attachment IDs",
        ));
    };
    for id in ids {
        match id.as_str() {
            Some(text) if Uuid::parse_str(text).is_ok() => {}
            _ => {
                return Err(ScriptException::value_error(format!(
                    "Invalid attachment ID: {id}"
                )));
            }
        }
    }
    Ok(())
}

/// Build the `wake_llm(context, include_event=True)` function over `queue`.
pub fn wake_llm(queue: WakeQueue) -> HostFunction {
    HostFunction::sync(move |call: CallArgs| {
        let context = call.required(0, "context")?;
        let Object::Dict(_) = context else {
            return Err(ScriptException::type_error(format!(
                "wake_llm() context must be a dict, not {}",
                context.type_name()
            )));
        };
        let JsonValue::Object(context) = context.to_json()? else {
            return Err(ScriptException::type_error("wake_llm() context must be a dict"));
        };
        validate_attachments(&context)?;
        let include_event = call.opt_bool(1, "include_event")?.unwrap_or(true);
        queue.push(WakeRequest {
            context,
            include_event,
        });
        Ok(Object::None)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ExcType;

    fn call(queue: &WakeQueue, args: Vec<Object>) -> Result<Object, ScriptException> {
        let HostFunction::Sync(f) = wake_llm(queue.clone()) else {
            panic!("expected a sync function");
        };
        f(CallArgs::new("wake_llm", args, vec![]))
    }

    #[test]
    fn queues_requests() {
        let queue = WakeQueue::default();
        let ctx = Object::dict([("message", Object::from("x"))]);
        call(&queue, vec![ctx.clone()]).expect("first");
        call(&queue, vec![ctx, Object::Bool(false)]).expect("second");
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(drained[0].include_event);
        assert!(!drained[1].include_event);
        assert!(queue.is_empty());
    }

    #[test]
    fn rejects_invalid_attachment_ids() {
        let queue = WakeQueue::default();
        let bad = Object::dict([("attachments", Object::List(vec![Object::from("not-a-uuid")]))]);
        let err = call(&queue, vec![bad]).expect_err("invalid id");
        assert_eq!(err.exc_type, ExcType::ValueError);
        assert!(queue.is_empty());

        let good = Object::dict([(
            "attachments",
            Object::List(vec![Object::from(Uuid::new_v4().to_string())]),
        )]);
        call(&queue, vec![good]).expect("valid id");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn context_must_be_a_dict() {
        let err = call(&WakeQueue::default(), vec![Object::from("hi")]).expect_err("type");
        assert_eq!(err.exc_type, ExcType::TypeError);
    }
}
