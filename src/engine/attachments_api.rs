use std::sync::Arc;

use uuid::Uuid;

use super::registry::{CallArgs, HostFunction};
use crate::attachments::{AttachmentError, AttachmentMetadata, AttachmentRegistry, NewAttachment};
use crate::context::ExecutionContext;
use crate::script::{Object, ScriptException};

fn metadata_object(meta: &AttachmentMetadata) -> Object {
    Object::dict([
        ("id", Object::from(meta.id.to_string())),
        ("filename", Object::from(meta.filename.as_str())),
        ("description", Object::from(meta.description.as_str())),
        ("mime_type", Object::from(meta.mime_type.as_str())),
        ("size", Object::Int(meta.size as i64)),
        (
            "conversation_id",
            meta.conversation_id
                .as_deref()
                .map_or(Object::None, Object::from),
        ),
        ("created_at", Object::from(meta.created_at.to_rfc3339())),
    ])
}

fn parse_id(call: &CallArgs) -> Result<Uuid, ScriptException> {
    let raw = call.str(0, "attachment_id")?;
    Uuid::parse_str(raw)
        .map_err(|_| ScriptException::value_error(format!("Invalid attachment ID: {raw}")))
}

fn storage_error(function: &str, err: AttachmentError) -> ScriptException {
    ScriptException::runtime_error(format!("{function}() failed: {err}"))
}

/// `attachment_get`, `attachment_read` and `attachment_create` over `registry`.
pub fn functions(
    registry: Arc<dyn AttachmentRegistry>,
    context: ExecutionContext,
) -> Vec<(&'static str, HostFunction)> {
    let (get_registry, get_context) = (registry.clone(), context.clone());
    let get = HostFunction::asynchronous(move |call| {
        let registry = get_registry.clone();
        let context = get_context.clone();
        async move {
            let id = parse_id(&call)?;
            let meta = registry
                .get_attachment(&context, id)
                .await
                .map_err(|e| storage_error("attachment_get", e))?;
            Ok(meta.as_ref().map_or(Object::None, metadata_object))
        }
    });

    let (read_registry, read_context) = (registry.clone(), context.clone());
    let read = HostFunction::asynchronous(move |call| {
        let registry = read_registry.clone();
        let context = read_context.clone();
        async move {
            let id = parse_id(&call)?;
            let content = registry
                .get_attachment_content(&context, id)
                .await
                .map_err(|e| storage_error("attachment_read", e))?;
            Ok(content.map_or(Object::None, |bytes| {
                Object::Str(String::from_utf8_lossy(&bytes).into_owned())
            }))
        }
    });

    let create = HostFunction::asynchronous(move |call| {
        let registry = registry.clone();
        let context = context.clone();
        async move {
            let content = match call.required(0, "content")? {
                Object::Bytes(bytes) => bytes.clone(),
                Object::Str(text) => text.clone().into_bytes(),
                other => {
                    return Err(ScriptException::type_error(format!(
                        "attachment_create() content must be bytes or str, not {}",
                        other.type_name()
                    )));
                }
            };
            let attachment = NewAttachment {
                content,
                filename: call.str(1, "filename")?.to_string(),
                description: call.opt_str(2, "description")?.unwrap_or_default().to_string(),
                mime_type: call
                    .opt_str(3, "mime_type")?
                    .unwrap_or("text/plain")
                    .to_string(),
            };
            let meta = registry
                .store_and_register(&context, attachment)
                .await
                .map_err(|e| storage_error("attachment_create", e))?;
            Ok(metadata_object(&meta))
        }
    });

    vec![
        ("attachment_get", get),
        ("attachment_read", read),
        ("attachment_create", create),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::SqliteAttachmentRegistry;
    use crate::db::Database;
    use crate::script::ExcType;

    async fn api() -> Vec<(&'static str, HostFunction)> {
        let db = Database::in_memory().await.expect("db");
        functions(
            Arc::new(SqliteAttachmentRegistry::new(db)),
            ExecutionContext::new("conv"),
        )
    }

    fn find<'a>(functions: &'a [(&'static str, HostFunction)], name: &str) -> &'a HostFunction {
        &functions
            .iter()
            .find(|(n, _)| *n == name)
            .expect("registered")
            .1
    }

    #[tokio::test]
    async fn create_get_read() {
        let functions = api().await;
        let created = find(&functions, "attachment_create")
            .call(CallArgs::new(
                "attachment_create",
                vec![Object::from("hello"), Object::from("note.txt")],
                vec![],
            ))
            .await
            .expect("create");
        let id = created.get("id").and_then(Object::as_str).expect("id").to_string();
        assert_eq!(created.get("mime_type"), Some(&Object::from("text/plain")));

        let meta = find(&functions, "attachment_get")
            .call(CallArgs::new("attachment_get", vec![Object::from(id.as_str())], vec![]))
            .await
            .expect("get");
        assert_eq!(meta.get("filename"), Some(&Object::from("note.txt")));

        let text = find(&functions, "attachment_read")
            .call(CallArgs::new("attachment_read", vec![Object::from(id.as_str())], vec![]))
            .await
            .expect("read");
        assert_eq!(text, Object::from("hello"));
    }

    #[tokio::test]
    async fn malformed_id_is_a_value_error() {
        let functions = api().await;
        let err = find(&functions, "attachment_get")
            .call(CallArgs::new("attachment_get", vec![Object::from("nope")], vec![]))
            .await
            .expect_err("invalid");
        assert_eq!(err.exc_type, ExcType::ValueError);
    }
}
