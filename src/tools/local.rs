use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use indexmap::IndexMap;

use super::{ToolArguments, ToolDefinition, ToolError, ToolOutput, ToolProvider};
use crate::context::ExecutionContext;

type Handler = Arc<
    dyn Fn(ToolArguments, ExecutionContext) -> BoxFuture<'static, Result<ToolOutput, ToolError>>
        + Send
        + Sync,
>;

/// Tools backed by in-process closures, listed in registration order.
#[derive(Default, Clone)]
pub struct LocalToolProvider {
    tools: IndexMap<String, (ToolDefinition, Handler)>,
}

impl LocalToolProvider {
    /// Empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `definition` with an async handler. Re-registering a name replaces it.
    pub fn register<F, Fut>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(ToolArguments, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args, ctx| Box::pin(handler(args, ctx)));
        self.tools
            .insert(definition.name.clone(), (definition, handler));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_tool<F, Fut>(mut self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(ToolArguments, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        self.register(definition, handler);
        self
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolProvider for LocalToolProvider {
    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(self.tools.values().map(|(def, _)| def.clone()).collect())
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: ToolArguments,
        context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let (_, handler) = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        handler(arguments, context.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> LocalToolProvider {
        LocalToolProvider::new().with_tool(
            ToolDefinition::new(
                "echo",
                "Echo text",
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            ),
            |args, _ctx| async move {
                match crate::tools::required_str("echo", &args, "text") {
                    Ok(text) => Ok(ToolOutput::Text(format!("echo: {text}"))),
                    Err(err) => Err(err),
                }
            },
        )
    }

    #[tokio::test]
    async fn executes_registered_tool() {
        let provider = echo();
        let mut args = ToolArguments::new();
        args.insert("text".into(), json!("hi"));
        let out = provider
            .execute_tool("echo", args, &ExecutionContext::new("c"))
            .await
            .expect("echo");
        assert_eq!(out, ToolOutput::Text("echo: hi".into()));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let err = echo()
            .execute_tool("nope", ToolArguments::new(), &ExecutionContext::new("c"))
            .await
            .expect_err("missing");
        assert!(matches!(err, ToolError::NotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn missing_argument_is_invalid() {
        let err = echo()
            .execute_tool("echo", ToolArguments::new(), &ExecutionContext::new("c"))
            .await
            .expect_err("invalid");
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }
}
