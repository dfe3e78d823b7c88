use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tracing::debug;

use super::{ToolArguments, ToolDefinition, ToolError, ToolOutput, ToolProvider, required_str};
use crate::context::ExecutionContext;
use crate::db::{Database, DatabaseContext, SqlParam};

/// Note-keeping tools. Every call runs in its own [`DatabaseContext`].
#[derive(Debug, Clone)]
pub struct NotesToolProvider {
    database: Database,
}

impl NotesToolProvider {
    /// Provider storing notes in `database`.
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "add_or_update_note",
                "Create a note, or replace the content of the note with the same title.",
                json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string", "description": "Unique note title"},
                        "content": {"type": "string", "description": "Note body"},
                        "include_in_prompt": {
                            "type": "boolean",
                            "description": "Show this note to the assistant by default"
                        }
                    },
                    "required": ["title", "content"]
                }),
            ),
            ToolDefinition::new(
                "get_note",
                "Fetch a note by title.",
                json!({
                    "type": "object",
                    "properties": {"title": {"type": "string"}},
                    "required": ["title"]
                }),
            ),
            ToolDefinition::new(
                "list_notes",
                "List all notes.",
                json!({"type": "object", "properties": {}, "required": []}),
            ),
            ToolDefinition::new(
                "delete_note",
                "Delete a note by title.",
                json!({
                    "type": "object",
                    "properties": {"title": {"type": "string"}},
                    "required": ["title"]
                }),
            ),
        ]
    }

    async fn run(
        &self,
        db: &mut DatabaseContext,
        name: &str,
        arguments: &ToolArguments,
        context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        match name {
            "add_or_update_note" => {
                let title = required_str(name, arguments, "title")?;
                let content = required_str(name, arguments, "content")?;
                let include = arguments
                    .get("include_in_prompt")
                    .and_then(JsonValue::as_bool)
                    .unwrap_or(true);
                let now = context.clock.now().to_rfc3339();
                db.execute_and_commit(
                    "INSERT INTO notes (title, content, include_in_prompt, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT(title) DO UPDATE SET
                         content = excluded.content,
                         include_in_prompt = excluded.include_in_prompt,
                         updated_at = excluded.updated_at",
                    &[
                        title.into(),
                        content.into(),
                        include.into(),
                        now.clone().into(),
                        now.into(),
                    ],
                )
                .await?;
                debug!(title, "note saved");
                Ok(ToolOutput::Text(format!("Note '{title}' saved.")))
            }
            "get_note" => {
                let title = required_str(name, arguments, "title")?;
                let row = db
                    .fetch_one(
                        "SELECT title, content, include_in_prompt FROM notes WHERE title = ?",
                        &[SqlParam::from(title)],
                    )
                    .await?;
                Ok(ToolOutput::Json(match row {
                    Some(row) => json!({
                        "exists": true,
                        "title": row["title"],
                        "content": row["content"],
                        "include_in_prompt": row["include_in_prompt"] != 0,
                    }),
                    None => json!({"exists": false, "title": title}),
                }))
            }
            "list_notes" => {
                let rows = db
                    .fetch_all(
                        "SELECT title, content, include_in_prompt FROM notes ORDER BY title",
                        &[],
                    )
                    .await?;
                let notes: Vec<JsonValue> = rows
                    .into_iter()
                    .map(|row| {
                        json!({
                            "title": row["title"],
                            "content": row["content"],
                            "include_in_prompt": row["include_in_prompt"] != 0,
                        })
                    })
                    .collect();
                Ok(ToolOutput::Json(JsonValue::Array(notes)))
            }
            "delete_note" => {
                let title = required_str(name, arguments, "title")?;
                let deleted = db
                    .execute_and_commit("DELETE FROM notes WHERE title = ?", &[title.into()])
                    .await?;
                Ok(ToolOutput::Text(if deleted > 0 {
                    format!("Note '{title}' deleted.")
                } else {
                    format!("Note '{title}' not found.")
                }))
            }
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

#[async_trait]
impl ToolProvider for NotesToolProvider {
    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(Self::definitions())
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: ToolArguments,
        context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        if !Self::definitions().iter().any(|def| def.name == name) {
            return Err(ToolError::NotFound(name.to_string()));
        }
        let mut db = self.database.enter().await?;
        let result = self.run(&mut db, name, &arguments, context).await;
        db.exit().await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, JsonValue)]) -> ToolArguments {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn upsert_then_get() {
        let provider = NotesToolProvider::new(Database::in_memory().await.expect("db"));
        let ctx = ExecutionContext::new("c");
        provider
            .execute_tool(
                "add_or_update_note",
                args(&[("title", json!("wifi")), ("content", json!("hunter2"))]),
                &ctx,
            )
            .await
            .expect("add");
        provider
            .execute_tool(
                "add_or_update_note",
                args(&[
                    ("title", json!("wifi")),
                    ("content", json!("correct horse")),
                    ("include_in_prompt", json!(false)),
                ]),
                &ctx,
            )
            .await
            .expect("update");
        let out = provider
            .execute_tool("get_note", args(&[("title", json!("wifi"))]), &ctx)
            .await
            .expect("get");
        assert_eq!(
            out,
            ToolOutput::Json(json!({
                "exists": true,
                "title": "wifi",
                "content": "correct horse",
                "include_in_prompt": false,
            }))
        );
    }

    #[tokio::test]
    async fn delete_reports_missing_notes() {
        let provider = NotesToolProvider::new(Database::in_memory().await.expect("db"));
        let out = provider
            .execute_tool(
                "delete_note",
                args(&[("title", json!("ghost"))]),
                &ExecutionContext::new("c"),
            )
            .await
            .expect("delete");
        assert_eq!(out, ToolOutput::Text("Note 'ghost' not found.".into()));
    }
}
