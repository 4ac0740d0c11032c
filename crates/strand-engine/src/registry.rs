use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

use strand_core::calls::ToolResult;
use strand_core::tools::{resolve_path, AccessLevel, Tool, ToolContext, ToolDescriptor, ToolError};

/// Name-indexed tool collection shared by the executor.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in demonstration tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(ClockTool));
        registry.register(Arc::new(WriteNoteTool));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.describe().name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted for stable fingerprints.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> =
            self.tools.values().map(|t| t.describe()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn arg_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// Returns its `text` argument. Exists for wiring and tests.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn describe(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "echo".into(),
            description: "Echo the provided text back".into(),
            schema: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        }
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        match arg_str(&args, "text") {
            Some(text) => Ok(ToolResult::ok("done", text)),
            None => Ok(ToolResult::failed("missing required argument: text")),
        }
    }
}

/// Reports the current UTC time.
pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn describe(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "clock".into(),
            description: "Current UTC time in RFC 3339 format".into(),
            schema: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(
        &self,
        _args: Map<String, Value>,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok("done", Utc::now().to_rfc3339()))
    }
}

/// Writes a note file under the sandbox root. Requires project access
/// and exercises the path policy.
pub struct WriteNoteTool;

#[async_trait]
impl Tool for WriteNoteTool {
    fn describe(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "write_note".into(),
            description: "Write a text note at a path relative to the sandbox".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        }
    }

    fn required_access(&self) -> AccessLevel {
        AccessLevel::Project
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let Some(path) = arg_str(&args, "path") else {
            return Ok(ToolResult::failed("missing required argument: path"));
        };
        let Some(content) = arg_str(&args, "content") else {
            return Ok(ToolResult::failed("missing required argument: content"));
        };

        let resolved = match resolve_path(&ctx.sandbox_root, path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::failed(e.to_string())),
        };

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::failed(format!("create dir: {e}")));
            }
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => Ok(ToolResult::ok("done", resolved.display().to_string())),
            Err(e) => Ok(ToolResult::failed(format!("write failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use strand_core::ids::{ConversationId, UserId};
    use tokio_util::sync::CancellationToken;

    fn ctx(root: PathBuf) -> ToolContext {
        ToolContext {
            user_id: UserId::new(),
            conversation_id: ConversationId::new(),
            sandbox_root: root,
            access: AccessLevel::Project,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn builtins_registered_and_sorted() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["clock", "echo", "write_note"]);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn echo_returns_text() {
        let mut args = Map::new();
        args.insert("text".into(), Value::String("hello".into()));
        let result = EchoTool
            .execute(args, &ctx(std::env::temp_dir()))
            .await
            .unwrap();
        assert!(!result.error);
        assert_eq!(result.content, "hello");
    }

    #[tokio::test]
    async fn echo_missing_arg_is_reported_failure() {
        let result = EchoTool
            .execute(Map::new(), &ctx(std::env::temp_dir()))
            .await
            .unwrap();
        assert!(result.error);
    }

    #[tokio::test]
    async fn clock_reports_rfc3339() {
        let result = ClockTool
            .execute(Map::new(), &ctx(std::env::temp_dir()))
            .await
            .unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&result.content).is_ok());
    }

    #[tokio::test]
    async fn write_note_creates_file_in_sandbox() {
        let root = std::env::temp_dir().join(format!("strand-note-{}", uuid::Uuid::now_v7()));
        let mut args = Map::new();
        args.insert("path".into(), Value::String("notes/today.txt".into()));
        args.insert("content".into(), Value::String("remember".into()));

        let result = WriteNoteTool.execute(args, &ctx(root.clone())).await.unwrap();
        assert!(!result.error, "{}", result.content);
        assert_eq!(
            std::fs::read_to_string(root.join("notes/today.txt")).unwrap(),
            "remember"
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn write_note_rejects_escape() {
        let mut args = Map::new();
        args.insert("path".into(), Value::String("../outside.txt".into()));
        args.insert("content".into(), Value::String("nope".into()));

        let result = WriteNoteTool
            .execute(args, &ctx(std::env::temp_dir()))
            .await
            .unwrap();
        assert!(result.error);
    }
}
