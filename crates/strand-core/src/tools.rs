use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::calls::ToolResult;
use crate::ids::{ConversationId, UserId};

/// Access policy levels, ordered from most to least restricted.
/// A tool runs only if the session grants at least its required level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// Filesystem confined to the sandbox root, no shell.
    Sandbox,
    /// Project-wide filesystem access.
    Project,
    /// Shell and unrestricted filesystem.
    System,
}

impl AccessLevel {
    pub fn allows(&self, required: AccessLevel) -> bool {
        *self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Project => "project",
            Self::System => "system",
        }
    }
}

/// Context injected into every tool execution. These values overwrite
/// any colliding keys in the model-supplied arguments.
#[derive(Clone)]
pub struct ToolContext {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub sandbox_root: PathBuf,
    pub access: AccessLevel,
    pub cancel: CancellationToken,
}

impl ToolContext {
    /// The injected argument map merged over explicit call args.
    pub fn injected_args(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("user_id".into(), Value::String(self.user_id.to_string()));
        map.insert(
            "conversation_id".into(),
            Value::String(self.conversation_id.to_string()),
        );
        map.insert(
            "sandbox_dir".into(),
            Value::String(self.sandbox_root.display().to_string()),
        );
        map.insert("access".into(), Value::String(self.access.as_str().into()));
        map
    }
}

/// Resolve a tool-supplied relative path against the permitted root,
/// rejecting any traversal that would escape it.
pub fn resolve_path(root: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let requested = Path::new(requested);
    if requested.is_absolute() {
        return Err(ToolError::InvalidArguments(format!(
            "absolute paths are not permitted: {}",
            requested.display()
        )));
    }

    let mut resolved = root.to_path_buf();
    let mut depth: usize = 0;
    for component in requested.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(ToolError::InvalidArguments(format!(
                        "path escapes permitted root: {}",
                        requested.display()
                    )));
                }
                resolved.pop();
                depth -= 1;
            }
            _ => {
                return Err(ToolError::InvalidArguments(format!(
                    "unsupported path component in: {}",
                    requested.display()
                )));
            }
        }
    }
    Ok(resolved)
}

/// Static description of a tool, handed to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// Trait implemented by each tool.
///
/// `Err(ToolError)` is a system failure and aborts the call fatally;
/// a tool that ran but did not succeed returns `Ok` with `error = true`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn describe(&self) -> ToolDescriptor;

    fn required_access(&self) -> AccessLevel {
        AccessLevel::Sandbox
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("cancelled")]
    Cancelled,
}
