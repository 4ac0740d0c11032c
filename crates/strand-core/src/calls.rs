use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool invocation requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Map::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }
}

/// Outcome of executing a single tool call. `error = true` means the tool
/// ran and reported failure; it is NOT a system error.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub outcome: String,
    pub content: String,
    pub error: bool,
}

impl ToolResult {
    pub fn ok(outcome: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            outcome: outcome.into(),
            content: content.into(),
            error: false,
        }
    }

    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            outcome: "error".into(),
            content: content.into(),
            error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_builder() {
        let call = ToolCall::new("echo").with_arg("text", Value::String("hi".into()));
        assert_eq!(call.name, "echo");
        assert_eq!(call.args["text"], "hi");
    }

    #[test]
    fn call_serde_defaults_args() {
        let call: ToolCall = serde_json::from_str(r#"{"name":"clock"}"#).unwrap();
        assert_eq!(call.name, "clock");
        assert!(call.args.is_empty());
    }

    #[test]
    fn result_constructors() {
        let ok = ToolResult::ok("done", "42");
        assert!(!ok.error);
        assert_eq!(ok.outcome, "done");

        let err = ToolResult::failed("no such file");
        assert!(err.error);
        assert_eq!(err.outcome, "error");
    }

    #[test]
    fn result_serde_roundtrip() {
        let result = ToolResult::ok("done", "payload");
        let json = serde_json::to_string(&result).unwrap();
        let parsed: ToolResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, parsed);
    }
}
