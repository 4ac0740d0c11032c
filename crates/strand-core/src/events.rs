use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calls::{ToolCall, ToolResult};

/// Semantic session events streamed to the caller.
/// Wire shape: `{type, content|calls|payload, timestamp}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Think {
        content: String,
        timestamp: DateTime<Utc>,
    },

    Respond {
        content: String,
        timestamp: DateTime<Utc>,
    },

    Call {
        calls: Vec<ToolCall>,
        timestamp: DateTime<Utc>,
    },

    Execute {
        /// Number of calls in the batch about to run (or interrupted).
        pending: usize,
        timestamp: DateTime<Utc>,
    },

    Result {
        payload: ResultPayload,
        timestamp: DateTime<Utc>,
    },

    Metrics {
        payload: Value,
        timestamp: DateTime<Utc>,
    },

    End {
        timestamp: DateTime<Utc>,
    },

    Error {
        content: String,
        timestamp: DateTime<Utc>,
    },
}

/// Aggregate of one executed tool batch. Results appear in call
/// submission order regardless of completion order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultPayload {
    pub tools_executed: usize,
    pub results: Vec<ToolResult>,
}

impl AgentEvent {
    pub fn think(content: impl Into<String>) -> Self {
        Self::Think {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn respond(content: impl Into<String>) -> Self {
        Self::Respond {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn call(calls: Vec<ToolCall>) -> Self {
        Self::Call {
            calls,
            timestamp: Utc::now(),
        }
    }

    pub fn execute(pending: usize) -> Self {
        Self::Execute {
            pending,
            timestamp: Utc::now(),
        }
    }

    pub fn result(results: Vec<ToolResult>) -> Self {
        Self::Result {
            payload: ResultPayload {
                tools_executed: results.len(),
                results,
            },
            timestamp: Utc::now(),
        }
    }

    pub fn metrics(payload: Value) -> Self {
        Self::Metrics {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn end() -> Self {
        Self::End {
            timestamp: Utc::now(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Think { .. } => "think",
            Self::Respond { .. } => "respond",
            Self::Call { .. } => "call",
            Self::Execute { .. } => "execute",
            Self::Result { .. } => "result",
            Self::Metrics { .. } => "metrics",
            Self::End { .. } => "end",
            Self::Error { .. } => "error",
        }
    }

    /// Terminal events close the session stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_strings() {
        assert_eq!(AgentEvent::think("x").event_type(), "think");
        assert_eq!(AgentEvent::execute(2).event_type(), "execute");
        assert_eq!(AgentEvent::end().event_type(), "end");
    }

    #[test]
    fn terminal_classification() {
        assert!(AgentEvent::end().is_terminal());
        assert!(AgentEvent::error("boom").is_terminal());
        assert!(!AgentEvent::respond("hi").is_terminal());
    }

    #[test]
    fn wire_shape_is_tagged() {
        let json = serde_json::to_value(AgentEvent::respond("hi")).unwrap();
        assert_eq!(json["type"], "respond");
        assert_eq!(json["content"], "hi");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn result_payload_counts_tools() {
        let evt = AgentEvent::result(vec![
            ToolResult::ok("done", "a"),
            ToolResult::failed("b"),
        ]);
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["payload"]["tools_executed"], 2);
    }

    #[test]
    fn serde_roundtrip() {
        let events = vec![
            AgentEvent::think("reasoning"),
            AgentEvent::call(vec![ToolCall::new("echo")]),
            AgentEvent::result(vec![ToolResult::ok("done", "out")]),
            AgentEvent::end(),
        ];
        for evt in &events {
            let json = serde_json::to_string(evt).unwrap();
            let parsed: AgentEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(evt.event_type(), parsed.event_type());
        }
    }
}
