use serde_json::Value;

use strand_core::calls::ToolCall;
use strand_core::errors::AgentError;
use strand_core::events::AgentEvent;

use crate::parser::{Segment, SegmentKind};

/// Turns parser segments into semantic session events.
///
/// Consecutive think segments collapse into one Think event. `End` is
/// emitted at most once no matter how often the stream repeats it.
/// Call payloads are JSON-repaired before a structural `Protocol`
/// error is raised. Pending calls accumulate until Execute and are
/// drained by the orchestrator via `take_batch`.
#[derive(Default)]
pub struct EventAccumulator {
    think_buf: String,
    pending: Vec<ToolCall>,
    end_emitted: bool,
}

impl EventAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, segment: Segment) -> Result<Vec<AgentEvent>, AgentError> {
        let mut out = Vec::new();
        match segment.kind {
            SegmentKind::Think => {
                if !self.think_buf.is_empty() {
                    self.think_buf.push('\n');
                }
                self.think_buf.push_str(&segment.text);
            }
            SegmentKind::Respond => {
                self.flush_think(&mut out);
                out.push(AgentEvent::respond(segment.text));
            }
            SegmentKind::Call => {
                self.flush_think(&mut out);
                let calls = decode_calls(&segment.text)?;
                out.push(AgentEvent::call(calls.clone()));
                self.pending.extend(calls);
            }
            SegmentKind::Execute => {
                self.flush_think(&mut out);
                out.push(AgentEvent::execute(self.pending.len()));
            }
            SegmentKind::End => {
                self.flush_think(&mut out);
                if !self.end_emitted {
                    self.end_emitted = true;
                    out.push(AgentEvent::end());
                }
            }
        }
        Ok(out)
    }

    /// Emit whatever is still buffered at end of stream.
    pub fn flush(&mut self) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        self.flush_think(&mut out);
        out
    }

    /// Called on upstream interruption: any pending batch becomes
    /// observable through a graceful Execute before the error
    /// propagates. The batch itself stays pending for checkpointing.
    pub fn interrupt(&mut self) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        self.flush_think(&mut out);
        if !self.pending.is_empty() {
            out.push(AgentEvent::execute(self.pending.len()));
        }
        out
    }

    /// Drain the accumulated call batch for execution.
    pub fn take_batch(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.pending)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn end_emitted(&self) -> bool {
        self.end_emitted
    }

    fn flush_think(&mut self, out: &mut Vec<AgentEvent>) {
        if !self.think_buf.is_empty() {
            out.push(AgentEvent::think(std::mem::take(&mut self.think_buf)));
        }
    }
}

/// Decode a call segment into one or more ToolCalls. A single object
/// and an array batch are both accepted.
fn decode_calls(text: &str) -> Result<Vec<ToolCall>, AgentError> {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(v) => v,
        Err(_) => {
            let repaired = repair_json(text);
            serde_json::from_str(&repaired).map_err(|e| {
                AgentError::Protocol(format!("unparseable tool call payload: {e}"))
            })?
        }
    };

    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item)
                    .map_err(|e| AgentError::Protocol(format!("invalid tool call: {e}")))
            })
            .collect(),
        obj @ Value::Object(_) => Ok(vec![serde_json::from_value(obj)
            .map_err(|e| AgentError::Protocol(format!("invalid tool call: {e}")))?]),
        other => Err(AgentError::Protocol(format!(
            "tool call payload must be an object or array, got: {other}"
        ))),
    }
}

/// Repair the encoding defects models commonly produce inside JSON
/// string values: raw newlines/tabs, lone backslashes, and unescaped
/// inner quotes. A quote inside a string is treated as the closer only
/// when the next non-space character is structural punctuation.
///
/// Only callers holding already-invalid JSON should use this; valid
/// payloads go through a strict parse first. Inside a broken payload a
/// backslash before a letter is far more likely a literal (`C:\temp`,
/// `\d+`) than a deliberate two-character escape, so only `\"`, `\\`,
/// `\/` and well-formed `\uXXXX` are honored; every other backslash is
/// doubled. Real newlines and tabs arrive as raw control characters
/// and are escaped separately.
pub fn repair_json(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len() + 8);
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            i += 1;
            continue;
        }
        match c {
            '\\' => match chars.get(i + 1) {
                Some(&n) if matches!(n, '"' | '\\' | '/') => {
                    out.push('\\');
                    out.push(n);
                    i += 2;
                }
                Some('u')
                    if chars[i + 2..].len() >= 4
                        && chars[i + 2..i + 6].iter().all(|c| c.is_ascii_hexdigit()) =>
                {
                    out.push_str("\\u");
                    out.extend(&chars[i + 2..i + 6]);
                    i += 6;
                }
                _ => {
                    out.push_str("\\\\");
                    i += 1;
                }
            },
            '\n' => {
                out.push_str("\\n");
                i += 1;
            }
            '\t' => {
                out.push_str("\\t");
                i += 1;
            }
            '\r' => {
                out.push_str("\\r");
                i += 1;
            }
            '"' => {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() && chars[j] != '\n' {
                    j += 1;
                }
                let closes = j >= chars.len() || matches!(chars[j], ',' | ':' | '}' | ']');
                if closes {
                    in_string = false;
                    out.push('"');
                } else {
                    out.push_str("\\\"");
                }
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    out
}
