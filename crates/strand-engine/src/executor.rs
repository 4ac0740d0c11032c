use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use strand_core::calls::{ToolCall, ToolResult};
use strand_core::errors::AgentError;
use strand_core::tools::{ToolContext, ToolError};

use crate::error::EngineError;
use crate::registry::ToolRegistry;

/// Dispatches tool calls against the registry under the access policy.
///
/// Unknown tools and access denials are reported failures the model
/// can react to; a tool's own `Err(ToolError)` is a fatal system
/// failure. A per-call timeout synthesizes a reported failure so one
/// stuck tool cannot hang the batch.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    concurrency: usize,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration, concurrency: usize) -> Self {
        Self {
            registry,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn execute(
        &self,
        call: ToolCall,
        ctx: &ToolContext,
    ) -> Result<ToolResult, EngineError> {
        if ctx.cancel.is_cancelled() {
            return Err(AgentError::Cancelled.into());
        }

        let Some(tool) = self.registry.get(&call.name) else {
            debug!(tool = %call.name, "unknown tool requested");
            return Ok(ToolResult::failed(format!("unknown tool: {}", call.name)));
        };

        let required = tool.required_access();
        if !ctx.access.allows(required) {
            warn!(
                tool = %call.name,
                granted = ctx.access.as_str(),
                required = required.as_str(),
                "access denied"
            );
            return Ok(ToolResult::failed(format!(
                "access denied: '{}' requires {} access, session grants {}",
                call.name,
                required.as_str(),
                ctx.access.as_str()
            )));
        }

        // Injected context overwrites any colliding explicit args.
        let mut args = call.args;
        for (key, value) in ctx.injected_args() {
            args.insert(key, value);
        }

        match tokio::time::timeout(self.timeout, tool.execute(args, ctx)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(ToolError::Cancelled)) => Err(AgentError::Cancelled.into()),
            Ok(Err(e)) => Err(AgentError::ToolSystem {
                tool: call.name,
                message: e.to_string(),
            }
            .into()),
            Err(_) => {
                warn!(tool = %call.name, timeout_secs = self.timeout.as_secs(), "tool timed out");
                Ok(ToolResult::failed(format!(
                    "timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    /// Run a batch with bounded concurrency. Results come back in call
    /// submission order regardless of completion order.
    pub async fn execute_batch(
        &self,
        calls: Vec<ToolCall>,
        ctx: &ToolContext,
    ) -> Result<Vec<ToolResult>, EngineError> {
        stream::iter(calls.into_iter().map(|call| self.execute(call, ctx)))
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strand_core::ids::{ConversationId, UserId};
    use strand_core::tools::{AccessLevel, Tool, ToolDescriptor};
    use tokio_util::sync::CancellationToken;

    fn ctx(access: AccessLevel) -> ToolContext {
        ToolContext {
            user_id: UserId::from_raw("user_test"),
            conversation_id: ConversationId::from_raw("conv_test"),
            sandbox_root: PathBuf::from("/tmp/strand-test"),
            access,
            cancel: CancellationToken::new(),
        }
    }

    fn executor(registry: ToolRegistry) -> ToolExecutor {
        ToolExecutor::new(Arc::new(registry), Duration::from_millis(200), 4)
    }

    /// Sleeps according to `delay_ms`, then reports its index and the
    /// injected args it observed.
    struct SleepyTool {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for SleepyTool {
        fn describe(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "sleepy".into(),
                description: "sleeps then echoes".into(),
                schema: json!({}),
            }
        }

        async fn execute(
            &self,
            args: Map<String, Value>,
            _ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let delay = args.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            let idx = args.get("idx").and_then(Value::as_u64).unwrap_or(0);
            Ok(ToolResult::ok("done", idx.to_string()))
        }
    }

    struct PanickyTool;

    #[async_trait]
    impl Tool for PanickyTool {
        fn describe(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "panicky".into(),
                description: "always raises".into(),
                schema: json!({}),
            }
        }

        async fn execute(
            &self,
            _args: Map<String, Value>,
            _ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            Err(ToolError::ExecutionFailed("disk on fire".into()))
        }
    }

    struct ArgSpyTool;

    #[async_trait]
    impl Tool for ArgSpyTool {
        fn describe(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "spy".into(),
                description: "reports observed args".into(),
                schema: json!({}),
            }
        }

        async fn execute(
            &self,
            args: Map<String, Value>,
            _ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::ok(
                "done",
                serde_json::to_string(&args).unwrap_or_default(),
            ))
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_failure() {
        let exec = executor(ToolRegistry::new());
        let result = exec
            .execute(ToolCall::new("ghost"), &ctx(AccessLevel::System))
            .await
            .unwrap();
        assert!(result.error);
        assert!(result.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn access_denied_is_reported_failure() {
        let exec = executor(ToolRegistry::with_builtins());
        // write_note requires project access.
        let result = exec
            .execute(ToolCall::new("write_note"), &ctx(AccessLevel::Sandbox))
            .await
            .unwrap();
        assert!(result.error);
        assert!(result.content.contains("access denied"));
    }

    #[tokio::test]
    async fn tool_error_is_fatal() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PanickyTool));
        let exec = executor(registry);

        let err = exec
            .execute(ToolCall::new("panicky"), &ctx(AccessLevel::Sandbox))
            .await
            .err()
            .expect("expected fatal error");
        assert!(matches!(
            err,
            EngineError::Agent(AgentError::ToolSystem { .. })
        ));
    }

    #[tokio::test]
    async fn timeout_synthesizes_reported_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SleepyTool {
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }));
        let exec = ToolExecutor::new(Arc::new(registry), Duration::from_millis(20), 4);

        let call = ToolCall::new("sleepy").with_arg("delay_ms", json!(500));
        let result = exec.execute(call, &ctx(AccessLevel::Sandbox)).await.unwrap();
        assert!(result.error);
        assert!(result.content.contains("timed out"));
    }

    #[tokio::test]
    async fn injected_context_overrides_explicit_args() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ArgSpyTool));
        let exec = executor(registry);

        let call = ToolCall::new("spy").with_arg("user_id", json!("forged"));
        let result = exec.execute(call, &ctx(AccessLevel::Sandbox)).await.unwrap();
        let observed: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(observed["user_id"], "user_test");
        assert_eq!(observed["access"], "sandbox");
    }

    #[tokio::test]
    async fn batch_preserves_submission_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SleepyTool {
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }));
        let exec = executor(registry);

        // First call finishes last; order must still match submission.
        let calls = vec![
            ToolCall::new("sleepy")
                .with_arg("idx", json!(0))
                .with_arg("delay_ms", json!(60)),
            ToolCall::new("sleepy")
                .with_arg("idx", json!(1))
                .with_arg("delay_ms", json!(5)),
            ToolCall::new("sleepy").with_arg("idx", json!(2)),
        ];

        let results = exec
            .execute_batch(calls, &ctx(AccessLevel::Sandbox))
            .await
            .unwrap();
        let order: Vec<_> = results.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(order, vec!["0", "1", "2"]);
    }

    #[tokio::test]
    async fn batch_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SleepyTool {
            running: running.clone(),
            peak: peak.clone(),
        }));
        let exec = ToolExecutor::new(Arc::new(registry), Duration::from_secs(5), 2);

        let calls: Vec<ToolCall> = (0..6)
            .map(|i| {
                ToolCall::new("sleepy")
                    .with_arg("idx", json!(i))
                    .with_arg("delay_ms", json!(20))
            })
            .collect();

        exec.execute_batch(calls, &ctx(AccessLevel::Sandbox))
            .await
            .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancelled_context_propagates() {
        let exec = executor(ToolRegistry::with_builtins());
        let mut context = ctx(AccessLevel::Sandbox);
        context.cancel = CancellationToken::new();
        context.cancel.cancel();

        let err = exec
            .execute(ToolCall::new("echo"), &context)
            .await
            .err()
            .expect("expected cancellation");
        assert!(matches!(err, EngineError::Agent(AgentError::Cancelled)));
    }
}
