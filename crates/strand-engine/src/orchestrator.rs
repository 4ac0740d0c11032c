use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use strand_core::calls::ToolCall;
use strand_core::config::ExecutionConfig;
use strand_core::errors::AgentError;
use strand_core::events::AgentEvent;
use strand_core::ids::{ConversationId, RunId, SessionId, UserId};
use strand_core::messages::{Message, Role};
use strand_core::provider::LlmProvider;
use strand_core::storage::Storage;
use strand_core::tools::ToolContext;
use strand_telemetry::MetricsRecorder;

use crate::accumulator::EventAccumulator;
use crate::checkpoint::CheckpointManager;
use crate::error::EngineError;
use crate::executor::ToolExecutor;
use crate::parser::StreamParser;
use crate::registry::ToolRegistry;
use crate::transport::TransportDriver;

/// Rolling window of action fingerprints. Flags immediate repetition
/// (A-A) and alternation (A-B-A) so a stuck model is stopped before it
/// burns the whole iteration budget.
pub struct LoopDetector {
    window: VecDeque<String>,
    capacity: usize,
}

impl LoopDetector {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::new(),
            capacity: capacity.max(3),
        }
    }

    pub fn observe(&mut self, batch: &[ToolCall]) -> Result<(), EngineError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.window.push_back(Self::fingerprint(batch));
        if self.window.len() > self.capacity {
            self.window.pop_front();
        }

        let n = self.window.len();
        if n >= 2 && self.window[n - 1] == self.window[n - 2] {
            return Err(EngineError::LoopDetected(format!(
                "repeated action: {}",
                self.window[n - 1]
            )));
        }
        if n >= 3 && self.window[n - 1] == self.window[n - 3] && self.window[n - 1] != self.window[n - 2]
        {
            return Err(EngineError::LoopDetected(format!(
                "alternating actions: {} / {}",
                self.window[n - 1],
                self.window[n - 2]
            )));
        }
        Ok(())
    }

    fn fingerprint(batch: &[ToolCall]) -> String {
        batch
            .iter()
            .map(|call| {
                let args = serde_json::to_string(&call.args).unwrap_or_default();
                format!("{}({args})", call.name)
            })
            .collect::<Vec<_>>()
            .join("+")
    }
}

/// Drives the parser → accumulator → executor pipeline for agent
/// sessions: one provider stream per turn, bounded tool batches in
/// between, events delivered over a bounded channel. Every session
/// terminates with exactly one `End` or `Error` event.
pub struct Orchestrator {
    config: ExecutionConfig,
    provider: Arc<dyn LlmProvider>,
    storage: Arc<dyn Storage>,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    metrics: Arc<MetricsRecorder>,
    run_id: RunId,
}

impl Orchestrator {
    pub fn new(
        config: ExecutionConfig,
        provider: Arc<dyn LlmProvider>,
        storage: Arc<dyn Storage>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let executor = ToolExecutor::new(
            registry.clone(),
            config.tool_timeout,
            config.batch_concurrency,
        );
        Self {
            config,
            provider,
            storage,
            registry,
            executor,
            metrics: Arc::new(MetricsRecorder::new()),
            run_id: RunId::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Run one session to completion. Events stream to `events`; the
    /// final one is always `End` or `Error`.
    pub async fn run(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
        query: &str,
        events: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        let mut session = SessionRun {
            orch: self,
            user_id,
            conversation_id,
            query: query.to_string(),
            session_id: derive_session_id(query),
            events,
            cancel,
            history: Vec::new(),
            turn: 0,
            end_sent: false,
        };

        let started = Instant::now();
        let result = session.drive().await;
        self.metrics.record_latency("session", started.elapsed());

        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                self.metrics.incr("sessions_failed", 1);
                session.send_error(&err).await;
                Err(err)
            }
        }
    }
}

/// Session identity is stable for one query so an interrupted run can
/// locate its own checkpoints within the same process.
fn derive_session_id(query: &str) -> SessionId {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    let digest = hasher.finalize();
    SessionId::from_raw(format!("sess_{:x}", digest))
}

/// Flush what the parser still holds into the accumulator, then
/// surface the accumulator's interruption events. Malformed leftovers
/// are dropped; the interruption itself is the failure being reported.
fn drain_interrupted(parser: &mut StreamParser, acc: &mut EventAccumulator) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    for segment in parser.finish() {
        if let Ok(more) = acc.accept(segment) {
            events.extend(more);
        }
    }
    events.extend(acc.interrupt());
    events
}

enum TurnOutcome {
    Finished,
    Batch(Vec<ToolCall>),
}

struct SessionRun<'a> {
    orch: &'a Orchestrator,
    user_id: UserId,
    conversation_id: ConversationId,
    query: String,
    session_id: SessionId,
    events: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
    history: Vec<Message>,
    turn: u32,
    end_sent: bool,
}

impl SessionRun<'_> {
    async fn drive(&mut self) -> Result<(), EngineError> {
        self.check_cancel()?;
        let config = &self.orch.config;

        // INIT: persist the query, rebuild context from storage.
        self.orch
            .storage
            .save_message(&self.conversation_id, Role::User, &self.query, Utc::now())
            .await?;
        let stored = self
            .orch
            .storage
            .load_messages(&self.conversation_id, None)
            .await?;
        self.history = stored
            .into_iter()
            .map(|m| Message {
                role: m.role,
                content: m.content,
                timestamp: m.timestamp,
            })
            .collect();

        if config.profile_tracking {
            if let Some(profile) = self.orch.storage.load_profile(&self.user_id).await? {
                self.history
                    .insert(0, Message::system(format!("User profile: {profile}")));
            }
        }

        // The model sees the tool inventory the same way every turn.
        let descriptors = self.orch.registry.descriptors();
        if !descriptors.is_empty() {
            let inventory =
                serde_json::to_string(&descriptors).unwrap_or_else(|_| "[]".to_string());
            self.history
                .insert(0, Message::system(format!("Available tools: {inventory}")));
        }

        let manager = CheckpointManager::new(self.orch.storage.clone(), self.orch.run_id.clone());
        let tool_names = self.orch.registry.names();

        // Pick up the most advanced checkpoint this process wrote for
        // this session, if any.
        let mut resumed = None;
        for t in 0..=config.max_iterations {
            let fp = manager.fingerprint(&self.session_id, &self.query, t, &tool_names);
            if let Some(record) = manager.find(&fp).await? {
                resumed = Some(record);
            }
        }
        if let Some(record) = resumed {
            info!(turn = record.turn, phase = %record.phase, "resuming from checkpoint");
            self.turn = record.turn;
            self.history.push(CheckpointManager::resume_message(&record));
        }

        let mut transport = TransportDriver::new(config.transport, self.orch.provider.clone());
        let mut detector = LoopDetector::new(config.loop_window);
        let mut increment = self.query.clone();

        loop {
            self.check_cancel()?;
            match self.stream_turn(&mut transport, &increment).await? {
                TurnOutcome::Finished => break,
                TurnOutcome::Batch(batch) => {
                    detector.observe(&batch)?;

                    let fp =
                        manager.fingerprint(&self.session_id, &self.query, self.turn, &tool_names);
                    self.check_cancel()?;
                    manager
                        .save(&fp, "tool_execution", self.turn, batch.clone(), vec![])
                        .await?;

                    let ctx = ToolContext {
                        user_id: self.user_id.clone(),
                        conversation_id: self.conversation_id.clone(),
                        sandbox_root: config.sandbox_root.clone(),
                        access: config.access,
                        cancel: self.cancel.clone(),
                    };
                    let started = Instant::now();
                    let results = self.orch.executor.execute_batch(batch, &ctx).await?;
                    self.orch
                        .metrics
                        .record_latency("tool_batch", started.elapsed());
                    self.orch.metrics.incr("tool_calls", results.len() as u64);

                    let event = AgentEvent::result(results.clone());
                    self.emit(&event).await?;

                    // Results become the next turn's context.
                    let summary =
                        serde_json::to_string(&results).unwrap_or_else(|_| "[]".to_string());
                    self.orch
                        .storage
                        .save_message(&self.conversation_id, Role::Tool, &summary, Utc::now())
                        .await?;
                    self.history.push(Message::tool(summary.clone()));
                    increment = summary;

                    manager
                        .save(&fp, "streaming", self.turn, vec![], results)
                        .await?;

                    self.turn += 1;
                    self.orch.metrics.incr("turns", 1);

                    if self.turn >= config.max_iterations {
                        warn!(
                            turn = self.turn,
                            max = config.max_iterations,
                            "iteration budget exhausted"
                        );
                        let notice = "Maximum iterations reached; ending session.";
                        self.orch
                            .storage
                            .save_message(&self.conversation_id, Role::System, notice, Utc::now())
                            .await?;
                        self.history.push(Message::system(notice));
                        self.finish().await?;
                        break;
                    }
                }
            }
        }

        // Completed cleanly: checkpoints are no longer needed.
        for t in 0..=self.turn {
            let fp = manager.fingerprint(&self.session_id, &self.query, t, &tool_names);
            manager.delete(&fp).await?;
        }
        if let Err(err) = transport.close().await {
            debug!(error = %err, "session close failed");
        }
        Ok(())
    }

    /// Consume one provider stream until it ends, the protocol ends the
    /// session, or an execute hands back a tool batch.
    async fn stream_turn(
        &mut self,
        transport: &mut TransportDriver,
        increment: &str,
    ) -> Result<TurnOutcome, EngineError> {
        let mut parser = StreamParser::new();
        let mut acc = EventAccumulator::new();
        let cancel = self.cancel.clone();
        let mut stream = transport.next_stream(&self.history, increment).await?;

        let mut respond_text = String::new();
        let mut execute_seen = false;
        let mut ended = false;

        'read: loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => {
                    let interrupted = drain_interrupted(&mut parser, &mut acc);
                    for event in &interrupted {
                        self.emit(event).await?;
                    }
                    return Err(AgentError::Cancelled.into());
                }
                item = stream.next() => item,
            };

            let mut batch_events = Vec::new();
            match item {
                Some(Ok(token)) => {
                    self.orch.metrics.incr("tokens", 1);
                    for segment in parser.feed(&token) {
                        match acc.accept(segment) {
                            Ok(events) => batch_events.extend(events),
                            Err(err) => {
                                let interrupted = acc.interrupt();
                                for event in &interrupted {
                                    self.emit(event).await?;
                                }
                                return Err(err.into());
                            }
                        }
                    }
                }
                Some(Err(err)) => {
                    // Make partial state observable before the original
                    // failure propagates.
                    let interrupted = drain_interrupted(&mut parser, &mut acc);
                    for event in &interrupted {
                        self.emit(event).await?;
                    }
                    return Err(err.into());
                }
                None => {
                    for segment in parser.finish() {
                        batch_events.extend(acc.accept(segment)?);
                    }
                    batch_events.extend(acc.flush());
                    ended = true;
                }
            }

            for event in batch_events {
                match &event {
                    AgentEvent::Respond { content, .. } => {
                        if !respond_text.is_empty() {
                            respond_text.push('\n');
                        }
                        respond_text.push_str(content);
                        self.emit(&event).await?;
                    }
                    AgentEvent::Execute { .. } => {
                        self.emit(&event).await?;
                        execute_seen = true;
                    }
                    AgentEvent::End { .. } => {
                        self.finish().await?;
                        ended = true;
                    }
                    _ => self.emit(&event).await?,
                }
            }

            if ended || execute_seen {
                break 'read;
            }
        }

        if !respond_text.is_empty() {
            self.orch
                .storage
                .save_message(
                    &self.conversation_id,
                    Role::Assistant,
                    &respond_text,
                    Utc::now(),
                )
                .await?;
            self.history.push(Message::assistant(respond_text));
        }

        if execute_seen && !self.end_sent {
            let batch = acc.take_batch();
            if !batch.is_empty() {
                return Ok(TurnOutcome::Batch(batch));
            }
            debug!("execute with no pending calls, treating as completion");
        }

        if !self.end_sent {
            // Upstream closed without the protocol's end marker; the
            // stream still terminates explicitly.
            self.finish().await?;
        }
        Ok(TurnOutcome::Finished)
    }

    /// Metrics snapshot, then the single terminal End.
    async fn finish(&mut self) -> Result<(), EngineError> {
        if self.end_sent {
            return Ok(());
        }
        let snapshot = serde_json::to_value(self.orch.metrics.snapshot()).unwrap_or(Value::Null);
        self.emit(&AgentEvent::metrics(snapshot)).await?;
        self.emit(&AgentEvent::end()).await?;
        Ok(())
    }

    async fn emit(&mut self, event: &AgentEvent) -> Result<(), EngineError> {
        if matches!(event, AgentEvent::End { .. }) {
            if self.end_sent {
                return Ok(());
            }
            self.end_sent = true;
        }
        let payload = serde_json::to_value(event).unwrap_or(Value::Null);
        self.orch
            .storage
            .save_event(&self.conversation_id, event.event_type(), &payload)
            .await?;
        self.events
            .send(event.clone())
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    /// Terminal Error event on the failure path. Best-effort: the
    /// channel may already be gone.
    async fn send_error(&mut self, err: &EngineError) {
        if self.end_sent {
            return;
        }
        let event = AgentEvent::error(err.surface_message());
        let payload = serde_json::to_value(&event).unwrap_or(Value::Null);
        let _ = self
            .orch
            .storage
            .save_event(&self.conversation_id, event.event_type(), &payload)
            .await;
        let _ = self.events.send(event).await;
        self.end_sent = true;
    }

    fn check_cancel(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            Err(AgentError::Cancelled.into())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use strand_core::config::TransportMode;
    use strand_core::provider::TokenStream;
    use strand_llm::{MockProvider, MockResponse};
    use strand_store::{Database, SqliteStorage};

    fn config(transport: TransportMode) -> ExecutionConfig {
        ExecutionConfig::builder()
            .model("mock-model")
            .transport(transport)
            .build()
    }

    fn storage() -> Arc<dyn Storage> {
        Arc::new(SqliteStorage::new(Database::in_memory().unwrap()))
    }

    async fn run_session(
        orch: &Orchestrator,
        query: &str,
    ) -> (Result<(), EngineError>, Vec<AgentEvent>) {
        let (tx, mut rx) = mpsc::channel(32);
        let result = orch
            .run(
                UserId::new(),
                ConversationId::new(),
                query,
                tx,
                CancellationToken::new(),
            )
            .await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (result, events)
    }

    fn types(events: &[AgentEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_type()).collect()
    }

    #[tokio::test]
    async fn think_respond_end_session() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::tokens(&[
            "§think: a\n",
            "§respond: b\n",
            "§end\n",
        ])]));
        let orch = Orchestrator::new(
            config(TransportMode::Replay),
            provider,
            storage(),
            Arc::new(ToolRegistry::with_builtins()),
        );

        let (result, events) = run_session(&orch, "hello").await;
        result.unwrap();
        assert_eq!(types(&events), vec!["think", "respond", "metrics", "end"]);
    }

    #[tokio::test]
    async fn tool_cycle_yields_one_execute_one_result() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tokens(&[
                "§call: {\"name\":\"echo\",\"args\":{\"text\":\"hi\"}}\n",
                "§execute\n",
            ]),
            MockResponse::tokens(&["§respond: done\n", "§end\n"]),
        ]));
        let orch = Orchestrator::new(
            config(TransportMode::Replay),
            provider,
            storage(),
            Arc::new(ToolRegistry::with_builtins()),
        );

        let (result, events) = run_session(&orch, "use the echo tool").await;
        result.unwrap();
        assert_eq!(
            types(&events),
            vec!["call", "execute", "result", "respond", "metrics", "end"]
        );

        let result_event = events
            .iter()
            .find_map(|e| match e {
                AgentEvent::Result { payload, .. } => Some(payload),
                _ => None,
            })
            .expect("result event");
        assert_eq!(result_event.tools_executed, 1);
        assert_eq!(result_event.results[0].content, "hi");
    }

    #[tokio::test]
    async fn batch_of_two_reports_two_executed() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tokens(&[
                "§call: [{\"name\":\"echo\",\"args\":{\"text\":\"a\"}},{\"name\":\"clock\"}]\n",
                "§execute\n",
            ]),
            MockResponse::tokens(&["§end\n"]),
        ]));
        let orch = Orchestrator::new(
            config(TransportMode::Replay),
            provider,
            storage(),
            Arc::new(ToolRegistry::with_builtins()),
        );

        let (result, events) = run_session(&orch, "two tools").await;
        result.unwrap();

        let payload = events
            .iter()
            .find_map(|e| match e {
                AgentEvent::Result { payload, .. } => Some(payload),
                _ => None,
            })
            .expect("result event");
        assert_eq!(payload.tools_executed, 2);
        // Echo first, clock second: submission order survives.
        assert_eq!(payload.results[0].content, "a");
    }

    #[tokio::test]
    async fn auto_mode_falls_back_and_ends_normally() {
        let provider = Arc::new(
            MockProvider::new(vec![MockResponse::tokens(&["§respond: ok\n", "§end\n"])])
                .refuse_connections(),
        );
        let orch = Orchestrator::new(
            config(TransportMode::Auto),
            provider.clone(),
            storage(),
            Arc::new(ToolRegistry::with_builtins()),
        );

        let (result, events) = run_session(&orch, "hi").await;
        result.unwrap();
        assert_eq!(events.last().unwrap().event_type(), "end");
        assert_eq!(provider.connect_count(), 1);
    }

    #[tokio::test]
    async fn end_duplication_collapses() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::tokens(&[
            "§respond: x\n",
            "§end\n",
            "§end\n",
        ])]));
        let orch = Orchestrator::new(
            config(TransportMode::Replay),
            provider,
            storage(),
            Arc::new(ToolRegistry::with_builtins()),
        );

        let (result, events) = run_session(&orch, "hi").await;
        result.unwrap();
        let ends = events.iter().filter(|e| e.event_type() == "end").count();
        assert_eq!(ends, 1);
    }

    #[tokio::test]
    async fn iteration_budget_ends_with_normal_end() {
        let cfg = ExecutionConfig::builder()
            .transport(TransportMode::Replay)
            .max_iterations(1)
            .build();
        let provider = Arc::new(MockProvider::new(vec![MockResponse::tokens(&[
            "§call: {\"name\":\"clock\"}\n",
            "§execute\n",
        ])]));
        let orch = Orchestrator::new(
            cfg,
            provider,
            storage(),
            Arc::new(ToolRegistry::with_builtins()),
        );

        let (result, events) = run_session(&orch, "keep going").await;
        result.unwrap();
        assert_eq!(events.last().unwrap().event_type(), "end");
        let errors = events.iter().filter(|e| e.event_type() == "error").count();
        assert_eq!(errors, 0);
    }

    #[tokio::test]
    async fn repeated_batch_trips_loop_detector() {
        let same_turn = [
            "§call: {\"name\":\"clock\",\"args\":{}}\n",
            "§execute\n",
        ];
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tokens(&same_turn),
            MockResponse::tokens(&same_turn),
        ]));
        let orch = Orchestrator::new(
            config(TransportMode::Replay),
            provider,
            storage(),
            Arc::new(ToolRegistry::with_builtins()),
        );

        let (result, events) = run_session(&orch, "loop forever").await;
        assert!(matches!(result, Err(EngineError::LoopDetected(_))));
        assert_eq!(events.last().unwrap().event_type(), "error");
    }

    #[tokio::test]
    async fn provider_failure_surfaces_error_event() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::Error(
            AgentError::Protocol("broken".into()),
        )]));
        let orch = Orchestrator::new(
            config(TransportMode::Replay),
            provider,
            storage(),
            Arc::new(ToolRegistry::with_builtins()),
        );

        let (result, events) = run_session(&orch, "hi").await;
        assert!(result.is_err());
        assert_eq!(events.last().unwrap().event_type(), "error");
    }

    #[tokio::test]
    async fn cancellation_propagates() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::tokens(&["§end\n"])]));
        let orch = Orchestrator::new(
            config(TransportMode::Replay),
            provider,
            storage(),
            Arc::new(ToolRegistry::with_builtins()),
        );

        let (tx, _rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = orch
            .run(UserId::new(), ConversationId::new(), "hi", tx, cancel)
            .await;
        assert!(matches!(
            result,
            Err(EngineError::Agent(AgentError::Cancelled))
        ));
    }

    /// Records the message lists passed to `stream`.
    struct CapturingProvider {
        seen: Arc<std::sync::Mutex<Vec<Vec<Message>>>>,
    }

    #[async_trait]
    impl LlmProvider for CapturingProvider {
        fn name(&self) -> &str {
            "capturing"
        }

        async fn generate(&self, _messages: &[Message]) -> Result<String, AgentError> {
            Err(AgentError::Network("no generate".into()))
        }

        async fn stream(&self, messages: &[Message]) -> Result<TokenStream, AgentError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(Box::pin(stream::iter(vec![Ok("§end\n".to_string())])))
        }
    }

    #[tokio::test]
    async fn tool_inventory_reaches_provider_context() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let orch = Orchestrator::new(
            config(TransportMode::Replay),
            Arc::new(CapturingProvider { seen: seen.clone() }),
            storage(),
            Arc::new(ToolRegistry::with_builtins()),
        );

        let (result, _events) = run_session(&orch, "hi").await;
        result.unwrap();

        let calls = seen.lock().unwrap();
        let first = &calls[0][0];
        assert_eq!(first.role, Role::System);
        assert!(first.content.contains("Available tools"));
        assert!(first.content.contains("\"echo\""));
        assert!(first.content.contains("write_note"));
    }

    /// Yields scripted items (tokens and mid-stream errors) once, then
    /// exhausts.
    struct InterruptingProvider;

    #[async_trait]
    impl LlmProvider for InterruptingProvider {
        fn name(&self) -> &str {
            "interrupting"
        }

        async fn generate(&self, _messages: &[Message]) -> Result<String, AgentError> {
            Err(AgentError::Network("no generate".into()))
        }

        async fn stream(&self, _messages: &[Message]) -> Result<TokenStream, AgentError> {
            Ok(Box::pin(stream::iter(vec![
                Ok("§call: {\"name\":\"echo\",\"args\":{\"text\":\"hi\"}}\n".to_string()),
                Err(AgentError::Network("connection reset".into())),
            ])))
        }
    }

    #[tokio::test]
    async fn mid_stream_failure_emits_graceful_execute() {
        let orch = Orchestrator::new(
            config(TransportMode::Replay),
            Arc::new(InterruptingProvider),
            storage(),
            Arc::new(ToolRegistry::with_builtins()),
        );

        let (result, events) = run_session(&orch, "hi").await;
        assert!(result.is_err());

        let kinds = types(&events);
        // The pending batch became observable before the error.
        assert!(kinds.contains(&"execute"), "got: {kinds:?}");
        assert_eq!(*kinds.last().unwrap(), "error");
        assert!(!kinds.contains(&"result"));
    }

    #[tokio::test]
    async fn loop_detector_unit_behavior() {
        let mut detector = LoopDetector::new(4);
        let a = vec![ToolCall::new("a")];
        let b = vec![ToolCall::new("b")];

        detector.observe(&a).unwrap();
        detector.observe(&b).unwrap();
        // A-B-A alternation.
        assert!(detector.observe(&a).is_err());

        let mut detector = LoopDetector::new(4);
        detector.observe(&a).unwrap();
        // A-A repetition.
        assert!(detector.observe(&a).is_err());

        let mut detector = LoopDetector::new(4);
        detector.observe(&[]).unwrap();
        detector.observe(&[]).unwrap();
    }
}
