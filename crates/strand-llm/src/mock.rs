use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use strand_core::errors::AgentError;
use strand_core::messages::Message;
use strand_core::provider::{LlmProvider, LlmSession, TokenStream};

/// One scripted response. Responses are consumed in order across
/// `generate`, `stream`, and session `send` calls.
pub enum MockResponse {
    /// Yield these tokens as a successful stream.
    Tokens(Vec<String>),
    /// Fail the request with this error.
    Error(AgentError),
    /// Sleep, then yield the tokens. Exercises timeout paths.
    Delay(Duration, Vec<String>),
}

impl MockResponse {
    /// A single-token response.
    pub fn text(content: &str) -> Self {
        Self::Tokens(vec![content.to_string()])
    }

    pub fn tokens(parts: &[&str]) -> Self {
        Self::Tokens(parts.iter().map(|p| p.to_string()).collect())
    }
}

/// Scripted in-memory provider for tests. Not wired to any network.
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    fail_connect: AtomicBool,
    calls: AtomicUsize,
    connects: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            fail_connect: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        }
    }

    /// Make every `connect` fail with a transport error. Streaming
    /// calls still follow the script, which is how the auto transport
    /// fallback is exercised.
    pub fn refuse_connections(self) -> Self {
        self.fail_connect.store(true, Ordering::Relaxed);
        self
    }

    /// Number of generate/stream/send calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    async fn next_stream(
        responses: &Arc<Mutex<VecDeque<MockResponse>>>,
        calls: &AtomicUsize,
    ) -> Result<TokenStream, AgentError> {
        calls.fetch_add(1, Ordering::Relaxed);
        let next = responses.lock().pop_front();
        match next {
            Some(MockResponse::Tokens(tokens)) => {
                Ok(Box::pin(stream::iter(tokens.into_iter().map(Ok))))
            }
            Some(MockResponse::Error(err)) => Err(err),
            Some(MockResponse::Delay(delay, tokens)) => {
                tokio::time::sleep(delay).await;
                Ok(Box::pin(stream::iter(tokens.into_iter().map(Ok))))
            }
            None => Err(AgentError::Internal("mock script exhausted".into())),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, _messages: &[Message]) -> Result<String, AgentError> {
        use futures::StreamExt;
        let mut stream = Self::next_stream(&self.responses, &self.calls).await?;
        let mut out = String::new();
        while let Some(token) = stream.next().await {
            out.push_str(&token?);
        }
        Ok(out)
    }

    async fn stream(&self, _messages: &[Message]) -> Result<TokenStream, AgentError> {
        Self::next_stream(&self.responses, &self.calls).await
    }

    async fn connect(&self, _messages: &[Message]) -> Result<Box<dyn LlmSession>, AgentError> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        if self.fail_connect.load(Ordering::Relaxed) {
            return Err(AgentError::Transport("mock connection refused".into()));
        }
        Ok(Box::new(MockSession {
            responses: self.responses.clone(),
            calls: AtomicUsize::new(0),
            closed: false,
        }))
    }
}

/// Session handle over the same script as the owning provider.
pub struct MockSession {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    calls: AtomicUsize,
    closed: bool,
}

#[async_trait]
impl LlmSession for MockSession {
    async fn send(&mut self, _content: &str) -> Result<TokenStream, AgentError> {
        if self.closed {
            return Err(AgentError::Transport("session closed".into()));
        }
        MockProvider::next_stream(&self.responses, &self.calls).await
    }

    async fn close(&mut self) -> Result<(), AgentError> {
        self.closed = true;
        Ok(())
    }
}
