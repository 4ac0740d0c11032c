use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::AgentError;
use crate::messages::Message;

/// Raw partial tokens from a model generation. Delimiters may split
/// across items; consumers must not assume any chunking.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, AgentError>> + Send>>;

/// Trait implemented by each LLM provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One-shot non-streaming generation.
    async fn generate(&self, messages: &[Message]) -> Result<String, AgentError>;

    /// Stateless streaming generation over the full message history.
    async fn stream(&self, messages: &[Message]) -> Result<TokenStream, AgentError>;

    /// Establish a persistent session for the resume transport.
    /// Providers without session support keep the default.
    async fn connect(&self, _messages: &[Message]) -> Result<Box<dyn LlmSession>, AgentError> {
        Err(AgentError::Transport(format!(
            "provider '{}' does not support resumable sessions",
            self.name()
        )))
    }
}

/// A persistent provider session. Obtained only via `connect`; an
/// implementation must fail fast from `send` once closed.
#[async_trait]
pub trait LlmSession: Send {
    async fn send(&mut self, content: &str) -> Result<TokenStream, AgentError>;
    async fn close(&mut self) -> Result<(), AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    struct StatelessProvider;

    #[async_trait]
    impl LlmProvider for StatelessProvider {
        fn name(&self) -> &str {
            "stateless"
        }

        async fn generate(&self, _messages: &[Message]) -> Result<String, AgentError> {
            Ok("text".into())
        }

        async fn stream(&self, _messages: &[Message]) -> Result<TokenStream, AgentError> {
            Ok(Box::pin(stream::iter(vec![Ok("text".to_string())])))
        }
    }

    #[tokio::test]
    async fn default_connect_is_transport_error() {
        let provider = StatelessProvider;
        let err = provider.connect(&[]).await.err().expect("expected error");
        assert!(matches!(err, AgentError::Transport(_)));
    }
}
