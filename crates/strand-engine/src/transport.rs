use std::sync::Arc;

use tracing::info;

use strand_core::config::TransportMode;
use strand_core::errors::AgentError;
use strand_core::messages::Message;
use strand_core::provider::{LlmProvider, LlmSession, TokenStream};

/// Drives one provider across turns under the configured transport.
///
/// Replay re-sends full history each turn. Resume connects once and
/// then sends only the increment; a transport failure there is fatal.
/// Auto behaves like resume until session establishment or send fails,
/// then falls back to replay for the rest of the session without
/// surfacing the failure.
pub struct TransportDriver {
    mode: TransportMode,
    provider: Arc<dyn LlmProvider>,
    session: Option<Box<dyn LlmSession>>,
    fell_back: bool,
}

impl TransportDriver {
    pub fn new(mode: TransportMode, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            mode,
            provider,
            session: None,
            fell_back: false,
        }
    }

    /// Whether auto mode has degraded to replay.
    pub fn fell_back(&self) -> bool {
        self.fell_back
    }

    /// Open the token stream for one turn. `history` is the full
    /// conversation including the latest message; `increment` is that
    /// latest message's content alone.
    pub async fn next_stream(
        &mut self,
        history: &[Message],
        increment: &str,
    ) -> Result<TokenStream, AgentError> {
        match self.mode {
            TransportMode::Replay => self.provider.stream(history).await,
            TransportMode::Resume => self.resume_stream(history, increment).await,
            TransportMode::Auto => {
                if self.fell_back {
                    return self.provider.stream(history).await;
                }
                match self.resume_stream(history, increment).await {
                    Ok(stream) => Ok(stream),
                    Err(err) => {
                        info!(
                            provider = self.provider.name(),
                            error = %err,
                            "resume transport unavailable, falling back to replay"
                        );
                        self.fell_back = true;
                        self.session = None;
                        self.provider.stream(history).await
                    }
                }
            }
        }
    }

    async fn resume_stream(
        &mut self,
        history: &[Message],
        increment: &str,
    ) -> Result<TokenStream, AgentError> {
        if self.session.is_none() {
            // Establish with everything before the increment; the
            // increment itself goes through send.
            let prior = &history[..history.len().saturating_sub(1)];
            self.session = Some(self.provider.connect(prior).await?);
        }
        match self.session.as_mut() {
            Some(session) => session.send(increment).await,
            None => Err(AgentError::Transport("no session established".into())),
        }
    }

    pub async fn close(&mut self) -> Result<(), AgentError> {
        if let Some(mut session) = self.session.take() {
            session.close().await?;
        }
        Ok(())
    }
}
