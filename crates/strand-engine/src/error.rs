use strand_core::errors::AgentError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("loop detected: {0}")]
    LoopDetected(String),

    #[error("event channel closed by receiver")]
    ChannelClosed,
}

impl EngineError {
    /// Message surfaced to the caller in the terminal `Error` event.
    pub fn surface_message(&self) -> String {
        match self {
            Self::Agent(e) => e.to_string(),
            Self::LoopDetected(msg) => format!("loop detected: {msg}"),
            Self::ChannelClosed => "event channel closed by receiver".to_string(),
        }
    }
}
