use std::time::Duration;

/// Typed error hierarchy for the agent runtime.
/// Classifies errors as fatal (don't retry), retryable, or operational.
#[derive(Clone, Debug, thiserror::Error)]
pub enum AgentError {
    // Fatal — don't retry
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("tool '{tool}' failed: {message}")]
    ToolSystem { tool: String, message: String },
    #[error("all {attempts} keys exhausted for provider '{provider}'")]
    KeysExhausted { provider: String, attempts: usize },
    #[error("checkpoint corrupt: {0}")]
    CheckpointCorrupt(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // Operational
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("circuit '{name}' open, retry in {retry_in:?}")]
    CircuitOpen { name: String, retry_in: Duration },
    #[error("store error: {0}")]
    Store(String),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Internal(String),
}

impl AgentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) | Self::Timeout(_) => true,
            // Foreign errors are classified by signature.
            Self::Internal(msg) => retryable_signature(msg),
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_)
                | Self::ToolSystem { .. }
                | Self::KeysExhausted { .. }
                | Self::CheckpointCorrupt(_)
        )
    }

    /// Rate-limit classification drives key rotation.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Internal(msg) | Self::Network(msg) => rate_limit_signature(msg),
            _ => false,
        }
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::ToolSystem { .. } => "tool_system",
            Self::KeysExhausted { .. } => "keys_exhausted",
            Self::CheckpointCorrupt(_) => "checkpoint_corrupt",
            Self::RateLimited { .. } => "rate_limited",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Store(_) => "store",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }
}

/// Keyword classifier for error strings coming from foreign layers
/// (provider SDKs, OS). Retryable signatures cover transient faults.
pub fn retryable_signature(message: &str) -> bool {
    let lower = message.to_lowercase();
    const RETRYABLE: &[&str] = &[
        "timeout",
        "timed out",
        "rate limit",
        "429",
        "503",
        "connection",
        "quota",
        "overloaded",
        "unavailable",
    ];
    RETRYABLE.iter().any(|kw| lower.contains(kw))
}

/// Narrower classifier: signatures that specifically indicate the
/// current credential is throttled (drives KeyRotator).
pub fn rate_limit_signature(message: &str) -> bool {
    let lower = message.to_lowercase();
    const RATE_LIMIT: &[&str] = &["rate limit", "429", "quota", "too many requests"];
    RATE_LIMIT.iter().any(|kw| lower.contains(kw))
}
