use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tools::AccessLevel;

/// How the orchestrator talks to the provider across turns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Stateless: full context reassembled from storage every call.
    Replay,
    /// Stateful: one persistent provider session, incremental sends.
    Resume,
    /// Prefer resume, fall back to replay on session-establishment
    /// failure without surfacing an error.
    Auto,
}

/// Immutable execution configuration, built once per agent and shared
/// read-only across turns.
#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    pub model: String,
    pub transport: TransportMode,
    pub max_iterations: u32,
    pub tool_timeout: Duration,
    pub batch_concurrency: usize,
    pub access: AccessLevel,
    pub sandbox_root: PathBuf,
    /// Rolling window size for action-fingerprint loop detection.
    pub loop_window: usize,
    pub profile_tracking: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            model: "default".into(),
            transport: TransportMode::Auto,
            max_iterations: 10,
            tool_timeout: Duration::from_secs(30),
            batch_concurrency: 4,
            access: AccessLevel::Sandbox,
            sandbox_root: std::env::temp_dir(),
            loop_window: 4,
            profile_tracking: true,
        }
    }
}

impl ExecutionConfig {
    pub fn builder() -> ExecutionConfigBuilder {
        ExecutionConfigBuilder {
            config: Self::default(),
        }
    }
}

pub struct ExecutionConfigBuilder {
    config: ExecutionConfig,
}

impl ExecutionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn transport(mut self, mode: TransportMode) -> Self {
        self.config.transport = mode;
        self
    }

    pub fn max_iterations(mut self, n: u32) -> Self {
        self.config.max_iterations = n;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn batch_concurrency(mut self, n: usize) -> Self {
        self.config.batch_concurrency = n.max(1);
        self
    }

    pub fn access(mut self, level: AccessLevel) -> Self {
        self.config.access = level;
        self
    }

    pub fn sandbox_root(mut self, root: PathBuf) -> Self {
        self.config.sandbox_root = root;
        self
    }

    pub fn profile_tracking(mut self, enabled: bool) -> Self {
        self.config.profile_tracking = enabled;
        self
    }

    pub fn build(self) -> ExecutionConfig {
        self.config
    }
}
