use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use strand_core::errors::AgentError;
use strand_core::messages::Message;
use strand_core::provider::{LlmProvider, LlmSession, TokenStream};

use crate::breaker::CircuitBreaker;
use crate::keys::KeyRotator;
use crate::limiter::RateLimiter;
use crate::retry::RetryPolicy;

/// Tuning for the reliability middleware around a provider.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub retry: RetryPolicy,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            requests_per_minute: 60,
            burst: 10,
        }
    }
}

/// Wraps an `LlmProvider` with the full resilience stack: circuit
/// breaker, then local rate limiter, then retry with backoff. When a
/// key rotator is attached, rate-limit failures that survive the retry
/// layer advance to the next credential, each key tried at most once
/// per request before the exhaustion error surfaces.
pub struct ReliableGateway {
    inner: Arc<dyn LlmProvider>,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    retry: RetryPolicy,
    rotator: Option<Arc<KeyRotator>>,
}

impl ReliableGateway {
    pub fn new(inner: Arc<dyn LlmProvider>, config: GatewayConfig) -> Self {
        let name = inner.name().to_string();
        Self {
            inner,
            breaker: CircuitBreaker::new(name, config.failure_threshold, config.recovery_timeout),
            limiter: RateLimiter::new(config.requests_per_minute, config.burst),
            retry: config.retry,
            rotator: None,
        }
    }

    pub fn with_defaults(inner: Arc<dyn LlmProvider>) -> Self {
        Self::new(inner, GatewayConfig::default())
    }

    pub fn with_rotator(mut self, rotator: Arc<KeyRotator>) -> Self {
        self.rotator = Some(rotator);
        self
    }

    pub fn circuit_state(&self) -> &'static str {
        self.breaker.state_name()
    }

    /// One guarded attempt chain: breaker gate, local token, then the
    /// retry loop around the provider call.
    async fn guarded<T, F, Fut>(&self, label: &str, operation: &F) -> Result<T, AgentError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        self.retry
            .run(label, || async {
                self.breaker.check()?;
                if !self.limiter.try_acquire() {
                    return Err(AgentError::RateLimited {
                        retry_after: Some(Duration::from_millis(500)),
                    });
                }
                match operation().await {
                    Ok(value) => {
                        self.breaker.record_success();
                        Ok(value)
                    }
                    Err(err) => {
                        self.breaker.record_failure();
                        Err(err)
                    }
                }
            })
            .await
    }

    /// Guarded call plus credential rotation. Without a rotator this is
    /// a single guarded chain.
    async fn call<T, F, Fut>(&self, label: &str, operation: F) -> Result<T, AgentError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let Some(rotator) = &self.rotator else {
            return self.guarded(label, &operation).await;
        };

        let attempts = rotator.len().max(1);
        for _ in 0..attempts {
            match self.guarded(label, &operation).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limit() => {
                    warn!(
                        provider = self.inner.name(),
                        operation = label,
                        error = %err,
                        "request rate limited after retries"
                    );
                    rotator.rotate(&err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(AgentError::KeysExhausted {
            provider: self.inner.name().to_string(),
            attempts,
        })
    }
}

#[async_trait]
impl LlmProvider for ReliableGateway {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, messages: &[Message]) -> Result<String, AgentError> {
        self.call("generate", || self.inner.generate(messages)).await
    }

    async fn stream(&self, messages: &[Message]) -> Result<TokenStream, AgentError> {
        self.call("stream", || self.inner.stream(messages)).await
    }

    async fn connect(&self, messages: &[Message]) -> Result<Box<dyn LlmSession>, AgentError> {
        self.call("connect", || self.inner.connect(messages)).await
    }
}
