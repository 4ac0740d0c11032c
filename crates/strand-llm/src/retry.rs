use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use strand_core::errors::AgentError;

/// Exponential-backoff retry policy. Retries only errors classified
/// retryable; fatal and unclassified errors surface immediately.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying `attempt` (0-based). Server-suggested
    /// delays win over the computed backoff.
    pub fn delay_for(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }
        let backoff =
            self.base_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped = backoff.min(self.max_delay.as_millis() as f64) as u64;
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }

    /// Run `operation` with up to `max_attempts` tries. After the last
    /// attempt the original error is re-raised unchanged.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if err.is_fatal() || !err.is_retryable() || attempt + 1 == attempts {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt, err.suggested_delay());
                    warn!(
                        operation = label,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after error"
                    );
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AgentError::Internal("retries exhausted".into())))
    }
}
