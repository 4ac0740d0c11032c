use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use strand_core::errors::AgentError;

/// Alias env vars accepted in addition to `{PREFIX}_API_KEY`.
const KEY_ALIASES: &[(&str, &str)] = &[
    ("GOOGLE", "GEMINI_API_KEY"),
    ("ANTHROPIC", "CLAUDE_API_KEY"),
];

/// Round-robin credential rotator for one provider. Rotation advances
/// only on errors classified as rate limits; any other failure
/// surfaces unchanged.
pub struct KeyRotator {
    provider: String,
    keys: Vec<SecretString>,
    index: AtomicUsize,
}

impl std::fmt::Debug for KeyRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRotator")
            .field("provider", &self.provider)
            .field("keys", &format!("[{} redacted]", self.keys.len()))
            .finish()
    }
}

impl KeyRotator {
    pub fn new(provider: impl Into<String>, keys: Vec<String>) -> Self {
        let mut seen = Vec::new();
        let mut unique = Vec::new();
        for key in keys {
            if !key.is_empty() && !seen.contains(&key) {
                seen.push(key.clone());
                unique.push(SecretString::from(key));
            }
        }
        Self {
            provider: provider.into(),
            keys: unique,
            index: AtomicUsize::new(0),
        }
    }

    /// Discover keys from the environment: `{PREFIX}_API_KEY`,
    /// documented aliases, then `{PREFIX}_API_KEY_1..N` until the
    /// first gap.
    pub fn from_env(provider: &str) -> Self {
        let prefix = provider.to_uppercase();
        let mut keys = Vec::new();

        if let Ok(key) = std::env::var(format!("{prefix}_API_KEY")) {
            keys.push(key);
        }
        for (name, alias) in KEY_ALIASES {
            if *name == prefix {
                if let Ok(key) = std::env::var(alias) {
                    keys.push(key);
                }
            }
        }
        for n in 1.. {
            match std::env::var(format!("{prefix}_API_KEY_{n}")) {
                Ok(key) => keys.push(key),
                Err(_) => break,
            }
        }

        let rotator = Self::new(provider, keys);
        info!(
            provider = provider,
            keys = rotator.len(),
            "discovered provider credentials"
        );
        rotator
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn current_key(&self) -> Option<SecretString> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = self.index.load(Ordering::Relaxed) % self.keys.len();
        Some(self.keys[idx].clone())
    }

    /// Advance to the next key, but only for rate-limit failures.
    /// Returns whether rotation happened.
    pub fn rotate(&self, err: &AgentError) -> bool {
        if self.keys.len() < 2 || !err.is_rate_limit() {
            return false;
        }
        let prev = self.index.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        warn!(
            provider = %self.provider,
            from_slot = prev,
            to_slot = (prev + 1) % self.keys.len(),
            "rotated credential after rate limit"
        );
        true
    }

    /// Run `operation` once per key, starting at a randomized offset so
    /// concurrent processes spread load across slots. Rate-limited
    /// attempts move on to the next key; any other error surfaces
    /// immediately. Exhausting every key is terminal.
    pub async fn with_rotation<T, F, Fut>(&self, operation: F) -> Result<T, AgentError>
    where
        F: Fn(SecretString) -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        if self.keys.is_empty() {
            return Err(AgentError::KeysExhausted {
                provider: self.provider.clone(),
                attempts: 0,
            });
        }

        let start = rand::thread_rng().gen_range(0..self.keys.len());
        for offset in 0..self.keys.len() {
            let slot = (start + offset) % self.keys.len();
            match operation(self.keys[slot].clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limit() => {
                    warn!(
                        provider = %self.provider,
                        slot = slot,
                        error = %err,
                        "key rate limited, trying next"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Err(AgentError::KeysExhausted {
            provider: self.provider.clone(),
            attempts: self.keys.len(),
        })
    }
}

/// Process-wide map of provider name → rotator. Constructed once at
/// startup and passed by reference; never a global.
#[derive(Default)]
pub struct CredentialRegistry {
    rotators: DashMap<String, Arc<KeyRotator>>,
}

impl CredentialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, rotator: KeyRotator) {
        self.rotators
            .insert(rotator.provider().to_string(), Arc::new(rotator));
    }

    pub fn get(&self, provider: &str) -> Option<Arc<KeyRotator>> {
        self.rotators.get(provider).map(|r| r.clone())
    }

    /// Get the rotator for `provider`, discovering from the environment
    /// on first use.
    pub fn get_or_discover(&self, provider: &str) -> Arc<KeyRotator> {
        self.rotators
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(KeyRotator::from_env(provider)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn rate_limit() -> AgentError {
        AgentError::RateLimited { retry_after: None }
    }

    #[test]
    fn dedupes_and_drops_empty_keys() {
        let rotator = KeyRotator::new(
            "test",
            vec!["k1".into(), "".into(), "k1".into(), "k2".into()],
        );
        assert_eq!(rotator.len(), 2);
    }

    #[test]
    fn rotate_only_on_rate_limit() {
        let rotator = KeyRotator::new("test", vec!["k1".into(), "k2".into()]);
        let first = rotator.current_key().unwrap();

        assert!(!rotator.rotate(&AgentError::Network("connection reset".into())));
        assert_eq!(
            rotator.current_key().unwrap().expose_secret(),
            first.expose_secret()
        );

        assert!(rotator.rotate(&rate_limit()));
        assert_ne!(
            rotator.current_key().unwrap().expose_secret(),
            first.expose_secret()
        );
    }

    #[test]
    fn single_key_never_rotates() {
        let rotator = KeyRotator::new("test", vec!["only".into()]);
        assert!(!rotator.rotate(&rate_limit()));
    }

    #[test]
    fn debug_redacts_keys() {
        let rotator = KeyRotator::new("test", vec!["super-secret".into()]);
        let debug = format!("{rotator:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn env_discovery_with_numbered_keys() {
        std::env::set_var("ROTTEST_API_KEY", "base");
        std::env::set_var("ROTTEST_API_KEY_1", "one");
        std::env::set_var("ROTTEST_API_KEY_2", "two");

        let rotator = KeyRotator::from_env("rottest");
        assert_eq!(rotator.len(), 3);

        std::env::remove_var("ROTTEST_API_KEY");
        std::env::remove_var("ROTTEST_API_KEY_1");
        std::env::remove_var("ROTTEST_API_KEY_2");
    }

    #[test]
    fn env_discovery_honors_alias() {
        std::env::set_var("GEMINI_API_KEY", "alias-key");
        let rotator = KeyRotator::from_env("google");
        assert_eq!(rotator.len(), 1);
        std::env::remove_var("GEMINI_API_KEY");
    }

    #[tokio::test]
    async fn tries_every_key_once_then_exhausts() {
        let rotator = KeyRotator::new("test", vec!["k1".into(), "k2".into(), "k3".into()]);
        let tried: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let seen = tried.clone();
        let result: Result<(), _> = rotator
            .with_rotation(move |key| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(key.expose_secret().to_string());
                    Err(rate_limit())
                }
            })
            .await;

        let err = result.err().expect("expected exhaustion");
        assert!(matches!(
            err,
            AgentError::KeysExhausted { attempts: 3, .. }
        ));

        let mut attempted = tried.lock().clone();
        attempted.sort();
        assert_eq!(attempted, vec!["k1", "k2", "k3"]);
    }

    #[tokio::test]
    async fn non_rate_limit_error_stops_rotation() {
        let rotator = KeyRotator::new("test", vec!["k1".into(), "k2".into()]);
        let calls = Arc::new(Mutex::new(0u32));

        let counter = calls.clone();
        let result: Result<(), _> = rotator
            .with_rotation(move |_key| {
                let counter = counter.clone();
                async move {
                    *counter.lock() += 1;
                    Err(AgentError::Timeout(Duration::from_secs(1)))
                }
            })
            .await;

        assert!(matches!(result, Err(AgentError::Timeout(_))));
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn recovers_on_later_key() {
        let rotator = KeyRotator::new("test", vec!["bad".into(), "good".into()]);

        let result = rotator
            .with_rotation(|key| async move {
                if key.expose_secret() == "good" {
                    Ok("response")
                } else {
                    Err(rate_limit())
                }
            })
            .await;

        assert_eq!(result.ok(), Some("response"));
    }

    #[tokio::test]
    async fn empty_rotator_is_terminal() {
        let rotator = KeyRotator::new("test", vec![]);
        let result: Result<(), _> = rotator.with_rotation(|_key| async { Ok(()) }).await;
        assert!(matches!(
            result,
            Err(AgentError::KeysExhausted { attempts: 0, .. })
        ));
    }

    #[test]
    fn registry_reuses_rotators() {
        let registry = CredentialRegistry::new();
        registry.register(KeyRotator::new("openai", vec!["k".into()]));

        let a = registry.get("openai").expect("registered");
        let b = registry.get("openai").expect("registered");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.get("missing").is_none());
    }
}
