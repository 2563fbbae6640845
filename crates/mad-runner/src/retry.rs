//! Bounded retry with exponential backoff around the generate capability.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::client::{CallConstraints, GenerateClient, GenerateError};

/// Retry budget and backoff shape for external calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts allowed per call (first attempt included).
    pub max_retries: u32,
    /// Backoff before the second attempt; doubles each attempt after.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given 1-indexed failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay)
    }
}

/// Call-level failure surfaced to the orchestrator.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("call budget exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: GenerateError },
    #[error("non-retryable call failure: {0}")]
    Fatal(GenerateError),
}

/// Wraps a [`GenerateClient`] with the retry policy. Stateless across
/// invocations: each call owns its own attempt counter and backoff timer.
#[derive(Clone)]
pub struct RetryingCaller {
    client: Arc<dyn GenerateClient>,
    policy: RetryPolicy,
}

impl RetryingCaller {
    pub fn new(client: Arc<dyn GenerateClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Invoke the external capability, retrying transient failures with
    /// exponential backoff. Never returns empty output: an empty completion
    /// counts as a transient failure, and exhaustion surfaces as a typed
    /// [`CallError::Exhausted`].
    pub async fn invoke(
        &self,
        prompt: &str,
        constraints: &CallConstraints,
    ) -> Result<String, CallError> {
        let mut last = GenerateError::EmptyCompletion;
        for attempt in 1..=self.policy.max_retries {
            let error = match self.client.generate(prompt, constraints).await {
                Ok(text) if text.trim().is_empty() => GenerateError::EmptyCompletion,
                Ok(text) => return Ok(text),
                Err(e) if !e.is_transient() => return Err(CallError::Fatal(e)),
                Err(e) => e,
            };
            if attempt < self.policy.max_retries {
                let backoff = self.policy.backoff_for(attempt);
                warn!(
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    error = %error,
                    "transient call failure, backing off"
                );
                tokio::time::sleep(backoff).await;
            }
            last = error;
        }
        Err(CallError::Exhausted {
            attempts: self.policy.max_retries,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedClient {
        script: Mutex<VecDeque<Result<String, GenerateError>>>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<String, GenerateError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerateClient for ScriptedClient {
        async fn generate(
            &self,
            _prompt: &str,
            _constraints: &CallConstraints,
        ) -> Result<String, GenerateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(GenerateError::EmptyCompletion))
        }
    }

    fn constraints() -> CallConstraints {
        CallConstraints {
            max_tokens: 100,
            temperature: 0.7,
            json_object: true,
        }
    }

    fn rate_limited() -> Result<String, GenerateError> {
        Err(GenerateError::RateLimited)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(32));
        assert_eq!(policy.backoff_for(6), Duration::from_secs(60));
        assert_eq!(policy.backoff_for(10), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_max_minus_one_transient_failures() {
        let mut script: Vec<_> = (0..9).map(|_| rate_limited()).collect();
        script.push(Ok("texto final".to_string()));
        let client = ScriptedClient::new(script);
        let caller = RetryingCaller::new(client.clone(), RetryPolicy::default());
        let out = caller.invoke("p", &constraints()).await.unwrap();
        assert_eq!(out, "texto final");
        assert_eq!(client.calls(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_max_failures() {
        let script: Vec<_> = (0..10).map(|_| rate_limited()).collect();
        let client = ScriptedClient::new(script);
        let caller = RetryingCaller::new(client.clone(), RetryPolicy::default());
        let err = caller.invoke("p", &constraints()).await.unwrap_err();
        match err {
            CallError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 10);
                assert!(matches!(last, GenerateError::RateLimited));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(client.calls(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_short_circuits() {
        let client = ScriptedClient::new(vec![
            Err(GenerateError::InvalidRequest("bad key".into())),
            Ok("nunca chega aqui".to_string()),
        ]);
        let caller = RetryingCaller::new(client.clone(), RetryPolicy::default());
        let err = caller.invoke("p", &constraints()).await.unwrap_err();
        assert!(matches!(err, CallError::Fatal(GenerateError::InvalidRequest(_))));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_completion_is_retried() {
        let client = ScriptedClient::new(vec![Ok("  ".to_string()), Ok("texto".to_string())]);
        let caller = RetryingCaller::new(client.clone(), RetryPolicy::default());
        let out = caller.invoke("p", &constraints()).await.unwrap();
        assert_eq!(out, "texto");
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_transient_failures_all_retry() {
        let client = ScriptedClient::new(vec![
            Err(GenerateError::Timeout),
            Err(GenerateError::ServerError {
                status: 503,
                message: "overloaded".into(),
            }),
            Err(GenerateError::Transport("connection reset".into())),
            Ok("texto".to_string()),
        ]);
        let caller = RetryingCaller::new(client.clone(), RetryPolicy::default());
        let out = caller.invoke("p", &constraints()).await.unwrap();
        assert_eq!(out, "texto");
        assert_eq!(client.calls(), 4);
    }
}
