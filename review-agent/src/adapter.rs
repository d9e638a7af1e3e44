//! Bounded retry with backoff around a decision source.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::backend::{CandidateDecision, DecisionSource, SourceError};

/// Error types for the adapter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdapterError {
    /// Every attempt failed
    #[error("Decision failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: SourceError,
    },

    /// A non-retriable error stopped the loop
    #[error("Decision failed on attempt {attempt}: {error}")]
    Terminal { attempt: u32, error: SourceError },

    /// The caller cancelled
    #[error("Decision cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `base * attempt`
    #[default]
    Linear,
    /// `base * 2^attempt`
    Exponential,
}

/// Retry settings for one adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Base delay between attempts
    pub base_delay: Duration,
    /// Upper bound on a single attempt
    pub attempt_timeout: Option<Duration>,
    /// Delay growth
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            attempt_timeout: Some(Duration::from_secs(60)),
            backoff: Backoff::Linear,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt)),
        }
    }
}

/// Cooperative cancellation shared between a caller and in-flight work.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Cancel every holder of this token.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A successful decision and how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Decided {
    pub candidate: CandidateDecision,
    pub attempts: u32,
}

/// Wraps a decision source with retry, timeout and cancellation.
#[derive(Clone)]
pub struct DecisionAdapter {
    source: Arc<dyn DecisionSource>,
    policy: RetryPolicy,
}

impl DecisionAdapter {
    /// Create an adapter. At least one attempt is always made.
    pub fn new(source: Arc<dyn DecisionSource>, mut policy: RetryPolicy) -> Self {
        policy.max_attempts = policy.max_attempts.max(1);
        Self { source, policy }
    }

    /// Identifier of the wrapped source.
    pub fn source_id(&self) -> &str {
        self.source.id()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide without external cancellation.
    pub async fn decide(&self, input: &str) -> Result<Decided, AdapterError> {
        self.decide_with_cancel(input, &CancelToken::new()).await
    }

    /// Decide, giving up as soon as `cancel` fires.
    pub async fn decide_with_cancel(
        &self,
        input: &str,
        cancel: &CancelToken,
    ) -> Result<Decided, AdapterError> {
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(AdapterError::Cancelled { attempts: attempt });
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AdapterError::Cancelled { attempts: attempt });
                }
                result = self.attempt(input) => result,
            };

            let error = match result {
                Ok(candidate) => {
                    debug!(
                        source = %self.source.id(),
                        attempt,
                        "Decision attempt succeeded"
                    );
                    return Ok(Decided {
                        candidate,
                        attempts: attempt,
                    });
                }
                Err(e) => e,
            };

            warn!(
                source = %self.source.id(),
                attempt,
                max_attempts,
                error = %error,
                "Decision attempt failed"
            );

            if !error.is_retriable() {
                return Err(AdapterError::Terminal { attempt, error });
            }
            if attempt >= max_attempts {
                return Err(AdapterError::Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let mut delay = self.policy.delay_after(attempt);
            if let Some(hint) = error.retry_after() {
                delay = delay.max(hint);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AdapterError::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One attempt, bounded by the timeout and checked for structure.
    async fn attempt(&self, input: &str) -> Result<CandidateDecision, SourceError> {
        let candidate = match self.policy.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, self.source.decide(input))
                .await
                .map_err(|_| SourceError::Timeout {
                    after_ms: limit.as_millis() as u64,
                })??,
            None => self.source.decide(input).await?,
        };

        candidate
            .record
            .check_bounds()
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        Ok(candidate)
    }
}
