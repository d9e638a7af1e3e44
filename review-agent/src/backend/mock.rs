//! Mock decision source for testing.

use async_trait::async_trait;
use evidence::{DecisionRecord, RiskLevel};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::traits::*;

type Outcome = Result<CandidateDecision, SourceError>;

/// Mock source for testing.
///
/// Scripted outcomes are returned in order; once the script is exhausted
/// every call returns the fallback outcome.
pub struct MockDecisionSource {
    source_id: String,
    available: AtomicBool,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    delay: Option<Duration>,
    call_count: AtomicU32,
}

impl MockDecisionSource {
    /// Create a mock that approves everything with a low-risk record.
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            available: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(CandidateDecision::unmeasured(
                DecisionRecord::new(RiskLevel::Low, 5.0, 0.99).with_summary("Mock decision"),
            )),
            delay: None,
            call_count: AtomicU32::new(0),
        }
    }

    /// Always return `record`.
    pub fn always(record: DecisionRecord) -> Self {
        Self::new("mock-source").with_fallback(Ok(CandidateDecision::unmeasured(record)))
    }

    /// Always fail with `error`.
    pub fn failing(error: SourceError) -> Self {
        Self::new("mock-source").with_fallback(Err(error))
    }

    /// Set the outcome returned once the script runs out.
    pub fn with_fallback(mut self, outcome: Outcome) -> Self {
        self.fallback = outcome;
        self
    }

    /// Queue an outcome.
    pub fn then(self, outcome: Outcome) -> Self {
        self.lock_script().push_back(outcome);
        self
    }

    /// Queue a raw model response, parsed as a real source would.
    pub fn then_raw(self, content: &str) -> Self {
        let outcome = parse_decision(content).map(CandidateDecision::unmeasured);
        self.then(outcome)
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set availability.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Get the number of times decide was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Reset the call count.
    pub fn reset_call_count(&self) {
        self.call_count.store(0, Ordering::SeqCst);
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Outcome>> {
        // A panic while holding the lock can only come from a test; keep going.
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockDecisionSource {
    fn default() -> Self {
        Self::new("mock-source")
    }
}

#[async_trait]
impl DecisionSource for MockDecisionSource {
    fn id(&self) -> &str {
        &self.source_id
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn decide(&self, _input: &str) -> Result<CandidateDecision, SourceError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("Mock source disabled".to_string()));
        }

        let scripted = self.lock_script().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_source() {
        let source = MockDecisionSource::new("test-source");

        assert!(source.is_available().await);
        assert_eq!(source.call_count(), 0);

        let candidate = tokio_test::assert_ok!(source.decide("diff --git a/x b/x").await);
        assert_eq!(candidate.record.risk_level, RiskLevel::Low);
        assert!(candidate.usage.is_none());
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_script_then_fallback() {
        let source = MockDecisionSource::failing(SourceError::NetworkError("reset".into()))
            .then(Ok(CandidateDecision::unmeasured(DecisionRecord::new(
                RiskLevel::High,
                80.0,
                0.9,
            ))))
            .then_raw("{ not json");

        let first = source.decide("x").await.unwrap();
        assert_eq!(first.record.risk_level, RiskLevel::High);
        assert!(matches!(source.decide("x").await, Err(SourceError::Malformed(_))));
        assert!(matches!(source.decide("x").await, Err(SourceError::NetworkError(_))));
        assert!(matches!(source.decide("x").await, Err(SourceError::NetworkError(_))));
        assert_eq!(source.call_count(), 4);
    }

    #[tokio::test]
    async fn test_mock_unavailable() {
        let source = MockDecisionSource::new("test-source").with_available(false);

        assert!(!source.is_available().await);

        let result = source.decide("x").await;
        assert!(matches!(result, Err(SourceError::Unavailable(_))));
    }
}
