//! Review pipeline - sequences decision, gate, signing and ledger writes.
//!
//! ```text
//! RECEIVED → VALIDATED → DECIDING → GATED → SIGNED → EMITTED
//!     │                      │         │        │
//!     ▼                      ▼         ▼        ▼
//! REJECTED_INPUT     DECISION_FAILED  GATE_FAILED  (self-check defect)
//! ```
//!
//! Every resolved outcome leaves exactly one ledger event. Cancelled
//! requests leave none.

use evidence::{
    to_canonical_string, AuditTrail, CanonicalError, DecisionRecord, HashChainLedger, LedgerError,
    RecordSigner, SignatureError, SignedRecord, SigningKey,
};
use futures::future::join_all;
use review_agent::{
    account, AdapterError, CancelToken, DecisionAdapter, DecisionSource, RateTable, ReviewRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, PipelineSettings, ReviewConfig};
use crate::gate::{GateDecision, GateRule, VerificationGate};

/// Ledger event types written by the pipeline.
pub mod events {
    pub const INPUT_REJECTED: &str = "INPUT_REJECTED";
    pub const DECISION_FAILED: &str = "DECISION_FAILED";
    pub const REJECTED: &str = "REJECTED";
    pub const SELF_CHECK_FAILED: &str = "SELF_CHECK_FAILED";
    pub const APPROVED: &str = "APPROVED";
}

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Received,
    Validated,
    Deciding,
    Gated,
    Signed,
    Emitted,
    RejectedInput,
    DecisionFailed,
    GateFailed,
}

/// Why an input was refused before any decision was made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputRejection {
    #[error("input is empty")]
    Empty,
    #[error("input is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },
}

/// Error types for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Input failed validation
    #[error("Request {request_id} rejected: {reason}")]
    RejectedInput {
        request_id: String,
        reason: InputRejection,
    },

    /// The decision source could not produce a decision
    #[error("Request {request_id}: {source}")]
    DecisionFailed {
        request_id: String,
        source: AdapterError,
    },

    /// Caller cancelled before an outcome was reached
    #[error("Request {request_id} cancelled")]
    Cancelled { request_id: String },

    /// A freshly signed record did not verify
    #[error("Self-check failed for review {review_id}: {source}")]
    SelfCheckFailed {
        review_id: String,
        source: SignatureError,
    },

    /// Signing failed
    #[error("Signing error: {0}")]
    Signing(#[from] SignatureError),

    /// Record could not be encoded
    #[error("Encoding error: {0}")]
    Encoding(#[from] CanonicalError),

    /// Ledger write failed
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Configuration invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker pool closed
    #[error("Pipeline is shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// A decision that was made but not admitted.
#[derive(Debug, Clone, PartialEq)]
pub struct GateRejection {
    pub request_id: String,
    /// SHA-256 hex of the input
    pub input_fingerprint: String,
    /// First rule that failed
    pub rule: GateRule,
    pub reason: String,
    /// The unsigned decision
    pub decision: DecisionRecord,
    /// Hash of the ledger event recording the rejection
    pub ledger_hash: String,
}

/// Result of a resolved review.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewOutcome {
    /// Admitted, signed and recorded
    Emitted(SignedRecord),
    /// Gate refused the decision
    Rejected(GateRejection),
}

impl ReviewOutcome {
    pub fn signed(&self) -> Option<&SignedRecord> {
        match self {
            ReviewOutcome::Emitted(record) => Some(record),
            ReviewOutcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&GateRejection> {
        match self {
            ReviewOutcome::Emitted(_) => None,
            ReviewOutcome::Rejected(rejection) => Some(rejection),
        }
    }
}

/// Runs review requests through decision, gate, signer and ledger.
pub struct ReviewPipeline {
    adapter: DecisionAdapter,
    gate: VerificationGate,
    signer: RecordSigner,
    /// Built separately from the same key material
    verifier: RecordSigner,
    ledger: Arc<HashChainLedger>,
    rates: Arc<RateTable>,
    settings: PipelineSettings,
    semaphore: Arc<Semaphore>,
}

impl ReviewPipeline {
    /// Assemble a pipeline from validated configuration.
    pub fn new(
        config: &ReviewConfig,
        source: Arc<dyn DecisionSource>,
        key: SigningKey,
        ledger: Arc<HashChainLedger>,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            source = %source.id(),
            signer_id = %config.pipeline.signer_id,
            max_concurrent = config.pipeline.max_concurrent,
            policy_version = config.policy.version,
            "Review pipeline created"
        );

        Ok(Self {
            adapter: DecisionAdapter::new(source, config.retry.to_policy()),
            gate: VerificationGate::new(Arc::new(config.policy.clone())),
            signer: RecordSigner::new(key.clone()),
            verifier: RecordSigner::new(key),
            ledger,
            rates: Arc::new(config.rates.clone()),
            settings: config.pipeline.clone(),
            semaphore: Arc::new(Semaphore::new(config.pipeline.max_concurrent)),
        })
    }

    /// Assemble a pipeline, loading the key and opening the ledger as configured.
    pub async fn from_config(config: &ReviewConfig, source: Arc<dyn DecisionSource>) -> Result<Self> {
        config.validate()?;
        let (key, _warnings) = config.key.load()?;
        let ledger = match &config.pipeline.ledger_path {
            Some(path) => HashChainLedger::open_jsonl(path.clone()).await?,
            None => HashChainLedger::in_memory(),
        };
        Self::new(config, source, key, Arc::new(ledger))
    }

    pub fn ledger(&self) -> &Arc<HashChainLedger> {
        &self.ledger
    }

    pub fn gate(&self) -> &VerificationGate {
        &self.gate
    }

    /// Review one request.
    pub async fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome> {
        self.review_with_cancel(request, &CancelToken::new()).await
    }

    /// Review many requests concurrently, bounded by the worker pool.
    ///
    /// Results are returned in request order.
    pub async fn review_batch(&self, requests: &[ReviewRequest]) -> Vec<Result<ReviewOutcome>> {
        join_all(requests.iter().map(|request| self.review(request))).await
    }

    /// Review one request, abandoning it if `cancel` fires first.
    pub async fn review_with_cancel(
        &self,
        request: &ReviewRequest,
        cancel: &CancelToken,
    ) -> Result<ReviewOutcome> {
        let request_id = request.request_id.as_str();
        self.transition(request_id, ReviewState::Received);

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(PipelineError::Cancelled { request_id: request_id.to_string() });
            }
            permit = self.semaphore.acquire() => permit.map_err(|_| PipelineError::Shutdown)?,
        };

        let fingerprint = request.fingerprint();

        if let Err(reason) = self.validate_input(request) {
            self.transition(request_id, ReviewState::RejectedInput);
            warn!(request_id = %request_id, reason = %reason, "Input rejected");
            self.ledger
                .append(
                    events::INPUT_REJECTED,
                    json!({
                        "request_id": request_id,
                        "input_fingerprint": fingerprint,
                        "reason": reason.to_string(),
                    }),
                )
                .await?;
            return Err(PipelineError::RejectedInput {
                request_id: request_id.to_string(),
                reason,
            });
        }
        self.transition(request_id, ReviewState::Validated);

        self.transition(request_id, ReviewState::Deciding);
        let decided = match self.adapter.decide_with_cancel(&request.input, cancel).await {
            Ok(decided) => decided,
            Err(AdapterError::Cancelled { attempts }) => {
                debug!(request_id = %request_id, attempts, "Review cancelled");
                return Err(PipelineError::Cancelled {
                    request_id: request_id.to_string(),
                });
            }
            Err(e) => {
                self.transition(request_id, ReviewState::DecisionFailed);
                self.ledger
                    .append(
                        events::DECISION_FAILED,
                        json!({
                            "request_id": request_id,
                            "input_fingerprint": fingerprint,
                            "source": self.adapter.source_id(),
                            "error": e.to_string(),
                        }),
                    )
                    .await?;
                return Err(PipelineError::DecisionFailed {
                    request_id: request_id.to_string(),
                    source: e,
                });
            }
        };

        let record = decided.candidate.record;
        let gate = self.gate.evaluate(&record);
        self.transition(request_id, ReviewState::Gated);

        if let GateDecision::Fail { rule, reason } = gate {
            self.transition(request_id, ReviewState::GateFailed);
            warn!(
                request_id = %request_id,
                rule = rule.as_str(),
                reason = %reason,
                "Decision rejected by gate"
            );
            let event = self
                .ledger
                .append(
                    events::REJECTED,
                    json!({
                        "request_id": request_id,
                        "input_fingerprint": fingerprint,
                        "rule": rule.as_str(),
                        "reason": reason,
                        "decision": record,
                    }),
                )
                .await?;
            return Ok(ReviewOutcome::Rejected(GateRejection {
                request_id: request_id.to_string(),
                input_fingerprint: fingerprint,
                rule,
                reason,
                decision: record,
                ledger_hash: event.hash,
            }));
        }

        let model_id = self.adapter.source_id().to_string();
        let usage = account(
            &self.rates,
            &model_id,
            &request.input,
            &to_canonical_string(&record)?,
            decided.candidate.usage,
        );
        let audit = AuditTrail::new(
            self.settings.signer_id.clone(),
            fingerprint.clone(),
            model_id,
            usage,
            gate.verdict(),
        );

        let signed = self.signer.sign(record, audit)?;
        self.transition(request_id, ReviewState::Signed);

        if let Err(e) = self.verifier.verify(&signed) {
            error!(
                request_id = %request_id,
                review_id = %signed.review_id(),
                error = %e,
                "Signed record failed self-check"
            );
            self.ledger
                .append(
                    events::SELF_CHECK_FAILED,
                    json!({
                        "request_id": request_id,
                        "review_id": signed.review_id(),
                        "error": e.to_string(),
                    }),
                )
                .await?;
            return Err(PipelineError::SelfCheckFailed {
                review_id: signed.review_id().to_string(),
                source: e,
            });
        }

        self.ledger
            .append(
                events::APPROVED,
                json!({
                    "request_id": request_id,
                    "review_id": signed.review_id(),
                    "input_fingerprint": fingerprint,
                    "signature": signed.signature,
                }),
            )
            .await?;
        self.transition(request_id, ReviewState::Emitted);

        info!(
            request_id = %request_id,
            review_id = %signed.review_id(),
            attempts = decided.attempts,
            input_units = signed.audit.usage.input_units,
            output_units = signed.audit.usage.output_units,
            cost = signed.audit.usage.cost,
            "Signed record emitted"
        );

        Ok(ReviewOutcome::Emitted(signed))
    }

    fn validate_input(&self, request: &ReviewRequest) -> std::result::Result<(), InputRejection> {
        if !request.has_content() {
            return Err(InputRejection::Empty);
        }
        let size = request.input_bytes();
        if size > self.settings.max_input_bytes {
            return Err(InputRejection::TooLarge {
                size,
                max: self.settings.max_input_bytes,
            });
        }
        Ok(())
    }

    fn transition(&self, request_id: &str, state: ReviewState) {
        debug!(request_id = %request_id, state = ?state, "Review state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use evidence::{Finding, GateStatus, Location, RiskLevel, Severity};
    use review_agent::{CandidateDecision, MockDecisionSource, SourceError, Usage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_config() -> ReviewConfig {
        let mut config = ReviewConfig::default();
        config.retry.base_delay_ms = 10;
        config.retry.attempt_timeout_ms = 1_000;
        config
    }

    fn diff_record(confidence: f64) -> DecisionRecord {
        DecisionRecord::new(RiskLevel::Medium, 40.0, confidence)
            .with_finding(Finding::new(
                "F1",
                Location::at("src/config.rs", 12),
                Severity::Low,
                "Leftover debug flag",
                "ok = true; // TODO: remove",
            ))
            .with_summary("One low-severity finding")
    }

    fn pipeline_with(source: Arc<dyn DecisionSource>, config: &ReviewConfig) -> ReviewPipeline {
        ReviewPipeline::new(
            config,
            source,
            SigningKey::from_bytes(vec![7u8; 32]),
            Arc::new(HashChainLedger::in_memory()),
        )
        .unwrap()
    }

    const DIFF: &str = "+    ok = true; // TODO: remove\n";

    #[tokio::test]
    async fn test_passing_review_is_signed_and_recorded() {
        let pipeline = pipeline_with(
            Arc::new(MockDecisionSource::always(diff_record(0.95))),
            &test_config(),
        );
        pipeline
            .ledger()
            .append("SESSION_STARTED", json!({}))
            .await
            .unwrap();
        let head_before = pipeline.ledger().last_hash().await;

        let request = ReviewRequest::new(DIFF, "ci");
        let outcome = pipeline.review(&request).await.unwrap();
        let signed = outcome.signed().expect("record should be emitted");

        assert_eq!(signed.audit.gate.status, GateStatus::Pass);
        assert_eq!(signed.audit.input_fingerprint, request.fingerprint());
        assert_eq!(signed.audit.signer_id, "review-gate");
        assert_eq!(signed.audit.signature.as_deref(), Some(signed.signature.as_str()));

        let verifier = RecordSigner::new(SigningKey::from_bytes(vec![7u8; 32]));
        assert!(verifier.verify(signed).is_ok());

        let summary = pipeline.ledger().summary().await.unwrap();
        assert_eq!(summary.count(events::APPROVED), 1);

        let approved_hash = pipeline.ledger().last_hash().await;
        assert_ne!(approved_hash, head_before);

        // The next append links to the APPROVED event.
        let next = pipeline
            .ledger()
            .append(events::APPROVED, json!({ "replay": true }))
            .await
            .unwrap();
        assert_eq!(next.prev_hash, approved_hash);
        assert!(pipeline.ledger().verify_chain().await.unwrap().is_intact());
    }

    #[tokio::test]
    async fn test_approved_event_links_to_prior_head() {
        let store = Arc::new(evidence::MemoryStore::new());
        let ledger = Arc::new(HashChainLedger::open(store.clone()).await.unwrap());
        let prior = ledger.append("SESSION_STARTED", json!({})).await.unwrap();

        let pipeline = ReviewPipeline::new(
            &test_config(),
            Arc::new(MockDecisionSource::always(diff_record(0.95))),
            SigningKey::generate(),
            ledger,
        )
        .unwrap();
        let outcome = pipeline.review(&ReviewRequest::new(DIFF, "ci")).await.unwrap();

        let stored = store.events().await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].event_type, events::APPROVED);
        assert_eq!(stored[1].prev_hash, prior.hash);
        assert_eq!(
            stored[1].payload["signature"],
            json!(outcome.signed().unwrap().signature)
        );
    }

    #[tokio::test]
    async fn test_low_confidence_is_rejected_not_signed() {
        let pipeline = pipeline_with(
            Arc::new(MockDecisionSource::always(diff_record(0.85))),
            &test_config(),
        );

        let outcome = pipeline.review(&ReviewRequest::new(DIFF, "ci")).await.unwrap();

        assert!(outcome.signed().is_none());
        let rejection = outcome.rejection().unwrap();
        assert_eq!(rejection.rule, GateRule::LowConfidence);
        assert_eq!(rejection.reason, "low confidence: 0.85");

        let summary = pipeline.ledger().summary().await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.count(events::REJECTED), 1);
        assert_eq!(summary.count(events::APPROVED), 0);
        assert_eq!(pipeline.ledger().last_hash().await, rejection.ledger_hash);
    }

    #[tokio::test]
    async fn test_gate_ordering_through_pipeline() {
        let mut record = diff_record(0.5);
        record.risk_score = 90.0;
        let pipeline = pipeline_with(Arc::new(MockDecisionSource::always(record)), &test_config());

        let outcome = pipeline.review(&ReviewRequest::new(DIFF, "ci")).await.unwrap();
        assert_eq!(outcome.rejection().unwrap().rule, GateRule::LowConfidence);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_source_is_decision_failure() {
        let source = Arc::new(MockDecisionSource::failing(SourceError::Unavailable(
            "backend down".into(),
        )));
        let pipeline = pipeline_with(source.clone(), &test_config());

        let err = pipeline.review(&ReviewRequest::new(DIFF, "ci")).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::DecisionFailed {
                source: AdapterError::Exhausted { attempts: 3, .. },
                ..
            }
        ));
        assert_eq!(source.call_count(), 3);
        let summary = pipeline.ledger().summary().await.unwrap();
        assert_eq!(summary.count(events::DECISION_FAILED), 1);
        assert_eq!(summary.total, 1);
    }

    #[tokio::test]
    async fn test_blank_input_never_reaches_source() {
        let source = Arc::new(MockDecisionSource::default());
        let pipeline = pipeline_with(source.clone(), &test_config());

        let err = pipeline.review(&ReviewRequest::new("   \n", "ci")).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::RejectedInput {
                reason: InputRejection::Empty,
                ..
            }
        ));
        assert_eq!(source.call_count(), 0);
        let summary = pipeline.ledger().summary().await.unwrap();
        assert_eq!(summary.count(events::INPUT_REJECTED), 1);
    }

    #[tokio::test]
    async fn test_oversized_input_rejected() {
        let mut config = test_config();
        config.pipeline.max_input_bytes = 16;
        let pipeline = pipeline_with(Arc::new(MockDecisionSource::default()), &config);

        let err = pipeline
            .review(&ReviewRequest::new("x".repeat(17), "ci"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RejectedInput {
                reason: InputRejection::TooLarge { size: 17, max: 16 },
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_review_writes_nothing() {
        let source = Arc::new(MockDecisionSource::failing(SourceError::NetworkError(
            "reset".into(),
        )));
        let mut config = test_config();
        config.retry.base_delay_ms = 10_000;
        let pipeline = pipeline_with(source, &config);

        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let err = pipeline
            .review_with_cancel(&ReviewRequest::new(DIFF, "ci"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled { .. }));
        assert!(pipeline.ledger().is_empty().await);
    }

    #[tokio::test]
    async fn test_self_check_failure_halts() {
        let mut pipeline = pipeline_with(
            Arc::new(MockDecisionSource::always(diff_record(0.95))),
            &test_config(),
        );
        pipeline.verifier = RecordSigner::new(SigningKey::from_bytes(vec![9u8; 32]));

        let err = pipeline.review(&ReviewRequest::new(DIFF, "ci")).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::SelfCheckFailed {
                source: SignatureError::Mismatch,
                ..
            }
        ));
        let summary = pipeline.ledger().summary().await.unwrap();
        assert_eq!(summary.count(events::SELF_CHECK_FAILED), 1);
        assert_eq!(summary.count(events::APPROVED), 0);
    }

    #[tokio::test]
    async fn test_measured_usage_and_cost_recorded() {
        let source = MockDecisionSource::new("gpt-4o").with_fallback(Ok(
            CandidateDecision::measured(
                diff_record(0.95),
                Usage {
                    input_units: 100,
                    output_units: 20,
                },
            ),
        ));
        let mut config = test_config();
        config.rates = RateTable::default()
            .with_model("gpt-4o", review_agent::ModelRate { input: 0.01, output: 0.05 });
        let pipeline = pipeline_with(Arc::new(source), &config);

        let outcome = pipeline.review(&ReviewRequest::new(DIFF, "ci")).await.unwrap();
        let usage = &outcome.signed().unwrap().audit.usage;

        assert!(usage.measured);
        assert_eq!(usage.input_units, 100);
        assert!((usage.cost - 2.0).abs() < 1e-9);
        assert_eq!(outcome.signed().unwrap().audit.model_id, "gpt-4o");
    }

    /// Tracks how many decisions run at once.
    struct ConcurrencyProbe {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl DecisionSource for ConcurrencyProbe {
        fn id(&self) -> &str {
            "probe"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn decide(&self, _input: &str) -> std::result::Result<CandidateDecision, SourceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(CandidateDecision::unmeasured(diff_record(0.95)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_is_bounded_and_chain_stays_linear() {
        let probe = Arc::new(ConcurrencyProbe {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut config = test_config();
        config.pipeline.max_concurrent = 2;
        let pipeline = pipeline_with(probe.clone(), &config);

        let requests: Vec<ReviewRequest> = (0..10)
            .map(|i| ReviewRequest::new(format!("+ line {}\n", i), "ci"))
            .collect();
        let results = pipeline.review_batch(&requests).await;

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| matches!(r, Ok(ReviewOutcome::Emitted(_)))));
        assert!(probe.peak.load(Ordering::SeqCst) <= 2);

        assert_eq!(pipeline.ledger().len().await, 10);
        assert!(pipeline.ledger().verify_chain().await.unwrap().is_intact());
    }

    #[tokio::test]
    async fn test_from_config_with_jsonl_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.key.env_var = "REVIEW_GATE_PIPELINE_TEST_KEY_UNSET".to_string();
        config.pipeline.ledger_path = Some(dir.path().join("reviews.jsonl"));

        let pipeline = ReviewPipeline::from_config(
            &config,
            Arc::new(MockDecisionSource::always(diff_record(0.95))),
        )
        .await
        .unwrap();
        pipeline.review(&ReviewRequest::new(DIFF, "ci")).await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("reviews.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains(events::APPROVED));
    }

    #[test]
    fn test_invalid_config_refused() {
        let mut config = test_config();
        config.policy.min_confidence = 2.0;

        let result = ReviewPipeline::new(
            &config,
            Arc::new(MockDecisionSource::default()),
            SigningKey::generate(),
            Arc::new(HashChainLedger::in_memory()),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
