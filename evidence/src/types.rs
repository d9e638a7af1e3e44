//! Core types for decision records and their audit metadata.
//!
//! A [`DecisionRecord`] is what a reviewer produced; an [`AuditTrail`] binds
//! it to an input, a signer and a gate outcome; a [`SignedRecord`] pairs the
//! two with the MAC computed over both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum findings a single decision may carry.
pub const MAX_FINDINGS: usize = 50;

/// Maximum length (in characters) of a decision summary.
pub const MAX_SUMMARY_CHARS: usize = 2_000;

/// Maximum length (in characters) of reviewer notes.
pub const MAX_NOTES_CHARS: usize = 4_000;

/// Overall risk classification of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Get string representation for logs and ledger payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Severity of an individual finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Where a finding applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File or resource path
    pub file: String,
    /// 1-based line number, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Location {
    /// Create a location with a line number.
    pub fn at(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
        }
    }
}

/// A single finding backed by an evidentiary excerpt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Identifier unique within the decision
    pub id: String,
    /// Where the finding applies
    pub location: Location,
    /// How severe it is
    pub severity: Severity,
    /// Short description
    pub title: String,
    /// Excerpt from the input supporting the finding
    pub evidence: String,
}

impl Finding {
    /// Create a new finding.
    pub fn new(
        id: impl Into<String>,
        location: Location,
        severity: Severity,
        title: impl Into<String>,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            location,
            severity,
            title: title.into(),
            evidence: evidence.into(),
        }
    }

    /// Evidence length in characters, ignoring surrounding whitespace.
    pub fn evidence_len(&self) -> usize {
        self.evidence.trim().chars().count()
    }
}

/// Structured output of a single review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Overall risk classification
    pub risk_level: RiskLevel,
    /// Numeric risk score (0 - 100)
    pub risk_score: f64,
    /// Reviewer confidence (0.0 - 1.0)
    pub confidence: f64,
    /// Whether the reviewer asked for a human to take over
    #[serde(default)]
    pub escalate: bool,
    /// Findings, each with evidence
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Follow-up actions the reviewer requires
    #[serde(default)]
    pub required_actions: Vec<String>,
    /// Short summary
    #[serde(default)]
    pub summary: String,
    /// Longer reviewer notes
    #[serde(default)]
    pub notes: String,
}

impl DecisionRecord {
    /// Create a record with no findings or actions.
    pub fn new(risk_level: RiskLevel, risk_score: f64, confidence: f64) -> Self {
        Self {
            risk_level,
            risk_score,
            confidence,
            escalate: false,
            findings: Vec::new(),
            required_actions: Vec::new(),
            summary: String::new(),
            notes: String::new(),
        }
    }

    /// Add a finding.
    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.findings.push(finding);
        self
    }

    /// Add a required action.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.required_actions.push(action.into());
        self
    }

    /// Set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Request escalation.
    pub fn escalated(mut self) -> Self {
        self.escalate = true;
        self
    }

    /// Check structural bounds.
    ///
    /// This does not apply any policy; it only rejects records that cannot
    /// be meaningfully gated or serialized.
    pub fn check_bounds(&self) -> Result<(), RecordError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(RecordError::ConfidenceOutOfRange(self.confidence));
        }
        if !self.risk_score.is_finite() || !(0.0..=100.0).contains(&self.risk_score) {
            return Err(RecordError::RiskScoreOutOfRange(self.risk_score));
        }
        if self.findings.len() > MAX_FINDINGS {
            return Err(RecordError::TooManyFindings {
                max: MAX_FINDINGS,
                actual: self.findings.len(),
            });
        }
        if let Some(index) = self.findings.iter().position(|f| f.id.trim().is_empty()) {
            return Err(RecordError::BlankFindingId { index });
        }
        if self.summary.chars().count() > MAX_SUMMARY_CHARS {
            return Err(RecordError::TextTooLong {
                field: "summary",
                max: MAX_SUMMARY_CHARS,
            });
        }
        if self.notes.chars().count() > MAX_NOTES_CHARS {
            return Err(RecordError::TextTooLong {
                field: "notes",
                max: MAX_NOTES_CHARS,
            });
        }
        Ok(())
    }
}

/// Structural problems with a decision record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("risk score {0} outside [0, 100]")]
    RiskScoreOutOfRange(f64),

    #[error("too many findings: max {max}, got {actual}")]
    TooManyFindings { max: usize, actual: usize },

    #[error("{field} exceeds {max} characters")]
    TextTooLong { field: &'static str, max: usize },

    #[error("finding {index} has a blank id")]
    BlankFindingId { index: usize },
}

/// Resource usage attributed to one review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Units consumed by the input
    pub input_units: u32,
    /// Units produced by the decision source
    pub output_units: u32,
    /// Whether the counts were measured by the source (false = estimated)
    pub measured: bool,
    /// Derived cost
    pub cost: f64,
}

/// Whether the verification gate admitted the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Pass,
    Fail,
}

/// Gate outcome as recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub status: GateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GateVerdict {
    /// A passing verdict.
    pub fn pass() -> Self {
        Self {
            status: GateStatus::Pass,
            reason: None,
        }
    }

    /// A failing verdict with a reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            status: GateStatus::Fail,
            reason: Some(reason.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == GateStatus::Pass
    }
}

/// Metadata bound to one decision record.
///
/// `signature` must be `None` while the MAC is computed; it is omitted from
/// the serialized form when absent so the unsigned view contains no trace of
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    /// Unique review identifier
    pub review_id: String,
    /// Identity of the signer
    pub signer_id: String,
    /// Signer software version
    pub signer_version: String,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// SHA-256 hex of the original input
    pub input_fingerprint: String,
    /// Resource usage counters
    pub usage: ResourceUsage,
    /// Model / engine that produced the decision
    pub model_id: String,
    /// Gate outcome
    pub gate: GateVerdict,
    /// MAC over the unsigned view, attached after signing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl AuditTrail {
    /// Create an unsigned audit trail with a fresh review id.
    pub fn new(
        signer_id: impl Into<String>,
        input_fingerprint: impl Into<String>,
        model_id: impl Into<String>,
        usage: ResourceUsage,
        gate: GateVerdict,
    ) -> Self {
        Self {
            review_id: uuid::Uuid::new_v4().to_string(),
            signer_id: signer_id.into(),
            signer_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            input_fingerprint: input_fingerprint.into(),
            usage,
            model_id: model_id.into(),
            gate,
            signature: None,
        }
    }

    /// Copy of this trail with the signature removed.
    pub fn unsigned(&self) -> Self {
        Self {
            signature: None,
            ..self.clone()
        }
    }
}

/// A decision record, its audit trail and the MAC binding them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedRecord {
    pub decision: DecisionRecord,
    pub audit: AuditTrail,
    pub signature: String,
}

impl SignedRecord {
    pub fn review_id(&self) -> &str {
        &self.audit.review_id
    }
}
