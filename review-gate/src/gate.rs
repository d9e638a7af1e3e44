//! Verification gate - decides whether a candidate decision is admissible.
//!
//! Rules are evaluated in a fixed order and the first violation wins, so
//! the same record always fails for the same reason. A record outside its
//! structural bounds (NaN scores, blank finding ids) fails before any rule.

use evidence::{DecisionRecord, GateVerdict, RiskLevel, Severity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ConfigError;

/// Only policy version this build understands.
pub const SUPPORTED_POLICY_VERSION: u32 = 1;

/// Admission policy, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationPolicy {
    /// Policy schema version
    pub version: u32,
    /// Lowest acceptable confidence (0.0 - 1.0)
    pub min_confidence: f64,
    /// Risk scores at or above this fail (0 - 100)
    pub max_risk_score: f64,
    /// Minimum evidence length per finding, in characters
    pub min_evidence_len: usize,
    /// Required actions meaning "nothing to do"
    pub no_action_markers: Vec<String>,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            version: SUPPORTED_POLICY_VERSION,
            min_confidence: 0.9,
            max_risk_score: 70.0,
            min_evidence_len: 10,
            no_action_markers: vec![
                "none".to_string(),
                "no action".to_string(),
                "no action needed".to_string(),
                "no_action".to_string(),
                "n/a".to_string(),
            ],
        }
    }
}

impl VerificationPolicy {
    /// Check that every field is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != SUPPORTED_POLICY_VERSION {
            return Err(ConfigError::UnsupportedPolicyVersion(self.version));
        }
        if !self.min_confidence.is_finite() || !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::invalid(
                "policy.min_confidence",
                format!("{} is outside [0, 1]", self.min_confidence),
            ));
        }
        if !self.max_risk_score.is_finite()
            || self.max_risk_score <= 0.0
            || self.max_risk_score > 100.0
        {
            return Err(ConfigError::invalid(
                "policy.max_risk_score",
                format!("{} is outside (0, 100]", self.max_risk_score),
            ));
        }
        if self.min_evidence_len == 0 {
            return Err(ConfigError::invalid(
                "policy.min_evidence_len",
                "must be at least 1",
            ));
        }
        if self.no_action_markers.is_empty()
            || self.no_action_markers.iter().any(|m| m.trim().is_empty())
        {
            return Err(ConfigError::invalid(
                "policy.no_action_markers",
                "must contain at least one non-blank marker",
            ));
        }
        Ok(())
    }

    /// Whether an action is one of the "no action" markers.
    pub fn is_no_action(&self, action: &str) -> bool {
        let action = action.trim().to_lowercase();
        self.no_action_markers
            .iter()
            .any(|marker| marker.trim().to_lowercase() == action)
    }
}

/// Gate rules, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRule {
    InvalidRecord,
    LowConfidence,
    EscalationRequested,
    CriticalRisk,
    RiskScoreTooHigh,
    MissingEvidence,
    CriticalFinding,
    ContradictoryActions,
}

impl GateRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateRule::InvalidRecord => "invalid_record",
            GateRule::LowConfidence => "low_confidence",
            GateRule::EscalationRequested => "escalation_requested",
            GateRule::CriticalRisk => "critical_risk",
            GateRule::RiskScoreTooHigh => "risk_score_too_high",
            GateRule::MissingEvidence => "missing_evidence",
            GateRule::CriticalFinding => "critical_finding",
            GateRule::ContradictoryActions => "contradictory_actions",
        }
    }
}

/// Outcome of gating one record.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Pass,
    Fail { rule: GateRule, reason: String },
}

impl GateDecision {
    fn fail(rule: GateRule, reason: impl Into<String>) -> Self {
        GateDecision::Fail {
            rule,
            reason: reason.into(),
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, GateDecision::Pass)
    }

    /// Verdict as recorded in an audit trail.
    pub fn verdict(&self) -> GateVerdict {
        match self {
            GateDecision::Pass => GateVerdict::pass(),
            GateDecision::Fail { reason, .. } => GateVerdict::fail(reason.clone()),
        }
    }
}

/// Evaluates records against a shared policy.
#[derive(Debug, Clone)]
pub struct VerificationGate {
    policy: Arc<VerificationPolicy>,
}

impl VerificationGate {
    pub fn new(policy: Arc<VerificationPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    /// Evaluate a record. Pure: no I/O, no clock, no randomness.
    pub fn evaluate(&self, record: &DecisionRecord) -> GateDecision {
        let policy = &self.policy;

        // Comparisons below are only meaningful for finite, in-range scores.
        if let Err(e) = record.check_bounds() {
            return GateDecision::fail(GateRule::InvalidRecord, format!("invalid record: {}", e));
        }

        if record.confidence < policy.min_confidence {
            return GateDecision::fail(
                GateRule::LowConfidence,
                format!("low confidence: {}", record.confidence),
            );
        }

        if record.escalate {
            return GateDecision::fail(GateRule::EscalationRequested, "escalation requested");
        }

        if record.risk_level >= RiskLevel::Critical {
            return GateDecision::fail(GateRule::CriticalRisk, "critical risk");
        }

        if record.risk_score >= policy.max_risk_score {
            return GateDecision::fail(
                GateRule::RiskScoreTooHigh,
                format!(
                    "risk score {} ≥ {}",
                    record.risk_score, policy.max_risk_score
                ),
            );
        }

        if let Some(finding) = record
            .findings
            .iter()
            .find(|f| f.evidence_len() < policy.min_evidence_len)
        {
            return GateDecision::fail(
                GateRule::MissingEvidence,
                format!("finding {} lacks evidence", finding.id),
            );
        }

        if let Some(finding) = record
            .findings
            .iter()
            .find(|f| f.severity == Severity::Critical)
        {
            return GateDecision::fail(
                GateRule::CriticalFinding,
                format!("critical finding {}", finding.id),
            );
        }

        let markers = record
            .required_actions
            .iter()
            .filter(|a| policy.is_no_action(a))
            .count();
        if markers > 0 && markers < record.required_actions.len() {
            return GateDecision::fail(
                GateRule::ContradictoryActions,
                "contradictory required actions",
            );
        }

        GateDecision::Pass
    }
}
