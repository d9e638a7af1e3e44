//! Core traits for decision sources.
//!
//! This module defines the `DecisionSource` trait - the abstraction over
//! whatever produces a candidate decision for a piece of input.

use async_trait::async_trait;
use evidence::DecisionRecord;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error types for decision source operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// Source is not available
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// Request failed
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Rate limited by the source
    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Input exceeded the source's context length
    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    /// Content was filtered
    #[error("Content filtered: {reason}")]
    ContentFiltered { reason: String },

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Response did not contain a well-formed decision
    #[error("Malformed decision: {0}")]
    Malformed(String),

    /// Attempt did not finish in time
    #[error("Timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

impl SourceError {
    /// Whether a later attempt with the same input might succeed.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            SourceError::ContextLengthExceeded(_) | SourceError::ContentFiltered { .. }
        )
    }

    /// Minimum wait the source asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// Core trait for decision sources.
///
/// Implementations are opaque, possibly slow and possibly failing; retries
/// and timeouts are applied by [`crate::DecisionAdapter`].
#[async_trait]
pub trait DecisionSource: Send + Sync {
    /// Get the source identifier (e.g., model name).
    fn id(&self) -> &str;

    /// Check if the source is currently available.
    async fn is_available(&self) -> bool;

    /// Produce a candidate decision for `input`.
    async fn decide(&self, input: &str) -> Result<CandidateDecision, SourceError>;
}

/// A decision as returned by a source, before any gating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDecision {
    /// The proposed record
    pub record: DecisionRecord,
    /// Measured usage, when the source reports it
    pub usage: Option<Usage>,
}

impl CandidateDecision {
    /// Candidate with measured usage.
    pub fn measured(record: DecisionRecord, usage: Usage) -> Self {
        Self {
            record,
            usage: Some(usage),
        }
    }

    /// Candidate whose usage must be estimated.
    pub fn unmeasured(record: DecisionRecord) -> Self {
        Self {
            record,
            usage: None,
        }
    }
}

/// Usage counters reported by a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Units consumed by the input
    pub input_units: u32,
    /// Units produced in the output
    pub output_units: u32,
}

impl Usage {
    /// Get total units.
    pub fn total(&self) -> u32 {
        self.input_units.saturating_add(self.output_units)
    }
}

/// Parse and structurally validate a decision encoded as JSON text.
///
/// Anything that is not a well-formed, in-bounds record is `Malformed`.
pub fn parse_decision(content: &str) -> Result<DecisionRecord, SourceError> {
    let record: DecisionRecord = serde_json::from_str(content.trim())
        .map_err(|e| SourceError::Malformed(e.to_string()))?;
    record
        .check_bounds()
        .map_err(|e| SourceError::Malformed(e.to_string()))?;
    Ok(record)
}
