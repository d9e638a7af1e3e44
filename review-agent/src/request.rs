//! Review request types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority levels for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    /// Background processing, can be delayed
    Low,
    /// Standard priority
    #[default]
    Normal,
    /// Should be processed soon
    High,
}

/// A piece of input submitted for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    /// Unique request identifier
    pub request_id: String,
    /// Raw input to review
    pub input: String,
    /// Who is making the request
    pub requester_id: String,
    /// Request priority
    #[serde(default)]
    pub priority: RequestPriority,
    /// When the request was made
    pub requested_at: DateTime<Utc>,
}

impl ReviewRequest {
    /// Create a new request.
    pub fn new(input: impl Into<String>, requester_id: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            input: input.into(),
            requester_id: requester_id.into(),
            priority: RequestPriority::Normal,
            requested_at: Utc::now(),
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    /// SHA-256 hex of the raw input.
    pub fn fingerprint(&self) -> String {
        evidence::fingerprint(&self.input)
    }

    /// Size of the raw input in bytes.
    pub fn input_bytes(&self) -> usize {
        self.input.len()
    }

    /// Whether the input has any non-whitespace content.
    pub fn has_content(&self) -> bool {
        !self.input.trim().is_empty()
    }
}
