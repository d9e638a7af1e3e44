//! Review Agent - decision sources and the retrying adapter around them.
//!
//! Provides the decision side of a review:
//! - Trait-based decision sources (OpenAI-compatible, mock)
//! - A decision adapter with bounded retry, per-attempt timeout and cancellation
//! - Resource usage estimation and cost accounting
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           DecisionAdapter               │
//! │  (retry / backoff / timeout / cancel)   │
//! └────────────────┬────────────────────────┘
//!                  │
//!      ┌───────────┴───────────┐
//!      ▼                       ▼
//! ┌────────────────┐    ┌─────────────┐
//! │ DecisionSource │    │  Estimator  │
//! │ (OpenAI/Mock)  │    │ (units and  │
//! │                │    │  cost)      │
//! └────────────────┘    └─────────────┘
//! ```

pub mod adapter;
pub mod backend;
pub mod estimate;
pub mod request;

// Re-export main types for convenience
pub use adapter::{AdapterError, Backoff, CancelToken, Decided, DecisionAdapter, RetryPolicy};
pub use backend::{
    parse_decision, CandidateDecision, DecisionSource, MockDecisionSource, OpenAiDecisionSource,
    SourceError, Usage,
};
pub use estimate::{account, estimate_units, ModelRate, RateTable};
pub use request::{ReviewRequest, RequestPriority};
