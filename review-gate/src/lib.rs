//! Review Gate - verified decisions with a tamper-evident trail.
//!
//! Turns a review request into either a signed, ledger-recorded decision
//! or a recorded rejection:
//!
//! - **Verification gate**: ordered, versioned admission policy
//! - **Pipeline**: bounded worker pool running decide → gate → sign → record
//! - **Configuration**: YAML with validated sections
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ReviewPipeline                         │
//! │                                                             │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐     │
//! │  │ Validate │──│ Decide   │──│  Gate    │──│  Sign    │     │
//! │  └──────────┘  └──────────┘  └──────────┘  └──────────┘     │
//! │                                   │                         │
//! │                           ┌───────▼───────┐                 │
//! │                           │    Ledger     │                 │
//! │                           └───────────────┘                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use review_gate::{ReviewConfig, ReviewPipeline};
//! use review_agent::{OpenAiDecisionSource, ReviewRequest};
//!
//! let config = ReviewConfig::from_yaml(&std::fs::read_to_string("review.yaml")?)?;
//! let source = Arc::new(OpenAiDecisionSource::vllm(8000, "llama-3.3-70b"));
//! let pipeline = ReviewPipeline::from_config(&config, source).await?;
//!
//! match pipeline.review(&ReviewRequest::new(diff, "ci")).await? {
//!     ReviewOutcome::Emitted(record) => publish(record),
//!     ReviewOutcome::Rejected(rejection) => report(rejection),
//! }
//! ```

pub mod config;
pub mod gate;
pub mod pipeline;

// Re-export main types
pub use config::{ConfigError, KeySettings, PipelineSettings, RetryConfig, ReviewConfig};
pub use gate::{
    GateDecision, GateRule, VerificationGate, VerificationPolicy, SUPPORTED_POLICY_VERSION,
};
pub use pipeline::{
    events, GateRejection, InputRejection, PipelineError, Result, ReviewOutcome, ReviewPipeline,
    ReviewState,
};
