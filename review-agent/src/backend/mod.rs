//! Decision source abstraction layer.
//!
//! Provides a trait-based interface over whatever produces candidate decisions:
//! - OpenAI-compatible chat completions (vLLM, Ollama, OpenAI, etc.)
//! - Mock source for testing

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockDecisionSource;
pub use openai::OpenAiDecisionSource;
pub use traits::{parse_decision, CandidateDecision, DecisionSource, SourceError, Usage};
