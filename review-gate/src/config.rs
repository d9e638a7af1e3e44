//! Configuration for the review pipeline.

use evidence::{KeyError, KeyWarning, SigningKey, DEFAULT_KEY_ENV};
use review_agent::{Backoff, ModelRate, RateTable, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::gate::VerificationPolicy;

/// Error types for configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// YAML could not be parsed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A field holds an unusable value
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// Policy written for a different schema
    #[error("Unsupported policy version: {0}")]
    UnsupportedPolicyVersion(u32),

    /// Signing key could not be loaded
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Configuration for a review pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Verification policy
    pub policy: VerificationPolicy,
    /// Decision retry settings
    pub retry: RetryConfig,
    /// Per-model cost rates
    pub rates: RateTable,
    /// Pipeline settings
    pub pipeline: PipelineSettings,
    /// Signing key settings
    pub key: KeySettings,
}

impl ReviewConfig {
    /// Load and validate config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Check every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy.validate()?;
        self.retry.validate()?;
        self.pipeline.validate()?;
        self.key.validate()?;
        for (model, rate) in &self.rates.models {
            check_rate("rates.models", model, rate)?;
        }
        if let Some(rate) = &self.rates.default {
            check_rate("rates.default", "default", rate)?;
        }
        Ok(())
    }
}

/// Rates must be finite and non-negative.
fn check_rate(field: &'static str, model: &str, rate: &ModelRate) -> Result<(), ConfigError> {
    let usable = |v: f64| v.is_finite() && v >= 0.0;
    if !usable(rate.input) || !usable(rate.output) {
        return Err(ConfigError::invalid(
            field,
            format!("rate for {} must be finite and non-negative", model),
        ));
    }
    Ok(())
}

/// Retry configuration for the decision adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Base delay between attempts (ms)
    pub base_delay_ms: u64,
    /// Per-attempt timeout (ms), 0 for none
    pub attempt_timeout_ms: u64,
    /// Delay growth
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            attempt_timeout_ms: 60_000,
            backoff: Backoff::Linear,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        Ok(())
    }

    /// Adapter policy for these settings.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            attempt_timeout: (self.attempt_timeout_ms > 0)
                .then(|| Duration::from_millis(self.attempt_timeout_ms)),
            backoff: self.backoff,
        }
    }
}

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Identity recorded as the signer
    pub signer_id: String,
    /// Largest accepted input (bytes)
    pub max_input_bytes: usize,
    /// Requests processed at once
    pub max_concurrent: usize,
    /// JSONL ledger file; in-memory when unset
    pub ledger_path: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            signer_id: "review-gate".to_string(),
            max_input_bytes: 1024 * 1024,
            max_concurrent: 4,
            ledger_path: None,
        }
    }
}

impl PipelineSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.signer_id.trim().is_empty() {
            return Err(ConfigError::invalid("pipeline.signer_id", "must not be blank"));
        }
        if self.max_input_bytes == 0 {
            return Err(ConfigError::invalid(
                "pipeline.max_input_bytes",
                "must be at least 1",
            ));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid(
                "pipeline.max_concurrent",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Signing key settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySettings {
    /// Environment variable holding the key
    pub env_var: String,
    /// Refuse to start without a configured key
    pub production: bool,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            env_var: DEFAULT_KEY_ENV.to_string(),
            production: false,
        }
    }
}

impl KeySettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.env_var.trim().is_empty() {
            return Err(ConfigError::invalid("key.env_var", "must not be blank"));
        }
        Ok(())
    }

    /// Load the signing key from the environment.
    pub fn load(&self) -> Result<(SigningKey, Vec<KeyWarning>), ConfigError> {
        Ok(SigningKey::from_env(&self.env_var, self.production)?)
    }
}
