//! Record signing and verification.
//!
//! Signatures are HMAC-SHA256 over the canonical encoding of the decision
//! and its audit trail *without* the signature field. Verification rebuilds
//! that unsigned view from the supplied record and compares in constant
//! time.

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::canonical::{to_canonical_bytes, CanonicalError};
use crate::types::{AuditTrail, DecisionRecord, SignedRecord};

type HmacSha256 = Hmac<Sha256>;

/// Minimum key length in bytes (256 bits).
pub const MIN_KEY_BYTES: usize = 32;

/// Default environment variable holding the signing key.
pub const DEFAULT_KEY_ENV: &str = "REVIEW_SIGNING_KEY";

/// Values that are obviously not real secrets.
const PLACEHOLDER_KEYS: &[&str] = &[
    "changeme",
    "change-me",
    "secret",
    "password",
    "placeholder",
    "your-secret-here",
    "dev-secret",
    "test",
    "default",
];

/// Error types for key loading.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// No key configured in production mode
    #[error("Signing key missing: set {0}")]
    Missing(String),

    /// Key configured but empty
    #[error("Signing key is empty")]
    Empty,
}

/// Non-fatal problems with configured key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyWarning {
    /// Key matches a well-known placeholder
    Placeholder,
    /// Key shorter than [`MIN_KEY_BYTES`]
    TooShort { len: usize },
    /// No key configured; a random one was generated for this process
    Ephemeral,
}

impl std::fmt::Display for KeyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Placeholder => write!(f, "signing key is a placeholder value"),
            Self::TooShort { len } => write!(
                f,
                "signing key is {} bytes, expected at least {}",
                len, MIN_KEY_BYTES
            ),
            Self::Ephemeral => write!(
                f,
                "no signing key configured; using an ephemeral key, signatures will not verify after restart"
            ),
        }
    }
}

/// Shared secret used for record MACs. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKey {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Generate a random 256-bit key.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; MIN_KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Load key material from an optional configured value.
    ///
    /// In production mode a missing key is an error. In development mode a
    /// random key is generated. Placeholder or short keys are accepted but
    /// reported as warnings and logged.
    pub fn load(value: Option<&str>, production: bool) -> Result<(Self, Vec<KeyWarning>), KeyError> {
        let mut warnings = Vec::new();

        let key = match value {
            Some(v) if v.is_empty() => return Err(KeyError::Empty),
            Some(v) => {
                if PLACEHOLDER_KEYS.contains(&v.trim().to_ascii_lowercase().as_str()) {
                    warnings.push(KeyWarning::Placeholder);
                }
                if v.len() < MIN_KEY_BYTES {
                    warnings.push(KeyWarning::TooShort { len: v.len() });
                }
                Self::from_bytes(v.as_bytes())
            }
            None if production => return Err(KeyError::Missing(DEFAULT_KEY_ENV.to_string())),
            None => {
                warnings.push(KeyWarning::Ephemeral);
                Self::generate()
            }
        };

        for warning in &warnings {
            warn!(production, "{}", warning);
        }

        Ok((key, warnings))
    }

    /// Load key material from an environment variable.
    pub fn from_env(var: &str, production: bool) -> Result<(Self, Vec<KeyWarning>), KeyError> {
        let value = std::env::var(var).ok();
        Self::load(value.as_deref(), production).map_err(|e| match e {
            KeyError::Missing(_) => KeyError::Missing(var.to_string()),
            other => other,
        })
    }

    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(&self.bytes).expect("HMAC accepts keys of any length")
    }
}

/// Error types for signing and verification.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// Payload could not be canonicalized
    #[error("Canonical encoding failed: {0}")]
    Canonical(#[from] CanonicalError),

    /// Signature is not valid hex
    #[error("Malformed signature")]
    Malformed,

    /// Signature length differs from the expected MAC length
    #[error("Signature length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Recomputed MAC differs from the supplied one
    #[error("Signature mismatch")]
    Mismatch,

    /// The audit trail carries a different signature than the record
    #[error("Audit trail signature does not match record signature")]
    InconsistentAudit,
}

/// The exact view that gets signed.
#[derive(Serialize)]
struct UnsignedView<'a> {
    decision: &'a DecisionRecord,
    audit: &'a AuditTrail,
}

/// Signs decision records and verifies signed ones.
#[derive(Debug, Clone)]
pub struct RecordSigner {
    key: SigningKey,
}

impl RecordSigner {
    /// Create a signer with the given key.
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Bytes covered by the signature.
    ///
    /// Any signature already present on `audit` is stripped first.
    pub fn signing_payload(
        decision: &DecisionRecord,
        audit: &AuditTrail,
    ) -> Result<Vec<u8>, SignatureError> {
        let unsigned = audit.unsigned();
        let view = UnsignedView {
            decision,
            audit: &unsigned,
        };
        Ok(to_canonical_bytes(&view)?)
    }

    fn compute(&self, decision: &DecisionRecord, audit: &AuditTrail) -> Result<Vec<u8>, SignatureError> {
        let payload = Self::signing_payload(decision, audit)?;
        let mut mac = self.key.mac();
        mac.update(&payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Sign a decision and attach the signature to its audit trail.
    pub fn sign(
        &self,
        decision: DecisionRecord,
        mut audit: AuditTrail,
    ) -> Result<SignedRecord, SignatureError> {
        audit.signature = None;
        let signature = hex::encode(self.compute(&decision, &audit)?);
        audit.signature = Some(signature.clone());

        debug!(review_id = %audit.review_id, "Record signed");

        Ok(SignedRecord {
            decision,
            audit,
            signature,
        })
    }

    /// Verify a signed record.
    pub fn verify(&self, record: &SignedRecord) -> Result<(), SignatureError> {
        let supplied = hex::decode(&record.signature).map_err(|_| SignatureError::Malformed)?;
        let expected = self.compute(&record.decision, &record.audit)?;

        if supplied.len() != expected.len() {
            return Err(SignatureError::LengthMismatch {
                expected: expected.len(),
                actual: supplied.len(),
            });
        }
        if !bool::from(supplied.ct_eq(&expected)) {
            return Err(SignatureError::Mismatch);
        }

        if let Some(embedded) = &record.audit.signature {
            if !bool::from(embedded.as_bytes().ct_eq(record.signature.as_bytes())) {
                return Err(SignatureError::InconsistentAudit);
            }
        }

        Ok(())
    }

    /// Convenience wrapper returning a boolean.
    pub fn is_valid(&self, record: &SignedRecord) -> bool {
        self.verify(record).is_ok()
    }
}

/// Error types for webhook authentication.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Timestamp header is not a number
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    /// Timestamp outside the accepted window
    #[error("Timestamp outside tolerance: {skew_secs}s")]
    Stale { skew_secs: i64 },

    /// Signature is not valid hex or has the wrong length
    #[error("Malformed signature")]
    Malformed,

    /// MAC mismatch
    #[error("Signature mismatch")]
    Mismatch,
}

/// Verifies `HMAC-SHA256(key, "<timestamp>." || body)` webhook signatures.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    key: SigningKey,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    /// Default accepted clock skew.
    pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

    pub fn new(key: SigningKey) -> Self {
        Self {
            key,
            tolerance_secs: Self::DEFAULT_TOLERANCE_SECS,
        }
    }

    /// Set the accepted clock skew.
    pub fn with_tolerance_secs(mut self, secs: i64) -> Self {
        self.tolerance_secs = secs;
        self
    }

    fn compute(&self, timestamp: &str, body: &[u8]) -> Vec<u8> {
        let mut mac = self.key.mac();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac.finalize().into_bytes().to_vec()
    }

    /// Compute the hex signature for a body sent at `timestamp`.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> String {
        hex::encode(self.compute(timestamp, body))
    }

    /// Verify a webhook signature against the current time.
    pub fn verify(&self, timestamp: &str, body: &[u8], signature: &str) -> Result<(), WebhookError> {
        self.verify_at(timestamp, body, signature, chrono::Utc::now().timestamp())
    }

    /// Verify a webhook signature against an explicit `now` (unix seconds).
    pub fn verify_at(
        &self,
        timestamp: &str,
        body: &[u8],
        signature: &str,
        now: i64,
    ) -> Result<(), WebhookError> {
        let sent: f64 = timestamp
            .trim()
            .parse()
            .map_err(|_| WebhookError::InvalidTimestamp)?;
        if !sent.is_finite() {
            return Err(WebhookError::InvalidTimestamp);
        }

        let skew = (now as f64 - sent).abs();
        if skew > self.tolerance_secs as f64 {
            return Err(WebhookError::Stale {
                skew_secs: skew as i64,
            });
        }

        let supplied = hex::decode(signature).map_err(|_| WebhookError::Malformed)?;
        let expected = self.compute(timestamp, body);

        if supplied.len() != expected.len() {
            return Err(WebhookError::Malformed);
        }
        if !bool::from(supplied.as_slice().ct_eq(expected.as_slice())) {
            return Err(WebhookError::Mismatch);
        }
        Ok(())
    }
}
