//! Signed decision records and a hash-chained audit ledger.
//!
//! This crate holds the evidence side of a review: the decision schema,
//! the canonical encoding every hash and MAC is computed over, the record
//! signer, and the append-only ledger.
//!
//! ```text
//!   DecisionRecord + AuditTrail
//!            │
//!            ▼
//!   canonical bytes ──► RecordSigner (HMAC-SHA256) ──► SignedRecord
//!            │
//!            ▼
//!   HashChainLedger: GENESIS ◄── e0 ◄── e1 ◄── e2 ...
//! ```
//!
//! # Key Components
//!
//! - [`canonical`]: Deterministic JSON encoding and SHA-256 helpers
//! - [`RecordSigner`]: Signs and verifies decision records
//! - [`WebhookVerifier`]: Timestamped MAC checks for inbound payloads
//! - [`HashChainLedger`]: Tamper-evident event log over a [`LedgerStore`]
//!
//! # Example
//!
//! ```ignore
//! use evidence::{AuditTrail, DecisionRecord, RecordSigner, RiskLevel, SigningKey};
//!
//! let signer = RecordSigner::new(SigningKey::generate());
//! let record = DecisionRecord::new(RiskLevel::Low, 12.0, 0.95);
//! let audit = AuditTrail::new("review-gate", fingerprint, "gpt-4o", usage, verdict);
//! let signed = signer.sign(record, audit)?;
//! assert!(signer.is_valid(&signed));
//! ```

pub mod canonical;
pub mod ledger;
pub mod signing;
pub mod types;

// Re-export main types
pub use canonical::{compute_hash, fingerprint, to_canonical_bytes, to_canonical_string, CanonicalError};
pub use ledger::{
    ChainReport, HashChainLedger, JsonlStore, LedgerError, LedgerEvent, LedgerStore,
    LedgerSummary, MemoryStore, GENESIS_HASH,
};
pub use signing::{
    KeyError, KeyWarning, RecordSigner, SignatureError, SigningKey, WebhookError,
    WebhookVerifier, DEFAULT_KEY_ENV, MIN_KEY_BYTES,
};
pub use types::*;
