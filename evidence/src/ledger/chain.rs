//! Ledger events and chain verification.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::{compute_hash, to_canonical_bytes, CanonicalError};

/// `prev_hash` of the first event in every chain.
pub const GENESIS_HASH: &str = "GENESIS";

/// One tamper-evident entry in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Position in the chain, starting at 0
    pub sequence: u64,
    /// When the event was appended (microsecond precision)
    pub timestamp: DateTime<Utc>,
    /// What kind of occurrence this records
    pub event_type: String,
    /// Free-form event data
    pub payload: serde_json::Value,
    /// Hash of the preceding event, or [`GENESIS_HASH`]
    pub prev_hash: String,
    /// Hash of this event
    pub hash: String,
}

#[derive(Serialize)]
struct HashedBody<'a> {
    sequence: u64,
    event_type: &'a str,
    payload: &'a serde_json::Value,
}

impl LedgerEvent {
    /// Build the next event after `prev_hash`, stamping it with the current time.
    pub fn next(
        sequence: u64,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        prev_hash: impl Into<String>,
    ) -> Result<Self, CanonicalError> {
        Self::at(sequence, Utc::now(), event_type, payload, prev_hash)
    }

    /// Build an event with an explicit timestamp.
    pub fn at(
        sequence: u64,
        timestamp: DateTime<Utc>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        prev_hash: impl Into<String>,
    ) -> Result<Self, CanonicalError> {
        let event_type = event_type.into();
        let prev_hash = prev_hash.into();
        let timestamp = timestamp.trunc_subsecs(6);
        let hash = compute_event_hash(sequence, &event_type, &payload, &prev_hash, &timestamp)?;

        Ok(Self {
            sequence,
            timestamp,
            event_type,
            payload,
            prev_hash,
            hash,
        })
    }

    /// Recompute this event's hash from its stored fields.
    pub fn recompute_hash(&self) -> Result<String, CanonicalError> {
        compute_event_hash(
            self.sequence,
            &self.event_type,
            &self.payload,
            &self.prev_hash,
            &self.timestamp,
        )
    }
}

/// `SHA-256(canonical(body) || prev_hash || timestamp)`.
pub fn compute_event_hash(
    sequence: u64,
    event_type: &str,
    payload: &serde_json::Value,
    prev_hash: &str,
    timestamp: &DateTime<Utc>,
) -> Result<String, CanonicalError> {
    let mut material = to_canonical_bytes(&HashedBody {
        sequence,
        event_type,
        payload,
    })?;
    material.extend_from_slice(prev_hash.as_bytes());
    material.extend_from_slice(
        timestamp
            .to_rfc3339_opts(SecondsFormat::Micros, true)
            .as_bytes(),
    );
    Ok(compute_hash(&material))
}

/// Why a chain failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakKind {
    /// Sequence number out of order
    SequenceGap { expected: u64, actual: u64 },
    /// `prev_hash` does not point at the preceding event
    BrokenLink { expected: String, actual: String },
    /// Stored hash differs from the recomputed one
    HashMismatch { stored: String, computed: String },
    /// Entry could not be parsed or re-encoded
    Unreadable(String),
    /// Stored chain ends before the ledger's known head
    Truncated { expected_head: String },
}

impl std::fmt::Display for BreakKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SequenceGap { expected, actual } => {
                write!(f, "sequence gap: expected {}, got {}", expected, actual)
            }
            Self::BrokenLink { .. } => write!(f, "prev_hash does not match preceding event"),
            Self::HashMismatch { .. } => write!(f, "stored hash does not match contents"),
            Self::Unreadable(reason) => write!(f, "unreadable entry: {}", reason),
            Self::Truncated { .. } => write!(f, "chain ends before known head"),
        }
    }
}

/// First failing link in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    /// Index of the offending event
    pub index: u64,
    pub kind: BreakKind,
}

/// The result of verifying a hash chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    /// Events inspected before stopping
    pub events_checked: u64,
    /// First failing link, if any
    pub first_break: Option<ChainBreak>,
    /// Hash of the last valid event (or genesis)
    pub head_hash: String,
}

impl ChainReport {
    /// Whether the whole chain verified.
    pub fn is_intact(&self) -> bool {
        self.first_break.is_none()
    }

    /// Index of the first bad event, if any.
    pub fn first_invalid_index(&self) -> Option<u64> {
        self.first_break.as_ref().map(|b| b.index)
    }
}

/// Incremental verifier; feed events in order.
///
/// Holds only the previous hash and expected sequence, so chains of any
/// length can be checked while streaming.
#[derive(Debug)]
pub struct ChainVerifier {
    expected_prev: String,
    expected_sequence: u64,
    first_break: Option<ChainBreak>,
}

impl ChainVerifier {
    pub fn new() -> Self {
        Self {
            expected_prev: GENESIS_HASH.to_string(),
            expected_sequence: 0,
            first_break: None,
        }
    }

    /// Check the next event. Returns `false` once the chain is broken.
    pub fn check(&mut self, event: &LedgerEvent) -> bool {
        if self.first_break.is_some() {
            return false;
        }

        let index = self.expected_sequence;
        let kind = if event.sequence != self.expected_sequence {
            Some(BreakKind::SequenceGap {
                expected: self.expected_sequence,
                actual: event.sequence,
            })
        } else if event.prev_hash != self.expected_prev {
            Some(BreakKind::BrokenLink {
                expected: self.expected_prev.clone(),
                actual: event.prev_hash.clone(),
            })
        } else {
            match event.recompute_hash() {
                Ok(computed) if computed == event.hash => None,
                Ok(computed) => Some(BreakKind::HashMismatch {
                    stored: event.hash.clone(),
                    computed,
                }),
                Err(e) => Some(BreakKind::Unreadable(e.to_string())),
            }
        };

        match kind {
            Some(kind) => {
                self.first_break = Some(ChainBreak { index, kind });
                false
            }
            None => {
                self.expected_prev = event.hash.clone();
                self.expected_sequence += 1;
                true
            }
        }
    }

    /// Record an entry that could not be parsed at all.
    pub fn unreadable(&mut self, index: u64, reason: impl Into<String>) {
        if self.first_break.is_none() {
            self.first_break = Some(ChainBreak {
                index,
                kind: BreakKind::Unreadable(reason.into()),
            });
        }
    }

    /// Require the verified chain to end at `head`.
    pub fn expect_head(&mut self, head: &str) {
        if self.first_break.is_none() && self.expected_prev != head {
            self.first_break = Some(ChainBreak {
                index: self.expected_sequence,
                kind: BreakKind::Truncated {
                    expected_head: head.to_string(),
                },
            });
        }
    }

    /// Finish and produce a report.
    pub fn finish(self) -> ChainReport {
        ChainReport {
            events_checked: self.expected_sequence,
            first_break: self.first_break,
            head_hash: self.expected_prev,
        }
    }
}

impl Default for ChainVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Verify an in-memory sequence of events.
pub fn verify_events<'a>(events: impl IntoIterator<Item = &'a LedgerEvent>) -> ChainReport {
    let mut verifier = ChainVerifier::new();
    for event in events {
        if !verifier.check(event) {
            break;
        }
    }
    verifier.finish()
}
