//! Hash-chained, append-only audit ledger.
//!
//! Each event's hash covers its body, the previous event's hash and its
//! timestamp, so editing or removing any stored event is detectable by
//! [`HashChainLedger::verify_chain`].
//!
//! Appends are serialized by a single mutex around the chain head. Two
//! writers computing against the same stale head would fork the chain.

pub mod chain;
pub mod store;

pub use chain::{
    compute_event_hash, verify_events, BreakKind, ChainBreak, ChainReport, ChainVerifier,
    LedgerEvent, GENESIS_HASH,
};
pub use store::{JsonlStore, LedgerStore, MemoryStore};

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::canonical::CanonicalError;

/// Error types for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Underlying storage failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Event could not be canonicalized for hashing
    #[error("Encoding error: {0}")]
    Encoding(#[from] CanonicalError),

    /// Event could not be serialized for storage
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored entry could not be parsed
    #[error("Corrupt ledger entry at index {index}: {reason}")]
    Corrupt { index: u64, reason: String },
}

/// Position the next append links to.
#[derive(Debug, Clone)]
struct ChainHead {
    last_hash: String,
    next_sequence: u64,
}

/// Append-only, hash-chained event log.
pub struct HashChainLedger {
    store: Arc<dyn LedgerStore>,
    head: Mutex<ChainHead>,
    compromised: AtomicBool,
}

impl HashChainLedger {
    /// Open a ledger over a store, recovering the head from existing events.
    ///
    /// An unreadable entry (for example a write torn by a crash) does not
    /// prevent opening: the head is recovered from the last readable event
    /// before it and the ledger starts out compromised.
    pub async fn open(store: Arc<dyn LedgerStore>) -> Result<Self, LedgerError> {
        let mut last: Option<LedgerEvent> = None;
        let scanned = store
            .scan(&mut |event| {
                last = Some(event);
                true
            })
            .await;

        let compromised = match scanned {
            Ok(()) => false,
            Err(LedgerError::Corrupt { index, reason }) => {
                error!(
                    index,
                    reason = %reason,
                    "Unreadable ledger entry on open; ledger marked compromised"
                );
                true
            }
            Err(e) => return Err(e),
        };

        let head = match last {
            Some(event) => ChainHead {
                last_hash: event.hash,
                next_sequence: event.sequence + 1,
            },
            None => ChainHead {
                last_hash: GENESIS_HASH.to_string(),
                next_sequence: 0,
            },
        };

        info!(
            events = head.next_sequence,
            head = %head.last_hash,
            "Ledger opened"
        );

        Ok(Self {
            store,
            head: Mutex::new(head),
            compromised: AtomicBool::new(compromised),
        })
    }

    /// Open an empty in-memory ledger.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            head: Mutex::new(ChainHead {
                last_hash: GENESIS_HASH.to_string(),
                next_sequence: 0,
            }),
            compromised: AtomicBool::new(false),
        }
    }

    /// Open (or create) a JSONL-backed ledger at `path`.
    pub async fn open_jsonl(path: impl Into<std::path::PathBuf>) -> Result<Self, LedgerError> {
        Self::open(Arc::new(JsonlStore::new(path))).await
    }

    /// Append an event and advance the head.
    ///
    /// The head only advances after the store accepted the event, so a
    /// failed write leaves the chain unchanged.
    pub async fn append(
        &self,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<LedgerEvent, LedgerError> {
        let mut head = self.head.lock().await;

        let event = LedgerEvent::next(
            head.next_sequence,
            event_type,
            payload,
            head.last_hash.clone(),
        )?;
        self.store.append(&event).await?;

        head.last_hash = event.hash.clone();
        head.next_sequence += 1;

        debug!(
            sequence = event.sequence,
            event_type = %event.event_type,
            hash = %event.hash,
            "Ledger event appended"
        );

        Ok(event)
    }

    /// Hash the next append will link to.
    pub async fn last_hash(&self) -> String {
        self.head.lock().await.last_hash.clone()
    }

    /// Number of events appended so far.
    pub async fn len(&self) -> u64 {
        self.head.lock().await.next_sequence
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether a previous verification found the chain broken.
    pub fn is_compromised(&self) -> bool {
        self.compromised.load(Ordering::SeqCst)
    }

    /// Walk the chain from genesis and check every link.
    ///
    /// Appends wait while verification runs. A broken chain is reported,
    /// logged and marks the ledger compromised; it is not an `Err`.
    pub async fn verify_chain(&self) -> Result<ChainReport, LedgerError> {
        let head = self.head.lock().await;

        let mut verifier = ChainVerifier::new();
        let scanned = self.store.scan(&mut |event| verifier.check(&event)).await;
        match scanned {
            Ok(()) => verifier.expect_head(&head.last_hash),
            Err(LedgerError::Corrupt { index, reason }) => verifier.unreadable(index, reason),
            Err(e) => return Err(e),
        }
        let report = verifier.finish();

        if let Some(broken) = &report.first_break {
            self.compromised.store(true, Ordering::SeqCst);
            error!(
                index = broken.index,
                reason = %broken.kind,
                "Ledger integrity check failed; ledger marked compromised"
            );
        } else {
            debug!(events = report.events_checked, "Ledger chain verified");
        }

        Ok(report)
    }

    /// Count events per type.
    pub async fn summary(&self) -> Result<LedgerSummary, LedgerError> {
        let mut summary = LedgerSummary::default();
        self.store
            .scan(&mut |event| {
                summary.record(&event);
                true
            })
            .await?;
        Ok(summary)
    }

    /// Count events per type, only those at or after `cutoff`.
    pub async fn summary_since(&self, cutoff: DateTime<Utc>) -> Result<LedgerSummary, LedgerError> {
        let mut summary = LedgerSummary::default();
        self.store
            .scan(&mut |event| {
                if event.timestamp >= cutoff {
                    summary.record(&event);
                }
                true
            })
            .await?;
        Ok(summary)
    }

    /// The most recent `n` events, oldest first.
    ///
    /// Streams the store keeping at most `n` events in memory.
    pub async fn tail(&self, n: usize) -> Result<Vec<LedgerEvent>, LedgerError> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut recent: VecDeque<LedgerEvent> = VecDeque::with_capacity(n);
        self.store
            .scan(&mut |event| {
                if recent.len() == n {
                    recent.pop_front();
                }
                recent.push_back(event);
                true
            })
            .await?;
        Ok(recent.into())
    }
}

/// Per-type event counts over a ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    /// Total events
    pub total: u64,
    /// Events by type
    pub by_type: BTreeMap<String, u64>,
    /// Timestamp of the first event
    pub first_at: Option<DateTime<Utc>>,
    /// Timestamp of the last event
    pub last_at: Option<DateTime<Utc>>,
}

impl LedgerSummary {
    fn record(&mut self, event: &LedgerEvent) {
        self.total += 1;
        *self.by_type.entry(event.event_type.clone()).or_insert(0) += 1;
        if self.first_at.is_none() {
            self.first_at = Some(event.timestamp);
        }
        self.last_at = Some(event.timestamp);
    }

    /// Count for one event type.
    pub fn count(&self, event_type: &str) -> u64 {
        self.by_type.get(event_type).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;
    use serde_json::json;

    async fn ledger_with(n: u64) -> (Arc<MemoryStore>, HashChainLedger) {
        let store = Arc::new(MemoryStore::new());
        let ledger = HashChainLedger::open(store.clone()).await.unwrap();
        for i in 0..n {
            ledger
                .append("GESTURE_COMMAND", json!({ "gesture_id": i, "success": true }))
                .await
                .unwrap();
        }
        (store, ledger)
    }

    #[tokio::test]
    async fn test_append_links_to_previous() {
        let ledger = HashChainLedger::in_memory();
        let first = ledger.append("AUTH_FAILURE", json!({"user": "a"})).await.unwrap();
        let second = ledger.append("APPROVED", json!({"review": "r1"})).await.unwrap();

        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(first.sequence, 0);
        assert_eq!(second.prev_hash, first.hash);
        assert_eq!(second.sequence, 1);
        assert_eq!(ledger.last_hash().await, second.hash);
        assert_eq!(ledger.len().await, 2);
    }

    #[tokio::test]
    async fn test_verify_intact_chain() {
        let (_, ledger) = ledger_with(10).await;
        let report = ledger.verify_chain().await.unwrap();

        assert!(report.is_intact());
        assert_eq!(report.events_checked, 10);
        assert!(!ledger.is_compromised());
    }

    #[tokio::test]
    async fn test_corrupted_payload_detected_at_index() {
        let (store, ledger) = ledger_with(6).await;
        store
            .tamper(3, |event| event.payload = json!({ "gesture_id": 99, "success": false }))
            .await;

        let report = ledger.verify_chain().await.unwrap();
        assert!(!report.is_intact());
        assert_eq!(report.first_invalid_index(), Some(3));
        assert!(ledger.is_compromised());

        // Appends are still accepted after a failed check.
        tokio_test::assert_ok!(ledger.append("NOTE", json!({})).await);
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_fork() {
        let ledger = Arc::new(HashChainLedger::in_memory());

        let mut handles = Vec::new();
        for worker in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    ledger
                        .append("WORKER", json!({ "worker": worker, "i": i }))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ledger.len().await, 200);
        assert!(ledger.verify_chain().await.unwrap().is_intact());
    }

    #[tokio::test]
    async fn test_jsonl_reopen_continues_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        let last = {
            let ledger = HashChainLedger::open_jsonl(&path).await.unwrap();
            ledger.append("CONFIG_CHANGED", json!({"k": 1})).await.unwrap();
            ledger.append("CONFIG_CHANGED", json!({"k": 2})).await.unwrap()
        };

        let reopened = HashChainLedger::open_jsonl(&path).await.unwrap();
        assert_eq!(reopened.last_hash().await, last.hash);

        let next = reopened.append("POLICY_VIOLATION", json!({"rule": "x"})).await.unwrap();
        assert_eq!(next.prev_hash, last.hash);
        assert_eq!(next.sequence, 2);
        assert!(reopened.verify_chain().await.unwrap().is_intact());
    }

    #[tokio::test]
    async fn test_jsonl_edited_line_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        let ledger = HashChainLedger::open_jsonl(&path).await.unwrap();
        for i in 0..4 {
            ledger.append("GESTURE_COMMAND", json!({ "i": i })).await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let edited: Vec<String> = contents
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if i == 1 {
                    line.replace("\"i\":1", "\"i\":7")
                } else {
                    line.to_string()
                }
            })
            .collect();
        tokio::fs::write(&path, edited.join("\n") + "\n").await.unwrap();

        let report = ledger.verify_chain().await.unwrap();
        assert_eq!(report.first_invalid_index(), Some(1));
    }

    #[tokio::test]
    async fn test_truncated_store_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        let ledger = HashChainLedger::open_jsonl(&path).await.unwrap();
        for i in 0..3 {
            ledger.append("T", json!({ "i": i })).await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let kept: Vec<&str> = contents.lines().take(2).collect();
        tokio::fs::write(&path, kept.join("\n") + "\n").await.unwrap();

        let report = ledger.verify_chain().await.unwrap();
        assert_eq!(report.first_invalid_index(), Some(2));
        assert!(matches!(
            report.first_break.unwrap().kind,
            BreakKind::Truncated { .. }
        ));
    }

    #[tokio::test]
    async fn test_torn_write_opens_compromised() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        let last_good = {
            let ledger = HashChainLedger::open_jsonl(&path).await.unwrap();
            ledger.append("APPROVED", json!({"n": 0})).await.unwrap();
            ledger.append("APPROVED", json!({"n": 1})).await.unwrap()
        };

        // Crash mid-write: the third line never got its closing bytes.
        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents.push_str("{\"sequence\":2,\"timestamp\":\"2026-10-19T0");
        tokio::fs::write(&path, contents).await.unwrap();

        let ledger = tokio_test::assert_ok!(HashChainLedger::open_jsonl(&path).await);
        assert!(ledger.is_compromised());
        assert_eq!(ledger.len().await, 2);
        assert_eq!(ledger.last_hash().await, last_good.hash);

        let next = ledger.append("REJECTED", json!({"n": 2})).await.unwrap();
        assert_eq!(next.prev_hash, last_good.hash);

        let report = ledger.verify_chain().await.unwrap();
        assert_eq!(report.first_invalid_index(), Some(2));
        assert!(matches!(
            report.first_break.unwrap().kind,
            BreakKind::Unreadable(_)
        ));
    }

    #[tokio::test]
    async fn test_tail_returns_most_recent_in_order() {
        let (_, ledger) = ledger_with(7).await;

        let recent = ledger.tail(3).await.unwrap();
        let ids: Vec<u64> = recent.iter().map(|e| e.sequence).collect();
        assert_eq!(ids, vec![4, 5, 6]);
        assert_eq!(recent[2].hash, ledger.last_hash().await);

        assert_eq!(ledger.tail(50).await.unwrap().len(), 7);
        assert!(ledger.tail(0).await.unwrap().is_empty());
        assert!(HashChainLedger::in_memory().tail(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_summary_since_cutoff() {
        let store = Arc::new(MemoryStore::new());
        let base = Utc::now() - chrono::Duration::days(10);
        let mut prev = GENESIS_HASH.to_string();
        for (i, (days, kind)) in [(0, "REJECTED"), (2, "APPROVED"), (8, "APPROVED"), (9, "REJECTED")]
            .into_iter()
            .enumerate()
        {
            let event = LedgerEvent::at(
                i as u64,
                base + chrono::Duration::days(days),
                kind,
                json!({}),
                prev,
            )
            .unwrap();
            prev = event.hash.clone();
            store.append(&event).await.unwrap();
        }
        let ledger = HashChainLedger::open(store).await.unwrap();

        let week = ledger
            .summary_since(Utc::now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(week.total, 2);
        assert_eq!(week.count("APPROVED"), 1);
        assert_eq!(week.count("REJECTED"), 1);

        let all = ledger.summary().await.unwrap();
        assert_eq!(all.total, 4);
        assert_eq!(all.first_at, Some(base.trunc_subsecs(6)));
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let ledger = HashChainLedger::in_memory();
        ledger.append("APPROVED", json!({})).await.unwrap();
        ledger.append("REJECTED", json!({})).await.unwrap();
        ledger.append("APPROVED", json!({})).await.unwrap();

        let summary = ledger.summary().await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.count("APPROVED"), 2);
        assert_eq!(summary.count("REJECTED"), 1);
        assert_eq!(summary.count("MISSING"), 0);
        assert!(summary.first_at <= summary.last_at);
    }
}
