//! Persistence backends for the ledger.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;

use super::chain::LedgerEvent;
use super::LedgerError;

/// Append-only storage for ledger events.
///
/// Implementations never rewrite stored events. `scan` visits events in
/// append order and stops early when the visitor returns `false`.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist one event after all previously appended ones.
    async fn append(&self, event: &LedgerEvent) -> Result<(), LedgerError>;

    /// Visit stored events in order.
    async fn scan(
        &self,
        visitor: &mut (dyn FnMut(LedgerEvent) -> bool + Send),
    ) -> Result<(), LedgerError>;
}

/// In-memory store.
pub struct MemoryStore {
    events: RwLock<Vec<LedgerEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of all stored events.
    pub async fn events(&self) -> Vec<LedgerEvent> {
        self.events.read().await.clone()
    }

    /// Overwrite a stored event in place, simulating tampering.
    #[cfg(test)]
    pub(crate) async fn tamper(&self, index: usize, f: impl FnOnce(&mut LedgerEvent)) {
        let mut events = self.events.write().await;
        if let Some(event) = events.get_mut(index) {
            f(event);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append(&self, event: &LedgerEvent) -> Result<(), LedgerError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn scan(
        &self,
        visitor: &mut (dyn FnMut(LedgerEvent) -> bool + Send),
    ) -> Result<(), LedgerError> {
        let events = self.events.read().await;
        for event in events.iter() {
            if !visitor(event.clone()) {
                break;
            }
        }
        Ok(())
    }
}

/// One JSON object per line, appended to a file.
///
/// Each line is independently parseable; scanning reads one line at a time.
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerStore for JsonlStore {
    async fn append(&self, event: &LedgerEvent) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;

        // A torn final write leaves no newline; start on a fresh line so the
        // new event stays readable on its own.
        let mut line = Vec::new();
        let len = file.metadata().await?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1)).await?;
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                line.push(b'\n');
            }
        }
        line.extend(serde_json::to_vec(event)?);
        line.push(b'\n');

        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn scan(
        &self,
        visitor: &mut (dyn FnMut(LedgerEvent) -> bool + Send),
    ) -> Result<(), LedgerError> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let mut index = 0u64;
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: LedgerEvent =
                serde_json::from_str(&line).map_err(|e| LedgerError::Corrupt {
                    index,
                    reason: e.to_string(),
                })?;
            if !visitor(event) {
                break;
            }
            index += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::chain::GENESIS_HASH;
    use serde_json::json;

    #[tokio::test]
    async fn test_jsonl_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("nested/audit.jsonl"));

        let first = LedgerEvent::next(0, "CONFIG_CHANGED", json!({"key": "x"}), GENESIS_HASH).unwrap();
        let second =
            LedgerEvent::next(1, "AUTH_FAILURE", json!({"user": "u1"}), first.hash.clone()).unwrap();
        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();

        let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert_eq!(contents.lines().count(), 2);

        let mut seen = Vec::new();
        store
            .scan(&mut |event| {
                seen.push(event);
                true
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![first, second]);
    }

    #[tokio::test]
    async fn test_jsonl_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("absent.jsonl"));

        let mut count = 0;
        store
            .scan(&mut |_| {
                count += 1;
                true
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_jsonl_corrupt_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let event = LedgerEvent::next(0, "T", json!({}), GENESIS_HASH).unwrap();
        let line = serde_json::to_string(&event).unwrap();
        tokio::fs::write(&path, format!("{}\n{{not json\n", line))
            .await
            .unwrap();

        let store = JsonlStore::new(&path);
        let result = store.scan(&mut |_| true).await;
        assert!(matches!(result, Err(LedgerError::Corrupt { index: 1, .. })));
    }

    #[tokio::test]
    async fn test_append_after_torn_line_starts_fresh_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let first = LedgerEvent::next(0, "T", json!({}), GENESIS_HASH).unwrap();
        let torn = format!("{}\n{{\"sequence\":1,\"timest", serde_json::to_string(&first).unwrap());
        tokio::fs::write(&path, torn).await.unwrap();

        let store = JsonlStore::new(&path);
        let second = LedgerEvent::next(1, "T", json!({}), first.hash.clone()).unwrap();
        store.append(&second).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        let parsed: LedgerEvent = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(parsed, second);
    }

    #[tokio::test]
    async fn test_scan_stops_early() {
        let store = MemoryStore::new();
        let mut prev = GENESIS_HASH.to_string();
        for i in 0..5 {
            let event = LedgerEvent::next(i, "T", json!({ "i": i }), prev).unwrap();
            prev = event.hash.clone();
            store.append(&event).await.unwrap();
        }

        let mut visited = 0;
        store
            .scan(&mut |_| {
                visited += 1;
                visited < 2
            })
            .await
            .unwrap();
        assert_eq!(visited, 2);
    }
}
