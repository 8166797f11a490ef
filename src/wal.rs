//! Write-ahead log — replay support for recovered services
//!
//! The WAL is a passive consumer of `store.write_requested` events: services
//! announce each mutation before committing it, and the log appends a
//! sequenced, timestamped entry. The log is append-only and in-memory; entries
//! are never deleted or rewritten, and sequence ids strictly increase and are
//! never reused for the lifetime of the process.
//!
//! After recovery, a service asks for entries whose `next.module` matches its
//! own name with sequence ids beyond its last processed checkpoint, then
//! re-applies each entry's operation in log order.

use crate::bus::EventHandler;
use crate::error::{FaultError, Result};
use crate::types::{now_millis, Envelope, WriteRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// One logged write, immutable once appended
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalEntry {
    /// Kind of mutation (e.g. "create", "edit", "remove")
    pub operation: String,

    /// Post-mutation state snapshot
    pub next: serde_json::Value,

    /// Pre-mutation state snapshot, absent for creations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<serde_json::Value>,

    /// Strictly increasing, process-unique sequence id
    pub sequence_id: u64,

    /// Unix millisecond timestamp of the append
    pub timestamp: u64,
}

/// In-memory append-only write-ahead log
pub struct WriteAheadLog {
    entries: RwLock<Vec<WalEntry>>,
    next_sequence: AtomicU64,
    last_sequence: AtomicU64,
}

impl WriteAheadLog {
    /// Create an empty log; the first entry gets sequence id 1
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_sequence: AtomicU64::new(1),
            last_sequence: AtomicU64::new(0),
        }
    }

    /// Append an entry with a fresh sequence id and current timestamp
    pub fn append(
        &self,
        operation: impl Into<String>,
        next: serde_json::Value,
        prev: Option<serde_json::Value>,
    ) -> Result<WalEntry> {
        // Id allocation, push, and last-sequence update share one critical
        // section; concurrent appends must land in id order.
        let entry = {
            let mut entries = self.entries.write().map_err(|e| {
                FaultError::LockPoisoned(format!("WAL entries: {}", e))
            })?;
            let sequence_id = self.next_sequence.fetch_add(1, Ordering::SeqCst);
            let entry = WalEntry {
                operation: operation.into(),
                next,
                prev,
                sequence_id,
                timestamp: now_millis(),
            };
            entries.push(entry.clone());
            self.last_sequence.store(sequence_id, Ordering::SeqCst);
            entry
        };

        tracing::debug!(
            sequence_id = entry.sequence_id,
            operation = %entry.operation,
            "WAL entry appended"
        );
        Ok(entry)
    }

    /// Full ordered snapshot, oldest first
    pub fn all_entries(&self) -> Result<Vec<WalEntry>> {
        let entries = self.entries.read().map_err(|e| {
            FaultError::LockPoisoned(format!("WAL entries: {}", e))
        })?;
        Ok(entries.clone())
    }

    /// Most recently appended sequence id, or None while the log is empty
    pub fn last_sequence_id(&self) -> Option<u64> {
        match self.last_sequence.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    /// Replay query: entries for one module beyond a checkpoint
    ///
    /// Matches entries whose `next.module` equals `module` and whose sequence
    /// id is strictly greater than `after`, in log order.
    pub fn entries_after(&self, module: &str, after: u64) -> Result<Vec<WalEntry>> {
        let entries = self.entries.read().map_err(|e| {
            FaultError::LockPoisoned(format!("WAL entries: {}", e))
        })?;
        Ok(entries
            .iter()
            .filter(|entry| {
                entry.sequence_id > after
                    && entry.next.get("module").and_then(|m| m.as_str()) == Some(module)
            })
            .cloned()
            .collect())
    }
}

impl Default for WriteAheadLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for WriteAheadLog {
    async fn on_event(&self, event: &Envelope) -> Result<()> {
        let request: WriteRequest = event.payload_as()?;
        self.append(request.operation, request.next, request.prev)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log() {
        let wal = WriteAheadLog::new();
        assert!(wal.all_entries().unwrap().is_empty());
        assert!(wal.last_sequence_id().is_none());
    }

    #[test]
    fn test_append_assigns_increasing_sequence_ids() {
        let wal = WriteAheadLog::new();

        let first = wal
            .append(
                "create",
                serde_json::json!({"id": "/posts/1", "module": "posts"}),
                None,
            )
            .unwrap();
        let second = wal
            .append(
                "edit",
                serde_json::json!({"id": "/posts/1", "module": "posts", "body": "x"}),
                Some(serde_json::json!({"id": "/posts/1", "module": "posts"})),
            )
            .unwrap();

        assert!(second.sequence_id > first.sequence_id);

        let entries = wal.all_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, "create");
        assert_eq!(entries[1].operation, "edit");
        assert_eq!(wal.last_sequence_id(), Some(second.sequence_id));
    }

    #[test]
    fn test_entries_after_filters_module_and_checkpoint() {
        let wal = WriteAheadLog::new();

        let e1 = wal
            .append("create", serde_json::json!({"id": "/posts/1", "module": "posts"}), None)
            .unwrap();
        wal.append("create", serde_json::json!({"id": "/users/1", "module": "users"}), None)
            .unwrap();
        wal.append(
            "edit",
            serde_json::json!({"id": "/posts/1", "module": "posts", "body": "x"}),
            None,
        )
        .unwrap();

        let missed = wal.entries_after("posts", e1.sequence_id).unwrap();
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].operation, "edit");

        let all_posts = wal.entries_after("posts", 0).unwrap();
        assert_eq!(all_posts.len(), 2);

        assert!(wal.entries_after("comments", 0).unwrap().is_empty());
    }

    #[test]
    fn test_entries_without_module_never_replayed() {
        let wal = WriteAheadLog::new();
        wal.append("create", serde_json::json!({"id": "/misc/1"}), None)
            .unwrap();
        assert!(wal.entries_after("misc", 0).unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_stay_in_sequence_order() {
        let wal = std::sync::Arc::new(WriteAheadLog::new());

        let mut tasks = Vec::new();
        for t in 0..4 {
            let wal = wal.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..500 {
                    wal.append(
                        "create",
                        serde_json::json!({"id": format!("/posts/{}-{}", t, i), "module": "posts"}),
                        None,
                    )
                    .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let entries = wal.all_entries().unwrap();
        assert_eq!(entries.len(), 2000);
        for pair in entries.windows(2) {
            assert!(
                pair[0].sequence_id < pair[1].sequence_id,
                "out-of-order entries: {} then {}",
                pair[0].sequence_id,
                pair[1].sequence_id
            );
        }
        assert_eq!(wal.last_sequence_id(), Some(entries.last().unwrap().sequence_id));
    }

    #[tokio::test]
    async fn test_appends_from_write_requested_events() {
        let wal = WriteAheadLog::new();
        let request = WriteRequest {
            operation: "create".to_string(),
            next: serde_json::json!({"id": "/posts/1", "module": "posts"}),
            prev: None,
        };
        let envelope = Envelope::new(
            crate::types::topic::WRITE_REQUESTED,
            serde_json::to_value(&request).unwrap(),
        );

        wal.on_event(&envelope).await.unwrap();

        let entries = wal.all_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence_id, 1);
        assert_eq!(entries[0].next["module"], "posts");
        assert!(entries[0].timestamp > 0);
    }

    #[tokio::test]
    async fn test_malformed_write_event_is_rejected() {
        let wal = WriteAheadLog::new();
        let envelope = Envelope::new(
            crate::types::topic::WRITE_REQUESTED,
            serde_json::json!({"nonsense": true}),
        );

        assert!(wal.on_event(&envelope).await.is_err());
        assert!(wal.all_entries().unwrap().is_empty());
    }
}
