//! The durable, append-only log of Raft entries.
//!
//! [`Log`] is the external collaborator interface described in the system
//! overview: a real deployment plugs in a durable implementation. This
//! crate ships [`InMemoryLog`], the reference implementation used by tests
//! and by any embedding that already handles durability upstream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RaftError, RaftResult};

/// A single entry in the replicated log.
///
/// Entries are immutable once durable: indices are monotonic and dense
/// starting at 1, and two entries sharing an `(index, term)` from any node
/// always carry identical `payload` bytes (invariant 3 in the data model).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log. Always >= 1.
    pub index: u64,
    /// The term in which this entry was appended by the then-leader.
    pub term: u64,
    /// Opaque command bytes, interpreted by the state-machine consumer.
    pub payload: Vec<u8>,
}

/// Metadata describing a snapshot that has compacted the log's prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SnapshotMeta {
    /// Highest index covered by the snapshot.
    pub last_included_index: u64,
    /// Term of `last_included_index` at the time of compaction.
    pub last_included_term: u64,
}

/// Durable append-only storage for [`LogEntry`] values.
///
/// Implementations must guarantee: `append` always assigns `lastIndex()+1`;
/// `truncate` removes `from_index..=lastIndex()`/never past the committed
/// prefix (callers enforce that, see [`Log::truncate`] docs); and persisted
/// entries remain stable across process restart when wired to real storage.
#[async_trait]
pub trait Log: Send + Sync {
    /// Append a new entry at `lastIndex()+1` with the given term and
    /// payload, returning the assigned index.
    async fn append(&self, term: u64, payload: Vec<u8>) -> RaftResult<u64>;

    /// Fetch the entry at `index`, if still present (not yet compacted).
    async fn get(&self, index: u64) -> RaftResult<Option<LogEntry>>;

    /// Whether an entry is present at `index` (not compacted, not past the
    /// end of the log).
    async fn contains_entry(&self, index: u64) -> RaftResult<bool> {
        Ok(self.get(index).await?.is_some())
    }

    /// Remove every entry from `from_index` through `last_index()`
    /// inclusive. Callers must never invoke this past the commit index;
    /// implementations may assert this in debug builds.
    async fn truncate(&self, from_index: u64) -> RaftResult<()>;

    /// The lowest index still present in the log (1 if never compacted,
    /// or `snapshot.last_included_index + 1` after a compaction).
    async fn first_index(&self) -> RaftResult<u64>;

    /// The highest index present in the log (0 if empty and never
    /// compacted).
    async fn last_index(&self) -> RaftResult<u64>;

    /// The term of the entry at `last_index()`, or 0 if the log (including
    /// any snapshot prefix) is entirely empty.
    async fn last_term(&self) -> RaftResult<u64>;

    /// Drop every entry up through and including `through_index`,
    /// recording `snapshot` as the replacement prefix summary.
    async fn compact(&self, through_index: u64, snapshot: SnapshotMeta) -> RaftResult<()>;

    /// The current snapshot metadata, if the log has ever been compacted.
    async fn snapshot_meta(&self) -> RaftResult<Option<SnapshotMeta>>;

    /// Load any on-disk state. Called once by `StateContext::open()`.
    async fn open(&self) -> RaftResult<()>;

    /// Release any held resources. Called by `StateContext::close()`.
    async fn close(&self) -> RaftResult<()>;
}

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<LogEntry>,
    snapshot: Option<SnapshotMeta>,
    open: bool,
}

/// An in-memory [`Log`] implementation. Entries do not survive process
/// restart; this is the reference/test implementation, not a durability
/// story (the durable backend is an external collaborator, out of scope).
#[derive(Debug, Default)]
pub struct InMemoryLog {
    state: tokio::sync::RwLock<LogState>,
}

impl InMemoryLog {
    /// Construct an empty, unopened log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn offset_of(state: &LogState, index: u64) -> Option<usize> {
        let first = state
            .snapshot
            .map_or(1, |s| s.last_included_index + 1);
        if index < first {
            return None;
        }
        let offset = (index - first) as usize;
        if offset < state.entries.len() {
            Some(offset)
        } else {
            None
        }
    }
}

#[async_trait]
impl Log for InMemoryLog {
    async fn append(&self, term: u64, payload: Vec<u8>) -> RaftResult<u64> {
        let mut state = self.state.write().await;
        let index = state.entries.last().map_or_else(
            || state.snapshot.map_or(1, |s| s.last_included_index + 1),
            |e| e.index + 1,
        );
        state.entries.push(LogEntry {
            index,
            term,
            payload,
        });
        Ok(index)
    }

    async fn get(&self, index: u64) -> RaftResult<Option<LogEntry>> {
        let state = self.state.read().await;
        Ok(Self::offset_of(&state, index).map(|off| state.entries[off].clone()))
    }

    async fn truncate(&self, from_index: u64) -> RaftResult<()> {
        let mut state = self.state.write().await;
        if let Some(offset) = Self::offset_of(&state, from_index) {
            state.entries.truncate(offset);
        } else if from_index > state.entries.last().map_or(0, |e| e.index) {
            // Truncating past the end is a no-op.
        }
        Ok(())
    }

    async fn first_index(&self) -> RaftResult<u64> {
        let state = self.state.read().await;
        Ok(state.snapshot.map_or(1, |s| s.last_included_index + 1))
    }

    async fn last_index(&self) -> RaftResult<u64> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .last()
            .map_or_else(|| state.snapshot.map_or(0, |s| s.last_included_index), |e| e.index))
    }

    async fn last_term(&self) -> RaftResult<u64> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .last()
            .map_or_else(|| state.snapshot.map_or(0, |s| s.last_included_term), |e| e.term))
    }

    async fn compact(&self, through_index: u64, snapshot: SnapshotMeta) -> RaftResult<()> {
        let mut state = self.state.write().await;
        if let Some(offset) = Self::offset_of(&state, through_index) {
            state.entries.drain(0..=offset);
        } else {
            state.entries.clear();
        }
        state.snapshot = Some(snapshot);
        Ok(())
    }

    async fn snapshot_meta(&self) -> RaftResult<Option<SnapshotMeta>> {
        Ok(self.state.read().await.snapshot)
    }

    async fn open(&self) -> RaftResult<()> {
        let mut state = self.state.write().await;
        if state.open {
            return Err(RaftError::IllegalState("log already open".into()));
        }
        state.open = true;
        Ok(())
    }

    async fn close(&self) -> RaftResult<()> {
        let mut state = self.state.write().await;
        state.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_assigns_dense_monotonic_indices() {
        let log = InMemoryLog::new();
        assert_eq!(log.append(1, b"a".to_vec()).await.unwrap(), 1);
        assert_eq!(log.append(1, b"b".to_vec()).await.unwrap(), 2);
        assert_eq!(log.append(2, b"c".to_vec()).await.unwrap(), 3);
        assert_eq!(log.last_index().await.unwrap(), 3);
        assert_eq!(log.last_term().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn truncate_removes_conflicting_suffix() {
        let log = InMemoryLog::new();
        log.append(1, b"a".to_vec()).await.unwrap();
        log.append(1, b"b".to_vec()).await.unwrap();
        log.append(1, b"c".to_vec()).await.unwrap();
        log.truncate(2).await.unwrap();
        assert_eq!(log.last_index().await.unwrap(), 1);
        assert!(log.get(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compact_drops_prefix_and_updates_first_index() {
        let log = InMemoryLog::new();
        for i in 0..5 {
            log.append(1, vec![i]).await.unwrap();
        }
        log.compact(
            3,
            SnapshotMeta {
                last_included_index: 3,
                last_included_term: 1,
            },
        )
        .await
        .unwrap();

        assert_eq!(log.first_index().await.unwrap(), 4);
        assert_eq!(log.last_index().await.unwrap(), 5);
        assert!(log.get(3).await.unwrap().is_none());
        assert!(log.get(4).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn contains_entry_reflects_presence() {
        let log = InMemoryLog::new();
        log.append(1, b"x".to_vec()).await.unwrap();
        assert!(log.contains_entry(1).await.unwrap());
        assert!(!log.contains_entry(2).await.unwrap());
    }
}
