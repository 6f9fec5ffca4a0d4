//! Wire-level request/response types for the six Raft protocol messages.

use serde::{Deserialize, Serialize};

use crate::log::LogEntry;
use crate::member::MemberId;

/// Consistency level requested for a [`QueryRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Consistency {
    /// The leader must reconfirm leadership with a heartbeat round before
    /// answering.
    #[default]
    Strong,
    /// The leader answers from local state, relying on its lease.
    Lease,
    /// Any node answers from local state, with no leadership check.
    Weak,
}

/// Liveness probe / zero-entry append, also used as a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingRequest {
    /// Sender's current term.
    pub term: u64,
    /// Sender's belief about who the leader is.
    pub leader: Option<MemberId>,
    /// Sender's last log index.
    pub last_log_index: u64,
    /// Sender's last log term.
    pub last_log_term: u64,
    /// Sender's commit index.
    pub commit_index: u64,
}

/// Response to [`PingRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    /// Responder's term, so the caller can update itself.
    pub term: u64,
    /// Whether the ping was accepted.
    pub succeeded: bool,
}

/// RequestVote RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRequest {
    /// Candidate's term.
    pub term: u64,
    /// The candidate requesting the vote.
    pub candidate: MemberId,
    /// Index of the candidate's last log entry.
    pub last_log_index: u64,
    /// Term of the candidate's last log entry.
    pub last_log_term: u64,
}

/// Response to [`PollRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    /// Voter's term, so the candidate can update itself.
    pub term: u64,
    /// Whether the vote was granted.
    pub vote_granted: bool,
}

/// AppendEntries RPC: log replication and, with empty `entries`, heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendRequest {
    /// Leader's term.
    pub term: u64,
    /// Leader's id, so followers can redirect clients.
    pub leader: MemberId,
    /// Index of the log entry immediately preceding `entries`.
    pub prev_log_index: u64,
    /// Term of the entry at `prev_log_index`.
    pub prev_log_term: u64,
    /// Entries to append (empty for a pure heartbeat).
    pub entries: Vec<LogEntry>,
    /// Leader's commit index.
    pub leader_commit: u64,
}

/// Response to [`AppendRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendResponse {
    /// Responder's term, so the leader can update itself.
    pub term: u64,
    /// Whether the entries were accepted.
    pub succeeded: bool,
    /// A hint for the next index the leader should try (conflict
    /// resolution optimization), set on rejection.
    pub log_index: Option<u64>,
}

/// A read-only query against the resource's state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Requested consistency level.
    pub consistency: Consistency,
    /// Opaque, consumer-interpreted query payload.
    pub payload: Vec<u8>,
}

/// Outcome of a [`QueryRequest`] or [`CommitRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    /// The operation completed and `result` carries the consumer's output.
    Ok,
    /// The node is not the leader and has no leader to forward to.
    NoLeader,
    /// The consumer raised an error while applying the entry.
    Failed,
}

/// Response to [`QueryRequest`] or [`CommitRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    /// Outcome of the operation.
    pub status: OperationStatus,
    /// Opaque, consumer-produced result bytes.
    pub result: Vec<u8>,
}

/// A write submitted by a client, to be appended and replicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Opaque command payload, interpreted by the state-machine consumer.
    pub payload: Vec<u8>,
}

/// Snapshot transfer RPC (`InstallSnapshot`), chunked via `offset`/`done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Index covered by this snapshot.
    pub snapshot_index: u64,
    /// Term of `snapshot_index` at the time of the snapshot.
    pub snapshot_term: u64,
    /// Byte offset of `data` within the overall snapshot blob.
    pub offset: u64,
    /// This chunk's bytes.
    pub data: Vec<u8>,
    /// Whether this is the final chunk.
    pub done: bool,
}

/// Response to [`SyncRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Responder's term.
    pub term: u64,
    /// Whether the chunk was accepted.
    pub succeeded: bool,
}
