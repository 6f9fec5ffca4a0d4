//! Crate-wide error types and result definitions.

use thiserror::Error;

/// Result type for all Raftline operations.
pub type RaftResult<T> = Result<T, RaftError>;

/// Top-level error type covering every failure kind the engine can surface.
#[derive(Error, Debug)]
pub enum RaftError {
    /// Malformed or incompatible wire framing / member URI.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Cluster-level failure: no known leader, or a peer is unreachable.
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterFailure),

    /// The state-machine consumer raised an error while applying an entry.
    /// Fatal to the submission that produced the entry; the resource's
    /// state is otherwise intact and `lastApplied` still advances.
    #[error("commit error applying index {index}: {message}")]
    Commit {
        /// Log index that failed to apply.
        index: u64,
        /// Message produced by the consumer.
        message: String,
    },

    /// Durable log I/O failed. Fatal to the owning resource context; the
    /// context transitions to `Start` and all pending futures fail.
    #[error("log error: {0}")]
    Log(String),

    /// An invariant was violated: decreasing commit/apply index, double
    /// vote in a term, or operating on a closed context.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The client's submission deadline elapsed before the entry committed
    /// and applied.
    #[error("operation timed out")]
    Timeout,

    /// Configuration failed validation.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Cluster-level failures, nested under [`RaftError::Cluster`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterFailure {
    /// No leader is currently known for this resource.
    #[error("no leader known")]
    NoLeader,

    /// A named peer could not be reached.
    #[error("peer {0} unreachable")]
    Unreachable(String),

    /// A resource with the given name already exists.
    #[error("resource '{0}' already exists")]
    ResourceExists(String),

    /// No resource with the given name is registered.
    #[error("resource '{0}' not found")]
    ResourceNotFound(String),

    /// Quorum could not be reached among MEMBER-type members.
    #[error("quorum not reached: need {needed}, have {have}")]
    QuorumNotReached {
        /// Votes/acks required for a strict majority.
        needed: usize,
        /// Votes/acks actually observed.
        have: usize,
    },
}

impl From<bincode::Error> for RaftError {
    fn from(err: bincode::Error) -> Self {
        Self::Protocol(format!("serialization error: {err}"))
    }
}

impl From<serde_json::Error> for RaftError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("serialization error: {err}"))
    }
}

impl From<std::io::Error> for RaftError {
    fn from(err: std::io::Error) -> Self {
        Self::Log(err.to_string())
    }
}
