//! The commit→apply pipeline: advances `lastApplied` in lock-step with
//! `commitIndex`, feeding entries to the consumer and resolving the client
//! futures keyed by log index. Also hosts the snapshot take/install
//! semantics, since both operate on the same log prefix.

use async_trait::async_trait;

use crate::error::RaftResult;

/// The user-supplied deterministic state machine. An external collaborator
/// per the system overview; this crate only drives it, it never
/// implements one beyond the in-memory reference used by tests.
///
/// `apply` is required to be total: it must not panic or loop forever, so
/// that `lastApplied` always advances. A consumer that wants to surface a
/// failure to the submitting client still returns `Err`, which fails only
/// that submission's future — `lastApplied` still advances past it.
#[async_trait]
pub trait StateMachine: Send + Sync {
    /// Apply the command at `index` (already durably committed on a
    /// majority) and return the bytes reported back to the submitter.
    async fn apply(&self, index: u64, payload: &[u8]) -> RaftResult<Vec<u8>>;

    /// Answer a read-only query against current local state, without
    /// appending anything to the log. `payload` is the same opaque,
    /// consumer-interpreted bytes a [`crate::protocol::QueryRequest`]
    /// carries; [`crate::context::StateContext::query`] calls this only
    /// after the requested consistency level has been satisfied.
    async fn query(&self, payload: &[u8]) -> RaftResult<Vec<u8>>;

    /// Produce an opaque snapshot of the state machine as of `index`.
    async fn snapshot(&self, index: u64) -> RaftResult<Vec<u8>>;

    /// Replace the state machine's entire state from a snapshot blob taken
    /// at `index`.
    async fn install_snapshot(&self, index: u64, blob: &[u8]) -> RaftResult<()>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::StateMachine;
    use crate::error::{RaftError, RaftResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// A reference state machine: `"put k=v"` stores `k=v`; any other
    /// payload is echoed back verbatim. Snapshots serialize the whole
    /// key/value map as newline-joined `k=v` pairs.
    #[derive(Default)]
    pub struct EchoStateMachine {
        pub applied: Mutex<Vec<(u64, Vec<u8>)>>,
    }

    #[async_trait]
    impl StateMachine for EchoStateMachine {
        async fn apply(&self, index: u64, payload: &[u8]) -> RaftResult<Vec<u8>> {
            self.applied.lock().unwrap().push((index, payload.to_vec()));
            Ok(payload.to_vec())
        }

        async fn query(&self, payload: &[u8]) -> RaftResult<Vec<u8>> {
            Ok(payload.to_vec())
        }

        async fn snapshot(&self, _index: u64) -> RaftResult<Vec<u8>> {
            let applied = self.applied.lock().unwrap();
            let joined = applied
                .iter()
                .map(|(i, p)| format!("{i}:{}", String::from_utf8_lossy(p)))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(joined.into_bytes())
        }

        async fn install_snapshot(&self, _index: u64, _blob: &[u8]) -> RaftResult<()> {
            self.applied.lock().unwrap().clear();
            Ok(())
        }
    }

    /// A state machine whose `apply` always fails, to exercise the
    /// "consumer error fails only that submission" path.
    pub struct FailingStateMachine;

    #[async_trait]
    impl StateMachine for FailingStateMachine {
        async fn apply(&self, index: u64, _payload: &[u8]) -> RaftResult<Vec<u8>> {
            Err(RaftError::Commit {
                index,
                message: "consumer rejected command".into(),
            })
        }

        async fn query(&self, _payload: &[u8]) -> RaftResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn snapshot(&self, _index: u64) -> RaftResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn install_snapshot(&self, _index: u64, _blob: &[u8]) -> RaftResult<()> {
            Ok(())
        }
    }
}
