//! Persistent/volatile Raft state, plus the fencing and lease primitives
//! used to serve bounded-staleness reads without a full heartbeat round.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::member::MemberId;

/// State that must survive a restart: term, vote, and (conceptually) the
/// log. The log itself is held separately behind the [`crate::log::Log`]
/// trait; this struct carries only the scalar persistent fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistentState {
    /// Current term. Never decreases; adopting a higher term clears
    /// `voted_for`.
    pub current_term: u64,
    /// Who this node voted for in `current_term`, if anyone.
    pub voted_for: Option<MemberId>,
}

/// Volatile state present on every node, reset on restart.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolatileState {
    /// Highest log index known to be replicated on a majority.
    pub commit_index: u64,
    /// Highest log index delivered to the state-machine consumer.
    pub last_applied: u64,
}

/// Per-peer volatile state a leader tracks for replication progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerProgress {
    /// Next log index to send to this peer.
    pub next_index: u64,
    /// Highest log index known to be replicated on this peer.
    pub match_index: u64,
}

/// A monotonically comparable proof of leadership, minted fresh every time
/// a node becomes leader. Lets a consumer reject a write arriving from a
/// leader that has since been superseded, even if the network has not yet
/// delivered the higher-term message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FencingToken {
    term: u64,
    counter: u64,
}

impl FencingToken {
    /// Mint a token for the given term and counter (the counter
    /// disambiguates tokens minted within the same term, e.g. across
    /// successive leadership claims observed out of order).
    #[must_use]
    pub fn new(term: u64, counter: u64) -> Self {
        Self { term, counter }
    }

    /// The term this token was minted in.
    #[must_use]
    pub fn term(&self) -> u64 {
        self.term
    }

    /// Whether `self` strictly supersedes `other`.
    #[must_use]
    pub fn is_newer_than(&self, other: &FencingToken) -> bool {
        self > other
    }

    /// Whether this token is still valid against `current_term`: a token
    /// is valid only for the term it was minted in.
    #[must_use]
    pub fn is_valid(&self, current_term: u64) -> bool {
        self.term == current_term
    }
}

/// A time-bounded assertion of continued leadership, renewed on every
/// successful heartbeat majority. Lets `LEASE`-consistency queries be
/// served from local state without a heartbeat round-trip, as long as the
/// lease has not expired.
#[derive(Debug, Clone)]
pub struct LeaderLease {
    duration: Duration,
    renewed_at: Option<Instant>,
}

impl LeaderLease {
    /// Construct a lease with the given validity duration, not yet
    /// granted.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            renewed_at: None,
        }
    }

    /// Renew the lease as of now (call after each successful heartbeat
    /// majority).
    pub fn renew(&mut self) {
        self.renewed_at = Some(Instant::now());
    }

    /// Invalidate the lease immediately (call on step-down).
    pub fn clear(&mut self) {
        self.renewed_at = None;
    }

    /// Whether the lease is currently valid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.renewed_at
            .is_some_and(|at| at.elapsed() < self.duration)
    }
}

/// Whether the local node currently sees a majority of its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuorumStatus {
    /// A majority of `MEMBER`-type members (including self) are reachable.
    HasQuorum,
    /// Fewer than a majority are reachable; writes and `STRONG` reads must
    /// be refused.
    NoQuorum,
}

impl QuorumStatus {
    /// Derive quorum status from a live count and the total voter count.
    #[must_use]
    pub fn from_counts(reachable_including_self: usize, total_voters: usize) -> Self {
        if reachable_including_self * 2 > total_voters {
            Self::HasQuorum
        } else {
            Self::NoQuorum
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fencing_token_orders_by_term_then_counter() {
        let t1 = FencingToken::new(1, 0);
        let t2 = FencingToken::new(1, 1);
        let t3 = FencingToken::new(2, 0);
        assert!(t2.is_newer_than(&t1));
        assert!(t3.is_newer_than(&t2));
        assert!(!t1.is_newer_than(&t2));
    }

    #[test]
    fn fencing_token_valid_only_for_its_own_term() {
        let token = FencingToken::new(5, 0);
        assert!(token.is_valid(5));
        assert!(!token.is_valid(6));
    }

    #[test]
    fn leader_lease_expires_after_duration() {
        let mut lease = LeaderLease::new(Duration::from_millis(20));
        assert!(!lease.is_valid());
        lease.renew();
        assert!(lease.is_valid());
        std::thread::sleep(Duration::from_millis(30));
        assert!(!lease.is_valid());
    }

    #[test]
    fn quorum_status_reflects_strict_majority() {
        assert_eq!(QuorumStatus::from_counts(3, 5), QuorumStatus::HasQuorum);
        assert_eq!(QuorumStatus::from_counts(2, 5), QuorumStatus::NoQuorum);
        assert_eq!(QuorumStatus::from_counts(1, 1), QuorumStatus::HasQuorum);
    }
}
