//! The tagged-variant role state machine: `Start`, `Follower`, `Candidate`,
//! `Leader`. Each variant carries its own local fields; [`crate::context`]
//! holds a single [`RoleState`] and dispatches every inbound protocol
//! message through one routing function that matches on the current
//! variant, rather than swapping per-role handler objects in and out.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::member::MemberId;
use crate::state::{FencingToken, LeaderLease, PeerProgress};

/// Follower-local fields: just the next election deadline.
#[derive(Debug, Clone)]
pub struct FollowerState {
    /// When, absent a reset, this node becomes a candidate.
    pub election_deadline: Instant,
}

/// Candidate-local fields: the votes collected so far in this election and
/// its own deadline (a fresh candidacy starts if this elapses without a
/// majority).
#[derive(Debug, Clone)]
pub struct CandidateState {
    /// Members (including self) that have granted a vote this term.
    pub votes: HashSet<MemberId>,
    /// When this candidacy gives up and a new one begins.
    pub election_deadline: Instant,
}

impl CandidateState {
    /// Start a fresh candidacy, having already voted for self.
    #[must_use]
    pub fn new(local: MemberId, election_deadline: Instant) -> Self {
        let mut votes = HashSet::new();
        votes.insert(local);
        Self {
            votes,
            election_deadline,
        }
    }
}

/// Leader-local fields: per-peer replication progress and the lease used to
/// serve `LEASE`-consistency reads.
#[derive(Debug, Clone)]
pub struct LeaderState {
    /// `nextIndex`/`matchIndex` per peer, tracking replication progress.
    pub peers: HashMap<MemberId, PeerProgress>,
    /// Renewed on every successful heartbeat majority.
    pub lease: LeaderLease,
    /// When the next heartbeat round is due.
    pub next_heartbeat: Instant,
    /// Minted once on election, stamped onto every write this leadership
    /// stint accepts so a deposed-then-reinstated node can't have its stale
    /// in-flight writes mistaken for current ones.
    pub fencing_token: FencingToken,
}

impl LeaderState {
    /// Initialize peer progress for a freshly elected leader: `nextIndex =
    /// lastIndex + 1`, `matchIndex = 0` for every voting peer. `epoch` is a
    /// process-lifetime counter of leadership stints, used alongside the
    /// term to build this stint's `fencing_token`.
    #[must_use]
    pub fn new(
        peer_ids: &[MemberId],
        last_index: u64,
        lease_duration: Duration,
        term: u64,
        epoch: u64,
    ) -> Self {
        let peers = peer_ids
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    PeerProgress {
                        next_index: last_index + 1,
                        match_index: 0,
                    },
                )
            })
            .collect();
        Self {
            peers,
            lease: LeaderLease::new(lease_duration),
            next_heartbeat: Instant::now(),
            fencing_token: FencingToken::new(term, epoch),
        }
    }
}

/// The current role of one resource's execution context.
#[derive(Debug, Clone)]
pub enum RoleState {
    /// Closed; not participating in the protocol.
    Start,
    /// Passive, following a known or unknown leader.
    Follower(FollowerState),
    /// Campaigning for leadership in the current term.
    Candidate(CandidateState),
    /// Actively replicating and serving client submissions.
    Leader(LeaderState),
}

impl RoleState {
    /// A human-readable tag, used in tracing spans/events.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Follower(_) => "follower",
            Self::Candidate(_) => "candidate",
            Self::Leader(_) => "leader",
        }
    }

    /// Whether this context currently believes it is the leader.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader(_))
    }
}
