//! Cluster membership: member identity, type, and liveness state.

use serde::{Deserialize, Serialize};

/// Opaque identifier for a cluster member: a transport-addressable URI
/// (e.g. `tcp://host:port` or `inproc://name`). The scheme selects the
/// [`crate::transport::Transport`] implementation that can reach it.
pub type MemberId = String;

/// Whether a member participates in quorum and elections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberType {
    /// Votes, counts toward quorum, receives replicated entries.
    Member,
    /// Receives replicated state but never votes and never counts toward
    /// quorum. The only form of membership change this engine supports.
    Listener,
}

/// Observed liveness of a member, as tracked by the owning resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberState {
    /// Recently responsive.
    Alive,
    /// Missed one or more heartbeats but not yet given up on.
    Suspicious,
    /// Considered unreachable.
    Dead,
}

/// A single member of the cluster as known to a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    /// The member's address.
    pub id: MemberId,
    /// Whether this member votes and counts toward quorum.
    pub member_type: MemberType,
    /// Last observed liveness.
    pub state: MemberState,
}

impl Member {
    /// Construct a new, presumed-alive `MEMBER`-type member.
    #[must_use]
    pub fn voting(id: impl Into<MemberId>) -> Self {
        Self {
            id: id.into(),
            member_type: MemberType::Member,
            state: MemberState::Alive,
        }
    }

    /// Construct a new, presumed-alive `LISTENER`-type member.
    #[must_use]
    pub fn listener(id: impl Into<MemberId>) -> Self {
        Self {
            id: id.into(),
            member_type: MemberType::Listener,
            state: MemberState::Alive,
        }
    }

    /// Whether this member votes and counts toward quorum.
    #[must_use]
    pub fn votes(&self) -> bool {
        self.member_type == MemberType::Member
    }
}

/// Whether a leader is known for the current term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionStatus {
    /// A leader is known for the current term.
    Complete,
    /// No leader is known yet for the current term.
    InProgress,
}

/// The local identity plus the set of other known members of a resource.
#[derive(Debug, Clone)]
pub struct Membership {
    /// This node's own address.
    pub local_member: MemberId,
    /// Every other known member (voting and non-voting).
    pub remote_members: Vec<Member>,
}

impl Membership {
    /// Construct a membership set from a local id and the remote peers.
    #[must_use]
    pub fn new(local_member: MemberId, remote_members: Vec<Member>) -> Self {
        Self {
            local_member,
            remote_members,
        }
    }

    /// Every voting peer's id, excluding the local member.
    #[must_use]
    pub fn voting_peer_ids(&self) -> Vec<MemberId> {
        self.remote_members
            .iter()
            .filter(|m| m.votes())
            .map(|m| m.id.clone())
            .collect()
    }

    /// Total number of `MEMBER`-type members, including the local node.
    #[must_use]
    pub fn voter_count(&self) -> usize {
        1 + self.remote_members.iter().filter(|m| m.votes()).count()
    }

    /// The number of affirmative votes/acks needed for a strict majority.
    #[must_use]
    pub fn quorum_size(&self) -> usize {
        self.voter_count() / 2 + 1
    }
}
