//! Per-resource metrics for monitoring and observability.
//!
//! Every resource context exposes atomic counters in a Prometheus
//! text-exposition-compatible format, independent of whatever the
//! consuming application does with commits and queries.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Metrics collection for one [`crate::context::StateContext`].
pub struct ResourceMetrics {
    /// Resource name, used as the `resource` label on every series.
    resource: String,
    /// Total client `Commit` submissions accepted.
    commits_total: AtomicU64,
    /// Submissions that completed successfully.
    commits_success: AtomicU64,
    /// Submissions that failed (consumer error or timeout).
    commits_failed: AtomicU64,
    /// Total elections started (candidacies entered).
    elections_started: AtomicU64,
    /// Total elections won (became leader).
    elections_won: AtomicU64,
    /// Total `Append` RPCs sent as leader.
    appends_sent: AtomicU64,
    /// Total `Append` RPCs rejected by a peer.
    appends_rejected: AtomicU64,
    /// Total votes granted to other candidates.
    votes_granted: AtomicU64,
    /// Current term, mirrored here for scraping without locking state.
    current_term: AtomicU64,
    /// Current `commitIndex`.
    commit_index: AtomicU64,
    /// Current `lastApplied`.
    last_applied: AtomicU64,
    /// 1 if this node currently believes itself leader, else 0.
    is_leader: AtomicU64,
}

impl ResourceMetrics {
    /// Construct a fresh, zeroed metrics set for `resource`.
    #[must_use]
    pub fn new(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        debug!(%resource, "creating resource metrics");
        Self {
            resource,
            commits_total: AtomicU64::new(0),
            commits_success: AtomicU64::new(0),
            commits_failed: AtomicU64::new(0),
            elections_started: AtomicU64::new(0),
            elections_won: AtomicU64::new(0),
            appends_sent: AtomicU64::new(0),
            appends_rejected: AtomicU64::new(0),
            votes_granted: AtomicU64::new(0),
            current_term: AtomicU64::new(0),
            commit_index: AtomicU64::new(0),
            last_applied: AtomicU64::new(0),
            is_leader: AtomicU64::new(0),
        }
    }

    pub fn record_commit_submitted(&self) {
        self.commits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit_outcome(&self, success: bool) {
        if success {
            self.commits_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.commits_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_election_started(&self) {
        self.elections_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_election_won(&self) {
        self.elections_won.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_append_sent(&self) {
        self.appends_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_append_rejected(&self) {
        self.appends_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vote_granted(&self) {
        self.votes_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_term(&self, term: u64) {
        self.current_term.store(term, Ordering::Relaxed);
    }

    pub fn set_progress(&self, commit_index: u64, last_applied: u64) {
        self.commit_index.store(commit_index, Ordering::Relaxed);
        self.last_applied.store(last_applied, Ordering::Relaxed);
    }

    pub fn set_is_leader(&self, is_leader: bool) {
        self.is_leader
            .store(u64::from(is_leader), Ordering::Relaxed);
    }

    /// A point-in-time snapshot of every counter/gauge.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commits_total: self.commits_total.load(Ordering::Relaxed),
            commits_success: self.commits_success.load(Ordering::Relaxed),
            commits_failed: self.commits_failed.load(Ordering::Relaxed),
            elections_started: self.elections_started.load(Ordering::Relaxed),
            elections_won: self.elections_won.load(Ordering::Relaxed),
            appends_sent: self.appends_sent.load(Ordering::Relaxed),
            appends_rejected: self.appends_rejected.load(Ordering::Relaxed),
            votes_granted: self.votes_granted.load(Ordering::Relaxed),
            current_term: self.current_term.load(Ordering::Relaxed),
            commit_index: self.commit_index.load(Ordering::Relaxed),
            last_applied: self.last_applied.load(Ordering::Relaxed),
            is_leader: self.is_leader.load(Ordering::Relaxed) == 1,
        }
    }

    /// Render every series in Prometheus text-exposition format.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let resource = &self.resource;
        format!(
            r#"# HELP raftline_commits_total Client commit submissions accepted
# TYPE raftline_commits_total counter
raftline_commits_total{{resource="{resource}"}} {commits_total}

# HELP raftline_commits_success_total Commits that applied successfully
# TYPE raftline_commits_success_total counter
raftline_commits_success_total{{resource="{resource}"}} {commits_success}

# HELP raftline_commits_failed_total Commits that failed or timed out
# TYPE raftline_commits_failed_total counter
raftline_commits_failed_total{{resource="{resource}"}} {commits_failed}

# HELP raftline_elections_started_total Elections this node entered as candidate
# TYPE raftline_elections_started_total counter
raftline_elections_started_total{{resource="{resource}"}} {elections_started}

# HELP raftline_elections_won_total Elections this node won
# TYPE raftline_elections_won_total counter
raftline_elections_won_total{{resource="{resource}"}} {elections_won}

# HELP raftline_appends_sent_total AppendEntries RPCs sent as leader
# TYPE raftline_appends_sent_total counter
raftline_appends_sent_total{{resource="{resource}"}} {appends_sent}

# HELP raftline_appends_rejected_total AppendEntries RPCs rejected by a peer
# TYPE raftline_appends_rejected_total counter
raftline_appends_rejected_total{{resource="{resource}"}} {appends_rejected}

# HELP raftline_votes_granted_total Votes granted to other candidates
# TYPE raftline_votes_granted_total counter
raftline_votes_granted_total{{resource="{resource}"}} {votes_granted}

# HELP raftline_current_term Current Raft term
# TYPE raftline_current_term gauge
raftline_current_term{{resource="{resource}"}} {current_term}

# HELP raftline_commit_index Highest committed log index
# TYPE raftline_commit_index gauge
raftline_commit_index{{resource="{resource}"}} {commit_index}

# HELP raftline_last_applied Highest log index applied to the state machine
# TYPE raftline_last_applied gauge
raftline_last_applied{{resource="{resource}"}} {last_applied}

# HELP raftline_is_leader Whether this node currently believes itself leader
# TYPE raftline_is_leader gauge
raftline_is_leader{{resource="{resource}"}} {is_leader}
"#,
            commits_total = s.commits_total,
            commits_success = s.commits_success,
            commits_failed = s.commits_failed,
            elections_started = s.elections_started,
            elections_won = s.elections_won,
            appends_sent = s.appends_sent,
            appends_rejected = s.appends_rejected,
            votes_granted = s.votes_granted,
            current_term = s.current_term,
            commit_index = s.commit_index,
            last_applied = s.last_applied,
            is_leader = u64::from(s.is_leader),
        )
    }
}

/// A point-in-time copy of [`ResourceMetrics`], cheap to pass around.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub commits_total: u64,
    pub commits_success: u64,
    pub commits_failed: u64,
    pub elections_started: u64,
    pub elections_won: u64,
    pub appends_sent: u64,
    pub appends_rejected: u64,
    pub votes_granted: u64,
    pub current_term: u64,
    pub commit_index: u64,
    pub last_applied: u64,
    pub is_leader: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let metrics = ResourceMetrics::new("kv");
        metrics.record_commit_submitted();
        metrics.record_commit_outcome(true);
        metrics.record_election_started();
        metrics.record_election_won();
        metrics.set_term(4);
        metrics.set_progress(10, 9);
        metrics.set_is_leader(true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.commits_total, 1);
        assert_eq!(snapshot.commits_success, 1);
        assert_eq!(snapshot.elections_started, 1);
        assert_eq!(snapshot.elections_won, 1);
        assert_eq!(snapshot.current_term, 4);
        assert_eq!(snapshot.commit_index, 10);
        assert_eq!(snapshot.last_applied, 9);
        assert!(snapshot.is_leader);
    }

    #[test]
    fn prometheus_export_includes_resource_label() {
        let metrics = ResourceMetrics::new("kv");
        let text = metrics.to_prometheus();
        assert!(text.contains(r#"resource="kv""#));
        assert!(text.contains("raftline_commits_total"));
    }
}
