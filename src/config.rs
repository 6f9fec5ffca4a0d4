//! Engine configuration and builder.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RaftError;
use crate::member::MemberId;

/// How a compacted log segment's retention is governed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogRetentionPolicy {
    /// Keep every segment; compaction only ever runs on explicit request.
    KeepAll,
    /// Compact once the log exceeds this many entries past the last
    /// snapshot.
    MaxEntries(u64),
}

impl Default for LogRetentionPolicy {
    fn default() -> Self {
        Self::MaxEntries(10_000)
    }
}

/// Durable-log configuration. The log implementation itself is an
/// external collaborator (see [`crate::log::Log`]); these fields are the
/// contract a real implementation is expected to honor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Logical name for the log (used to namespace on-disk files).
    pub log_name: String,
    /// Directory a durable implementation should write under.
    pub log_directory: PathBuf,
    /// Target size, in bytes, of one log segment.
    pub log_segment_size: u64,
    /// When to compact the log.
    pub log_retention_policy: LogRetentionPolicy,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_name: "raftline".into(),
            log_directory: PathBuf::from("./data/raftline"),
            log_segment_size: 64 * 1024 * 1024,
            log_retention_policy: LogRetentionPolicy::default(),
        }
    }
}

/// Top-level engine configuration for one resource (or the coordinator's
/// meta-log).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    /// This node's own address.
    pub local_member_uri: MemberId,
    /// Every `MEMBER`-type member's address, including the local one.
    pub member_uris: Vec<MemberId>,
    /// Base election timeout; the randomized timeout actually armed is
    /// drawn from `[election_timeout, 2 * election_timeout]`.
    pub election_timeout: Duration,
    /// Leader heartbeat interval. Must be strictly less than
    /// `election_timeout`.
    pub heartbeat_interval: Duration,
    /// Durable-log configuration.
    pub log: LogConfig,
    /// URI scheme selecting which [`crate::transport::Transport`]
    /// implementation to use (e.g. `"inproc"`, `"tcp"`).
    pub protocol: String,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            local_member_uri: String::new(),
            member_uris: Vec::new(),
            election_timeout: Duration::from_millis(500),
            heartbeat_interval: Duration::from_millis(250),
            log: LogConfig::default(),
            protocol: "inproc".into(),
        }
    }
}

impl RaftConfig {
    /// Start building a configuration.
    #[must_use]
    pub fn builder() -> RaftConfigBuilder {
        RaftConfigBuilder::default()
    }

    /// Validate cross-field invariants.
    pub fn validate(&self) -> Result<(), RaftError> {
        if self.local_member_uri.is_empty() {
            return Err(RaftError::Config("local_member_uri must be set".into()));
        }
        if !self.member_uris.contains(&self.local_member_uri) {
            return Err(RaftError::Config(
                "member_uris must include local_member_uri".into(),
            ));
        }
        if self.heartbeat_interval >= self.election_timeout {
            return Err(RaftError::Config(
                "heartbeat_interval must be less than election_timeout".into(),
            ));
        }
        Ok(())
    }

    /// The remote `MEMBER` peers, excluding the local node.
    #[must_use]
    pub fn remote_member_uris(&self) -> Vec<MemberId> {
        self.member_uris
            .iter()
            .filter(|m| **m != self.local_member_uri)
            .cloned()
            .collect()
    }
}

/// Builder for [`RaftConfig`].
#[derive(Debug, Default)]
pub struct RaftConfigBuilder {
    config: RaftConfig,
}

impl RaftConfigBuilder {
    /// Set the local member's address.
    #[must_use]
    pub fn local_member_uri(mut self, uri: impl Into<MemberId>) -> Self {
        self.config.local_member_uri = uri.into();
        self
    }

    /// Set the full voting membership (must include the local address).
    #[must_use]
    pub fn member_uris(mut self, uris: Vec<MemberId>) -> Self {
        self.config.member_uris = uris;
        self
    }

    /// Set the base election timeout.
    #[must_use]
    pub fn election_timeout(mut self, timeout: Duration) -> Self {
        self.config.election_timeout = timeout;
        self
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set the durable-log configuration.
    #[must_use]
    pub fn log(mut self, log: LogConfig) -> Self {
        self.config.log = log;
        self
    }

    /// Set the transport URI scheme.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.config.protocol = protocol.into();
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<RaftConfig, RaftError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_valid_default_shaped_config() {
        let config = RaftConfig::builder()
            .local_member_uri("inproc://m0")
            .member_uris(vec!["inproc://m0".into(), "inproc://m1".into()])
            .build()
            .unwrap();
        assert_eq!(config.remote_member_uris(), vec!["inproc://m1".to_string()]);
    }

    #[test]
    fn missing_local_uri_in_members_is_rejected() {
        let result = RaftConfig::builder()
            .local_member_uri("inproc://m0")
            .member_uris(vec!["inproc://m1".into()])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn heartbeat_must_be_shorter_than_election_timeout() {
        let result = RaftConfig::builder()
            .local_member_uri("inproc://m0")
            .member_uris(vec!["inproc://m0".into()])
            .election_timeout(Duration::from_millis(100))
            .heartbeat_interval(Duration::from_millis(200))
            .build();
        assert!(result.is_err());
    }
}
