//! # Raftline
//!
//! A replicated state-machine engine built on the Raft consensus
//! algorithm: leader election, log replication, and a commit/apply
//! pipeline that every node runs identically.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Raftline Node                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │   StateLog (commands/queries) ──► StateContext ──► Log      │
//! │                                        │                    │
//! │                                    RoleState                │
//! │                               (Follower/Candidate/Leader)    │
//! │                                        │                    │
//! │                                    Transport                │
//! │                            (ping/poll/append/query/...)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core components
//!
//! - [`context`] — `StateContext`, the engine: persistent/volatile state,
//!   role transitions, replication, and the commit/apply pipeline.
//! - [`role`] — the follower/candidate/leader state machine.
//! - [`log`] — the `Log` collaborator trait and an in-memory reference
//!   implementation.
//! - [`transport`] — the `Transport` collaborator trait, wire frames, and
//!   an in-process reference implementation for tests.
//! - [`pipeline`] — the `StateMachine` consumer trait applied entries are
//!   handed to.
//! - [`protocol`] — the wire request/response types for each RPC.
//! - [`router`] — wires a `StateContext`'s RPCs to topics on a transport.
//! - [`facade`] — `StateLog`, a user-facing command/query/snapshot
//!   registry built over a `StateContext`.
//! - [`cluster_coordinator`] — `ClusterCoordinator`, multi-resource
//!   hosting with a meta-log that agrees on resource create/delete.
//! - [`member`], [`state`], [`config`], [`error`], [`metrics`] — the
//!   supporting data model, configuration, error, and observability types.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use raftline::config::RaftConfig;
//! use raftline::context::StateContext;
//! use raftline::facade::StateLog;
//! use raftline::log::InMemoryLog;
//! use raftline::member::Membership;
//! use raftline::transport::InProcessNetwork;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = InProcessNetwork::new();
//!     let transport = Arc::new(network.transport("inproc://m0"));
//!     transport.listen().await?;
//!
//!     let config = RaftConfig::builder()
//!         .local_member_uri("inproc://m0")
//!         .member_uris(vec!["inproc://m0".into()])
//!         .build()?;
//!
//!     let (machine, registry) = StateLog::state_machine();
//!     let context = StateContext::new(
//!         "kv",
//!         "inproc://m0".into(),
//!         1,
//!         Membership::new("inproc://m0".into(), vec![]),
//!         config,
//!         Arc::new(InMemoryLog::new()),
//!         transport,
//!         machine,
//!     );
//!     context.open().await?;
//!
//!     let log = StateLog::new(context, registry);
//!     log.register_command("set", Arc::new(|input| Box::pin(async move { Ok(input) })))
//!         .await;
//!
//!     Ok(())
//! }
//! ```

pub mod cluster_coordinator;
pub mod config;
pub mod context;
pub mod error;
pub mod facade;
pub mod log;
pub mod member;
pub mod metrics;
pub mod pipeline;
pub mod protocol;
pub mod role;
pub mod router;
pub mod state;
pub mod transport;

pub use cluster_coordinator::ClusterCoordinator;
pub use config::RaftConfig;
pub use context::StateContext;
pub use error::{RaftError, RaftResult};
pub use facade::StateLog;
pub use member::{Member, MemberId, Membership};
