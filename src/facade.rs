//! `StateLog`: the user-facing command/query/snapshot registry sitting
//! above the core engine.
//!
//! The façade owns no Raft state itself; it wraps a [`StateContext`] and a
//! [`DispatchStateMachine`] that routes applied entries to whichever
//! handler was registered under the entry's command name. Every node is
//! expected to register the same names with equivalent handlers before
//! traffic starts, the same way application code on every node of a real
//! deployment runs identical startup logic.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::context::StateContext;
use crate::error::{RaftError, RaftResult};
use crate::pipeline::StateMachine;
use crate::protocol::{CommitRequest, Consistency, OperationStatus, QueryRequest};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A registered command handler: takes the opaque input bytes, returns the
/// opaque output bytes reported back to the submitter.
pub type CommandFn = Arc<dyn Fn(Vec<u8>) -> BoxFuture<RaftResult<Vec<u8>>> + Send + Sync>;

/// A registered query handler, paired with the consistency level it should
/// be served at.
pub type QueryFn = Arc<dyn Fn(Vec<u8>) -> BoxFuture<RaftResult<Vec<u8>>> + Send + Sync>;

/// Produces an opaque snapshot blob of whatever state the registered
/// commands/queries have been mutating.
pub type SnapshotFn = Arc<dyn Fn() -> BoxFuture<RaftResult<Vec<u8>>> + Send + Sync>;

/// Replaces that state wholesale from a snapshot blob.
pub type InstallFn = Arc<dyn Fn(Vec<u8>) -> BoxFuture<RaftResult<()>> + Send + Sync>;

#[derive(Serialize, Deserialize)]
struct Envelope {
    name: String,
    input: Vec<u8>,
}

/// Shared command/query/snapshot registration table backing a
/// [`StateLog`] and its [`DispatchStateMachine`]. Opaque: construct one via
/// [`StateLog::state_machine`], never directly.
#[derive(Default)]
pub struct Registry {
    commands: RwLock<HashMap<String, CommandFn>>,
    queries: RwLock<HashMap<String, (QueryFn, Consistency)>>,
    snapshot_fn: RwLock<Option<SnapshotFn>>,
    install_fn: RwLock<Option<InstallFn>>,
}

/// The [`StateMachine`] consumer backing a [`StateLog`]: dispatches by the
/// command name carried in each entry's payload.
pub struct DispatchStateMachine {
    registry: Arc<Registry>,
}

#[async_trait]
impl StateMachine for DispatchStateMachine {
    async fn apply(&self, index: u64, payload: &[u8]) -> RaftResult<Vec<u8>> {
        let envelope: Envelope = bincode::deserialize(payload)?;
        let handler = self
            .registry
            .commands
            .read()
            .await
            .get(&envelope.name)
            .cloned();
        match handler {
            Some(f) => f(envelope.input).await,
            None => Err(RaftError::Commit {
                index,
                message: format!("no command registered under '{}'", envelope.name),
            }),
        }
    }

    async fn query(&self, payload: &[u8]) -> RaftResult<Vec<u8>> {
        let envelope: Envelope = bincode::deserialize(payload)?;
        let handler = self
            .registry
            .queries
            .read()
            .await
            .get(&envelope.name)
            .map(|(f, _)| f.clone());
        match handler {
            Some(f) => f(envelope.input).await,
            None => Err(RaftError::Commit {
                index: 0,
                message: format!("no query registered under '{}'", envelope.name),
            }),
        }
    }

    async fn snapshot(&self, _index: u64) -> RaftResult<Vec<u8>> {
        match self.registry.snapshot_fn.read().await.clone() {
            Some(f) => f().await,
            None => Ok(Vec::new()),
        }
    }

    async fn install_snapshot(&self, _index: u64, blob: &[u8]) -> RaftResult<()> {
        match self.registry.install_fn.read().await.clone() {
            Some(f) => f(blob.to_vec()).await,
            None => Ok(()),
        }
    }
}

/// User-facing registry of commands, queries, and snapshot hooks for one
/// replicated resource, above a [`StateContext`].
pub struct StateLog {
    context: Arc<StateContext>,
    registry: Arc<Registry>,
}

impl StateLog {
    /// Construct a façade over `context` with the [`DispatchStateMachine`]
    /// it was created with — callers build the `StateContext` with
    /// [`StateLog::state_machine`] as its consumer, then wrap it here.
    #[must_use]
    pub fn new(context: Arc<StateContext>, registry: Arc<Registry>) -> Self {
        Self { context, registry }
    }

    /// Build a fresh, empty [`DispatchStateMachine`] and the registry it
    /// shares with the [`StateLog`] that will be built over the same
    /// `StateContext`. Call once per resource, feed the returned machine
    /// into [`StateContext::new`], then build the façade with
    /// [`StateLog::new`] using the same registry.
    #[must_use]
    pub fn state_machine() -> (Arc<DispatchStateMachine>, Arc<Registry>) {
        let registry = Arc::new(Registry::default());
        (
            Arc::new(DispatchStateMachine {
                registry: Arc::clone(&registry),
            }),
            registry,
        )
    }

    /// Register a command handler under `name`, replacing any prior
    /// registration.
    pub async fn register_command(&self, name: impl Into<String>, handler: CommandFn) {
        self.registry
            .commands
            .write()
            .await
            .insert(name.into(), handler);
    }

    /// Register a query handler under `name` at the given consistency
    /// level, replacing any prior registration.
    pub async fn register_query(
        &self,
        name: impl Into<String>,
        handler: QueryFn,
        consistency: Consistency,
    ) {
        self.registry
            .queries
            .write()
            .await
            .insert(name.into(), (handler, consistency));
    }

    /// Remove a command or query registration by name.
    pub async fn unregister(&self, name: &str) {
        self.registry.commands.write().await.remove(name);
        self.registry.queries.write().await.remove(name);
    }

    /// Register the function used to produce a snapshot blob whenever this
    /// resource's log is compacted.
    pub async fn take_snapshot_with(&self, f: SnapshotFn) {
        *self.registry.snapshot_fn.write().await = Some(f);
    }

    /// Register the function used to replace local state from an installed
    /// snapshot blob.
    pub async fn install_snapshot_with(&self, f: InstallFn) {
        *self.registry.install_fn.write().await = Some(f);
    }

    /// Serialize `(name, input)`, submit it as a `Commit`, and return the
    /// consumer's output bytes once the entry has committed and applied.
    pub async fn submit(&self, name: impl Into<String>, input: Vec<u8>) -> RaftResult<Vec<u8>> {
        let envelope = Envelope {
            name: name.into(),
            input,
        };
        let payload = bincode::serialize(&envelope)?;
        let response = self.context.commit(CommitRequest { payload }).await?;
        match response.status {
            OperationStatus::Ok => Ok(response.result),
            OperationStatus::NoLeader => {
                Err(RaftError::Cluster(crate::error::ClusterFailure::NoLeader))
            }
            OperationStatus::Failed => Err(RaftError::Commit {
                index: 0,
                message: "command handler rejected the submission".into(),
            }),
        }
    }

    /// Issue a query under `name` at the registered consistency level.
    pub async fn query(&self, name: &str, input: Vec<u8>) -> RaftResult<Vec<u8>> {
        let consistency = self
            .registry
            .queries
            .read()
            .await
            .get(name)
            .map(|(_, c)| *c)
            .unwrap_or_default();
        let payload = bincode::serialize(&Envelope {
            name: name.to_string(),
            input,
        })?;
        let response = self
            .context
            .query(QueryRequest {
                consistency,
                payload,
            })
            .await?;
        match response.status {
            OperationStatus::Ok => Ok(response.result),
            OperationStatus::NoLeader => {
                Err(RaftError::Cluster(crate::error::ClusterFailure::NoLeader))
            }
            OperationStatus::Failed => Err(RaftError::Commit {
                index: 0,
                message: "query handler rejected the request".into(),
            }),
        }
    }

    /// The underlying `StateContext`, for callers that need lifecycle
    /// control (`open`/`close`) or diagnostics.
    #[must_use]
    pub fn context(&self) -> &Arc<StateContext> {
        &self.context
    }
}
