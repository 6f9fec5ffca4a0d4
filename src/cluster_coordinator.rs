//! `ClusterCoordinator`: hosts one transport server, a registry of named
//! resources, and an internal Raft instance over a meta-log that agrees on
//! resource create/delete.
//!
//! The meta-log only carries bookkeeping (a resource's name and
//! membership); the state-machine consumer each named resource runs is
//! supplied locally by a [`ResourceFactory`] registered under that name on
//! every node before the cluster starts taking traffic, the same way every
//! node of a real deployment runs identical application startup code. The
//! meta-log cannot itself transport a closure, so "all nodes converge via
//! log replay" means every node independently builds the same resource
//! from the same locally-known factory once the meta-log agrees it should
//! exist.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::RaftConfig;
use crate::context::StateContext;
use crate::error::{ClusterFailure, RaftError, RaftResult};
use crate::log::{InMemoryLog, Log};
use crate::member::{Member, MemberId, MemberType, Membership};
use crate::pipeline::StateMachine;
use crate::protocol::{CommitRequest, OperationStatus};
use crate::router::Router;
use crate::transport::Transport;

/// A meta-log entry: create or delete a named resource.
///
/// Wire shape is `{kind, name, memberSet, logCfg}`; bincode's
/// length-prefixed encoding of `String`/`Vec<Member>`/`LogConfig` already
/// produces that framing, so the payload is this enum serialized directly
/// rather than hand-rolled length prefixes.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum MetaCommand {
    Create {
        name: String,
        members: Vec<Member>,
        log: crate::config::LogConfig,
    },
    Delete {
        name: String,
    },
}

/// Builds the [`StateMachine`] consumer for a named resource. Registered
/// locally on every node via [`ClusterCoordinator::register_factory`]
/// before `create_resource` is ever submitted for that name.
pub trait ResourceFactory: Send + Sync {
    /// Construct a fresh consumer for a resource being created or rejoined.
    fn build(&self) -> Arc<dyn StateMachine>;
}

impl<F> ResourceFactory for F
where
    F: Fn() -> Arc<dyn StateMachine> + Send + Sync,
{
    fn build(&self) -> Arc<dyn StateMachine> {
        (self)()
    }
}

struct ResourceEntry {
    context: Arc<StateContext>,
    router: Router,
}

struct Registry {
    local_id: MemberId,
    transport: Arc<dyn Transport>,
    next_addr: AtomicU32,
    resources: RwLock<HashMap<String, Arc<ResourceEntry>>>,
    factories: RwLock<HashMap<String, Arc<dyn ResourceFactory>>>,
    connected_listeners: RwLock<HashMap<String, Vec<MemberId>>>,
}

struct MetaStateMachine {
    registry: Arc<Registry>,
}

#[async_trait]
impl StateMachine for MetaStateMachine {
    async fn apply(&self, _index: u64, payload: &[u8]) -> RaftResult<Vec<u8>> {
        let cmd: MetaCommand = bincode::deserialize(payload)?;
        match cmd {
            MetaCommand::Create { name, members, log } => {
                let created = self.registry.create_local(&name, members, log).await?;
                Ok(vec![u8::from(created)])
            }
            MetaCommand::Delete { name } => {
                let removed = self.registry.delete_local(&name).await;
                Ok(vec![u8::from(removed)])
            }
        }
    }

    async fn query(&self, _payload: &[u8]) -> RaftResult<Vec<u8>> {
        let resources = self.registry.resources.read().await;
        Ok(resources.keys().cloned().collect::<Vec<_>>().join(",").into_bytes())
    }

    async fn snapshot(&self, _index: u64) -> RaftResult<Vec<u8>> {
        let resources = self.registry.resources.read().await;
        Ok(resources.keys().cloned().collect::<Vec<_>>().join(",").into_bytes())
    }

    async fn install_snapshot(&self, _index: u64, _blob: &[u8]) -> RaftResult<()> {
        // The meta-log's own snapshot only carries resource names; a real
        // re-join replays Create entries afterward to rebuild membership.
        Ok(())
    }
}

impl Registry {
    async fn create_local(
        &self,
        name: &str,
        members: Vec<Member>,
        log_config: crate::config::LogConfig,
    ) -> RaftResult<bool> {
        if self.resources.read().await.contains_key(name) {
            return Ok(false);
        }
        let Some(factory) = self.factories.read().await.get(name).cloned() else {
            warn!(name, "create applied with no local factory registered; deferring");
            return Ok(false);
        };

        let addr = self.next_addr.fetch_add(1, Ordering::Relaxed);
        let membership = Membership::new(self.local_id.clone(), members.clone());
        let config = RaftConfig {
            local_member_uri: self.local_id.clone(),
            member_uris: std::iter::once(self.local_id.clone())
                .chain(members.iter().filter(|m| m.votes()).map(|m| m.id.clone()))
                .collect(),
            log: log_config,
            ..RaftConfig::default()
        };
        let log: Arc<dyn Log> = Arc::new(InMemoryLog::new());
        let machine = factory.build();
        let context = StateContext::new(
            name.to_string(),
            self.local_id.clone(),
            addr,
            membership,
            config,
            log,
            Arc::clone(&self.transport),
            machine,
        );
        context.open().await?;
        let router = Router::install(Arc::clone(&self.transport), addr, Arc::clone(&context)).await;

        self.connect_listeners(name, &members).await;
        self.resources
            .write()
            .await
            .insert(name.to_string(), Arc::new(ResourceEntry { context, router }));
        info!(name, "resource created");
        Ok(true)
    }

    async fn delete_local(&self, name: &str) -> bool {
        let Some(entry) = self.resources.write().await.remove(name) else {
            return false;
        };
        entry.router.destroy().await;
        let _ = entry.context.close().await;
        self.connected_listeners.write().await.remove(name);
        info!(name, "resource deleted");
        true
    }

    /// Lazily track which `LISTENER` members a resource has "connected"
    /// to. The in-process reference transport has no persistent connection
    /// state to open/close, so this only records the policy decision; a
    /// socket-based transport would open a connection here and close it in
    /// [`Registry::delete_local`].
    async fn connect_listeners(&self, name: &str, members: &[Member]) {
        let listeners: Vec<MemberId> = members
            .iter()
            .filter(|m| m.member_type == MemberType::Listener)
            .map(|m| m.id.clone())
            .collect();
        if !listeners.is_empty() {
            self.connected_listeners
                .write()
                .await
                .insert(name.to_string(), listeners);
        }
    }
}

/// Hosts one transport server, a registry of named resources, and the
/// meta-log that agrees on their creation/deletion.
pub struct ClusterCoordinator {
    registry: Arc<Registry>,
    meta: Arc<StateContext>,
    meta_router: Router,
    submission_timeout: Duration,
}

impl ClusterCoordinator {
    /// Open a coordinator for `local_id`, hosting resources over
    /// `transport` and agreeing on resource membership with `meta_peers`
    /// (the other coordinators' addresses) via the meta-log.
    pub async fn open(
        local_id: MemberId,
        transport: Arc<dyn Transport>,
        meta_peers: Vec<MemberId>,
        submission_timeout: Duration,
    ) -> RaftResult<Self> {
        transport.listen().await?;
        let registry = Arc::new(Registry {
            local_id: local_id.clone(),
            transport: Arc::clone(&transport),
            next_addr: AtomicU32::new(1),
            resources: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
            connected_listeners: RwLock::new(HashMap::new()),
        });

        let meta_machine = Arc::new(MetaStateMachine {
            registry: Arc::clone(&registry),
        });
        let member_uris = std::iter::once(local_id.clone())
            .chain(meta_peers.iter().cloned())
            .collect::<Vec<_>>();
        let meta_config = RaftConfig::builder()
            .local_member_uri(local_id.clone())
            .member_uris(member_uris)
            .build()?;
        let meta_membership = Membership::new(
            local_id.clone(),
            meta_peers.into_iter().map(Member::voting).collect(),
        );
        let meta = StateContext::new(
            "__meta__".to_string(),
            local_id,
            0,
            meta_membership,
            meta_config,
            Arc::new(InMemoryLog::new()),
            Arc::clone(&transport),
            meta_machine,
        );
        meta.open().await?;
        let meta_router = Router::install(transport, 0, Arc::clone(&meta)).await;

        Ok(Self {
            registry,
            meta,
            meta_router,
            submission_timeout,
        })
    }

    /// Register the factory used to build a resource's consumer when the
    /// meta-log agrees it should be created under `name`. Must be called
    /// identically on every node before [`ClusterCoordinator::create_resource`]
    /// is submitted for that name.
    pub async fn register_factory(&self, name: impl Into<String>, factory: Arc<dyn ResourceFactory>) {
        self.registry.factories.write().await.insert(name.into(), factory);
    }

    /// Submit a `Create` entry to the meta-log; once committed and
    /// applied, every node (including this one) instantiates the named
    /// resource from its locally registered factory. Fails with
    /// `ClusterError{NoLeader}` if the meta-log has no leader by the
    /// configured submission timeout.
    pub async fn create_resource(
        &self,
        name: impl Into<String>,
        members: Vec<Member>,
        log_config: crate::config::LogConfig,
    ) -> RaftResult<bool> {
        let name = name.into();
        let cmd = MetaCommand::Create {
            name,
            members,
            log: log_config,
        };
        let created = self.submit_meta(cmd).await?;
        Ok(created[0] == 1)
    }

    /// Submit a `Delete` entry to the meta-log for `name`.
    pub async fn delete_resource(&self, name: impl Into<String>) -> RaftResult<bool> {
        let cmd = MetaCommand::Delete { name: name.into() };
        let removed = self.submit_meta(cmd).await?;
        Ok(removed[0] == 1)
    }

    /// Submit `cmd` to the meta-log, retrying while no leader is known
    /// until `submission_timeout` elapses. A leaderless meta-log fails
    /// with `ClusterError{NoLeader}` rather than hanging forever.
    async fn submit_meta(&self, cmd: MetaCommand) -> RaftResult<Vec<u8>> {
        let payload = bincode::serialize(&cmd)?;
        let deadline = Instant::now() + self.submission_timeout;
        loop {
            let result = self
                .meta
                .commit(CommitRequest {
                    payload: payload.clone(),
                })
                .await;
            match result {
                Ok(resp) if resp.status == OperationStatus::Ok => return Ok(resp.result),
                Ok(resp) if resp.status == OperationStatus::NoLeader => {
                    if Instant::now() >= deadline {
                        return Err(RaftError::Cluster(ClusterFailure::NoLeader));
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Ok(_) => {
                    return Err(RaftError::Commit {
                        index: 0,
                        message: "meta command rejected by consumer".into(),
                    })
                }
                Err(RaftError::Timeout) => {
                    if Instant::now() >= deadline {
                        return Err(RaftError::Cluster(ClusterFailure::NoLeader));
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Look up a currently registered resource's context by name.
    pub async fn resource(&self, name: &str) -> Option<Arc<StateContext>> {
        self.registry
            .resources
            .read()
            .await
            .get(name)
            .map(|entry| Arc::clone(&entry.context))
    }

    /// Every resource name currently registered locally.
    pub async fn resource_names(&self) -> Vec<String> {
        self.registry.resources.read().await.keys().cloned().collect()
    }

    /// Close the coordinator: destroy every resource's router and context,
    /// then the meta-log's own.
    pub async fn close(&self) -> RaftResult<()> {
        let names: Vec<String> = self.resource_names().await;
        for name in names {
            self.registry.delete_local(&name).await;
        }
        self.meta_router.destroy().await;
        self.meta.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::EchoStateMachine;
    use crate::transport::InProcessNetwork;

    fn echo_factory() -> Arc<dyn ResourceFactory> {
        Arc::new(|| Arc::new(EchoStateMachine::default()) as Arc<dyn StateMachine>)
    }

    #[tokio::test]
    async fn create_resource_converges_via_meta_log_on_single_node() {
        let network = InProcessNetwork::new();
        let transport = Arc::new(network.transport("inproc://coord0"));
        let coordinator = ClusterCoordinator::open(
            "inproc://coord0".into(),
            transport,
            vec![],
            Duration::from_secs(3),
        )
        .await
        .unwrap();

        coordinator.register_factory("kv", echo_factory()).await;
        let created = coordinator
            .create_resource("kv", vec![], crate::config::LogConfig::default())
            .await
            .unwrap();
        assert!(created);
        assert!(coordinator.resource("kv").await.is_some());

        // Re-creating the same name is idempotent: reports "exists".
        let created_again = coordinator
            .create_resource("kv", vec![], crate::config::LogConfig::default())
            .await
            .unwrap();
        assert!(!created_again);

        let deleted = coordinator.delete_resource("kv").await.unwrap();
        assert!(deleted);
        assert!(coordinator.resource("kv").await.is_none());

        coordinator.close().await.unwrap();
    }

    #[tokio::test]
    async fn create_resource_without_a_registered_factory_is_deferred() {
        let network = InProcessNetwork::new();
        let transport = Arc::new(network.transport("inproc://coord0"));
        let coordinator = ClusterCoordinator::open(
            "inproc://coord0".into(),
            transport,
            vec![],
            Duration::from_secs(3),
        )
        .await
        .unwrap();

        let created = coordinator
            .create_resource("ghost", vec![], crate::config::LogConfig::default())
            .await
            .unwrap();
        assert!(!created);
        assert!(coordinator.resource("ghost").await.is_none());

        coordinator.close().await.unwrap();
    }
}
