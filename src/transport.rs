//! Bidirectional message delivery addressed by member URI and topic.
//!
//! [`Transport`] is the external collaborator interface described in the
//! system overview (§1, §4.2): a real deployment plugs in a TCP/TLS/QUIC
//! implementation keyed off the URI scheme. This crate ships
//! [`InProcessTransport`], a reference implementation built on in-memory
//! mailboxes, used to run simulated multi-node clusters in tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::{ClusterFailure, RaftError, RaftResult};
use crate::member::MemberId;

/// Which kind of payload a [`Frame`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    /// Execute a remote administrative task (out-of-band control plane).
    Execute = 0,
    /// Dispatch to a registered topic handler.
    Topic = 1,
}

/// The wire frame every message crosses the transport as.
///
/// `addr` identifies a resource instance on the receiving member; `topic`,
/// when present, selects one of the six protocol handlers registered by
/// [`crate::router::Router`] for that resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Whether this is an admin `Execute` or a resource `Topic` dispatch.
    pub kind: FrameKind,
    /// The resource instance address on the receiving member.
    pub addr: u32,
    /// The protocol topic, present for `Topic` frames.
    pub topic: Option<String>,
    /// The serialized request or response body.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a `Topic`-kind frame.
    #[must_use]
    pub fn topic(addr: u32, topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Topic,
            addr,
            topic: Some(topic.into()),
            payload,
        }
    }

    /// Build an `Execute`-kind frame.
    #[must_use]
    pub fn execute(addr: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Execute,
            addr,
            topic: None,
            payload,
        }
    }
}

/// A registered inbound handler: takes a frame's payload, returns the
/// serialized response.
pub type HandlerFn =
    Box<dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = RaftResult<Vec<u8>>> + Send>> + Send + Sync>;

/// Bidirectional, topic-multiplexed message delivery.
///
/// Combines a `Server` (listen + inbound handler registration) and
/// `Client` (outbound send) role into one collaborator trait, matching how
/// the reference in-process implementation and any real socket-based
/// implementation naturally share connection state.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin accepting inbound connections/messages.
    async fn listen(&self) -> RaftResult<()>;

    /// Stop accepting inbound messages and release resources.
    async fn close(&self) -> RaftResult<()>;

    /// Register the handler invoked for inbound frames addressed to
    /// `(addr, topic)`. Replaces any prior handler for the same key.
    async fn register_handler(&self, addr: u32, topic: &str, handler: HandlerFn);

    /// Remove the handler for `(addr, topic)`, if any.
    async fn unregister(&self, addr: u32, topic: &str);

    /// Send `frame` to `target` and await its response.
    async fn send(&self, target: &MemberId, frame: Frame) -> RaftResult<Frame>;
}

type HandlerKey = (u32, String);
type HandlerTable = Arc<RwLock<HashMap<HandlerKey, HandlerFn>>>;

/// A shared in-process "network": every [`InProcessTransport`] registered
/// against the same `InProcessNetwork` can reach every other by URI,
/// without any real sockets. Used to simulate a cluster inside one
/// process for tests and examples.
#[derive(Clone, Default)]
pub struct InProcessNetwork {
    members: Arc<RwLock<HashMap<MemberId, HandlerTable>>>,
    /// Which partition group each member currently belongs to. Two members
    /// can reach each other iff they are in the same group, or at least one
    /// of them has no entry (unpartitioned). Empty map means fully healed.
    groups: Arc<RwLock<HashMap<MemberId, u32>>>,
}

impl InProcessNetwork {
    /// Construct an empty network with no registered members.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport handle bound to `uri` on this network.
    #[must_use]
    pub fn transport(&self, uri: impl Into<MemberId>) -> InProcessTransport {
        InProcessTransport {
            uri: uri.into(),
            network: self.clone(),
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Simulate a network partition: members within the same group can
    /// reach each other as before; members in different groups cannot
    /// reach each other in either direction. Registered handlers are left
    /// intact (unlike [`Transport::close`], which is a process crash, not a
    /// partition). Test-only: a real transport would observe this as
    /// dropped packets, not an API call.
    pub async fn partition(&self, groups: &[Vec<MemberId>]) {
        let mut table = self.groups.write().await;
        table.clear();
        for (id, group) in groups.iter().enumerate() {
            for uri in group {
                table.insert(uri.clone(), id as u32);
            }
        }
    }

    /// Heal every partition previously introduced by
    /// [`InProcessNetwork::partition`]: the network is fully connected
    /// again.
    pub async fn heal(&self) {
        self.groups.write().await.clear();
    }
}

/// Reference [`Transport`] implementation backed by in-memory handler
/// tables shared through an [`InProcessNetwork`].
pub struct InProcessTransport {
    uri: MemberId,
    network: InProcessNetwork,
    handlers: HandlerTable,
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn listen(&self) -> RaftResult<()> {
        debug!(uri = %self.uri, "registering transport on in-process network");
        self.network
            .members
            .write()
            .await
            .insert(self.uri.clone(), Arc::clone(&self.handlers));
        Ok(())
    }

    async fn close(&self) -> RaftResult<()> {
        debug!(uri = %self.uri, "removing transport from in-process network");
        self.network.members.write().await.remove(&self.uri);
        self.handlers.write().await.clear();
        Ok(())
    }

    async fn register_handler(&self, addr: u32, topic: &str, handler: HandlerFn) {
        self.handlers
            .write()
            .await
            .insert((addr, topic.to_string()), handler);
    }

    async fn unregister(&self, addr: u32, topic: &str) {
        self.handlers.write().await.remove(&(addr, topic.to_string()));
    }

    async fn send(&self, target: &MemberId, frame: Frame) -> RaftResult<Frame> {
        {
            let groups = self.network.groups.read().await;
            if let (Some(from), Some(to)) = (groups.get(&self.uri), groups.get(target)) {
                if from != to {
                    return Err(RaftError::Cluster(ClusterFailure::Unreachable(target.clone())));
                }
            }
        }
        let table = {
            let members = self.network.members.read().await;
            members
                .get(target)
                .cloned()
                .ok_or_else(|| RaftError::Cluster(ClusterFailure::Unreachable(target.clone())))?
        };

        let topic = frame
            .topic
            .clone()
            .ok_or_else(|| RaftError::Protocol("execute frames are not routable".into()))?;
        let key = (frame.addr, topic.clone());

        let handler_result = {
            let handlers = table.read().await;
            let handler = handlers
                .get(&key)
                .ok_or_else(|| RaftError::Cluster(ClusterFailure::Unreachable(target.clone())))?;
            trace!(from = %self.uri, to = %target, %topic, "dispatching frame");
            (handler)(frame.payload.clone())
        };
        let response_bytes = handler_result.await?;

        Ok(Frame {
            kind: FrameKind::Topic,
            addr: frame.addr,
            topic: Some(topic),
            payload: response_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_reaches_registered_handler_and_returns_response() {
        let network = InProcessNetwork::new();
        let server = network.transport("inproc://m0");
        let client = network.transport("inproc://client");

        server.listen().await.unwrap();
        server
            .register_handler(
                1,
                "ping",
                Box::new(|bytes| Box::pin(async move {
                    let mut echoed = bytes;
                    echoed.push(b'!');
                    Ok(echoed)
                })),
            )
            .await;

        let response = client
            .send(
                &"inproc://m0".to_string(),
                Frame::topic(1, "ping", b"hi".to_vec()),
            )
            .await
            .unwrap();

        assert_eq!(response.payload, b"hi!".to_vec());
    }

    #[tokio::test]
    async fn send_to_unreachable_member_fails() {
        let network = InProcessNetwork::new();
        let client = network.transport("inproc://client");
        let result = client
            .send(
                &"inproc://ghost".to_string(),
                Frame::topic(1, "ping", vec![]),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn close_removes_member_from_network() {
        let network = InProcessNetwork::new();
        let server = network.transport("inproc://m0");
        server.listen().await.unwrap();
        server.close().await.unwrap();

        let client = network.transport("inproc://client");
        let result = client
            .send(&"inproc://m0".to_string(), Frame::topic(1, "ping", vec![]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn partition_blocks_both_directions_until_healed() {
        let network = InProcessNetwork::new();
        let server = network.transport("inproc://m0");
        server.listen().await.unwrap();
        server
            .register_handler(
                1,
                "ping",
                Box::new(|bytes| Box::pin(async move { Ok(bytes) })),
            )
            .await;
        let client = network.transport("inproc://client");

        let uri = "inproc://m0".to_string();
        network
            .partition(&[vec![uri.clone()], vec!["inproc://client".to_string()]])
            .await;
        let result = client.send(&uri, Frame::topic(1, "ping", vec![])).await;
        assert!(result.is_err());

        network.heal().await;
        let result = client.send(&uri, Frame::topic(1, "ping", vec![])).await;
        assert!(result.is_ok());
    }
}
