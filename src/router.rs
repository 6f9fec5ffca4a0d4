//! Wires one resource's protocol entry points to topics on the shared
//! transport.
//!
//! Registers the six inbound topic handlers (`ping`, `poll`, `append`,
//! `query`, `commit`, `sync`) that deliver to [`StateContext::dispatch`].
//! Outbound sends are issued directly by [`crate::context::StateContext`]
//! against the same transport, so the router only owns the inbound side;
//! destroying it unregisters every handler it installed.

use std::sync::Arc;

use tracing::debug;

use crate::context::StateContext;
use crate::transport::Transport;

/// Every topic a [`StateContext`] answers on.
const TOPICS: [&str; 6] = ["ping", "poll", "append", "query", "commit", "sync"];

/// Owns the inbound handler registrations for one resource on one
/// transport. Dropping a `Router` does not unregister its handlers — call
/// [`Router::destroy`] explicitly, matching the transport trait's
/// register/unregister pair being async.
pub struct Router {
    transport: Arc<dyn Transport>,
    addr: u32,
}

impl Router {
    /// Register all six topic handlers for `context` on `transport`,
    /// addressed at `addr`.
    pub async fn install(transport: Arc<dyn Transport>, addr: u32, context: Arc<StateContext>) -> Self {
        for topic in TOPICS {
            let context = Arc::clone(&context);
            let topic_owned = topic.to_string();
            transport
                .register_handler(
                    addr,
                    topic,
                    Box::new(move |payload| {
                        let context = Arc::clone(&context);
                        let topic = topic_owned.clone();
                        Box::pin(async move { context.dispatch(&topic, payload).await })
                    }),
                )
                .await;
        }
        debug!(addr, "router installed");
        Self { transport, addr }
    }

    /// Unregister every handler this router installed.
    pub async fn destroy(&self) {
        for topic in TOPICS {
            self.transport.unregister(self.addr, topic).await;
        }
        debug!(addr = self.addr, "router destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RaftConfig;
    use crate::log::InMemoryLog;
    use crate::member::Membership;
    use crate::pipeline::test_support::EchoStateMachine;
    use crate::protocol::PingRequest;
    use crate::transport::{Frame, InProcessNetwork};

    #[tokio::test]
    async fn installed_router_answers_ping_over_the_transport() {
        let network = InProcessNetwork::new();
        let server = Arc::new(network.transport("inproc://m0"));
        server.listen().await.unwrap();

        let config = RaftConfig::builder()
            .local_member_uri("inproc://m0")
            .member_uris(vec!["inproc://m0".into()])
            .build()
            .unwrap();
        let context = StateContext::new(
            "kv",
            "inproc://m0".into(),
            1,
            Membership::new("inproc://m0".into(), vec![]),
            config,
            Arc::new(InMemoryLog::new()),
            server.clone(),
            Arc::new(EchoStateMachine::default()),
        );
        context.open().await.unwrap();
        let router = Router::install(server.clone(), 1, Arc::clone(&context)).await;

        let client = network.transport("inproc://client");
        let req = PingRequest {
            term: 0,
            leader: None,
            last_log_index: 0,
            last_log_term: 0,
            commit_index: 0,
        };
        let frame = Frame::topic(1, "ping", bincode::serialize(&req).unwrap());
        let response = client.send(&"inproc://m0".to_string(), frame).await.unwrap();
        let _: crate::protocol::PingResponse = bincode::deserialize(&response.payload).unwrap();

        router.destroy().await;
        let result = client
            .send(&"inproc://m0".to_string(), Frame::topic(1, "ping", vec![]))
            .await;
        assert!(result.is_err());
    }
}
