//! Shared harness for the end-to-end scenario tests: builds a simulated
//! cluster of `StateContext`s wired through one `InProcessNetwork`, with a
//! `StateLog` façade per node exposing `echo`/`put`/`get` commands.

use std::sync::Arc;
use std::time::Duration;

use raftline::config::RaftConfig;
use raftline::context::StateContext;
use raftline::facade::StateLog;
use raftline::log::InMemoryLog;
use raftline::member::{Member, MemberId, Membership};
use raftline::router::Router;
use raftline::transport::InProcessNetwork;

/// One simulated node: its `StateContext` (for lifecycle/inspection) and the
/// `StateLog` façade application code talks to.
pub struct Node {
    pub uri: MemberId,
    pub context: Arc<StateContext>,
    pub facade: StateLog,
    _router: Router,
}

/// Election/heartbeat timings fast enough for tests to converge quickly
/// without flaking under CI scheduling jitter.
pub fn test_config(local: &str, members: &[String]) -> RaftConfig {
    RaftConfig::builder()
        .local_member_uri(local)
        .member_uris(members.to_vec())
        .election_timeout(Duration::from_millis(60))
        .heartbeat_interval(Duration::from_millis(15))
        .build()
        .unwrap()
}

/// Build and open a cluster of `count` voting members, each registered with
/// an `echo` command and a `put`/`get` key-value store over a shared
/// in-memory map, reachable through one `InProcessNetwork`.
pub async fn spawn_cluster(network: &InProcessNetwork, count: usize) -> Vec<Node> {
    let uris: Vec<MemberId> = (0..count).map(|i| format!("inproc://m{i}")).collect();
    let mut nodes = Vec::with_capacity(count);
    for uri in &uris {
        let transport = Arc::new(network.transport(uri.clone()));
        transport.listen().await.unwrap();

        let peers: Vec<Member> = uris
            .iter()
            .filter(|other| *other != uri)
            .map(Member::voting)
            .collect();
        let membership = Membership::new(uri.clone(), peers);
        let config = test_config(uri, &uris);

        let (machine, registry) = StateLog::state_machine();
        let context = StateContext::new(
            "kv",
            uri.clone(),
            1,
            membership,
            config,
            Arc::new(InMemoryLog::new()),
            transport.clone(),
            machine,
        );
        context.open().await.unwrap();
        let router = Router::install(transport, 1, Arc::clone(&context)).await;
        let facade = StateLog::new(Arc::clone(&context), registry);

        facade
            .register_command("echo", Arc::new(|input| Box::pin(async move { Ok(input) })))
            .await;
        install_kv_commands(&facade).await;

        nodes.push(Node {
            uri: uri.clone(),
            context,
            facade,
            _router: router,
        });
    }
    nodes
}

async fn install_kv_commands(facade: &StateLog) {
    use std::collections::HashMap;
    use std::sync::Mutex;

    let store: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));

    let put_store = Arc::clone(&store);
    facade
        .register_command(
            "put",
            Arc::new(move |input| {
                let store = Arc::clone(&put_store);
                Box::pin(async move {
                    let text = String::from_utf8_lossy(&input).into_owned();
                    if let Some((k, v)) = text.split_once('=') {
                        store.lock().unwrap().insert(k.to_string(), v.to_string());
                    }
                    Ok(format!("put {text}").into_bytes())
                })
            }),
        )
        .await;

    let get_store = Arc::clone(&store);
    facade
        .register_query(
            "get",
            Arc::new(move |input| {
                let store = Arc::clone(&get_store);
                Box::pin(async move {
                    let key = String::from_utf8_lossy(&input).into_owned();
                    let value = store.lock().unwrap().get(&key).cloned().unwrap_or_default();
                    Ok(value.into_bytes())
                })
            }),
            raftline::protocol::Consistency::Strong,
        )
        .await;

    // Same lookup, registered separately at WEAK consistency so tests can
    // submit the identical query by name under each consistency level.
    let get_weak_store = Arc::clone(&store);
    facade
        .register_query(
            "get_weak",
            Arc::new(move |input| {
                let store = Arc::clone(&get_weak_store);
                Box::pin(async move {
                    let key = String::from_utf8_lossy(&input).into_owned();
                    let value = store.lock().unwrap().get(&key).cloned().unwrap_or_default();
                    Ok(value.into_bytes())
                })
            }),
            raftline::protocol::Consistency::Weak,
        )
        .await;
}

/// Poll every node until exactly one leader is known and agreed upon by all
/// of them, or panic after a generous timeout.
pub async fn wait_for_stable_leader(nodes: &[Node]) -> MemberId {
    wait_for_stable_leader_among(nodes.iter().collect::<Vec<_>>().as_slice()).await
}

/// Same as [`wait_for_stable_leader`] but over an arbitrary subset, so a
/// test can check that a surviving majority converges on its own.
pub async fn wait_for_stable_leader_among(nodes: &[&Node]) -> MemberId {
    for _ in 0..500 {
        let mut leaders = Vec::new();
        for node in nodes {
            if let Some(leader) = node.context.current_leader().await {
                leaders.push(leader);
            }
        }
        if leaders.len() == nodes.len() {
            let first = &leaders[0];
            if leaders.iter().all(|l| l == first) {
                return first.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cluster did not converge on a stable leader in time");
}

/// Poll `node` until `last_applied >= index`, or panic after a timeout.
pub async fn wait_for_applied(node: &Node, index: u64) {
    for _ in 0..500 {
        let (_, last_applied) = node.context.progress().await;
        if last_applied >= index {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("node {} did not apply index {index} in time", node.uri);
}

/// Poll `node` until it no longer believes any member (including itself) is
/// leader, or panic after a timeout. Used after isolating a node to confirm
/// it gives up its stale view once its election timeout fires.
pub async fn wait_for_no_leader(node: &Node) {
    for _ in 0..500 {
        if node.context.current_leader().await.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("node {} still believes it has a leader", node.uri);
}

/// The node currently believed to be leader by the cluster, panicking if
/// none is found among `nodes`.
pub fn find<'a>(nodes: &'a [Node], uri: &str) -> &'a Node {
    nodes.iter().find(|n| n.uri == uri).expect("node not found")
}
