//! End-to-end scenarios 1 and 2: a single-node cluster applying commands in
//! order, and a three-node cluster replicating a write to every member.

mod common;

use common::{spawn_cluster, wait_for_applied, wait_for_stable_leader};
use raftline::transport::InProcessNetwork;

#[tokio::test]
async fn single_node_commit_applies_in_submission_order() {
    let network = InProcessNetwork::new();
    let nodes = spawn_cluster(&network, 1).await;
    wait_for_stable_leader(&nodes).await;
    let node = &nodes[0];

    let first = node.facade.submit("echo", b"a".to_vec()).await.unwrap();
    let second = node.facade.submit("echo", b"b".to_vec()).await.unwrap();

    assert_eq!(first, b"a".to_vec());
    assert_eq!(second, b"b".to_vec());

    let (commit_index, last_applied) = node.context.progress().await;
    assert_eq!(commit_index, 2);
    assert_eq!(last_applied, 2);
}

#[tokio::test]
async fn three_node_cluster_replicates_a_write_to_every_member() {
    let network = InProcessNetwork::new();
    let nodes = spawn_cluster(&network, 3).await;
    let leader_uri = wait_for_stable_leader(&nodes).await;
    let leader = common::find(&nodes, &leader_uri);

    let result = leader.facade.submit("put", b"k=v".to_vec()).await.unwrap();
    assert_eq!(result, b"put k=v".to_vec());

    for node in &nodes {
        wait_for_applied(node, 1).await;
        let (commit_index, last_applied) = node.context.progress().await;
        assert_eq!(commit_index, 1);
        assert_eq!(last_applied, 1);
    }
}

#[tokio::test]
async fn submissions_from_a_follower_are_forwarded_to_the_leader() {
    let network = InProcessNetwork::new();
    let nodes = spawn_cluster(&network, 3).await;
    let leader_uri = wait_for_stable_leader(&nodes).await;
    let follower = nodes.iter().find(|n| n.uri != leader_uri).unwrap();

    let result = follower.facade.submit("echo", b"hi".to_vec()).await.unwrap();
    assert_eq!(result, b"hi".to_vec());
    for node in &nodes {
        wait_for_applied(node, 1).await;
    }
}
