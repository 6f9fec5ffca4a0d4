//! End-to-end scenarios 5 and 6: query consistency levels diverging once a
//! node loses touch with the rest of the cluster, and a lagging follower
//! catching up via snapshot install rather than a full log replay.

mod common;

use common::{find, spawn_cluster, wait_for_applied, wait_for_no_leader, wait_for_stable_leader};
use raftline::transport::InProcessNetwork;

#[tokio::test]
async fn strong_query_fails_without_a_leader_but_weak_query_still_answers_locally() {
    let network = InProcessNetwork::new();
    let nodes = spawn_cluster(&network, 3).await;
    let leader_uri = wait_for_stable_leader(&nodes).await;

    find(&nodes, &leader_uri)
        .facade
        .submit("put", b"k=v".to_vec())
        .await
        .unwrap();
    for node in &nodes {
        wait_for_applied(node, 1).await;
    }

    let isolated_uri = nodes
        .iter()
        .map(|n| n.uri.clone())
        .find(|u| *u != leader_uri)
        .unwrap();
    let rest: Vec<String> = nodes
        .iter()
        .map(|n| n.uri.clone())
        .filter(|u| *u != isolated_uri)
        .collect();
    network.partition(&[vec![isolated_uri.clone()], rest]).await;

    let isolated = find(&nodes, &isolated_uri);
    wait_for_no_leader(isolated).await;

    let strong = isolated.facade.query("get", b"k".to_vec()).await;
    assert!(
        strong.is_err(),
        "a STRONG query on a node with no known leader must not answer from stale local state"
    );

    let weak = isolated.facade.query("get_weak", b"k".to_vec()).await.unwrap();
    assert_eq!(weak, b"v".to_vec(), "a WEAK query answers from local state regardless of leader knowledge");
}

#[tokio::test]
async fn a_follower_that_lagged_through_a_compaction_catches_up_via_snapshot_install() {
    let network = InProcessNetwork::new();
    let nodes = spawn_cluster(&network, 3).await;
    let leader_uri = wait_for_stable_leader(&nodes).await;

    let laggard_uri = nodes
        .iter()
        .map(|n| n.uri.clone())
        .find(|u| *u != leader_uri)
        .unwrap();
    let caught_up_group: Vec<String> = nodes
        .iter()
        .map(|n| n.uri.clone())
        .filter(|u| *u != laggard_uri)
        .collect();
    assert_eq!(caught_up_group.len(), 2);

    // The laggard hears nothing while the leader and its one remaining
    // follower commit five entries and the leader compacts the log through
    // all of them.
    network
        .partition(&[vec![laggard_uri.clone()], caught_up_group.clone()])
        .await;

    let leader = find(&nodes, &leader_uri);
    for i in 0..5 {
        leader
            .facade
            .submit("echo", format!("entry-{i}").into_bytes())
            .await
            .unwrap();
    }
    for uri in &caught_up_group {
        wait_for_applied(find(&nodes, uri), 5).await;
    }
    leader.context.take_snapshot(5).await.unwrap();

    // Reconnect the laggard. Having heard from no one, it may have run
    // through several candidacies of its own and bumped its term past the
    // old leader's, possibly forcing a fresh election once healed. Either
    // way, the cluster re-converges on some leader, and the laggard (having
    // no entries at all) must be caught up via snapshot install rather than
    // a replay of everything since index 1.
    network.heal().await;
    let post_heal_leader_uri = wait_for_stable_leader(&nodes).await;
    let laggard = find(&nodes, &laggard_uri);
    wait_for_applied(laggard, 5).await;

    // With the snapshot installed, ordinary `Append`s resume for indexes
    // past the compaction point.
    find(&nodes, &post_heal_leader_uri)
        .facade
        .submit("echo", b"entry-5".to_vec())
        .await
        .unwrap();
    for node in &nodes {
        wait_for_applied(node, 6).await;
    }
}
