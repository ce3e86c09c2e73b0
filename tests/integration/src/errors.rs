//! Which port failures end the loop and which are retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ember_peergroup::memory::{Fault, MemoryClusterState, Operation};
use ember_peergroup::{
    ChangeFeed, ClusterState, ControllerNode, InstanceId, NodeId, PortError, SpaceState,
};
use tokio::sync::watch;

use crate::helpers::{
    init_state, init_state_ready, mk_statuses, node_id, test_config, wait_for, IpVersion,
    LONG_WAIT,
};

fn fatal_cases() -> Vec<(Fault, &'static str)> {
    vec![
        (
            Fault::new(Operation::ControllerNodes, "sample"),
            "cannot get controller info: sample",
        ),
        (
            Fault::new(Operation::SetHasVote, "sample")
                .node(node_id(11))
                .vote(true),
            r#"cannot set HasVote added: cannot set voting status of "11" to true: sample"#,
        ),
        (
            Fault::new(Operation::CurrentStatus, "sample"),
            "cannot get peergroup info: cannot get replica set status: sample",
        ),
        (
            Fault::new(Operation::CurrentMembers, "sample"),
            "cannot get peergroup info: cannot get replica set members: sample",
        ),
        (
            Fault::new(Operation::InstanceId, "sample"),
            r#"cannot get API server info: cannot get instance id of "10": sample"#,
        ),
    ]
}

#[tokio::test(start_paused = true)]
async fn fatal_errors() {
    for ip in IpVersion::ALL {
        for (fault, expect) in fatal_cases() {
            let h = init_state_ready(3, ip);
            h.faults.inject(fault);

            let handle = h.start(test_config());
            let err = tokio::time::timeout(LONG_WAIT, handle.wait())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {expect:?}"))
                .unwrap_err();
            assert_eq!(err.to_string(), expect);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn set_members_error_is_not_fatal() {
    let tick = Duration::from_millis(1);
    for ip in IpVersion::ALL {
        let h = init_state(3, ip);
        h.session.set_statuses(mk_statuses("0p 1s 2s", ip));
        h.faults
            .inject(Fault::new(Operation::SetMembers, "sample"));

        let mut config = test_config();
        config.initial_retry_interval = Duration::from_millis(10);
        config.max_retry_interval = Duration::from_millis(80);
        let max = config.max_retry_interval;
        let handle = h.start(config);

        let session = h.session.clone();
        wait_for("retries", || session.set_members_attempts().len() >= 6).await;
        assert!(!handle.is_finished());

        let attempts = h.session.set_members_attempts();
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        for pair in gaps.windows(2) {
            assert!(pair[1] + tick >= pair[0], "backoff shrank: {gaps:?}");
        }
        for gap in &gaps {
            assert!(*gap <= max + tick, "backoff above max: {gaps:?}");
        }
        assert!(*gaps.last().unwrap() + tick >= max, "backoff never reached max: {gaps:?}");

        // once the store accepts the change the loop carries on
        h.faults.clear();
        h.wait_members("0v 1v 2v").await;

        handle.shutdown().await.unwrap();
    }
}

/// Cluster state whose change feed is already closed.
struct ClosedFeed(MemoryClusterState);

#[async_trait]
impl ClusterState for ClosedFeed {
    async fn controller_nodes(&self) -> Result<Vec<ControllerNode>, PortError> {
        self.0.controller_nodes().await
    }

    fn watch_controller_nodes(&self) -> ChangeFeed {
        let (_, rx) = watch::channel(0);
        rx
    }

    async fn instance_id(&self, node: &NodeId) -> Result<InstanceId, PortError> {
        self.0.instance_id(node).await
    }

    async fn set_has_vote(&self, node: &NodeId, has_vote: bool) -> Result<(), PortError> {
        self.0.set_has_vote(node, has_vote).await
    }

    async fn space_state(&self) -> SpaceState {
        self.0.space_state().await
    }

    async fn set_space_state(&self, state: SpaceState) -> Result<(), PortError> {
        self.0.set_space_state(state).await
    }
}

#[tokio::test(start_paused = true)]
async fn closed_watcher_is_fatal() {
    let h = init_state(1, IpVersion::V4);
    let cluster = ClosedFeed(MemoryClusterState::new());
    for node in h.cluster.nodes() {
        cluster.0.add_node(node);
    }

    let handle = ember_peergroup::start(
        Arc::new(cluster),
        h.session.clone(),
        h.publisher.clone(),
        test_config(),
    );
    let err = tokio::time::timeout(LONG_WAIT, handle.wait())
        .await
        .expect("timed out waiting for the loop to fail")
        .unwrap_err();
    assert_eq!(err.to_string(), "cluster state watcher closed");
}
