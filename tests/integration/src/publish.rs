//! Client addresses handed to the publisher.

use std::sync::Arc;
use std::time::Duration;

use ember_peergroup::memory::{Fault, FnPublisher, Operation};
use ember_peergroup::{HostPort, InstanceId, PortError, PublishInfo};
use tokio::sync::mpsc;

use crate::helpers::{
    expected_api_host_ports, init_state, node_id, test_config, wait_for, IpVersion, API_PORT,
    LONG_WAIT,
};

#[tokio::test(start_paused = true)]
async fn controllers_are_published() {
    for ip in IpVersion::ALL {
        let h = init_state(3, ip);
        let handle = h.start(test_config());

        let publisher = h.publisher.clone();
        wait_for("first publish", || !publisher.published().is_empty()).await;
        assert_eq!(
            h.publisher.published()[0].servers,
            expected_api_host_ports(3, ip)
        );

        let moved = vec![HostPort::new(ip.extra_host(), API_PORT)];
        h.cluster
            .update_node(&node_id(10), |n| n.client_addrs = moved.clone());
        wait_for("second publish", || publisher.published().len() == 2).await;

        let mut expected = expected_api_host_ports(3, ip);
        expected[0] = moved;
        assert_eq!(h.publisher.published()[1].servers, expected);

        // unchanged addresses are not sent again
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.publisher.published().len(), 2);

        handle.shutdown().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn retries_on_publish_error() {
    for ip in IpVersion::ALL {
        let h = init_state(3, ip);
        h.faults
            .inject(Fault::new(Operation::Publish, "publish error").times(3));

        let mut config = test_config();
        config.poll_interval = LONG_WAIT + Duration::from_secs(1);
        config.initial_retry_interval = Duration::from_millis(5);
        config.max_retry_interval = config.initial_retry_interval;
        let handle = h.start(config);

        let faults = h.faults.clone();
        wait_for("four publish calls", || faults.calls(Operation::Publish) == 4).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.faults.calls(Operation::Publish), 4);
        let published = h.publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].servers, expected_api_host_ports(3, ip));

        handle.shutdown().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn publishes_instance_ids() {
    for ip in IpVersion::ALL {
        let h = init_state(3, ip);
        let (tx, mut rx) = mpsc::unbounded_channel::<PublishInfo>();
        let publisher = FnPublisher(move |info: &PublishInfo| -> Result<(), PortError> {
            let _ = tx.send(info.clone());
            Ok(())
        });

        let handle = ember_peergroup::start(
            h.cluster.clone(),
            h.session.clone(),
            Arc::new(publisher),
            test_config(),
        );

        let info = tokio::time::timeout(LONG_WAIT, rx.recv())
            .await
            .expect("timed out waiting for publish")
            .unwrap();
        assert_eq!(
            info.instance_ids,
            vec![
                InstanceId::from("id-10"),
                InstanceId::from("id-11"),
                InstanceId::from("id-12"),
            ]
        );
        assert_eq!(info.servers.len(), info.instance_ids.len());

        handle.shutdown().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn publish_failures_do_not_block_reconciliation() {
    for ip in IpVersion::ALL {
        let h = init_state(3, ip);
        h.faults
            .inject(Fault::new(Operation::Publish, "unreachable"));
        let handle = h.start(test_config());

        h.wait_members("0v 1 2").await;
        h.cluster.remove_node(&node_id(12));
        h.wait_members("0v 1").await;
        assert!(h.publisher.published().is_empty());

        handle.shutdown().await.unwrap();
    }
}
