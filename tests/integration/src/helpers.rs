//! Shared fixtures for driving the reconciler through the in-memory ports.

use std::sync::Arc;
use std::time::Duration;

use ember_peergroup::memory::{Faults, MemoryClusterState, MemoryPublisher, MemorySession};
use ember_peergroup::{
    ControllerNode, HostPort, MemberState, MemberStatus, NodeId, ReconcilerConfig,
    ReconcilerHandle, ReplicaSetMember,
};
use tokio::time::Instant;

pub const REPLICATION_PORT: u16 = 37017;
pub const API_PORT: u16 = 17070;
pub const SPACE_PORT: u16 = 4711;

/// How long a condition may take before a test gives up. Tests run on
/// paused time, so this costs nothing when things work.
pub const LONG_WAIT: Duration = Duration::from_secs(10);

/// Every loop scenario runs once per address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub const ALL: [IpVersion; 2] = [IpVersion::V4, IpVersion::V6];

    /// Host of node `i`.
    pub fn host(self, i: u32) -> String {
        match self {
            IpVersion::V4 => format!("0.1.2.{i}"),
            IpVersion::V6 => format!("2001:DB8::{i}"),
        }
    }

    pub fn host_port(self, i: u32, port: u16) -> String {
        match self {
            IpVersion::V4 => format!("0.1.2.{i}:{port}"),
            IpVersion::V6 => format!("[2001:DB8::{i}]:{port}"),
        }
    }

    /// A host no node starts with.
    pub fn extra_host(self) -> String {
        match self {
            IpVersion::V4 => "0.1.99.99".to_owned(),
            IpVersion::V6 => "2001:DB8::99".to_owned(),
        }
    }

    /// Host used for the address in space number `i`.
    pub fn space_host(self, i: u32) -> String {
        match self {
            IpVersion::V4 => format!("0.0.0.{i}"),
            IpVersion::V6 => format!("2001:DB8:0:1::{i}"),
        }
    }

    pub fn space_host_port(self, i: u32) -> String {
        match self {
            IpVersion::V4 => format!("0.0.0.{i}:{SPACE_PORT}"),
            IpVersion::V6 => format!("[2001:DB8:0:1::{i}]:{SPACE_PORT}"),
        }
    }
}

/// Small timers so every scenario settles in a few virtual milliseconds.
pub fn test_config() -> ReconcilerConfig {
    ReconcilerConfig {
        poll_interval: Duration::from_millis(5),
        initial_retry_interval: Duration::from_millis(1),
        max_retry_interval: Duration::from_millis(20),
        ..ReconcilerConfig::default()
    }
}

pub fn node_id(i: u32) -> NodeId {
    NodeId::from(i.to_string())
}

/// A node primed to vote, with one replication and one API address.
pub fn controller(i: u32, ip: IpVersion) -> ControllerNode {
    let mut node = ControllerNode::new(node_id(i));
    node.wants_vote = true;
    node.replication_addrs = vec![HostPort::new(ip.host(i), REPLICATION_PORT)];
    node.client_addrs = vec![HostPort::new(ip.host(i), API_PORT)];
    node
}

/// Members from a compact description such as `"0v 1 2"`.
///
/// Each word is a member id, optionally followed by `v` for a voter. Member
/// `n` belongs to node `10 + n`.
pub fn mk_members(desc: &str, ip: IpVersion) -> Vec<ReplicaSetMember> {
    desc.split_whitespace()
        .map(|word| {
            let voting = word.ends_with('v');
            let id: u32 = word.trim_end_matches('v').parse().unwrap();
            ReplicaSetMember::for_node(
                id,
                ip.host_port(10 + id, REPLICATION_PORT),
                &node_id(10 + id),
                voting,
            )
        })
        .collect()
}

/// Statuses from a compact description such as `"0p 1s 2H"`.
///
/// `p` is a healthy primary, `s` a healthy secondary, `H` an unhealthy
/// secondary.
pub fn mk_statuses(desc: &str, ip: IpVersion) -> Vec<MemberStatus> {
    desc.split_whitespace()
        .map(|word| {
            let (id, code) = word.split_at(word.len() - 1);
            let id: u32 = id.parse().unwrap();
            let (healthy, state) = match code {
                "p" => (true, MemberState::Primary),
                "s" => (true, MemberState::Secondary),
                "H" => (false, MemberState::Secondary),
                other => panic!("unknown status code {other:?}"),
            };
            MemberStatus {
                id,
                address: ip.host_port(10 + id, REPLICATION_PORT),
                healthy,
                state,
            }
        })
        .collect()
}

/// Client addresses as published for nodes 10.. in order.
pub fn expected_api_host_ports(n: u32, ip: IpVersion) -> Vec<Vec<HostPort>> {
    (10..10 + n)
        .map(|i| vec![HostPort::new(ip.host(i), API_PORT)])
        .collect()
}

/// The ports behind one reconciler, sharing a single fault table.
pub struct Harness {
    pub ip: IpVersion,
    pub faults: Arc<Faults>,
    pub cluster: Arc<MemoryClusterState>,
    pub session: Arc<MemorySession>,
    pub publisher: Arc<MemoryPublisher>,
}

/// `n` voting-eligible nodes starting at 10. Only node 10 is in the replica
/// set, as the sole voter and primary.
pub fn init_state(n: u32, ip: IpVersion) -> Harness {
    init_state_with(n, ip, false)
}

/// Like [`init_state`], with members added by the loop reporting ready at
/// once.
pub fn init_state_ready(n: u32, ip: IpVersion) -> Harness {
    init_state_with(n, ip, true)
}

fn init_state_with(n: u32, ip: IpVersion, instantly_ready: bool) -> Harness {
    let faults = Faults::new();
    let cluster = MemoryClusterState::with_faults(faults.clone());
    for i in 10..10 + n {
        let mut node = controller(i, ip);
        node.has_vote = i == 10;
        cluster.add_node(node);
    }

    let mut session = MemorySession::new(mk_members("0v", ip), mk_statuses("0p", ip))
        .with_faults(faults.clone());
    if instantly_ready {
        session = session.instantly_ready();
    }

    Harness {
        ip,
        publisher: Arc::new(MemoryPublisher::with_faults(faults.clone())),
        faults,
        cluster: Arc::new(cluster),
        session: Arc::new(session),
    }
}

impl Harness {
    pub fn start(&self, config: ReconcilerConfig) -> ReconcilerHandle {
        ember_peergroup::start(
            self.cluster.clone(),
            self.session.clone(),
            self.publisher.clone(),
            config,
        )
    }

    pub fn has_vote(&self, i: u32) -> bool {
        self.cluster
            .node(&node_id(i))
            .map(|n| n.has_vote)
            .unwrap_or(false)
    }

    /// Waits until the session holds exactly `desc`.
    pub async fn wait_members(&self, desc: &str) {
        let want = mk_members(desc, self.ip);
        self.wait_members_eq(&want).await;
    }

    pub async fn wait_members_eq(&self, want: &[ReplicaSetMember]) {
        let session = self.session.clone();
        let mut want = want.to_vec();
        want.sort_by_key(|m| m.id);
        wait_for(&format!("members {want:?}"), || session.members() == want).await;
    }
}

/// Polls `cond` on virtual time until it holds or [`LONG_WAIT`] passes.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + LONG_WAIT;
    while !cond() {
        if Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
