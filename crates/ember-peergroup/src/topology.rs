//! Controller-node topology.
//!
//! Defines the cluster-state view of a controller node: its identity, the
//! addresses it advertises, its voting flags and its health.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a controller node.
///
/// Ids order numerically when both are numbers, so `"9"` comes before
/// `"10"`. Numeric ids sort ahead of other ids, which compare lexically.
/// This order decides voter tie-breaks and publish order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        let key = |id: &str| id.parse::<u64>().ok();
        match (key(&self.0), key(&other.0)) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-assigned identifier of the machine instance behind a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a network space (partition). The empty name is the unnamed space
/// that addresses without an explicit space belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceName(String);

impl SpaceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the unnamed space.
    pub fn is_unnamed(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SpaceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for SpaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A host address plus the space it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// IP literal or hostname, without brackets.
    pub host: String,
    #[serde(default)]
    pub space: SpaceName,
}

impl Address {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            space: SpaceName::default(),
        }
    }

    pub fn in_space(host: impl Into<String>, space: impl Into<SpaceName>) -> Self {
        Self {
            host: host.into(),
            space: space.into(),
        }
    }

    fn is_ipv6(&self) -> bool {
        self.host.contains(':')
    }
}

/// An address with a port, as advertised for replication or client traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    #[serde(flatten)]
    pub address: Address,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            address: Address::new(host),
            port,
        }
    }

    pub fn in_space(host: impl Into<String>, space: impl Into<SpaceName>, port: u16) -> Self {
        Self {
            address: Address::in_space(host, space),
            port,
        }
    }

    pub fn space(&self) -> &SpaceName {
        &self.address.space
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.is_ipv6() {
            write!(f, "[{}]:{}", self.address.host, self.port)
        } else {
            write!(f, "{}:{}", self.address.host, self.port)
        }
    }
}

/// Cluster-state health classification of a node's instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeHealth {
    #[default]
    Healthy,
    /// The instance is unreachable or stopped.
    Down,
    /// The instance never came up.
    ProvisioningError,
}

impl NodeHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, NodeHealth::Healthy)
    }
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeHealth::Healthy => write!(f, "healthy"),
            NodeHealth::Down => write!(f, "down"),
            NodeHealth::ProvisioningError => write!(f, "provisioning-error"),
        }
    }
}

/// A controller-eligible node as recorded in cluster state.
///
/// Only `has_vote` is written by the reconciler; everything else is owned by
/// the cluster-state layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerNode {
    pub id: NodeId,
    /// Addresses for replication traffic. The first one is the primary.
    #[serde(default)]
    pub replication_addrs: Vec<HostPort>,
    /// Addresses clients use to reach the node's API.
    #[serde(default)]
    pub client_addrs: Vec<HostPort>,
    /// Whether cluster policy wants this node to vote.
    #[serde(default)]
    pub wants_vote: bool,
    /// Last persisted voting status.
    #[serde(default)]
    pub has_vote: bool,
    #[serde(default)]
    pub health: NodeHealth,
}

impl ControllerNode {
    /// Creates a healthy node with no addresses and no vote.
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            replication_addrs: Vec::new(),
            client_addrs: Vec::new(),
            wants_vote: false,
            has_vote: false,
            health: NodeHealth::Healthy,
        }
    }

    /// The address used when no space-specific address applies.
    pub fn primary_replication_addr(&self) -> Option<&HostPort> {
        self.replication_addrs.first()
    }

    /// The first replication address inside `space`.
    pub fn replication_addr_in(&self, space: &SpaceName) -> Option<&HostPort> {
        self.replication_addrs.iter().find(|hp| hp.space() == space)
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }
}
