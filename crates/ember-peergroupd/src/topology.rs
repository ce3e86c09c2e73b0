//! TOML description of a cluster to run the reconciler against.
//!
//! ```toml
//! [[node]]
//! id = "10"
//! wants_vote = true
//! has_vote = true
//! instance_id = "i-0a10"
//! replication_addrs = [{ host = "10.0.0.10", space = "internal", port = 37017 }]
//! client_addrs = [{ host = "10.0.0.10", port = 17070 }]
//!
//! [[member]]
//! id = 0
//! address = "10.0.0.10:37017"
//! votes = 1
//! tags = { ember-node-id = "10" }
//!
//! [[status]]
//! id = 0
//! address = "10.0.0.10:37017"
//! healthy = true
//! state = "primary"
//! ```
//!
//! When no `[[status]]` entries are given, the first member reports as
//! primary and the rest as secondaries.

use std::path::Path;

use ember_peergroup::memory::{MemoryClusterState, MemorySession};
use ember_peergroup::{
    ConfigError, ControllerNode, InstanceId, MemberState, MemberStatus, ReplicaSetMember,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct NodeEntry {
    #[serde(flatten)]
    node: ControllerNode,
    #[serde(default)]
    instance_id: Option<InstanceId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Topology {
    #[serde(default, rename = "node")]
    nodes: Vec<NodeEntry>,
    #[serde(default, rename = "member")]
    members: Vec<ReplicaSetMember>,
    #[serde(default, rename = "status")]
    statuses: Vec<MemberStatus>,
}

impl Topology {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let topology: Topology = toml::from_str(input)?;
        topology.validate()?;
        Ok(topology)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (i, entry) in self.nodes.iter().enumerate() {
            if self.nodes[..i].iter().any(|e| e.node.id == entry.node.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate node id {}",
                    entry.node.id
                )));
            }
        }
        for (i, member) in self.members.iter().enumerate() {
            if self.members[..i].iter().any(|m| m.id == member.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate member id {}",
                    member.id
                )));
            }
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Builds the in-memory cluster state.
    pub fn cluster_state(&self) -> MemoryClusterState {
        let state = MemoryClusterState::new();
        for entry in &self.nodes {
            if let Some(id) = &entry.instance_id {
                state.set_instance_id(entry.node.id.clone(), id.clone());
            }
            state.add_node(entry.node.clone());
        }
        state
    }

    /// Builds the in-memory replica-set session. New members become ready
    /// as soon as they are added.
    pub fn session(&self) -> MemorySession {
        MemorySession::new(self.members.clone(), self.member_statuses()).instantly_ready()
    }

    fn member_statuses(&self) -> Vec<MemberStatus> {
        if !self.statuses.is_empty() {
            return self.statuses.clone();
        }
        let mut members: Vec<&ReplicaSetMember> = self.members.iter().collect();
        members.sort_by_key(|m| m.id);
        members
            .iter()
            .enumerate()
            .map(|(i, m)| MemberStatus {
                id: m.id,
                address: m.address.clone(),
                healthy: true,
                state: if i == 0 {
                    MemberState::Primary
                } else {
                    MemberState::Secondary
                },
            })
            .collect()
    }
}
