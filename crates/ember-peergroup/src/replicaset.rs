//! The replicated store's view of its own membership.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::NodeId;

/// Tag key linking a replica-set member to the controller node it runs on.
pub const NODE_TAG: &str = "ember-node-id";

/// Upper bound on voting members the store accepts.
pub const MAX_VOTERS: usize = 7;

/// One member of the replica set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetMember {
    /// Member id. Stable for a node for as long as it stays in the set.
    pub id: u32,
    /// `host:port` used for replication traffic.
    pub address: String,
    /// Vote weight, 0 or 1.
    pub votes: u8,
    /// Election priority. `None` means the store default; non-voters use 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ReplicaSetMember {
    /// Creates a member tagged with `node`.
    pub fn for_node(id: u32, address: impl Into<String>, node: &NodeId, voting: bool) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(NODE_TAG.to_owned(), node.to_string());
        let mut member = Self {
            id,
            address: address.into(),
            votes: 0,
            priority: None,
            tags,
        };
        member.set_voting(voting);
        member
    }

    /// The controller node this member belongs to, if tagged.
    pub fn node_id(&self) -> Option<NodeId> {
        self.tags.get(NODE_TAG).map(|s| NodeId::new(s.as_str()))
    }

    pub fn is_voting(&self) -> bool {
        self.votes > 0
    }

    pub fn set_voting(&mut self, voting: bool) {
        if voting {
            self.votes = 1;
            self.priority = None;
        } else {
            self.votes = 0;
            self.priority = Some(0.0);
        }
    }
}

/// Replication state reported by the store for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    Startup,
    Primary,
    Secondary,
    Recovering,
    Startup2,
    Unknown,
    Arbiter,
    Down,
    Rollback,
    Removed,
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberState::Startup => "startup",
            MemberState::Primary => "primary",
            MemberState::Secondary => "secondary",
            MemberState::Recovering => "recovering",
            MemberState::Startup2 => "startup2",
            MemberState::Unknown => "unknown",
            MemberState::Arbiter => "arbiter",
            MemberState::Down => "down",
            MemberState::Rollback => "rollback",
            MemberState::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// Per-member health as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStatus {
    pub id: u32,
    pub address: String,
    pub healthy: bool,
    pub state: MemberState,
}

impl MemberStatus {
    /// A member may hold a vote only while healthy and fully replicating.
    pub fn can_vote(&self) -> bool {
        self.healthy && matches!(self.state, MemberState::Primary | MemberState::Secondary)
    }
}

/// Sorts members by id so two member lists can be compared directly.
pub fn normalized(members: &[ReplicaSetMember]) -> Vec<ReplicaSetMember> {
    let mut sorted = members.to_vec();
    sorted.sort_by_key(|m| m.id);
    sorted
}
