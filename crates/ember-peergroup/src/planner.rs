//! Target replica-set planning.
//!
//! A pure function from the observed cluster state and replica-set state to
//! the membership the replica set should have. No I/O happens here.
//!
//! # Voter selection
//!
//! A node is a voting candidate when cluster policy wants it to vote, its
//! instance is healthy, and the store reports its member as a healthy
//! primary or secondary. New members therefore start out non-voting and are
//! promoted on a later pass once they have caught up.
//!
//! Candidates are taken in ascending node-id order, up to the voter cap, and
//! trimmed by one if needed so the voter count is odd.
//!
//! If no node qualifies, the members that vote today keep their votes. The
//! replica set still gains, loses and re-addresses its other members, so a
//! set whose only voter has failed can still take on replacements.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::replicaset::{normalized, MemberStatus, ReplicaSetMember, NODE_TAG};
use crate::space::{replication_address, SpaceState};
use crate::{ControllerNode, NodeId};

/// Everything the planner looks at for one pass.
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub nodes: &'a [ControllerNode],
    pub members: &'a [ReplicaSetMember],
    pub statuses: &'a [MemberStatus],
    pub space: &'a SpaceState,
    pub max_voters: usize,
}

/// The planner's output for one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetPlan {
    /// Desired members, sorted by member id.
    pub members: Vec<ReplicaSetMember>,
    /// Desired `has_vote` for every node in cluster state.
    pub votes: BTreeMap<NodeId, bool>,
    /// Replication address chosen for every node that has one.
    pub addresses: BTreeMap<NodeId, String>,
}

/// Nodes whose persisted `has_vote` disagrees with a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteChanges {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

impl VoteChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl TargetPlan {
    pub fn voter_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_voting()).count()
    }

    pub fn is_voter(&self, node: &NodeId) -> bool {
        self.votes.get(node).copied().unwrap_or(false)
    }

    /// Returns true if applying this plan would change `current`.
    pub fn differs_from(&self, current: &[ReplicaSetMember]) -> bool {
        self.members != normalized(current)
    }

    /// Compares the plan's votes against each node's persisted flag.
    pub fn vote_changes(&self, nodes: &[ControllerNode]) -> VoteChanges {
        let mut changes = VoteChanges::default();
        for node in nodes {
            let want = self.is_voter(&node.id);
            if want && !node.has_vote {
                changes.added.push(node.id.clone());
            } else if !want && node.has_vote {
                changes.removed.push(node.id.clone());
            }
        }
        changes.added.sort();
        changes.removed.sort();
        changes
    }
}

/// Largest odd count not above `n` or `cap`. Zero stays zero.
fn odd_voter_count(n: usize, cap: usize) -> usize {
    let n = n.min(cap);
    if n % 2 == 0 {
        n.saturating_sub(1)
    } else {
        n
    }
}

/// Computes the target plan.
pub fn plan(input: PlanInput<'_>) -> TargetPlan {
    let mut nodes: Vec<&ControllerNode> = input.nodes.iter().collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    let mut by_id: Vec<&ReplicaSetMember> = input.members.iter().collect();
    by_id.sort_by_key(|m| m.id);

    // lowest member id wins if a node is tagged twice
    let mut existing: HashMap<NodeId, &ReplicaSetMember> = HashMap::new();
    for member in by_id {
        if let Some(node_id) = member.node_id() {
            existing.entry(node_id).or_insert(member);
        }
    }
    let statuses: HashMap<u32, &MemberStatus> =
        input.statuses.iter().map(|s| (s.id, s)).collect();

    let can_vote = |node: &ControllerNode| -> bool {
        node.wants_vote
            && node.is_healthy()
            && existing
                .get(&node.id)
                .and_then(|m| statuses.get(&m.id))
                .is_some_and(|s| s.can_vote())
    };

    let candidates: Vec<&NodeId> = nodes
        .iter()
        .filter(|n| n.primary_replication_addr().is_some() && can_vote(n))
        .map(|n| &n.id)
        .collect();
    let voter_count = odd_voter_count(candidates.len(), input.max_voters);
    let mut voters: Vec<&NodeId> = candidates.into_iter().take(voter_count).collect();
    if voters.is_empty() {
        voters = nodes
            .iter()
            .filter(|n| n.primary_replication_addr().is_some())
            .filter(|n| existing.get(&n.id).is_some_and(|m| m.is_voting()))
            .map(|n| &n.id)
            .collect();
        if !voters.is_empty() {
            debug!(voters = voters.len(), "no eligible voters; keeping current ones");
        }
    }

    let mut next_id = match input.members.iter().map(|m| m.id).max() {
        Some(max) => max.checked_add(1),
        None => Some(0),
    };
    let mut target = TargetPlan::default();

    for node in nodes {
        let voting = voters.contains(&&node.id);
        target.votes.insert(node.id.clone(), voting);

        let Some(addr) = replication_address(input.space, node) else {
            debug!(node = %node.id, "node has no replication address; leaving it out");
            continue;
        };
        let address = addr.to_string();

        let member = match existing.get(&node.id) {
            Some(current) => {
                let mut member = (*current).clone();
                member.address = address.clone();
                member
                    .tags
                    .insert(NODE_TAG.to_owned(), node.id.to_string());
                member.set_voting(voting);
                member
            }
            None => {
                let Some(id) = next_id else {
                    warn!(node = %node.id, "no member id left for node; leaving it out");
                    continue;
                };
                next_id = id.checked_add(1);
                ReplicaSetMember::for_node(id, address.clone(), &node.id, voting)
            }
        };
        target.addresses.insert(node.id.clone(), address);
        target.members.push(member);
    }

    target.members.sort_by_key(|m| m.id);
    target
}
