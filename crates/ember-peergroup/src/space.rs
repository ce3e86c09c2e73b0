//! Replication space resolution.
//!
//! When controller nodes are multi-homed, replication traffic must use
//! addresses from one space that every node can be reached in. The resolver
//! finds such a space and the outcome decides which address each replica-set
//! member advertises.
//!
//! ```text
//! Unknown ──common space──> Valid(name) ──no common space──> Invalid
//!    │                         ▲  │                            │
//!    │                         │  └──name no longer common──┐  │
//!    └──no common space──> Invalid ──common space again─────┴──┘
//!
//! spaces disabled: any ──> Unsupported (until restart)
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ControllerNode, HostPort, SpaceName};

/// Persisted outcome of space resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "name", rename_all = "lowercase")]
pub enum SpaceState {
    /// Not resolved yet.
    #[default]
    Unknown,
    /// Every node has an address in this space.
    Valid(SpaceName),
    /// No single space contains an address for every node.
    Invalid,
    /// Space-aware addressing is disabled for this deployment.
    Unsupported,
}

impl SpaceState {
    /// The space whose addresses should be used, if any.
    pub fn space(&self) -> Option<&SpaceName> {
        match self {
            SpaceState::Valid(name) if !name.is_unnamed() => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for SpaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpaceState::Unknown => write!(f, "unknown"),
            SpaceState::Valid(name) if name.is_unnamed() => write!(f, "valid (unnamed)"),
            SpaceState::Valid(name) => write!(f, "valid ({name})"),
            SpaceState::Invalid => write!(f, "invalid"),
            SpaceState::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Spaces that contain at least one replication address of every node.
///
/// Nodes without any replication address take no part in replication and
/// are ignored.
pub fn common_spaces(nodes: &[ControllerNode]) -> BTreeSet<SpaceName> {
    let mut common: Option<BTreeSet<SpaceName>> = None;
    for node in nodes.iter().filter(|n| !n.replication_addrs.is_empty()) {
        let spaces: BTreeSet<SpaceName> = node
            .replication_addrs
            .iter()
            .map(|hp| hp.space().clone())
            .collect();
        common = Some(match common {
            None => spaces,
            Some(acc) => acc.intersection(&spaces).cloned().collect(),
        });
    }
    common.unwrap_or_default()
}

/// Decides the replication space for the current node set.
#[derive(Debug, Clone, Copy)]
pub struct SpaceResolver {
    supported: bool,
}

impl SpaceResolver {
    pub fn new(supported: bool) -> Self {
        Self { supported }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// Computes the next state from the persisted one.
    ///
    /// A persisted `Valid(name)` is kept while `name` is still common to all
    /// nodes, so a choice made earlier or by an operator sticks. Otherwise
    /// the lowest-sorting named space wins, falling back to the unnamed
    /// space. With no node to place the persisted state is left alone.
    pub fn resolve(&self, stored: &SpaceState, nodes: &[ControllerNode]) -> SpaceState {
        if !self.supported {
            return SpaceState::Unsupported;
        }
        if nodes.iter().all(|n| n.replication_addrs.is_empty()) {
            return match stored {
                SpaceState::Unsupported => SpaceState::Unknown,
                other => other.clone(),
            };
        }

        let candidates = common_spaces(nodes);
        if candidates.is_empty() {
            return SpaceState::Invalid;
        }
        if let SpaceState::Valid(name) = stored {
            if candidates.contains(name) {
                return stored.clone();
            }
        }

        let chosen = candidates
            .iter()
            .find(|s| !s.is_unnamed())
            .or_else(|| candidates.iter().next())
            .cloned()
            .unwrap_or_default();
        SpaceState::Valid(chosen)
    }
}

/// The replication address a node should advertise under `state`.
///
/// Falls back to the node's primary address when no space applies or the
/// node has no address in the resolved space.
pub fn replication_address<'a>(state: &SpaceState, node: &'a ControllerNode) -> Option<&'a HostPort> {
    state
        .space()
        .and_then(|space| node.replication_addr_in(space))
        .or_else(|| node.primary_replication_addr())
}
