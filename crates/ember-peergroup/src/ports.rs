//! Boundaries to the systems the reconciler reads from and writes to.
//!
//! Production backends and the in-memory ones in [`crate::memory`] both
//! implement these traits; the reconciler only ever sees trait objects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::replicaset::{MemberStatus, ReplicaSetMember};
use crate::space::SpaceState;
use crate::{ControllerNode, HostPort, InstanceId, NodeId, PortError};

/// Change feed for controller nodes.
///
/// The value is a change counter. Receivers only care that it moved, so
/// bursts of changes collapse into a single wake-up.
pub type ChangeFeed = watch::Receiver<u64>;

/// Cluster-state records for controller nodes.
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// All controller-eligible nodes.
    async fn controller_nodes(&self) -> Result<Vec<ControllerNode>, PortError>;

    /// Fires whenever a node is added, removed or changes.
    fn watch_controller_nodes(&self) -> ChangeFeed;

    /// The instance behind `node`.
    async fn instance_id(&self, node: &NodeId) -> Result<InstanceId, PortError>;

    /// Persists a node's voting status.
    async fn set_has_vote(&self, node: &NodeId, has_vote: bool) -> Result<(), PortError>;

    /// The persisted space resolution. Unset reads as `Unknown`.
    async fn space_state(&self) -> SpaceState;

    /// Persists the space resolution so operators can see it.
    async fn set_space_state(&self, state: SpaceState) -> Result<(), PortError>;
}

/// A session against the replicated store.
#[async_trait]
pub trait ReplicaSetSession: Send + Sync {
    /// Health of every member.
    async fn current_status(&self) -> Result<Vec<MemberStatus>, PortError>;

    /// The configured member list.
    async fn current_members(&self) -> Result<Vec<ReplicaSetMember>, PortError>;

    /// Replaces the member list in one reconfiguration.
    async fn set_members(&self, members: Vec<ReplicaSetMember>) -> Result<(), PortError>;
}

/// Client-facing addresses of the controllers, as handed to the publisher.
///
/// `servers` and `instance_ids` are parallel and ordered by node id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishInfo {
    pub servers: Vec<Vec<HostPort>>,
    pub instance_ids: Vec<InstanceId>,
}

/// Receives the controller address set whenever it changes.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, info: &PublishInfo) -> Result<(), PortError>;
}
