//! Error types for peer-group reconciliation.
//!
//! Port failures are reported as [`PortError`]. Whether one is fatal depends
//! on where it happens, so the reconciler wraps the fatal ones in a
//! [`ReconcileError`] and contains the rest in its retry loops.

use crate::NodeId;

/// A failure reported by one of the external ports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    /// The port rejected or failed the operation.
    #[error("{0}")]
    Failed(String),

    /// The referenced node is not known to the port.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
}

impl PortError {
    /// Creates a generic failure with the given message.
    pub fn failed(msg: impl Into<String>) -> Self {
        PortError::Failed(msg.into())
    }
}

/// Errors that terminate the reconciliation loop.
///
/// Every variant is fatal: the loop stops and the error is returned from
/// [`ReconcilerHandle::wait`](crate::ReconcilerHandle::wait).
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The controller node list could not be read.
    #[error("cannot get controller info: {0}")]
    ControllerInfo(#[source] PortError),

    /// The replica-set status could not be read.
    #[error("cannot get peergroup info: cannot get replica set status: {0}")]
    ReplicaSetStatus(#[source] PortError),

    /// The replica-set member list could not be read.
    #[error("cannot get peergroup info: cannot get replica set members: {0}")]
    ReplicaSetMembers(#[source] PortError),

    /// A node's instance id could not be resolved for publishing.
    #[error("cannot get API server info: cannot get instance id of \"{node}\": {source}")]
    InstanceId {
        node: NodeId,
        #[source]
        source: PortError,
    },

    /// A promoted node's vote could not be persisted after the replica set
    /// already granted it.
    #[error("cannot set HasVote added: cannot set voting status of \"{node}\" to true: {source}")]
    VoteAdded {
        node: NodeId,
        #[source]
        source: PortError,
    },

    /// The cluster-state change feed ended.
    #[error("cluster state watcher closed")]
    WatcherClosed,

    /// The loop task panicked or was aborted.
    #[error("reconciler task failed: {0}")]
    Task(String),
}

/// Errors from loading or validating a [`ReconcilerConfig`](crate::ReconcilerConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
