//! ember-peergroup: replica-set membership for ember controller nodes.
//!
//! The controllers' replicated store needs its member list to follow the
//! set of controller nodes the cluster knows about. This crate runs a
//! control loop that keeps the two in step.
//!
//! # Architecture
//!
//! - **Planning**: a pure function from observed state to target membership
//! - **Voting**: an odd number of voters, at most seven, drawn from healthy
//!   caught-up members in node-id order
//! - **Spaces**: replication addresses picked from a network space every
//!   controller can reach, when enabled
//! - **Reconciling**: an async loop that applies the plan with backoff,
//!   persists votes and publishes client addresses
//!
//! The loop talks to the outside world through the [`ClusterState`],
//! [`ReplicaSetSession`] and [`Publisher`] traits. In-memory versions live
//! in [`memory`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ember_peergroup::memory::{LogPublisher, MemoryClusterState, MemorySession};
//! use ember_peergroup::{start, ReconcilerConfig};
//!
//! let cluster = Arc::new(MemoryClusterState::new());
//! let session = Arc::new(MemorySession::default());
//! let handle = start(cluster, session, Arc::new(LogPublisher), ReconcilerConfig::default());
//! handle.shutdown().await?;
//! ```

mod backoff;
mod config;
mod error;
pub mod memory;
mod planner;
mod ports;
mod publish;
mod reconciler;
mod replicaset;
mod space;
mod topology;

pub use backoff::Backoff;
pub use config::{
    ReconcilerConfig, DEFAULT_INITIAL_RETRY_INTERVAL, DEFAULT_MAX_RETRY_INTERVAL,
    DEFAULT_POLL_INTERVAL,
};
pub use error::{ConfigError, PortError, ReconcileError};
pub use planner::{plan, PlanInput, TargetPlan, VoteChanges};
pub use ports::{ChangeFeed, ClusterState, PublishInfo, Publisher, ReplicaSetSession};
pub use reconciler::{start, Phase, ReconcilerHandle, StopHandle};
pub use replicaset::{normalized, MemberState, MemberStatus, ReplicaSetMember, MAX_VOTERS, NODE_TAG};
pub use space::{common_spaces, replication_address, SpaceResolver, SpaceState};
pub use topology::{Address, ControllerNode, HostPort, InstanceId, NodeHealth, NodeId, SpaceName};
