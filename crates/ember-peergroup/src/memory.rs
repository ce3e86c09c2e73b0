//! In-memory implementations of the ports.
//!
//! Used by the `ember-peergroupd` binary for dry runs and by tests. Each
//! fake can share a [`Faults`] table that makes chosen calls fail, and counts
//! every call it receives.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;

use crate::ports::{ChangeFeed, ClusterState, PublishInfo, Publisher, ReplicaSetSession};
use crate::replicaset::{normalized, MemberState, MemberStatus, ReplicaSetMember};
use crate::space::SpaceState;
use crate::{ControllerNode, InstanceId, NodeId, PortError};

/// A port call that faults can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ControllerNodes,
    InstanceId,
    SetHasVote,
    SetSpaceState,
    CurrentStatus,
    CurrentMembers,
    SetMembers,
    Publish,
}

/// One injected failure.
///
/// Matches every call of `op` unless narrowed with [`node`](Fault::node),
/// [`vote`](Fault::vote) or limited with [`times`](Fault::times).
#[derive(Debug, Clone)]
pub struct Fault {
    op: Operation,
    node: Option<NodeId>,
    vote: Option<bool>,
    remaining: Option<usize>,
    message: String,
}

impl Fault {
    pub fn new(op: Operation, message: impl Into<String>) -> Self {
        Self {
            op,
            node: None,
            vote: None,
            remaining: None,
            message: message.into(),
        }
    }

    /// Only fail calls about this node.
    pub fn node(mut self, node: impl Into<NodeId>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Only fail `SetHasVote` calls that set this value.
    pub fn vote(mut self, vote: bool) -> Self {
        self.vote = Some(vote);
        self
    }

    /// Fail at most `n` times, then let calls through.
    pub fn times(mut self, n: usize) -> Self {
        self.remaining = Some(n);
        self
    }

    fn matches(&self, op: Operation, node: Option<&NodeId>, vote: Option<bool>) -> bool {
        self.op == op
            && self.remaining != Some(0)
            && self.node.as_ref().map_or(true, |n| Some(n) == node)
            && self.vote.map_or(true, |v| Some(v) == vote)
    }
}

#[derive(Debug, Default)]
struct FaultsInner {
    rules: Vec<Fault>,
    calls: HashMap<Operation, usize>,
}

/// Shared failure table and call counters.
#[derive(Debug, Default)]
pub struct Faults {
    inner: Mutex<FaultsInner>,
}

impl Faults {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().rules.push(fault);
    }

    /// Removes every injected fault. Call counters are kept.
    pub fn clear(&self) {
        self.lock().rules.clear();
    }

    /// Number of calls of `op` seen so far, failed ones included.
    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    fn check(
        &self,
        op: Operation,
        node: Option<&NodeId>,
        vote: Option<bool>,
    ) -> Result<(), PortError> {
        let mut inner = self.lock();
        *inner.calls.entry(op).or_default() += 1;
        let Some(rule) = inner.rules.iter_mut().find(|r| r.matches(op, node, vote)) else {
            return Ok(());
        };
        if let Some(n) = rule.remaining.as_mut() {
            *n -= 1;
        }
        Err(PortError::failed(rule.message.clone()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FaultsInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Default)]
struct ClusterInner {
    nodes: BTreeMap<NodeId, ControllerNode>,
    instance_ids: HashMap<NodeId, InstanceId>,
    space: SpaceState,
}

/// Cluster state held in memory.
///
/// Every node mutation, including `set_has_vote`, bumps the change feed.
pub struct MemoryClusterState {
    inner: Mutex<ClusterInner>,
    changes: watch::Sender<u64>,
    faults: Arc<Faults>,
}

impl Default for MemoryClusterState {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClusterState {
    pub fn new() -> Self {
        Self::with_faults(Faults::new())
    }

    pub fn with_faults(faults: Arc<Faults>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Mutex::new(ClusterInner::default()),
            changes,
            faults,
        }
    }

    pub fn faults(&self) -> &Arc<Faults> {
        &self.faults
    }

    /// Adds or replaces a node. Its instance id defaults to `id-<node>`.
    pub fn add_node(&self, node: ControllerNode) {
        {
            let mut inner = self.lock();
            inner
                .instance_ids
                .entry(node.id.clone())
                .or_insert_with(|| InstanceId::new(format!("id-{}", node.id)));
            inner.nodes.insert(node.id.clone(), node);
        }
        self.notify();
    }

    pub fn remove_node(&self, id: &NodeId) -> Option<ControllerNode> {
        let removed = self.lock().nodes.remove(id);
        if removed.is_some() {
            self.notify();
        }
        removed
    }

    /// Applies `f` to a node. Returns false if the node is unknown.
    pub fn update_node(&self, id: &NodeId, f: impl FnOnce(&mut ControllerNode)) -> bool {
        let found = match self.lock().nodes.get_mut(id) {
            Some(node) => {
                f(node);
                true
            }
            None => false,
        };
        if found {
            self.notify();
        }
        found
    }

    pub fn node(&self, id: &NodeId) -> Option<ControllerNode> {
        self.lock().nodes.get(id).cloned()
    }

    pub fn nodes(&self) -> Vec<ControllerNode> {
        self.lock().nodes.values().cloned().collect()
    }

    pub fn set_instance_id(&self, node: impl Into<NodeId>, id: impl Into<InstanceId>) {
        self.lock().instance_ids.insert(node.into(), id.into());
    }

    /// The stored space state, read without going through faults.
    pub fn current_space_state(&self) -> SpaceState {
        self.lock().space.clone()
    }

    /// Overwrites the stored space state, as an operator would.
    pub fn store_space_state(&self, state: SpaceState) {
        self.lock().space = state;
    }

    /// Fires the change feed without changing anything.
    pub fn notify(&self) {
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ClusterState for MemoryClusterState {
    async fn controller_nodes(&self) -> Result<Vec<ControllerNode>, PortError> {
        self.faults.check(Operation::ControllerNodes, None, None)?;
        Ok(self.nodes())
    }

    fn watch_controller_nodes(&self) -> ChangeFeed {
        self.changes.subscribe()
    }

    async fn instance_id(&self, node: &NodeId) -> Result<InstanceId, PortError> {
        self.faults.check(Operation::InstanceId, Some(node), None)?;
        self.lock()
            .instance_ids
            .get(node)
            .cloned()
            .ok_or_else(|| PortError::NodeNotFound(node.clone()))
    }

    async fn set_has_vote(&self, node: &NodeId, has_vote: bool) -> Result<(), PortError> {
        self.faults
            .check(Operation::SetHasVote, Some(node), Some(has_vote))?;
        if self.update_node(node, |n| n.has_vote = has_vote) {
            Ok(())
        } else {
            Err(PortError::NodeNotFound(node.clone()))
        }
    }

    async fn space_state(&self) -> SpaceState {
        self.current_space_state()
    }

    async fn set_space_state(&self, state: SpaceState) -> Result<(), PortError> {
        self.faults.check(Operation::SetSpaceState, None, None)?;
        self.store_space_state(state);
        Ok(())
    }
}

/// A replica-set session held in memory.
pub struct MemorySession {
    members: watch::Sender<Vec<ReplicaSetMember>>,
    statuses: Mutex<Vec<MemberStatus>>,
    attempts: Mutex<Vec<Instant>>,
    instantly_ready: bool,
    faults: Arc<Faults>,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl MemorySession {
    pub fn new(members: Vec<ReplicaSetMember>, statuses: Vec<MemberStatus>) -> Self {
        let (tx, _) = watch::channel(normalized(&members));
        Self {
            members: tx,
            statuses: Mutex::new(statuses),
            attempts: Mutex::new(Vec::new()),
            instantly_ready: false,
            faults: Faults::new(),
        }
    }

    pub fn with_faults(mut self, faults: Arc<Faults>) -> Self {
        self.faults = faults;
        self
    }

    /// Members added by `set_members` immediately report as healthy
    /// secondaries, as if they caught up at once.
    pub fn instantly_ready(mut self) -> Self {
        self.instantly_ready = true;
        self
    }

    pub fn faults(&self) -> &Arc<Faults> {
        &self.faults
    }

    pub fn members(&self) -> Vec<ReplicaSetMember> {
        self.members.borrow().clone()
    }

    /// Overwrites the member list directly, bypassing faults and readiness.
    pub fn replace_members(&self, members: Vec<ReplicaSetMember>) {
        self.members.send_replace(normalized(&members));
    }

    pub fn statuses(&self) -> Vec<MemberStatus> {
        lock(&self.statuses).clone()
    }

    pub fn set_statuses(&self, statuses: Vec<MemberStatus>) {
        *lock(&self.statuses) = statuses;
    }

    /// When each `set_members` call arrived, failed ones included.
    pub fn set_members_attempts(&self) -> Vec<Instant> {
        lock(&self.attempts).clone()
    }
}

#[async_trait]
impl ReplicaSetSession for MemorySession {
    async fn current_status(&self) -> Result<Vec<MemberStatus>, PortError> {
        self.faults.check(Operation::CurrentStatus, None, None)?;
        Ok(self.statuses())
    }

    async fn current_members(&self) -> Result<Vec<ReplicaSetMember>, PortError> {
        self.faults.check(Operation::CurrentMembers, None, None)?;
        Ok(self.members())
    }

    async fn set_members(&self, members: Vec<ReplicaSetMember>) -> Result<(), PortError> {
        lock(&self.attempts).push(Instant::now());
        self.faults.check(Operation::SetMembers, None, None)?;

        let members = normalized(&members);
        {
            let mut statuses = lock(&self.statuses);
            statuses.retain(|s| members.iter().any(|m| m.id == s.id));
            if self.instantly_ready {
                for m in &members {
                    if !statuses.iter().any(|s| s.id == m.id) {
                        statuses.push(MemberStatus {
                            id: m.id,
                            address: m.address.clone(),
                            healthy: true,
                            state: MemberState::Secondary,
                        });
                    }
                }
                statuses.sort_by_key(|s| s.id);
            }
        }
        self.members.send_replace(members);
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Records every publish in memory.
pub struct MemoryPublisher {
    published: watch::Sender<Vec<PublishInfo>>,
    faults: Arc<Faults>,
}

impl Default for MemoryPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::with_faults(Faults::new())
    }

    pub fn with_faults(faults: Arc<Faults>) -> Self {
        let (published, _) = watch::channel(Vec::new());
        Self { published, faults }
    }

    pub fn faults(&self) -> &Arc<Faults> {
        &self.faults
    }

    /// Successful publishes, oldest first.
    pub fn published(&self) -> Vec<PublishInfo> {
        self.published.borrow().clone()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, info: &PublishInfo) -> Result<(), PortError> {
        self.faults.check(Operation::Publish, None, None)?;
        self.published.send_modify(|all| all.push(info.clone()));
        Ok(())
    }
}

/// Adapts a closure into a [`Publisher`].
pub struct FnPublisher<F>(pub F);

#[async_trait]
impl<F> Publisher for FnPublisher<F>
where
    F: Fn(&PublishInfo) -> Result<(), PortError> + Send + Sync,
{
    async fn publish(&self, info: &PublishInfo) -> Result<(), PortError> {
        (self.0)(info)
    }
}

/// Logs each address set instead of delivering it anywhere.
#[derive(Debug, Default)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, info: &PublishInfo) -> Result<(), PortError> {
        for (servers, id) in info.servers.iter().zip(&info.instance_ids) {
            let addrs: Vec<String> = servers.iter().map(ToString::to_string).collect();
            info!(instance = %id, addrs = ?addrs, "controller addresses");
        }
        Ok(())
    }
}
