//! The reconciliation loop.
//!
//! One task owns the loop. Each pass reads cluster state and the replica
//! set, plans a target, applies it, persists the resulting votes and hands
//! the client addresses to the publish task:
//!
//! ```text
//!  Idle ──change/poll──▶ Planning ──▶ Applying ──▶ Persisting ──▶ Publishing ──▶ Idle
//!                            ▲            │
//!                            └──change────┘ (stale plan abandoned)
//! ```
//!
//! Failures to read state, to resolve an instance id, or to persist a
//! promotion end the loop with a [`ReconcileError`]. Failures to apply
//! members or to publish are retried with backoff and never end it.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::planner::{self, PlanInput, TargetPlan};
use crate::ports::{ChangeFeed, ClusterState, PublishInfo, Publisher, ReplicaSetSession};
use crate::publish;
use crate::space::{SpaceResolver, SpaceState};
use crate::{ControllerNode, ReconcileError, ReconcilerConfig};

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Planning,
    Applying,
    Persisting,
    Publishing,
    Exited,
}

/// Handle to a running reconciler.
///
/// Dropping the handle stops the loop, unless a [`StopHandle`] taken from it
/// is still alive.
pub struct ReconcilerHandle {
    stop: StopHandle,
    phase: watch::Receiver<Phase>,
    task: JoinHandle<Result<(), ReconcileError>>,
}

impl ReconcilerHandle {
    /// Asks the loop to stop. Pending timers and retries are abandoned.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// A detached way to stop the loop while something else awaits
    /// [`wait`](Self::wait).
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Waits for the loop to exit. Returns `Ok(())` after a clean stop and
    /// the fatal error otherwise.
    pub async fn wait(self) -> Result<(), ReconcileError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ReconcileError::Task(e.to_string())),
        }
    }

    /// Stops the loop and waits for it.
    pub async fn shutdown(self) -> Result<(), ReconcileError> {
        self.stop();
        self.wait().await
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Stops a reconciler without owning its [`ReconcilerHandle`].
#[derive(Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

/// Starts the reconciler on the current tokio runtime.
///
/// The first pass runs immediately. Later passes follow change
/// notifications from `cluster` or the poll interval, whichever comes first.
pub fn start(
    cluster: Arc<dyn ClusterState>,
    session: Arc<dyn ReplicaSetSession>,
    publisher: Arc<dyn Publisher>,
    config: ReconcilerConfig,
) -> ReconcilerHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (phase_tx, phase_rx) = watch::channel(Phase::Idle);
    let (publish_tx, publish_rx) = watch::channel(None);

    let publish_task = publish::spawn(
        publisher,
        publish_rx,
        stop_rx.clone(),
        config.initial_retry_interval,
        config.max_retry_interval,
    );

    let reconciler = Reconciler {
        changes: cluster.watch_controller_nodes(),
        space: SpaceResolver::new(config.supports_spaces),
        cluster,
        session,
        config,
        stop: stop_rx,
        phase: phase_tx,
        publish: publish_tx,
    };

    let task = tokio::spawn(async move {
        let result = reconciler.run().await;
        if let Err(e) = publish_task.await {
            warn!("publish task failed: {e}");
        }
        result
    });

    ReconcilerHandle {
        stop: StopHandle(Arc::new(stop_tx)),
        phase: phase_rx,
        task,
    }
}

/// Resolves once `stop` reads true or its sender is gone.
pub(crate) async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

enum Wake {
    Changed,
    Poll,
    Stop,
}

enum PassOutcome {
    Complete,
    Superseded,
    Stopped,
}

enum ApplyOutcome {
    Applied,
    Superseded,
    Stopped,
}

struct Reconciler {
    cluster: Arc<dyn ClusterState>,
    session: Arc<dyn ReplicaSetSession>,
    config: ReconcilerConfig,
    space: SpaceResolver,
    changes: ChangeFeed,
    stop: watch::Receiver<bool>,
    phase: watch::Sender<Phase>,
    publish: watch::Sender<Option<PublishInfo>>,
}

impl Reconciler {
    async fn run(mut self) -> Result<(), ReconcileError> {
        let poll_interval = self.config.poll_interval;
        let mut poll = interval_at(Instant::now() + poll_interval, poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll = ?poll_interval,
            max_voters = self.config.max_voters,
            spaces = self.space.is_supported(),
            "peer-group reconciler started"
        );

        let result = loop {
            match self.pass().await {
                Ok(PassOutcome::Complete) => {}
                Ok(PassOutcome::Superseded) => continue,
                Ok(PassOutcome::Stopped) => break Ok(()),
                Err(e) => break Err(e),
            }

            poll.reset();
            self.set_phase(Phase::Idle);
            match self.idle(&mut poll).await {
                Ok(Wake::Changed) => debug!("controller nodes changed"),
                Ok(Wake::Poll) => debug!("poll interval elapsed"),
                Ok(Wake::Stop) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.set_phase(Phase::Exited);
        match &result {
            Ok(()) => info!("peer-group reconciler stopped"),
            Err(e) => error!("peer-group reconciler failed: {e}"),
        }
        result
    }

    async fn idle(&mut self, poll: &mut Interval) -> Result<Wake, ReconcileError> {
        tokio::select! {
            biased;
            _ = wait_for_stop(&mut self.stop) => Ok(Wake::Stop),
            changed = self.changes.changed() => match changed {
                Ok(()) => Ok(Wake::Changed),
                Err(_) => Err(ReconcileError::WatcherClosed),
            },
            _ = poll.tick() => Ok(Wake::Poll),
        }
    }

    async fn pass(&mut self) -> Result<PassOutcome, ReconcileError> {
        self.set_phase(Phase::Planning);
        // changes from here on trigger another pass
        self.changes.borrow_and_update();

        let nodes = self
            .cluster
            .controller_nodes()
            .await
            .map_err(ReconcileError::ControllerInfo)?;
        let statuses = self
            .session
            .current_status()
            .await
            .map_err(ReconcileError::ReplicaSetStatus)?;
        let members = self
            .session
            .current_members()
            .await
            .map_err(ReconcileError::ReplicaSetMembers)?;
        let space = self.resolve_space(&nodes).await;

        let target = planner::plan(PlanInput {
            nodes: &nodes,
            members: &members,
            statuses: &statuses,
            space: &space,
            max_voters: self.config.max_voters,
        });

        let in_effect = if !target.differs_from(&members) {
            debug!(members = members.len(), "replica set already matches");
            true
        } else if target.voter_count() == 0 {
            warn!(
                members = target.members.len(),
                "refusing to apply a replica set with no voters"
            );
            false
        } else {
            info!(
                members = target.members.len(),
                voters = target.voter_count(),
                "applying replica set change"
            );
            match self.apply(&target).await? {
                ApplyOutcome::Applied => true,
                ApplyOutcome::Superseded => return Ok(PassOutcome::Superseded),
                ApplyOutcome::Stopped => return Ok(PassOutcome::Stopped),
            }
        };

        if in_effect {
            self.persist_votes(&target, &nodes).await?;
        }
        self.publish(&nodes).await?;
        Ok(PassOutcome::Complete)
    }

    async fn resolve_space(&self, nodes: &[ControllerNode]) -> SpaceState {
        let stored = self.cluster.space_state().await;
        let next = self.space.resolve(&stored, nodes);
        if next == stored {
            return next;
        }

        match &next {
            SpaceState::Invalid => {
                warn!("no space holds an address for every controller; using primary addresses")
            }
            _ => info!(from = %stored, to = %next, "replication space resolved"),
        }
        if let Err(e) = self.cluster.set_space_state(next.clone()).await {
            warn!("cannot store space state {next}: {e}");
        }
        next
    }

    async fn apply(&mut self, target: &TargetPlan) -> Result<ApplyOutcome, ReconcileError> {
        self.set_phase(Phase::Applying);
        let mut backoff = Backoff::new(
            self.config.initial_retry_interval,
            self.config.max_retry_interval,
        );

        loop {
            let err = match self.session.set_members(target.members.clone()).await {
                Ok(()) => return Ok(ApplyOutcome::Applied),
                Err(e) => e,
            };
            let delay = backoff.next_delay();
            warn!(retry_in = ?delay, "cannot set replica set members: {err}");

            tokio::select! {
                biased;
                _ = wait_for_stop(&mut self.stop) => return Ok(ApplyOutcome::Stopped),
                changed = self.changes.changed() => {
                    changed.map_err(|_| ReconcileError::WatcherClosed)?;
                    debug!("controller nodes changed; replanning");
                    return Ok(ApplyOutcome::Superseded);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Brings each node's persisted vote in line with the plan.
    ///
    /// Promotions must stick: the replica set already counts the vote. A
    /// failed demotion is only logged and picked up again next pass.
    async fn persist_votes(
        &self,
        target: &TargetPlan,
        nodes: &[ControllerNode],
    ) -> Result<(), ReconcileError> {
        let changes = target.vote_changes(nodes);
        if changes.is_empty() {
            return Ok(());
        }
        self.set_phase(Phase::Persisting);

        for node in &changes.added {
            self.cluster
                .set_has_vote(node, true)
                .await
                .map_err(|source| ReconcileError::VoteAdded {
                    node: node.clone(),
                    source,
                })?;
            info!(node = %node, "node gained vote");
        }
        for node in &changes.removed {
            match self.cluster.set_has_vote(node, false).await {
                Ok(()) => info!(node = %node, "node lost vote"),
                Err(e) => warn!(node = %node, "cannot clear voting status: {e}"),
            }
        }
        Ok(())
    }

    async fn publish(&self, nodes: &[ControllerNode]) -> Result<(), ReconcileError> {
        self.set_phase(Phase::Publishing);
        let mut sorted: Vec<&ControllerNode> = nodes.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut info = PublishInfo::default();
        for node in sorted {
            let id = self
                .cluster
                .instance_id(&node.id)
                .await
                .map_err(|source| ReconcileError::InstanceId {
                    node: node.id.clone(),
                    source,
                })?;
            info.servers.push(node.client_addrs.clone());
            info.instance_ids.push(id);
        }

        self.publish.send_if_modified(|current| {
            if current.as_ref() == Some(&info) {
                return false;
            }
            debug!(servers = info.servers.len(), "controller addresses changed");
            *current = Some(info);
            true
        });
        Ok(())
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }
}
