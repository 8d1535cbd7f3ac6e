//! Primary-side bookkeeping.
//!
//! A replica carries a [`PrimaryState`] for its whole life, but the state
//! only holds meaning while the replica is primary — or sitting in the
//! transient-inactive quiesce between proposing a reconfiguration and
//! hearing back from the meta service. It caches the authoritative
//! membership, tracks every peer's role, owns the learner table, and holds
//! the handle of the one in-flight reconfiguration RPC.
//!
//! # Invariants
//!
//! - At most one reconfiguration task exists at any time; installing a new
//!   one first cancels any leftover handle.
//! - While the replica is primary, `membership.primary` is the replica's own
//!   address and `membership.ballot` equals the replica's ballot.
//! - Learner signatures are issued monotonically from `next_learning_version`
//!   and never reused for a different session.

use std::collections::HashMap;
use std::rc::Rc;

use shoal_core::{NodeAddress, TaskHandle};

use crate::collaborators::WriteQueue;
use crate::types::{
    Ballot, Decree, LearnerSignature, PartitionConfiguration, PartitionId, ReplicaConfiguration,
    Status,
};

/// What the primary knows about one learning session.
#[derive(Debug)]
pub struct RemoteLearnerState {
    /// Nonce identifying the session.
    pub signature: LearnerSignature,
    /// First decree the learner will receive prepares for, once known.
    pub prepare_start_decree: Option<Decree>,
    /// Timeout task armed by the learning subsystem, if any.
    pub timeout_task: Option<TaskHandle>,
}

/// Bookkeeping owned by the (current or about-to-be) primary of a partition.
pub struct PrimaryState {
    membership: PartitionConfiguration,
    statuses: HashMap<NodeAddress, Status>,
    learners: HashMap<NodeAddress, RemoteLearnerState>,
    next_learning_version: u64,
    pub(crate) reconfiguration_task: Option<TaskHandle>,
    pub(crate) last_prepare_decree_on_new_primary: Decree,
    pub(crate) write_queue: Rc<dyn WriteQueue>,
}

impl PrimaryState {
    /// Create empty bookkeeping for `pid`.
    pub fn new(pid: PartitionId, write_queue: Rc<dyn WriteQueue>) -> Self {
        Self {
            membership: PartitionConfiguration {
                pid,
                ballot: Ballot::ZERO,
                primary: NodeAddress::invalid(),
                secondaries: Vec::new(),
                max_replica_count: 0,
                last_committed_decree: Decree::ZERO,
            },
            statuses: HashMap::new(),
            learners: HashMap::new(),
            next_learning_version: 0,
            reconfiguration_task: None,
            last_prepare_decree_on_new_primary: Decree::ZERO,
            write_queue,
        }
    }

    /// The cached authoritative membership.
    pub fn membership(&self) -> &PartitionConfiguration {
        &self.membership
    }

    /// The role this primary last recorded for `node`, if any.
    pub fn node_status(&self, node: NodeAddress) -> Option<Status> {
        self.statuses.get(&node).copied()
    }

    /// The learner table.
    pub fn learners(&self) -> &HashMap<NodeAddress, RemoteLearnerState> {
        &self.learners
    }

    /// Mutable access to one learning session.
    pub fn learner_mut(&mut self, node: NodeAddress) -> Option<&mut RemoteLearnerState> {
        self.learners.get_mut(&node)
    }

    /// Whether a reconfiguration RPC (or its delayed retry) is outstanding.
    pub fn reconfiguration_in_flight(&self) -> bool {
        self.reconfiguration_task.is_some()
    }

    /// The prepare-list decree recorded when this node last won a
    /// primaryship (zero for a fresh assignment).
    pub fn last_prepare_decree_on_new_primary(&self) -> Decree {
        self.last_prepare_decree_on_new_primary
    }

    /// Whether `proposal_config` matches the cached membership exactly in
    /// ballot, pid, primary, and secondaries.
    pub(crate) fn membership_matches(&self, proposal_config: &PartitionConfiguration) -> bool {
        self.membership.ballot == proposal_config.ballot
            && self.membership.pid == proposal_config.pid
            && self.membership.primary == proposal_config.primary
            && self.membership.secondaries == proposal_config.secondaries
    }

    /// Issue a fresh learner signature.
    pub(crate) fn allocate_learner_signature(&mut self) -> LearnerSignature {
        self.next_learning_version += 1;
        LearnerSignature(self.next_learning_version)
    }

    /// Record a new learning session for `node` and return its signature.
    pub(crate) fn add_learner(&mut self, node: NodeAddress) -> LearnerSignature {
        let signature = self.allocate_learner_signature();
        self.learners.insert(
            node,
            RemoteLearnerState {
                signature,
                prepare_start_decree: None,
                timeout_task: None,
            },
        );
        self.statuses.insert(node, Status::PotentialSecondary);
        signature
    }

    /// Project the cached membership into the configuration sent to one
    /// group member, carrying `status` and the learning-session `signature`.
    pub(crate) fn replica_config_with_signature(
        &self,
        status: Status,
        signature: LearnerSignature,
    ) -> ReplicaConfiguration {
        ReplicaConfiguration {
            pid: self.membership.pid,
            ballot: self.membership.ballot,
            status,
            learner_signature: Some(signature),
        }
    }

    /// Install a new authoritative membership and rebuild the per-peer role
    /// map from it.
    ///
    /// Learning sessions survive: only learners that the new membership
    /// promotes to secondary are dropped. `clear_learners` drops the whole
    /// table first; no current caller passes `true` (the flag mirrors the
    /// `caller_is_new_primary` computation and is retained until its
    /// consumer is identified).
    pub(crate) fn reset_membership(
        &mut self,
        new_membership: &PartitionConfiguration,
        clear_learners: bool,
    ) {
        self.statuses.clear();
        if clear_learners {
            for (_, learner) in self.learners.drain() {
                if let Some(task) = learner.timeout_task {
                    task.cancel();
                }
            }
        }

        self.membership = new_membership.clone();

        if !self.membership.primary.is_invalid() {
            self.statuses.insert(self.membership.primary, Status::Primary);
        }
        for secondary in self.membership.secondaries.clone() {
            self.statuses.insert(secondary, Status::Secondary);
            if let Some(learner) = self.learners.remove(&secondary)
                && let Some(task) = learner.timeout_task
            {
                task.cancel();
            }
        }
        for node in self.learners.keys() {
            self.statuses.insert(*node, Status::PotentialSecondary);
        }
    }

    /// Tear down primary bookkeeping.
    ///
    /// `full` means this primaryship is over (demoted by a higher ballot, or
    /// failed): pending writes are dropped and learning sessions die with
    /// their timers. A non-full cleanup is the transient quiesce around a
    /// reconfiguration: learning sessions and queued writes survive it.
    /// Either way the peer-role map is cleared, any outstanding
    /// reconfiguration task is cancelled, and the cached membership ballot
    /// is invalidated until the next `reset_membership`.
    pub(crate) fn cleanup(&mut self, full: bool) {
        if full {
            self.write_queue.clear();
            for (_, learner) in self.learners.drain() {
                if let Some(task) = learner.timeout_task {
                    task.cancel();
                }
            }
        }
        self.statuses.clear();
        if let Some(task) = self.reconfiguration_task.take() {
            task.cancel();
        }
        self.membership.ballot = Ballot::ZERO;
    }
}

impl std::fmt::Debug for PrimaryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryState")
            .field("membership", &self.membership)
            .field("statuses", &self.statuses)
            .field("learners", &self.learners.keys())
            .field("next_learning_version", &self.next_learning_version)
            .field(
                "reconfiguration_in_flight",
                &self.reconfiguration_task.is_some(),
            )
            .finish()
    }
}
