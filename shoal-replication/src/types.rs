//! Core types for partition membership and reconfiguration.
//!
//! This module defines the building blocks used throughout the replication
//! crate:
//!
//! - [`Ballot`]: monotonically increasing configuration epoch per partition
//! - [`Decree`]: monotonically increasing write sequence number per partition
//! - [`LearnerSignature`]: nonce identifying one learning session
//! - [`PartitionId`]: identifies one replication group
//! - [`Status`]: a replica's local role within its group
//! - [`PartitionConfiguration`]: the meta service's authoritative membership
//! - [`ReplicaConfiguration`]: one node's projection of a membership record
//! - [`ConfigurationUpdateRequest`]: the reconfiguration proposal envelope
//! - [`ReplicationError`]: transport-level error type

use serde::{Deserialize, Serialize};
use shoal_core::NodeAddress;

/// Ballot — a monotonically increasing configuration epoch.
///
/// Each partition's membership is versioned by a ballot. A higher ballot
/// always takes precedence over a lower one, which is what lets every
/// handler drop stale or duplicated messages by a single comparison.
///
/// # Invariants
///
/// - A replica's local ballot never decreases.
/// - The meta service is the sole authority for issuing new ballots; a
///   replica only ever *proposes* `local + 1`.
/// - `Ballot::ZERO` means the partition is uninitialized.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Ballot(pub u64);

impl Ballot {
    /// The initial ballot (0), representing "not configured yet."
    pub const ZERO: Self = Self(0);

    /// Create a new ballot.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Get the next ballot.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Ballot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ballot({})", self.0)
    }
}

/// Decree — a position in the partition's write sequence.
///
/// Assigned by the primary when a mutation enters two-phase commit; the
/// committed prefix of the decree sequence is what secondaries replicate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Decree(pub u64);

impl Decree {
    /// The decree before any write (0).
    pub const ZERO: Self = Self(0);

    /// Create a new decree.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Get the next sequential decree.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Decree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "decree({})", self.0)
    }
}

/// Nonce identifying one learning session between a primary and a candidate.
///
/// Issued monotonically by the primary; a learner echoes it back so the
/// primary can tell a live session's traffic from a superseded one's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LearnerSignature(pub u64);

impl std::fmt::Display for LearnerSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sig({:#x})", self.0)
    }
}

/// Identifies one replication group: a partition of an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionId {
    /// The app this partition belongs to.
    pub app_id: u32,
    /// Index of the partition within the app.
    pub partition_index: u32,
}

impl PartitionId {
    /// Create a new partition id.
    pub const fn new(app_id: u32, partition_index: u32) -> Self {
        Self {
            app_id,
            partition_index,
        }
    }
}

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.app_id, self.partition_index)
    }
}

/// A replica's local role within its replication group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Serving writes and driving two-phase commit for the group.
    Primary,
    /// Acknowledging prepares from the primary.
    Secondary,
    /// Learning (catching up from logs/snapshots) before becoming secondary.
    PotentialSecondary,
    /// Not participating. Reached both by external removal and by the
    /// self-imposed quiesce during a reconfiguration (see
    /// `inactive_is_transient` on the replica).
    Inactive,
    /// Failed; terminal until the replica is recycled.
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Primary => "primary",
            Status::Secondary => "secondary",
            Status::PotentialSecondary => "potential-secondary",
            Status::Inactive => "inactive",
            Status::Error => "error",
        };
        f.write_str(s)
    }
}

/// The kind of membership edit a configuration proposal carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalType {
    /// Make the target node primary of an unassigned partition.
    AssignPrimary,
    /// Promote the target secondary to primary.
    UpgradeToPrimary,
    /// Start learning on the target node so it can become a secondary.
    AddSecondary,
    /// Like [`AddSecondary`](Self::AddSecondary), but allowed to use one
    /// extra replica slot so the balancer can move a secondary without
    /// shrinking the group first.
    AddSecondaryForLb,
    /// Demote the primary to secondary.
    DowngradeToSecondary,
    /// Demote the target node to inactive.
    DowngradeToInactive,
    /// Promote a learner that finished catching up to secondary.
    UpgradeToSecondary,
    /// Remove the target node from the group.
    Remove,
}

impl std::fmt::Display for ProposalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProposalType::AssignPrimary => "assign-primary",
            ProposalType::UpgradeToPrimary => "upgrade-to-primary",
            ProposalType::AddSecondary => "add-secondary",
            ProposalType::AddSecondaryForLb => "add-secondary-for-lb",
            ProposalType::DowngradeToSecondary => "downgrade-to-secondary",
            ProposalType::DowngradeToInactive => "downgrade-to-inactive",
            ProposalType::UpgradeToSecondary => "upgrade-to-secondary",
            ProposalType::Remove => "remove",
        };
        f.write_str(s)
    }
}

/// The authoritative membership record of one partition, as held by the
/// meta service.
///
/// `secondaries` is ordered, contains no duplicates, and never contains
/// `primary`. An unassigned primary is the [`NodeAddress::invalid`] sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfiguration {
    /// The partition this record describes.
    pub pid: PartitionId,
    /// Configuration epoch.
    pub ballot: Ballot,
    /// The current primary, or the invalid sentinel when unassigned.
    pub primary: NodeAddress,
    /// The current secondaries.
    pub secondaries: Vec<NodeAddress>,
    /// Target replica count for the group.
    pub max_replica_count: u32,
    /// The primary's committed decree at the time this record was produced.
    pub last_committed_decree: Decree,
}

/// One node's view of a membership record: its role at a ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfiguration {
    /// The partition this record describes.
    pub pid: PartitionId,
    /// Configuration epoch.
    pub ballot: Ballot,
    /// The node's role.
    pub status: Status,
    /// Learning-session nonce, present only on configs sent to learners.
    pub learner_signature: Option<LearnerSignature>,
}

/// Project a [`PartitionConfiguration`] onto one node.
///
/// The node's status is `Primary` if it is the record's primary, `Secondary`
/// if it appears among the secondaries, and `Inactive` otherwise.
pub fn replica_config_for_node(
    config: &PartitionConfiguration,
    node: NodeAddress,
) -> ReplicaConfiguration {
    let status = if !config.primary.is_invalid() && config.primary == node {
        Status::Primary
    } else if config.secondaries.contains(&node) {
        Status::Secondary
    } else {
        Status::Inactive
    };

    ReplicaConfiguration {
        pid: config.pid,
        ballot: config.ballot,
        status,
        learner_signature: None,
    }
}

/// Remove `node` from `nodes`, returning whether it was present.
pub fn remove_node(nodes: &mut Vec<NodeAddress>, node: NodeAddress) -> bool {
    let before = nodes.len();
    nodes.retain(|n| *n != node);
    before != nodes.len()
}

/// App metadata carried on proposals and self-eviction requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    /// Numeric app id.
    pub app_id: u32,
    /// Human-readable app name.
    pub app_name: String,
    /// The storage-engine type backing the app.
    pub app_type: String,
    /// Number of partitions the app is split into.
    pub partition_count: u32,
}

/// A configuration proposal: the envelope delivered to a replica, and the
/// request body of the meta-service update RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationUpdateRequest {
    /// App metadata.
    pub info: AppInfo,
    /// The membership record the edit applies to (or proposes).
    pub config: PartitionConfiguration,
    /// The kind of edit.
    pub kind: ProposalType,
    /// The node the edit targets.
    pub node: NodeAddress,
}

/// Status returned by the meta service for a configuration update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaError {
    /// The update was accepted.
    Ok,
    /// The proposed ballot lost to a concurrent update. Terminal for this
    /// proposal: the response carries the winning configuration instead.
    InvalidVersion,
    /// The meta service is not serving (e.g. mid-failover). Retryable.
    NotActive,
    /// The meta service is overloaded. Retryable.
    Busy,
}

impl std::fmt::Display for MetaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetaError::Ok => "ok",
            MetaError::InvalidVersion => "invalid-version",
            MetaError::NotActive => "not-active",
            MetaError::Busy => "busy",
        };
        f.write_str(s)
    }
}

/// The meta service's reply to a configuration update.
///
/// On `Ok` the config echoes the accepted membership (with the new ballot);
/// on `InvalidVersion` it carries the authoritative membership that won.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationUpdateResponse {
    /// Outcome of the update.
    pub err: MetaError,
    /// The authoritative membership record.
    pub config: PartitionConfiguration,
}

/// Payload of the one-way RPC that tells a node to begin learning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCheckRequest {
    /// App metadata.
    pub app: AppInfo,
    /// The node being addressed.
    pub node: NodeAddress,
    /// The learner's projected configuration, carrying its signature.
    pub config: ReplicaConfiguration,
    /// The primary's committed decree, the learner's catch-up target.
    pub last_committed_decree: Decree,
}

/// A write moving through (or replayed into) two-phase commit.
///
/// The payload is opaque to the reconfiguration core; an empty payload is
/// the "empty write" the primary emits to fill a decree it must re-prepare
/// but has no logged mutation for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// The ballot the mutation is prepared under.
    pub ballot: Ballot,
    /// The mutation's position in the write sequence.
    pub decree: Decree,
    /// Serialized client request(s), empty for an empty write.
    pub payload: Vec<u8>,
}

impl Mutation {
    /// Create a mutation carrying a client payload.
    pub fn new(ballot: Ballot, decree: Decree, payload: Vec<u8>) -> Self {
        Self {
            ballot,
            decree,
            payload,
        }
    }

    /// Create an empty write for `decree`.
    pub fn empty_write(ballot: Ballot, decree: Decree) -> Self {
        Self {
            ballot,
            decree,
            payload: Vec::new(),
        }
    }

    /// Whether this is an empty write.
    pub fn is_empty_write(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Errors surfaced by collaborators at the replication boundary.
///
/// The reconfiguration core never returns these to its own callers; every
/// outcome of an event is a local state change, an outgoing message, or a
/// log line. Collaborator traits (the meta-service client in particular)
/// use this type for transport-level failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplicationError {
    /// Network/transport error.
    #[error("network error: {0}")]
    Network(String),

    /// The RPC timed out.
    #[error("rpc timed out")]
    Timeout,

    /// Serialization or deserialization error.
    #[error("codec error: {0}")]
    Codec(String),
}
