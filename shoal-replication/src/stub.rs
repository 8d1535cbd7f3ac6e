//! Process-wide services and peer messaging.
//!
//! A process hosts many partitions; the [`ReplicaStub`] is each replica's
//! handle to what the process shares across them: its own address, the
//! failure detector's view of the meta service, and the registry that
//! tracks replica lifecycle. The replica holds the stub as a shared handle,
//! never as an owner — the stub outlives every replica it serves.
//!
//! [`PeerTransport`] carries the two one-way messages replicas exchange:
//! the learn-start instruction and the remove instruction. One-way means
//! fire and forget; delivery failures surface, if at all, as the meta
//! service retrying the operation that caused the send.

use std::cell::{Cell, RefCell};

use shoal_core::NodeAddress;

use crate::types::{
    AppInfo, GroupCheckRequest, PartitionConfiguration, PartitionId, ReplicaConfiguration,
};

/// Process-wide services exposed to every replica.
pub trait ReplicaStub {
    /// This process's replica-service address — the identity replicas use
    /// in membership records.
    fn primary_address(&self) -> NodeAddress;

    /// Whether the process currently holds its connection to the meta
    /// service (failure-detector lease).
    fn is_connected(&self) -> bool;

    /// The current meta-service leader, per the failure detector.
    fn meta_server(&self) -> NodeAddress;

    /// Observe a replica's committed state transition.
    fn notify_replica_state_update(&self, config: &ReplicaConfiguration, is_closing: bool);

    /// Request asynchronous teardown of a replica that entered a closing
    /// state.
    fn begin_close_replica(&self, pid: PartitionId);

    /// Ask the meta service to drop this process's replica of the given
    /// partition (stranded-replica self-eviction).
    fn remove_replica_on_meta_server(&self, info: &AppInfo, config: &PartitionConfiguration);
}

/// One-way messages to peer replica servers.
pub trait PeerTransport {
    /// Tell `target` to begin learning.
    fn send_add_learner(&self, target: NodeAddress, request: GroupCheckRequest);

    /// Tell `target` to enter the inactive state.
    fn send_remove_replica(&self, target: NodeAddress, config: ReplicaConfiguration);
}

// =============================================================================
// In-memory implementations
// =============================================================================

#[derive(Debug, Default)]
struct StubRecords {
    notifications: Vec<(ReplicaConfiguration, bool)>,
    closed: Vec<PartitionId>,
    self_evictions: Vec<(AppInfo, PartitionConfiguration)>,
}

/// In-memory [`ReplicaStub`] with settable connection state and recorded
/// lifecycle calls.
#[derive(Debug)]
pub struct InMemoryReplicaStub {
    address: NodeAddress,
    meta_server: Cell<NodeAddress>,
    connected: Cell<bool>,
    records: RefCell<StubRecords>,
}

impl InMemoryReplicaStub {
    /// Create a connected stub for a process at `address`, pointing at
    /// `meta_server`.
    pub fn new(address: NodeAddress, meta_server: NodeAddress) -> Self {
        Self {
            address,
            meta_server: Cell::new(meta_server),
            connected: Cell::new(true),
            records: RefCell::new(StubRecords::default()),
        }
    }

    /// Flip the failure-detector connection state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.set(connected);
    }

    /// Point the failure detector at a different meta leader.
    pub fn set_meta_server(&self, meta_server: NodeAddress) {
        self.meta_server.set(meta_server);
    }

    /// State-update notifications observed so far.
    pub fn notifications(&self) -> Vec<(ReplicaConfiguration, bool)> {
        self.records.borrow().notifications.clone()
    }

    /// Partitions whose replicas requested teardown.
    pub fn closed(&self) -> Vec<PartitionId> {
        self.records.borrow().closed.clone()
    }

    /// Self-eviction requests observed so far.
    pub fn self_evictions(&self) -> Vec<(AppInfo, PartitionConfiguration)> {
        self.records.borrow().self_evictions.clone()
    }
}

impl ReplicaStub for InMemoryReplicaStub {
    fn primary_address(&self) -> NodeAddress {
        self.address
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    fn meta_server(&self) -> NodeAddress {
        self.meta_server.get()
    }

    fn notify_replica_state_update(&self, config: &ReplicaConfiguration, is_closing: bool) {
        self.records
            .borrow_mut()
            .notifications
            .push((config.clone(), is_closing));
    }

    fn begin_close_replica(&self, pid: PartitionId) {
        self.records.borrow_mut().closed.push(pid);
    }

    fn remove_replica_on_meta_server(&self, info: &AppInfo, config: &PartitionConfiguration) {
        self.records
            .borrow_mut()
            .self_evictions
            .push((info.clone(), config.clone()));
    }
}

/// In-memory [`PeerTransport`]: records every one-way send.
#[derive(Debug, Default)]
pub struct InMemoryPeerTransport {
    add_learner: RefCell<Vec<(NodeAddress, GroupCheckRequest)>>,
    removes: RefCell<Vec<(NodeAddress, ReplicaConfiguration)>>,
}

impl InMemoryPeerTransport {
    /// Create a transport with empty records.
    pub fn new() -> Self {
        Self::default()
    }

    /// Learn-start messages sent so far.
    pub fn add_learner_sends(&self) -> Vec<(NodeAddress, GroupCheckRequest)> {
        self.add_learner.borrow().clone()
    }

    /// Remove messages sent so far.
    pub fn remove_sends(&self) -> Vec<(NodeAddress, ReplicaConfiguration)> {
        self.removes.borrow().clone()
    }

    /// Take and clear every recorded send.
    pub fn drain(&self) {
        self.add_learner.borrow_mut().clear();
        self.removes.borrow_mut().clear();
    }
}

impl PeerTransport for InMemoryPeerTransport {
    fn send_add_learner(&self, target: NodeAddress, request: GroupCheckRequest) {
        self.add_learner.borrow_mut().push((target, request));
    }

    fn send_remove_replica(&self, target: NodeAddress, config: ReplicaConfiguration) {
        self.removes.borrow_mut().push((target, config));
    }
}
