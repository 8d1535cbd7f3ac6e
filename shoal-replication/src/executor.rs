//! Per-partition serial execution.
//!
//! Every input to the reconfiguration core — proposals, config syncs, remove
//! requests, learner completions, meta-service replies — is a
//! [`ReplicaEvent`] delivered to the partition's event loop
//! ([`run_replica`]). The loop dispatches one event at a time and each
//! handler runs to completion, so replica state is only ever touched from a
//! single logical strand:
//!
//! ```text
//!  meta service ──┐
//!  peer replicas ─┤                  ┌────────────────────────┐
//!  learning ──────┼──► event queue ──► run_replica (serial)   │
//!  spawned tasks ─┘                  │   one event at a time  │
//!                                    └────────────────────────┘
//! ```
//!
//! Asynchronous work (the meta-update RPC and its delayed retry) runs as
//! spawned provider tasks whose completion re-enters the queue as a
//! [`ReplicaEvent::MetaReply`] — callbacks are message passing, never
//! re-entrant calls.
//!
//! Handlers defend the discipline with [`check_hashed_access`]: a
//! thread-local scope keyed by a hash of the [`PartitionId`], entered by the
//! loop before dispatching. Calling a handler outside its partition's scope
//! is a wiring bug and panics.

use std::cell::Cell;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::rc::Rc;

use shoal_core::Providers;
use tokio::sync::mpsc;

use crate::replica::Replica;
use crate::types::{
    ConfigurationUpdateRequest, ConfigurationUpdateResponse, PartitionConfiguration, PartitionId,
    ReplicaConfiguration, ReplicationError,
};

/// An input to the reconfiguration core.
#[derive(Debug, Clone)]
pub enum ReplicaEvent {
    /// A configuration proposal from the meta service (or relayed by the
    /// current primary acting on its instructions).
    ConfigProposal(ConfigurationUpdateRequest),

    /// A periodic push of the authoritative configuration to a non-primary
    /// replica.
    ConfigSync(PartitionConfiguration),

    /// A one-way instruction from the primary to enter the inactive state.
    RemoveReplica(ReplicaConfiguration),

    /// The learning subsystem reports that a learner finished catching up
    /// and is ready to be promoted to secondary.
    LearnerReady {
        /// The learner node.
        node: shoal_core::NodeAddress,
    },

    /// Reply (or transport failure) of an outstanding meta-service update.
    ///
    /// The request is shared with the in-flight task so a retry reuses the
    /// identical payload.
    MetaReply {
        /// The request this reply answers.
        request: Rc<ConfigurationUpdateRequest>,
        /// Transport-level result; server-side status is inside the response.
        reply: Result<ConfigurationUpdateResponse, ReplicationError>,
    },
}

/// Sending half of a partition's event queue.
pub type EventSender = mpsc::UnboundedSender<ReplicaEvent>;

/// Receiving half of a partition's event queue.
pub type EventReceiver = mpsc::UnboundedReceiver<ReplicaEvent>;

/// Create the event queue for one partition.
pub fn replica_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Hash a partition id to its executor key.
pub fn partition_hash(pid: PartitionId) -> u64 {
    let mut hasher = DefaultHasher::new();
    pid.hash(&mut hasher);
    hasher.finish()
}

thread_local! {
    static CURRENT_PARTITION: Cell<Option<u64>> = const { Cell::new(None) };
}

/// RAII guard marking the current thread as executing for one partition.
///
/// Entered by [`run_replica`] around each dispatch; tests driving handlers
/// directly must enter it themselves. Nesting restores the previous scope on
/// drop.
pub struct PartitionScope {
    previous: Option<u64>,
}

impl PartitionScope {
    /// Enter the scope for the partition hashed to `hash`.
    pub fn enter(hash: u64) -> Self {
        let previous = CURRENT_PARTITION.replace(Some(hash));
        Self { previous }
    }
}

impl Drop for PartitionScope {
    fn drop(&mut self) {
        CURRENT_PARTITION.set(self.previous);
    }
}

/// Assert that the caller is running within the scope of the partition
/// hashed to `hash`.
///
/// # Panics
///
/// Panics when called outside the partition's scope.
pub fn check_hashed_access(hash: u64) {
    let current = CURRENT_PARTITION.get();
    assert_eq!(
        current,
        Some(hash),
        "replica handler invoked off its partition executor (expected partition hash {hash}, current scope {current:?})"
    );
}

/// Run the partition's serial event loop until the queue closes or the
/// replica starts closing.
///
/// This is the only place events are dispatched in production; it enters
/// the partition scope around every dispatch.
pub async fn run_replica<P: Providers>(mut replica: Replica<P>, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        let scope = PartitionScope::enter(replica.partition_hash());
        replica.handle_event(event);
        drop(scope);

        if replica.is_closing() {
            break;
        }
    }
}
