//! The per-partition replica object.
//!
//! One [`Replica`] exists per partition hosted by a process. It owns the
//! partition's local configuration (role + ballot), the role-specific
//! bookkeeping, and handles to the collaborators the reconfiguration
//! protocol touches. All of its state is mutated exclusively from the
//! partition's serial event loop ([`crate::executor::run_replica`]).

use std::rc::Rc;

use shoal_core::{Providers, TimeProvider};

use crate::collaborators::{PrepareList, StateMachine, WriteQueue, WritePipeline};
use crate::contexts::{PotentialSecondaryContext, SecondaryContext};
use crate::executor::{EventSender, ReplicaEvent, partition_hash};
use crate::meta::{MetaServerClient, ReplicationOptions};
use crate::primary::PrimaryState;
use crate::stub::{PeerTransport, ReplicaStub};
use crate::types::{AppInfo, Ballot, Decree, PartitionId, ReplicaConfiguration, Status};

/// Everything a replica needs wired in at construction time.
///
/// Collaborators are shared handles: the caller keeps its own clones (tests
/// inspect them; the hosting process routes through them).
pub struct ReplicaSetup<P: Providers> {
    /// The partition this replica serves.
    pub pid: PartitionId,
    /// Metadata of the app the partition belongs to.
    pub app_info: AppInfo,
    /// Protocol tunables.
    pub options: ReplicationOptions,
    /// The prepared-mutation window over the mutation log.
    pub prepare_list: Rc<dyn PrepareList>,
    /// The app state machine's durability view.
    pub app: Rc<dyn StateMachine>,
    /// Admission queue for pending client writes.
    pub write_queue: Rc<dyn WriteQueue>,
    /// Two-phase-commit hooks.
    pub pipeline: Rc<dyn WritePipeline>,
    /// Process-wide services.
    pub stub: Rc<dyn ReplicaStub>,
    /// Meta-service update client.
    pub meta: Rc<dyn MetaServerClient>,
    /// One-way peer messaging.
    pub peers: Rc<dyn PeerTransport>,
    /// Sender of the partition's own event queue, used to feed replies back
    /// into the serial loop.
    pub events: EventSender,
    /// Time and task providers.
    pub providers: P,
}

/// A partition's local replica.
pub struct Replica<P: Providers> {
    pub(crate) pid: PartitionId,
    pub(crate) partition_hash: u64,
    pub(crate) name: String,
    pub(crate) app_info: AppInfo,

    /// Authoritative local view: this replica's role and ballot.
    pub(crate) config: ReplicaConfiguration,
    /// Set while the replica is inactive as a self-induced quiesce for a
    /// reconfiguration, as opposed to an externally imposed removal.
    pub(crate) inactive_is_transient: bool,
    pub(crate) last_config_change_time_ms: u64,

    pub(crate) primary_states: PrimaryState,
    pub(crate) secondary_states: SecondaryContext,
    pub(crate) potential_secondary_states: PotentialSecondaryContext,

    pub(crate) prepare_list: Rc<dyn PrepareList>,
    pub(crate) app: Rc<dyn StateMachine>,
    pub(crate) pipeline: Rc<dyn WritePipeline>,
    pub(crate) stub: Rc<dyn ReplicaStub>,
    pub(crate) meta: Rc<dyn MetaServerClient>,
    pub(crate) peers: Rc<dyn PeerTransport>,

    pub(crate) events: EventSender,
    pub(crate) providers: P,
    pub(crate) options: ReplicationOptions,

    pub(crate) closing: bool,
}

impl<P: Providers> Replica<P> {
    /// Create a replica in the inactive state at ballot zero.
    pub fn new(setup: ReplicaSetup<P>) -> Self {
        let name = format!("{}@{}", setup.pid, setup.stub.primary_address());
        let now_ms = setup.providers.time().now().as_millis() as u64;

        Self {
            pid: setup.pid,
            partition_hash: partition_hash(setup.pid),
            name,
            app_info: setup.app_info,
            config: ReplicaConfiguration {
                pid: setup.pid,
                ballot: Ballot::ZERO,
                status: Status::Inactive,
                learner_signature: None,
            },
            inactive_is_transient: false,
            last_config_change_time_ms: now_ms,
            primary_states: PrimaryState::new(setup.pid, setup.write_queue),
            secondary_states: SecondaryContext::new(),
            potential_secondary_states: PotentialSecondaryContext::new(),
            prepare_list: setup.prepare_list,
            app: setup.app,
            pipeline: setup.pipeline,
            stub: setup.stub,
            meta: setup.meta,
            peers: setup.peers,
            events: setup.events,
            providers: setup.providers,
            options: setup.options,
            closing: false,
        }
    }

    /// Dispatch one event. Must run on the partition's serial executor.
    pub fn handle_event(&mut self, event: ReplicaEvent) {
        match event {
            ReplicaEvent::ConfigProposal(proposal) => self.on_config_proposal(proposal),
            ReplicaEvent::ConfigSync(config) => self.on_config_sync(config),
            ReplicaEvent::RemoveReplica(config) => self.on_remove(config),
            ReplicaEvent::LearnerReady { node } => self.upgrade_to_secondary_on_primary(node),
            ReplicaEvent::MetaReply { request, reply } => {
                self.on_update_configuration_on_meta_server_reply(request, reply);
            }
        }

        debug_assert!(
            !self.inactive_is_transient || self.status() == Status::Inactive,
            "transient flag may only be set while inactive"
        );
    }

    /// The partition this replica serves.
    pub fn pid(&self) -> PartitionId {
        self.pid
    }

    /// Hash of the partition id, identifying its serial executor.
    pub fn partition_hash(&self) -> u64 {
        self.partition_hash
    }

    /// The replica's current ballot.
    pub fn ballot(&self) -> Ballot {
        self.config.ballot
    }

    /// The replica's current role.
    pub fn status(&self) -> Status {
        self.config.status
    }

    /// The replica's local configuration.
    pub fn config(&self) -> &ReplicaConfiguration {
        &self.config
    }

    /// Whether the replica is inactive as a reconfiguration quiesce.
    pub fn inactive_is_transient(&self) -> bool {
        self.inactive_is_transient
    }

    /// Primary-side bookkeeping (meaningful while primary or mid-quiesce).
    pub fn primary_states(&self) -> &PrimaryState {
        &self.primary_states
    }

    /// Whether the replica entered a closing state and awaits teardown.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Highest decree committed through two-phase commit.
    pub fn last_committed_decree(&self) -> Decree {
        self.prepare_list.last_committed_decree()
    }

    /// Highest decree that has been prepared.
    pub fn max_prepared_decree(&self) -> Decree {
        self.prepare_list.max_decree()
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.providers.time().now().as_millis() as u64
    }
}

impl<P: Providers> std::fmt::Debug for Replica<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("ballot", &self.ballot())
            .field("inactive_is_transient", &self.inactive_is_transient)
            .field("closing", &self.closing)
            .finish()
    }
}
