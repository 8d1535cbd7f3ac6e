//! Shared fixtures for the crate's unit tests.

use std::rc::Rc;
use std::time::Duration;

use shoal_core::{ManualProviders, NodeAddress, Providers};

use crate::collaborators::{
    InMemoryPrepareList, InMemoryStateMachine, InMemoryWritePipeline, InMemoryWriteQueue,
};
use crate::executor::{EventReceiver, PartitionScope, ReplicaEvent, replica_channel};
use crate::meta::{InMemoryMetaServer, ReplicationOptions};
use crate::replica::{Replica, ReplicaSetup};
use crate::stub::{InMemoryPeerTransport, InMemoryReplicaStub};
use crate::types::{
    AppInfo, Ballot, Decree, PartitionConfiguration, PartitionId, ReplicaConfiguration, Status,
};

pub(crate) const SELF_PORT: u16 = 34801;
pub(crate) const META_PORT: u16 = 34601;
pub(crate) const TEST_PID: PartitionId = PartitionId::new(1, 0);

pub(crate) fn addr(port: u16) -> NodeAddress {
    NodeAddress::parse(&format!("10.0.0.1:{port}")).expect("parse")
}

pub(crate) fn app_info() -> AppInfo {
    AppInfo {
        app_id: 1,
        app_name: "temp".to_string(),
        app_type: "simple_kv".to_string(),
        partition_count: 8,
    }
}

/// Build a membership record for the test partition. `primary = None` means
/// the unassigned (invalid) sentinel.
pub(crate) fn partition_config(
    ballot: u64,
    primary: Option<u16>,
    secondaries: &[u16],
) -> PartitionConfiguration {
    PartitionConfiguration {
        pid: TEST_PID,
        ballot: Ballot::new(ballot),
        primary: primary.map(addr).unwrap_or_else(NodeAddress::invalid),
        secondaries: secondaries.iter().map(|p| addr(*p)).collect(),
        max_replica_count: 3,
        last_committed_decree: Decree::ZERO,
    }
}

/// The meta service's record for a partition nobody serves yet.
pub(crate) fn unassigned_config() -> PartitionConfiguration {
    partition_config(1, None, &[])
}

/// A replica wired to in-memory collaborators and hand-cranked providers.
pub(crate) struct TestReplica {
    pub replica: Replica<ManualProviders>,
    pub providers: ManualProviders,
    pub stub: Rc<InMemoryReplicaStub>,
    pub peers: Rc<InMemoryPeerTransport>,
    pub meta: Rc<InMemoryMetaServer>,
    pub pipeline: Rc<InMemoryWritePipeline>,
    pub prepare_list: Rc<InMemoryPrepareList>,
    pub app: Rc<InMemoryStateMachine>,
    pub write_queue: Rc<InMemoryWriteQueue>,
    pub events_rx: EventReceiver,
}

impl TestReplica {
    pub fn new() -> Self {
        let providers = ManualProviders::new();
        let stub = Rc::new(InMemoryReplicaStub::new(addr(SELF_PORT), addr(META_PORT)));
        let peers = Rc::new(InMemoryPeerTransport::new());
        let meta = Rc::new(InMemoryMetaServer::new(unassigned_config()));
        let pipeline = Rc::new(InMemoryWritePipeline::new());
        let prepare_list = Rc::new(InMemoryPrepareList::new(Decree::ZERO));
        let app = Rc::new(InMemoryStateMachine::new(Decree::ZERO, Decree::ZERO));
        let write_queue = Rc::new(InMemoryWriteQueue::default());
        let (events, events_rx) = replica_channel();

        let replica = Replica::new(ReplicaSetup {
            pid: TEST_PID,
            app_info: app_info(),
            options: ReplicationOptions::default(),
            prepare_list: prepare_list.clone(),
            app: app.clone(),
            write_queue: write_queue.clone(),
            pipeline: pipeline.clone(),
            stub: stub.clone(),
            meta: meta.clone(),
            peers: peers.clone(),
            events,
            providers: providers.clone(),
        });

        Self {
            replica,
            providers,
            stub,
            peers,
            meta,
            pipeline,
            prepare_list,
            app,
            write_queue,
            events_rx,
        }
    }

    /// Enter the replica's partition scope.
    pub fn scope(&self) -> PartitionScope {
        PartitionScope::enter(self.replica.partition_hash())
    }

    /// Dispatch one event within the partition scope.
    pub fn handle(&mut self, event: ReplicaEvent) {
        let _scope = self.scope();
        self.replica.handle_event(event);
    }

    /// Drain queued events and poll spawned tasks until nothing progresses.
    pub fn pump(&mut self) {
        loop {
            let mut progressed = false;
            while let Ok(event) = self.events_rx.try_recv() {
                let _scope = PartitionScope::enter(self.replica.partition_hash());
                self.replica.handle_event(event);
                progressed = true;
            }
            if self.providers.task().poll() > 0 {
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    /// Advance the hand-cranked clock, then pump.
    pub fn advance(&mut self, duration: Duration) {
        self.providers.time().advance(duration);
        self.pump();
    }

    /// Force a local `(status, ballot)` directly through the transition
    /// engine, arranging the transient flag where the gate demands it.
    pub fn install_local(&mut self, status: Status, ballot: u64) {
        let config = ReplicaConfiguration {
            pid: TEST_PID,
            ballot: Ballot::new(ballot),
            status,
            learner_signature: None,
        };

        let _scope = self.scope();
        if matches!(status, Status::Primary | Status::Secondary)
            && self.replica.status() == Status::Inactive
        {
            self.replica.inactive_is_transient = true;
        }
        self.replica.update_local_configuration(config, true);
        assert_eq!(self.replica.status(), status, "install_local did not stick");
    }

    /// Make this node the primary of `ballot` with the given secondaries,
    /// and align the meta server's record with it.
    pub fn install_membership(&mut self, ballot: u64, secondaries: &[u16]) -> PartitionConfiguration {
        let config = partition_config(ballot, Some(SELF_PORT), secondaries);

        {
            let _scope = self.scope();
            if self.replica.status() == Status::Inactive {
                self.replica.inactive_is_transient = true;
            }
            assert!(
                self.replica.update_configuration(config.clone()),
                "install_membership was refused"
            );
        }
        assert_eq!(self.replica.status(), Status::Primary);

        self.meta.set_config(config.clone());
        config
    }
}
