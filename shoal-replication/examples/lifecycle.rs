//! Walk one replica through a full reconfiguration lifecycle.
//!
//! Wires a replica to the in-memory collaborators, then drives it from
//! unconfigured to primary, grows the group with a learner, and promotes
//! the learner to secondary — printing every state along the way.
//!
//! Run with:
//!
//! ```text
//! cargo run --example lifecycle
//! ```

use std::rc::Rc;

use shoal_core::{ManualProviders, NodeAddress, Providers};
use shoal_replication::collaborators::{
    InMemoryPrepareList, InMemoryStateMachine, InMemoryWritePipeline, InMemoryWriteQueue,
};
use shoal_replication::stub::{InMemoryPeerTransport, InMemoryReplicaStub};
use shoal_replication::{
    AppInfo, Ballot, Decree, EventReceiver, InMemoryMetaServer, PartitionConfiguration,
    PartitionId, PartitionScope, ProposalType, Replica, ReplicaEvent, ReplicaSetup,
    ReplicationOptions, replica_channel,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let pid = PartitionId::new(2, 3);
    let self_address = NodeAddress::parse("10.0.0.1:34801").expect("address");
    let meta_address = NodeAddress::parse("10.0.0.9:34601").expect("address");
    let candidate = NodeAddress::parse("10.0.0.2:34801").expect("address");

    let app_info = AppInfo {
        app_id: 2,
        app_name: "temp".to_string(),
        app_type: "simple_kv".to_string(),
        partition_count: 8,
    };

    // The meta service starts with an unassigned record at ballot 1.
    let unassigned = PartitionConfiguration {
        pid,
        ballot: Ballot::new(1),
        primary: NodeAddress::invalid(),
        secondaries: Vec::new(),
        max_replica_count: 3,
        last_committed_decree: Decree::ZERO,
    };

    let providers = ManualProviders::new();
    let stub = Rc::new(InMemoryReplicaStub::new(self_address, meta_address));
    let peers = Rc::new(InMemoryPeerTransport::new());
    let meta = Rc::new(InMemoryMetaServer::new(unassigned.clone()));
    let (events, events_rx) = replica_channel();

    let mut replica = Replica::new(ReplicaSetup {
        pid,
        app_info: app_info.clone(),
        options: ReplicationOptions::default(),
        prepare_list: Rc::new(InMemoryPrepareList::new(Decree::ZERO)),
        app: Rc::new(InMemoryStateMachine::new(Decree::ZERO, Decree::ZERO)),
        write_queue: Rc::new(InMemoryWriteQueue::default()),
        pipeline: Rc::new(InMemoryWritePipeline::new()),
        stub,
        meta: meta.clone(),
        peers: peers.clone(),
        events,
        providers: providers.clone(),
    });

    let step = |replica: &mut Replica<ManualProviders>,
                    events_rx: &mut EventReceiver,
                    event: ReplicaEvent| {
        let _scope = PartitionScope::enter(replica.partition_hash());
        replica.handle_event(event);
        loop {
            let mut progressed = providers.task().poll() > 0;
            while let Ok(queued) = events_rx.try_recv() {
                replica.handle_event(queued);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    };
    let mut events_rx = events_rx;

    // 1. The meta service proposes this node as primary.
    step(
        &mut replica,
        &mut events_rx,
        ReplicaEvent::ConfigProposal(shoal_replication::ConfigurationUpdateRequest {
            info: app_info.clone(),
            config: unassigned,
            kind: ProposalType::AssignPrimary,
            node: self_address,
        }),
    );
    println!(
        "after assign-primary: status={} ballot={}",
        replica.status(),
        replica.ballot()
    );

    // 2. The meta service asks the primary to grow the group.
    step(
        &mut replica,
        &mut events_rx,
        ReplicaEvent::ConfigProposal(shoal_replication::ConfigurationUpdateRequest {
            info: app_info,
            config: meta.config(),
            kind: ProposalType::AddSecondary,
            node: candidate,
        }),
    );
    let sends = peers.add_learner_sends();
    let (target, learn) = &sends[0];
    println!(
        "learner admitted: target={target} signature={}",
        learn
            .config
            .learner_signature
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string()),
    );

    // 3. The learning subsystem reports the candidate caught up.
    step(
        &mut replica,
        &mut events_rx,
        ReplicaEvent::LearnerReady { node: candidate },
    );
    println!(
        "after promotion: status={} ballot={} secondaries={:?}",
        replica.status(),
        replica.ballot(),
        replica
            .primary_states()
            .membership()
            .secondaries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
    );
}
