//! Primary assignment, the quiesce law, and the meta retry loop.

use std::time::Duration;

use shoal_core::Providers;
use shoal_replication::{
    Ballot, Decree, MetaError, ProposalType, ReplicaEvent, ReplicationError, Status,
};

use crate::harness::{Harness, SELF_PORT, addr, partition_config, proposal};

#[test]
fn assign_primary_end_to_end() {
    let mut h = Harness::new();

    let p = proposal(
        ProposalType::AssignPrimary,
        SELF_PORT,
        partition_config(1, None, &[]),
    );
    h.handle(ReplicaEvent::ConfigProposal(p));

    // While the meta exchange is in flight the replica sits in the
    // transient-inactive quiesce.
    assert_eq!(h.replica.status(), Status::Inactive);
    assert!(h.replica.inactive_is_transient());
    assert!(h.replica.primary_states().reconfiguration_in_flight());

    h.pump();

    // The request carried ballot 2 (the proposal's 1, bumped) and named
    // this node primary.
    let requests = h.meta.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, ProposalType::AssignPrimary);
    assert_eq!(requests[0].config.ballot, Ballot::new(2));
    assert_eq!(requests[0].config.primary, addr(SELF_PORT));

    assert_eq!(h.replica.status(), Status::Primary);
    assert_eq!(h.replica.ballot(), Ballot::new(2));
    assert!(!h.replica.primary_states().reconfiguration_in_flight());
    assert_eq!(
        h.replica.primary_states().last_prepare_decree_on_new_primary(),
        Decree::ZERO
    );
}

#[test]
fn quiesce_happens_exactly_once_per_reconfiguration() {
    let mut h = Harness::new();
    h.bootstrap_primary();

    // The committed transition sequence for the bootstrap reconfiguration:
    // inactive@1 (the adopted proposal record), the quiesce would be next
    // but the replica was already inactive, then primary@2 on the reply.
    let statuses: Vec<(Status, Ballot)> = h
        .stub
        .notifications()
        .iter()
        .map(|(config, _)| (config.status, config.ballot))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (Status::Inactive, Ballot::new(1)),
            (Status::Primary, Ballot::new(2)),
        ]
    );

    // A reconfiguration started from the primary role quiesces exactly once
    // before committing the new membership.
    h.grow_secondary(5002);
    let statuses: Vec<(Status, Ballot)> = h
        .stub
        .notifications()
        .iter()
        .skip(2)
        .map(|(config, _)| (config.status, config.ballot))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (Status::Inactive, Ballot::new(2)), // quiesce, same ballot
            (Status::Primary, Ballot::new(3)),  // committed reply
        ]
    );
}

#[test]
fn repeated_reconfigurations_grow_the_ballot_strictly() {
    let mut h = Harness::new();
    h.bootstrap_primary();
    let pid = h.replica.pid();

    h.grow_secondary(5002);
    assert_eq!(h.replica.ballot(), Ballot::new(3));

    h.grow_secondary(5003);
    assert_eq!(h.replica.ballot(), Ballot::new(4));

    // Same partition throughout, ballots strictly increasing, and the
    // membership reflects both promotions.
    assert_eq!(h.replica.pid(), pid);
    let membership = h.replica.primary_states().membership();
    assert_eq!(membership.secondaries.len(), 2);
    assert_eq!(membership.ballot, Ballot::new(4));
}

#[test]
fn meta_retry_after_transport_failure() {
    let mut h = Harness::new();
    h.bootstrap_primary();
    h.meta
        .fail_next_transport(ReplicationError::Network("connection reset".to_string()));

    // Downgrade this primary to secondary.
    let membership = h.meta.config();
    let p = proposal(ProposalType::DowngradeToSecondary, SELF_PORT, membership);
    h.run(ReplicaEvent::ConfigProposal(p));

    // First attempt failed in transport; the retry is parked on its delay.
    assert_eq!(h.meta.requests().len(), 1);
    assert_eq!(h.replica.status(), Status::Inactive);
    assert!(h.replica.inactive_is_transient());
    assert!(h.replica.primary_states().reconfiguration_in_flight());

    // Just short of the retry delay: nothing resent.
    h.advance(Duration::from_millis(999));
    assert_eq!(h.meta.requests().len(), 1);

    // At the delay: the identical request is resent and accepted.
    h.advance(Duration::from_millis(1));
    let requests = h.meta.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);

    assert_eq!(h.replica.status(), Status::Secondary);
    assert_eq!(h.replica.ballot(), Ballot::new(3));
    assert!(!h.replica.primary_states().reconfiguration_in_flight());
}

#[test]
fn invalid_version_is_terminal_and_adopts_the_winner() {
    let mut h = Harness::new();
    h.bootstrap_primary();

    // Behind the replica's back, the record moved on: another node is now
    // primary at ballot 3, with this node among the secondaries.
    let winner = partition_config(3, Some(5002), &[SELF_PORT]);
    h.meta.set_config(winner.clone());

    let membership = partition_config(2, Some(SELF_PORT), &[]);
    let p = proposal(ProposalType::DowngradeToInactive, SELF_PORT, membership);
    h.run(ReplicaEvent::ConfigProposal(p));

    // One request, no retry scheduled, and the winning record adopted:
    // this node is a secondary of the new primary.
    assert_eq!(h.meta.requests().len(), 1);
    assert_eq!(h.providers.task().pending(), 0);
    assert_eq!(h.replica.status(), Status::Secondary);
    assert_eq!(h.replica.ballot(), Ballot::new(3));
    assert!(!h.replica.primary_states().reconfiguration_in_flight());
}

#[test]
fn retryable_server_rejection_retries_until_accepted() {
    let mut h = Harness::new();
    h.bootstrap_primary();
    h.meta.fail_next(MetaError::NotActive);
    h.meta.fail_next(MetaError::Busy);

    let membership = h.meta.config();
    let p = proposal(ProposalType::Remove, SELF_PORT, membership);
    h.run(ReplicaEvent::ConfigProposal(p));
    assert_eq!(h.meta.requests().len(), 1);

    h.advance(Duration::from_millis(1000));
    assert_eq!(h.meta.requests().len(), 2);
    assert!(h.replica.primary_states().reconfiguration_in_flight());

    h.advance(Duration::from_millis(1000));
    assert_eq!(h.meta.requests().len(), 3);

    // Removing itself: the replica ends up inactive at the new ballot and
    // no REMOVE_REPLICA goes out (there is no other node to tell).
    assert_eq!(h.replica.status(), Status::Inactive);
    assert_eq!(h.replica.ballot(), Ballot::new(3));
    assert!(h.peers.remove_sends().is_empty());
}

/// The production event loop, driven by Tokio with a paused clock.
#[tokio::test(start_paused = true)]
async fn run_replica_loop_with_tokio_providers() {
    use shoal_core::TokioProviders;
    use shoal_replication::collaborators::{
        InMemoryPrepareList, InMemoryStateMachine, InMemoryWritePipeline, InMemoryWriteQueue,
    };
    use shoal_replication::stub::{InMemoryPeerTransport, InMemoryReplicaStub};
    use shoal_replication::{
        InMemoryMetaServer, Replica, ReplicaSetup, ReplicationOptions, replica_channel,
        run_replica,
    };
    use std::rc::Rc;

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let stub = Rc::new(InMemoryReplicaStub::new(addr(SELF_PORT), addr(34601)));
            let meta = Rc::new(InMemoryMetaServer::new(partition_config(1, None, &[])));
            meta.fail_next_transport(ReplicationError::Timeout);
            let (events, events_rx) = replica_channel();

            let replica = Replica::new(ReplicaSetup {
                pid: crate::harness::PID,
                app_info: crate::harness::app_info(),
                options: ReplicationOptions::default(),
                prepare_list: Rc::new(InMemoryPrepareList::new(Decree::ZERO)),
                app: Rc::new(InMemoryStateMachine::new(Decree::ZERO, Decree::ZERO)),
                write_queue: Rc::new(InMemoryWriteQueue::default()),
                pipeline: Rc::new(InMemoryWritePipeline::new()),
                stub: stub.clone(),
                meta: meta.clone(),
                peers: Rc::new(InMemoryPeerTransport::new()),
                events: events.clone(),
                providers: TokioProviders::new(),
            });

            let loop_task = tokio::task::spawn_local(run_replica(replica, events_rx));

            let p = proposal(
                ProposalType::AssignPrimary,
                SELF_PORT,
                partition_config(1, None, &[]),
            );
            events
                .send(ReplicaEvent::ConfigProposal(p))
                .expect("loop alive");

            // Enough paused time for the failed first attempt and its
            // 1000 ms retry to complete.
            tokio::time::sleep(Duration::from_millis(1500)).await;

            assert_eq!(meta.requests().len(), 2);
            let (config, is_closing) = stub.notifications().last().expect("notified").clone();
            assert_eq!(config.status, Status::Primary);
            assert_eq!(config.ballot, Ballot::new(2));
            assert!(!is_closing);

            // A remove at a higher ballot puts the replica into a closing
            // state, which ends the loop.
            events
                .send(ReplicaEvent::RemoveReplica(
                    shoal_replication::ReplicaConfiguration {
                        pid: crate::harness::PID,
                        ballot: Ballot::new(3),
                        status: Status::Inactive,
                        learner_signature: None,
                    },
                ))
                .expect("loop alive");
            loop_task.await.expect("loop exits after closing");
            assert_eq!(stub.closed(), vec![crate::harness::PID]);
        })
        .await;
}
