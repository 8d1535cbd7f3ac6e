//! Configuration sync, remove instructions, and the drop-stale boundaries.

use shoal_replication::{
    Ballot, PartitionScope, ProposalType, ReplicaConfiguration, ReplicaEvent, Status,
};

use crate::harness::{Harness, PID, SELF_PORT, partition_config, proposal};

fn secondary_at(h: &mut Harness, ballot: u64) {
    // Become a secondary the honest way: learn, then take the same-ballot
    // promotion the primary's group check delivers.
    let learner = ReplicaConfiguration {
        pid: PID,
        ballot: Ballot::new(ballot),
        status: Status::PotentialSecondary,
        learner_signature: None,
    };
    let promotion = ReplicaConfiguration {
        status: Status::Secondary,
        ..learner.clone()
    };
    let _scope = PartitionScope::enter(h.replica.partition_hash());
    assert!(h.replica.update_local_configuration(learner, false));
    assert!(h.replica.update_local_configuration(promotion, true));
    assert_eq!(h.replica.status(), Status::Secondary);
    assert_eq!(h.replica.ballot(), Ballot::new(ballot));
}

#[test]
fn stale_proposal_changes_nothing_and_sends_nothing() {
    let mut h = Harness::new();
    h.bootstrap_primary();
    h.grow_secondary(5002);
    let requests_before = h.meta.requests().len();

    let p = proposal(
        ProposalType::AddSecondary,
        5004,
        partition_config(2, Some(SELF_PORT), &[5002]),
    );
    h.run(ReplicaEvent::ConfigProposal(p));

    assert_eq!(h.replica.ballot(), Ballot::new(3));
    assert_eq!(h.replica.status(), Status::Primary);
    assert!(h.peers.add_learner_sends().is_empty());
    assert_eq!(h.meta.requests().len(), requests_before);
}

#[test]
fn proposal_during_inflight_reconfiguration_is_dropped() {
    let mut h = Harness::new();
    h.bootstrap_primary();
    h.meta.fail_next(shoal_replication::MetaError::Busy);

    // Start a reconfiguration whose retry is parked on the delay timer.
    let p = proposal(ProposalType::DowngradeToSecondary, SELF_PORT, h.meta.config());
    h.run(ReplicaEvent::ConfigProposal(p));
    assert!(h.replica.primary_states().reconfiguration_in_flight());
    let requests_before = h.meta.requests().len();

    // Any further proposal is dropped while the exchange is outstanding.
    let p = proposal(
        ProposalType::AddSecondary,
        5004,
        partition_config(3, Some(SELF_PORT), &[]),
    );
    h.run(ReplicaEvent::ConfigProposal(p));

    assert!(h.peers.add_learner_sends().is_empty());
    assert_eq!(h.meta.requests().len(), requests_before);

    // The parked exchange still completes on its own.
    h.advance(std::time::Duration::from_millis(1000));
    assert_eq!(h.replica.status(), Status::Secondary);
}

#[test]
fn config_sync_is_ignored_by_the_primary() {
    let mut h = Harness::new();
    h.bootstrap_primary();

    let sync = partition_config(9, Some(5002), &[]);
    h.run(ReplicaEvent::ConfigSync(sync));

    assert_eq!(h.replica.status(), Status::Primary);
    assert_eq!(h.replica.ballot(), Ballot::new(2));
}

#[test]
fn config_sync_advances_a_secondary() {
    let mut h = Harness::new();
    secondary_at(&mut h, 7);

    let sync = partition_config(8, Some(5002), &[SELF_PORT, 5004]);
    h.run(ReplicaEvent::ConfigSync(sync));

    assert_eq!(h.replica.status(), Status::Secondary);
    assert_eq!(h.replica.ballot(), Ballot::new(8));
    assert!(h.stub.self_evictions().is_empty());
    assert!(!h.replica.is_closing());
}

#[test]
fn stranded_replica_self_evicts() {
    let mut h = Harness::new();
    secondary_at(&mut h, 7);

    // Ballot 8: the group lost its primary and this node is no longer a
    // member. The replica goes inactive (a closing transition) and asks the
    // meta service to drop it.
    let sync = partition_config(8, None, &[5003]);
    h.run(ReplicaEvent::ConfigSync(sync.clone()));

    assert_eq!(h.replica.status(), Status::Inactive);
    assert!(!h.replica.inactive_is_transient());
    assert!(h.replica.is_closing());
    assert_eq!(h.stub.closed(), vec![PID]);

    let evictions = h.stub.self_evictions();
    assert_eq!(evictions.len(), 1);
    assert_eq!(evictions[0].1, sync);
}

#[test]
fn remove_instruction_applies_at_a_higher_ballot() {
    let mut h = Harness::new();
    secondary_at(&mut h, 7);

    let remove = ReplicaConfiguration {
        pid: PID,
        ballot: Ballot::new(8),
        status: Status::Inactive,
        learner_signature: None,
    };
    h.run(ReplicaEvent::RemoveReplica(remove));

    assert_eq!(h.replica.status(), Status::Inactive);
    assert_eq!(h.replica.ballot(), Ballot::new(8));
    assert!(h.replica.is_closing());
}

#[test]
fn remove_at_equal_ballot_loses_to_inflight_add() {
    let mut h = Harness::new();

    // This node started learning at ballot 7 (a same-ballot add won the
    // race against a delayed remove for the same node).
    let learner_config = ReplicaConfiguration {
        pid: PID,
        ballot: Ballot::new(7),
        status: Status::PotentialSecondary,
        learner_signature: None,
    };
    {
        let _scope = PartitionScope::enter(h.replica.partition_hash());
        assert!(h.replica.update_local_configuration(learner_config, false));
    }

    let remove = ReplicaConfiguration {
        pid: PID,
        ballot: Ballot::new(7),
        status: Status::Inactive,
        learner_signature: None,
    };
    h.run(ReplicaEvent::RemoveReplica(remove.clone()));

    // The delayed remove is ignored; learning continues.
    assert_eq!(h.replica.status(), Status::PotentialSecondary);
    assert!(!h.replica.is_closing());

    // The same instruction at a higher ballot does apply.
    let remove = ReplicaConfiguration {
        ballot: Ballot::new(8),
        ..remove
    };
    h.run(ReplicaEvent::RemoveReplica(remove));
    assert_eq!(h.replica.status(), Status::Inactive);
    assert!(h.replica.is_closing());
}

#[test]
fn stale_remove_is_dropped() {
    let mut h = Harness::new();
    secondary_at(&mut h, 7);

    let remove = ReplicaConfiguration {
        pid: PID,
        ballot: Ballot::new(6),
        status: Status::Inactive,
        learner_signature: None,
    };
    h.run(ReplicaEvent::RemoveReplica(remove));

    assert_eq!(h.replica.status(), Status::Secondary);
    assert_eq!(h.replica.ballot(), Ballot::new(7));
    assert!(!h.replica.is_closing());
}

#[test]
fn sync_with_stale_ballot_is_dropped() {
    let mut h = Harness::new();
    secondary_at(&mut h, 7);

    let sync = partition_config(6, None, &[]);
    h.run(ReplicaEvent::ConfigSync(sync));

    assert_eq!(h.replica.ballot(), Ballot::new(7));
    assert_eq!(h.replica.status(), Status::Secondary);
    assert!(h.stub.self_evictions().is_empty());
}
