//! Learner admission, promotion, and removal.

use shoal_replication::{
    Ballot, Decree, PartitionScope, ProposalType, ReplicaConfiguration, ReplicaEvent, Status,
};

use crate::harness::{Harness, PID, SELF_PORT, addr, proposal};

#[test]
fn add_secondary_starts_a_learning_session() {
    let mut h = Harness::new();
    h.bootstrap_primary();
    h.grow_secondary(5002);
    h.prepare_list.set_last_committed(Decree::new(21));

    let p = proposal(ProposalType::AddSecondary, 5004, h.meta.config());
    h.run(ReplicaEvent::ConfigProposal(p.clone()));

    let signature = h
        .replica
        .primary_states()
        .learners()
        .get(&addr(5004))
        .expect("learner admitted")
        .signature;

    let sends = h.peers.add_learner_sends();
    assert_eq!(sends.len(), 1);
    let (target, request) = &sends[0];
    assert_eq!(*target, addr(5004));
    assert_eq!(request.config.status, Status::PotentialSecondary);
    assert_eq!(request.config.ballot, h.replica.ballot());
    assert_eq!(request.config.learner_signature, Some(signature));
    assert_eq!(request.last_committed_decree, Decree::new(21));

    // Adding a learner is primary-local: no meta round-trip, no ballot move.
    assert_eq!(h.replica.ballot(), Ballot::new(3));

    // A duplicated proposal reuses the session and its signature.
    h.run(ReplicaEvent::ConfigProposal(p));
    let sends = h.peers.add_learner_sends();
    assert_eq!(sends.len(), 2);
    assert_eq!(sends[1].1.config.learner_signature, Some(signature));
    assert_eq!(h.replica.primary_states().learners().len(), 1);
}

#[test]
fn learner_signatures_are_distinct_and_monotonic() {
    let mut h = Harness::new();
    h.bootstrap_primary();

    let p = proposal(ProposalType::AddSecondary, 5004, h.meta.config());
    h.run(ReplicaEvent::ConfigProposal(p));
    let p = proposal(ProposalType::AddSecondaryForLb, 5005, h.meta.config());
    h.run(ReplicaEvent::ConfigProposal(p));

    let learners = h.replica.primary_states().learners();
    let s1 = learners.get(&addr(5004)).expect("first learner").signature;
    let s2 = learners.get(&addr(5005)).expect("second learner").signature;
    assert!(s2.0 > s1.0, "signatures must be issued monotonically");
}

#[test]
fn admission_keeps_one_slot_unless_balancing() {
    let mut h = Harness::new();
    h.bootstrap_primary();
    h.grow_secondary(5002);

    // One learner fills the pool to max - 1.
    let p = proposal(ProposalType::AddSecondary, 5004, h.meta.config());
    h.run(ReplicaEvent::ConfigProposal(p));
    assert_eq!(h.peers.add_learner_sends().len(), 1);

    // A second plain add is refused...
    let p = proposal(ProposalType::AddSecondary, 5005, h.meta.config());
    h.run(ReplicaEvent::ConfigProposal(p));
    assert_eq!(h.peers.add_learner_sends().len(), 1);
    assert!(!h.replica.primary_states().learners().contains_key(&addr(5005)));

    // ...but the load-balancer variant may take the last slot...
    let p = proposal(ProposalType::AddSecondaryForLb, 5005, h.meta.config());
    h.run(ReplicaEvent::ConfigProposal(p));
    assert_eq!(h.peers.add_learner_sends().len(), 2);

    // ...and nothing goes beyond it.
    let p = proposal(ProposalType::AddSecondaryForLb, 5006, h.meta.config());
    h.run(ReplicaEvent::ConfigProposal(p));
    assert_eq!(h.peers.add_learner_sends().len(), 2);
}

#[test]
fn refused_add_becomes_acceptable_after_a_member_leaves() {
    let mut h = Harness::new();
    h.bootstrap_primary();
    h.grow_secondary(5002);
    h.grow_secondary(5003);

    // Full group: a new learner is refused.
    let p = proposal(ProposalType::AddSecondary, 5004, h.meta.config());
    h.run(ReplicaEvent::ConfigProposal(p));
    assert!(h.peers.add_learner_sends().is_empty());

    // Remove one secondary; the same add now passes admission.
    let p = proposal(ProposalType::Remove, 5003, h.meta.config());
    h.run(ReplicaEvent::ConfigProposal(p));
    assert_eq!(h.replica.ballot(), Ballot::new(5));

    let p = proposal(ProposalType::AddSecondary, 5004, h.meta.config());
    h.run(ReplicaEvent::ConfigProposal(p));
    assert_eq!(h.peers.add_learner_sends().len(), 1);
}

#[test]
fn remove_notifies_the_removed_node() {
    let mut h = Harness::new();
    h.bootstrap_primary();
    h.grow_secondary(5002);
    h.grow_secondary(5003);

    let p = proposal(ProposalType::Remove, 5002, h.meta.config());
    h.run(ReplicaEvent::ConfigProposal(p));

    // The removed node gets its projected configuration: inactive at the
    // new ballot.
    let removes = h.peers.remove_sends();
    assert_eq!(removes.len(), 1);
    assert_eq!(removes[0].0, addr(5002));
    assert_eq!(removes[0].1.status, Status::Inactive);
    assert_eq!(removes[0].1.ballot, Ballot::new(5));
    assert_eq!(removes[0].1.pid, PID);

    // The group itself moved on without 5002.
    assert_eq!(h.replica.status(), Status::Primary);
    let membership = h.replica.primary_states().membership();
    assert_eq!(membership.secondaries, vec![addr(5003)]);
}

#[test]
fn same_ballot_learner_promotion_on_the_learner_side() {
    let mut h = Harness::new();

    // This node learns: a learner-side configuration arrives (same ballot
    // promotion begins from inactive).
    let learner_config = ReplicaConfiguration {
        pid: PID,
        ballot: Ballot::new(9),
        status: Status::PotentialSecondary,
        learner_signature: None,
    };
    {
        let _scope = PartitionScope::enter(h.replica.partition_hash());
        assert!(h.replica.update_local_configuration(learner_config, false));
    }
    assert_eq!(h.replica.status(), Status::PotentialSecondary);

    // Learning finished: the app is caught up through decree 12, with some
    // prepares beyond it.
    h.app.set_last_committed(Decree::new(12));
    h.prepare_list.set_last_committed(Decree::new(12));
    h.prepare_list.insert(shoal_replication::Mutation::empty_write(
        Ballot::new(9),
        Decree::new(14),
    ));

    let promotion = ReplicaConfiguration {
        pid: PID,
        ballot: Ballot::new(9),
        status: Status::Secondary,
        learner_signature: None,
    };
    {
        let _scope = PartitionScope::enter(h.replica.partition_hash());
        assert!(h.replica.update_local_configuration(promotion, true));
    }

    assert_eq!(h.replica.status(), Status::Secondary);
    assert_eq!(h.replica.ballot(), Ballot::new(9));
    // Prepares were truncated back to the app's committed decree.
    assert_eq!(h.prepare_list.last_truncate(), Some(Decree::new(12)));
}

#[test]
fn transitions_out_of_error_are_refused() {
    let mut h = Harness::new();

    let error_config = ReplicaConfiguration {
        pid: PID,
        ballot: Ballot::new(4),
        status: Status::Error,
        learner_signature: None,
    };
    {
        let _scope = PartitionScope::enter(h.replica.partition_hash());
        h.replica.update_local_configuration(error_config, false);
    }
    assert_eq!(h.replica.status(), Status::Error);
    assert!(h.replica.is_closing());

    // No proposal, sync, or remove gets the replica out of error.
    let p = proposal(
        ProposalType::AssignPrimary,
        SELF_PORT,
        crate::harness::partition_config(9, None, &[]),
    );
    h.run(ReplicaEvent::ConfigProposal(p));
    assert_eq!(h.replica.status(), Status::Error);

    h.run(ReplicaEvent::ConfigSync(crate::harness::partition_config(
        9,
        Some(5002),
        &[SELF_PORT],
    )));
    assert_eq!(h.replica.status(), Status::Error);
    assert_eq!(h.replica.ballot(), Ballot::new(4));
}
