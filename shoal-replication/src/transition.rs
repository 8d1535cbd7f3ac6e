//! The local status-transition engine.
//!
//! Every change to a replica's `(status, ballot)` pair funnels through
//! [`Replica::update_local_configuration`], which enforces the transition
//! table below. [`Replica::update_configuration`] is the membership-level
//! entry: it projects an authoritative [`PartitionConfiguration`] onto this
//! node, refreshes primary bookkeeping when the node is (re)taking the
//! primary role, and admits same-ballot changes only for the handful of
//! pairs the protocol allows.
//!
//! ## Transition side effects
//!
//! | old → new | action |
//! |-----------|--------|
//! | P→P | quash in-flight prepares; replay the prepare list |
//! | P→I | primary cleanup (full iff the ballot changed) |
//! | P→S, P→E | full primary cleanup |
//! | S→P | start group check; replay the prepare list |
//! | S→S | — |
//! | S→PS | mark learning-without-prepare (2pc off until next group check) |
//! | S→I, S→E | — (the close path does the heavyweight work) |
//! | PS→S | truncate prepares to the app's committed decree; force-clean learning; completeness check |
//! | PS→E | reset prepares to the app's committed decree; non-forced cleanup |
//! | PS→PS, PS→I | — |
//! | I→P | requires transient; clear it; group check; replay |
//! | I→S | requires transient; clear it |
//! | I→PS | clear transient |
//! | I→I | — |
//! | I→E | if transient: full primary cleanup + non-forced secondary cleanup; clear flag |
//! | E→E | — |
//!
//! Pairs not listed are unreachable under the protocol and treated as fatal
//! programming errors. Transitions out of `Error` are refused: error is
//! terminal until the replica is recycled. A transition can also be refused
//! while role teardown is still winding down (a running checkpoint or
//! learning round); the meta service retries and the identical transition
//! is accepted once the activity drains.

use shoal_core::Providers;
use tracing::{info, warn};

use crate::contexts::LearnerStatus;
use crate::replica::Replica;
use crate::types::{
    Mutation, PartitionConfiguration, ReplicaConfiguration, Status, replica_config_for_node,
};

impl<P: Providers> Replica<P> {
    /// Apply an authoritative (or proposed) membership record whose ballot
    /// is at least the local one.
    ///
    /// Returns `false` when the change is refused, or when it puts the
    /// replica into a closing state.
    pub fn update_configuration(&mut self, config: PartitionConfiguration) -> bool {
        assert!(
            config.ballot >= self.ballot(),
            "membership ballot must not regress: {} < {}",
            config.ballot,
            self.ballot()
        );

        let rconfig = replica_config_for_node(&config, self.stub.primary_address());

        if rconfig.status == Status::Primary
            && (rconfig.ballot > self.ballot() || self.status() != Status::Primary)
        {
            self.primary_states
                .reset_membership(&config, config.primary != self.stub.primary_address());
        }

        if config.ballot > self.ballot()
            || self.is_same_ballot_status_change_allowed(self.status(), rconfig.status)
        {
            self.update_local_configuration(rconfig, true)
        } else {
            false
        }
    }

    /// Whether a status change is allowed without a ballot increase.
    ///
    /// Exactly these pairs (and `old == new`):
    ///
    /// | old | new | why |
    /// |-----|-----|-----|
    /// | I | PS | begin learning |
    /// | PS | S | learning complete |
    /// | I | S | meta recovery, requires transient inactive |
    /// | I | P | meta recovery, requires transient inactive |
    pub fn is_same_ballot_status_change_allowed(&self, old: Status, new: Status) -> bool {
        // add learner
        (old == Status::Inactive && new == Status::PotentialSecondary)
            // learner ready for secondary
            || (old == Status::PotentialSecondary && new == Status::Secondary)
            // meta server came back
            || (old == Status::Inactive
                && new == Status::Secondary
                && self.inactive_is_transient)
            // meta server came back
            || (old == Status::Inactive
                && new == Status::Primary
                && self.inactive_is_transient)
            // no change
            || (old == new)
    }

    /// Apply a local `(status, ballot)` change, running the transition
    /// table's side effects.
    ///
    /// Returns `false` when the transition is refused, or when it puts the
    /// replica into a closing state.
    pub fn update_local_configuration(
        &mut self,
        config: ReplicaConfiguration,
        same_ballot: bool,
    ) -> bool {
        assert!(
            config.ballot > self.ballot() || (same_ballot && config.ballot == self.ballot()),
            "local ballot must not regress: {} vs {} (same_ballot = {same_ballot})",
            config.ballot,
            self.ballot()
        );
        assert_eq!(config.pid, self.pid, "configuration for a different partition");

        let old_status = self.status();
        let old_ballot = self.ballot();

        // Skip unnecessary configuration change.
        if old_status == config.status && old_ballot == config.ballot {
            return true;
        }

        // Refuse invalid changes up front, keeping state untouched.
        // Transitions into Error are never gated here: errors must take
        // effect immediately.
        match old_status {
            Status::Error => {
                warn!(
                    replica = %self.name,
                    from = %old_status,
                    from_ballot = %old_ballot,
                    to = %config.status,
                    to_ballot = %config.ballot,
                    "status change out of error is not allowed"
                );
                return false;
            }
            Status::Inactive => {
                if (config.status == Status::Primary || config.status == Status::Secondary)
                    && !self.inactive_is_transient
                {
                    warn!(
                        replica = %self.name,
                        from = %old_status,
                        from_ballot = %old_ballot,
                        to = %config.status,
                        to_ballot = %config.ballot,
                        "status change is not allowed while inactive state is not transient"
                    );
                    return false;
                }
            }
            Status::PotentialSecondary => {
                if config.status == Status::Inactive
                    && !self.potential_secondary_states.cleanup(false)
                {
                    warn!(
                        replica = %self.name,
                        from = %old_status,
                        to = %config.status,
                        "status change refused: learning of remote state is still running"
                    );
                    return false;
                }
            }
            Status::Secondary => {
                if config.status != Status::Secondary
                    && config.status != Status::Error
                    && !self.secondary_states.cleanup(false)
                {
                    warn!(
                        replica = %self.name,
                        from = %old_status,
                        to = %config.status,
                        "status change refused: checkpointing is still running"
                    );
                    return false;
                }
            }
            Status::Primary => {}
        }

        let old_change_ts = self.last_config_change_time_ms;
        self.config = config.clone();
        self.last_config_change_time_ms = self.now_ms();
        assert!(
            self.max_prepared_decree() >= self.last_committed_decree(),
            "prepared window fell behind the committed decree"
        );

        match old_status {
            Status::Primary => {
                self.pipeline.cleanup_preparing_mutations(false);
                match config.status {
                    Status::Primary => {
                        self.replay_prepare_list();
                    }
                    Status::Inactive => {
                        self.primary_states.cleanup(old_ballot != config.ballot);
                    }
                    Status::Secondary | Status::Error => {
                        self.primary_states.cleanup(true);
                    }
                    Status::PotentialSecondary => {
                        unreachable!("invalid transition primary -> potential secondary")
                    }
                }
            }
            Status::Secondary => {
                self.pipeline.cleanup_preparing_mutations(false);
                match config.status {
                    Status::Primary => {
                        self.pipeline.begin_group_check();
                        self.replay_prepare_list();
                    }
                    Status::Secondary => {}
                    Status::PotentialSecondary => {
                        // Prevent further 2pc; wait for the next group check
                        // or an explicit learn for the real learning to start.
                        self.potential_secondary_states
                            .set_learning_status(LearnerStatus::LearningWithoutPrepare);
                    }
                    Status::Inactive => {}
                    Status::Error => {
                        // Heavyweight secondary cleanup runs in the close
                        // path, where blocking is acceptable.
                    }
                }
            }
            Status::PotentialSecondary => match config.status {
                Status::Secondary => {
                    self.prepare_list.truncate(self.app.last_committed_decree());

                    // All learning tasks must be done already.
                    let cleaned = self.potential_secondary_states.cleanup(true);
                    assert!(cleaned, "potential secondary cleanup failed");

                    self.check_state_completeness();
                }
                Status::PotentialSecondary | Status::Inactive => {}
                Status::Error => {
                    self.prepare_list.reset(self.app.last_committed_decree());
                    let _ = self.potential_secondary_states.cleanup(false);
                }
                Status::Primary => {
                    unreachable!("invalid transition potential secondary -> primary")
                }
            },
            Status::Inactive => match config.status {
                Status::Primary => {
                    assert!(
                        self.inactive_is_transient,
                        "must be in transient inactive state for becoming primary"
                    );
                    self.inactive_is_transient = false;
                    self.pipeline.begin_group_check();
                    self.replay_prepare_list();
                }
                Status::Secondary => {
                    assert!(
                        self.inactive_is_transient,
                        "must be in transient inactive state for becoming secondary"
                    );
                    self.inactive_is_transient = false;
                }
                Status::PotentialSecondary => {
                    self.inactive_is_transient = false;
                }
                Status::Inactive => {}
                Status::Error => {
                    if self.inactive_is_transient {
                        self.primary_states.cleanup(true);
                        let _ = self.secondary_states.cleanup(false);
                    }
                    self.inactive_is_transient = false;
                }
            },
            Status::Error => match config.status {
                Status::Error => {}
                _ => unreachable!("transitions out of error are refused above"),
            },
        }

        info!(
            replica = %self.name,
            from = %old_status,
            from_ballot = %old_ballot,
            to = %self.status(),
            to_ballot = %self.ballot(),
            prepared = %self.prepare_list.max_decree(),
            committed = %self.prepare_list.last_committed_decree(),
            app_committed = %self.app.last_committed_decree(),
            app_durable = %self.app.last_durable_decree(),
            since_last_change_ms = self.last_config_change_time_ms - old_change_ts,
            "status changed"
        );

        if self.status() != old_status {
            let is_closing = self.status() == Status::Error
                || (self.status() == Status::Inactive && self.ballot() > old_ballot);
            self.stub.notify_replica_state_update(&self.config, is_closing);

            if is_closing {
                info!(replica = %self.name, "replica is closing");
                self.closing = true;
                self.stub.begin_close_replica(self.pid);
                return false;
            }
        } else {
            self.stub.notify_replica_state_update(&self.config, false);
        }

        // Resume pending writes if this node just (re)took the primary role.
        if self.status() == Status::Primary {
            let window =
                (self.max_prepared_decree().0 as i64 - self.last_committed_decree().0 as i64) as i32;
            if let Some(mutation) = self.primary_states.write_queue.check_possible_work(window) {
                self.pipeline.begin_prepare(mutation);
            }
        }

        true
    }

    /// Apply a status change that keeps the current ballot.
    ///
    /// Returns `false` without side effects when the status already equals
    /// `status`.
    pub(crate) fn update_local_configuration_with_no_ballot_change(
        &mut self,
        status: Status,
    ) -> bool {
        if self.status() == status {
            return false;
        }

        let mut config = self.config.clone();
        config.status = status;
        self.update_local_configuration(config, true)
    }

    /// Re-issue every prepared-but-uncommitted decree under the current
    /// ballot.
    ///
    /// Run when a node takes (or retakes) the primary role: decrees above
    /// the committed prefix must be driven to commit before new writes, and
    /// decrees the log has no mutation for are filled with empty writes.
    pub(crate) fn replay_prepare_list(&mut self) {
        let start = self.last_committed_decree().next();
        let end = self.prepare_list.max_decree();

        info!(
            replica = %self.name,
            from = %start,
            to = %end,
            ballot = %self.ballot(),
            "replaying prepare list"
        );

        let mut decree = start;
        while decree <= end {
            let mutation = match self.prepare_list.get_mutation_by_decree(decree) {
                Some(old) => Mutation::new(self.ballot(), decree, old.payload),
                None => Mutation::empty_write(self.ballot(), decree),
            };
            self.pipeline.begin_prepare(mutation);
            decree = decree.next();
        }
    }

    /// Check the durability ladder after a learner finishes catching up.
    pub(crate) fn check_state_completeness(&self) {
        debug_assert!(
            self.app.last_durable_decree() <= self.app.last_committed_decree(),
            "app durability ran ahead of the app's committed decree"
        );
        debug_assert!(
            self.prepare_list.max_decree() >= self.app.last_committed_decree(),
            "prepared window fell behind the app's committed decree"
        );
    }
}
