//! Configuration-proposal intake and primary-side group edits.
//!
//! Proposals originate at the meta service and are delivered to the replica
//! they target (or to the group's primary, which executes them on the meta
//! service's behalf). The handler is deliberately forgiving: every failed
//! guard logs and drops. The meta service is the driver of the protocol and
//! retries anything that matters; a dropped proposal costs one retry
//! round-trip, while a wrongly accepted one would corrupt membership.
//!
//! ```text
//!  meta service
//!      │ proposal {kind, node, config}
//!      ▼
//!  on_config_proposal
//!      │  stale ballot? in-flight reconfiguration? → drop
//!      │  newer ballot? → adopt it first
//!      ▼
//!  ┌───────────────┬──────────────────────┬───────────────────┐
//!  │ assign/upgrade│ add (potential)       │ downgrade/remove  │
//!  │ primary       │ secondary             │                   │
//!  │   mutate cfg  │   start learner,      │   mutate cfg      │
//!  │   → meta      │   LEARN_ADD_LEARNER → │   → meta          │
//!  └───────────────┴──────────────────────┴───────────────────┘
//! ```

use shoal_core::Providers;
use tracing::{debug, info, warn};

use crate::executor::check_hashed_access;
use crate::replica::Replica;
use crate::types::{
    ConfigurationUpdateRequest, GroupCheckRequest, ProposalType, Status, remove_node,
};

impl<P: Providers> Replica<P> {
    /// Entry point for configuration proposals targeted at this replica.
    pub(crate) fn on_config_proposal(&mut self, mut proposal: ConfigurationUpdateRequest) {
        check_hashed_access(self.partition_hash);

        debug!(
            replica = %self.name,
            kind = %proposal.kind,
            node = %proposal.node,
            ballot = %proposal.config.ballot,
            "processing config proposal"
        );

        if proposal.config.ballot < self.ballot() {
            warn!(
                replica = %self.name,
                ballot = %proposal.config.ballot,
                local_ballot = %self.ballot(),
                "config proposal is outdated, dropping"
            );
            return;
        }

        if self.primary_states.reconfiguration_in_flight() {
            debug!(
                replica = %self.name,
                "reconfiguration on the way, skipping incoming proposal"
            );
            return;
        }

        if proposal.config.ballot > self.ballot()
            && !self.update_configuration(proposal.config.clone())
        {
            // Closing, or the change was refused.
            return;
        }

        match proposal.kind {
            ProposalType::AssignPrimary | ProposalType::UpgradeToPrimary => {
                self.assign_primary(proposal);
            }
            ProposalType::AddSecondary | ProposalType::AddSecondaryForLb => {
                self.add_potential_secondary(proposal);
            }
            ProposalType::DowngradeToSecondary => {
                self.downgrade_to_secondary_on_primary(&mut proposal);
            }
            ProposalType::DowngradeToInactive => {
                self.downgrade_to_inactive_on_primary(&mut proposal);
            }
            ProposalType::Remove => {
                self.remove(&mut proposal);
            }
            ProposalType::UpgradeToSecondary => {
                unreachable!("upgrade-to-secondary is driven by learner completion, not proposals")
            }
        }
    }

    /// Take (or retake) the primary role for this partition.
    fn assign_primary(&mut self, mut proposal: ConfigurationUpdateRequest) {
        let self_address = self.stub.primary_address();
        if proposal.node != self_address {
            warn!(
                replica = %self.name,
                node = %proposal.node,
                "assign-primary proposal targets another node, dropping"
            );
            return;
        }

        if self.status() == Status::Primary {
            warn!(
                replica = %self.name,
                status = %self.status(),
                "invalid assign-primary proposal: node already holds the role"
            );
            return;
        }

        if proposal.kind == ProposalType::UpgradeToPrimary
            && (self.status() != Status::Secondary
                || self.secondary_states.checkpoint_is_running())
        {
            warn!(
                replica = %self.name,
                status = %self.status(),
                "invalid upgrade-to-primary proposal: wrong status or checkpoint running"
            );
            return;
        }

        proposal.config.primary = self_address;
        remove_node(&mut proposal.config.secondaries, self_address);

        self.update_configuration_on_meta_server(proposal.kind, proposal.node, proposal.config);
    }

    /// Start a learning session so `proposal.node` can become a secondary.
    ///
    /// Admission keeps one replica slot free for the fully caught-up member
    /// the group is actually short of — except for the load-balancer
    /// variant, which may use that last slot to build a replacement before
    /// retiring a healthy secondary.
    fn add_potential_secondary(&mut self, proposal: ConfigurationUpdateRequest) {
        if self.status() != Status::Primary {
            warn!(
                replica = %self.name,
                status = %self.status(),
                "ignoring add-secondary proposal in invalid state"
            );
            return;
        }

        if !self.primary_states.membership_matches(&proposal.config) {
            warn!(
                replica = %self.name,
                ballot = %proposal.config.ballot,
                "add-secondary proposal does not match current membership, dropping"
            );
            return;
        }
        if matches!(
            self.primary_states.node_status(proposal.node),
            Some(Status::Primary) | Some(Status::Secondary)
        ) {
            warn!(
                replica = %self.name,
                node = %proposal.node,
                "add-secondary proposal targets an existing member, dropping"
            );
            return;
        }

        let membership = self.primary_states.membership();
        let potential_count =
            membership.secondaries.len() + self.primary_states.learners().len();
        let max_replica_count = membership.max_replica_count as usize;

        if potential_count + 1 >= max_replica_count {
            match proposal.kind {
                ProposalType::AddSecondary => {
                    if !self.primary_states.learners().contains_key(&proposal.node) {
                        debug!(
                            replica = %self.name,
                            node = %proposal.node,
                            "already have enough (potential) secondaries, ignoring proposal"
                        );
                        return;
                    }
                }
                ProposalType::AddSecondaryForLb => {
                    if potential_count >= max_replica_count {
                        debug!(
                            replica = %self.name,
                            node = %proposal.node,
                            "only one extra potential secondary is allowed, ignoring proposal"
                        );
                        return;
                    }
                    debug!(
                        replica = %self.name,
                        node = %proposal.node,
                        "adding an extra secondary for load balancing"
                    );
                }
                _ => unreachable!("admission control only sees add-secondary proposals"),
            }
        }

        let existing = self
            .primary_states
            .learners()
            .get(&proposal.node)
            .map(|learner| learner.signature);
        let signature = match existing {
            Some(signature) => signature,
            None => self.primary_states.add_learner(proposal.node),
        };

        let request = GroupCheckRequest {
            app: self.app_info.clone(),
            node: proposal.node,
            config: self
                .primary_states
                .replica_config_with_signature(Status::PotentialSecondary, signature),
            last_committed_decree: self.last_committed_decree(),
        };

        info!(
            replica = %self.name,
            node = %proposal.node,
            signature = %signature,
            "asking node to start learning"
        );

        self.peers.send_add_learner(proposal.node, request);
    }

    /// Promote a learner that finished catching up. Driven by the
    /// learner-ready event from the learning subsystem.
    pub(crate) fn upgrade_to_secondary_on_primary(&mut self, node: shoal_core::NodeAddress) {
        check_hashed_access(self.partition_hash);

        if self.status() != Status::Primary {
            warn!(
                replica = %self.name,
                node = %node,
                status = %self.status(),
                "ignoring learner completion in invalid state"
            );
            return;
        }
        if !self.primary_states.learners().contains_key(&node) {
            warn!(
                replica = %self.name,
                node = %node,
                "learner completion for an unknown session, dropping"
            );
            return;
        }

        info!(
            replica = %self.name,
            node = %node,
            "upgrading potential secondary to secondary"
        );

        let mut new_config = self.primary_states.membership().clone();
        new_config.secondaries.push(node);

        self.update_configuration_on_meta_server(ProposalType::UpgradeToSecondary, node, new_config);
    }

    /// Demote the primary (this node) to secondary.
    fn downgrade_to_secondary_on_primary(&mut self, proposal: &mut ConfigurationUpdateRequest) {
        if proposal.config.ballot != self.ballot() || self.status() != Status::Primary {
            return;
        }
        if !self.primary_states.membership_matches(&proposal.config) {
            warn!(
                replica = %self.name,
                "downgrade proposal does not match current membership, dropping"
            );
            return;
        }
        if proposal.node != proposal.config.primary {
            warn!(
                replica = %self.name,
                node = %proposal.node,
                "downgrade-to-secondary must target the primary, dropping"
            );
            return;
        }

        proposal.config.primary = shoal_core::NodeAddress::invalid();
        proposal.config.secondaries.push(proposal.node);

        self.update_configuration_on_meta_server(
            ProposalType::DowngradeToSecondary,
            proposal.node,
            proposal.config.clone(),
        );
    }

    /// Demote a group member to inactive.
    fn downgrade_to_inactive_on_primary(&mut self, proposal: &mut ConfigurationUpdateRequest) {
        if proposal.config.ballot != self.ballot() || self.status() != Status::Primary {
            return;
        }
        if !self.primary_states.membership_matches(&proposal.config) {
            warn!(
                replica = %self.name,
                "downgrade proposal does not match current membership, dropping"
            );
            return;
        }

        if proposal.node == proposal.config.primary {
            proposal.config.primary = shoal_core::NodeAddress::invalid();
        } else {
            let removed = remove_node(&mut proposal.config.secondaries, proposal.node);
            assert!(
                removed,
                "downgrade-to-inactive target {} is neither primary nor secondary",
                proposal.node
            );
        }

        self.update_configuration_on_meta_server(
            ProposalType::DowngradeToInactive,
            proposal.node,
            proposal.config.clone(),
        );
    }

    /// Remove a group member entirely.
    fn remove(&mut self, proposal: &mut ConfigurationUpdateRequest) {
        if proposal.config.ballot != self.ballot() || self.status() != Status::Primary {
            return;
        }
        if !self.primary_states.membership_matches(&proposal.config) {
            warn!(
                replica = %self.name,
                "remove proposal does not match current membership, dropping"
            );
            return;
        }

        match self.primary_states.node_status(proposal.node) {
            Some(Status::Primary) => {
                assert_eq!(
                    proposal.config.primary, proposal.node,
                    "peer-status map disagrees with membership on the primary"
                );
                proposal.config.primary = shoal_core::NodeAddress::invalid();
            }
            Some(Status::Secondary) => {
                let removed = remove_node(&mut proposal.config.secondaries, proposal.node);
                assert!(
                    removed,
                    "peer-status map disagrees with membership on secondary {}",
                    proposal.node
                );
            }
            Some(Status::PotentialSecondary) => {
                // Learners are not in the membership record; nothing to edit.
            }
            _ => {}
        }

        self.update_configuration_on_meta_server(
            ProposalType::Remove,
            proposal.node,
            proposal.config.clone(),
        );
    }
}
