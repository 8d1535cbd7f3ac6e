//! Passive reconciliation: remove instructions and configuration sync.
//!
//! Two inputs reach a replica without being proposals:
//!
//! - `on_remove` — the group's primary forwards the meta service's decision
//!   to drop this replica, as a one-way message carrying the replica's
//!   projected (inactive) configuration.
//! - `on_config_sync` — the meta service periodically pushes the
//!   authoritative configuration to every replica server. Non-primary
//!   replicas reconcile against it; a replica that discovers it is
//!   stranded (inactive in a group whose primary is gone or — according to
//!   the meta service — is itself) asks to be removed outright.

use shoal_core::Providers;
use tracing::{debug, info, warn};

use crate::executor::check_hashed_access;
use crate::replica::Replica;
use crate::types::{PartitionConfiguration, ReplicaConfiguration, Status};

impl<P: Providers> Replica<P> {
    /// Handle a one-way remove instruction from the group's primary.
    pub(crate) fn on_remove(&mut self, request: ReplicaConfiguration) {
        check_hashed_access(self.partition_hash);

        if request.ballot < self.ballot() {
            return;
        }

        // An add-secondary proposal at the same ballot arrived before this
        // remove: the remove is the delayed leftover of an earlier decision
        // about the same node, and the in-flight add must win.
        if request.ballot == self.ballot() && self.status() == Status::PotentialSecondary {
            warn!(
                replica = %self.name,
                ballot = %request.ballot,
                "remove request raced a same-ballot add, dropping"
            );
            return;
        }

        assert_eq!(
            request.status,
            Status::Inactive,
            "remove instructions always carry the inactive status"
        );
        self.update_local_configuration(request, false);
    }

    /// Reconcile against a periodic push of the authoritative configuration.
    pub(crate) fn on_config_sync(&mut self, config: PartitionConfiguration) {
        check_hashed_access(self.partition_hash);

        debug!(replica = %self.name, ballot = %config.ballot, "configuration sync");

        if config.ballot < self.ballot() {
            return;
        }

        if self.status() == Status::Primary || self.primary_states.reconfiguration_in_flight() {
            // Nothing to do: the primary holds the truth.
            return;
        }

        self.update_configuration(config.clone());

        if self.status() == Status::Inactive && !self.inactive_is_transient {
            let self_address = self.stub.primary_address();
            // The meta service believes this node is the primary (so no one
            // will ever remove us), or the group has no primary at all.
            // Either way this replica is stranded; ask to be dropped.
            if config.primary == self_address || config.primary.is_invalid() {
                info!(
                    replica = %self.name,
                    ballot = %config.ballot,
                    "stranded inactive replica, requesting removal from meta server"
                );
                self.stub.remove_replica_on_meta_server(&self.app_info, &config);
            }
        }
    }
}
