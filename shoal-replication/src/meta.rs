//! Meta-service update client.
//!
//! The meta service owns partition membership; a replica never edits it
//! locally. Every membership edit is proposed through the update RPC and
//! only the reply — carrying the authoritative record — changes local
//! state. This module implements the proposing side:
//!
//! ```text
//! Replica (primary)                         Meta service
//!   │                                          │
//!   │  quiesce: status → INACTIVE (transient)  │
//!   │  ballot := local + 1                     │
//!   │                                          │
//!   │── update_partition_configuration ───────>│
//!   │                                          │  (decides: accept or
//!   │<───────── {err, config} ─────────────────│   report the winner)
//!   │                                          │
//!   │  err retryable: resend same request      │
//!   │                 after retry delay ───────┤
//!   │  err terminal:  apply returned config    │
//!   │                                          │
//! ```
//!
//! The quiesce step disables two-phase commit for the whole exchange: no
//! write can commit under a membership that might be superseded mid-flight.
//! This costs a transient dip in write throughput and buys the simplest
//! possible reasoning about what the group looked like for every committed
//! decree.
//!
//! At most one update is outstanding per partition. The in-flight RPC (or
//! its delayed retry) is held as `reconfiguration_task`; clearing that
//! handle is the only way the exchange ends.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use shoal_core::{NodeAddress, Providers, TaskProvider, TimeProvider};
use tracing::{debug, info, warn};

use crate::executor::{ReplicaEvent, check_hashed_access};
use crate::replica::Replica;
use crate::types::{
    ConfigurationUpdateRequest, ConfigurationUpdateResponse, Decree, MetaError,
    PartitionConfiguration, ProposalType, ReplicationError, Status, replica_config_for_node,
};

/// Tunables for the reconfiguration core.
#[derive(Debug, Clone)]
pub struct ReplicationOptions {
    /// Delay before resending a meta-service update that failed with a
    /// retryable error.
    pub meta_retry_delay: Duration,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            meta_retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Client side of the meta service's partition-configuration update RPC.
#[async_trait(?Send)]
pub trait MetaServerClient {
    /// Propose a membership edit to the meta server at `target`.
    ///
    /// # Errors
    ///
    /// Returns a [`ReplicationError`] for transport-level failures; a reply
    /// that was delivered carries its own server-side status.
    async fn update_partition_configuration(
        &self,
        target: NodeAddress,
        request: ConfigurationUpdateRequest,
    ) -> Result<ConfigurationUpdateResponse, ReplicationError>;
}

// =============================================================================
// Update protocol on the replica
// =============================================================================

impl<P: Providers> Replica<P> {
    /// Propose `new_config` (with the ballot bumped by one) to the meta
    /// service, quiescing writes for the duration of the exchange.
    ///
    /// Callable only from the primary, except for the bootstrap proposal
    /// types (`AssignPrimary`, `UpgradeToPrimary`) which run before the
    /// node holds the role.
    pub(crate) fn update_configuration_on_meta_server(
        &mut self,
        kind: ProposalType,
        node: NodeAddress,
        mut new_config: PartitionConfiguration,
    ) {
        new_config.last_committed_decree = self.last_committed_decree();

        if kind != ProposalType::AssignPrimary && kind != ProposalType::UpgradeToPrimary {
            assert_eq!(self.status(), Status::Primary);
            assert_eq!(new_config.ballot, self.primary_states.membership().ballot);
        }

        // Disable 2pc during reconfiguration. Doing it for every proposal
        // type (not just the downgrades that strictly need it) keeps every
        // exchange on the same single code path.
        self.update_local_configuration_with_no_ballot_change(Status::Inactive);
        debug_assert_eq!(self.status(), Status::Inactive);
        self.inactive_is_transient = true;

        let mut request = ConfigurationUpdateRequest {
            info: self.app_info.clone(),
            config: new_config,
            kind,
            node,
        };
        request.config.ballot = request.config.ballot.next();

        // Normal paths never leave a task behind at this point; a leftover
        // handle is cancelled before it can race the new exchange.
        if let Some(task) = self.primary_states.reconfiguration_task.take() {
            task.cancel();
        }

        info!(
            replica = %self.name,
            ballot = %request.config.ballot,
            kind = %request.kind,
            node = %request.node,
            "sending configuration update to meta server"
        );

        self.send_reconfiguration_request(Rc::new(request), None);
    }

    /// Spawn the task that (optionally after `delay`) sends `request` to the
    /// current meta leader and feeds the reply back into the event queue.
    pub(crate) fn send_reconfiguration_request(
        &mut self,
        request: Rc<ConfigurationUpdateRequest>,
        delay: Option<Duration>,
    ) {
        let target = self.stub.meta_server();
        let meta = self.meta.clone();
        let time = self.providers.time().clone();
        let events = self.events.clone();

        let task = self.providers.task().spawn(Box::pin(async move {
            if let Some(delay) = delay {
                time.sleep(delay).await;
            }
            let reply = meta
                .update_partition_configuration(target, (*request).clone())
                .await;
            // A closed queue means the replica is gone; the reply is moot.
            let _ = events.send(ReplicaEvent::MetaReply { request, reply });
        }));

        self.primary_states.reconfiguration_task = Some(task);
    }

    /// Handle the reply (or transport failure) of an outstanding update.
    pub(crate) fn on_update_configuration_on_meta_server_reply(
        &mut self,
        request: Rc<ConfigurationUpdateRequest>,
        reply: Result<ConfigurationUpdateResponse, ReplicationError>,
    ) {
        check_hashed_access(self.partition_hash);

        // Something superseded this reconfiguration: the replica left the
        // transient-inactive state, or the process lost the meta service.
        if self.status() != Status::Inactive || !self.stub.is_connected() {
            self.primary_states.reconfiguration_task = None;
            return;
        }

        let resp = match reply {
            Ok(resp) if resp.err == MetaError::Ok || resp.err == MetaError::InvalidVersion => resp,
            Ok(resp) => {
                debug!(
                    replica = %self.name,
                    err = %resp.err,
                    ballot = %request.config.ballot,
                    "meta server rejected configuration update, will retry"
                );
                self.send_reconfiguration_request(request, Some(self.options.meta_retry_delay));
                return;
            }
            Err(err) => {
                debug!(
                    replica = %self.name,
                    error = %err,
                    ballot = %request.config.ballot,
                    "configuration update failed in transport, will retry"
                );
                self.send_reconfiguration_request(request, Some(self.options.meta_retry_delay));
                return;
            }
        };

        info!(
            replica = %self.name,
            kind = %request.kind,
            err = %resp.err,
            ballot = %resp.config.ballot,
            local_ballot = %self.ballot(),
            status = %self.status(),
            "configuration update reply"
        );

        if resp.config.ballot < self.ballot() {
            warn!(
                replica = %self.name,
                ballot = %resp.config.ballot,
                local_ballot = %self.ballot(),
                "meta server replied with an outdated configuration, dropping"
            );
            self.primary_states.reconfiguration_task = None;
            return;
        }

        if resp.err == MetaError::Ok {
            assert_eq!(request.config.pid, resp.config.pid);
            assert_eq!(request.config.primary, resp.config.primary);
            assert_eq!(request.config.secondaries, resp.config.secondaries);

            match request.kind {
                ProposalType::UpgradeToPrimary => {
                    self.primary_states.last_prepare_decree_on_new_primary =
                        self.prepare_list.max_decree();
                }
                ProposalType::AssignPrimary => {
                    self.primary_states.last_prepare_decree_on_new_primary = Decree::ZERO;
                }
                ProposalType::DowngradeToSecondary
                | ProposalType::DowngradeToInactive
                | ProposalType::UpgradeToSecondary => {}
                ProposalType::Remove => {
                    if request.node != self.stub.primary_address() {
                        let rconfig = replica_config_for_node(&resp.config, request.node);
                        self.peers.send_remove_replica(request.node, rconfig);
                    }
                }
                ProposalType::AddSecondary | ProposalType::AddSecondaryForLb => {
                    unreachable!("add-secondary proposals never reach the meta update path")
                }
            }
        }

        self.update_configuration(resp.config);
        self.primary_states.reconfiguration_task = None;
    }
}

// =============================================================================
// In-memory meta server
// =============================================================================

#[derive(Debug)]
struct MetaInner {
    config: PartitionConfiguration,
    requests: Vec<ConfigurationUpdateRequest>,
    transport_failures: VecDeque<ReplicationError>,
    server_failures: VecDeque<MetaError>,
}

/// In-memory meta service for one partition.
///
/// Accepts an update iff it proposes exactly `current ballot + 1` (the
/// meta service's version check); anything else loses with
/// [`MetaError::InvalidVersion`] and the reply carries the standing record.
/// Failures can be scripted ahead of time to exercise the retry path.
#[derive(Debug)]
pub struct InMemoryMetaServer {
    inner: RefCell<MetaInner>,
}

impl InMemoryMetaServer {
    /// Create a meta server holding `initial` as the authoritative record.
    pub fn new(initial: PartitionConfiguration) -> Self {
        Self {
            inner: RefCell::new(MetaInner {
                config: initial,
                requests: Vec::new(),
                transport_failures: VecDeque::new(),
                server_failures: VecDeque::new(),
            }),
        }
    }

    /// The authoritative record.
    pub fn config(&self) -> PartitionConfiguration {
        self.inner.borrow().config.clone()
    }

    /// Overwrite the authoritative record (e.g. to simulate a concurrent
    /// winner).
    pub fn set_config(&self, config: PartitionConfiguration) {
        self.inner.borrow_mut().config = config;
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<ConfigurationUpdateRequest> {
        self.inner.borrow().requests.clone()
    }

    /// Fail the next update at the transport level.
    pub fn fail_next_transport(&self, error: ReplicationError) {
        self.inner.borrow_mut().transport_failures.push_back(error);
    }

    /// Reject the next update with a server-side status.
    pub fn fail_next(&self, error: MetaError) {
        self.inner.borrow_mut().server_failures.push_back(error);
    }
}

#[async_trait(?Send)]
impl MetaServerClient for InMemoryMetaServer {
    async fn update_partition_configuration(
        &self,
        _target: NodeAddress,
        request: ConfigurationUpdateRequest,
    ) -> Result<ConfigurationUpdateResponse, ReplicationError> {
        let mut inner = self.inner.borrow_mut();
        inner.requests.push(request.clone());

        if let Some(error) = inner.transport_failures.pop_front() {
            return Err(error);
        }
        if let Some(err) = inner.server_failures.pop_front() {
            return Ok(ConfigurationUpdateResponse {
                err,
                config: inner.config.clone(),
            });
        }

        if request.config.ballot == inner.config.ballot.next() {
            inner.config = request.config;
            Ok(ConfigurationUpdateResponse {
                err: MetaError::Ok,
                config: inner.config.clone(),
            })
        } else {
            Ok(ConfigurationUpdateResponse {
                err: MetaError::InvalidVersion,
                config: inner.config.clone(),
            })
        }
    }
}
