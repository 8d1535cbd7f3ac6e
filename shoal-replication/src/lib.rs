//! # shoal-replication
//!
//! The replica reconfiguration core of shoal's partitioned primary/secondary
//! replication.
//!
//! Each partition of an app is a replication group served by one primary and
//! a set of secondaries, with candidates (learners) catching up on the side.
//! Group membership is owned by an external **meta service** and versioned
//! by a monotonically increasing **ballot**; replicas never edit membership
//! locally. This crate implements what a replica does about membership: take
//! in proposals, run the local status-transition engine, execute
//! primary-side group edits, drive the update RPC against the meta service,
//! and reconcile against periodic pushes of the authoritative record —
//! all while tolerating stale, duplicated, and reordered messages.
//!
//! ## Architecture
//!
//! ```text
//!                      ┌─────────────────────────────┐
//!                      │         Meta service         │
//!                      │  owns membership + ballots   │
//!                      └──────┬───────────────▲───────┘
//!            proposals /      │               │  update RPC
//!            config sync      │               │  (ballot + 1, retried)
//!                      ┌──────▼───────────────┴───────┐
//!                      │   Replica (this crate)        │
//!                      │  proposal handler             │
//!                      │  transition engine            │
//!                      │  primary bookkeeping          │
//!                      │  meta-update client           │
//!                      └──────┬───────────────────────┘
//!          LEARN_ADD_LEARNER, │
//!          REMOVE_REPLICA     ▼
//!                      ┌──────────────────────────────┐
//!                      │        Peer replicas          │
//!                      └──────────────────────────────┘
//! ```
//!
//! Two rules carry most of the weight:
//!
//! 1. **Ballots only grow.** Every handler starts by comparing ballots, so
//!    a stale or duplicated message is dropped by one comparison, no matter
//!    how it was delayed or reordered.
//! 2. **Writes quiesce before membership moves.** A replica proposing a
//!    reconfiguration first steps itself into a *transient inactive* state,
//!    disabling two-phase commit until the meta service's answer arrives.
//!    No write can commit under a membership that might already have lost.
//!
//! ## Crate Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | `Ballot`, `Decree`, `Status`, membership records, proposal envelopes |
//! | [`executor`] | per-partition serial event loop and the hashed-access guard |
//! | [`replica`] | the `Replica` object and its wiring |
//! | [`transition`] | the local status-transition engine |
//! | [`proposal`] | proposal intake and primary-side group edits |
//! | [`meta`] | meta-service update client, retry loop, in-memory meta server |
//! | [`sync`] | remove instructions and periodic config sync |
//! | [`primary`] | primary bookkeeping: membership cache, peer statuses, learners |
//! | [`contexts`] | checkpoint/learning activity trackers |
//! | [`collaborators`] | write-path seams: prepare list, app, write queue, 2pc hooks |
//! | [`stub`] | process-wide services and one-way peer messaging |

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod collaborators;
pub mod contexts;
pub mod executor;
pub mod meta;
pub mod primary;
pub mod proposal;
pub mod replica;
pub mod stub;
pub mod sync;
pub mod transition;
pub mod types;

#[cfg(test)]
pub(crate) mod test_util;

// Re-export key types at crate root for convenience.
pub use executor::{
    EventReceiver, EventSender, PartitionScope, ReplicaEvent, check_hashed_access, partition_hash,
    replica_channel, run_replica,
};
pub use meta::{InMemoryMetaServer, MetaServerClient, ReplicationOptions};
pub use replica::{Replica, ReplicaSetup};
pub use types::{
    AppInfo, Ballot, ConfigurationUpdateRequest, ConfigurationUpdateResponse, Decree,
    GroupCheckRequest, LearnerSignature, MetaError, Mutation, PartitionConfiguration, PartitionId,
    ProposalType, ReplicaConfiguration, ReplicationError, Status, replica_config_for_node,
};
