//! # shoal-core
//!
//! Core runtime abstractions shared by every shoal crate.
//!
//! Shoal replicas interact with the outside world through a small set of
//! operations: time (sleeping, delays, timeouts) and task spawning. By
//! abstracting these behind traits, the replication logic can run unchanged
//! against real Tokio facilities in production and against a hand-cranked
//! deterministic clock in tests.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Replication Code                      │
//! │        Uses: TimeProvider, TaskProvider               │
//! └───────────────────────┬──────────────────────────────┘
//!                         │ depends on traits
//!          ┌──────────────┴──────────────┐
//!          ▼                             ▼
//!   ┌─────────────────┐         ┌─────────────────┐
//!   │  Deterministic   │         │   Production    │
//!   │ ManualTimeProv.  │         │ TokioTimeProvider│
//!   │ ManualTaskProv.  │         │ TokioTaskProvider│
//!   │ (hand-cranked)   │         │  (real runtime) │
//!   └─────────────────┘         └─────────────────┘
//! ```
//!
//! ## Provider Traits
//!
//! | Trait | Deterministic | Production | Purpose |
//! |-------|---------------|------------|---------|
//! | [`TimeProvider`] | Hand-cranked clock | Tokio time | Sleep, timeout, now() |
//! | [`TaskProvider`] | Polled queue | Tokio spawn_local | Cancellable local tasks |
//!
//! **Important**: Never call tokio directly in replication code.
//! - ❌ `tokio::time::sleep()`
//! - ✅ `time_provider.sleep()`
//!
//! ## Core Types
//!
//! - [`NodeAddress`]: IP address + port identifying a replica server, with an
//!   `invalid` sentinel for "no node" slots in membership records

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod manual;
mod node_address;
mod providers;
mod task;
mod time;

pub use manual::{ManualProviders, ManualTaskProvider, ManualTimeProvider};
pub use node_address::{NodeAddress, NodeAddressParseError};
pub use providers::{Providers, TokioProviders};
pub use task::{LocalFuture, TaskControl, TaskHandle, TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};
