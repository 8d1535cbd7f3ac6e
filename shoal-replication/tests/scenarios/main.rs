//! Scenario tests for the reconfiguration core.
//!
//! These tests drive a replica end to end through its public surface: events
//! go in through the partition's queue, and every observable effect comes
//! back out through the in-memory collaborators (meta server, peer
//! transport, stub, write pipeline).
//!
//! Most tests run on the hand-cranked providers so time and task order are
//! fully deterministic; `lifecycle` also exercises the production event
//! loop on a paused-clock Tokio runtime.

mod lifecycle;
mod membership;
mod sync_and_remove;
