//! Write-path collaborator interfaces.
//!
//! The reconfiguration core does not replicate data; it only needs narrow
//! views of the components that do. Each view is a trait here, with an
//! in-memory implementation for tests and simulated processes:
//!
//! | Trait | Concern | In-memory impl |
//! |-------|---------|----------------|
//! | [`PrepareList`] | prepared-mutation window over the log | [`InMemoryPrepareList`] |
//! | [`StateMachine`] | the app's committed/durable decrees | [`InMemoryStateMachine`] |
//! | [`WriteQueue`] | admission of pending client writes | [`InMemoryWriteQueue`] |
//! | [`WritePipeline`] | two-phase-commit side effects | [`InMemoryWritePipeline`] |
//!
//! All methods take `&self`: the traits are shared through `Rc` and every
//! call happens on the partition's serial executor, so implementations use
//! interior mutability without locking.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};

use crate::types::{Decree, Mutation};

/// The prepared-mutation window over the mutation log.
pub trait PrepareList {
    /// Highest decree that has been prepared.
    fn max_decree(&self) -> Decree;

    /// Highest decree committed through two-phase commit.
    fn last_committed_decree(&self) -> Decree;

    /// Drop prepared mutations above `decree`.
    fn truncate(&self, decree: Decree);

    /// Discard the window entirely and restart it at `decree`.
    fn reset(&self, decree: Decree);

    /// Fetch the prepared mutation at `decree`, if one is held.
    fn get_mutation_by_decree(&self, decree: Decree) -> Option<Mutation>;
}

/// The app's view of durability: which decrees it has applied and flushed.
pub trait StateMachine {
    /// Highest decree the app has applied.
    fn last_committed_decree(&self) -> Decree;

    /// Highest decree the app has made durable.
    fn last_durable_decree(&self) -> Decree;
}

/// Admission queue for client writes awaiting two-phase commit.
pub trait WriteQueue {
    /// Hand out the next admissible write, given how many decrees are
    /// currently in flight (`max_prepared - last_committed`).
    fn check_possible_work(&self, window: i32) -> Option<Mutation>;

    /// Drop all pending writes. Called when the primary role is torn down.
    fn clear(&self);
}

/// Hooks into the two-phase-commit engine that local transitions invoke.
pub trait WritePipeline {
    /// Quash in-flight prepares before the replica changes role.
    fn cleanup_preparing_mutations(&self, force: bool);

    /// Start a prepare for `mutation`.
    fn begin_prepare(&self, mutation: Mutation);

    /// Start the primary's periodic peer-status probe.
    fn begin_group_check(&self);
}

// =============================================================================
// In-memory implementations
// =============================================================================

#[derive(Debug, Default)]
struct PrepareListInner {
    mutations: BTreeMap<Decree, Mutation>,
    last_committed: Decree,
    last_truncate: Option<Decree>,
    last_reset: Option<Decree>,
}

/// In-memory [`PrepareList`].
///
/// Also records the most recent `truncate`/`reset` argument so tests can
/// assert on transition side effects.
#[derive(Debug, Default)]
pub struct InMemoryPrepareList {
    inner: RefCell<PrepareListInner>,
}

impl InMemoryPrepareList {
    /// Create an empty list committed through `last_committed`.
    pub fn new(last_committed: Decree) -> Self {
        Self {
            inner: RefCell::new(PrepareListInner {
                last_committed,
                ..Default::default()
            }),
        }
    }

    /// Seed a prepared mutation.
    pub fn insert(&self, mutation: Mutation) {
        self.inner
            .borrow_mut()
            .mutations
            .insert(mutation.decree, mutation);
    }

    /// Advance the committed decree.
    pub fn set_last_committed(&self, decree: Decree) {
        self.inner.borrow_mut().last_committed = decree;
    }

    /// The most recent `truncate` argument, if any.
    pub fn last_truncate(&self) -> Option<Decree> {
        self.inner.borrow().last_truncate
    }

    /// The most recent `reset` argument, if any.
    pub fn last_reset(&self) -> Option<Decree> {
        self.inner.borrow().last_reset
    }
}

impl PrepareList for InMemoryPrepareList {
    fn max_decree(&self) -> Decree {
        let inner = self.inner.borrow();
        inner
            .mutations
            .keys()
            .next_back()
            .copied()
            .unwrap_or(inner.last_committed)
            .max(inner.last_committed)
    }

    fn last_committed_decree(&self) -> Decree {
        self.inner.borrow().last_committed
    }

    fn truncate(&self, decree: Decree) {
        let mut inner = self.inner.borrow_mut();
        inner.mutations.retain(|d, _| *d <= decree);
        inner.last_truncate = Some(decree);
    }

    fn reset(&self, decree: Decree) {
        let mut inner = self.inner.borrow_mut();
        inner.mutations.clear();
        inner.last_committed = decree;
        inner.last_reset = Some(decree);
    }

    fn get_mutation_by_decree(&self, decree: Decree) -> Option<Mutation> {
        self.inner.borrow().mutations.get(&decree).cloned()
    }
}

/// In-memory [`StateMachine`] with settable decrees.
#[derive(Debug, Default)]
pub struct InMemoryStateMachine {
    committed: Cell<Decree>,
    durable: Cell<Decree>,
}

impl InMemoryStateMachine {
    /// Create a state machine at the given decrees.
    pub fn new(committed: Decree, durable: Decree) -> Self {
        Self {
            committed: Cell::new(committed),
            durable: Cell::new(durable),
        }
    }

    /// Set the applied decree.
    pub fn set_last_committed(&self, decree: Decree) {
        self.committed.set(decree);
    }

    /// Set the durable decree.
    pub fn set_last_durable(&self, decree: Decree) {
        self.durable.set(decree);
    }
}

impl StateMachine for InMemoryStateMachine {
    fn last_committed_decree(&self) -> Decree {
        self.committed.get()
    }

    fn last_durable_decree(&self) -> Decree {
        self.durable.get()
    }
}

#[derive(Debug, Default)]
struct WriteQueueInner {
    queue: VecDeque<Mutation>,
    last_window: Option<i32>,
    cleared: u32,
}

/// In-memory [`WriteQueue`]: a FIFO with an in-flight cap.
#[derive(Debug)]
pub struct InMemoryWriteQueue {
    inner: RefCell<WriteQueueInner>,
    max_inflight: i32,
}

impl InMemoryWriteQueue {
    /// Create a queue that admits writes while fewer than `max_inflight`
    /// decrees are outstanding.
    pub fn new(max_inflight: i32) -> Self {
        Self {
            inner: RefCell::new(WriteQueueInner::default()),
            max_inflight,
        }
    }

    /// Enqueue a pending write.
    pub fn push(&self, mutation: Mutation) {
        self.inner.borrow_mut().queue.push_back(mutation);
    }

    /// The window passed to the most recent admission check.
    pub fn last_window(&self) -> Option<i32> {
        self.inner.borrow().last_window
    }

    /// How many times the queue has been cleared.
    pub fn cleared(&self) -> u32 {
        self.inner.borrow().cleared
    }

    /// Number of writes still queued.
    pub fn len(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().queue.is_empty()
    }
}

impl Default for InMemoryWriteQueue {
    fn default() -> Self {
        Self::new(i32::MAX)
    }
}

impl WriteQueue for InMemoryWriteQueue {
    fn check_possible_work(&self, window: i32) -> Option<Mutation> {
        let mut inner = self.inner.borrow_mut();
        inner.last_window = Some(window);
        if window >= self.max_inflight {
            return None;
        }
        inner.queue.pop_front()
    }

    fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.queue.clear();
        inner.cleared += 1;
    }
}

#[derive(Debug, Default)]
struct WritePipelineInner {
    prepares: Vec<Mutation>,
    cleanups: Vec<bool>,
    group_checks: u32,
}

/// In-memory [`WritePipeline`]: records every hook invocation.
#[derive(Debug, Default)]
pub struct InMemoryWritePipeline {
    inner: RefCell<WritePipelineInner>,
}

impl InMemoryWritePipeline {
    /// Create a pipeline with empty records.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutations passed to `begin_prepare`, in order.
    pub fn prepares(&self) -> Vec<Mutation> {
        self.inner.borrow().prepares.clone()
    }

    /// `force` arguments passed to `cleanup_preparing_mutations`, in order.
    pub fn cleanups(&self) -> Vec<bool> {
        self.inner.borrow().cleanups.clone()
    }

    /// Number of `begin_group_check` invocations.
    pub fn group_checks(&self) -> u32 {
        self.inner.borrow().group_checks
    }
}

impl WritePipeline for InMemoryWritePipeline {
    fn cleanup_preparing_mutations(&self, force: bool) {
        self.inner.borrow_mut().cleanups.push(force);
    }

    fn begin_prepare(&self, mutation: Mutation) {
        self.inner.borrow_mut().prepares.push(mutation);
    }

    fn begin_group_check(&self) {
        self.inner.borrow_mut().group_checks += 1;
    }
}
