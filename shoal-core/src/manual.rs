//! Hand-cranked providers for deterministic tests.
//!
//! [`ManualTimeProvider`] holds a clock that only moves when the test calls
//! [`advance`](ManualTimeProvider::advance). [`ManualTaskProvider`] queues
//! spawned futures and only polls them when the test calls
//! [`poll`](ManualTaskProvider::poll). Together they make time-dependent
//! replication logic (delayed retries, timeouts) fully deterministic:
//!
//! ```
//! use std::time::Duration;
//! use shoal_core::{ManualProviders, Providers, TaskProvider, TimeProvider};
//!
//! let providers = ManualProviders::new();
//! let time = providers.time().clone();
//! providers.task().spawn(Box::pin(async move {
//!     time.sleep(Duration::from_secs(1)).await;
//! }));
//!
//! assert_eq!(providers.task().poll(), 0); // still sleeping
//! providers.time().advance(Duration::from_secs(1));
//! assert_eq!(providers.task().poll(), 1); // woke up and finished
//! ```
//!
//! Sleeping futures do not register wakers; after advancing the clock the
//! test must poll again for them to observe the new time.

use std::cell::{Cell, RefCell};
use std::pin::pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    LocalFuture, Providers, TaskControl, TaskHandle, TaskProvider, TimeError, TimeProvider,
};

/// Deterministic time provider driven by explicit [`advance`] calls.
///
/// [`advance`]: ManualTimeProvider::advance
#[derive(Clone, Default)]
pub struct ManualTimeProvider {
    now: Rc<Cell<Duration>>,
}

impl ManualTimeProvider {
    /// Create a new provider with the clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }
}

#[async_trait(?Send)]
impl TimeProvider for ManualTimeProvider {
    async fn sleep(&self, duration: Duration) {
        let deadline = self.now.get() + duration;
        let clock = self.now.clone();
        std::future::poll_fn(move |_cx| {
            if clock.get() >= deadline {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await;
    }

    fn now(&self) -> Duration {
        self.now.get()
    }

    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: std::future::Future<Output = T>,
    {
        let deadline = self.now.get() + duration;
        let clock = self.now.clone();
        let mut future = pin!(future);
        std::future::poll_fn(move |cx| {
            if let Poll::Ready(value) = future.as_mut().poll(cx) {
                return Poll::Ready(Ok(value));
            }
            if clock.get() >= deadline {
                return Poll::Ready(Err(TimeError::Elapsed));
            }
            Poll::Pending
        })
        .await
    }
}

#[derive(Default)]
struct TaskFlags {
    cancelled: Cell<bool>,
    finished: Cell<bool>,
}

struct ManualTaskControl {
    flags: Rc<TaskFlags>,
}

impl TaskControl for ManualTaskControl {
    fn cancel(&self) {
        self.flags.cancelled.set(true);
    }

    fn is_finished(&self) -> bool {
        self.flags.finished.get() || self.flags.cancelled.get()
    }
}

struct ManualTask {
    future: LocalFuture,
    flags: Rc<TaskFlags>,
}

/// Deterministic task provider: spawned futures sit in a queue until the
/// test polls them.
#[derive(Clone, Default)]
pub struct ManualTaskProvider {
    tasks: Rc<RefCell<Vec<ManualTask>>>,
}

impl ManualTaskProvider {
    /// Create a new provider with an empty task queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll every queued task once. Returns how many completed this pass.
    ///
    /// Cancelled tasks are dropped without being polled. Tasks spawned while
    /// polling are queued behind the survivors and picked up next pass.
    pub fn poll(&self) -> usize {
        let mut current = self.tasks.take();
        let mut completed = 0;
        let mut cx = Context::from_waker(Waker::noop());

        current.retain_mut(|task| {
            if task.flags.cancelled.get() {
                return false;
            }
            match task.future.as_mut().poll(&mut cx) {
                Poll::Ready(()) => {
                    task.flags.finished.set(true);
                    completed += 1;
                    false
                }
                Poll::Pending => true,
            }
        });

        // Keep survivors ahead of anything spawned during the pass.
        let mut tasks = self.tasks.borrow_mut();
        let spawned = std::mem::take(&mut *tasks);
        *tasks = current;
        tasks.extend(spawned);

        completed
    }

    /// Number of tasks still queued (pending or cancelled-but-unswept).
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }
}

impl TaskProvider for ManualTaskProvider {
    fn spawn(&self, future: LocalFuture) -> TaskHandle {
        let flags = Rc::new(TaskFlags::default());
        self.tasks.borrow_mut().push(ManualTask {
            future,
            flags: flags.clone(),
        });
        TaskHandle::new(Box::new(ManualTaskControl { flags }))
    }
}

/// Bundle of the deterministic providers.
#[derive(Clone, Default)]
pub struct ManualProviders {
    time: ManualTimeProvider,
    task: ManualTaskProvider,
}

impl ManualProviders {
    /// Create a new bundle with the clock at zero and no queued tasks.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Providers for ManualProviders {
    type Time = ManualTimeProvider;
    type Task = ManualTaskProvider;

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }
}
