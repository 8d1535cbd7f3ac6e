//! Task provider abstraction for spawning cancellable local tasks.
//!
//! Replication code is single-threaded cooperative: spawned tasks run on the
//! same thread as their spawner and futures are not `Send`. Owners hold a
//! [`TaskHandle`] for each outstanding task (a delayed retry, a learner
//! timeout) and cancel it when the work is superseded.

use std::future::Future;
use std::pin::Pin;

/// A non-`Send` future with no output, as accepted by [`TaskProvider::spawn`].
pub type LocalFuture = Pin<Box<dyn Future<Output = ()> + 'static>>;

/// Control surface of a spawned task, as seen through its [`TaskHandle`].
pub trait TaskControl {
    /// Request cancellation. Idempotent; the task stops at its next yield
    /// point and never runs again.
    fn cancel(&self);

    /// Whether the task has run to completion or been cancelled.
    fn is_finished(&self) -> bool;
}

/// Handle to a spawned task.
///
/// Dropping the handle does NOT cancel the task; cancellation is always
/// explicit via [`TaskHandle::cancel`].
pub struct TaskHandle {
    control: Box<dyn TaskControl>,
}

impl TaskHandle {
    /// Wrap a [`TaskControl`] implementation into a handle.
    pub fn new(control: Box<dyn TaskControl>) -> Self {
        Self { control }
    }

    /// Request cancellation of the task.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Whether the task has run to completion or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.control.is_finished()
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Provider trait for spawning local tasks.
pub trait TaskProvider: Clone {
    /// Spawn a future as a cancellable task on the current thread.
    fn spawn(&self, future: LocalFuture) -> TaskHandle;
}

/// Production task provider using `tokio::task::spawn_local`.
///
/// Requires a `tokio::task::LocalSet` context (or a current-thread local
/// runtime); spawning outside one panics, which is a wiring bug.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTaskProvider;

struct TokioTaskControl {
    abort: tokio::task::AbortHandle,
}

impl TaskControl for TokioTaskControl {
    fn cancel(&self) {
        self.abort.abort();
    }

    fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

impl TaskProvider for TokioTaskProvider {
    fn spawn(&self, future: LocalFuture) -> TaskHandle {
        let join = tokio::task::spawn_local(future);
        TaskHandle::new(Box::new(TokioTaskControl {
            abort: join.abort_handle(),
        }))
    }
}
