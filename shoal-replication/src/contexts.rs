//! Role-specific activity trackers.
//!
//! A replica carries extra state while it holds (or is leaving) a given
//! role: a secondary may have a checkpoint in flight, a potential secondary
//! a learning round. Transitions out of those roles must first wind this
//! activity down; `cleanup(force = false)` refuses while work is still
//! running, and the refusal propagates up as a rejected transition. The
//! meta service simply retries later, by which time the activity has
//! drained and the identical transition is accepted.

use shoal_core::TaskHandle;

use crate::types::LearnerSignature;

/// Extra state a replica carries while it is a secondary.
#[derive(Debug, Default)]
pub struct SecondaryContext {
    checkpoint_is_running: bool,
    checkpoint_task: Option<TaskHandle>,
}

impl SecondaryContext {
    /// Create an idle context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a checkpoint is currently running.
    pub fn checkpoint_is_running(&self) -> bool {
        self.checkpoint_is_running
    }

    /// Record the start of a checkpoint. The task handle, when present, is
    /// cancelled by a forced cleanup.
    pub fn begin_checkpoint(&mut self, task: Option<TaskHandle>) {
        self.checkpoint_is_running = true;
        self.checkpoint_task = task;
    }

    /// Record checkpoint completion.
    pub fn finish_checkpoint(&mut self) {
        self.checkpoint_is_running = false;
        self.checkpoint_task = None;
    }

    /// Wind down secondary-side activity.
    ///
    /// Returns `false` (and changes nothing) when a checkpoint is still
    /// running and `force` is not set.
    pub fn cleanup(&mut self, force: bool) -> bool {
        if self.checkpoint_is_running && !force {
            return false;
        }
        if let Some(task) = self.checkpoint_task.take() {
            task.cancel();
        }
        self.checkpoint_is_running = false;
        true
    }
}

/// Where a learning session stands, as far as two-phase commit is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LearnerStatus {
    /// No learning session.
    #[default]
    Idle,
    /// Learning; excluded from two-phase commit until the next group check
    /// re-admits the node.
    LearningWithoutPrepare,
    /// Learning while already receiving prepares.
    LearningWithPrepare,
}

/// Extra state a replica carries while it is a potential secondary.
#[derive(Debug, Default)]
pub struct PotentialSecondaryContext {
    learning_status: LearnerStatus,
    learning_signature: Option<LearnerSignature>,
    learning_is_running: bool,
    learning_task: Option<TaskHandle>,
}

impl PotentialSecondaryContext {
    /// Create an idle context.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current learning status.
    pub fn learning_status(&self) -> LearnerStatus {
        self.learning_status
    }

    /// Set the learning status.
    pub fn set_learning_status(&mut self, status: LearnerStatus) {
        self.learning_status = status;
    }

    /// The signature of the current learning session, if any.
    pub fn signature(&self) -> Option<LearnerSignature> {
        self.learning_signature
    }

    /// Record the start of a learning round under `signature`.
    pub fn begin_learning(&mut self, signature: LearnerSignature, task: Option<TaskHandle>) {
        self.learning_signature = Some(signature);
        self.learning_is_running = true;
        self.learning_task = task;
    }

    /// Record completion of the current learning round. The session (and its
    /// signature) remains until cleanup.
    pub fn finish_learning(&mut self) {
        self.learning_is_running = false;
        self.learning_task = None;
    }

    /// Wind down the learning session.
    ///
    /// Returns `false` (and changes nothing) when a learning round is still
    /// running and `force` is not set.
    pub fn cleanup(&mut self, force: bool) -> bool {
        if self.learning_is_running && !force {
            return false;
        }
        if let Some(task) = self.learning_task.take() {
            task.cancel();
        }
        self.learning_is_running = false;
        self.learning_signature = None;
        self.learning_status = LearnerStatus::Idle;
        true
    }
}
