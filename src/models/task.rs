//! Task tracking model for dispatched tool calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution status of a dispatched tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet routed.
    Pending,
    /// Routed to a client; awaiting a response.
    Processing,
    /// Response received.
    Completed,
    /// Routing failed or attempts exhausted.
    Failed,
}

/// Tracked execution record for one `tools/call` dispatch.
///
/// `attempts` never exceeds `max_attempts`, and reaching `max_attempts`
/// always leaves the task `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    /// Task identifier; equal to the dispatched message id.
    pub id: String,
    /// Client that requested the work.
    pub client_id: String,
    /// Current status.
    pub status: TaskStatus,
    /// Dispatch attempts made so far.
    pub attempts: u32,
    /// Upper bound on attempts.
    pub max_attempts: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskState {
    /// Construct a task with zero attempts.
    ///
    /// The task is pending unless `max_attempts` is zero, in which case it
    /// starts out exhausted and failed.
    #[must_use]
    pub fn new(id: impl Into<String>, client_id: impl Into<String>, max_attempts: u32) -> Self {
        let now = Utc::now();
        let mut task = Self {
            id: id.into(),
            client_id: client_id.into(),
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts,
            created_at: now,
            updated_at: now,
            error: None,
        };
        if task.is_exhausted() {
            task.fail_exhausted();
        }
        task
    }

    /// Whether no attempts remain.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    fn fail_exhausted(&mut self) {
        self.status = TaskStatus::Failed;
        if self.error.is_none() {
            self.error = Some(format!("max attempts ({}) reached", self.max_attempts));
        }
    }

    /// Merge a partial update.
    ///
    /// An exhausted task stays failed: only the error detail of a status
    /// update other than `Failed` is applied. Returns whether the requested
    /// status was applied.
    pub fn apply(&mut self, update: TaskUpdate) -> bool {
        let mut applied = true;
        if let Some(status) = update.status {
            if self.is_exhausted() && status != TaskStatus::Failed {
                applied = false;
            } else {
                self.status = status;
            }
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.updated_at = Utc::now();
        applied
    }

    /// Record one more attempt, failing the task when the bound is hit.
    pub fn record_attempt(&mut self) {
        if self.attempts < self.max_attempts {
            self.attempts += 1;
        }
        if self.is_exhausted() {
            self.fail_exhausted();
        }
        self.updated_at = Utc::now();
    }

    /// Whether the task has outlived `ttl` since its last update.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.updated_at > ttl
    }
}

/// Partial update merged by [`crate::registry::StateRegistry::update_task`].
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    /// New status.
    pub status: Option<TaskStatus>,
    /// Failure detail.
    pub error: Option<String>,
}

impl TaskUpdate {
    /// Update that only sets the status.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            error: None,
        }
    }

    /// Update that fails the task with `error`.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error: Some(error.into()),
        }
    }
}
