//! Completion tracking for long-running hardware actions
//!
//! Chassis moves and arm moves take a while to finish on the robot. Instead
//! of parking a thread per command until the hardware reports completion,
//! each action is modelled as a small state machine that the driver updates
//! from whatever thread its transport calls back on, and that callers poll.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// State of the tracked action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionStatus {
    /// Nothing has been started
    #[default]
    Idle,
    /// Waiting for the hardware to finish
    InProgress,
    /// Finished successfully
    Completed,
    /// Deadline passed without completion
    TimedOut,
    /// Hardware reported an error
    Failed,
}

impl ActionStatus {
    /// Whether a new action may be started
    pub fn is_ready(&self) -> bool {
        !matches!(self, ActionStatus::InProgress)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Idle => write!(f, "Ready"),
            ActionStatus::InProgress => write!(f, "Moving..."),
            ActionStatus::Completed => write!(f, "Completed"),
            ActionStatus::TimedOut => write!(f, "Timeout"),
            ActionStatus::Failed => write!(f, "Error"),
        }
    }
}

#[derive(Debug, Default)]
struct TrackerInner {
    status: ActionStatus,
    deadline: Option<Instant>,
    last_error: Option<String>,
}

/// Shared handle to one action slot (e.g. "chassis" or "arm")
#[derive(Debug, Clone)]
pub struct ActionTracker {
    name: &'static str,
    inner: Arc<Mutex<TrackerInner>>,
}

impl ActionTracker {
    /// Create an idle tracker
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(TrackerInner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Mark an action as started; returns `false` if one is still running
    pub fn begin(&self, timeout: Duration) -> bool {
        let mut inner = self.lock();
        Self::expire(&mut inner, self.name);
        if inner.status == ActionStatus::InProgress {
            return false;
        }
        inner.status = ActionStatus::InProgress;
        inner.deadline = Some(Instant::now() + timeout);
        inner.last_error = None;
        true
    }

    /// Hardware reported completion
    pub fn complete(&self) {
        let mut inner = self.lock();
        if inner.status == ActionStatus::InProgress {
            inner.status = ActionStatus::Completed;
            inner.deadline = None;
        }
    }

    /// Hardware reported an error
    pub fn fail(&self, error: impl Into<String>) {
        let mut inner = self.lock();
        let error = error.into();
        tracing::warn!("{} action failed: {}", self.name, error);
        inner.status = ActionStatus::Failed;
        inner.deadline = None;
        inner.last_error = Some(error);
    }

    /// Forget any running action (e.g. after an emergency stop)
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.status = ActionStatus::Idle;
        inner.deadline = None;
    }

    /// Current status, expiring an overdue action first
    pub fn poll(&self) -> ActionStatus {
        let mut inner = self.lock();
        Self::expire(&mut inner, self.name);
        inner.status
    }

    /// Whether a new action may be started
    pub fn is_ready(&self) -> bool {
        self.poll().is_ready()
    }

    /// Message of the last failure
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    fn expire(inner: &mut TrackerInner, name: &str) {
        if inner.status != ActionStatus::InProgress {
            return;
        }
        if let Some(deadline) = inner.deadline {
            if Instant::now() >= deadline {
                tracing::warn!("{} action timed out", name);
                inner.status = ActionStatus::TimedOut;
                inner.deadline = None;
            }
        }
    }
}
