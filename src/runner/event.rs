//! Structured run events
//!
//! The engine reports progress as [`RunEvent`]s; presentation layers (the
//! console reporter, test recorders) subscribe by implementing [`EventSink`].

use std::time::Duration;

/// Why a task did not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The precondition evaluated to false
    PreconditionFalse,

    /// A dependency failed (or was itself skipped because of a failure)
    DependencyFailed(String),

    /// The run was cancelled before the task started
    Cancelled,
}

impl SkipReason {
    /// Whether dependents of a task skipped for this reason must be skipped too
    pub fn blocks_dependents(&self) -> bool {
        !matches!(self, SkipReason::PreconditionFalse)
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::PreconditionFalse => write!(f, "precondition was false"),
            SkipReason::DependencyFailed(dep) => write!(f, "dependency '{}' failed", dep),
            SkipReason::Cancelled => write!(f, "run was cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RunStarted {
        plan: Vec<String>,
    },
    TaskStarted {
        task: String,
        description: Option<String>,
    },
    TaskSkipped {
        task: String,
        reason: SkipReason,
    },
    TaskSucceeded {
        task: String,
        duration: Duration,
    },
    TaskFailed {
        task: String,
        error: String,
        /// The task has `continue_on_error` set
        tolerated: bool,
        duration: Duration,
    },
    RunCompleted {
        success: bool,
        cancelled: bool,
        failed: Vec<String>,
        duration: Duration,
    },
}

impl RunEvent {
    /// Task the event refers to, if any
    pub fn task(&self) -> Option<&str> {
        match self {
            RunEvent::TaskStarted { task, .. }
            | RunEvent::TaskSkipped { task, .. }
            | RunEvent::TaskSucceeded { task, .. }
            | RunEvent::TaskFailed { task, .. } => Some(task),
            RunEvent::RunStarted { .. } | RunEvent::RunCompleted { .. } => None,
        }
    }
}

/// Subscriber to the engine's event stream
pub trait EventSink {
    fn on_event(&self, event: &RunEvent);
}

impl<F> EventSink for F
where
    F: Fn(&RunEvent),
{
    fn on_event(&self, event: &RunEvent) {
        self(event)
    }
}
