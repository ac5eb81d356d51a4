//! Task lifecycle reporting

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::worker::Stage;

/// Events emitted while orchestrating a run
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A run was accepted and is waiting for its identity lock
    Queued { id: String },
    /// A run acquired its lock and is starting
    Started { id: String },
    /// A lifecycle hook is starting
    StageStarted { id: String, stage: Stage },
    /// A lifecycle hook returned
    StageFinished {
        id: String,
        stage: Stage,
        duration: Duration,
        error: Option<String>,
    },
    /// A run finished successfully
    Completed { id: String, duration: Duration },
    /// A run finished with an error
    Failed {
        id: String,
        duration: Duration,
        error: String,
    },
    /// A run was canceled
    Canceled { id: String, duration: Duration },
    /// A run was refused because the same identity was already running
    Rejected { id: String },
}

impl TaskEvent {
    /// Identity of the run the event belongs to
    pub fn id(&self) -> &str {
        match self {
            Self::Queued { id }
            | Self::Started { id }
            | Self::StageStarted { id, .. }
            | Self::StageFinished { id, .. }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. }
            | Self::Canceled { id, .. }
            | Self::Rejected { id } => id,
        }
    }
}

/// Trait for reporting task execution progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Queued { id } => {
                tracing::debug!(task = %id, "queued");
            }
            TaskEvent::Started { id } => {
                tracing::info!(task = %id, "Starting {}", id);
            }
            TaskEvent::StageStarted { id, stage } => {
                tracing::debug!(task = %id, stage = %stage, "stage started");
            }
            TaskEvent::StageFinished {
                id,
                stage,
                duration,
                error,
            } => match error {
                Some(error) => tracing::warn!(
                    task = %id,
                    stage = %stage,
                    "{} failed after {:.1}s: {}",
                    stage,
                    duration.as_secs_f64(),
                    error
                ),
                None => tracing::debug!(
                    task = %id,
                    stage = %stage,
                    "{} finished in {:.1}s",
                    stage,
                    duration.as_secs_f64()
                ),
            },
            TaskEvent::Completed { id, duration } => {
                tracing::info!(task = %id, "{} completed in {:.1}s", id, duration.as_secs_f64());
            }
            TaskEvent::Failed { id, duration, error } => {
                tracing::error!(task = %id, "{} failed after {:.1}s: {}", id, duration.as_secs_f64(), error);
            }
            TaskEvent::Canceled { id, duration } => {
                tracing::warn!(task = %id, "{} canceled after {:.1}s", id, duration.as_secs_f64());
            }
            TaskEvent::Rejected { id } => {
                tracing::warn!(task = %id, "{} is already running; run rejected", id);
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events belonging to one identity
    pub fn events_for(&self, id: &str) -> Vec<TaskEvent> {
        self.events().into_iter().filter(|e| e.id() == id).collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Registry of task reporters
#[derive(Clone)]
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register<R: TaskReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    /// Register a reporter the caller keeps a handle to
    pub fn register_shared(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }

    /// Broadcast an event to all registered reporters
    pub fn broadcast(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        self.broadcast(event);
    }
}
