//! Task reports
//!
//! A [`Report`] is created when a run is queued, mutated by the worker's
//! lifecycle hooks and finalized by the orchestrator. Hooks signal failure by
//! recording an error; the first recorded error is the one that sticks.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use stagehand_tools::CommandResult;

/// Parameters passed to a run, readable by every hook
pub type Params = BTreeMap<String, String>;

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, waiting to start
    #[default]
    Pending,
    /// Lifecycle stages are executing
    Running,
    /// Finished without an error
    Succeeded,
    /// Finished with an error
    Failed,
    /// Canceled by the caller
    Canceled,
}

impl TaskStatus {
    /// Whether this is one of the final states
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one orchestrated run
pub struct Report {
    id: String,
    status: TaskStatus,
    error: Option<String>,
    error_after_cancel: bool,
    cancel: Option<CancellationToken>,
    extras: Option<Box<dyn Any + Send + Sync>>,
    params: Params,
    batch_mode: bool,
    started_at: Option<DateTime<Utc>>,
    duration: Duration,
}

impl Report {
    /// Pending report for worker `id`
    pub fn new(id: impl Into<String>, params: Params, batch_mode: bool) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            error: None,
            error_after_cancel: false,
            cancel: None,
            extras: None,
            params,
            batch_mode,
            started_at: None,
            duration: Duration::ZERO,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Error text; present exactly when the run failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }

    /// Record a failure.
    ///
    /// Only the first failure is kept; later calls are ignored so cleanup
    /// errors never hide the original cause. Returns whether the message was
    /// recorded.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.error.is_some() {
            return false;
        }
        let message = message.into();
        self.error = Some(if message.trim().is_empty() {
            "unknown error".to_string()
        } else {
            message
        });
        self.error_after_cancel = self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled);
        true
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn batch_mode(&self) -> bool {
        self.batch_mode
    }

    /// Attach a payload, replacing any previous one
    pub fn set_extras<T: Any + Send + Sync>(&mut self, value: T) {
        self.extras = Some(Box::new(value));
    }

    /// Payload, if one of type `T` is attached
    pub fn extras<T: Any>(&self) -> Option<&T> {
        self.extras.as_ref().and_then(|e| e.downcast_ref::<T>())
    }

    pub fn extras_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.extras.as_mut().and_then(|e| e.downcast_mut::<T>())
    }

    pub fn has_extras(&self) -> bool {
        self.extras.is_some()
    }

    /// Remove the payload if it is a `T`
    pub fn take_extras<T: Any>(&mut self) -> Option<T> {
        match self.extras.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.extras = Some(other);
                None
            }
        }
    }

    /// Process output captured by the worker, when it attached one
    pub fn command_result(&self) -> Option<&CommandResult> {
        self.extras::<CommandResult>()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Serializable view of the report
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            id: self.id.clone(),
            status: self.status,
            error: self.error.clone(),
            params: self.params.clone(),
            batch_mode: self.batch_mode,
            started_at: self.started_at,
            duration_ms: self.duration.as_millis() as u64,
            command: self.command_result().cloned(),
        }
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Tie the report to its run's token so failures know whether the run
    /// was already canceled when they were recorded
    pub(crate) fn watch_cancellation(&mut self, token: CancellationToken) {
        self.cancel = Some(token);
    }

    /// Whether the current error was recorded after the run was canceled
    pub(crate) fn error_after_cancel(&self) -> bool {
        self.error.is_some() && self.error_after_cancel
    }

    pub(crate) fn clear_error(&mut self) -> Option<String> {
        self.error_after_cancel = false;
        self.error.take()
    }

    pub(crate) fn finish(&mut self, status: TaskStatus, duration: Duration) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.duration = duration;
    }
}

impl fmt::Debug for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Report")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("error", &self.error)
            .field("has_extras", &self.extras.is_some())
            .field("params", &self.params)
            .field("duration", &self.duration)
            .finish()
    }
}

/// JSON-friendly snapshot of a [`Report`]
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    pub batch_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_report_is_pending() {
        let report = Report::new("upload-1", Params::new(), false);
        assert_eq!(report.id(), "upload-1");
        assert_eq!(report.status(), TaskStatus::Pending);
        assert!(report.error().is_none());
        assert!(!report.has_extras());
        assert!(report.started_at().is_none());
    }

    #[test]
    fn test_first_failure_wins() {
        let mut report = Report::new("t", Params::new(), false);
        assert!(report.fail("preprocess broke"));
        assert!(!report.fail("cleanup broke too"));
        assert_eq!(report.error(), Some("preprocess broke"));
    }

    #[test]
    fn test_blank_failure_gets_text() {
        let mut report = Report::new("t", Params::new(), false);
        report.fail("  ");
        assert_eq!(report.error(), Some("unknown error"));
    }

    #[test]
    fn test_typed_extras() {
        let mut report = Report::new("t", Params::new(), false);
        report.set_extras(42u32);
        assert_eq!(report.extras::<u32>(), Some(&42));
        assert!(report.extras::<String>().is_none());

        *report.extras_mut::<u32>().unwrap() += 1;
        assert!(report.take_extras::<String>().is_none());
        assert!(report.has_extras());
        assert_eq!(report.take_extras::<u32>(), Some(43));
        assert!(!report.has_extras());
    }

    #[test]
    fn test_failure_remembers_cancellation() {
        let token = CancellationToken::new();
        let mut report = Report::new("t", Params::new(), false);
        report.watch_cancellation(token.clone());
        report.fail("disk full");
        assert!(!report.error_after_cancel());

        let mut report = Report::new("t", Params::new(), false);
        report.watch_cancellation(token.clone());
        token.cancel();
        report.fail("killed");
        assert!(report.error_after_cancel());
        assert_eq!(report.clear_error().as_deref(), Some("killed"));
        assert!(!report.error_after_cancel());
    }

    #[test]
    fn test_params() {
        let mut params = Params::new();
        params.insert("bucket".to_string(), "assets".to_string());
        let report = Report::new("t", params, true);
        assert_eq!(report.param("bucket"), Some("assets"));
        assert_eq!(report.param("missing"), None);
        assert!(report.batch_mode());
    }

    #[test]
    fn test_status_helpers() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
        assert_eq!(TaskStatus::Canceled.to_string(), "canceled");
    }

    #[test]
    fn test_summary_serialization() {
        let mut report = Report::new("t", Params::new(), false);
        report.mark_running();
        report.fail("boom");
        report.finish(TaskStatus::Failed, Duration::from_millis(1500));

        let json = serde_json::to_value(report.summary()).unwrap();
        assert_eq!(json["id"], "t");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["duration_ms"], 1500);
        assert!(json.get("params").is_none());
        assert!(json.get("command").is_none());
    }
}
