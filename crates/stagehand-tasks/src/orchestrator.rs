//! Task orchestrator
//!
//! Drives a [`Worker`] through preprocess, process and postprocess on a tokio
//! runtime and hands the caller a [`TaskHandle`] right away. Runs that share
//! an identity never overlap: each holds a per-identity lock for its whole
//! lifecycle. Nothing a worker does (errors, panics, hangs after cancellation)
//! escapes a run; it all ends up in the [`Report`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use stagehand_core::config::{ConcurrencyMode, RunnerConfig};

use crate::main_thread::MainThreadHandle;
use crate::report::{Params, Report, TaskStatus};
use crate::reporter::{TaskEvent, TaskReporter, TracingReporter};
use crate::worker::{Stage, StageContext, Worker};

/// Default time a stage gets to return after cancellation
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// What to do when a run arrives while its identity is busy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    /// Wait for the running task to finish
    #[default]
    Serialize,
    /// Fail the new run immediately
    Reject,
}

impl From<ConcurrencyMode> for ConcurrencyPolicy {
    fn from(mode: ConcurrencyMode) -> Self {
        match mode {
            ConcurrencyMode::Serialize => Self::Serialize,
            ConcurrencyMode::Reject => Self::Reject,
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub policy: ConcurrencyPolicy,
    /// How long a canceled stage may keep running before it is dropped
    pub cancel_grace: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            policy: ConcurrencyPolicy::default(),
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

impl From<&RunnerConfig> for OrchestratorOptions {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            policy: config.concurrency.into(),
            cancel_grace: Duration::from_secs(config.cancel_grace_secs),
        }
    }
}

type LockTable = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Runs workers and tracks per-identity exclusion
#[derive(Clone)]
pub struct Orchestrator {
    runtime: Handle,
    options: OrchestratorOptions,
    reporter: Arc<dyn TaskReporter>,
    main_thread: Option<MainThreadHandle>,
    locks: LockTable,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Orchestrator spawning runs on `runtime`
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            options: OrchestratorOptions::default(),
            reporter: Arc::new(TracingReporter),
            main_thread: None,
            locks: Arc::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.options.policy = policy;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.options.cancel_grace = grace;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Give every stage access to the host thread
    pub fn with_main_thread(mut self, handle: MainThreadHandle) -> Self {
        self.main_thread = Some(handle);
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Start a run of `worker` and return immediately.
    ///
    /// Callable from any thread; the run itself happens on the runtime this
    /// orchestrator was created with.
    pub fn execute<W: Worker>(&self, worker: W, params: Params) -> TaskHandle {
        let id = worker.id().to_string();
        let cancel = self.shutdown.child_token();
        let mut report = Report::new(id.clone(), params, worker.batch_mode());
        report.watch_cancellation(cancel.clone());
        let (status_tx, status_rx) = watch::channel(TaskStatus::Pending);
        let (done_tx, done_rx) = oneshot::channel();

        self.reporter.report(&TaskEvent::Queued { id: id.clone() });

        let run = Run {
            options: self.options.clone(),
            reporter: self.reporter.clone(),
            main_thread: self.main_thread.clone(),
            locks: self.locks.clone(),
            cancel: cancel.clone(),
            status: status_tx,
        };
        let span = info_span!("task", task = %id);
        self.runtime.spawn(
            async move {
                let report = run.drive(worker, report).await;
                // The caller may have dropped the handle
                let _ = done_tx.send(report);
            }
            .instrument(span),
        );

        TaskHandle {
            id,
            cancel,
            status: status_rx,
            done: done_rx,
        }
    }

    /// Start one run per worker, all with the same parameters
    pub fn execute_all<I, W>(&self, workers: I, params: &Params) -> Vec<TaskHandle>
    where
        I: IntoIterator<Item = W>,
        W: Worker,
    {
        workers
            .into_iter()
            .map(|worker| self.execute(worker, params.clone()))
            .collect()
    }

    /// Cancel every run started by this orchestrator.
    ///
    /// Runs started afterwards begin canceled.
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }

    /// Whether a run with identity `id` currently holds its lock
    pub fn is_busy(&self, id: &str) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("options", &self.options)
            .field("main_thread", &self.main_thread.is_some())
            .finish_non_exhaustive()
    }
}

/// Await every handle, in order
pub async fn wait_all(handles: Vec<TaskHandle>) -> Vec<Report> {
    futures_util::future::join_all(handles.into_iter().map(TaskHandle::wait)).await
}

/// Caller's view of a run in progress
#[derive(Debug)]
pub struct TaskHandle {
    id: String,
    cancel: CancellationToken,
    status: watch::Receiver<TaskStatus>,
    done: oneshot::Receiver<Report>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state
    pub fn status(&self) -> TaskStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status.clone()
    }

    /// Request cancellation; the run still finishes its postprocess
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Wait for the final report
    pub async fn wait(self) -> Report {
        let id = self.id;
        match self.done.await {
            Ok(report) => report,
            Err(_) => lost_report(id),
        }
    }

    /// Block the current (non-async) thread until the final report arrives
    pub fn wait_blocking(self) -> Report {
        let id = self.id;
        match self.done.blocking_recv() {
            Ok(report) => report,
            Err(_) => lost_report(id),
        }
    }
}

/// Report for a run whose task vanished, e.g. because the runtime shut down
fn lost_report(id: String) -> Report {
    warn!(task = %id, "task ended without producing a report");
    let mut report = Report::new(id, Params::new(), false);
    report.fail("task was dropped before it finished");
    report.finish(TaskStatus::Failed, Duration::ZERO);
    report
}

enum Admission {
    Admitted(OwnedMutexGuard<()>),
    Canceled,
    Rejected,
}

/// State of one run inside its spawned task
struct Run {
    options: OrchestratorOptions,
    reporter: Arc<dyn TaskReporter>,
    main_thread: Option<MainThreadHandle>,
    locks: LockTable,
    cancel: CancellationToken,
    status: watch::Sender<TaskStatus>,
}

impl Run {
    async fn drive<W: Worker>(self, mut worker: W, mut report: Report) -> Report {
        let id = report.id().to_string();
        let lock = self.lock_for(&id);
        let admission = self.admit(&id, lock.clone()).await;

        let start = Instant::now();
        report.mark_running();
        self.status.send_replace(TaskStatus::Running);
        self.reporter.report(&TaskEvent::Started { id: id.clone() });

        let guard = match admission {
            Admission::Admitted(guard) => {
                self.stage(&mut worker, Stage::Preprocess, &mut report).await;
                if report.has_error() {
                    debug!("preprocess failed; skipping process");
                } else if self.is_canceled() {
                    debug!("canceled; skipping process");
                } else {
                    self.stage(&mut worker, Stage::Process, &mut report).await;
                }
                Some(guard)
            }
            Admission::Canceled => {
                info!("canceled while waiting for the previous run to finish");
                None
            }
            Admission::Rejected => {
                self.reporter.report(&TaskEvent::Rejected { id: id.clone() });
                report.fail(format!("task '{}' is already running", id));
                None
            }
        };

        self.stage(&mut worker, Stage::Postprocess, &mut report).await;
        drop(guard);
        self.release(&id, lock);

        let status = self.final_status(&mut report);
        let duration = start.elapsed();
        report.finish(status, duration);

        match status {
            TaskStatus::Succeeded => self.reporter.report(&TaskEvent::Completed {
                id: id.clone(),
                duration,
            }),
            TaskStatus::Canceled => self.reporter.report(&TaskEvent::Canceled {
                id: id.clone(),
                duration,
            }),
            _ => self.reporter.report(&TaskEvent::Failed {
                id: id.clone(),
                duration,
                error: report.error().unwrap_or_default().to_string(),
            }),
        }
        self.status.send_replace(status);
        report
    }

    /// Wait for (or refuse) the identity lock
    async fn admit(&self, id: &str, lock: Arc<tokio::sync::Mutex<()>>) -> Admission {
        if self.is_canceled() {
            return Admission::Canceled;
        }
        match lock.clone().try_lock_owned() {
            Ok(guard) => return Admission::Admitted(guard),
            Err(_) if self.options.policy == ConcurrencyPolicy::Reject => return Admission::Rejected,
            Err(_) => {}
        }

        info!(task = %id, "waiting for running task with the same identity");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Admission::Canceled,
            guard = lock.lock_owned() => Admission::Admitted(guard),
        }
    }

    /// Run one hook, converting errors and panics into report failures
    async fn stage<W: Worker>(&self, worker: &mut W, stage: Stage, report: &mut Report) {
        let id = report.id().to_string();
        let run_canceled = self.is_canceled();
        // Cleanup must be able to run its own commands after a cancel
        let token = if stage == Stage::Postprocess {
            CancellationToken::new()
        } else {
            self.cancel.clone()
        };
        let ctx = StageContext::new(stage, token)
            .with_batch_mode(report.batch_mode())
            .with_main_thread(self.main_thread.clone())
            .with_run_canceled(run_canceled);

        self.reporter.report(&TaskEvent::StageStarted {
            id: id.clone(),
            stage,
        });
        let had_error = report.has_error();
        let started = Instant::now();

        let outcome = {
            let hook = AssertUnwindSafe(call_hook(worker, stage, report, &ctx)).catch_unwind();
            tokio::pin!(hook);

            if stage == Stage::Postprocess {
                hook.await
            } else {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        let grace = self.options.cancel_grace;
                        match tokio::time::timeout(grace, &mut hook).await {
                            Ok(outcome) => outcome,
                            Err(_) => {
                                warn!(task = %id, %stage, "stage ignored cancellation; abandoning it");
                                Ok(Err(anyhow::anyhow!(
                                    "{} did not stop within {:.1}s of cancellation",
                                    stage,
                                    grace.as_secs_f64()
                                )))
                            }
                        }
                    }
                    outcome = &mut hook => outcome,
                }
            }
        };

        let returned = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(format!("{:#}", err)),
            Err(panic) => Some(format!("{} panicked: {}", stage, panic_message(panic.as_ref()))),
        };

        if let Some(err) = &returned {
            if !report.fail(err.clone()) {
                warn!(task = %id, %stage, error = %err, "{} failed after an earlier error; keeping the earlier error", stage);
            }
        }

        let error = returned.or_else(|| {
            (!had_error)
                .then(|| report.error().map(str::to_string))
                .flatten()
        });
        self.reporter.report(&TaskEvent::StageFinished {
            id,
            stage,
            duration: started.elapsed(),
            error,
        });
    }

    /// Decide the terminal state, dropping errors that cancellation caused.
    ///
    /// An error counts as caused by cancellation when the run token had
    /// already fired at the moment it was recorded.
    fn final_status(&self, report: &mut Report) -> TaskStatus {
        if !self.is_canceled() {
            return if report.has_error() {
                TaskStatus::Failed
            } else {
                TaskStatus::Succeeded
            };
        }

        if report.has_error() && !report.error_after_cancel() {
            return TaskStatus::Failed;
        }
        if let Some(err) = report.clear_error() {
            info!(error = %err, "discarding error raised after cancellation");
        }
        TaskStatus::Canceled
    }

    fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Forget the identity's lock once nobody else holds or waits on it
    fn release(&self, id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if table.get(id).is_some_and(|l| Arc::strong_count(l) == 1) {
            table.remove(id);
        }
    }
}

async fn call_hook<W: Worker>(
    worker: &mut W,
    stage: Stage,
    report: &mut Report,
    ctx: &StageContext,
) -> anyhow::Result<()> {
    match stage {
        Stage::Preprocess => worker.preprocess(report, ctx).await,
        Stage::Process => worker.process(report, ctx).await,
        Stage::Postprocess => worker.postprocess(report, ctx).await,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
