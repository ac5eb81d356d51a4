//! The worker contract
//!
//! A [`Worker`] is one unit of work with three ordered hooks. The
//! orchestrator owns the worker for the duration of a single run and calls
//! each hook with the run's [`Report`] and a [`StageContext`].

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::main_thread::MainThreadHandle;
use crate::report::Report;

/// Lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Preprocess,
    Process,
    Postprocess,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 3] = [Stage::Preprocess, Stage::Process, Stage::Postprocess];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::Process => "process",
            Self::Postprocess => "postprocess",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a hook gets besides the report
#[derive(Debug, Clone)]
pub struct StageContext {
    stage: Stage,
    cancel: CancellationToken,
    run_canceled: bool,
    batch_mode: bool,
    main_thread: Option<MainThreadHandle>,
}

impl StageContext {
    pub fn new(stage: Stage, cancel: CancellationToken) -> Self {
        Self {
            stage,
            cancel,
            run_canceled: false,
            batch_mode: false,
            main_thread: None,
        }
    }

    pub fn with_batch_mode(mut self, batch_mode: bool) -> Self {
        self.batch_mode = batch_mode;
        self
    }

    pub fn with_main_thread(mut self, handle: Option<MainThreadHandle>) -> Self {
        self.main_thread = handle;
        self
    }

    pub(crate) fn with_run_canceled(mut self, canceled: bool) -> Self {
        self.run_canceled = canceled;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Token that fires when this stage's work should stop.
    ///
    /// Pass it to [`stagehand_tools::Command::run`] so subprocesses are killed
    /// on cancellation. Postprocess receives a token that is never fired by
    /// run cancellation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the run had been canceled when this stage began
    pub fn run_canceled(&self) -> bool {
        self.run_canceled
    }

    /// Suppress interactive UI when true
    pub fn batch_mode(&self) -> bool {
        self.batch_mode
    }

    /// Handle for host-thread work, when the host provided one
    pub fn main_thread(&self) -> Option<&MainThreadHandle> {
        self.main_thread.as_ref()
    }
}

/// One unit of work run through preprocess, process and postprocess.
///
/// A hook fails by returning `Err` or by calling [`Report::fail`]. After a
/// failure the remaining hooks are skipped except `postprocess`, which runs
/// exactly once per run no matter what happened before it.
#[async_trait]
pub trait Worker: Send + 'static {
    /// Identity used for logging and for serializing runs
    fn id(&self) -> &str;

    /// Whether the worker should avoid interactive UI
    fn batch_mode(&self) -> bool {
        false
    }

    /// Acquire resources the work needs
    async fn preprocess(&mut self, _report: &mut Report, _ctx: &StageContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Do the work
    async fn process(&mut self, report: &mut Report, ctx: &StageContext) -> anyhow::Result<()>;

    /// Release resources; always called
    async fn postprocess(&mut self, _report: &mut Report, _ctx: &StageContext) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<W: Worker + ?Sized> Worker for Box<W> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn batch_mode(&self) -> bool {
        (**self).batch_mode()
    }

    async fn preprocess(&mut self, report: &mut Report, ctx: &StageContext) -> anyhow::Result<()> {
        (**self).preprocess(report, ctx).await
    }

    async fn process(&mut self, report: &mut Report, ctx: &StageContext) -> anyhow::Result<()> {
        (**self).process(report, ctx).await
    }

    async fn postprocess(&mut self, report: &mut Report, ctx: &StageContext) -> anyhow::Result<()> {
        (**self).postprocess(report, ctx).await
    }
}
