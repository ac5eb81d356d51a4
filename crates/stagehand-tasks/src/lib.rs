//! Stagehand Tasks - worker lifecycle orchestration
//!
//! A [`Worker`] runs through preprocess, process and postprocess under an
//! [`Orchestrator`], which serializes runs sharing an identity, always runs
//! postprocess and hands back a [`TaskHandle`] resolving to a [`Report`].

pub mod error;
pub mod main_thread;
pub mod orchestrator;
pub mod report;
pub mod reporter;
pub mod script;
pub mod worker;

pub use error::MainThreadError;
pub use main_thread::{MainThread, MainThreadHandle, MainThreadQueue};
pub use orchestrator::{
    wait_all, ConcurrencyPolicy, Orchestrator, OrchestratorOptions, TaskHandle, DEFAULT_CANCEL_GRACE,
};
pub use report::{Params, Report, ReportSummary, TaskStatus};
pub use reporter::{CollectingReporter, TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter};
pub use script::ScriptWorker;
pub use worker::{Stage, StageContext, Worker};
