//! Configuration-driven worker
//!
//! [`ScriptWorker`] runs shell command lines for each lifecycle stage. It is
//! what `[tasks.<name>]` entries in the config file turn into.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use tracing::debug;

use stagehand_core::config::{RunnerConfig, TaskConfig};
use stagehand_tools::{Command, CommandResult, LineSink, TracingSink};

use crate::report::{Params, Report};
use crate::worker::{Stage, StageContext, Worker};

/// Prefix of the environment variables carrying run parameters
pub const PARAM_ENV_PREFIX: &str = "STAGEHAND_PARAM_";

/// Runs shell command lines per stage
#[derive(Clone)]
pub struct ScriptWorker {
    id: String,
    batch_mode: bool,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    preprocess: Vec<String>,
    process: Vec<String>,
    postprocess: Vec<String>,
    success_codes: Vec<i32>,
    mirror_output: bool,
    pass_params: bool,
    timeout: Option<Duration>,
    sink: Arc<dyn LineSink>,
}

impl ScriptWorker {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            batch_mode: false,
            cwd: None,
            env: BTreeMap::new(),
            preprocess: Vec::new(),
            process: Vec::new(),
            postprocess: Vec::new(),
            success_codes: vec![0],
            mirror_output: false,
            pass_params: false,
            timeout: None,
            sink: Arc::new(TracingSink),
        }
    }

    /// Worker for the configured task `name`
    pub fn from_config(name: &str, task: &TaskConfig, runner: &RunnerConfig) -> Self {
        Self {
            id: task.identity(name).to_string(),
            batch_mode: task.batch_mode,
            cwd: task.cwd.clone(),
            env: task.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            preprocess: task.preprocess.clone(),
            process: task.process.clone(),
            postprocess: task.postprocess.clone(),
            success_codes: task.success_codes.clone(),
            mirror_output: runner.mirror_output,
            pass_params: task.pass_params,
            timeout: task.timeout_secs.map(Duration::from_secs),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_preprocess(mut self, line: impl Into<String>) -> Self {
        self.preprocess.push(line.into());
        self
    }

    pub fn with_process(mut self, line: impl Into<String>) -> Self {
        self.process.push(line.into());
        self
    }

    pub fn with_postprocess(mut self, line: impl Into<String>) -> Self {
        self.postprocess.push(line.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_batch_mode(mut self, batch_mode: bool) -> Self {
        self.batch_mode = batch_mode;
        self
    }

    pub fn with_success_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.success_codes = codes.into_iter().collect();
        self
    }

    /// Append parameters to every command line as `--key=value`
    pub fn with_pass_params(mut self, pass_params: bool) -> Self {
        self.pass_params = pass_params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mirror output to `sink` while commands run
    pub fn with_output(mut self, sink: Arc<dyn LineSink>) -> Self {
        self.mirror_output = true;
        self.sink = sink;
        self
    }

    pub fn commands(&self, stage: Stage) -> &[String] {
        match stage {
            Stage::Preprocess => &self.preprocess,
            Stage::Process => &self.process,
            Stage::Postprocess => &self.postprocess,
        }
    }

    fn command(&self, line: &str, params: &Params) -> Command {
        let mut full = line.to_string();
        if self.pass_params {
            for (key, value) in params {
                full.push_str(&format!(" --{}={}", key, quote(value)));
            }
        }

        let mut cmd = Command::shell(full)
            .envs(self.env.iter().map(|(k, v)| (k.clone(), v.clone())))
            .envs(params.iter().map(|(k, v)| (param_env_name(k), v.clone())))
            .success_codes(self.success_codes.iter().copied())
            .mirror_output(self.mirror_output)
            .sink(self.sink.clone());
        if let Some(dir) = &self.cwd {
            cmd = cmd.current_dir(dir);
        }
        if let Some(timeout) = self.timeout {
            cmd = cmd.timeout(timeout);
        }
        cmd
    }

    /// Run the stage's lines in order, stopping at the first failure
    async fn run_stage(&self, stage: Stage, report: &mut Report, ctx: &StageContext) -> anyhow::Result<()> {
        for line in self.commands(stage) {
            debug!(task = %self.id, %stage, command = %line, "running command");
            let result = self.command(line, report.params()).run(ctx.cancellation_token()).await;
            let outcome = check(line, &result);
            if stage == Stage::Process {
                report.set_extras(result);
            }
            outcome?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ScriptWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptWorker")
            .field("id", &self.id)
            .field("preprocess", &self.preprocess)
            .field("process", &self.process)
            .field("postprocess", &self.postprocess)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Worker for ScriptWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn batch_mode(&self) -> bool {
        self.batch_mode
    }

    async fn preprocess(&mut self, report: &mut Report, ctx: &StageContext) -> anyhow::Result<()> {
        self.run_stage(Stage::Preprocess, report, ctx).await
    }

    async fn process(&mut self, report: &mut Report, ctx: &StageContext) -> anyhow::Result<()> {
        self.run_stage(Stage::Process, report, ctx).await
    }

    async fn postprocess(&mut self, report: &mut Report, ctx: &StageContext) -> anyhow::Result<()> {
        self.run_stage(Stage::Postprocess, report, ctx).await
    }
}

fn check(line: &str, result: &CommandResult) -> anyhow::Result<()> {
    if result.canceled {
        bail!("command '{}' was canceled", line);
    }
    if result.success {
        return Ok(());
    }
    if let Some(err) = &result.error {
        bail!("command '{}' failed: {}", line, err);
    }
    bail!(
        "command '{}' exited with code {}: {}",
        line,
        result.code,
        result.stderr.trim()
    )
}

/// `bucket-name` -> `STAGEHAND_PARAM_BUCKET_NAME`
pub fn param_env_name(key: &str) -> String {
    let suffix: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", PARAM_ENV_PREFIX, suffix)
}

#[cfg(unix)]
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(not(unix))]
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Orchestrator;
    use crate::report::TaskStatus;
    use stagehand_tools::{CollectingSink, OutputStream};
    use tokio::runtime::Handle;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_successful_command() {
        let worker = ScriptWorker::new("upload-1").with_process("echo hello && exit 0");
        let report = Orchestrator::new(Handle::current())
            .execute(worker, Params::new())
            .wait()
            .await;

        assert_eq!(report.status(), TaskStatus::Succeeded);
        let result = report.command_result().unwrap();
        assert_eq!(result.code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command() {
        let worker = ScriptWorker::new("upload-2").with_process("echo denied 1>&2; exit 1");
        let report = Orchestrator::new(Handle::current())
            .execute(worker, Params::new())
            .wait()
            .await;

        assert_eq!(report.status(), TaskStatus::Failed);
        let error = report.error().unwrap();
        assert!(error.contains("exited with code 1"));
        assert!(error.contains("denied"));
        assert_eq!(report.command_result().unwrap().code, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_preprocess_failure_skips_process() {
        let temp = tempfile::TempDir::new().unwrap();
        let worker = ScriptWorker::new("guarded")
            .with_cwd(temp.path())
            .with_preprocess("exit 7")
            .with_process("touch processed")
            .with_postprocess("touch cleaned");
        let report = Orchestrator::new(Handle::current())
            .execute(worker, Params::new())
            .wait()
            .await;

        assert_eq!(report.status(), TaskStatus::Failed);
        assert!(report.error().unwrap().contains("'exit 7' exited with code 7"));
        assert!(!temp.path().join("processed").exists());
        assert!(temp.path().join("cleaned").exists());
        assert!(report.command_result().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lines_stop_at_first_failure() {
        let temp = tempfile::TempDir::new().unwrap();
        let worker = ScriptWorker::new("steps")
            .with_cwd(temp.path())
            .with_process("touch one")
            .with_process("false")
            .with_process("touch three");
        let report = Orchestrator::new(Handle::current())
            .execute(worker, Params::new())
            .wait()
            .await;

        assert_eq!(report.status(), TaskStatus::Failed);
        assert!(temp.path().join("one").exists());
        assert!(!temp.path().join("three").exists());
    }

    #[tokio::test]
    async fn test_custom_success_codes() {
        let worker = ScriptWorker::new("lenient")
            .with_process("exit 2")
            .with_success_codes([0, 2]);
        let report = Orchestrator::new(Handle::current())
            .execute(worker, Params::new())
            .wait()
            .await;
        assert!(report.is_success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_params_passed_as_args() {
        let worker = ScriptWorker::new("npm")
            .with_process("true")
            .with_process("echo")
            .with_pass_params(true);
        let report = Orchestrator::new(Handle::current())
            .execute(worker, params(&[("script-name", "build it")]))
            .wait()
            .await;

        assert!(report.is_success(), "{:?}", report.error());
        // Extras hold the last process command
        let result = report.command_result().unwrap();
        assert_eq!(result.stdout.trim(), "--script-name=build it");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_param_values() {
        let worker = ScriptWorker::new("env")
            .with_process("echo \"$STAGEHAND_PARAM_BUCKET $STATIC\"")
            .with_env("STATIC", "fixed");
        let report = Orchestrator::new(Handle::current())
            .execute(worker, params(&[("bucket", "assets")]))
            .wait()
            .await;
        assert_eq!(report.command_result().unwrap().stdout.trim(), "assets fixed");
    }

    #[tokio::test]
    async fn test_mirrored_output() {
        let sink = Arc::new(CollectingSink::default());
        let worker = ScriptWorker::new("mirror")
            .with_process("echo visible")
            .with_output(sink.clone());
        let report = Orchestrator::new(Handle::current())
            .execute(worker, Params::new())
            .wait()
            .await;

        assert!(report.is_success());
        assert_eq!(sink.stream(OutputStream::Stdout), vec!["visible"]);
    }

    #[test]
    fn test_from_config() {
        let mut task = TaskConfig::new("mc cp --recursive src dst")
            .with_id("upload")
            .with_preprocess("mc alias set local")
            .with_postprocess("rm -rf .mc");
        task.timeout_secs = Some(60);
        let runner = RunnerConfig::default();

        let worker = ScriptWorker::from_config("sync", &task, &runner);
        assert_eq!(worker.id(), "upload");
        assert_eq!(worker.commands(Stage::Preprocess), ["mc alias set local"]);
        assert_eq!(worker.commands(Stage::Process), ["mc cp --recursive src dst"]);
        assert_eq!(worker.commands(Stage::Postprocess), ["rm -rf .mc"]);
        assert_eq!(worker.timeout, Some(Duration::from_secs(60)));
        assert!(worker.mirror_output);

        let unnamed = ScriptWorker::from_config("sync", &TaskConfig::new("true"), &runner);
        assert_eq!(unnamed.id(), "sync");
    }

    #[test]
    fn test_param_env_name() {
        assert_eq!(param_env_name("bucket"), "STAGEHAND_PARAM_BUCKET");
        assert_eq!(param_env_name("script-name"), "STAGEHAND_PARAM_SCRIPT_NAME");
        assert_eq!(param_env_name("a.b"), "STAGEHAND_PARAM_A_B");
    }

    #[cfg(unix)]
    #[test]
    fn test_quote() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }
}
