//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Main configuration for Stagehand
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Project name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Orchestrator and process runner behaviour
    pub runner: RunnerConfig,

    /// External tool resolution
    pub tools: ToolsConfig,

    /// Named tasks, keyed by task name
    pub tasks: BTreeMap<String, TaskConfig>,
}

impl Config {
    /// Look up a task by name
    pub fn task(&self, name: &str) -> Option<&TaskConfig> {
        self.tasks.get(name)
    }
}

/// How concurrent runs sharing one identity are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyMode {
    /// Wait for the running instance to finish
    #[default]
    Serialize,
    /// Fail the new run immediately
    Reject,
}

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Mirror subprocess output lines to the log as they arrive
    pub mirror_output: bool,

    /// Seconds a stage may keep running after cancellation before it is dropped
    pub cancel_grace_secs: u64,

    /// Policy for runs sharing an identity
    pub concurrency: ConcurrencyMode,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mirror_output: true,
            cancel_grace_secs: 5,
            concurrency: ConcurrencyMode::Serialize,
        }
    }
}

/// Tool resolution configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Project-local directory holding downloaded tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Explicit binary paths, keyed by command name
    pub overrides: HashMap<String, PathBuf>,
}

/// A configured task run by the script worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Identity used for concurrency keying (defaults to the task name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Working directory (relative paths resolve against the config file)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables
    pub env: HashMap<String, String>,

    /// Command lines run during the preprocess stage
    pub preprocess: Vec<String>,

    /// Command lines run during the process stage
    pub process: Vec<String>,

    /// Command lines run during the postprocess stage
    pub postprocess: Vec<String>,

    /// Exit codes treated as success
    pub success_codes: Vec<i32>,

    /// Suppress interactive output for unattended runs
    pub batch_mode: bool,

    /// Append run parameters as `--key=value` arguments
    pub pass_params: bool,

    /// Per-command timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            id: None,
            description: None,
            cwd: None,
            env: HashMap::new(),
            preprocess: Vec::new(),
            process: Vec::new(),
            postprocess: Vec::new(),
            success_codes: vec![0],
            batch_mode: false,
            pass_params: false,
            timeout_secs: None,
        }
    }
}

impl TaskConfig {
    /// Create a task with a single process command
    pub fn new(process: impl Into<String>) -> Self {
        Self {
            process: vec![process.into()],
            ..Default::default()
        }
    }

    /// Set the identity
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a preprocess command
    pub fn with_preprocess(mut self, cmd: impl Into<String>) -> Self {
        self.preprocess.push(cmd.into());
        self
    }

    /// Add a postprocess command
    pub fn with_postprocess(mut self, cmd: impl Into<String>) -> Self {
        self.postprocess.push(cmd.into());
        self
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Identity for the task, falling back to its name
    pub fn identity<'a>(&'a self, name: &'a str) -> &'a str {
        self.id.as_deref().unwrap_or(name)
    }
}
