//! Stagehand Core - shared foundations for the task runner
//!
//! This crate provides the error taxonomy, configuration loading and the
//! constants registration table used by the tools, tasks and CLI crates.

pub mod config;
pub mod constants;
pub mod error;

pub use config::{
    find_config, load_config, load_config_from_dir, load_config_or_default, Config,
    ConcurrencyMode, RunnerConfig, TaskConfig, ToolsConfig,
};
pub use constants::ConstantRegistry;
pub use error::{ConfigError, Result, StagehandError};
