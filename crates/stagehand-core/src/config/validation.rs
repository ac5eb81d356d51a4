//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::{Config, TaskConfig};

/// Upper bound for the cancellation grace period
const MAX_CANCEL_GRACE_SECS: u64 = 600;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_runner(config)?;
    validate_tools(config)?;
    for (name, task) in &config.tasks {
        validate_task(name, task)?;
    }
    debug!("configuration validation passed");
    Ok(())
}

fn validate_runner(config: &Config) -> Result<()> {
    if config.runner.cancel_grace_secs > MAX_CANCEL_GRACE_SECS {
        return Err(ConfigError::invalid(
            "runner.cancel_grace_secs",
            format!("must not exceed {}", MAX_CANCEL_GRACE_SECS),
        )
        .into());
    }
    Ok(())
}

fn validate_tools(config: &Config) -> Result<()> {
    for (name, path) in &config.tools.overrides {
        if name.trim().is_empty() {
            return Err(ConfigError::invalid("tools.overrides", "tool name cannot be empty").into());
        }
        if path.as_os_str().is_empty() {
            return Err(ConfigError::invalid(
                format!("tools.overrides.{}", name),
                "path cannot be empty",
            )
            .into());
        }
    }
    Ok(())
}

fn validate_task(name: &str, task: &TaskConfig) -> Result<()> {
    let field = |f: &str| format!("tasks.{}.{}", name, f);

    if name.trim().is_empty() {
        return Err(ConfigError::invalid("tasks", "task name cannot be empty").into());
    }

    if task.process.is_empty() {
        return Err(ConfigError::invalid(field("process"), "at least one command is required").into());
    }

    let stages = [
        ("preprocess", &task.preprocess),
        ("process", &task.process),
        ("postprocess", &task.postprocess),
    ];
    for (stage, commands) in stages {
        if commands.iter().any(|c| c.trim().is_empty()) {
            return Err(ConfigError::invalid(field(stage), "commands cannot be empty").into());
        }
    }

    if task.success_codes.is_empty() {
        return Err(ConfigError::invalid(field("success_codes"), "cannot be empty").into());
    }

    if let Some(id) = &task.id {
        if id.trim().is_empty() {
            return Err(ConfigError::invalid(field("id"), "cannot be empty").into());
        }
    }

    if task.timeout_secs == Some(0) {
        return Err(ConfigError::invalid(field("timeout_secs"), "must be greater than zero").into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(name: &str, task: TaskConfig) -> Config {
        let mut config = Config::default();
        config.tasks.insert(name.to_string(), task);
        config
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_task_requires_process() {
        let config = config_with("build", TaskConfig::default());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("tasks.build.process"));
    }

    #[test]
    fn test_blank_command_rejected() {
        let config = config_with("build", TaskConfig::new("make").with_postprocess("  "));
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("tasks.build.postprocess"));
    }

    #[test]
    fn test_empty_success_codes_rejected() {
        let mut task = TaskConfig::new("make");
        task.success_codes.clear();
        assert!(validate_config(&config_with("build", task)).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut task = TaskConfig::new("make");
        task.timeout_secs = Some(0);
        assert!(validate_config(&config_with("build", task)).is_err());
    }

    #[test]
    fn test_excessive_grace_rejected() {
        let mut config = Config::default();
        config.runner.cancel_grace_secs = MAX_CANCEL_GRACE_SECS + 1;
        assert!(validate_config(&config).is_err());
    }
}
