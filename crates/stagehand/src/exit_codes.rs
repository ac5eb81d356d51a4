//! Exit codes for the CLI

/// Success
pub const SUCCESS: i32 = 0;

/// A task failed, or a general error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// User cancelled
pub const CANCELLED: i32 = 130;

/// Map an error escaping a command to an exit code
pub fn for_error(err: &anyhow::Error) -> i32 {
    use stagehand_core::{ConfigError, StagehandError};

    let is_config = err.chain().any(|cause| {
        cause.is::<ConfigError>() || matches!(cause.downcast_ref::<StagehandError>(), Some(StagehandError::Config(_)))
    });
    if is_config {
        CONFIG_ERROR
    } else {
        ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::{ConfigError, StagehandError};

    #[test]
    fn test_config_errors_map_to_config_code() {
        let err = anyhow::Error::new(StagehandError::Config(ConfigError::invalid("tasks", "empty")));
        assert_eq!(for_error(&err), CONFIG_ERROR);

        let err = anyhow::Error::new(ConfigError::invalid("runner", "bad")).context("loading config");
        assert_eq!(for_error(&err), CONFIG_ERROR);
    }

    #[test]
    fn test_other_errors_are_general() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(for_error(&err), ERROR);
        let err = anyhow::Error::new(StagehandError::UnknownTask("deploy".to_string()));
        assert_eq!(for_error(&err), ERROR);
    }
}
