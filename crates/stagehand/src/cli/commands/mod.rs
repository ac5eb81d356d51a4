//! CLI commands

mod exec;
mod init;
mod run;
mod tasks;
mod which;

pub use exec::ExecCommand;
pub use init::InitCommand;
pub use run::RunCommand;
pub use tasks::TasksCommand;
pub use which::WhichCommand;

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::warn;

use stagehand_core::config::{find_config, load_config, Config};
use stagehand_core::constants::{bin_override_key, ConstantRegistry, TOOLS_CACHE_DIR};
use stagehand_tools::BinaryResolver;

/// Configuration plus the directory it applies to
pub(crate) struct Project {
    pub root: PathBuf,
    pub config: Config,
    pub config_path: Option<PathBuf>,
}

impl Project {
    /// Find and load the configuration for the current directory.
    ///
    /// A missing file yields defaults; a broken one is an error.
    pub fn load() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::load_from(&cwd)
    }

    pub fn load_from(cwd: &Path) -> anyhow::Result<Self> {
        let Some(path) = find_config(cwd) else {
            warn!(dir = %cwd.display(), "no configuration file found, using defaults");
            return Ok(Self {
                root: cwd.to_path_buf(),
                config: Config::default(),
                config_path: None,
            });
        };

        let config = load_config(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cwd.to_path_buf());
        Ok(Self {
            root,
            config,
            config_path: Some(path),
        })
    }

    /// Constants registered from configuration
    pub fn constants(&self) -> ConstantRegistry {
        let mut constants = ConstantRegistry::new();
        if let Some(dir) = &self.config.tools.cache_dir {
            constants.register_value(TOOLS_CACHE_DIR, dir.clone());
        }
        for (name, path) in &self.config.tools.overrides {
            constants.register_value(bin_override_key(name), path.clone());
        }
        constants
    }

    pub fn resolver(&self) -> BinaryResolver {
        BinaryResolver::from_constants(&self.constants(), &self.root)
    }
}

/// Parse a `key=value` pair
pub(crate) fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{}`", s))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}
