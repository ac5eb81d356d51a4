//! Which command - show where a binary resolves to

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use tracing::info;

use super::Project;
use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Resolve a binary name the way tasks do
#[derive(Debug, Args)]
pub struct WhichCommand {
    /// Binary name or path
    pub name: String,

    /// Directory searched before PATH
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Resolution {
    name: String,
    path: String,
    found: bool,
}

impl WhichCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let project = Project::load()?;
        let resolution = self.resolve(&project);
        info!(name = %resolution.name, path = %resolution.path, found = resolution.found, "resolved binary");

        match cli.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&resolution)?),
            OutputFormat::Text if resolution.found => {
                println!("{}", output::path_style().apply_to(&resolution.path));
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    output::warning(&format!(
                        "'{}' not found; commands will use the name as given",
                        resolution.name
                    ));
                }
            }
        }

        Ok(if resolution.found {
            exit_codes::SUCCESS
        } else {
            exit_codes::ERROR
        })
    }

    fn resolve(&self, project: &Project) -> Resolution {
        let resolver = project.resolver();
        let dir = self.dir.as_deref();
        Resolution {
            name: self.name.clone(),
            path: resolver.resolve(&self.name, dir),
            found: resolver.locate(&self.name, dir).is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn which(name: &str, dir: Option<PathBuf>) -> WhichCommand {
        WhichCommand {
            name: name.to_string(),
            dir,
        }
    }

    #[test]
    fn test_missing_binary_passes_through() {
        let temp = TempDir::new().unwrap();
        let project = Project::load_from(temp.path()).unwrap();
        let resolution = which("stagehand-no-such-tool", None).resolve(&project);

        assert!(!resolution.found);
        assert_eq!(resolution.path, "stagehand-no-such-tool");
    }

    #[test]
    fn test_binary_in_search_dir() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        let exe = bin.join(stagehand_tools::executable_name("mytool"));
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let project = Project::load_from(temp.path()).unwrap();
        let resolution = which("mytool", Some(bin.clone())).resolve(&project);

        assert!(resolution.found);
        assert!(PathBuf::from(&resolution.path).ends_with(exe.file_name().unwrap()));
    }

    #[test]
    fn test_override_from_config() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("custom-mc");
        std::fs::write(&exe, "").unwrap();
        std::fs::write(
            temp.path().join("stagehand.toml"),
            format!("[tools.overrides]\nmc = {:?}\n", exe.display().to_string()),
        )
        .unwrap();

        let project = Project::load_from(temp.path()).unwrap();
        let resolution = which("mc", None).resolve(&project);

        assert!(resolution.found);
        assert!(resolution.path.ends_with("custom-mc"));
    }
}
