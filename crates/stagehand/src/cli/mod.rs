//! CLI definition and command handling

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use commands::{ExecCommand, InitCommand, RunCommand, TasksCommand, WhichCommand};

/// Stagehand - run configured tasks through a guarded lifecycle
#[derive(Debug, Parser)]
#[command(name = "stagehand")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run configured tasks
    Run(RunCommand),

    /// Run a single command as a task
    Exec(ExecCommand),

    /// Show where a binary resolves to
    Which(WhichCommand),

    /// List configured tasks
    Tasks(TasksCommand),

    /// Initialize a new Stagehand configuration
    Init(InitCommand),
}

impl Cli {
    /// Execute the CLI command, returning the process exit code
    pub fn execute(self) -> anyhow::Result<i32> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match self.command {
            Commands::Run(ref cmd) => cmd.execute(&self),
            Commands::Exec(ref cmd) => cmd.execute(&self),
            Commands::Which(ref cmd) => cmd.execute(&self),
            Commands::Tasks(ref cmd) => cmd.execute(&self),
            Commands::Init(ref cmd) => cmd.execute(&self),
        }
    }

    /// Whether human-readable output should be printed
    pub fn show_text(&self) -> bool {
        self.format == OutputFormat::Text && !self.quiet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_params() {
        let cli = Cli::try_parse_from([
            "stagehand", "run", "upload", "--param", "bucket=assets", "--batch", "--format", "json",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Run(cmd) => {
                assert_eq!(cmd.tasks, ["upload"]);
                assert_eq!(cmd.params, [("bucket".to_string(), "assets".to_string())]);
                assert!(cmd.batch);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_exec() {
        let cli = Cli::try_parse_from([
            "stagehand", "-C", "/tmp", "exec", "--id", "copy", "--", "mc", "cp", "--recursive",
        ])
        .unwrap();
        assert_eq!(cli.directory.as_deref(), Some(std::path::Path::new("/tmp")));
        match cli.command {
            Commands::Exec(cmd) => {
                assert_eq!(cmd.id.as_deref(), Some("copy"));
                assert_eq!(cmd.command, ["mc", "cp", "--recursive"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
