//! Run command - execute configured tasks

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use stagehand_core::StagehandError;
use stagehand_tasks::{
    wait_all, Orchestrator, OrchestratorOptions, Params, Report, ScriptWorker, Stage, TaskEvent,
    TaskReporter, TaskReporterRegistry,
};

use super::{parse_key_val, Project};
use crate::cli::{output, Cli, OutputFormat};

/// Run configured tasks
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Tasks to run (names from the [tasks] table)
    #[arg(required = true)]
    pub tasks: Vec<String>,

    /// Parameter passed to every task (can be repeated)
    #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Run without interactive output
    #[arg(long)]
    pub batch: bool,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let project = Project::load()?;
        let workers = self.workers(&project)?;

        let runtime = tokio::runtime::Runtime::new()?;
        let reports = runtime.block_on(self.execute_async(cli, &project, workers));

        if cli.format == OutputFormat::Json {
            output::print_json(&reports)?;
        } else if !cli.quiet {
            for report in &reports {
                println!("{}", output::report_line(report));
            }
        }

        Ok(output::exit_code(&reports))
    }

    /// Build one worker per requested task, failing on unknown names
    fn workers(&self, project: &Project) -> anyhow::Result<Vec<ScriptWorker>> {
        self.tasks
            .iter()
            .map(|name| -> anyhow::Result<ScriptWorker> {
                let task = project
                    .config
                    .task(name)
                    .ok_or_else(|| StagehandError::UnknownTask(name.clone()))?;
                let mut worker = ScriptWorker::from_config(name, task, &project.config.runner);
                if task.cwd.is_none() {
                    worker = worker.with_cwd(&project.root);
                }
                if self.batch {
                    worker = worker.with_batch_mode(true);
                }
                Ok(worker)
            })
            .collect()
    }

    async fn execute_async(&self, cli: &Cli, project: &Project, workers: Vec<ScriptWorker>) -> Vec<Report> {
        let params: Params = self.params.iter().cloned().collect();
        let interactive = cli.show_text() && !self.batch;

        let spinner = interactive.then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner:.blue} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.set_message(format!(
                "running {} task{}",
                workers.len(),
                if workers.len() == 1 { "" } else { "s" }
            ));
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });

        let mut reporters = TaskReporterRegistry::new();
        if interactive {
            reporters.register(ConsoleReporter {
                verbose: cli.verbose,
                spinner: spinner.clone(),
            });
        }

        let orchestrator = Orchestrator::new(tokio::runtime::Handle::current())
            .with_options(OrchestratorOptions::from(&project.config.runner))
            .with_reporter(Arc::new(reporters));

        let interrupt = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; canceling tasks");
                interrupt.cancel_all();
            }
        });

        info!(tasks = workers.len(), "starting tasks");
        let handles = orchestrator.execute_all(workers, &params);
        let reports = wait_all(handles).await;

        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
        reports
    }
}

/// Prints lifecycle progress above the spinner
struct ConsoleReporter {
    verbose: bool,
    spinner: Option<ProgressBar>,
}

impl ConsoleReporter {
    fn print(&self, line: String) {
        match &self.spinner {
            Some(pb) => pb.println(line),
            None => println!("{}", line),
        }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { id } => {
                self.print(format!("  {} {}", style("▸").dim(), style(id).bold()));
            }
            TaskEvent::StageFinished {
                id,
                stage,
                duration,
                error,
            } => {
                if let Some(error) = error {
                    self.print(format!(
                        "    {} {} {}",
                        style(format!("[{}:{}]", id, stage)).red().dim(),
                        style(format!("{:.1}s", duration.as_secs_f64())).dim(),
                        style(error).red()
                    ));
                } else if self.verbose && *stage != Stage::Postprocess {
                    self.print(format!(
                        "    {} {}",
                        style(format!("[{}:{}]", id, stage)).dim(),
                        style(format!("{:.1}s", duration.as_secs_f64())).dim()
                    ));
                }
            }
            TaskEvent::Rejected { id } => {
                self.print(format!(
                    "  {} {} {}",
                    style("○").yellow(),
                    style(id).yellow(),
                    style("(already running)").dim()
                ));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project(toml: &str) -> (TempDir, Project) {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("stagehand.toml"), toml).unwrap();
        let project = Project::load_from(temp.path()).unwrap();
        (temp, project)
    }

    fn command(tasks: &[&str]) -> RunCommand {
        RunCommand {
            tasks: tasks.iter().map(|t| t.to_string()).collect(),
            params: Vec::new(),
            batch: true,
        }
    }

    #[test]
    fn test_unknown_task_is_an_error() {
        let (_temp, project) = project("[tasks.build]\nprocess = [\"true\"]\n");
        let err = command(&["deploy"]).workers(&project).unwrap_err();
        assert!(err.to_string().contains("Unknown task: deploy"));
    }

    #[test]
    fn test_workers_from_config() {
        let (_temp, project) = project(
            "[tasks.build]\nprocess = [\"true\"]\n\n[tasks.upload]\nid = \"upload-1\"\nprocess = [\"true\"]\n",
        );
        let workers = command(&["build", "upload"]).workers(&project).unwrap();
        assert_eq!(workers.len(), 2);
        assert_eq!(stagehand_tasks::Worker::id(&workers[1]), "upload-1");
        assert!(stagehand_tasks::Worker::batch_mode(&workers[0]));
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_tasks_in_project_root() {
        let (temp, project) = project(
            "[runner]\nmirror_output = false\n\n[tasks.touch]\nprocess = [\"touch ran\"]\n",
        );
        let cmd = command(&["touch"]);
        let workers = cmd.workers(&project).unwrap();
        let cli = <Cli as clap::Parser>::try_parse_from(["stagehand", "--quiet", "run", "touch"]).unwrap();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let reports = runtime.block_on(cmd.execute_async(&cli, &project, workers));

        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_success(), "{:?}", reports[0].error());
        assert!(temp.path().join("ran").exists());
        assert_eq!(output::exit_code(&reports), crate::exit_codes::SUCCESS);
    }
}
