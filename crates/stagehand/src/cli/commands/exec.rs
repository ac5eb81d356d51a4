//! Exec command - run one ad-hoc command as a task

use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use clap::Args;
use tracing::debug;

use stagehand_tasks::{Orchestrator, OrchestratorOptions, Params, Report, StageContext, Worker};
use stagehand_tools::{BinaryResolver, Command};

use super::{parse_key_val, Project};
use crate::cli::{output, Cli, OutputFormat};

/// Run a single command through the task lifecycle
#[derive(Debug, Args)]
pub struct ExecCommand {
    /// Task identity (defaults to the program name)
    #[arg(long)]
    pub id: Option<String>,

    /// Parameter recorded on the report (can be repeated)
    #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Kill the command after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Program and arguments, after `--`
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl ExecCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let project = Project::load()?;
        let worker = self.worker(&project)?;

        let runtime = tokio::runtime::Runtime::new()?;
        let orchestrator = Orchestrator::new(runtime.handle().clone())
            .with_options(OrchestratorOptions::from(&project.config.runner));

        let params: Params = self.params.iter().cloned().collect();
        let handle = orchestrator.execute(worker, params);

        let interrupt = orchestrator.clone();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel_all();
            }
        });
        let report = runtime.block_on(handle.wait());

        match cli.format {
            OutputFormat::Json => output::print_json(std::slice::from_ref(&report))?,
            OutputFormat::Text if !cli.quiet => {
                if let Some(result) = report.command_result() {
                    print!("{}", result.stdout);
                    eprint!("{}", result.stderr);
                }
                println!("{}", output::report_line(&report));
            }
            OutputFormat::Text => {}
        }

        Ok(output::exit_code(std::slice::from_ref(&report)))
    }

    fn worker(&self, project: &Project) -> anyhow::Result<ExecWorker> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("No command given");
        };
        let id = self.id.clone().unwrap_or_else(|| program_id(program));
        Ok(ExecWorker {
            id,
            program: program.clone(),
            args: args.to_vec(),
            cwd: std::env::current_dir()?,
            resolver: project.resolver(),
            mirror: project.config.runner.mirror_output,
            timeout: self.timeout.map(Duration::from_secs),
        })
    }
}

fn program_id(program: &str) -> String {
    std::path::Path::new(program)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

/// Worker wrapping one resolved program invocation
struct ExecWorker {
    id: String,
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    resolver: BinaryResolver,
    mirror: bool,
    timeout: Option<Duration>,
}

#[async_trait]
impl Worker for ExecWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn batch_mode(&self) -> bool {
        true
    }

    async fn preprocess(&mut self, _report: &mut Report, _ctx: &StageContext) -> anyhow::Result<()> {
        // Bare names never resolve from the working directory; use `./name` for that
        let resolved = self.resolver.resolve(&self.program, None);
        debug!(program = %self.program, resolved = %resolved, "resolved program");
        self.program = resolved;
        Ok(())
    }

    async fn process(&mut self, report: &mut Report, ctx: &StageContext) -> anyhow::Result<()> {
        let mut cmd = Command::new(&self.program)
            .args(self.args.iter().cloned())
            .current_dir(&self.cwd)
            .mirror_output(self.mirror);
        if let Some(timeout) = self.timeout {
            cmd = cmd.timeout(timeout);
        }

        let result = cmd.run(ctx.cancellation_token()).await;
        let failure = (!result.success).then(|| result.failure_message());
        report.set_extras(result);
        match failure {
            Some(message) => bail!(message),
            None => Ok(()),
        }
    }
}
