//! Tasks command - list configured tasks

use clap::Args;
use console::style;
use serde::Serialize;

use super::Project;
use crate::cli::{output, Cli, OutputFormat};

/// List tasks from the configuration
#[derive(Debug, Args)]
pub struct TasksCommand {}

#[derive(Debug, Serialize)]
struct TaskListing {
    name: String,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    preprocess: usize,
    process: usize,
    postprocess: usize,
}

impl TasksCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let project = Project::load()?;
        let listings = listings(&project);

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&listings)?);
            return Ok(0);
        }
        if cli.quiet {
            return Ok(0);
        }

        if listings.is_empty() {
            output::info("No tasks configured");
            return Ok(0);
        }

        println!("{}", output::header("Tasks"));
        if let Some(path) = &project.config_path {
            println!("{}", output::key_value("config", &path.display().to_string()));
        }
        println!();
        for task in &listings {
            let identity = if task.id != task.name {
                format!(" {}", style(format!("({})", task.id)).dim())
            } else {
                String::new()
            };
            println!("  {}{}", style(&task.name).cyan().bold(), identity);
            if let Some(description) = &task.description {
                println!("    {}", description);
            }
            if cli.verbose {
                println!(
                    "    {}",
                    style(format!(
                        "{} pre / {} process / {} post",
                        task.preprocess, task.process, task.postprocess
                    ))
                    .dim()
                );
            }
        }

        Ok(0)
    }
}

fn listings(project: &Project) -> Vec<TaskListing> {
    project
        .config
        .tasks
        .iter()
        .map(|(name, task)| TaskListing {
            name: name.clone(),
            id: task.identity(name).to_string(),
            description: task.description.clone(),
            preprocess: task.preprocess.len(),
            process: task.process.len(),
            postprocess: task.postprocess.len(),
        })
        .collect()
}
