//! Output formatting utilities

use console::{style, Style};

use stagehand_tasks::{Report, TaskStatus};

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for paths
pub fn path_style() -> Style {
    Style::new().cyan()
}

/// One-line summary of a finished run
pub fn report_line(report: &Report) -> String {
    let elapsed = style(format!("{:.1}s", report.duration().as_secs_f64())).dim();
    match report.status() {
        TaskStatus::Succeeded => format!(
            "{} {} {}",
            style("✓").green().bold(),
            style(report.id()).green(),
            elapsed
        ),
        TaskStatus::Canceled => format!(
            "{} {} {} {}",
            style("!").yellow().bold(),
            style(report.id()).yellow(),
            style("canceled").yellow(),
            elapsed
        ),
        status => format!(
            "{} {} {} {}",
            style("✗").red().bold(),
            style(report.id()).red(),
            elapsed,
            style(report.error().unwrap_or(status.as_str())).red()
        ),
    }
}

/// Exit code for a set of finished runs
pub fn exit_code(reports: &[Report]) -> i32 {
    use crate::exit_codes::{CANCELLED, ERROR, SUCCESS};

    if reports.iter().any(|r| r.status() == TaskStatus::Failed) {
        ERROR
    } else if reports.iter().any(|r| r.status() == TaskStatus::Canceled) {
        CANCELLED
    } else {
        SUCCESS
    }
}

/// Print reports as a JSON array
pub fn print_json(reports: &[Report]) -> anyhow::Result<()> {
    let summaries: Vec<_> = reports.iter().map(Report::summary).collect();
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_tasks::{Orchestrator, Params, ScriptWorker};

    fn finished(worker: ScriptWorker) -> Report {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        Orchestrator::new(runtime.handle().clone())
            .execute(worker, Params::new())
            .wait_blocking()
    }

    #[test]
    fn test_key_value_and_header_keep_text() {
        console::set_colors_enabled(false);
        assert_eq!(key_value("config", "stagehand.toml"), "  config: stagehand.toml");
        assert_eq!(header("Tasks"), "Tasks");
    }

    #[test]
    fn test_exit_code_precedence() {
        let ok = finished(ScriptWorker::new("ok").with_process("exit 0"));
        let bad = finished(ScriptWorker::new("bad").with_process("exit 1"));

        assert_eq!(exit_code(&[]), crate::exit_codes::SUCCESS);
        assert_eq!(exit_code(std::slice::from_ref(&ok)), crate::exit_codes::SUCCESS);
        assert_eq!(exit_code(&[ok, bad]), crate::exit_codes::ERROR);
    }

    #[test]
    fn test_report_line_mentions_error() {
        let bad = finished(ScriptWorker::new("bad").with_process("exit 3"));
        let line = report_line(&bad);
        assert!(line.contains("bad"));
        assert!(line.contains("exited with code 3"));
    }
}
