//! Console output
//!
//! [`ConsoleReporter`] renders the engine's event stream for humans: task
//! headers, skips and failures while the build runs, then a summary and a
//! build time report.

use crate::config::Settings;
use crate::error::{CommandError, TaskError};
use crate::runner::{Registry, RunEvent, RunReport, TaskStatus};
use colored::*;
use std::time::Duration;

/// Output verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Print no output
    Silent,
    /// Only print command output and errors
    Quiet,
    /// Normal output
    #[default]
    Normal,
    /// Verbose output
    Verbose,
}

/// Prints run progress to the terminal
#[derive(Debug, Clone)]
pub struct ConsoleReporter {
    verbosity: Verbosity,
    settings: Settings,
}

impl ConsoleReporter {
    pub fn new(verbosity: Verbosity, settings: Settings) -> Self {
        if !settings.colored_output {
            colored::control::set_override(false);
        }
        ConsoleReporter {
            verbosity,
            settings,
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Print the program banner
    pub fn print_logo(&self) {
        if self.verbosity >= Verbosity::Normal {
            println!(
                "{} {}",
                "rsake".bold(),
                format!("version {}", crate::VERSION).dimmed()
            );
            println!();
        }
    }

    /// Print the final summary of a run and the build time report
    pub fn print_summary(&self, report: &RunReport) {
        if self.verbosity == Verbosity::Silent {
            return;
        }

        if report.success {
            if self.verbosity >= Verbosity::Normal {
                println!();
                println!("{}", "Build Succeeded!".green().bold());
            }
        } else {
            eprintln!();
            eprintln!("{}", "Build Failed!".red().bold());
            for outcome in report.outcomes.iter().filter(|o| o.is_fatal()) {
                if let Some(error) = outcome.error() {
                    eprintln!("  {} {}: {}", "✗".red(), outcome.name.bold(), error);
                    if self.settings.verbose_error {
                        self.print_command_output(error);
                    }
                }
            }
        }

        if report.cancelled {
            eprintln!("{}", "Build was cancelled".yellow());
        }

        if self.verbosity >= Verbosity::Normal {
            println!();
            print!("{}", format_time_report(report));
        }
    }

    fn print_command_output(&self, error: &TaskError) {
        let TaskError::Command(err) = error else {
            return;
        };
        let Some((stdout, stderr)) = err.output() else {
            return;
        };
        for (label, text) in [("stdout", stdout), ("stderr", stderr)] {
            if !text.trim().is_empty() {
                eprintln!("    {}:", label.dimmed());
                for line in text.lines() {
                    eprintln!("      {}", line);
                }
            }
        }
        if let CommandError::TimedOut { timeout, .. } = err {
            eprintln!("    {} {:?}", "timeout:".dimmed(), timeout);
        }
    }

    fn on_task_started(&self, task: &str, description: Option<&str>) {
        if self.verbosity < Verbosity::Normal {
            return;
        }
        println!();
        println!("{}", self.settings.task_header(task).cyan().bold());
        if self.verbosity == Verbosity::Verbose {
            if let Some(description) = description {
                println!("{}", description.dimmed());
            }
        }
    }
}

impl crate::runner::EventSink for ConsoleReporter {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted { plan } => {
                if self.verbosity == Verbosity::Verbose {
                    println!("{} {}", "Plan:".bold(), plan.join(" -> "));
                }
            }
            RunEvent::TaskStarted { task, description } => {
                self.on_task_started(task, description.as_deref());
            }
            RunEvent::TaskSkipped { task, reason } => {
                if self.verbosity >= Verbosity::Normal {
                    println!("{} {} ({})", "Skipped".yellow(), task, reason);
                }
            }
            RunEvent::TaskSucceeded { task, duration } => {
                if self.verbosity == Verbosity::Verbose {
                    println!(
                        "{} {} in {}",
                        "✓".green(),
                        task,
                        format_duration(*duration)
                    );
                }
            }
            RunEvent::TaskFailed {
                task,
                error,
                tolerated,
                ..
            } => {
                if self.verbosity == Verbosity::Silent {
                    return;
                }
                if *tolerated {
                    eprintln!(
                        "{} {} failed, continuing: {}",
                        "Warning:".yellow().bold(),
                        task,
                        error
                    );
                } else {
                    eprintln!("{} {} failed: {}", "Error:".red().bold(), task, error);
                }
            }
            RunEvent::RunCompleted { .. } => {}
        }
    }
}

/// Render the per-task status and duration table shown after a run
pub fn format_time_report(report: &RunReport) -> String {
    let width = report
        .outcomes
        .iter()
        .map(|o| o.name.len())
        .chain(std::iter::once("Total".len()))
        .max()
        .unwrap_or(4);

    let mut out = String::new();
    out.push_str(&format!("{}\n", "Build Time Report".bold()));
    out.push_str(&format!("{:<width$}  {:<9}  {}\n", "Name", "Status", "Duration"));
    out.push_str(&format!("{:<width$}  {:<9}  {}\n", "----", "------", "--------"));
    for outcome in &report.outcomes {
        out.push_str(&format!(
            "{:<width$}  {:<9}  {}\n",
            outcome.name,
            status_label(outcome.status()),
            format_duration(outcome.duration)
        ));
    }
    out.push_str(&format!(
        "{:<width$}  {:<9}  {}\n",
        "Total",
        "",
        format_duration(report.duration)
    ));
    out
}

/// Render the task documentation listing
pub fn format_docs(registry: &Registry) -> String {
    let mut tasks: Vec<_> = registry.tasks().collect();
    tasks.sort_by_key(|t| t.name.to_lowercase());

    let width = tasks
        .iter()
        .map(|t| t.name.len())
        .chain(std::iter::once("Name".len()))
        .max()
        .unwrap_or(4);
    let alias_width = tasks
        .iter()
        .filter_map(|t| t.alias.as_ref().map(String::len))
        .chain(std::iter::once("Alias".len()))
        .max()
        .unwrap_or(5);

    let mut out = String::new();
    out.push_str(&format!(
        "{:<width$}  {:<alias_width$}  {:<24}  {}\n",
        "Name", "Alias", "Depends On", "Description"
    ));
    out.push_str(&format!(
        "{:<width$}  {:<alias_width$}  {:<24}  {}\n",
        "----", "-----", "----------", "-----------"
    ));
    for task in tasks {
        out.push_str(
            format!(
                "{:<width$}  {:<alias_width$}  {:<24}  {}",
                task.name,
                task.alias.as_deref().unwrap_or(""),
                task.dependencies.join(", "),
                task.description.as_deref().unwrap_or("")
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Succeeded => "succeeded",
        TaskStatus::Failed => "failed",
        TaskStatus::Skipped => "skipped",
    }
}

/// Format a duration as seconds with millisecond precision
pub fn format_duration(duration: Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}
