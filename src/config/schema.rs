//! Build script validation
//!
//! Catches mistakes that deserialization accepts but execution would trip
//! over. Dependency problems (unknown names, cycles) are checked against the
//! built registry by [`crate::runner::validate`].

use crate::config::types::{BuildScript, CommandDef, Condition, RunItem, TaskDef};
use crate::error::{ConfigError, ConfigResult};
use crate::runner::DEFAULT_TASK;
use regex::Regex;

/// Validate a complete build script
pub fn validate_script(script: &BuildScript) -> ConfigResult<()> {
    if let Some(interpreter) = &script.interpreter {
        if interpreter.is_empty() {
            return Err(ConfigError::Invalid(
                "interpreter must name a program".to_string(),
            ));
        }
    }

    for (name, task) in &script.tasks {
        validate_task(name, task)?;
    }

    Ok(())
}

/// Validate a single task
pub fn validate_task(name: &str, task: &TaskDef) -> ConfigResult<()> {
    for condition in task.precondition.iter().chain(&task.postcondition) {
        validate_condition(name, condition)?;
    }

    for item in task.run.iter().chain(&task.finally) {
        match item {
            RunItem::Command {
                command: CommandDef::Detailed(detail),
            } => {
                if detail.exec.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "task '{}' has a command with an empty exec",
                        name
                    )));
                }
                if let Some(retry) = &detail.retry {
                    if let Some(ratio) = retry.jitter {
                        if !(0.0..=1.0).contains(&ratio) {
                            return Err(ConfigError::Invalid(format!(
                                "task '{}': jitter must be between 0 and 1, got {}",
                                name, ratio
                            )));
                        }
                    }
                    if !retry.factor.is_finite() || retry.factor < 1.0 {
                        return Err(ConfigError::Invalid(format!(
                            "task '{}': backoff factor must be at least 1, got {}",
                            name, retry.factor
                        )));
                    }
                    if let Some(pattern) = &retry.on {
                        compile_pattern(name, pattern)?;
                    }
                }
            }
            RunItem::Invoke { invoke } if invoke.file.is_none() => {
                let is_self = |target: &str| {
                    let target = target.to_lowercase();
                    target == name.to_lowercase()
                        || task.alias.as_ref().map(|a| a.to_lowercase()) == Some(target)
                };
                let reinvokes_self = if invoke.tasks.is_empty() {
                    is_self(DEFAULT_TASK)
                } else {
                    invoke.tasks.iter().any(|target| is_self(target))
                };
                if reinvokes_self {
                    return Err(ConfigError::Invalid(format!(
                        "task '{}' invokes itself",
                        name
                    )));
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Each condition entry must name exactly one check
fn validate_condition(task: &str, condition: &Condition) -> ConfigResult<()> {
    let checks = [
        condition.equal.is_some(),
        condition.not_equal.is_some(),
        condition.command.is_some(),
        condition.exists.is_some(),
        condition.env_set.is_some(),
        condition.env_not_set.is_some(),
        condition.set.is_some(),
        condition.not_set.is_some(),
    ];
    match checks.iter().filter(|&&set| set).count() {
        1 => Ok(()),
        0 => Err(ConfigError::Invalid(format!(
            "task '{}' has an empty condition",
            task
        ))),
        _ => Err(ConfigError::Invalid(format!(
            "task '{}' has a condition with more than one check; use separate list entries",
            task
        ))),
    }
}

/// Compile a retry trigger pattern, attributing failures to the task
pub fn compile_pattern(task: &str, pattern: &str) -> ConfigResult<Regex> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
        task: task.to_string(),
        pattern: pattern.to_string(),
        error: e.to_string(),
    })
}
