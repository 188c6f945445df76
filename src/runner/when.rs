//! Condition evaluation
//!
//! Evaluates the `precondition` and `postcondition` lists of build script
//! tasks against the task's view of properties and the context store.

use crate::config::Condition;
use crate::runner::{interpolate, CommandSpec, TaskContext};
use anyhow::{bail, Context as _};
use std::env;

/// Evaluate a list of conditions (all must be true - AND logic)
pub fn evaluate_all(
    conditions: &[Condition],
    ctx: &TaskContext<'_>,
    interpreter: &[String],
) -> anyhow::Result<bool> {
    for condition in conditions {
        if !evaluate(condition, ctx, interpreter)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluate a single condition
pub fn evaluate(
    condition: &Condition,
    ctx: &TaskContext<'_>,
    interpreter: &[String],
) -> anyhow::Result<bool> {
    let vars = ctx.vars();
    let expand = |s: &String| interpolate(s, &vars).unwrap_or_else(|_| s.clone());

    if let Some(cmp) = &condition.equal {
        return Ok(expand(&cmp.left) == expand(&cmp.right));
    }
    if let Some(cmp) = &condition.not_equal {
        return Ok(expand(&cmp.left) != expand(&cmp.right));
    }
    if let Some(line) = &condition.command {
        let line = interpolate(line, &vars)?;
        let spec = CommandSpec::shell(interpreter, &line);
        return ctx
            .runner()
            .check(&spec)
            .with_context(|| format!("could not evaluate condition command '{}'", line));
    }
    if let Some(path) = &condition.exists {
        return Ok(ctx.runner().base_dir().join(expand(path)).exists());
    }
    if let Some(name) = &condition.env_set {
        return Ok(env_is_set(ctx, &expand(name)));
    }
    if let Some(name) = &condition.env_not_set {
        return Ok(!env_is_set(ctx, &expand(name)));
    }
    if let Some(name) = &condition.set {
        return Ok(ctx.is_set(name));
    }
    if let Some(name) = &condition.not_set {
        return Ok(!ctx.is_set(name));
    }

    bail!("empty condition in task '{}'", ctx.task_name())
}

/// Set in the process environment or the build's dotenv file
fn env_is_set(ctx: &TaskContext<'_>, name: &str) -> bool {
    ctx.runner().env().contains_key(name) || env::var(name).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Comparison;
    use crate::runner::{CommandRunner, ContextStore, Properties};
    use tempfile::TempDir;

    fn sh() -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string()]
    }

    fn check(condition: Condition, properties: &Properties, runner: &CommandRunner) -> anyhow::Result<bool> {
        let mut store = ContextStore::new();
        store.set("stage", "package");
        let ctx = TaskContext::new("Check", &mut store, properties, runner, None);
        evaluate(&condition, &ctx, &sh())
    }

    fn comparison(left: &str, right: &str) -> Option<Comparison> {
        Some(Comparison {
            left: left.to_string(),
            right: right.to_string(),
        })
    }

    #[test]
    fn test_equal_reads_properties() {
        let mut properties = Properties::new();
        properties.declare("configuration", "Release");
        let runner = CommandRunner::new();

        let equal = Condition {
            equal: comparison("${configuration}", "Release"),
            ..Default::default()
        };
        assert!(check(equal, &properties, &runner).unwrap());

        let not_equal = Condition {
            not_equal: comparison("${configuration}", "Release"),
            ..Default::default()
        };
        assert!(!check(not_equal, &properties, &runner).unwrap());
    }

    #[test]
    fn test_equal_reads_store() {
        let runner = CommandRunner::new();
        let condition = Condition {
            equal: comparison("${stage}", "package"),
            ..Default::default()
        };
        assert!(check(condition, &Properties::new(), &runner).unwrap());
    }

    #[test]
    fn test_command_condition() {
        let runner = CommandRunner::new();
        let success = Condition {
            command: Some("true".to_string()),
            ..Default::default()
        };
        let failure = Condition {
            command: Some("exit 3".to_string()),
            ..Default::default()
        };
        assert!(check(success, &Properties::new(), &runner).unwrap());
        assert!(!check(failure, &Properties::new(), &runner).unwrap());
    }

    #[test]
    fn test_command_that_cannot_start_is_an_error() {
        let runner = CommandRunner::new();
        let mut store = ContextStore::new();
        let properties = Properties::new();
        let ctx = TaskContext::new("Check", &mut store, &properties, &runner, None);
        let condition = Condition {
            command: Some("true".to_string()),
            ..Default::default()
        };
        let interpreter = vec!["/nonexistent/rsake-shell".to_string()];
        assert!(evaluate(&condition, &ctx, &interpreter).is_err());
    }

    #[test]
    fn test_exists_is_relative_to_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("Cargo.toml"), "").unwrap();
        let runner = CommandRunner::new().with_base_dir(temp_dir.path());

        let present = Condition {
            exists: Some("Cargo.toml".to_string()),
            ..Default::default()
        };
        let absent = Condition {
            exists: Some("missing.txt".to_string()),
            ..Default::default()
        };
        assert!(check(present, &Properties::new(), &runner).unwrap());
        assert!(!check(absent, &Properties::new(), &runner).unwrap());
    }

    #[test]
    fn test_env_conditions() {
        env::set_var("TEST_RSAKE_WHEN_VAR", "1");
        env::remove_var("TEST_RSAKE_WHEN_UNSET");
        let runner = CommandRunner::new();

        let set = Condition {
            env_set: Some("TEST_RSAKE_WHEN_VAR".to_string()),
            ..Default::default()
        };
        let unset = Condition {
            env_not_set: Some("TEST_RSAKE_WHEN_UNSET".to_string()),
            ..Default::default()
        };
        assert!(check(set, &Properties::new(), &runner).unwrap());
        assert!(check(unset, &Properties::new(), &runner).unwrap());

        env::remove_var("TEST_RSAKE_WHEN_VAR");
    }

    #[test]
    fn test_set_checks_properties_and_store() {
        let mut properties = Properties::new();
        properties.declare("sign", "true");
        let runner = CommandRunner::new();

        for name in ["sign", "stage"] {
            let condition = Condition {
                set: Some(name.to_string()),
                ..Default::default()
            };
            assert!(check(condition, &properties, &runner).unwrap());
        }
        let condition = Condition {
            not_set: Some("publish".to_string()),
            ..Default::default()
        };
        assert!(check(condition, &properties, &runner).unwrap());
    }

    #[test]
    fn test_all_must_hold() {
        let runner = CommandRunner::new();
        let mut store = ContextStore::new();
        let properties = Properties::new();
        let ctx = TaskContext::new("Check", &mut store, &properties, &runner, None);

        let conditions = vec![
            Condition {
                command: Some("true".to_string()),
                ..Default::default()
            },
            Condition {
                set: Some("never".to_string()),
                ..Default::default()
            },
        ];
        assert!(!evaluate_all(&conditions, &ctx, &sh()).unwrap());
        assert!(evaluate_all(&conditions[..1], &ctx, &sh()).unwrap());
    }

    #[test]
    fn test_empty_condition_is_an_error() {
        assert!(check(Condition::default(), &Properties::new(), &CommandRunner::new()).is_err());
    }
}
