//! Task definitions
//!
//! A [`Task`] is a named unit of work: its dependencies, the gates around it
//! (precondition, postcondition, required properties) and the action itself.
//! Actions are closures, so a registry can be built programmatically; tasks
//! declared in a build script are turned into closures by
//! [`crate::runner::script`].

use crate::runner::TaskContext;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The body of a task (also used for teardown)
pub type ActionFn = dyn Fn(&mut TaskContext<'_>) -> anyhow::Result<()> + Send + Sync;

/// A gate evaluated before or after the action
pub type PredicateFn = dyn Fn(&TaskContext<'_>) -> anyhow::Result<bool> + Send + Sync;

/// A named unit of work
#[derive(Clone)]
pub struct Task {
    /// Task name, unique (case-insensitively) within a registry
    pub name: String,

    /// Tasks that must finish before this one, in declaration order
    pub dependencies: Vec<String>,

    /// Documentation only
    pub description: Option<String>,

    /// Alternative name accepted wherever the task name is
    pub alias: Option<String>,

    /// A failure of this task neither blocks dependents nor fails the run
    pub continue_on_error: bool,

    /// Properties that must be set before the action runs
    pub required_properties: Vec<String>,

    /// Limit on the time spent in the action
    pub timeout: Option<Duration>,

    precondition: Option<Arc<PredicateFn>>,
    postcondition: Option<Arc<PredicateFn>>,
    action: Option<Arc<ActionFn>>,
    teardown: Option<Arc<ActionFn>>,
}

impl Task {
    /// A task with no dependencies and no action
    pub fn new(name: impl Into<String>) -> Self {
        Task {
            name: name.into(),
            dependencies: Vec::new(),
            description: None,
            alias: None,
            continue_on_error: false,
            required_properties: Vec::new(),
            timeout: None,
            precondition: None,
            postcondition: None,
            action: None,
            teardown: None,
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn requires<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_properties
            .extend(properties.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn action<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut TaskContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }

    /// Runs after the action whether or not it failed
    pub fn teardown<F>(mut self, teardown: F) -> Self
    where
        F: Fn(&mut TaskContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.teardown = Some(Arc::new(teardown));
        self
    }

    pub fn precondition<F>(mut self, precondition: F) -> Self
    where
        F: Fn(&TaskContext<'_>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.precondition = Some(Arc::new(precondition));
        self
    }

    pub fn postcondition<F>(mut self, postcondition: F) -> Self
    where
        F: Fn(&TaskContext<'_>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.postcondition = Some(Arc::new(postcondition));
        self
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }

    /// Evaluate the precondition; a task without one always runs
    pub fn check_precondition(&self, ctx: &TaskContext<'_>) -> anyhow::Result<bool> {
        match &self.precondition {
            Some(predicate) => predicate(ctx),
            None => Ok(true),
        }
    }

    /// Evaluate the postcondition; a task without one always passes
    pub fn check_postcondition(&self, ctx: &TaskContext<'_>) -> anyhow::Result<bool> {
        match &self.postcondition {
            Some(predicate) => predicate(ctx),
            None => Ok(true),
        }
    }

    pub fn run_action(&self, ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
        match &self.action {
            Some(action) => action(ctx),
            None => Ok(()),
        }
    }

    pub fn run_teardown(&self, ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
        match &self.teardown {
            Some(teardown) => teardown(ctx),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("description", &self.description)
            .field("alias", &self.alias)
            .field("continue_on_error", &self.continue_on_error)
            .field("required_properties", &self.required_properties)
            .field("timeout", &self.timeout)
            .field("has_precondition", &self.precondition.is_some())
            .field("has_postcondition", &self.postcondition.is_some())
            .field("has_action", &self.action.is_some())
            .field("has_teardown", &self.teardown.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandRunner, ContextStore, Properties};

    #[test]
    fn test_builder_sets_fields() {
        let task = Task::new("Test")
            .depends_on(["Build", "Lint"])
            .description("Run the tests")
            .alias("t")
            .continue_on_error(true)
            .requires(["configuration"])
            .timeout(Duration::from_secs(60));

        assert_eq!(task.name, "Test");
        assert_eq!(task.dependencies, vec!["Build", "Lint"]);
        assert_eq!(task.description.as_deref(), Some("Run the tests"));
        assert_eq!(task.alias.as_deref(), Some("t"));
        assert!(task.continue_on_error);
        assert_eq!(task.required_properties, vec!["configuration"]);
        assert_eq!(task.timeout, Some(Duration::from_secs(60)));
        assert!(!task.has_action());
    }

    #[test]
    fn test_defaults_without_closures() {
        let task = Task::new("Default");
        let mut store = ContextStore::new();
        let properties = Properties::new();
        let runner = CommandRunner::new();
        let mut ctx = TaskContext::new("Default", &mut store, &properties, &runner, None);

        assert!(task.check_precondition(&ctx).unwrap());
        assert!(task.check_postcondition(&ctx).unwrap());
        assert!(task.run_action(&mut ctx).is_ok());
        assert!(task.run_teardown(&mut ctx).is_ok());
    }

    #[test]
    fn test_action_writes_to_store() {
        let task = Task::new("Version").action(|ctx| {
            ctx.set("version", "2.0.0");
            Ok(())
        });
        let mut store = ContextStore::new();
        let properties = Properties::new();
        let runner = CommandRunner::new();
        {
            let mut ctx = TaskContext::new("Version", &mut store, &properties, &runner, None);
            task.run_action(&mut ctx).unwrap();
        }
        assert_eq!(store.get("version"), Ok("2.0.0"));
    }

    #[test]
    fn test_loop_variables_are_captured_by_value() {
        let tasks: Vec<Task> = ["alpha", "beta", "gamma"]
            .iter()
            .map(|name| {
                let project = name.to_string();
                Task::new(format!("Build-{}", name)).action(move |ctx| {
                    ctx.set("built", project.clone());
                    Ok(())
                })
            })
            .collect();

        let properties = Properties::new();
        let runner = CommandRunner::new();
        for (task, expected) in tasks.iter().zip(["alpha", "beta", "gamma"]) {
            let mut store = ContextStore::new();
            let mut ctx = TaskContext::new(&task.name, &mut store, &properties, &runner, None);
            task.run_action(&mut ctx).unwrap();
            assert_eq!(ctx.get("built"), Ok(expected));
        }
    }
}
