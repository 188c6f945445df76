//! Shared context for task actions
//!
//! The [`ContextStore`] lives for exactly one run: it starts empty and is
//! dropped when the run completes. Tasks publish values into it and later
//! tasks in the same run read them back. [`TaskContext`] is the view of the
//! run handed to every action, precondition and postcondition.

use crate::error::{CommandResult, MissingKeyError};
use crate::runner::{
    CommandOptions, CommandOutput, CommandRunner, CommandSpec, Properties, Vars,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Run-scoped key-value store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextStore {
    values: HashMap<String, String>,
}

impl ContextStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a value, replacing any earlier value for the key
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Read a value published earlier in this run
    pub fn get(&self, key: &str) -> Result<&str, MissingKeyError> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| MissingKeyError(key.to_string()))
    }

    /// Check whether a key has been published
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Remove a key, returning its previous value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over all published values
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// The view of the current run given to a task
pub struct TaskContext<'a> {
    task: &'a str,
    store: &'a mut ContextStore,
    properties: &'a Properties,
    runner: &'a CommandRunner,
    deadline: Option<Instant>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        task: &'a str,
        store: &'a mut ContextStore,
        properties: &'a Properties,
        runner: &'a CommandRunner,
        deadline: Option<Instant>,
    ) -> Self {
        TaskContext {
            task,
            store,
            properties,
            runner,
            deadline,
        }
    }

    /// Name of the task being executed
    pub fn task_name(&self) -> &str {
        self.task
    }

    /// Read-only access to the run's shared store
    pub fn store(&self) -> &ContextStore {
        self.store
    }

    /// Mutable access to the run's shared store
    pub fn store_mut(&mut self) -> &mut ContextStore {
        self.store
    }

    /// Shorthand for `store().get(key)`
    pub fn get(&self, key: &str) -> Result<&str, MissingKeyError> {
        self.store.get(key)
    }

    /// Shorthand for `store_mut().set(key, value)`
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.store.set(key, value);
    }

    /// Build properties (declared defaults merged with overrides)
    pub fn properties(&self) -> &Properties {
        self.properties
    }

    /// Look up a single property
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name)
    }

    /// Check whether a name is set either as a property or in the store
    pub fn is_set(&self, name: &str) -> bool {
        self.store.contains(name) || self.properties.contains(name)
    }

    /// Variables visible to interpolation.
    ///
    /// Lookup order is store, then properties, then the runner's dotenv
    /// environment; the process environment is consulted last by
    /// [`interpolate`](crate::runner::interpolate). Only property values are
    /// expanded further.
    pub fn vars(&self) -> Vars {
        let mut vars = Vars::new();
        for (key, value) in self.runner.env() {
            vars.literal(key.clone(), value.clone());
        }
        for (key, value) in self.properties.iter() {
            vars.define(key, value);
        }
        for (key, value) in self.store.iter() {
            vars.literal(key, value);
        }
        vars
    }

    /// The command runner configured for this run
    pub fn runner(&self) -> &CommandRunner {
        self.runner
    }

    /// Time left before the task's timeout, if it has one
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Run an external command, capped by the task's remaining time
    pub fn run_command(
        &self,
        spec: &CommandSpec,
        options: &CommandOptions,
    ) -> CommandResult<CommandOutput> {
        match self.remaining() {
            Some(left) => {
                let capped = options.clone().capped_timeout(left);
                self.runner.run(spec, &capped)
            }
            None => self.runner.run(spec, options),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::interpolate;
    use std::collections::BTreeMap;

    #[test]
    fn test_store_starts_empty() {
        let store = ContextStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_store_set_and_get() {
        let mut store = ContextStore::new();
        store.set("version", "1.2.3");
        assert_eq!(store.get("version"), Ok("1.2.3"));
        assert!(store.contains("version"));
    }

    #[test]
    fn test_store_get_missing_key() {
        let store = ContextStore::new();
        assert_eq!(
            store.get("version"),
            Err(MissingKeyError("version".to_string()))
        );
    }

    #[test]
    fn test_store_overwrite() {
        let mut store = ContextStore::new();
        store.set("k", "one");
        store.set("k", "two");
        assert_eq!(store.get("k"), Ok("two"));
        assert_eq!(store.remove("k"), Some("two".to_string()));
        assert!(!store.contains("k"));
    }

    #[test]
    fn test_vars_prefer_store_over_properties() {
        let mut properties = Properties::new();
        properties.declare("configuration", "Debug");
        properties.declare("target", "x86_64");
        let mut store = ContextStore::new();
        store.set("configuration", "Release");
        let runner = CommandRunner::new();

        let ctx = TaskContext::new("Build", &mut store, &properties, &runner, None);
        let vars = ctx.vars();
        assert_eq!(vars.get("configuration"), Some("Release"));
        assert_eq!(vars.get("target"), Some("x86_64"));
        assert!(ctx.is_set("target"));
        assert!(!ctx.is_set("missing"));
        assert_eq!(ctx.task_name(), "Build");
        assert_eq!(ctx.remaining(), None);
    }

    #[test]
    fn test_vars_layer_dotenv_under_properties() {
        let mut properties = Properties::new();
        properties.declare("region", "eu-west-1");
        let mut store = ContextStore::new();
        store.set("greeting", "${region}");
        let mut env = BTreeMap::new();
        env.insert("REGION_SUFFIX".to_string(), "-b".to_string());
        env.insert("region".to_string(), "from-dotenv".to_string());
        let runner = CommandRunner::new().with_env(env);

        let ctx = TaskContext::new("Deploy", &mut store, &properties, &runner, None);
        let vars = ctx.vars();
        assert_eq!(vars.get("REGION_SUFFIX"), Some("-b"));
        assert_eq!(vars.get("region"), Some("eu-west-1"));
        assert_eq!(
            interpolate("${region}${REGION_SUFFIX} ${greeting}", &vars).unwrap(),
            "eu-west-1-b ${region}"
        );
    }
}
