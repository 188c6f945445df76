//! Dependency resolution
//!
//! Turns requested targets into an [`ExecutionPlan`]: a depth-first,
//! post-order walk of the dependency graph. Dependencies are visited in
//! declaration order and targets in request order, so an unchanged registry
//! always yields the same plan.

use crate::error::{ResolveError, ResolveResult};
use crate::runner::Registry;
use std::collections::HashSet;

/// Ordered task names; every dependency precedes its dependents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    tasks: Vec<String>,
}

impl ExecutionPlan {
    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Position of a task in the plan
    pub fn position(&self, name: &str) -> Option<usize> {
        let key = name.to_lowercase();
        self.tasks.iter().position(|t| t.to_lowercase() == key)
    }

    pub fn into_tasks(self) -> Vec<String> {
        self.tasks
    }
}

/// Resolve `targets` into an execution plan
pub fn resolve<S: AsRef<str>>(registry: &Registry, targets: &[S]) -> ResolveResult<ExecutionPlan> {
    let mut walk = Walk::new(registry);

    for target in targets {
        let task = registry
            .get(target.as_ref())
            .map_err(|_| ResolveError::UnknownTask(target.as_ref().to_string()))?;
        walk.visit(&task.name)?;
    }

    Ok(ExecutionPlan { tasks: walk.order })
}

/// Check every registered task for dangling dependencies and cycles
pub fn validate(registry: &Registry) -> ResolveResult<()> {
    let mut walk = Walk::new(registry);
    for task in registry.tasks() {
        walk.visit(&task.name)?;
    }
    Ok(())
}

struct Walk<'r> {
    registry: &'r Registry,
    visiting: HashSet<String>,
    done: HashSet<String>,
    path: Vec<String>,
    order: Vec<String>,
}

impl<'r> Walk<'r> {
    fn new(registry: &'r Registry) -> Self {
        Walk {
            registry,
            visiting: HashSet::new(),
            done: HashSet::new(),
            path: Vec::new(),
            order: Vec::new(),
        }
    }

    /// `name` must be the canonical name of a registered task
    fn visit(&mut self, name: &str) -> ResolveResult<()> {
        let key = name.to_lowercase();
        if self.done.contains(&key) {
            return Ok(());
        }
        if self.visiting.contains(&key) {
            let start = self
                .path
                .iter()
                .position(|p| p.to_lowercase() == key)
                .unwrap_or(0);
            let mut cycle = self.path[start..].to_vec();
            cycle.push(name.to_string());
            return Err(ResolveError::CyclicDependency(cycle));
        }

        let registry = self.registry;
        let task = registry
            .get(name)
            .map_err(|_| ResolveError::UnknownTask(name.to_string()))?;

        self.visiting.insert(key.clone());
        self.path.push(task.name.clone());

        for dependency in &task.dependencies {
            let dep = registry
                .get(dependency)
                .map_err(|_| ResolveError::UnknownDependency {
                    task: task.name.clone(),
                    dependency: dependency.clone(),
                })?;
            self.visit(&dep.name)?;
        }

        self.path.pop();
        self.visiting.remove(&key);
        self.done.insert(key);
        self.order.push(task.name.clone());
        Ok(())
    }
}
