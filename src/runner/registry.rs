//! Task registry
//!
//! Maps task names (and aliases) to [`Task`]s. Lookups are case-insensitive;
//! the declared spelling is kept for display. Registration order carries no
//! execution meaning and is only used when listing tasks.

use crate::error::RegistryError;
use crate::runner::Task;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task, rejecting a name or alias that is already taken
    pub fn register(&mut self, task: Task) -> Result<(), RegistryError> {
        if self.index.contains_key(&key(&task.name)) {
            return Err(RegistryError::DuplicateTask(task.name));
        }
        if let Some(alias) = &task.alias {
            if self.index.contains_key(&key(alias)) || key(alias) == key(&task.name) {
                return Err(RegistryError::DuplicateTask(alias.clone()));
            }
        }

        let position = self.tasks.len();
        self.index.insert(key(&task.name), position);
        if let Some(alias) = &task.alias {
            self.index.insert(key(alias), position);
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Look up a task by name or alias
    pub fn get(&self, name: &str) -> Result<&Task, RegistryError> {
        self.index
            .get(&key(name))
            .map(|&position| &self.tasks[position])
            .ok_or_else(|| RegistryError::UnknownTask(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&key(name))
    }

    /// Tasks in registration order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
