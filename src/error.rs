//! Error types for rsake

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for rsake operations
pub type Result<T> = std::result::Result<T, RsakeError>;

/// Main error type for rsake
#[derive(Error, Debug)]
pub enum RsakeError {
    /// Build script errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Task registration errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Plan resolution errors
    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// Variable interpolation errors
    #[error("Interpolation error: {0}")]
    Interpolation(#[from] InterpolationError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Build script parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find build script (searched: {0})")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid property override '{0}', expected KEY=VALUE")]
    InvalidOverride(String),

    #[error("Invalid pattern '{pattern}' in task '{task}': {error}")]
    InvalidPattern {
        task: String,
        pattern: String,
        error: String,
    },

    #[error("Failed to include file '{path}': {error}")]
    IncludeFile { path: PathBuf, error: String },

    #[error("Failed to load environment file '{path}': {error}")]
    EnvFile { path: PathBuf, error: String },
}

/// Task registration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Task '{0}' is already defined")]
    DuplicateTask(String),

    #[error("Task '{0}' is not defined")]
    UnknownTask(String),
}

/// Errors raised while turning targets into an execution plan
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Task '{0}' is not defined")]
    UnknownTask(String),

    #[error("Task '{task}' depends on '{dependency}', which is not defined")]
    UnknownDependency { task: String, dependency: String },

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}

/// Raised when a task reads a context key no earlier task has set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Context key '{0}' has not been set in this run")]
pub struct MissingKeyError(pub String);

/// External command errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{}", describe_failure(.message, .exit_code, .attempts))]
    Failed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        attempts: u32,
        message: Option<String>,
    },

    #[error("Command '{program}' timed out after {timeout:?}")]
    TimedOut {
        program: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
        attempts: u32,
    },
}

impl CommandError {
    /// Exit code of the last attempt, if the process exited normally
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::Failed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            CommandError::Spawn { .. } => 1,
            CommandError::Failed { attempts, .. } | CommandError::TimedOut { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Captured stdout and stderr of the last attempt
    pub fn output(&self) -> Option<(&str, &str)> {
        match self {
            CommandError::Spawn { .. } => None,
            CommandError::Failed { stdout, stderr, .. }
            | CommandError::TimedOut { stdout, stderr, .. } => Some((stdout, stderr)),
        }
    }
}

fn describe_failure(message: &Option<String>, exit_code: &Option<i32>, attempts: &u32) -> String {
    let code = match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    };
    let tries = if *attempts > 1 {
        format!(" after {} attempts", attempts)
    } else {
        String::new()
    };
    match message {
        Some(msg) => format!("{} (command failed with {}{})", msg, code, tries),
        None => format!("Command failed with {}{}", code, tries),
    }
}

/// Why a single task ended in the `Failed` state
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Precondition could not be evaluated: {0:#}")]
    Precondition(anyhow::Error),

    #[error("Postcondition failed")]
    Postcondition,

    #[error("Postcondition could not be evaluated: {0:#}")]
    PostconditionEvaluation(anyhow::Error),

    #[error("Required property '{0}' is not set")]
    MissingProperty(String),

    #[error(transparent)]
    MissingKey(#[from] MissingKeyError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Task exceeded its timeout of {0:?}")]
    TimedOut(Duration),

    #[error("{0:#}")]
    Action(anyhow::Error),
}

impl TaskError {
    /// Classify an error returned by a task action
    pub fn from_action(err: anyhow::Error) -> Self {
        let err = match err.downcast::<CommandError>() {
            Ok(cmd) => return TaskError::Command(cmd),
            Err(err) => err,
        };
        match err.downcast::<MissingKeyError>() {
            Ok(key) => TaskError::MissingKey(key),
            Err(err) => TaskError::Action(err),
        }
    }
}

/// Variable interpolation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpolationError {
    #[error("Variable '{0}' is not defined")]
    UndefinedVariable(String),

    #[error("Recursive interpolation detected")]
    RecursiveInterpolation,
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for resolution
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

/// Specialized result type for external commands
pub type CommandResult<T> = std::result::Result<T, CommandError>;

/// Specialized result type for interpolation operations
pub type InterpolationResult<T> = std::result::Result<T, InterpolationError>;
