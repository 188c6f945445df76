//! Core configuration types
//!
//! This module defines the data structures that represent an rsake.yml
//! build script.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level build script structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BuildScript {
    /// Project name (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Property defaults, overridable from the command line
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "deserialize_scalar_map"
    )]
    pub properties: BTreeMap<String, String>,

    /// Glob patterns of further scripts whose tasks and properties are merged in
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_string_list"
    )]
    pub include: Vec<String>,

    /// Environment file loaded for every command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dotenv: Option<String>,

    /// Interpreter used for command lines (e.g., ["sh", "-c"])
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<Vec<String>>,

    /// Tasks declared in the script
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskDef>,
}

/// A task declaration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskDef {
    /// Shown by `--docs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Tasks that must complete first, in order
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_string_list"
    )]
    pub depends: Vec<String>,

    /// Conditions that must all hold for the task to run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub precondition: Vec<Condition>,

    /// Conditions that must all hold after the task ran
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postcondition: Vec<Condition>,

    /// Properties that must be set
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_string_list"
    )]
    pub requires: Vec<String>,

    #[serde(default)]
    pub continue_on_error: bool,

    /// Task timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Run items to execute
    #[serde(default, deserialize_with = "deserialize_run_items")]
    pub run: Vec<RunItem>,

    /// Run items that always execute after `run`, even on error
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_run_items"
    )]
    pub finally: Vec<RunItem>,
}

/// A single step of a task
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RunItem {
    /// Plain command line
    Shell(String),

    /// Command with options
    Command { command: CommandDef },

    /// Write values into the context store
    Set {
        #[serde(deserialize_with = "deserialize_scalar_map")]
        set: BTreeMap<String, String>,
    },

    /// Run another build with its own state
    Invoke { invoke: InvokeDef },
}

/// A command, as a bare line or with options
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CommandDef {
    Simple(String),
    Detailed(CommandDetail),
}

impl CommandDef {
    pub fn exec(&self) -> &str {
        match self {
            CommandDef::Simple(line) => line,
            CommandDef::Detailed(detail) => &detail.exec,
        }
    }
}

/// Detailed command specification
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommandDetail {
    /// The command line to execute
    pub exec: String,

    /// Store key receiving the trimmed stdout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<String>,

    /// Message reported when the command fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryDef>,

    /// Per-attempt timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Working directory, relative to the script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Do not echo output to the console
    #[serde(default)]
    pub quiet: bool,
}

/// Retry settings of a command
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryDef {
    /// Total attempts, including the first
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default)]
    pub backoff: BackoffKind,

    /// Fixed delay, or initial delay for exponential backoff
    #[serde(default)]
    pub delay_ms: u64,

    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Upper bound for exponential backoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,

    /// Fraction of the delay added at random
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,

    #[serde(default)]
    pub jitter_seed: u64,

    /// Regex a failed attempt's output must match to be retried
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,
}

impl Default for RetryDef {
    fn default() -> Self {
        RetryDef {
            attempts: default_attempts(),
            backoff: BackoffKind::default(),
            delay_ms: 0,
            factor: default_factor(),
            max_delay_ms: None,
            jitter: None,
            jitter_seed: 0,
            on: None,
        }
    }
}

fn default_attempts() -> u32 {
    1
}

fn default_factor() -> f64 {
    2.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    None,
    Fixed,
    Exponential,
}

/// A nested build
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct InvokeDef {
    /// Build script to load; the current script when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Targets of the nested build; `Default` when empty
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_string_list"
    )]
    pub tasks: Vec<String>,

    /// Property overrides for the nested build
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "deserialize_scalar_map"
    )]
    pub properties: BTreeMap<String, String>,
}

/// A condition; exactly one field is expected to be set
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Condition {
    /// Check if values are equal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equal: Option<Comparison>,

    /// Check if values are not equal
    #[serde(rename = "not-equal", default, skip_serializing_if = "Option::is_none")]
    pub not_equal: Option<Comparison>,

    /// Check if a command succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Check if a path exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<String>,

    /// Check if environment variable is set
    #[serde(rename = "env-set", default, skip_serializing_if = "Option::is_none")]
    pub env_set: Option<String>,

    /// Check if environment variable is not set
    #[serde(rename = "env-not-set", default, skip_serializing_if = "Option::is_none")]
    pub env_not_set: Option<String>,

    /// Check if a property or store key is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,

    /// Check if a property or store key is not set
    #[serde(rename = "not-set", default, skip_serializing_if = "Option::is_none")]
    pub not_set: Option<String>,
}

/// A comparison for equality conditions
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Comparison {
    pub left: String,
    pub right: String,
}

/// Accept a single string or a list of strings
fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(vec![s]),
        Value::Sequence(seq) => seq
            .into_iter()
            .map(|item| scalar_to_string(item).map_err(D::Error::custom))
            .collect(),
        Value::Null => Ok(Vec::new()),
        _ => Err(D::Error::custom("expected a string or a list of strings")),
    }
}

/// Accept a mapping whose values are any YAML scalars, kept as strings
fn deserialize_scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    match Value::deserialize(deserializer)? {
        Value::Mapping(map) => map
            .into_iter()
            .map(|(key, value)| {
                let key = scalar_to_string(key).map_err(D::Error::custom)?;
                let value = scalar_to_string(value).map_err(D::Error::custom)?;
                Ok((key, value))
            })
            .collect(),
        Value::Null => Ok(BTreeMap::new()),
        _ => Err(D::Error::custom("expected a mapping of names to values")),
    }
}

fn scalar_to_string(value: serde_yaml::Value) -> Result<String, String> {
    use serde_yaml::Value;

    match value {
        Value::String(s) => Ok(s),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(format!("expected a scalar value, found {:?}", other)),
    }
}

/// Accept a single run item or a list of them
fn deserialize_run_items<'de, D>(deserializer: D) -> Result<Vec<RunItem>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    match value {
        // Single command line
        Value::String(s) => Ok(vec![RunItem::Shell(s)]),
        Value::Mapping(_) => {
            let item = RunItem::deserialize(value).map_err(|_| {
                D::Error::custom("run item must have one of: command, set, invoke")
            })?;
            Ok(vec![item])
        }
        Value::Sequence(seq) => {
            let mut items = Vec::new();
            for item in seq {
                let item = RunItem::deserialize(item).map_err(|_| {
                    D::Error::custom("run item must be a string or have one of: command, set, invoke")
                })?;
                items.push(item);
            }
            Ok(items)
        }
        Value::Null => Ok(Vec::new()),
        _ => Err(D::Error::custom("run must be a string or array")),
    }
}
