//! Build scripts as task registries
//!
//! Turns a parsed [`BuildScript`] into a [`Registry`] whose actions are
//! closures over the task's run items, and loads complete builds from disk
//! (script, properties, dotenv environment) ready to execute.

use crate::config::{
    compile_pattern, load_dotenv, parse_build_script_file, script_dir, validate_script,
    BackoffKind, BuildScript, CommandDef, Condition, InvokeDef, RetryDef, RunItem, TaskDef,
};
use crate::error::{ConfigResult, RsakeError};
use crate::runner::{
    evaluate_all, interpolate_map, interpolate_strict, validate, Backoff, CommandOptions,
    CommandRunner, CommandSpec, Engine, Properties, Registry, RetryPolicy, RunReport, Task,
    TaskContext,
};
use anyhow::bail;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Target used when none is requested
pub const DEFAULT_TASK: &str = "Default";

/// What every action of one script shares
#[derive(Debug)]
struct ScriptEnv {
    interpreter: Vec<String>,
    path: PathBuf,
    dir: PathBuf,
    /// Tasks of enclosing builds currently running an `invoke` step
    invoking: Vec<Invocation>,
}

/// A task that is waiting on a nested build
#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    script: PathBuf,
    task: String,
}

impl Invocation {
    fn new(script: &Path, task: &str) -> Self {
        Invocation {
            script: fs::canonicalize(script).unwrap_or_else(|_| script.to_path_buf()),
            task: task.to_lowercase(),
        }
    }
}

/// One compiled run item
#[derive(Debug)]
enum Step {
    Command {
        line: String,
        options: CommandOptions,
        capture: Option<String>,
    },
    Set(BTreeMap<String, String>),
    Invoke(InvokeDef),
}

/// A build script loaded from disk, ready to run
#[derive(Debug)]
pub struct Build {
    pub script: BuildScript,
    pub path: PathBuf,
    pub registry: Registry,
    /// Script defaults merged under the overrides
    pub properties: Properties,
    pub runner: CommandRunner,
    env: BTreeMap<String, String>,
}

impl Build {
    /// Load, validate and register the script at `path`
    pub fn load(path: &Path, overrides: Properties) -> Result<Self, RsakeError> {
        let script = parse_build_script_file(path)?;
        Self::from_script(script, path, overrides)
    }

    /// Build from an already parsed script located at `path`
    pub fn from_script(
        script: BuildScript,
        path: &Path,
        properties: Properties,
    ) -> Result<Self, RsakeError> {
        Self::assemble(script, path, properties, Vec::new())
    }

    fn assemble(
        script: BuildScript,
        path: &Path,
        mut properties: Properties,
        invoking: Vec<Invocation>,
    ) -> Result<Self, RsakeError> {
        validate_script(&script)?;
        let registry = register_tasks(&script, path, invoking)?;
        validate(&registry)?;

        for (key, value) in &script.properties {
            properties.declare(key.clone(), value.clone());
        }

        let dir = script_dir(path);
        let env = load_dotenv(&script, &dir)?;
        let runner = CommandRunner::new()
            .with_base_dir(&dir)
            .with_env(env.clone());

        Ok(Build {
            script,
            path: path.to_path_buf(),
            registry,
            properties,
            runner,
            env,
        })
    }

    /// Replace the command runner, keeping this script's directory and environment
    pub fn with_runner(mut self, runner: CommandRunner) -> Self {
        self.runner = runner
            .with_base_dir(script_dir(&self.path))
            .with_env(self.env.clone());
        self
    }

    /// An engine over this build's registry, properties and runner
    pub fn engine(&self) -> Engine<'_> {
        Engine::new(&self.registry)
            .with_properties(self.properties.clone())
            .with_runner(self.runner.clone())
    }
}

/// Run `targets` of the script at `path` with fresh run state.
///
/// `runner` supplies execution settings such as the retry sleeper; its
/// directory and environment are replaced by the nested script's own.
pub fn invoke_build_file<S: AsRef<str>>(
    path: &Path,
    targets: &[S],
    overrides: Properties,
    runner: &CommandRunner,
) -> anyhow::Result<RunReport> {
    run_nested(path, targets, overrides, runner, Vec::new())
}

fn run_nested<S: AsRef<str>>(
    path: &Path,
    targets: &[S],
    overrides: Properties,
    runner: &CommandRunner,
    invoking: Vec<Invocation>,
) -> anyhow::Result<RunReport> {
    let script = parse_build_script_file(path)?;
    let build = Build::assemble(script, path, overrides, invoking)?.with_runner(runner.clone());
    info!(script = %path.display(), "starting nested build");
    let result = build.engine().invoke(targets)?;
    Ok(result)
}

/// Register every task of `script`
pub fn build_registry(script: &BuildScript, path: &Path) -> Result<Registry, RsakeError> {
    register_tasks(script, path, Vec::new())
}

fn register_tasks(
    script: &BuildScript,
    path: &Path,
    invoking: Vec<Invocation>,
) -> Result<Registry, RsakeError> {
    let env = Arc::new(ScriptEnv {
        interpreter: script
            .interpreter
            .clone()
            .unwrap_or_else(|| vec!["sh".to_string(), "-c".to_string()]),
        path: path.to_path_buf(),
        dir: script_dir(path),
        invoking,
    });

    let mut registry = Registry::new();
    for (name, def) in &script.tasks {
        registry.register(build_task(name, def, &env)?)?;
    }
    Ok(registry)
}

fn build_task(name: &str, def: &TaskDef, env: &Arc<ScriptEnv>) -> ConfigResult<Task> {
    let mut task = Task::new(name)
        .depends_on(def.depends.iter().cloned())
        .requires(def.requires.iter().cloned())
        .continue_on_error(def.continue_on_error);

    if let Some(description) = &def.description {
        task = task.description(description.clone());
    }
    if let Some(alias) = &def.alias {
        task = task.alias(alias.clone());
    }
    if let Some(secs) = def.timeout {
        task = task.timeout(Duration::from_secs(secs));
    }

    if !def.precondition.is_empty() {
        task = task.precondition(condition_fn(def.precondition.clone(), env.clone()));
    }
    if !def.postcondition.is_empty() {
        task = task.postcondition(condition_fn(def.postcondition.clone(), env.clone()));
    }

    if !def.run.is_empty() {
        let steps = compile_steps(name, &def.run)?;
        let env = env.clone();
        task = task.action(move |ctx| run_steps(&steps, ctx, &env));
    }
    if !def.finally.is_empty() {
        let steps = compile_steps(name, &def.finally)?;
        let env = env.clone();
        task = task.teardown(move |ctx| run_steps(&steps, ctx, &env));
    }

    Ok(task)
}

fn condition_fn(
    conditions: Vec<Condition>,
    env: Arc<ScriptEnv>,
) -> impl Fn(&TaskContext<'_>) -> anyhow::Result<bool> + Send + Sync + 'static {
    move |ctx| evaluate_all(&conditions, ctx, &env.interpreter)
}

fn compile_steps(task: &str, items: &[RunItem]) -> ConfigResult<Vec<Step>> {
    items
        .iter()
        .map(|item| match item {
            RunItem::Shell(line) => Ok(Step::Command {
                line: line.clone(),
                options: CommandOptions::new().echo(true),
                capture: None,
            }),
            RunItem::Command { command } => compile_command(task, command),
            RunItem::Set { set } => Ok(Step::Set(set.clone())),
            RunItem::Invoke { invoke } => Ok(Step::Invoke(invoke.clone())),
        })
        .collect()
}

fn compile_command(task: &str, command: &CommandDef) -> ConfigResult<Step> {
    let detail = match command {
        CommandDef::Simple(line) => {
            return Ok(Step::Command {
                line: line.clone(),
                options: CommandOptions::new().echo(true),
                capture: None,
            })
        }
        CommandDef::Detailed(detail) => detail,
    };

    let mut options = CommandOptions::new().echo(!detail.quiet && detail.capture.is_none());
    if let Some(message) = &detail.error_message {
        options = options.error_message(message.clone());
    }
    if let Some(retry) = &detail.retry {
        options = options.retry(retry_policy(task, retry)?);
    }
    if let Some(secs) = detail.timeout {
        options = options.timeout(Duration::from_secs(secs));
    }
    if let Some(dir) = &detail.dir {
        options = options.working_dir(dir);
    }

    Ok(Step::Command {
        line: detail.exec.clone(),
        options,
        capture: detail.capture.clone(),
    })
}

/// Translate a script's retry settings
pub fn retry_policy(task: &str, def: &RetryDef) -> ConfigResult<RetryPolicy> {
    let delay = Duration::from_millis(def.delay_ms);
    let backoff = match def.backoff {
        BackoffKind::None => Backoff::None,
        BackoffKind::Fixed => Backoff::Fixed(delay),
        BackoffKind::Exponential => Backoff::Exponential {
            initial: delay,
            factor: def.factor,
            max: def
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(Duration::MAX),
        },
    };

    let mut policy = RetryPolicy::attempts(def.attempts).with_backoff(backoff);
    if let Some(ratio) = def.jitter {
        policy = policy.with_jitter(ratio, def.jitter_seed);
    }
    if let Some(pattern) = &def.on {
        policy = policy.retry_on(compile_pattern(task, pattern)?);
    }
    Ok(policy)
}

fn run_steps(steps: &[Step], ctx: &mut TaskContext<'_>, env: &ScriptEnv) -> anyhow::Result<()> {
    for step in steps {
        run_step(step, ctx, env)?;
    }
    Ok(())
}

fn run_step(step: &Step, ctx: &mut TaskContext<'_>, env: &ScriptEnv) -> anyhow::Result<()> {
    match step {
        Step::Command {
            line,
            options,
            capture,
        } => {
            let line = interpolate_strict(line, &ctx.vars())?;
            debug!(task = %ctx.task_name(), command = %line, "running command");
            let spec = CommandSpec::shell(&env.interpreter, &line);
            let output = ctx.run_command(&spec, options)?;
            if let Some(key) = capture {
                ctx.set(key.clone(), output.stdout.trim());
            }
        }
        Step::Set(values) => {
            let vars = ctx.vars();
            for (key, value) in interpolate_map(values, &vars)? {
                ctx.set(key, value);
            }
        }
        Step::Invoke(def) => {
            let vars = ctx.vars();
            let file = match &def.file {
                Some(file) => env.dir.join(interpolate_strict(file, &vars)?),
                None => env.path.clone(),
            };
            let overrides = Properties::with_overrides(interpolate_map(&def.properties, &vars)?);
            let targets = if def.tasks.is_empty() {
                vec![DEFAULT_TASK.to_string()]
            } else {
                def.tasks.clone()
            };

            let current = Invocation::new(&env.path, ctx.task_name());
            if env.invoking.contains(&current) {
                bail!(
                    "task '{}' of '{}' invokes itself through nested builds",
                    ctx.task_name(),
                    env.path.display()
                );
            }
            let mut invoking = env.invoking.clone();
            invoking.push(current);

            let report = run_nested(&file, &targets, overrides, ctx.runner(), invoking)?;
            if !report.success {
                let failed: Vec<&str> = report
                    .outcomes
                    .iter()
                    .filter(|o| o.is_fatal())
                    .map(|o| o.name.as_str())
                    .collect();
                bail!(
                    "nested build '{}' failed: {}",
                    file.display(),
                    failed.join(", ")
                );
            }
        }
    }
    Ok(())
}
