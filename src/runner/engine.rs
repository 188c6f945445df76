//! Execution engine
//!
//! Walks an [`ExecutionPlan`] strictly in order. Each task moves from
//! `Pending` to `Skipped`, or through `Running` to `Succeeded` or `Failed`.
//! A failure blocks every transitive dependent (they are skipped, never
//! started) unless the failing task has `continue_on_error`; tasks unrelated
//! to the failure still run.

use crate::error::{ResolveResult, TaskError};
use crate::runner::{
    resolve, CommandRunner, ContextStore, EventSink, ExecutionPlan, Properties, Registry, RunEvent,
    SkipReason, Task, TaskContext,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle state of a planned task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

/// How a task ended
#[derive(Debug)]
pub enum Outcome {
    Succeeded,
    Skipped(SkipReason),
    Failed { error: TaskError, tolerated: bool },
}

/// Terminal result of one task in a run
#[derive(Debug)]
pub struct TaskOutcome {
    pub name: String,
    pub outcome: Outcome,
    pub duration: Duration,
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self.outcome {
            Outcome::Succeeded => TaskStatus::Succeeded,
            Outcome::Skipped(_) => TaskStatus::Skipped,
            Outcome::Failed { .. } => TaskStatus::Failed,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match &self.outcome {
            Outcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match &self.outcome {
            Outcome::Skipped(reason) => Some(reason),
            _ => None,
        }
    }

    /// Failed without `continue_on_error`
    pub fn is_fatal(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { tolerated: false, .. })
    }

    /// Whether dependents of this task must be skipped
    fn blocks_dependents(&self) -> bool {
        match &self.outcome {
            Outcome::Succeeded => false,
            Outcome::Skipped(reason) => reason.blocks_dependents(),
            Outcome::Failed { tolerated, .. } => !tolerated,
        }
    }
}

/// Summary of a finished run
#[derive(Debug)]
pub struct RunReport {
    /// One entry per planned task, in plan order
    pub outcomes: Vec<TaskOutcome>,
    /// No task failed without `continue_on_error`
    pub success: bool,
    pub cancelled: bool,
    pub duration: Duration,
}

impl RunReport {
    pub fn plan(&self) -> Vec<&str> {
        self.outcomes.iter().map(|o| o.name.as_str()).collect()
    }

    pub fn outcome(&self, name: &str) -> Option<&TaskOutcome> {
        let key = name.to_lowercase();
        self.outcomes.iter().find(|o| o.name.to_lowercase() == key)
    }

    pub fn status(&self, name: &str) -> Option<TaskStatus> {
        self.outcome(name).map(TaskOutcome::status)
    }

    /// Every failed task, tolerated or not
    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status() == TaskStatus::Failed)
    }
}

/// Stops a run at the next task boundary
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-run state, owned by a single call to [`Engine::run`]
struct RunState {
    store: ContextStore,
    statuses: HashMap<String, TaskStatus>,
    blocking: HashSet<String>,
    outcomes: Vec<TaskOutcome>,
    success: bool,
    cancelled: bool,
}

impl RunState {
    fn new(plan: &ExecutionPlan) -> Self {
        RunState {
            store: ContextStore::new(),
            statuses: plan
                .tasks()
                .iter()
                .map(|name| (name.to_lowercase(), TaskStatus::Pending))
                .collect(),
            blocking: HashSet::new(),
            outcomes: Vec::with_capacity(plan.len()),
            success: true,
            cancelled: false,
        }
    }

    fn set_status(&mut self, name: &str, status: TaskStatus) {
        self.statuses.insert(name.to_lowercase(), status);
    }

    fn is_blocking(&self, name: &str) -> bool {
        self.blocking.contains(&name.to_lowercase())
    }

    fn record(&mut self, outcome: TaskOutcome) {
        self.set_status(&outcome.name, outcome.status());
        if outcome.blocks_dependents() {
            self.blocking.insert(outcome.name.to_lowercase());
        }
        if outcome.is_fatal() {
            self.success = false;
        }
        self.outcomes.push(outcome);
    }
}

/// Runs execution plans against a registry
pub struct Engine<'r> {
    registry: &'r Registry,
    properties: Properties,
    runner: CommandRunner,
    sinks: Vec<Box<dyn EventSink + 'r>>,
    cancel: CancellationToken,
}

impl<'r> Engine<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Engine {
            registry,
            properties: Properties::new(),
            runner: CommandRunner::new(),
            sinks: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_runner(mut self, runner: CommandRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Register an event subscriber
    pub fn subscribe(mut self, sink: impl EventSink + 'r) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Token that cancels runs of this engine
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Resolve `targets` and run the resulting plan.
    ///
    /// Resolution errors are returned before any task executes.
    pub fn invoke<S: AsRef<str>>(&self, targets: &[S]) -> ResolveResult<RunReport> {
        let plan = resolve(self.registry, targets)?;
        Ok(self.run(&plan))
    }

    /// Execute a plan produced from this engine's registry
    pub fn run(&self, plan: &ExecutionPlan) -> RunReport {
        let started = Instant::now();
        let mut state = RunState::new(plan);

        info!(tasks = plan.len(), "starting run");
        self.emit(RunEvent::RunStarted {
            plan: plan.tasks().to_vec(),
        });

        for name in plan.tasks() {
            if !state.cancelled && self.cancel.is_cancelled() {
                info!(next = %name, "run cancelled");
                state.cancelled = true;
            }
            let outcome = self.run_task(name, &mut state);
            state.record(outcome);
        }

        let failed: Vec<String> = state
            .outcomes
            .iter()
            .filter(|o| o.is_fatal())
            .map(|o| o.name.clone())
            .collect();
        let duration = started.elapsed();

        info!(success = state.success, ?duration, "run completed");
        self.emit(RunEvent::RunCompleted {
            success: state.success,
            cancelled: state.cancelled,
            failed,
            duration,
        });

        RunReport {
            outcomes: state.outcomes,
            success: state.success,
            cancelled: state.cancelled,
            duration,
        }
    }

    fn run_task(&self, name: &str, state: &mut RunState) -> TaskOutcome {
        let task = match self.registry.get(name) {
            Ok(task) => task,
            Err(err) => {
                return self.fail(name, TaskError::Action(err.into()), false, Duration::ZERO);
            }
        };

        if state.cancelled {
            return self.skip(task, SkipReason::Cancelled);
        }

        let blocked_by = task
            .dependencies
            .iter()
            .filter_map(|dep| self.registry.get(dep).ok())
            .find(|dep| state.is_blocking(&dep.name));
        if let Some(dep) = blocked_by {
            return self.skip(task, SkipReason::DependencyFailed(dep.name.clone()));
        }

        let precondition = {
            let ctx = TaskContext::new(
                &task.name,
                &mut state.store,
                &self.properties,
                &self.runner,
                None,
            );
            task.check_precondition(&ctx)
        };
        match precondition {
            Ok(true) => {}
            Ok(false) => return self.skip(task, SkipReason::PreconditionFalse),
            Err(err) => {
                return self.fail(
                    &task.name,
                    TaskError::Precondition(err),
                    task.continue_on_error,
                    Duration::ZERO,
                );
            }
        }

        if let Some(missing) = task
            .required_properties
            .iter()
            .find(|p| !self.properties.contains(p) && !state.store.contains(p))
        {
            return self.fail(
                &task.name,
                TaskError::MissingProperty(missing.clone()),
                task.continue_on_error,
                Duration::ZERO,
            );
        }

        state.set_status(&task.name, TaskStatus::Running);
        self.emit(RunEvent::TaskStarted {
            task: task.name.clone(),
            description: task.description.clone(),
        });

        let started = Instant::now();
        let result = self.execute(task, &mut state.store, started);
        let duration = started.elapsed();

        match result {
            Ok(()) => {
                debug!(task = %task.name, ?duration, "task succeeded");
                self.emit(RunEvent::TaskSucceeded {
                    task: task.name.clone(),
                    duration,
                });
                TaskOutcome {
                    name: task.name.clone(),
                    outcome: Outcome::Succeeded,
                    duration,
                }
            }
            Err(error) => self.fail(&task.name, error, task.continue_on_error, duration),
        }
    }

    /// Action, teardown, postcondition and timeout check of a running task
    fn execute(
        &self,
        task: &Task,
        store: &mut ContextStore,
        started: Instant,
    ) -> Result<(), TaskError> {
        let deadline = task.timeout.map(|timeout| started + timeout);
        let mut ctx = TaskContext::new(&task.name, store, &self.properties, &self.runner, deadline);

        let action = task.run_action(&mut ctx).map_err(TaskError::from_action);
        let teardown = task.run_teardown(&mut ctx).map_err(TaskError::from_action);
        match (&action, teardown) {
            (Ok(()), Err(err)) => return Err(err),
            (Err(_), Err(err)) => {
                warn!(task = %task.name, error = %err, "teardown failed after action failure");
            }
            _ => {}
        }
        action?;

        match task.check_postcondition(&ctx) {
            Ok(true) => {}
            Ok(false) => return Err(TaskError::Postcondition),
            Err(err) => return Err(TaskError::PostconditionEvaluation(err)),
        }

        if let Some(timeout) = task.timeout {
            if started.elapsed() > timeout {
                return Err(TaskError::TimedOut(timeout));
            }
        }
        Ok(())
    }

    fn skip(&self, task: &Task, reason: SkipReason) -> TaskOutcome {
        debug!(task = %task.name, %reason, "task skipped");
        self.emit(RunEvent::TaskSkipped {
            task: task.name.clone(),
            reason: reason.clone(),
        });
        TaskOutcome {
            name: task.name.clone(),
            outcome: Outcome::Skipped(reason),
            duration: Duration::ZERO,
        }
    }

    fn fail(&self, name: &str, error: TaskError, tolerated: bool, duration: Duration) -> TaskOutcome {
        if tolerated {
            warn!(task = %name, %error, "task failed, continuing");
        } else {
            warn!(task = %name, %error, "task failed");
        }
        self.emit(RunEvent::TaskFailed {
            task: name.to_string(),
            error: error.to_string(),
            tolerated,
            duration,
        });
        TaskOutcome {
            name: name.to_string(),
            outcome: Outcome::Failed { error, tolerated },
            duration,
        }
    }

    fn emit(&self, event: RunEvent) {
        for sink in &self.sinks {
            sink.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CommandError, ResolveError};
    use crate::runner::{CommandOptions, CommandSpec, RetryPolicy};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Mutex;

    fn registry(tasks: Vec<Task>) -> Registry {
        let mut registry = Registry::new();
        for task in tasks {
            registry.register(task).unwrap();
        }
        registry
    }

    fn failing(name: &str) -> Task {
        Task::new(name).action(|_| anyhow::bail!("boom"))
    }

    #[test]
    fn test_all_tasks_succeed() {
        let reg = registry(vec![
            Task::new("Clean").action(|_| Ok(())),
            Task::new("Build").depends_on(["Clean"]).action(|_| Ok(())),
            Task::new("Test").depends_on(["Build"]).action(|_| Ok(())),
        ]);
        let report = Engine::new(&reg).invoke(&["Test"]).unwrap();

        assert!(report.success);
        assert_eq!(report.plan(), vec!["Clean", "Build", "Test"]);
        for name in ["Clean", "Build", "Test"] {
            assert_eq!(report.status(name), Some(TaskStatus::Succeeded));
        }
    }

    #[test]
    fn test_failure_skips_dependents() {
        let reg = registry(vec![
            Task::new("Clean").action(|_| Ok(())),
            failing("Build").depends_on(["Clean"]),
            Task::new("Test").depends_on(["Build"]).action(|_| Ok(())),
        ]);
        let report = Engine::new(&reg).invoke(&["Test"]).unwrap();

        assert!(!report.success);
        assert_eq!(report.status("Clean"), Some(TaskStatus::Succeeded));
        assert_eq!(report.status("Build"), Some(TaskStatus::Failed));
        assert_eq!(report.status("Test"), Some(TaskStatus::Skipped));
        assert_eq!(
            report.outcome("Test").unwrap().skip_reason(),
            Some(&SkipReason::DependencyFailed("Build".to_string()))
        );
    }

    #[test]
    fn test_skip_propagates_transitively() {
        let reg = registry(vec![
            failing("A"),
            Task::new("B").depends_on(["A"]),
            Task::new("C").depends_on(["B"]),
        ]);
        let report = Engine::new(&reg).invoke(&["C"]).unwrap();
        assert_eq!(
            report.outcome("C").unwrap().skip_reason(),
            Some(&SkipReason::DependencyFailed("B".to_string()))
        );
    }

    #[test]
    fn test_independent_tasks_still_run_after_failure() {
        let reg = registry(vec![
            failing("Lint"),
            Task::new("Compile").action(|_| Ok(())),
            Task::new("All").depends_on(["Lint", "Compile"]),
        ]);
        let report = Engine::new(&reg).invoke(&["All"]).unwrap();
        assert_eq!(report.status("Lint"), Some(TaskStatus::Failed));
        assert_eq!(report.status("Compile"), Some(TaskStatus::Succeeded));
        assert_eq!(report.status("All"), Some(TaskStatus::Skipped));
        assert!(!report.success);
    }

    #[test]
    fn test_continue_on_error_lets_dependents_run() {
        let reg = registry(vec![
            failing("Flaky").continue_on_error(true),
            Task::new("Report").depends_on(["Flaky"]).action(|_| Ok(())),
        ]);
        let report = Engine::new(&reg).invoke(&["Report"]).unwrap();

        assert_eq!(report.status("Flaky"), Some(TaskStatus::Failed));
        assert_eq!(report.status("Report"), Some(TaskStatus::Succeeded));
        assert!(report.success);
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_precondition_false_is_neutral() {
        let reg = registry(vec![
            Task::new("Sign").precondition(|_| Ok(false)).action(|_| {
                anyhow::bail!("must not run")
            }),
            Task::new("Publish").depends_on(["Sign"]).action(|_| Ok(())),
        ]);
        let report = Engine::new(&reg).invoke(&["Publish"]).unwrap();

        assert_eq!(report.status("Sign"), Some(TaskStatus::Skipped));
        assert_eq!(
            report.outcome("Sign").unwrap().skip_reason(),
            Some(&SkipReason::PreconditionFalse)
        );
        assert_eq!(report.status("Publish"), Some(TaskStatus::Succeeded));
        assert!(report.success);
    }

    #[test]
    fn test_precondition_error_fails_task() {
        let reg = registry(vec![
            Task::new("Check").precondition(|_| anyhow::bail!("cannot evaluate")),
            Task::new("After").depends_on(["Check"]),
        ]);
        let report = Engine::new(&reg).invoke(&["After"]).unwrap();

        assert!(matches!(
            report.outcome("Check").unwrap().error(),
            Some(TaskError::Precondition(_))
        ));
        assert_eq!(report.status("After"), Some(TaskStatus::Skipped));
    }

    #[test]
    fn test_store_is_shared_with_later_tasks() {
        let seen = Arc::new(Mutex::new(None));
        let observed = seen.clone();
        let reg = registry(vec![
            Task::new("Version").action(|ctx| {
                ctx.set("version", "1.4.0");
                Ok(())
            }),
            Task::new("Package").depends_on(["Version"]).action(move |ctx| {
                *observed.lock().unwrap() = Some(ctx.get("version")?.to_string());
                Ok(())
            }),
        ]);
        let report = Engine::new(&reg).invoke(&["Package"]).unwrap();

        assert!(report.success);
        assert_eq!(seen.lock().unwrap().as_deref(), Some("1.4.0"));
    }

    #[test]
    fn test_store_is_reset_between_runs() {
        let reg = registry(vec![
            Task::new("Read").action(|ctx| {
                ctx.get("marker")?;
                Ok(())
            }),
            Task::new("Write").action(|ctx| {
                ctx.set("marker", "x");
                Ok(())
            }),
        ]);
        let engine = Engine::new(&reg);
        assert!(engine.invoke(&["Write"]).unwrap().success);

        let report = engine.invoke(&["Read"]).unwrap();
        assert!(matches!(
            report.outcome("Read").unwrap().error(),
            Some(TaskError::MissingKey(_))
        ));
    }

    #[test]
    fn test_command_failures_are_classified() {
        let reg = registry(vec![Task::new("Exit").action(|ctx| {
            ctx.run_command(
                &CommandSpec::new("sh").args(["-c", "exit 4"]),
                &CommandOptions::new().retry(RetryPolicy::never()),
            )?;
            Ok(())
        })]);
        let report = Engine::new(&reg).invoke(&["Exit"]).unwrap();
        match report.outcome("Exit").unwrap().error() {
            Some(TaskError::Command(err @ CommandError::Failed { .. })) => {
                assert_eq!(err.exit_code(), Some(4));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_required_property_missing() {
        let reg = registry(vec![Task::new("Deploy").requires(["environment"])]);
        let report = Engine::new(&reg).invoke(&["Deploy"]).unwrap();
        assert!(matches!(
            report.outcome("Deploy").unwrap().error(),
            Some(TaskError::MissingProperty(p)) if p == "environment"
        ));

        let mut properties = Properties::new();
        properties.declare("environment", "staging");
        let report = Engine::new(&reg)
            .with_properties(properties)
            .invoke(&["Deploy"])
            .unwrap();
        assert!(report.success);
    }

    #[test]
    fn test_postcondition_false_fails_task() {
        let reg = registry(vec![Task::new("Build")
            .action(|_| Ok(()))
            .postcondition(|ctx| Ok(ctx.store().contains("artifact")))]);
        let report = Engine::new(&reg).invoke(&["Build"]).unwrap();
        assert!(matches!(
            report.outcome("Build").unwrap().error(),
            Some(TaskError::Postcondition)
        ));
    }

    #[test]
    fn test_teardown_runs_after_failure() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = cleaned.clone();
        let reg = registry(vec![failing("Integration").teardown(move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })]);
        let report = Engine::new(&reg).invoke(&["Integration"]).unwrap();

        assert!(cleaned.load(Ordering::SeqCst));
        assert!(matches!(
            report.outcome("Integration").unwrap().error(),
            Some(TaskError::Action(_))
        ));
    }

    #[test]
    fn test_teardown_failure_fails_successful_task() {
        let reg = registry(vec![Task::new("Db")
            .action(|_| Ok(()))
            .teardown(|_| anyhow::bail!("could not drop database"))]);
        let report = Engine::new(&reg).invoke(&["Db"]).unwrap();
        assert_eq!(report.status("Db"), Some(TaskStatus::Failed));
    }

    #[test]
    fn test_timeout_fails_slow_action() {
        let reg = registry(vec![Task::new("Slow")
            .timeout(Duration::from_millis(10))
            .action(|_| {
                std::thread::sleep(Duration::from_millis(50));
                Ok(())
            })]);
        let report = Engine::new(&reg).invoke(&["Slow"]).unwrap();
        assert!(matches!(
            report.outcome("Slow").unwrap().error(),
            Some(TaskError::TimedOut(_))
        ));
    }

    #[test]
    fn test_cancellation_skips_remaining_tasks() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let reg = registry(vec![
            Task::new("First").action(move |_| {
                trigger.cancel();
                Ok(())
            }),
            Task::new("Second").depends_on(["First"]).action(|_| Ok(())),
            Task::new("Third").depends_on(["Second"]).action(|_| Ok(())),
        ]);
        let report = Engine::new(&reg)
            .with_cancellation(token)
            .invoke(&["Third"])
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.status("First"), Some(TaskStatus::Succeeded));
        for name in ["Second", "Third"] {
            assert_eq!(
                report.outcome(name).unwrap().skip_reason(),
                Some(&SkipReason::Cancelled)
            );
        }
    }

    #[test]
    fn test_resolution_errors_abort_before_execution() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let reg = registry(vec![
            Task::new("A").depends_on(["B"]).action(move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
            Task::new("B").depends_on(["A"]),
        ]);
        let result = Engine::new(&reg).invoke(&["A"]);
        assert!(matches!(result, Err(ResolveError::CyclicDependency(_))));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_events_are_published_in_order() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let recorder = events.clone();
        let reg = registry(vec![
            failing("Build"),
            Task::new("Test").depends_on(["Build"]),
        ]);
        let report = Engine::new(&reg)
            .subscribe(move |event: &RunEvent| recorder.borrow_mut().push(event.clone()))
            .invoke(&["Test"])
            .unwrap();
        assert!(!report.success);

        let events = events.borrow();
        assert!(matches!(events[0], RunEvent::RunStarted { .. }));
        assert!(matches!(&events[1], RunEvent::TaskStarted { task, .. } if task == "Build"));
        assert!(
            matches!(&events[2], RunEvent::TaskFailed { task, tolerated: false, .. } if task == "Build")
        );
        assert!(matches!(&events[3], RunEvent::TaskSkipped { task, .. } if task == "Test"));
        assert!(matches!(
            &events[4],
            RunEvent::RunCompleted { success: false, failed, .. } if failed == &vec!["Build".to_string()]
        ));
    }

    #[test]
    fn test_nested_run_reports_back_as_value() {
        let inner = Arc::new(registry(vec![failing("Inner")]));
        let nested = inner.clone();
        let outer = registry(vec![Task::new("Outer").action(move |ctx| {
            let report = Engine::new(&nested).invoke(&["Inner"])?;
            ctx.set("nested-success", report.success.to_string());
            Ok(())
        })
        .postcondition(|ctx| Ok(ctx.get("nested-success")? == "false"))]);

        let report = Engine::new(&outer).invoke(&["Outer"]).unwrap();
        assert!(report.success);
    }
}
