//! External command execution
//!
//! This module runs out-of-process commands, captures their output and maps
//! non-zero exit codes to [`CommandError`]s, retrying according to the
//! command's [`RetryPolicy`].

use crate::error::{CommandError, CommandResult};
use crate::runner::{RetryPolicy, Sleeper, ThreadSleeper};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command as StdCommand, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often a running child is polled while a timeout is armed
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long output readers may keep draining after a timed-out child is killed
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// What to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Run a command line through an interpreter such as `["sh", "-c"]`
    pub fn shell(interpreter: &[String], line: &str) -> Self {
        let (program, rest) = match interpreter.split_first() {
            Some((program, rest)) => (program.clone(), rest.to_vec()),
            None => ("sh".to_string(), vec!["-c".to_string()]),
        };
        CommandSpec::new(program).args(rest).arg(line)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Human-readable form for logs
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// How to execute it
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Message reported in place of the generic failure text
    pub error_message: Option<String>,
    pub retry: RetryPolicy,
    /// Relative paths resolve against the runner's base directory
    pub working_dir: Option<PathBuf>,
    /// Per-attempt limit; the child is killed when it expires
    pub timeout: Option<Duration>,
    /// Forward output to the console while capturing it
    pub echo: bool,
}

impl CommandOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Shorten the timeout so it never exceeds `limit`
    pub fn capped_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(match self.timeout {
            Some(timeout) => timeout.min(limit),
            None => limit,
        });
        self
    }
}

/// Result of a successful command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Attempts needed, including the successful one
    pub attempts: u32,
}

/// Runs external commands for task actions
#[derive(Clone)]
pub struct CommandRunner {
    base_dir: PathBuf,
    env: BTreeMap<String, String>,
    sleeper: Arc<dyn Sleeper>,
    echo: bool,
}

impl std::fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRunner")
            .field("base_dir", &self.base_dir)
            .field("env", &self.env)
            .field("echo", &self.echo)
            .finish()
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner {
    /// Runner rooted at the current directory that really sleeps between retries
    pub fn new() -> Self {
        CommandRunner {
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env: BTreeMap::new(),
            sleeper: Arc::new(ThreadSleeper),
            echo: true,
        }
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Environment added to every command (e.g. from a dotenv file)
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Allow commands to echo their output; `false` silences every command
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Environment added to every command
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Execute `spec`, retrying per `options.retry`
    pub fn run(&self, spec: &CommandSpec, options: &CommandOptions) -> CommandResult<CommandOutput> {
        let total = options.retry.total_attempts();
        let mut delays = options.retry.delays();
        let mut attempt = 1;

        loop {
            debug!(command = %spec.display(), attempt, total, "running command");
            let result = self.attempt(spec, options)?;

            match result {
                Attempt::Exited {
                    status,
                    stdout,
                    stderr,
                } if status.success() => {
                    return Ok(CommandOutput {
                        stdout,
                        stderr,
                        attempts: attempt,
                    });
                }
                Attempt::Exited {
                    status,
                    stdout,
                    stderr,
                } => {
                    if !options.retry.should_retry(attempt, &stdout, &stderr) {
                        return Err(CommandError::Failed {
                            exit_code: status.code(),
                            stdout,
                            stderr,
                            attempts: attempt,
                            message: options.error_message.clone(),
                        });
                    }
                    warn!(
                        command = %spec.display(),
                        attempt,
                        exit_code = ?status.code(),
                        "command failed, retrying"
                    );
                }
                Attempt::TimedOut {
                    timeout,
                    stdout,
                    stderr,
                } => {
                    if !options.retry.should_retry(attempt, &stdout, &stderr) {
                        return Err(CommandError::TimedOut {
                            program: spec.program.clone(),
                            timeout,
                            stdout,
                            stderr,
                            attempts: attempt,
                        });
                    }
                    warn!(command = %spec.display(), attempt, "command timed out, retrying");
                }
            }

            if let Some(delay) = delays.next() {
                debug!(delay_ms = delay.as_millis() as u64, "waiting before retry");
                self.sleeper.sleep(delay);
            }
            attempt += 1;
        }
    }

    /// Run once and report whether it exited successfully, discarding output
    pub fn check(&self, spec: &CommandSpec) -> CommandResult<bool> {
        let mut command = self.build(spec, None);
        command.stdin(Stdio::null());
        command.stdout(Stdio::null());
        command.stderr(Stdio::null());
        let status = command.status().map_err(|source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        Ok(status.success())
    }

    fn build(&self, spec: &CommandSpec, working_dir: Option<&Path>) -> StdCommand {
        let mut command = StdCommand::new(&spec.program);
        command.args(&spec.args);
        command.current_dir(match working_dir {
            Some(dir) => self.base_dir.join(dir),
            None => self.base_dir.clone(),
        });
        for (key, value) in self.env.iter().chain(spec.env.iter()) {
            command.env(key, value);
        }
        command
    }

    fn attempt(&self, spec: &CommandSpec, options: &CommandOptions) -> CommandResult<Attempt> {
        let mut command = self.build(spec, options.working_dir.as_deref());
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        if options.timeout.is_some() {
            own_process_group(&mut command);
        }

        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let echo = options.echo && self.echo;
        let stdout = child
            .stdout
            .take()
            .map(|pipe| Capture::start(pipe, echo.then(|| Box::new(io::stdout()) as Sink)));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| Capture::start(pipe, echo.then(|| Box::new(io::stderr()) as Sink)));

        let waited = wait(&mut child, options.timeout).map_err(|source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        // Processes left behind by a killed child may still hold the pipes
        let grace = waited.is_none().then_some(DRAIN_GRACE);
        let stdout = stdout.map(|c| c.finish(grace)).unwrap_or_default();
        let stderr = stderr.map(|c| c.finish(grace)).unwrap_or_default();

        Ok(match waited {
            Some(status) => Attempt::Exited {
                status,
                stdout,
                stderr,
            },
            None => Attempt::TimedOut {
                timeout: options.timeout.unwrap_or_default(),
                stdout,
                stderr,
            },
        })
    }
}

enum Attempt {
    Exited {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    TimedOut {
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
}

type Sink = Box<dyn Write + Send>;

/// Output of one pipe, drained on its own thread so a chatty child never
/// blocks on a full pipe
struct Capture {
    captured: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<()>,
}

impl Capture {
    fn start<R: Read + Send + 'static>(mut pipe: R, mut echo: Option<Sink>) -> Self {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let buffer = captured.clone();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut captured) = buffer.lock() {
                            captured.extend_from_slice(&buf[..n]);
                        }
                        if let Some(out) = echo.as_mut() {
                            let _ = out.write_all(&buf[..n]);
                            let _ = out.flush();
                        }
                    }
                }
            }
        });
        Capture { captured, reader }
    }

    /// Wait for the pipe to close, or at most `grace`, and return what was read
    fn finish(self, grace: Option<Duration>) -> String {
        match grace {
            None => {
                let _ = self.reader.join();
            }
            Some(grace) => {
                let deadline = Instant::now() + grace;
                while !self.reader.is_finished() && Instant::now() < deadline {
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
        let captured = self
            .captured
            .lock()
            .map(|bytes| bytes.clone())
            .unwrap_or_default();
        String::from_utf8_lossy(&captured).into_owned()
    }
}

/// Start the child as the leader of a new process group so a timeout can
/// stop everything it spawned
#[cfg(unix)]
fn own_process_group(command: &mut StdCommand) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut StdCommand) {}

/// Kill the child and, on unix, every process in its group
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let _ = StdCommand::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    let _ = child.kill();
}

/// Wait for the child, killing it if the timeout expires first.
///
/// Returns `None` when the child was killed.
fn wait(child: &mut Child, timeout: Option<Duration>) -> io::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            kill_tree(child);
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
