//! Main CLI application

use crate::config::{find_build_script, Settings};
use crate::error::RsakeError;
use crate::logging::init_logging;
use crate::runner::{parse_override, Build, CommandRunner, Properties, DEFAULT_TASK};
use crate::ui::{format_docs, ConsoleReporter, Verbosity};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Process exit code of a successful build
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code when at least one task failed
pub const EXIT_BUILD_FAILED: i32 = 1;
/// Process exit code for build script, resolution or usage errors
pub const EXIT_USAGE: i32 = 2;

/// Build the clap command
pub fn build_command() -> Command {
    Command::new("rsake")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A task-based build orchestrator")
        .arg(
            Arg::new("tasks")
                .value_name("TASK")
                .help("Tasks to run (default: Default)")
                .num_args(0..),
        )
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Path to the build script (default: search for rsake.yml)"),
        )
        .arg(
            Arg::new("property")
                .short('p')
                .long("property")
                .value_name("KEY=VALUE")
                .help("Override a build property")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("docs")
                .short('d')
                .long("docs")
                .help("List the tasks of the build script instead of running them")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("nologo")
                .long("nologo")
                .help("Do not print the banner")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print command output and errors")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .help("Print no output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print verbose output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .help("Diagnostic log level (default: $RSAKE_LOG or warn)"),
        )
        .arg(
            Arg::new("completions")
                .long("completions")
                .value_name("SHELL")
                .value_parser(value_parser!(Shell))
                .help("Print a shell completion script"),
        )
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("silent") {
        Verbosity::Silent
    } else if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

/// Collect `-p KEY=VALUE` overrides
fn get_overrides(matches: &ArgMatches) -> Result<Properties, RsakeError> {
    let mut properties = Properties::new();
    for raw in matches.get_many::<String>("property").into_iter().flatten() {
        let (key, value) = parse_override(raw)?;
        properties.set_override(key, value);
    }
    Ok(properties)
}

/// Requested targets, or the default task
fn get_targets(matches: &ArgMatches) -> Vec<String> {
    let targets: Vec<String> = matches
        .get_many::<String>("tasks")
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    if targets.is_empty() {
        vec![DEFAULT_TASK.to_string()]
    } else {
        targets
    }
}

/// Run the CLI with the process arguments.
///
/// Returns whether the build succeeded; errors are problems with the build
/// script, the requested targets or the arguments.
pub fn run() -> Result<bool, RsakeError> {
    run_from(std::env::args_os())
}

/// Run the CLI with explicit arguments (the first one is the program name)
pub fn run_from<I, T>(args: I) -> Result<bool, RsakeError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_command().get_matches_from(args);

    if let Some(shell) = matches.get_one::<Shell>("completions").copied() {
        let mut command = build_command();
        clap_complete::generate(shell, &mut command, "rsake", &mut io::stdout());
        return Ok(true);
    }

    let (settings, settings_error) = match Settings::load() {
        Ok(settings) => (settings, None),
        Err(e) => (Settings::default(), Some(e)),
    };
    init_logging(
        matches.get_one::<String>("log-level").map(String::as_str),
        settings.log_level.as_deref(),
    );
    if let Some(e) = settings_error {
        warn!(error = %e, "ignoring user settings");
    }

    let verbosity = get_verbosity(&matches);
    let reporter = ConsoleReporter::new(verbosity, settings);
    if !matches.get_flag("nologo") {
        reporter.print_logo();
    }

    let overrides = get_overrides(&matches)?;
    let path = match matches.get_one::<PathBuf>("file") {
        Some(path) => path.clone(),
        None => find_build_script()?,
    };
    debug!(script = %path.display(), "loading build script");

    let build = Build::load(&path, overrides)?
        .with_runner(CommandRunner::new().with_echo(verbosity != Verbosity::Silent));

    if matches.get_flag("docs") {
        print!("{}", format_docs(&build.registry));
        return Ok(true);
    }

    let targets = get_targets(&matches);
    let report = build
        .engine()
        .subscribe(reporter.clone())
        .invoke(&targets)?;
    reporter.print_summary(&report);

    Ok(report.success)
}
