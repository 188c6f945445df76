//! Diagnostic logging with `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `RSAKE_LOG` environment variable (e.g. "info", "debug")
//! 3. `log-level` from the user settings file
//! 4. default to `warn`
//!
//! Logs go to stderr so they never mix with command output on stdout.

use tracing::Level;
use tracing_subscriber::fmt;

/// Environment variable consulted when no level is given on the command line
pub const LOG_ENV_VAR: &str = "RSAKE_LOG";

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(cli_level: Option<&str>, settings_level: Option<&str>) {
    let level = resolve_level(
        cli_level,
        std::env::var(LOG_ENV_VAR).ok().as_deref(),
        settings_level,
    );

    let _ = fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Pick the first source that names a valid level
pub fn resolve_level(cli: Option<&str>, env: Option<&str>, settings: Option<&str>) -> Level {
    [cli, env, settings]
        .into_iter()
        .flatten()
        .find_map(parse_level_str)
        .unwrap_or(Level::WARN)
}

pub fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
