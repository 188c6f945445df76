//! Build script discovery and parsing

use crate::config::types::BuildScript;
use crate::error::{ConfigError, ConfigResult, RsakeError};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Build script names searched for, in order
const SCRIPT_FILE_NAMES: &[&str] = &["rsake.yml", "rsake.yaml"];

/// Find the build script by searching the current and parent directories
pub fn find_build_script() -> ConfigResult<PathBuf> {
    find_build_script_from(env::current_dir().map_err(|e| {
        ConfigError::Invalid(format!("Failed to get current directory: {}", e))
    })?)
}

/// Find the build script starting from a specific directory
pub fn find_build_script_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in SCRIPT_FILE_NAMES {
            let script_path = current_dir.join(file_name);
            searched_paths.push(script_path.display().to_string());

            if script_path.is_file() {
                return Ok(script_path);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Read and parse a build script, merging its includes
pub fn parse_build_script_file(path: &Path) -> Result<BuildScript, RsakeError> {
    let contents = fs::read_to_string(path).map_err(|e| {
        ConfigError::Invalid(format!("Failed to read '{}': {}", path.display(), e))
    })?;

    parse_build_script(&contents, Some(path))
}

/// Parse a build script from a string
///
/// Includes are only expanded when the script's path is known.
pub fn parse_build_script(yaml: &str, script_path: Option<&Path>) -> Result<BuildScript, RsakeError> {
    let mut script: BuildScript = serde_yaml::from_str(yaml)?;

    if let Some(path) = script_path {
        process_includes(&mut script, path)?;
    }

    Ok(script)
}

/// Merge the tasks and properties of every file matched by `include`.
///
/// The including script's properties win over included ones; a task name
/// declared twice is an error.
fn process_includes(script: &mut BuildScript, script_path: &Path) -> ConfigResult<()> {
    let base_dir = script_dir(script_path);

    for pattern in std::mem::take(&mut script.include) {
        let full_pattern = base_dir.join(&pattern);
        let entries = glob::glob(&full_pattern.to_string_lossy()).map_err(|e| {
            ConfigError::IncludeFile {
                path: full_pattern.clone(),
                error: e.to_string(),
            }
        })?;

        let mut paths: Vec<PathBuf> = entries
            .collect::<Result<_, _>>()
            .map_err(|e| ConfigError::IncludeFile {
                path: full_pattern.clone(),
                error: e.to_string(),
            })?;
        paths.sort();

        for path in paths {
            debug!(include = %path.display(), "including build script");
            let included = load_included_script(&path)?;

            for (key, value) in included.properties {
                script.properties.entry(key).or_insert(value);
            }
            for (name, task) in included.tasks {
                if script.tasks.contains_key(&name) {
                    return Err(ConfigError::IncludeFile {
                        path,
                        error: format!("task '{}' is already defined", name),
                    });
                }
                script.tasks.insert(name, task);
            }
        }
    }

    Ok(())
}

/// Load an included script; its own includes are not followed
fn load_included_script(path: &Path) -> ConfigResult<BuildScript> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::IncludeFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    serde_yaml::from_str(&contents).map_err(|e| ConfigError::IncludeFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Variables from the script's `dotenv` file, if it names one
pub fn load_dotenv(script: &BuildScript, base_dir: &Path) -> ConfigResult<BTreeMap<String, String>> {
    let Some(file) = &script.dotenv else {
        return Ok(BTreeMap::new());
    };

    let path = base_dir.join(file);
    let env_error = |e: dotenvy::Error| ConfigError::EnvFile {
        path: path.clone(),
        error: e.to_string(),
    };

    dotenvy::from_path_iter(&path)
        .map_err(env_error)?
        .map(|item| item.map_err(env_error))
        .collect()
}

/// Directory commands and relative paths of a script are resolved against
pub fn script_dir(script_path: &Path) -> PathBuf {
    match script_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Parse the build script found by searching upward from the current directory
pub fn parse_build_script_auto() -> Result<(BuildScript, PathBuf), RsakeError> {
    let script_path = find_build_script()?;
    let script = parse_build_script_file(&script_path)?;
    Ok((script, script_path))
}
