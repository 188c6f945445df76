//! Variable interpolation for strings
//!
//! Replaces `${name}` references with values from a [`Vars`] table (see
//! [`crate::runner::TaskContext::vars`]); names not found there fall back to
//! the process environment.

use crate::error::{InterpolationError, InterpolationResult};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::env;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("interpolation pattern is valid"))
}

/// Variables visible to interpolation.
///
/// Values added with [`Vars::define`] may reference other variables and are
/// expanded in turn. Values added with [`Vars::literal`] (command output,
/// environment) are substituted verbatim, even if they contain `${...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vars {
    values: HashMap<String, String>,
    literal: HashSet<String>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value that may itself contain references
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.literal.remove(&name);
        self.values.insert(name, value.into());
    }

    /// Add a value that is substituted as-is
    pub fn literal(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.literal.insert(name.clone());
        self.values.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn lookup(&self, name: &str) -> Option<Lookup> {
        match self.values.get(name) {
            Some(value) if self.literal.contains(name) => Some(Lookup::Literal(value.clone())),
            Some(value) => Some(Lookup::Template(value.clone())),
            None => env::var(name).ok().map(Lookup::Literal),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Vars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = Vars::new();
        for (name, value) in iter {
            vars.define(name, value);
        }
        vars
    }
}

enum Lookup {
    Literal(String),
    Template(String),
}

/// Interpolate variables in a string
///
/// Supports:
/// - `${var}` - variable from the task's view (store, properties, dotenv)
/// - Environment variables (when not found in the variables)
///
/// Unknown names are left in place.
pub fn interpolate(s: &str, vars: &Vars) -> InterpolationResult<String> {
    expand(s, vars, &mut Vec::new(), false)
}

/// Interpolate, failing on the first name that cannot be resolved
pub fn interpolate_strict(s: &str, vars: &Vars) -> InterpolationResult<String> {
    expand(s, vars, &mut Vec::new(), true)
}

/// Strictly interpolate every value of a map
pub fn interpolate_map<'a, I>(map: I, vars: &Vars) -> InterpolationResult<Vec<(String, String)>>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    map.into_iter()
        .map(|(key, value)| Ok((key.clone(), interpolate_strict(value, vars)?)))
        .collect()
}

/// Single left-to-right pass; `active` holds the names being expanded
fn expand(
    s: &str,
    vars: &Vars,
    active: &mut Vec<String>,
    strict: bool,
) -> InterpolationResult<String> {
    let mut result = String::with_capacity(s.len());
    let mut last = 0;

    for caps in pattern().captures_iter(s) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        result.push_str(&s[last..whole.start()]);
        last = whole.end();

        let name = name.as_str();
        if active.iter().any(|n| n == name) {
            return Err(InterpolationError::RecursiveInterpolation);
        }
        match vars.lookup(name) {
            Some(Lookup::Literal(value)) => result.push_str(&value),
            Some(Lookup::Template(value)) => {
                active.push(name.to_string());
                result.push_str(&expand(&value, vars, active, strict)?);
                active.pop();
            }
            None if strict => {
                return Err(InterpolationError::UndefinedVariable(name.to_string()))
            }
            None => result.push_str(whole.as_str()),
        }
    }

    result.push_str(&s[last..]);
    Ok(result)
}
