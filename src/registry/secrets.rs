//! Resolution of `${{ secrets.NAME }}` and `${{ env.NAME }}` references.
//!
//! Agent configs never carry credentials directly. Values that reference an
//! environment variable are resolved at launch time against an explicit
//! variable source, so loading a registry never depends on the caller's
//! environment.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::RegistryError;

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\$\{\{\s*(?:secrets|env)\.(\w+)\s*\}\}").expect("static regex is valid")
    })
}

/// Returns the variable name referenced by `value`, if it is a reference.
pub fn referenced_var(value: &str) -> Option<&str> {
    reference_pattern()
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Returns true if `value` references an environment variable.
pub fn is_reference(value: &str) -> bool {
    referenced_var(value).is_some()
}

/// Replaces every referencing value in `values` with the variable's value.
///
/// `lookup` is the variable source, typically `|name| std::env::var(name).ok()`
/// at the CLI boundary. Plain values pass through unchanged.
///
/// # Errors
///
/// Returns `RegistryError::MissingEnvVar` naming the first variable that
/// `lookup` cannot provide.
pub fn resolve_references<F>(
    values: &BTreeMap<String, String>,
    lookup: F,
) -> Result<BTreeMap<String, String>, RegistryError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut resolved = BTreeMap::new();
    for (key, value) in values {
        let value = match referenced_var(value) {
            Some(var) => lookup(var).ok_or_else(|| RegistryError::MissingEnvVar(var.to_string()))?,
            None => value.clone(),
        };
        resolved.insert(key.clone(), value);
    }
    Ok(resolved)
}

/// Name of the project-level dotenv file holding local credentials.
pub const ENV_FILE: &str = ".env";

/// Reads `path` as a dotenv file. A missing file yields no values; a
/// malformed one is logged and skipped.
pub fn read_env_file(path: &Path) -> BTreeMap<String, String> {
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) => {
            debug!("No env file at {}: {}", path.display(), e);
            return BTreeMap::new();
        }
    };
    let mut values = BTreeMap::new();
    for item in iter {
        match item {
            Ok((key, value)) => {
                values.insert(key, value);
            }
            Err(e) => {
                warn!("Ignoring rest of {}: {}", path.display(), e);
                break;
            }
        }
    }
    debug!("Loaded {} variable(s) from {}", values.len(), path.display());
    values
}

/// Looks `name` up in `primary` first and falls back to `file_values`.
pub fn layered_lookup<'a, F>(
    primary: F,
    file_values: &'a BTreeMap<String, String>,
) -> impl Fn(&str) -> Option<String> + 'a
where
    F: Fn(&str) -> Option<String> + 'a,
{
    move |name| primary(name).or_else(|| file_values.get(name).cloned())
}
