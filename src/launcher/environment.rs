//! Conda environment activation for the agent's main routine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::LaunchError;

/// Where the agent's routine runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEnvironment {
    /// Inherit the host environment unchanged.
    Host,
    /// A named conda environment rooted at `prefix`.
    Conda { name: String, prefix: PathBuf },
}

impl ExecutionEnvironment {
    /// Resolves `name` under `conda_root`. `None` means the host environment.
    ///
    /// `base` maps to the conda root itself; any other name must exist as
    /// `<conda_root>/envs/<name>` with a `bin` directory.
    pub fn activate(name: Option<&str>, conda_root: &Path) -> Result<Self, LaunchError> {
        let name = match name {
            Some(name) if !name.trim().is_empty() => name.trim(),
            _ => return Ok(ExecutionEnvironment::Host),
        };

        let prefix = if name == "base" {
            conda_root.to_path_buf()
        } else {
            conda_root.join("envs").join(name)
        };

        if !prefix.join("bin").is_dir() {
            return Err(LaunchError::EnvironmentActivationFailed {
                name: name.to_string(),
                reason: format!("no environment at {}", prefix.display()),
            });
        }

        info!("Activated conda environment '{}' at {}", name, prefix.display());
        Ok(ExecutionEnvironment::Conda {
            name: name.to_string(),
            prefix,
        })
    }

    /// Variables to overlay on the child's environment. `current_path` is the
    /// caller's `PATH`, prepended with the environment's `bin`.
    pub fn env_overrides(&self, current_path: Option<&str>) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let ExecutionEnvironment::Conda { name, prefix } = self {
            let bin = prefix.join("bin").display().to_string();
            let path = match current_path {
                Some(rest) if !rest.is_empty() => format!("{}:{}", bin, rest),
                _ => bin,
            };
            env.insert("PATH".to_string(), path);
            env.insert("CONDA_DEFAULT_ENV".to_string(), name.clone());
            env.insert("CONDA_PREFIX".to_string(), prefix.display().to_string());
        }
        env
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ExecutionEnvironment::Host => None,
            ExecutionEnvironment::Conda { name, .. } => Some(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_no_environment_is_host() {
        let root = TempDir::new().unwrap();
        assert_eq!(
            ExecutionEnvironment::activate(None, root.path()).unwrap(),
            ExecutionEnvironment::Host
        );
        assert_eq!(
            ExecutionEnvironment::activate(Some("  "), root.path()).unwrap(),
            ExecutionEnvironment::Host
        );
    }

    #[test]
    fn test_activate_named_environment() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("envs/agent/bin")).unwrap();

        let env = ExecutionEnvironment::activate(Some("agent"), root.path()).unwrap();
        assert_eq!(env.name(), Some("agent"));

        let overrides = env.env_overrides(Some("/usr/bin"));
        let bin = root.path().join("envs/agent/bin").display().to_string();
        assert_eq!(overrides["PATH"], format!("{}:/usr/bin", bin));
        assert_eq!(overrides["CONDA_DEFAULT_ENV"], "agent");
    }

    #[test]
    fn test_base_maps_to_root() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("bin")).unwrap();

        match ExecutionEnvironment::activate(Some("base"), root.path()).unwrap() {
            ExecutionEnvironment::Conda { prefix, .. } => assert_eq!(prefix, root.path()),
            other => panic!("unexpected environment: {:?}", other),
        }
    }

    #[test]
    fn test_missing_environment_fails() {
        let root = TempDir::new().unwrap();
        let err = ExecutionEnvironment::activate(Some("agent"), root.path()).unwrap_err();
        assert!(matches!(
            err,
            LaunchError::EnvironmentActivationFailed { ref name, .. } if name == "agent"
        ));
    }

    #[test]
    fn test_host_has_no_overrides() {
        assert!(ExecutionEnvironment::Host.env_overrides(Some("/usr/bin")).is_empty());
    }
}
