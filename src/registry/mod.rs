//! Agent registry module.
//!
//! This module provides functionality for:
//! - Discovering agent directories under an agents root
//! - Validating that each agent carries its required files
//! - Resolving an agent descriptor by id

pub mod descriptor;
pub mod secrets;

pub use descriptor::{
    missing_files, AgentDescriptor, ArtifactSpec, GpuRequirement, InstructionSpec, KwargsStyle,
    RequiredFile,
};
pub use secrets::{is_reference, layered_lookup, read_env_file, referenced_var, resolve_references, ENV_FILE};

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::RegistryError;

/// A problem found while loading one agent directory.
///
/// Issues exclude the affected agent but never stop other agents from loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// A required file is absent.
    MissingFile {
        agent_dir: PathBuf,
        file: RequiredFile,
    },
    /// `config.yaml` exists but could not be parsed or is inconsistent.
    InvalidConfig { agent_dir: PathBuf, message: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingFile { agent_dir, file } => {
                write!(f, "{}: missing {}", agent_dir.display(), file)
            }
            ValidationIssue::InvalidConfig { agent_dir, message } => {
                write!(f, "{}: invalid config: {}", agent_dir.display(), message)
            }
        }
    }
}

/// Registry of validated agents, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    /// Directory the agents were discovered in.
    agents_dir: PathBuf,
    /// Validated descriptors.
    agents: BTreeMap<String, AgentDescriptor>,
    /// Problems found during loading.
    issues: Vec<ValidationIssue>,
}

impl AgentRegistry {
    /// Loads every agent directory directly under `agents_dir`.
    ///
    /// Directories are visited in name order. Hidden directories are skipped.
    ///
    /// # Errors
    ///
    /// Only a missing or unreadable agents root is an error; per-agent problems
    /// are collected in [`AgentRegistry::issues`].
    pub fn load(agents_dir: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let agents_dir = agents_dir.into();
        if !agents_dir.is_dir() {
            return Err(RegistryError::AgentsDirMissing(agents_dir));
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(&agents_dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter(|path| {
                !path
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with('.'))
                    .unwrap_or(true)
            })
            .collect();
        dirs.sort();

        let mut registry = Self {
            agents_dir,
            agents: BTreeMap::new(),
            issues: Vec::new(),
        };

        for dir in dirs {
            registry.load_one(&dir);
        }

        debug!(
            agents = registry.agents.len(),
            issues = registry.issues.len(),
            "Loaded agent registry from {}",
            registry.agents_dir.display()
        );

        Ok(registry)
    }

    fn load_one(&mut self, dir: &Path) {
        let missing = missing_files(dir);
        if !missing.is_empty() {
            for file in missing {
                warn!("Excluding agent {}: missing {}", dir.display(), file);
                self.issues.push(ValidationIssue::MissingFile {
                    agent_dir: dir.to_path_buf(),
                    file,
                });
            }
            return;
        }

        match AgentDescriptor::load(dir) {
            // Ids equal directory names, so they are unique here.
            Ok(descriptor) => {
                self.agents.insert(descriptor.id.clone(), descriptor);
            }
            Err(e) => {
                warn!("Excluding agent {}: {}", dir.display(), e);
                self.issues.push(ValidationIssue::InvalidConfig {
                    agent_dir: dir.to_path_buf(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Resolves an agent by id.
    pub fn get(&self, id: &str) -> Result<&AgentDescriptor, RegistryError> {
        self.agents
            .get(id)
            .ok_or_else(|| RegistryError::AgentNotFound(id.to_string()))
    }

    /// Returns true if `id` is a validated agent.
    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// Returns all validated agents in id order.
    pub fn agents(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents.values()
    }

    /// Returns the ids of all validated agents.
    pub fn ids(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    /// Returns the problems found while loading.
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Returns the number of validated agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Returns true if no agent validated.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Directory the registry was loaded from.
    pub fn agents_dir(&self) -> &Path {
        &self.agents_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_agent(root: &Path, id: &str, files: &[RequiredFile]) {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        for file in files {
            fs::write(dir.join(file.file_name()), "").unwrap();
        }
    }

    #[test]
    fn test_load_and_get() {
        let temp = TempDir::new().unwrap();
        write_agent(temp.path(), "aide", &RequiredFile::ALL);
        write_agent(temp.path(), "dummy", &RequiredFile::ALL);

        let registry = AgentRegistry::load(temp.path()).unwrap();
        assert_eq!(registry.ids(), vec!["aide", "dummy"]);
        assert!(registry.issues().is_empty());
        assert_eq!(registry.get("aide").unwrap().id, "aide");
    }

    #[test]
    fn test_get_unknown_agent() {
        let temp = TempDir::new().unwrap();
        write_agent(temp.path(), "aide", &RequiredFile::ALL);

        let registry = AgentRegistry::load(temp.path()).unwrap();
        for id in ["", "AIDE", "ghost", "aide/"] {
            let err = registry.get(id).unwrap_err();
            assert!(matches!(err, RegistryError::AgentNotFound(ref got) if got == id));
        }
    }

    #[test]
    fn test_each_missing_file_is_reported_exactly() {
        for missing in RequiredFile::ALL {
            let temp = TempDir::new().unwrap();
            let present: Vec<RequiredFile> = RequiredFile::ALL
                .into_iter()
                .filter(|f| *f != missing)
                .collect();
            write_agent(temp.path(), "partial", &present);
            write_agent(temp.path(), "complete", &RequiredFile::ALL);

            let registry = AgentRegistry::load(temp.path()).unwrap();
            assert_eq!(
                registry.issues(),
                &[ValidationIssue::MissingFile {
                    agent_dir: temp.path().join("partial"),
                    file: missing,
                }]
            );
            assert!(!registry.contains("partial"));
            assert!(registry.contains("complete"));
        }
    }

    #[test]
    fn test_invalid_config_is_excluded() {
        let temp = TempDir::new().unwrap();
        write_agent(temp.path(), "broken", &RequiredFile::ALL);
        fs::write(temp.path().join("broken").join("config.yaml"), "gpu: sometimes\n").unwrap();

        let registry = AgentRegistry::load(temp.path()).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.issues()[0],
            ValidationIssue::InvalidConfig { .. }
        ));
    }

    #[test]
    fn test_hidden_dirs_and_files_are_skipped() {
        let temp = TempDir::new().unwrap();
        write_agent(temp.path(), ".cache", &[]);
        fs::write(temp.path().join("README.md"), "agents").unwrap();
        write_agent(temp.path(), "aide", &RequiredFile::ALL);

        let registry = AgentRegistry::load(temp.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.issues().is_empty());
    }

    #[test]
    fn test_missing_agents_dir() {
        let temp = TempDir::new().unwrap();
        let err = AgentRegistry::load(temp.path().join("nope")).unwrap_err();
        assert!(matches!(err, RegistryError::AgentsDirMissing(_)));
    }
}
