//! Repository layout the harness builds from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default tag of the shared base image.
pub const BASE_IMAGE: &str = "biomlbench-env";

/// Where agents and the base environment live in a harness checkout.
///
/// ```text
/// <repo_root>/
/// ├── agents/<id>/{Dockerfile,config.yaml,start.sh}
/// └── environment/Dockerfile
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessLayout {
    /// Repository root; the base image's build context.
    pub repo_root: PathBuf,
    /// Directory holding one subdirectory per agent.
    pub agents_dir: PathBuf,
    /// Dockerfile of the base image.
    pub base_dockerfile: PathBuf,
    /// Tag of the base image.
    pub base_image: String,
}

impl HarnessLayout {
    /// Creates the conventional layout rooted at `repo_root`.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        Self {
            agents_dir: repo_root.join("agents"),
            base_dockerfile: repo_root.join("environment").join("Dockerfile"),
            base_image: BASE_IMAGE.to_string(),
            repo_root,
        }
    }

    /// Overrides the agents directory.
    pub fn with_agents_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.agents_dir = dir.into();
        self
    }

    /// Overrides the base image tag.
    pub fn with_base_image(mut self, image: impl Into<String>) -> Self {
        self.base_image = image.into();
        self
    }

    /// Directory of the agent `id`.
    pub fn agent_dir(&self, id: &str) -> PathBuf {
        self.agents_dir.join(id)
    }

    /// Repository root.
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}

impl Default for HarnessLayout {
    fn default() -> Self {
        Self::new(".")
    }
}
