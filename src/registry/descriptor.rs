//! Agent descriptors: the static metadata of one agent directory.
//!
//! An agent directory looks like:
//!
//! ```text
//! agents/aide/
//! ├── Dockerfile      build instructions
//! ├── config.yaml     identity, env vars, kwargs, artifact locations
//! └── start.sh        launch entrypoint
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::query::QueryStrategy;

use super::secrets::resolve_references;

/// Name of the build-instruction file inside an agent directory.
pub const BUILD_FILE: &str = "Dockerfile";
/// Name of the configuration file inside an agent directory.
pub const CONFIG_FILE: &str = "config.yaml";
/// Name of the launch entrypoint inside an agent directory.
pub const ENTRYPOINT_FILE: &str = "start.sh";

/// A file every agent directory must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredFile {
    BuildFile,
    Config,
    Entrypoint,
}

impl RequiredFile {
    /// All required files, in the order they are checked.
    pub const ALL: [RequiredFile; 3] = [
        RequiredFile::BuildFile,
        RequiredFile::Config,
        RequiredFile::Entrypoint,
    ];

    /// File name of this required file.
    pub fn file_name(&self) -> &'static str {
        match self {
            RequiredFile::BuildFile => BUILD_FILE,
            RequiredFile::Config => CONFIG_FILE,
            RequiredFile::Entrypoint => ENTRYPOINT_FILE,
        }
    }
}

impl fmt::Display for RequiredFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Returns the required files missing from `dir`, in check order.
pub fn missing_files(dir: &Path) -> Vec<RequiredFile> {
    RequiredFile::ALL
        .into_iter()
        .filter(|file| !dir.join(file.file_name()).is_file())
        .collect()
}

/// Whether an agent needs an accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuRequirement {
    Required,
    #[default]
    Optional,
    None,
}

impl fmt::Display for GpuRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            GpuRequirement::Required => "required",
            GpuRequirement::Optional => "optional",
            GpuRequirement::None => "none",
        })
    }
}

/// How kwargs are rendered onto the entrypoint's command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KwargsStyle {
    /// `--key value`
    #[default]
    Argparse,
    /// `key=value`
    Omegaconf,
}

/// Where an agent leaves its artifacts, relative to its agent directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Directory holding the agent's own logs.
    #[serde(default = "default_logs_dir")]
    pub logs: PathBuf,
    /// File name pattern of the best solution; `*` matches any run of characters.
    #[serde(default = "default_best_solution")]
    pub best_solution: String,
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_best_solution() -> String {
    "best_solution.py".to_string()
}

impl Default for ArtifactSpec {
    fn default() -> Self {
        Self {
            logs: default_logs_dir(),
            best_solution: default_best_solution(),
        }
    }
}

/// Options controlling how the full instruction text is assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionSpec {
    /// Agent-specific notes, relative to the agent directory. Optional on disk.
    #[serde(default = "default_notes")]
    pub notes: PathBuf,
    /// Strip the `/home/` prefix from paths in the general instructions.
    #[serde(default)]
    pub strip_home_prefix: bool,
}

fn default_notes() -> PathBuf {
    PathBuf::from("additional_notes.txt")
}

impl Default for InstructionSpec {
    fn default() -> Self {
        Self {
            notes: default_notes(),
            strip_home_prefix: false,
        }
    }
}

/// On-disk shape of `config.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
struct AgentConfigFile {
    id: Option<String>,
    image: Option<String>,
    #[serde(default)]
    gpu: GpuRequirement,
    environment: Option<String>,
    #[serde(default)]
    env_vars: BTreeMap<String, String>,
    #[serde(default)]
    kwargs: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    kwargs_type: KwargsStyle,
    #[serde(default)]
    artifacts: ArtifactSpec,
    #[serde(default)]
    instructions: InstructionSpec,
    #[serde(default)]
    query_strategy: QueryStrategy,
}

/// Immutable metadata for one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDescriptor {
    /// Unique agent id (the directory name).
    pub id: String,
    /// Agent directory on the host.
    pub dir: PathBuf,
    /// Path to the build-instruction file.
    pub dockerfile: PathBuf,
    /// Path to the configuration file.
    pub config_path: PathBuf,
    /// Path to the launch entrypoint.
    pub entrypoint: PathBuf,
    /// Image name the agent is built as.
    pub image: String,
    pub gpu: GpuRequirement,
    /// Conda environment the entrypoint runs in, if any.
    pub environment: Option<String>,
    /// Pass-through environment; values may be `${{ secrets.NAME }}` references.
    pub env_vars: BTreeMap<String, String>,
    /// Extra entrypoint arguments, rendered per `kwargs_style`.
    pub kwargs: BTreeMap<String, String>,
    pub kwargs_style: KwargsStyle,
    pub artifacts: ArtifactSpec,
    pub instructions: InstructionSpec,
    pub query_strategy: QueryStrategy,
}

impl AgentDescriptor {
    /// Loads the descriptor of the agent in `dir`.
    ///
    /// The caller is expected to have checked [`missing_files`] first; a
    /// missing config is reported as an invalid config here.
    pub fn load(dir: &Path) -> Result<Self, RegistryError> {
        let dir_id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| RegistryError::InvalidConfig {
                path: dir.to_path_buf(),
                message: "agent directory has no name".to_string(),
            })?;

        let config_path = dir.join(CONFIG_FILE);
        let contents = fs::read_to_string(&config_path).map_err(|e| RegistryError::InvalidConfig {
            path: config_path.clone(),
            message: e.to_string(),
        })?;

        // An empty config file is valid and means "all defaults".
        let config: AgentConfigFile = if contents.trim().is_empty() {
            AgentConfigFile::default()
        } else {
            serde_yaml::from_str(&contents).map_err(|e| RegistryError::InvalidConfig {
                path: config_path.clone(),
                message: e.to_string(),
            })?
        };

        if let Some(ref declared) = config.id {
            if declared != &dir_id {
                return Err(RegistryError::InvalidConfig {
                    path: config_path,
                    message: format!(
                        "declared id '{}' does not match directory name '{}'",
                        declared, dir_id
                    ),
                });
            }
        }

        let kwargs = config
            .kwargs
            .into_iter()
            .map(|(key, value)| (key, yaml_scalar_to_string(&value)))
            .collect();

        Ok(Self {
            image: config.image.unwrap_or_else(|| dir_id.clone()),
            id: dir_id,
            dir: dir.to_path_buf(),
            dockerfile: dir.join(BUILD_FILE),
            config_path,
            entrypoint: dir.join(ENTRYPOINT_FILE),
            gpu: config.gpu,
            environment: config.environment,
            env_vars: config.env_vars,
            kwargs,
            kwargs_style: config.kwargs_type,
            artifacts: config.artifacts,
            instructions: config.instructions,
            query_strategy: config.query_strategy,
        })
    }

    /// Resolves `env_vars` references through `lookup`.
    ///
    /// Called at launch time so that loading never depends on the caller's
    /// environment.
    pub fn resolve_env_vars<F>(&self, lookup: F) -> Result<BTreeMap<String, String>, RegistryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        resolve_references(&self.env_vars, lookup)
    }

    /// Renders the kwargs as entrypoint arguments.
    pub fn kwargs_args(&self) -> Vec<String> {
        match self.kwargs_style {
            KwargsStyle::Argparse => self
                .kwargs
                .iter()
                .flat_map(|(k, v)| [format!("--{}", k), v.clone()])
                .collect(),
            KwargsStyle::Omegaconf => self
                .kwargs
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
        }
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
