//! Error types for biomlbench-agents operations.
//!
//! Defines error types for each major subsystem:
//! - Agent registry loading and lookup
//! - Docker daemon and image operations
//! - Agent and base-environment image builds
//! - Agent launches inside a container
//! - Model queries issued by LLM-backed agents
//! - The built-in one-shot agent

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Agent '{0}' not found in registry")]
    AgentNotFound(String),

    #[error("Agents directory '{}' does not exist", .0.display())]
    AgentsDirMissing(PathBuf),

    #[error("Invalid agent config '{}': {message}", path.display())]
    InvalidConfig { path: PathBuf, message: String },

    #[error("Environment variable `{0}` is not set")]
    MissingEnvVar(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during Docker operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker build failed: {0}")]
    BuildFailed(String),

    #[error("Docker run failed: {0}")]
    RunFailed(String),

    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Image '{0}' not found")]
    ImageNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while building an agent or base-environment image.
///
/// Precondition variants are checked in declaration order, so the first one a
/// caller sees is the first check that failed.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Docker is not installed (the `docker` command was not found)")]
    RuntimeMissing,

    #[error("Docker daemon is not running or not reachable: {0}")]
    DaemonUnavailable(String),

    #[error("Base image '{0}' not found; run `build-base-env` first")]
    BaseImageMissing(String),

    #[error("Base environment Dockerfile not found at '{}'", .0.display())]
    BaseDockerfileMissing(PathBuf),

    #[error("Agent directory '{}' not found", .0.display())]
    AgentDirMissing(PathBuf),

    #[error("Required agent file missing: '{}'", .0.display())]
    AgentFileMissing(PathBuf),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Build of image '{image}' failed:\n{output}")]
    BuildFailed { image: String, output: String },

    #[error("Smoke test of image '{image}' failed: {reason}")]
    SmokeTestFailed { image: String, reason: String },
}

impl BuildError {
    /// Short name of the check that failed, used in CLI diagnostics.
    pub fn check_name(&self) -> &'static str {
        match self {
            BuildError::RuntimeMissing => "docker installed",
            BuildError::DaemonUnavailable(_) => "docker daemon running",
            BuildError::BaseImageMissing(_) => "base image present",
            BuildError::BaseDockerfileMissing(_) => "base Dockerfile present",
            BuildError::AgentDirMissing(_) => "agent directory exists",
            BuildError::AgentFileMissing(_) => "agent files present",
            BuildError::Registry(_) => "agent registered",
            BuildError::BuildFailed { .. } => "docker build",
            BuildError::SmokeTestFailed { .. } => "smoke test",
        }
    }
}

/// Errors that abort a launch before the agent's routine runs.
///
/// A timeout is not an error; it is reported through
/// [`crate::launcher::LaunchStatus::TimedOut`].
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to activate environment '{name}': {reason}")]
    EnvironmentActivationFailed { name: String, reason: String },

    #[error("Instructions file '{}' could not be read: {reason}", path.display())]
    InstructionsUnavailable { path: PathBuf, reason: String },

    #[error("Obfuscation target '{}' is not writable", .0.display())]
    ObfuscationTargetNotWritable(PathBuf),

    #[error("Failed to prepare run: {0}")]
    Setup(String),

    #[error("Invalid run configuration: {0}")]
    InvalidContext(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during model queries.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Missing API key: OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse model response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Model returned no choices")]
    EmptyResponse,
}

/// Errors from the built-in one-shot agent.
#[derive(Debug, Error)]
pub enum OneShotError {
    #[error("Dataset file '{}' unavailable: {reason}", path.display())]
    DatasetUnavailable { path: PathBuf, reason: String },

    #[error("Could not extract scripts from model response: {0}")]
    Extract(String),

    #[error("Model query failed: {0}")]
    Query(#[from] QueryError),

    #[error("Step '{step}' failed with exit code {code:?}")]
    StepFailed { step: String, code: Option<i32> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
