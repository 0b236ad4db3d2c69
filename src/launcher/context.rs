//! Per-launch run context.
//!
//! The process environment is read once, at the CLI boundary, through
//! [`RunContext::from_env`]. Everything downstream takes the context by value
//! and hands the agent its environment via [`RunContext::agent_env`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::LaunchError;

use super::result::format_duration;

/// Default time limit: six hours.
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 21_600;

/// Hardware label used when no accelerator is detected.
pub const CPU_LABEL: &str = "CPU";

/// Inputs of a single launch.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub data_dir: PathBuf,
    pub submission_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub code_dir: PathBuf,
    pub agent_dir: PathBuf,
    /// General task instructions mounted with the dataset.
    pub instructions_path: PathBuf,
    pub time_limit: Duration,
    pub step_limit: Option<u64>,
    pub obfuscate: bool,
    /// Root of the conda installation holding agent environments.
    pub conda_root: PathBuf,
    /// Detected hardware; filled in by the launcher.
    pub hardware: Option<String>,
    /// Additional variables exported to the agent, e.g. resolved credentials.
    pub extra_env: BTreeMap<String, String>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/home/data"),
            submission_dir: PathBuf::from("/home/submission"),
            logs_dir: PathBuf::from("/home/logs"),
            code_dir: PathBuf::from("/home/code"),
            agent_dir: PathBuf::from("/home/agent"),
            instructions_path: PathBuf::from("/home/instructions.txt"),
            time_limit: Duration::from_secs(DEFAULT_TIME_LIMIT_SECS),
            step_limit: None,
            obfuscate: false,
            conda_root: PathBuf::from("/opt/conda"),
            hardware: None,
            extra_env: BTreeMap::new(),
        }
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_submission_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.submission_dir = dir.into();
        self
    }

    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = dir.into();
        self
    }

    pub fn with_code_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.code_dir = dir.into();
        self
    }

    pub fn with_agent_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.agent_dir = dir.into();
        self
    }

    pub fn with_instructions_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.instructions_path = path.into();
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    pub fn with_step_limit(mut self, steps: Option<u64>) -> Self {
        self.step_limit = steps;
        self
    }

    pub fn with_obfuscate(mut self, obfuscate: bool) -> Self {
        self.obfuscate = obfuscate;
        self
    }

    pub fn with_conda_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.conda_root = root.into();
        self
    }

    pub fn with_hardware(mut self, hardware: impl Into<String>) -> Self {
        self.hardware = Some(hardware.into());
        self
    }

    /// Adds one variable exported to the agent.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }

    /// Builds a context from the process environment.
    pub fn from_env() -> Result<Self, LaunchError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a context from an arbitrary variable lookup. Unset variables
    /// keep their defaults; malformed numbers are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LaunchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut ctx = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("DATA_DIR") {
            ctx.data_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty("SUBMISSION_DIR") {
            ctx.submission_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty("LOGS_DIR") {
            ctx.logs_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty("CODE_DIR") {
            ctx.code_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty("AGENT_DIR") {
            ctx.agent_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty("INSTRUCTIONS_PATH") {
            ctx.instructions_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("CONDA_ROOT") {
            ctx.conda_root = PathBuf::from(v);
        }
        if let Some(v) = non_empty("TIME_LIMIT_SECS") {
            let secs = parse_number("TIME_LIMIT_SECS", &v)?;
            ctx.time_limit = Duration::from_secs(secs);
        }
        if let Some(v) = non_empty("STEP_LIMIT") {
            ctx.step_limit = Some(parse_number("STEP_LIMIT", &v)?);
        }
        if let Some(v) = non_empty("OBFUSCATE") {
            ctx.obfuscate = parse_flag(&v);
        }

        Ok(ctx)
    }

    /// Human-readable time limit, e.g. "6hrs 0mins 0secs".
    pub fn time_limit_label(&self) -> String {
        format_duration(self.time_limit)
    }

    /// Hardware string exported to the agent; never empty.
    pub fn hardware_label(&self) -> &str {
        match self.hardware.as_deref() {
            Some(h) if !h.trim().is_empty() => h,
            _ => CPU_LABEL,
        }
    }

    /// Variables overlaid on the agent's environment.
    pub fn agent_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("DATA_DIR".to_string(), self.data_dir.display().to_string());
        env.insert("SUBMISSION_DIR".to_string(), self.submission_dir.display().to_string());
        env.insert("LOGS_DIR".to_string(), self.logs_dir.display().to_string());
        env.insert("CODE_DIR".to_string(), self.code_dir.display().to_string());
        env.insert("AGENT_DIR".to_string(), self.agent_dir.display().to_string());
        env.insert("TIME_LIMIT_SECS".to_string(), self.time_limit.as_secs().to_string());
        env.insert("TIME_LIMIT".to_string(), self.time_limit_label());
        env.insert("HARDWARE".to_string(), self.hardware_label().to_string());
        env.insert("OBFUSCATE".to_string(), self.obfuscate.to_string());
        if let Some(steps) = self.step_limit {
            env.insert("STEP_LIMIT".to_string(), steps.to_string());
        }
        for (key, value) in &self.extra_env {
            env.insert(key.clone(), value.clone());
        }
        env
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, LaunchError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| LaunchError::InvalidContext(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
