//! Agent launcher.
//!
//! Runs an agent's entrypoint inside its container under a hard wall-clock
//! limit, then harvests its artifacts.
//!
//! ```text
//! Starting → EnvironmentReady → Running → {Completed | TimedOut | Crashed}
//!          → ArtifactsCollected → Done
//! ```
//!
//! Failures before `Running` (environment activation, instructions) are
//! returned as [`LaunchError`]. Once the routine has started, every outcome
//! including a timeout is reported through [`LaunchResult`], and artifact
//! collection always runs.
//!
//! # Example
//!
//! ```ignore
//! use biomlbench_agents::launcher::{Launcher, RunContext};
//!
//! let ctx = RunContext::from_env()?;
//! let result = Launcher::new().launch(&descriptor, ctx).await?;
//! println!("{} after {}", result.status, result.time_limit_label);
//! ```

pub mod artifacts;
pub mod context;
pub mod environment;
pub mod hardware;
pub mod instructions;
pub mod result;

pub use artifacts::{collect, copy_best_solution, copy_logs, find_best_solution, ArtifactReport, CopyOutcome};
pub use context::{RunContext, CPU_LABEL, DEFAULT_TIME_LIMIT_SECS};
pub use environment::ExecutionEnvironment;
pub use hardware::{describe_hardware, detect_hardware, lacks_required_gpu, HardwareProbe, NvidiaSmiProbe};
pub use instructions::{write_instructions, FULL_INSTRUCTIONS_FILE};
pub use result::{format_duration, LaunchPhase, LaunchResult, LaunchStatus, PhaseTracker};

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::Utc;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::LaunchError;
use crate::registry::AgentDescriptor;

/// File in the logs dir capturing the routine's stdout and stderr.
pub const AGENT_LOG_FILE: &str = "agent.log";

/// File in the logs dir holding the serialized [`LaunchResult`].
pub const LAUNCH_RESULT_FILE: &str = "launch_result.json";

/// Variable carrying the agent's configured query strategy.
pub const QUERY_STRATEGY_VAR: &str = "QUERY_STRATEGY";

/// How a routine run ended.
struct RoutineOutcome {
    status: LaunchStatus,
    exit_code: Option<i32>,
    duration: Duration,
}

/// Launches agents inside their container.
pub struct Launcher {
    probe: Box<dyn HardwareProbe>,
    shell: String,
}

impl Launcher {
    /// Creates a launcher probing GPUs with `nvidia-smi`.
    pub fn new() -> Self {
        Self {
            probe: Box::new(NvidiaSmiProbe::new()),
            shell: "bash".to_string(),
        }
    }

    /// Replaces the hardware probe.
    pub fn with_probe(mut self, probe: impl HardwareProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Replaces the shell used to run the entrypoint.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Runs `descriptor`'s entrypoint under `ctx`.
    pub async fn launch(
        &self,
        descriptor: &AgentDescriptor,
        mut ctx: RunContext,
    ) -> Result<LaunchResult, LaunchError> {
        let mut tracker = PhaseTracker::new();
        info!("Launching agent '{}' with limit {}", descriptor.id, ctx.time_limit_label());

        prepare_dirs(&ctx)?;

        let environment = ExecutionEnvironment::activate(descriptor.environment.as_deref(), &ctx.conda_root)?;
        ctx.hardware = Some(detect_hardware(self.probe.as_ref()).await);
        if lacks_required_gpu(descriptor.gpu, ctx.hardware_label()) {
            warn!("Agent '{}' requires a GPU but none was detected; running on CPU", descriptor.id);
        }
        let instructions_path = write_instructions(descriptor, &ctx)?;
        tracker.advance(LaunchPhase::EnvironmentReady);

        let mut env = ctx.agent_env();
        env.entry(QUERY_STRATEGY_VAR.to_string())
            .or_insert_with(|| descriptor.query_strategy.to_string());
        let host_path = std::env::var("PATH").ok();
        env.extend(environment.env_overrides(host_path.as_deref()));

        let agent_log = ctx.logs_dir.join(AGENT_LOG_FILE);
        let started_at = Utc::now();
        tracker.advance(LaunchPhase::Running);

        let outcome = self.run_routine(descriptor, &ctx, &env, &agent_log).await;
        tracker.advance(outcome.status.into());
        let finished_at = Utc::now();

        match outcome.status {
            LaunchStatus::Completed => info!("Agent '{}' completed in {:?}", descriptor.id, outcome.duration),
            LaunchStatus::TimedOut => warn!("Agent '{}' timed out after {}", descriptor.id, ctx.time_limit_label()),
            LaunchStatus::Crashed => error!("Agent '{}' crashed (exit code {:?})", descriptor.id, outcome.exit_code),
        }

        let artifacts = collect(descriptor, &ctx);
        tracker.advance(LaunchPhase::ArtifactsCollected);
        tracker.advance(LaunchPhase::Done);

        let result = LaunchResult {
            agent_id: descriptor.id.clone(),
            status: outcome.status,
            exit_code: outcome.exit_code,
            time_limit_label: ctx.time_limit_label(),
            hardware: ctx.hardware_label().to_string(),
            phases: tracker.into_phases(),
            started_at,
            finished_at,
            duration: outcome.duration,
            instructions_path,
            agent_log,
            artifacts,
        };

        write_result(&result, &ctx.logs_dir.join(LAUNCH_RESULT_FILE));
        Ok(result)
    }

    async fn run_routine(
        &self,
        descriptor: &AgentDescriptor,
        ctx: &RunContext,
        env: &BTreeMap<String, String>,
        agent_log: &Path,
    ) -> RoutineOutcome {
        let start = Instant::now();
        let crashed = |start: Instant| RoutineOutcome {
            status: LaunchStatus::Crashed,
            exit_code: None,
            duration: start.elapsed(),
        };

        let (stdout, stderr) = match open_log(agent_log) {
            Ok(pair) => pair,
            Err(e) => {
                error!("Cannot open {}: {}", agent_log.display(), e);
                return crashed(start);
            }
        };

        let mut cmd = Command::new(&self.shell);
        cmd.arg(&descriptor.entrypoint)
            .args(descriptor.kwargs_args())
            .current_dir(&ctx.agent_dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .kill_on_drop(true);

        debug!(
            "Spawning {} {} {:?}",
            self.shell,
            descriptor.entrypoint.display(),
            descriptor.kwargs_args()
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn {}: {}", descriptor.entrypoint.display(), e);
                return crashed(start);
            }
        };
        let pid = child.id();

        match tokio::time::timeout(ctx.time_limit, child.wait()).await {
            Ok(Ok(status)) => RoutineOutcome {
                status: if status.success() {
                    LaunchStatus::Completed
                } else {
                    LaunchStatus::Crashed
                },
                exit_code: status.code(),
                duration: start.elapsed(),
            },
            Ok(Err(e)) => {
                error!("Failed waiting for agent routine: {}", e);
                crashed(start)
            }
            Err(_) => {
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    debug!("Routine already gone after group kill: {}", e);
                }
                RoutineOutcome {
                    status: LaunchStatus::TimedOut,
                    exit_code: None,
                    duration: start.elapsed(),
                }
            }
        }
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

fn prepare_dirs(ctx: &RunContext) -> Result<(), LaunchError> {
    for dir in [&ctx.submission_dir, &ctx.logs_dir, &ctx.code_dir, &ctx.agent_dir] {
        fs::create_dir_all(dir)
            .map_err(|e| LaunchError::Setup(format!("failed to create {}: {}", dir.display(), e)))?;
    }
    Ok(())
}

fn open_log(path: &Path) -> std::io::Result<(Stdio, Stdio)> {
    let file = File::create(path)?;
    let err = file.try_clone()?;
    Ok((Stdio::from(file), Stdio::from(err)))
}

fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    // The routine leads its own group, so the group id equals its pid.
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!("Killed process group {}", pid),
        Err(e) => debug!("Failed to kill process group {}: {}", pid, e),
    }
}

fn write_result(result: &LaunchResult, path: &Path) {
    let json = match serde_json::to_string_pretty(result) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize launch result: {}", e);
            return;
        }
    };
    if let Err(e) = fs::write(path, json) {
        warn!("Failed to write {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NoGpu;

    #[async_trait]
    impl HardwareProbe for NoGpu {
        async fn device_names(&self) -> Result<Vec<String>, String> {
            Ok(Vec::new())
        }
    }

    fn setup(script: &str, config: &str) -> (TempDir, AgentDescriptor, RunContext) {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let agent_src = root.join("agents/dummy");
        fs::create_dir_all(&agent_src).unwrap();
        fs::write(agent_src.join("Dockerfile"), "FROM biomlbench-env\n").unwrap();
        fs::write(agent_src.join("config.yaml"), config).unwrap();
        fs::write(agent_src.join("start.sh"), script).unwrap();

        let data = root.join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("description.md"), "task").unwrap();
        fs::write(root.join("instructions.txt"), "general\n").unwrap();

        let descriptor = AgentDescriptor::load(&agent_src).unwrap();
        let ctx = RunContext::new()
            .with_data_dir(&data)
            .with_instructions_path(root.join("instructions.txt"))
            .with_agent_dir(root.join("agent"))
            .with_submission_dir(root.join("out/submission"))
            .with_logs_dir(root.join("out/logs"))
            .with_code_dir(root.join("out/code"))
            .with_conda_root(root.join("conda"))
            .with_time_limit(Duration::from_secs(30));

        (temp, descriptor, ctx)
    }

    #[tokio::test]
    async fn test_kwargs_and_env_reach_routine() {
        let (_temp, descriptor, ctx) = setup(
            "echo \"args=$*\"\necho \"hw=$HARDWARE limit=$TIME_LIMIT\"\n",
            "kwargs:\n  steps: \"3\"\n",
        );

        let result = Launcher::new().with_probe(NoGpu).launch(&descriptor, ctx).await.unwrap();

        assert_eq!(result.status, LaunchStatus::Completed);
        assert_eq!(result.exit_code, Some(0));
        let log = fs::read_to_string(&result.agent_log).unwrap();
        assert!(log.contains("args=--steps 3"));
        assert!(log.contains("hw=CPU limit=0hrs 0mins 30secs"));
    }

    #[tokio::test]
    async fn test_query_strategy_exported() {
        let (_temp, descriptor, ctx) = setup(
            "echo \"strategy=$QUERY_STRATEGY\"\n",
            "query_strategy: function_calling\n",
        );

        let result = Launcher::new().with_probe(NoGpu).launch(&descriptor, ctx).await.unwrap();

        let log = fs::read_to_string(&result.agent_log).unwrap();
        assert!(log.contains("strategy=function_calling"));
    }

    #[tokio::test]
    async fn test_missing_environment_stops_before_running() {
        let (_temp, descriptor, ctx) = setup("exit 0\n", "environment: agent\n");

        let err = Launcher::new().with_probe(NoGpu).launch(&descriptor, ctx).await.unwrap_err();
        assert!(matches!(err, LaunchError::EnvironmentActivationFailed { .. }));
    }

    #[tokio::test]
    async fn test_result_file_written() {
        let (_temp, descriptor, ctx) = setup("exit 3\n", "");
        let logs_dir = ctx.logs_dir.clone();

        let result = Launcher::new().with_probe(NoGpu).launch(&descriptor, ctx).await.unwrap();
        assert_eq!(result.status, LaunchStatus::Crashed);
        assert_eq!(result.exit_code, Some(3));

        let saved: LaunchResult =
            serde_json::from_str(&fs::read_to_string(logs_dir.join(LAUNCH_RESULT_FILE)).unwrap()).unwrap();
        assert_eq!(saved.status, LaunchStatus::Crashed);
        assert_eq!(saved.phases.last(), Some(&LaunchPhase::Done));
    }
}
