//! Launch results and the per-launch state machine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::artifacts::{ArtifactReport, CopyOutcome};

/// Terminal status of an agent's main routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchStatus {
    /// Routine exited with code 0.
    Completed,
    /// Routine hit the time limit and was killed.
    TimedOut,
    /// Routine exited non-zero, died from a signal, or could not be started.
    Crashed,
}

impl std::fmt::Display for LaunchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchStatus::Completed => write!(f, "completed"),
            LaunchStatus::TimedOut => write!(f, "timed_out"),
            LaunchStatus::Crashed => write!(f, "crashed"),
        }
    }
}

/// States of one launch.
///
/// ```text
/// Starting → EnvironmentReady → Running → {Completed | TimedOut | Crashed}
///          → ArtifactsCollected → Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchPhase {
    Starting,
    EnvironmentReady,
    Running,
    Completed,
    TimedOut,
    Crashed,
    ArtifactsCollected,
    Done,
}

impl LaunchPhase {
    /// Returns true if `next` may follow `self`.
    pub fn can_advance_to(self, next: LaunchPhase) -> bool {
        use LaunchPhase::*;
        matches!(
            (self, next),
            (Starting, EnvironmentReady)
                | (EnvironmentReady, Running)
                | (Running, Completed)
                | (Running, TimedOut)
                | (Running, Crashed)
                | (Completed, ArtifactsCollected)
                | (TimedOut, ArtifactsCollected)
                | (Crashed, ArtifactsCollected)
                | (ArtifactsCollected, Done)
        )
    }
}

impl From<LaunchStatus> for LaunchPhase {
    fn from(status: LaunchStatus) -> Self {
        match status {
            LaunchStatus::Completed => LaunchPhase::Completed,
            LaunchStatus::TimedOut => LaunchPhase::TimedOut,
            LaunchStatus::Crashed => LaunchPhase::Crashed,
        }
    }
}

/// Records the phases a launch passes through.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    phases: Vec<LaunchPhase>,
}

impl PhaseTracker {
    /// Starts a tracker in `Starting`.
    pub fn new() -> Self {
        Self {
            phases: vec![LaunchPhase::Starting],
        }
    }

    /// Current phase.
    pub fn current(&self) -> LaunchPhase {
        *self.phases.last().unwrap_or(&LaunchPhase::Starting)
    }

    /// Moves to `next`. Invalid transitions are logged and still recorded so
    /// the history stays truthful.
    pub fn advance(&mut self, next: LaunchPhase) {
        let current = self.current();
        if current.can_advance_to(next) {
            debug!("Launch phase {:?} -> {:?}", current, next);
        } else {
            warn!("Unexpected launch phase transition {:?} -> {:?}", current, next);
        }
        self.phases.push(next);
    }

    /// Phases visited so far, in order.
    pub fn into_phases(self) -> Vec<LaunchPhase> {
        self.phases
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a caller needs after one launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchResult {
    pub agent_id: String,
    pub status: LaunchStatus,
    /// Exit code of the routine, when it exited on its own.
    pub exit_code: Option<i32>,
    /// Human-readable time limit, e.g. "0hrs 0mins 5secs".
    pub time_limit_label: String,
    /// Hardware string exported to the agent.
    pub hardware: String,
    pub phases: Vec<LaunchPhase>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration of the routine.
    pub duration: Duration,
    /// Assembled instructions handed to the agent.
    pub instructions_path: PathBuf,
    /// Routine stdout/stderr capture.
    pub agent_log: PathBuf,
    pub artifacts: ArtifactReport,
}

impl LaunchResult {
    /// Log files copied into the logs output directory.
    pub fn log_files(&self) -> &[PathBuf] {
        match self.artifacts.logs {
            CopyOutcome::Copied { ref files } => files.as_slice(),
            CopyOutcome::Failed { ref copied, .. } => copied.as_slice(),
            CopyOutcome::NothingToCopy => &[],
        }
    }

    /// Best solution copied into the code output directory, if any.
    pub fn best_solution(&self) -> Option<&Path> {
        match self.artifacts.best_solution {
            CopyOutcome::Copied { ref files } => files.first().map(PathBuf::as_path),
            _ => None,
        }
    }

    /// True if the routine ran to a zero exit.
    pub fn is_success(&self) -> bool {
        self.status == LaunchStatus::Completed
    }
}

/// Formats a duration as "Xhrs Ymins Zsecs".
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!(
        "{}hrs {}mins {}secs",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}
