//! Best-effort collection of agent artifacts into the output directories.
//!
//! Copy problems never fail a launch. They are logged as warnings and
//! surfaced as [`CopyOutcome::Failed`], which stays distinct from
//! [`CopyOutcome::NothingToCopy`].

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::registry::AgentDescriptor;

use super::context::RunContext;
use super::{AGENT_LOG_FILE, LAUNCH_RESULT_FILE};

/// Files the launcher itself writes into the logs dir; agent logs never replace them.
const RESERVED_LOG_FILES: [&str; 2] = [AGENT_LOG_FILE, LAUNCH_RESULT_FILE];

/// Result of one best-effort copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CopyOutcome {
    /// Files written to the destination.
    Copied { files: Vec<PathBuf> },
    /// The source held nothing to copy.
    NothingToCopy,
    /// At least one copy failed; `copied` lists what still made it.
    Failed { reason: String, copied: Vec<PathBuf> },
}

impl CopyOutcome {
    /// Returns true for [`CopyOutcome::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, CopyOutcome::Failed { .. })
    }
}

/// Outcomes of one artifact collection pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReport {
    pub logs: CopyOutcome,
    pub best_solution: CopyOutcome,
}

/// Copies every file under `src_dir` into `dest_dir`, keeping relative paths.
///
/// Files that already are their destination (a logs dir symlinked to the
/// output dir) are left alone, as are the launcher's own files at the top
/// of `dest_dir`.
pub fn copy_logs(src_dir: &Path, dest_dir: &Path) -> CopyOutcome {
    if !src_dir.is_dir() {
        debug!("No agent logs at {}", src_dir.display());
        return CopyOutcome::NothingToCopy;
    }
    if same_file(src_dir, dest_dir) {
        info!("Agent logs already written to {}", dest_dir.display());
        return CopyOutcome::NothingToCopy;
    }

    let mut copied = Vec::new();
    let mut failures = Vec::new();

    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                failures.push(e.to_string());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(src_dir) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        if is_reserved(relative) {
            warn!("Not overwriting {} with agent log {}", relative.display(), entry.path().display());
            continue;
        }
        let dest = dest_dir.join(relative);
        if same_file(entry.path(), &dest) {
            debug!("{} is already in place", dest.display());
            continue;
        }

        match copy_file(entry.path(), &dest) {
            Ok(()) => copied.push(dest),
            Err(e) => failures.push(format!("{}: {}", entry.path().display(), e)),
        }
    }

    if !failures.is_empty() {
        let reason = failures.join("; ");
        warn!("Failed to copy some agent logs: {}", reason);
        return CopyOutcome::Failed { reason, copied };
    }

    if copied.is_empty() {
        CopyOutcome::NothingToCopy
    } else {
        info!("Copied {} log file(s) to {}", copied.len(), dest_dir.display());
        CopyOutcome::Copied { files: copied }
    }
}

/// Compiles a file name pattern where `*` matches any run of characters.
pub fn file_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{}$", escaped))
}

/// Finds the first file under `root` (sorted walk) whose name matches `pattern`.
pub fn find_best_solution(root: &Path, pattern: &str) -> Option<PathBuf> {
    let matcher = match file_pattern(pattern) {
        Ok(matcher) => matcher,
        Err(e) => {
            warn!("Invalid best solution pattern {:?}: {}", pattern, e);
            return None;
        }
    };
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| matcher.is_match(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.into_path())
}

/// Copies the first best-solution match under `search_root` into `dest_dir`.
pub fn copy_best_solution(search_root: &Path, pattern: &str, dest_dir: &Path) -> CopyOutcome {
    let source = match find_best_solution(search_root, pattern) {
        Some(source) => source,
        None => {
            debug!("No file matching {} under {}", pattern, search_root.display());
            return CopyOutcome::NothingToCopy;
        }
    };

    let file_name = match source.file_name() {
        Some(name) => name.to_owned(),
        None => return CopyOutcome::NothingToCopy,
    };
    let dest = dest_dir.join(file_name);

    match copy_file(&source, &dest) {
        Ok(()) => {
            info!("Copied best solution {} to {}", source.display(), dest.display());
            CopyOutcome::Copied { files: vec![dest] }
        }
        Err(e) => {
            let reason = format!("{}: {}", source.display(), e);
            warn!("Failed to copy best solution: {}", reason);
            CopyOutcome::Failed {
                reason,
                copied: Vec::new(),
            }
        }
    }
}

/// Copies the agent's logs and best solution into the context's output dirs.
///
/// Logs come from `<agent_dir>/<artifacts.logs>`; the best solution is the
/// first match of `artifacts.best_solution` anywhere under the agent dir.
pub fn collect(descriptor: &AgentDescriptor, ctx: &RunContext) -> ArtifactReport {
    let spec = &descriptor.artifacts;
    let logs_src = if spec.logs.is_absolute() {
        spec.logs.clone()
    } else {
        ctx.agent_dir.join(&spec.logs)
    };

    ArtifactReport {
        logs: copy_logs(&logs_src, &ctx.logs_dir),
        best_solution: copy_best_solution(&ctx.agent_dir, &spec.best_solution, &ctx.code_dir),
    }
}

fn is_reserved(relative: &Path) -> bool {
    relative.parent() == Some(Path::new(""))
        && relative
            .to_str()
            .map_or(false, |name| RESERVED_LOG_FILES.contains(&name))
}

/// True when both paths exist and resolve to the same location.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn copy_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest)?;
    Ok(())
}
