//! Assembly of the instructions file handed to the agent.
//!
//! The assembled file is always a derived copy written into the agent
//! directory. Shared inputs mounted with the dataset are only ever read, so
//! obfuscated runs can be repeated without side effects.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::{debug, info};

use crate::error::LaunchError;
use crate::registry::AgentDescriptor;

use super::context::RunContext;

/// Name of the assembled instructions file inside the agent directory.
pub const FULL_INSTRUCTIONS_FILE: &str = "full_instructions.txt";

/// Separates the general instructions from the task description.
pub const COMPETITION_HEADER: &str = "\nCOMPETITION INSTRUCTIONS\n------\n\n";

const DESCRIPTION_FILE: &str = "description.md";
const OBFUSCATED_DESCRIPTION_FILE: &str = "description_obfuscated.md";

/// Input files for one assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionSources {
    pub general: PathBuf,
    pub description: PathBuf,
}

impl InstructionSources {
    /// Picks the plain or obfuscated inputs for `ctx`.
    pub fn for_context(ctx: &RunContext) -> Self {
        if ctx.obfuscate {
            Self {
                general: obfuscated_variant(&ctx.instructions_path),
                description: ctx.data_dir.join(OBFUSCATED_DESCRIPTION_FILE),
            }
        } else {
            Self {
                general: ctx.instructions_path.clone(),
                description: ctx.data_dir.join(DESCRIPTION_FILE),
            }
        }
    }
}

/// `/home/instructions.txt` -> `/home/instructions_obfuscated.txt`.
pub fn obfuscated_variant(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_obfuscated.{}", stem, ext.to_string_lossy()),
        None => format!("{}_obfuscated", stem),
    };
    path.with_file_name(name)
}

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("static regex is valid")
    })
}

/// Replaces `$VAR` and `${VAR}` with values from `vars`; unknown names
/// become empty strings.
pub fn substitute_vars(text: &str, vars: &BTreeMap<String, String>) -> String {
    var_pattern()
        .replace_all(text, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            vars.get(name).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Joins the parts in their fixed order.
pub fn assemble(general: &str, notes: Option<&str>, description: &str) -> String {
    let mut out = String::with_capacity(general.len() + description.len() + 64);
    out.push_str(general);
    if let Some(notes) = notes {
        out.push('\n');
        out.push_str(notes);
    }
    out.push_str(COMPETITION_HEADER);
    out.push_str(description);
    out
}

fn read_source(path: &Path) -> Result<String, LaunchError> {
    fs::read_to_string(path).map_err(|e| LaunchError::InstructionsUnavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn not_writable(target: &Path, obfuscate: bool, reason: &std::io::Error) -> LaunchError {
    if obfuscate {
        LaunchError::ObfuscationTargetNotWritable(target.to_path_buf())
    } else {
        LaunchError::Setup(format!("cannot write instructions to {}: {}", target.display(), reason))
    }
}

fn ensure_writable(dir: &Path, obfuscate: bool) -> Result<(), LaunchError> {
    let marker = dir.join(".biomlbench-write-check");
    fs::write(&marker, b"")
        .and_then(|_| fs::remove_file(&marker))
        .map_err(|e| {
            debug!("Write check in {} failed: {}", dir.display(), e);
            not_writable(&dir.join(FULL_INSTRUCTIONS_FILE), obfuscate, &e)
        })
}

/// Writes `full_instructions.txt` into the agent directory and returns its path.
pub fn write_instructions(
    descriptor: &AgentDescriptor,
    ctx: &RunContext,
) -> Result<PathBuf, LaunchError> {
    let sources = InstructionSources::for_context(ctx);
    let target = ctx.agent_dir.join(FULL_INSTRUCTIONS_FILE);

    fs::create_dir_all(&ctx.agent_dir)?;
    ensure_writable(&ctx.agent_dir, ctx.obfuscate)?;

    let mut general = read_source(&sources.general)?;
    if descriptor.instructions.strip_home_prefix {
        general = general.replace("/home/", "");
    }

    let notes_path = descriptor.dir.join(&descriptor.instructions.notes);
    let notes = match fs::read_to_string(&notes_path) {
        Ok(raw) => Some(substitute_vars(&raw, &ctx.agent_env())),
        Err(_) => {
            debug!("No additional notes at {}", notes_path.display());
            None
        }
    };

    let description = read_source(&sources.description)?;

    let contents = assemble(&general, notes.as_deref(), &description);
    fs::write(&target, contents).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => not_writable(&target, ctx.obfuscate, &e),
        _ => LaunchError::Io(e),
    })?;

    info!(
        "Wrote instructions to {} (obfuscated: {})",
        target.display(),
        ctx.obfuscate
    );
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        descriptor: AgentDescriptor,
        ctx: RunContext,
    }

    fn fixture(config: &str, notes: Option<&str>) -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let agent_src = root.join("agents/aide");
        fs::create_dir_all(&agent_src).unwrap();
        fs::write(agent_src.join("Dockerfile"), "FROM biomlbench-env\n").unwrap();
        fs::write(agent_src.join("config.yaml"), config).unwrap();
        fs::write(agent_src.join("start.sh"), "#!/bin/bash\n").unwrap();
        if let Some(notes) = notes {
            fs::write(agent_src.join("additional_notes.txt"), notes).unwrap();
        }

        let data = root.join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("description.md"), "Predict binding affinity.").unwrap();
        fs::write(data.join("description_obfuscated.md"), "Predict the target.").unwrap();
        fs::write(root.join("instructions.txt"), "Read /home/data/ first.\n").unwrap();
        fs::write(root.join("instructions_obfuscated.txt"), "Hidden task.\n").unwrap();

        let descriptor = AgentDescriptor::load(&agent_src).unwrap();
        let ctx = RunContext::new()
            .with_data_dir(&data)
            .with_agent_dir(root.join("agent"))
            .with_instructions_path(root.join("instructions.txt"))
            .with_time_limit(std::time::Duration::from_secs(3600));

        Fixture {
            _temp: temp,
            descriptor,
            ctx,
        }
    }

    #[test]
    fn test_substitute_vars() {
        let mut vars = BTreeMap::new();
        vars.insert("TIME_LIMIT".to_string(), "1hrs 0mins 0secs".to_string());
        vars.insert("HARDWARE".to_string(), "CPU".to_string());

        let out = substitute_vars("You have $TIME_LIMIT on ${HARDWARE}. $UNKNOWN done.", &vars);
        assert_eq!(out, "You have 1hrs 0mins 0secs on CPU.  done.");
        assert_eq!(substitute_vars("cost: $5", &vars), "cost: $5");
    }

    #[test]
    fn test_assemble_order() {
        let out = assemble("general\n", Some("notes\n"), "task");
        assert_eq!(out, "general\n\nnotes\n\nCOMPETITION INSTRUCTIONS\n------\n\ntask");

        let out = assemble("general\n", None, "task");
        assert_eq!(out, "general\n\nCOMPETITION INSTRUCTIONS\n------\n\ntask");
    }

    #[test]
    fn test_obfuscated_variant() {
        assert_eq!(
            obfuscated_variant(Path::new("/home/instructions.txt")),
            PathBuf::from("/home/instructions_obfuscated.txt")
        );
        assert_eq!(
            obfuscated_variant(Path::new("/home/notes")),
            PathBuf::from("/home/notes_obfuscated")
        );
    }

    #[test]
    fn test_write_plain_instructions() {
        let f = fixture("", Some("Budget: $TIME_LIMIT\n"));
        let path = write_instructions(&f.descriptor, &f.ctx).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("Read /home/data/ first.\n\nBudget: 1hrs 0mins 0secs\n"));
        assert!(contents.ends_with(&format!("{}Predict binding affinity.", COMPETITION_HEADER)));
    }

    #[test]
    fn test_strip_home_prefix() {
        let f = fixture("instructions:\n  strip_home_prefix: true\n", None);
        let path = write_instructions(&f.descriptor, &f.ctx).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("Read data/ first.\n"));
    }

    #[test]
    fn test_obfuscation_preserves_inputs_and_is_idempotent() {
        let f = fixture("", None);
        let ctx = f.ctx.clone().with_obfuscate(true);

        let first = fs::read_to_string(write_instructions(&f.descriptor, &ctx).unwrap()).unwrap();
        let second = fs::read_to_string(write_instructions(&f.descriptor, &ctx).unwrap()).unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("Hidden task.\n"));
        assert!(first.ends_with("Predict the target."));
        assert_eq!(
            fs::read_to_string(&f.ctx.instructions_path).unwrap(),
            "Read /home/data/ first.\n"
        );
        assert_eq!(
            fs::read_to_string(f.ctx.data_dir.join("description.md")).unwrap(),
            "Predict binding affinity."
        );
    }

    #[test]
    fn test_missing_obfuscated_variant() {
        let f = fixture("", None);
        fs::remove_file(f.ctx.data_dir.join("description_obfuscated.md")).unwrap();

        let err = write_instructions(&f.descriptor, &f.ctx.clone().with_obfuscate(true)).unwrap_err();
        assert!(matches!(
            err,
            LaunchError::InstructionsUnavailable { ref path, .. } if path.ends_with("description_obfuscated.md")
        ));
    }

    #[test]
    fn test_unwritable_target_names_the_step() {
        let target = Path::new("/home/agent/full_instructions.txt");
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);

        assert!(matches!(
            not_writable(target, true, &denied),
            LaunchError::ObfuscationTargetNotWritable(ref p) if p == target
        ));
        match not_writable(target, false, &denied) {
            LaunchError::Setup(msg) => assert!(msg.contains("full_instructions.txt")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
