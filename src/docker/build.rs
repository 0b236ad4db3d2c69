//! `docker build` invocations.
//!
//! Every agent image is built with the same four directory build-args so
//! that agent entrypoints can rely on them unconditionally.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::registry::AgentDescriptor;

/// Label recording which agent an image was built for.
pub const AGENT_ID_LABEL: &str = "biomlbench.agent.id";

/// Default platform for every image.
pub const DEFAULT_PLATFORM: &str = "linux/amd64";

/// Build-time parameters shared by every agent image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    pub submission_dir: String,
    pub logs_dir: String,
    pub code_dir: String,
    pub agent_dir: String,
    pub platform: String,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self {
            submission_dir: "/home/submission".to_string(),
            logs_dir: "/home/logs".to_string(),
            code_dir: "/home/code".to_string(),
            agent_dir: "/home/agent".to_string(),
            platform: DEFAULT_PLATFORM.to_string(),
        }
    }
}

impl BuildContext {
    /// The four directory build-args, in fixed order.
    pub fn build_args(&self) -> Vec<(String, String)> {
        vec![
            ("SUBMISSION_DIR".to_string(), self.submission_dir.clone()),
            ("LOGS_DIR".to_string(), self.logs_dir.clone()),
            ("CODE_DIR".to_string(), self.code_dir.clone()),
            ("AGENT_DIR".to_string(), self.agent_dir.clone()),
        ]
    }
}

/// A fully specified `docker build` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInvocation {
    /// Tag of the resulting image.
    pub image: String,
    /// Build context directory.
    pub context_dir: PathBuf,
    /// Dockerfile, when it is not `<context_dir>/Dockerfile`.
    pub dockerfile: Option<PathBuf>,
    pub platform: String,
    pub build_args: Vec<(String, String)>,
    pub labels: BTreeMap<String, String>,
    pub no_cache: bool,
}

impl BuildInvocation {
    /// Invocation for an agent image, built from the agent's own directory.
    pub fn for_agent(descriptor: &AgentDescriptor, context: &BuildContext, no_cache: bool) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(AGENT_ID_LABEL.to_string(), descriptor.id.clone());

        Self {
            image: descriptor.image.clone(),
            context_dir: descriptor.dir.clone(),
            dockerfile: None,
            platform: context.platform.clone(),
            build_args: context.build_args(),
            labels,
            no_cache,
        }
    }

    /// Invocation for the shared base image.
    pub fn for_base_env(
        image: impl Into<String>,
        dockerfile: impl Into<PathBuf>,
        context_dir: impl Into<PathBuf>,
        platform: impl Into<String>,
        no_cache: bool,
    ) -> Self {
        Self {
            image: image.into(),
            context_dir: context_dir.into(),
            dockerfile: Some(dockerfile.into()),
            platform: platform.into(),
            build_args: Vec::new(),
            labels: BTreeMap::new(),
            no_cache,
        }
    }

    /// Arguments for the `docker` command, starting with `build`.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            format!("--platform={}", self.platform),
            "-t".to_string(),
            self.image.clone(),
        ];

        if let Some(ref dockerfile) = self.dockerfile {
            args.push("-f".to_string());
            args.push(dockerfile.to_string_lossy().to_string());
        }

        for (key, value) in &self.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }

        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        if self.no_cache {
            args.push("--no-cache".to_string());
        }

        args.push(self.context_dir.to_string_lossy().to_string());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RequiredFile;
    use std::fs;
    use tempfile::TempDir;

    fn descriptor(root: &std::path::Path, id: &str) -> AgentDescriptor {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        for file in RequiredFile::ALL {
            fs::write(dir.join(file.file_name()), "").unwrap();
        }
        AgentDescriptor::load(&dir).unwrap()
    }

    #[test]
    fn test_no_cache_follows_option() {
        let temp = TempDir::new().unwrap();
        let aide = descriptor(temp.path(), "aide");
        let context = BuildContext::default();

        let forced = BuildInvocation::for_agent(&aide, &context, true).to_args();
        assert!(forced.contains(&"--no-cache".to_string()));

        let cached = BuildInvocation::for_agent(&aide, &context, false).to_args();
        assert!(!cached.contains(&"--no-cache".to_string()));
    }

    #[test]
    fn test_build_args_identical_across_agents() {
        let temp = TempDir::new().unwrap();
        let context = BuildContext::default();

        let build_args = |id: &str| -> Vec<String> {
            let args = BuildInvocation::for_agent(&descriptor(temp.path(), id), &context, false).to_args();
            args.windows(2)
                .filter(|w| w[0] == "--build-arg")
                .map(|w| w[1].clone())
                .collect()
        };

        let aide = build_args("aide");
        assert_eq!(
            aide,
            vec![
                "SUBMISSION_DIR=/home/submission",
                "LOGS_DIR=/home/logs",
                "CODE_DIR=/home/code",
                "AGENT_DIR=/home/agent",
            ]
        );
        assert_eq!(aide, build_args("oneshot"));
        assert_eq!(aide, build_args("zeroshot"));
    }

    #[test]
    fn test_agent_invocation_shape() {
        let temp = TempDir::new().unwrap();
        let aide = descriptor(temp.path(), "aide");
        let args = BuildInvocation::for_agent(&aide, &BuildContext::default(), false).to_args();

        assert_eq!(args[0], "build");
        assert_eq!(args[1], "--platform=linux/amd64");
        assert_eq!(&args[2..4], &["-t".to_string(), "aide".to_string()]);
        assert!(args.contains(&"biomlbench.agent.id=aide".to_string()));
        assert_eq!(args.last().unwrap(), &aide.dir.to_string_lossy().to_string());
    }

    #[test]
    fn test_base_env_invocation() {
        let args = BuildInvocation::for_base_env(
            "biomlbench-env",
            "environment/Dockerfile",
            ".",
            DEFAULT_PLATFORM,
            true,
        )
        .to_args();

        assert_eq!(
            args,
            vec![
                "build",
                "--platform=linux/amd64",
                "-t",
                "biomlbench-env",
                "-f",
                "environment/Dockerfile",
                "--no-cache",
                ".",
            ]
        );
    }
}
