//! Image builds for agents and the shared base environment.
//!
//! # Architecture
//!
//! ```text
//! docker installed → daemon reachable → base image present
//!   → agent dir exists → agent files present → registry resolves
//!   → docker build → smoke test (instantiate, re-resolve label)
//! ```
//!
//! Each check short-circuits with its own [`BuildError`] variant.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::HarnessLayout;
use crate::docker::{BuildContext, BuildInvocation, ContainerRuntime, AGENT_ID_LABEL};
use crate::error::{BuildError, RegistryError};
use crate::registry::{missing_files, AgentRegistry, ValidationIssue};

/// Options for one build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Disable the build cache.
    pub force_no_cache: bool,
}

/// A built and smoke-tested image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub image: String,
    /// Agent the image was built for; `None` for the base image.
    pub agent_id: Option<String>,
}

/// Builds agent and base-environment images.
pub struct AgentBuilder {
    runtime: Box<dyn ContainerRuntime>,
    layout: HarnessLayout,
    context: BuildContext,
}

impl AgentBuilder {
    /// Creates a builder over `runtime` for the given layout.
    pub fn new(runtime: Box<dyn ContainerRuntime>, layout: HarnessLayout) -> Self {
        Self {
            runtime,
            layout,
            context: BuildContext::default(),
        }
    }

    /// Overrides the build context.
    pub fn with_context(mut self, context: BuildContext) -> Self {
        self.context = context;
        self
    }

    /// Builds the image of agent `agent_id`.
    pub async fn build(&self, agent_id: &str, options: BuildOptions) -> Result<ImageRef, BuildError> {
        self.check_runtime().await?;

        if !self.runtime.image_exists(&self.layout.base_image).await {
            return Err(BuildError::BaseImageMissing(self.layout.base_image.clone()));
        }

        let agent_dir = self.layout.agent_dir(agent_id);
        if !agent_dir.is_dir() {
            return Err(BuildError::AgentDirMissing(agent_dir));
        }

        if let Some(file) = missing_files(&agent_dir).first() {
            return Err(BuildError::AgentFileMissing(agent_dir.join(file.file_name())));
        }

        let registry = AgentRegistry::load(&self.layout.agents_dir)?;
        let descriptor = match registry.get(agent_id) {
            Ok(descriptor) => descriptor,
            Err(not_found) => return Err(explain_exclusion(&registry, &agent_dir, not_found).into()),
        };

        let invocation = BuildInvocation::for_agent(descriptor, &self.context, options.force_no_cache);
        info!(
            "Building image {} for agent {}{}",
            invocation.image,
            agent_id,
            if options.force_no_cache { " (no cache)" } else { "" }
        );

        let output = self
            .runtime
            .build_image(&invocation)
            .await
            .map_err(|e| BuildError::BuildFailed {
                image: invocation.image.clone(),
                output: e.to_string(),
            })?;
        debug!("Build output for {}:\n{}", invocation.image, output);

        self.smoke_test_agent(&invocation.image, &registry).await?;

        info!("Image {} built and verified", invocation.image);
        Ok(ImageRef {
            image: invocation.image,
            agent_id: Some(agent_id.to_string()),
        })
    }

    /// Builds the shared base image.
    pub async fn build_base_env(&self, options: BuildOptions) -> Result<ImageRef, BuildError> {
        self.check_runtime().await?;

        if !self.layout.base_dockerfile.is_file() {
            return Err(BuildError::BaseDockerfileMissing(
                self.layout.base_dockerfile.clone(),
            ));
        }

        let invocation = BuildInvocation::for_base_env(
            &self.layout.base_image,
            &self.layout.base_dockerfile,
            &self.layout.repo_root,
            &self.context.platform,
            options.force_no_cache,
        );
        info!("Building base image {}", invocation.image);

        self.runtime
            .build_image(&invocation)
            .await
            .map_err(|e| BuildError::BuildFailed {
                image: invocation.image.clone(),
                output: e.to_string(),
            })?;

        self.runtime
            .instantiate(&invocation.image)
            .await
            .map_err(|e| BuildError::SmokeTestFailed {
                image: invocation.image.clone(),
                reason: format!("container instantiation failed: {}", e),
            })?;

        Ok(ImageRef {
            image: invocation.image,
            agent_id: None,
        })
    }

    async fn check_runtime(&self) -> Result<(), BuildError> {
        if !self.runtime.is_installed().await {
            return Err(BuildError::RuntimeMissing);
        }
        self.runtime
            .ping()
            .await
            .map_err(|e| BuildError::DaemonUnavailable(e.to_string()))
    }

    /// Checks a fresh agent image. On failure the image stays in place but is
    /// not reported as built.
    async fn smoke_test_agent(&self, image: &str, registry: &AgentRegistry) -> Result<(), BuildError> {
        let smoke_err = |reason: String| BuildError::SmokeTestFailed {
            image: image.to_string(),
            reason,
        };

        self.runtime
            .instantiate(image)
            .await
            .map_err(|e| smoke_err(format!("container instantiation failed: {}", e)))?;

        let labels = self
            .runtime
            .image_labels(image)
            .await
            .map_err(|e| smoke_err(format!("image inspection failed: {}", e)))?;

        let declared = labels
            .get(AGENT_ID_LABEL)
            .ok_or_else(|| smoke_err(format!("image has no {} label", AGENT_ID_LABEL)))?;

        registry.get(declared).map_err(|e| {
            warn!("Image {} declares unknown agent {}", image, declared);
            smoke_err(e.to_string())
        })?;

        Ok(())
    }
}

/// Turns a lookup miss into the validation issue that excluded the agent.
fn explain_exclusion(
    registry: &AgentRegistry,
    agent_dir: &std::path::Path,
    not_found: RegistryError,
) -> RegistryError {
    registry
        .issues()
        .iter()
        .find_map(|issue| match issue {
            ValidationIssue::InvalidConfig { agent_dir: dir, message } if dir == agent_dir => {
                Some(RegistryError::InvalidConfig {
                    path: dir.clone(),
                    message: message.clone(),
                })
            }
            _ => None,
        })
        .unwrap_or(not_found)
}
