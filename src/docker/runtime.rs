//! Container runtime seam used by the builder.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::build::BuildInvocation;
use super::client::DockerClient;
use crate::error::DockerError;

/// Host container runtime operations needed to build and vet images.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns true if the runtime's CLI is installed.
    async fn is_installed(&self) -> bool;

    /// Checks that the runtime's daemon is reachable.
    async fn ping(&self) -> Result<(), DockerError>;

    /// Returns true if `image` exists locally.
    async fn image_exists(&self, image: &str) -> bool;

    /// Runs a build and returns its combined output.
    async fn build_image(&self, invocation: &BuildInvocation) -> Result<String, DockerError>;

    /// Creates and removes a container from `image`.
    async fn instantiate(&self, image: &str) -> Result<(), DockerError>;

    /// Returns the labels of `image`.
    async fn image_labels(&self, image: &str) -> Result<HashMap<String, String>, DockerError>;
}

/// Docker: the CLI for builds, the daemon API for everything else.
pub struct DockerRuntime {
    /// Docker CLI executable.
    cli: String,
    /// Daemon API client, if one could be configured.
    client: Option<DockerClient>,
}

impl DockerRuntime {
    /// Creates a runtime using the `docker` CLI and the local daemon socket.
    pub fn new() -> Self {
        Self {
            cli: "docker".to_string(),
            client: DockerClient::new().ok(),
        }
    }

    /// Uses a different CLI executable (e.g. a wrapper script).
    pub fn with_cli(mut self, cli: impl Into<String>) -> Self {
        self.cli = cli.into();
        self
    }

    fn client(&self) -> Result<&DockerClient, DockerError> {
        self.client.as_ref().ok_or_else(|| {
            DockerError::DaemonUnavailable("no local Docker socket configuration".to_string())
        })
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn is_installed(&self) -> bool {
        Command::new(&self.cli)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn ping(&self) -> Result<(), DockerError> {
        self.client()?.ping().await
    }

    async fn image_exists(&self, image: &str) -> bool {
        match self.client() {
            Ok(client) => client.image_exists(image).await,
            Err(_) => false,
        }
    }

    async fn build_image(&self, invocation: &BuildInvocation) -> Result<String, DockerError> {
        let args = invocation.to_args();
        debug!("Docker command: {} {}", self.cli, args.join(" "));

        let output = Command::new(&self.cli).args(&args).output().await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(DockerError::BuildFailed(combined))
        }
    }

    async fn instantiate(&self, image: &str) -> Result<(), DockerError> {
        self.client()?.instantiate(image).await
    }

    async fn image_labels(&self, image: &str) -> Result<HashMap<String, String>, DockerError> {
        self.client()?.image_labels(image).await
    }
}
