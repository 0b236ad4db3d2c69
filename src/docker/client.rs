//! Docker API wrapper using the bollard crate.
//!
//! Covers the daemon operations the harness needs beyond `docker build`:
//! reachability, image inspection and throwaway container instantiation.

use std::collections::HashMap;

use bollard::container::{Config, CreateContainerOptions, RemoveContainerOptions};
use bollard::Docker;
use uuid::Uuid;

use crate::error::DockerError;

/// Docker client wrapper for daemon and image operations.
#[derive(Debug, Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Creates a new Docker client for the local Docker daemon.
    ///
    /// Connecting is lazy; use [`DockerClient::ping`] to check reachability.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if no local socket configuration
    /// can be built.
    pub fn new() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Creates a new Docker client from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Checks that the daemon answers.
    pub async fn ping(&self) -> Result<(), DockerError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| DockerError::DaemonUnavailable(e.to_string()))
    }

    /// Checks if an image exists locally.
    pub async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    /// Returns the labels baked into an image.
    pub async fn image_labels(&self, image: &str) -> Result<HashMap<String, String>, DockerError> {
        let info = self
            .docker
            .inspect_image(image)
            .await
            .map_err(|e| {
                if e.to_string().contains("No such image") {
                    DockerError::ImageNotFound(image.to_string())
                } else {
                    DockerError::RunFailed(format!("Failed to inspect image: {e}"))
                }
            })?;

        Ok(info
            .config
            .and_then(|config| config.labels)
            .unwrap_or_default())
    }

    /// Creates a container from `image` and removes it again.
    ///
    /// Proves the image's configuration is instantiable without running any
    /// agent code.
    pub async fn instantiate(&self, image: &str) -> Result<(), DockerError> {
        let name = format!("biomlbench-smoke-{}", Uuid::new_v4());

        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(vec!["true".to_string()]),
            tty: Some(false),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to create container: {e}")))?;

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(&response.id, Some(options))
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to remove container: {e}")))?;

        Ok(())
    }
}
