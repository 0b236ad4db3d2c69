//! Docker layer for building and vetting agent images.
//!
//! Builds go through the `docker` CLI so their output can be captured
//! verbatim for diagnostics; daemon checks and smoke tests go through the
//! bollard API.
//!
//! # Example
//!
//! ```ignore
//! use biomlbench_agents::docker::{BuildContext, BuildInvocation, ContainerRuntime, DockerRuntime};
//!
//! let runtime = DockerRuntime::new();
//! let invocation = BuildInvocation::for_agent(&descriptor, &BuildContext::default(), false);
//! let output = runtime.build_image(&invocation).await?;
//! ```

pub mod build;
pub mod client;
pub mod runtime;

pub use build::{BuildContext, BuildInvocation, AGENT_ID_LABEL, DEFAULT_PLATFORM};
pub use client::DockerClient;
pub use runtime::{ContainerRuntime, DockerRuntime};
