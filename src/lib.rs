//! biomlbench-agents: build and launch pluggable ML-solving agents.
//!
//! This library builds Docker images for a shared base environment and for
//! individual agents, and launches an agent's entrypoint inside its
//! container under a hard time limit.

// Core modules
pub mod builder;
pub mod cli;
pub mod config;
pub mod docker;
pub mod error;
pub mod launcher;
pub mod oneshot;
pub mod query;
pub mod registry;

// Re-export commonly used types
pub use builder::{AgentBuilder, BuildOptions, ImageRef};
pub use config::HarnessLayout;
pub use error::{BuildError, DockerError, LaunchError, OneShotError, QueryError, RegistryError};
pub use launcher::{LaunchResult, LaunchStatus, Launcher, RunContext};
pub use registry::{AgentDescriptor, AgentRegistry, ValidationIssue};
